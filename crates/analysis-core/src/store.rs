//! Per-file caches of analyzer results.
//!
//! [`RegionStore`] keeps, for every file the analyzer has reported on (or the user has edited),
//! one list per [`RegionKind`]. Lists are replaced wholesale when the analyzer pushes new
//! results and patched in place when the local document changes.
//!
//! # Dirty gate
//!
//! A local edit marks the file as having unsent local changes. Until the server acknowledges
//! content for the current edit generation (see [`RegionStore::acknowledge_content`]), pushed
//! results for the file describe older text and are discarded.
//!
//! # Snapshots
//!
//! Readers get [`Snapshot`]s (shared, immutable lists). Patching goes through
//! [`Arc::make_mut`], so a snapshot held by a renderer is never mutated underneath it.
//! Outlines are the exception to patching: they are kept as received until the analyzer
//! replaces them.
//!
//! ```
//! use analysis_core::{DocumentEdit, ErrorRegion, Region, RegionStore, Severity};
//!
//! let store = RegionStore::new();
//! store.computed_errors(
//!     "/p/a.dart",
//!     vec![ErrorRegion::new("/p/a.dart", Region::new(10, 5), Severity::Error, "SYNTACTIC_ERROR", "x")],
//! );
//! store.on_document_changed("/p/a.dart", &DocumentEdit::insertion(0, 3));
//!
//! assert_eq!(store.errors("/p/a.dart")[0].region, Region::new(13, 5));
//! assert!(store.has_unsent_local_changes("/p/a.dart"));
//! ```

use crate::edit::DocumentEdit;
use crate::patch::{update_regions_deleting_touched, update_regions_updating_touched};
use crate::regions::{
    ErrorRegion, HighlightRegion, Marker, NavigationRegion, Outline, OverrideRegion, RegionKind,
    Severity, Spanned,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Shared immutable view of one cached list.
pub type Snapshot<T> = Arc<Vec<T>>;

/// A change notification emitted after the store has released its locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Affected file.
    pub file: String,
    /// Affected result kind.
    pub kind: RegionKind,
}

/// Callback invoked for every [`StoreChange`].
pub type StoreListener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

/// Handle returned by [`RegionStore::subscribe`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Default)]
struct FileEntry {
    errors: Snapshot<ErrorRegion>,
    highlights: Snapshot<HighlightRegion>,
    navigation: Snapshot<NavigationRegion>,
    overrides: Snapshot<OverrideRegion>,
    implemented_classes: Snapshot<Marker>,
    implemented_members: Snapshot<Marker>,
    outline: Option<Arc<Outline>>,
    has_unsent_local_changes: bool,
    error_info_lost: bool,
    edit_generation: u64,
}

impl FileEntry {
    fn non_empty_kinds(&self) -> Vec<RegionKind> {
        let mut kinds = Vec::new();
        if !self.errors.is_empty() {
            kinds.push(RegionKind::Errors);
        }
        if !self.highlights.is_empty() {
            kinds.push(RegionKind::Highlights);
        }
        if !self.navigation.is_empty() {
            kinds.push(RegionKind::Navigation);
        }
        if !self.overrides.is_empty() {
            kinds.push(RegionKind::Overrides);
        }
        if !self.implemented_classes.is_empty() || !self.implemented_members.is_empty() {
            kinds.push(RegionKind::Implemented);
        }
        if self.outline.is_some() {
            kinds.push(RegionKind::Outline);
        }
        kinds
    }

    fn clear_results(&mut self, keep_errors: bool) {
        if !keep_errors {
            self.errors = Snapshot::default();
            self.error_info_lost = false;
        }
        self.highlights = Snapshot::default();
        self.navigation = Snapshot::default();
        self.overrides = Snapshot::default();
        self.implemented_classes = Snapshot::default();
        self.implemented_members = Snapshot::default();
        self.outline = None;
    }
}

/// Concurrent per-file cache of analyzer results.
///
/// All methods take `&self`; calls for different files proceed in parallel, calls for the same
/// file are serialized by the per-entry lock.
#[derive(Default)]
pub struct RegionStore {
    files: DashMap<String, FileEntry>,
    listeners: RwLock<Vec<(ListenerId, StoreListener)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for RegionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionStore")
            .field("files", &self.files.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl RegionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a change listener.
    ///
    /// Listeners run on the thread that caused the change, after all store locks are released,
    /// so they may read from the store and (un)subscribe. A listener added or removed while a
    /// change is being delivered takes effect from the next change.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: StoreListener = Arc::new(listener);
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, file: &str, kinds: &[RegionKind]) {
        if kinds.is_empty() {
            return;
        }
        let listeners: Vec<StoreListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for kind in kinds {
            let change = StoreChange {
                file: file.to_string(),
                kind: *kind,
            };
            for listener in &listeners {
                listener(&change);
            }
        }
    }

    /// Run `apply` on the entry for `file` unless it has unsent local changes.
    ///
    /// `apply` reports whether listeners should be notified. Returns `false` if the update was
    /// rejected.
    fn ingest<F>(&self, file: &str, kind: RegionKind, apply: F) -> bool
    where
        F: FnOnce(&mut FileEntry) -> bool,
    {
        let changed = {
            let mut entry = self.files.entry(file.to_string()).or_default();
            if entry.has_unsent_local_changes {
                debug!(file, ?kind, "dropping results for file with unsent local changes");
                return false;
            }
            apply(&mut *entry)
        };
        if changed {
            self.notify(file, &[kind]);
        }
        true
    }

    /// Replace the errors for `file`.
    ///
    /// `TODO` markers are dropped. A list identical to the cached one is accepted without a
    /// change notification, unless a local edit has removed errors since the last update.
    ///
    /// Returns `false` if the file has unsent local changes.
    pub fn computed_errors(&self, file: &str, errors: Vec<ErrorRegion>) -> bool {
        let errors: Vec<ErrorRegion> = errors.into_iter().filter(|e| !e.is_todo()).collect();
        self.ingest(file, RegionKind::Errors, |entry| {
            if !entry.error_info_lost && *entry.errors == errors {
                return false;
            }
            entry.errors = Arc::new(errors);
            entry.error_info_lost = false;
            true
        })
    }

    /// Replace the highlights for `file`; zero-length regions are dropped.
    pub fn computed_highlights(&self, file: &str, highlights: Vec<HighlightRegion>) -> bool {
        let highlights = without_empty(highlights);
        self.ingest(file, RegionKind::Highlights, |entry| {
            entry.highlights = Arc::new(highlights);
            true
        })
    }

    /// Replace the navigation regions for `file`; zero-length regions are dropped.
    pub fn computed_navigation(&self, file: &str, regions: Vec<NavigationRegion>) -> bool {
        let regions = without_empty(regions);
        self.ingest(file, RegionKind::Navigation, |entry| {
            entry.navigation = Arc::new(regions);
            true
        })
    }

    /// Replace the override markers for `file`; zero-length regions are dropped.
    pub fn computed_overrides(&self, file: &str, overrides: Vec<OverrideRegion>) -> bool {
        let overrides = without_empty(overrides);
        self.ingest(file, RegionKind::Overrides, |entry| {
            entry.overrides = Arc::new(overrides);
            true
        })
    }

    /// Replace implemented class/member markers for `file`.
    ///
    /// Listeners are only notified when the lists differ from the cached ones.
    pub fn computed_implemented(&self, file: &str, classes: Vec<Marker>, members: Vec<Marker>) -> bool {
        self.ingest(file, RegionKind::Implemented, |entry| {
            if *entry.implemented_classes == classes && *entry.implemented_members == members {
                return false;
            }
            entry.implemented_classes = Arc::new(classes);
            entry.implemented_members = Arc::new(members);
            true
        })
    }

    /// Replace the outline for `file`.
    pub fn computed_outline(&self, file: &str, outline: Outline) -> bool {
        self.ingest(file, RegionKind::Outline, |entry| {
            entry.outline = Some(Arc::new(outline));
            true
        })
    }

    /// Patch every cached list of `file` for a local edit and mark the file dirty.
    ///
    /// Highlights grow or shrink with edits inside them and the outline is kept as is. Every
    /// other kind drops touched regions. Returns the new edit generation of the file.
    pub fn on_document_changed(&self, file: &str, edit: &DocumentEdit) -> u64 {
        let (generation, kinds) = {
            let mut entry = self.files.entry(file.to_string()).or_default();
            let kinds: Vec<RegionKind> = entry
                .non_empty_kinds()
                .into_iter()
                .filter(|kind| *kind != RegionKind::Outline)
                .collect();

            entry.has_unsent_local_changes = true;
            entry.edit_generation = entry.edit_generation.wrapping_add(1);

            if !entry.errors.is_empty()
                && update_regions_deleting_touched(file, Arc::make_mut(&mut entry.errors), edit)
            {
                entry.error_info_lost = true;
            }
            if !entry.highlights.is_empty() {
                update_regions_updating_touched(file, Arc::make_mut(&mut entry.highlights), edit);
            }
            patch_deleting(file, &mut entry.navigation, edit);
            patch_deleting(file, &mut entry.overrides, edit);
            patch_deleting(file, &mut entry.implemented_classes, edit);
            patch_deleting(file, &mut entry.implemented_members, edit);

            (entry.edit_generation, kinds)
        };

        self.notify(file, &kinds);
        generation
    }

    /// Drop all results for a file closed in the host, except its errors.
    pub fn on_file_closed(&self, file: &str) {
        let kinds = {
            let Some(mut entry) = self.files.get_mut(file) else {
                return;
            };
            let kinds: Vec<RegionKind> = entry
                .non_empty_kinds()
                .into_iter()
                .filter(|kind| *kind != RegionKind::Errors)
                .collect();
            entry.clear_results(true);
            kinds
        };
        self.notify(file, &kinds);
    }

    /// Drop every result for files the server reports as flushed.
    pub fn on_files_flushed<S: AsRef<str>>(&self, files: &[S]) {
        for file in files {
            let file = file.as_ref();
            let kinds = {
                let Some(mut entry) = self.files.get_mut(file) else {
                    continue;
                };
                let kinds = entry.non_empty_kinds();
                entry.clear_results(false);
                kinds
            };
            self.notify(file, &kinds);
        }
    }

    /// Drop every result for every file (server restart).
    ///
    /// Unsent-change flags and edit generations survive so the caller can re-send overlays.
    pub fn clear_all(&self) {
        let mut cleared = Vec::new();
        for mut entry in self.files.iter_mut() {
            let kinds = entry.non_empty_kinds();
            entry.clear_results(false);
            if !kinds.is_empty() {
                cleared.push((entry.key().clone(), kinds));
            }
        }
        for (file, kinds) in cleared {
            self.notify(&file, &kinds);
        }
    }

    /// Record that the server received content for the given `(file, edit_generation)` pairs.
    ///
    /// The unsent-changes flag is cleared only if no further local edit happened since.
    pub fn acknowledge_content<S: AsRef<str>>(&self, sent: &[(S, u64)]) {
        for (file, generation) in sent {
            if let Some(mut entry) = self.files.get_mut(file.as_ref())
                && entry.edit_generation == *generation
            {
                entry.has_unsent_local_changes = false;
            }
        }
    }

    /// Returns `true` while `file` has local edits the server has not acknowledged.
    pub fn has_unsent_local_changes(&self, file: &str) -> bool {
        self.files
            .get(file)
            .is_some_and(|entry| entry.has_unsent_local_changes)
    }

    /// Current local edit generation of `file` (`0` if it was never edited).
    pub fn edit_generation(&self, file: &str) -> u64 {
        self.files.get(file).map_or(0, |entry| entry.edit_generation)
    }

    /// Files with unsent local changes, sorted.
    pub fn dirty_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .files
            .iter()
            .filter(|entry| entry.has_unsent_local_changes)
            .map(|entry| entry.key().clone())
            .collect();
        files.sort();
        files
    }

    /// Cached outline for `file`.
    pub fn outline(&self, file: &str) -> Option<Arc<Outline>> {
        self.files.get(file).and_then(|entry| entry.outline.clone())
    }

    /// Cached errors for `file`.
    pub fn errors(&self, file: &str) -> Snapshot<ErrorRegion> {
        self.files
            .get(file)
            .map(|entry| entry.errors.clone())
            .unwrap_or_default()
    }

    /// Cached highlights for `file`.
    pub fn highlights(&self, file: &str) -> Snapshot<HighlightRegion> {
        self.files
            .get(file)
            .map(|entry| entry.highlights.clone())
            .unwrap_or_default()
    }

    /// Cached navigation regions for `file`.
    pub fn navigation(&self, file: &str) -> Snapshot<NavigationRegion> {
        self.files
            .get(file)
            .map(|entry| entry.navigation.clone())
            .unwrap_or_default()
    }

    /// Navigation region covering `offset` in `file`, if any.
    pub fn navigation_at(&self, file: &str, offset: usize) -> Option<NavigationRegion> {
        self.navigation(file)
            .iter()
            .find(|nav| nav.region.contains(offset))
            .cloned()
    }

    /// Cached override markers for `file`.
    pub fn overrides(&self, file: &str) -> Snapshot<OverrideRegion> {
        self.files
            .get(file)
            .map(|entry| entry.overrides.clone())
            .unwrap_or_default()
    }

    /// Cached implemented-class markers for `file`.
    pub fn implemented_classes(&self, file: &str) -> Snapshot<Marker> {
        self.files
            .get(file)
            .map(|entry| entry.implemented_classes.clone())
            .unwrap_or_default()
    }

    /// Cached implemented-member markers for `file`.
    pub fn implemented_members(&self, file: &str) -> Snapshot<Marker> {
        self.files
            .get(file)
            .map(|entry| entry.implemented_members.clone())
            .unwrap_or_default()
    }

    /// Errors across all files accepted by `filter`, ordered by file then offset.
    pub fn all_errors<F>(&self, filter: F) -> Vec<ErrorRegion>
    where
        F: Fn(&ErrorRegion) -> bool,
    {
        let mut errors: Vec<ErrorRegion> = self
            .files
            .iter()
            .flat_map(|entry| {
                entry
                    .errors
                    .iter()
                    .filter(|e| filter(*e))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        errors.sort_by(|a, b| (&a.file_path, a.region).cmp(&(&b.file_path, b.region)));
        errors
    }

    /// Returns `true` if `file` has at least one error of [`Severity::Error`].
    pub fn is_file_with_errors(&self, file: &str) -> bool {
        self.files.get(file).is_some_and(|entry| has_error_severity(&entry.errors))
    }

    /// Files holding at least one error of [`Severity::Error`], sorted.
    pub fn files_with_errors(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .files
            .iter()
            .filter(|entry| has_error_severity(&entry.errors))
            .map(|entry| entry.key().clone())
            .collect();
        files.sort();
        files
    }

    /// Returns `true` if any file under `dir` has errors of [`Severity::Error`].
    pub fn has_errors_under(&self, dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        self.files.iter().any(|entry| {
            Path::new(entry.key()).starts_with(dir) && has_error_severity(&entry.errors)
        })
    }

    /// Number of files with a cache entry.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no file has a cache entry.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn without_empty<T: Spanned>(mut regions: Vec<T>) -> Vec<T> {
    regions.retain(|r| !r.region().is_empty());
    regions
}

fn patch_deleting<T: Spanned + Clone>(file: &str, list: &mut Snapshot<T>, edit: &DocumentEdit) {
    if !list.is_empty() {
        update_regions_deleting_touched(file, Arc::make_mut(list), edit);
    }
}

fn has_error_severity(errors: &[ErrorRegion]) -> bool {
    errors.iter().any(|e| e.severity == Severity::Error)
}
