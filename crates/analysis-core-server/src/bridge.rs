//! Host-facing entry points.
//!
//! The host editor reports document changes and file visibility to an [`EditBridge`], and
//! implements [`AnalysisHost`] so the session can ask for document text and signal re-renders.

use crate::reporter::ErrorReport;
use crate::session::SessionManager;
use analysis_core::{DocumentEdit, RegionKind};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// Callbacks into the host editor.
///
/// Called from the server reader thread or the thread that made a local edit; implementations
/// must not block on the session.
pub trait AnalysisHost: Send + Sync {
    /// Current text of an open document, or `None` if the host has no buffer for it.
    fn document_text(&self, file: &str) -> Option<String>;

    /// Cached results of `kind` for `file` changed; re-render.
    fn invalidate(&self, _file: &str, _kind: RegionKind) {}

    /// The server started analyzing (or listing packages).
    fn analysis_started(&self) {}

    /// The server went idle.
    fn analysis_finished(&self) {}

    /// A server error should be shown to the user.
    fn server_error(&self, _report: &ErrorReport) {}
}

/// Routes host events to the region store and the session.
#[derive(Debug)]
pub struct EditBridge {
    session: Arc<SessionManager>,
    open_files: Mutex<BTreeSet<String>>,
}

impl EditBridge {
    /// Create a bridge for `session`.
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            open_files: Mutex::new(BTreeSet::new()),
        }
    }

    /// The wrapped session.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// A document changed: `old_length` characters at `offset` were replaced by `new_length`.
    ///
    /// Patches cached results, marks the file dirty and schedules a content update. Returns the
    /// new edit generation, or `None` for files the server does not analyze.
    pub fn on_document_changed(
        &self,
        file: &str,
        offset: usize,
        old_length: usize,
        new_length: usize,
    ) -> Option<u64> {
        if !self.session.config().file_filter.accepts(file) {
            return None;
        }
        let edit = DocumentEdit::new(offset, old_length, new_length);
        let generation = self.session.store().on_document_changed(file, &edit);
        trace!(file, offset, old_length, new_length, generation, "document changed");
        self.session.schedule_content_update(file);
        Some(generation)
    }

    /// A file became visible in the host.
    pub fn on_file_opened(&self, file: &str) {
        let files = {
            let mut open = self.open_files.lock();
            if !open.insert(file.to_string()) {
                return;
            }
            open.iter().cloned().collect::<Vec<_>>()
        };
        self.session.set_visible_files(files);
    }

    /// A file is no longer visible; its cached results (except errors) are dropped.
    pub fn on_file_closed(&self, file: &str) {
        let files = {
            let mut open = self.open_files.lock();
            if !open.remove(file) {
                return;
            }
            open.iter().cloned().collect::<Vec<_>>()
        };
        self.session.store().on_file_closed(file);
        self.session.set_visible_files(files);
    }

    /// Files the host reported as open.
    pub fn open_files(&self) -> Vec<String> {
        self.open_files.lock().iter().cloned().collect()
    }

    /// The project structure changed; push roots if they differ.
    pub fn on_roots_changed(&self) -> bool {
        self.session.on_roots_changed()
    }

    /// Send pending content without waiting for the debounce delay.
    pub fn flush_content_updates(&self) {
        self.session.flush_content_updates();
    }
}
