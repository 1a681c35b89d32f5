//! Analysis server session lifecycle.
//!
//! [`SessionManager`] owns at most one running server. It:
//! - starts the server through a [`ServerLauncher`] and replays session state into it,
//! - routes pushed results into the shared [`RegionStore`],
//! - pushes analysis roots, visible files and edited content when they change,
//! - restarts the server when it exits unexpectedly, within a [`RestartPolicy`] budget.
//!
//! Every (re)start applies a [`ResetPlan`]: an ordered list of steps that re-establish the
//! server-side view of the session.
//!
//! [`RestartPolicy`]: crate::config::RestartPolicy

use crate::bridge::AnalysisHost;
use crate::client::{AnalysisServerClient, MessageHandler};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::launcher::ServerLauncher;
use crate::protocol::{self, ContentOverlay, ServerNotification, ServerStatus};
use crate::reporter::{
    DebugLog, ErrorReport, ErrorReporter, ReporterConfig, format_server_error,
    is_ignored_server_error,
};
use crate::roots::{RootSet, RootsProvider, RootsTracker};
use analysis_core::{ErrorRegion, ListenerId, NavigationRegion, RegionStore};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No server; `start` has not been called or `stop` was called.
    Stopped,
    /// A server connection is established.
    Running,
    /// Starting or restarting failed; an explicit `start` is required.
    Failed,
}

/// One step of re-establishing server state after a (re)start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetStep {
    /// Drop every cached result (they belong to the previous server).
    ClearStore,
    /// `server.setSubscriptions(["STATUS"])`.
    SubscribeStatus,
    /// `analysis.setAnalysisRoots`.
    SubmitRoots(RootSet),
    /// `analysis.setPriorityFiles` and `analysis.setSubscriptions`.
    SubmitVisibleFiles(Vec<String>),
    /// `analysis.updateContent` for files with local content.
    SubmitOverlays(Vec<String>),
}

/// Ordered steps applied to a fresh server connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetPlan {
    /// Steps in execution order.
    pub steps: Vec<ResetStep>,
}

impl ResetPlan {
    /// Plan for a server that has just been started.
    ///
    /// `clear_store` is set for restarts, where cached results belong to the dead server.
    /// Overlays are re-sent for every file that has unsent edits or a live overlay.
    pub fn new(
        clear_store: bool,
        roots: RootSet,
        visible_files: &[String],
        dirty_files: &[String],
        overlaid_files: &[String],
    ) -> Self {
        let mut steps = Vec::new();
        if clear_store {
            steps.push(ResetStep::ClearStore);
        }
        steps.push(ResetStep::SubscribeStatus);
        steps.push(ResetStep::SubmitRoots(roots));
        if !visible_files.is_empty() {
            steps.push(ResetStep::SubmitVisibleFiles(visible_files.to_vec()));
        }

        let overlays: BTreeSet<String> = dirty_files
            .iter()
            .chain(overlaid_files)
            .cloned()
            .collect();
        if !overlays.is_empty() {
            steps.push(ResetStep::SubmitOverlays(overlays.into_iter().collect()));
        }
        Self { steps }
    }
}

/// Result of a launch attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchOutcome {
    /// The new connection is installed.
    Connected,
    /// `stop` (or another launch) ran meanwhile; the new connection was discarded.
    Superseded,
}

struct SessionState {
    status: SessionStatus,
    client: Option<Arc<AnalysisServerClient>>,
    generation: u64,
    server_version: String,
    roots: RootsTracker,
    visible_files: Vec<String>,
    overlaid_files: BTreeSet<String>,
    changed_files: BTreeSet<String>,
    content_due: Option<Instant>,
    restarts: VecDeque<Instant>,
    analysis_busy: bool,
    pub_busy: bool,
    start_failure_reported: bool,
    debounce_running: bool,
    debounce_thread: Option<JoinHandle<()>>,
}

impl SessionState {
    fn busy(&self) -> bool {
        self.analysis_busy || self.pub_busy
    }
}

struct Inner {
    self_ref: Weak<Inner>,
    config: SessionConfig,
    launcher: Box<dyn ServerLauncher>,
    store: Arc<RegionStore>,
    roots_provider: Arc<dyn RootsProvider>,
    host: Arc<dyn AnalysisHost>,
    state: Mutex<SessionState>,
    content_signal: Condvar,
    reporter: Mutex<ErrorReporter>,
    debug_log: DebugLog,
}

/// Manages one analysis server on behalf of an editor session.
///
/// Created stopped; call [`Self::start`]. Dropping the manager stops the server and removes
/// its store listener.
pub struct SessionManager {
    inner: Arc<Inner>,
    store_listener: ListenerId,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a stopped session.
    ///
    /// Store changes are forwarded to [`AnalysisHost::invalidate`].
    pub fn new(
        config: SessionConfig,
        launcher: Box<dyn ServerLauncher>,
        store: Arc<RegionStore>,
        roots_provider: Arc<dyn RootsProvider>,
        host: Arc<dyn AnalysisHost>,
    ) -> Self {
        Self::with_reporter_config(
            config,
            ReporterConfig::default(),
            launcher,
            store,
            roots_provider,
            host,
        )
    }

    /// [`Self::new`] with explicit error reporting limits.
    pub fn with_reporter_config(
        config: SessionConfig,
        reporter_config: ReporterConfig,
        launcher: Box<dyn ServerLauncher>,
        store: Arc<RegionStore>,
        roots_provider: Arc<dyn RootsProvider>,
        host: Arc<dyn AnalysisHost>,
    ) -> Self {
        let store_listener = {
            let host = Arc::downgrade(&host);
            store.subscribe(move |change| {
                if let Some(host) = host.upgrade() {
                    host.invalidate(&change.file, change.kind);
                }
            })
        };

        let debug_log = DebugLog::new(
            reporter_config.debug_log_capacity,
            reporter_config.max_debug_line_length,
        );
        let inner = Arc::new_cyclic(|self_ref| Inner {
            self_ref: self_ref.clone(),
            config,
            launcher,
            store,
            roots_provider,
            host,
            state: Mutex::new(SessionState {
                status: SessionStatus::Stopped,
                client: None,
                generation: 0,
                server_version: String::new(),
                roots: RootsTracker::new(),
                visible_files: Vec::new(),
                overlaid_files: BTreeSet::new(),
                changed_files: BTreeSet::new(),
                content_due: None,
                restarts: VecDeque::new(),
                analysis_busy: false,
                pub_busy: false,
                start_failure_reported: false,
                debounce_running: false,
                debounce_thread: None,
            }),
            content_signal: Condvar::new(),
            reporter: Mutex::new(ErrorReporter::new(reporter_config, debug_log.clone())),
            debug_log,
        });
        Self {
            inner,
            store_listener,
        }
    }

    /// Start the server. No-op if it is already running.
    ///
    /// A startup failure is reported to the host once; repeated failing calls only log. A
    /// [`Self::stop`] racing with the launch wins and yields [`SessionError::NotRunning`].
    pub fn start(&self) -> SessionResult<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.status == SessionStatus::Running {
                return Ok(());
            }
            state.restarts.clear();
            state.generation += 1;
            state.generation
        };

        match self.inner.launch(false, generation) {
            Ok(LaunchOutcome::Connected) => {
                self.inner.state.lock().start_failure_reported = false;
                self.inner.spawn_debouncer();
                Ok(())
            }
            Ok(LaunchOutcome::Superseded) => match self.status() {
                SessionStatus::Running => Ok(()),
                _ => Err(SessionError::NotRunning),
            },
            Err(err) => {
                self.inner.fail(generation, &err);
                Err(err)
            }
        }
    }

    /// Shut the server down: `server.shutdown`, bounded wait, then kill.
    ///
    /// Cached results and root state are dropped; unsent-change flags survive so the next start
    /// re-sends edited content.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// Version reported by `server.connected`.
    pub fn server_version(&self) -> String {
        self.inner.state.lock().server_version.clone()
    }

    /// Returns `true` while the server reports analysis or package listing in progress.
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().busy()
    }

    /// Shared result store.
    pub fn store(&self) -> &Arc<RegionStore> {
        &self.inner.store
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Recent wire traffic.
    pub fn debug_log(&self) -> &DebugLog {
        &self.inner.debug_log
    }

    /// Recompute roots and push them if they differ from the last pushed set.
    ///
    /// Returns `true` if a push was issued.
    pub fn on_roots_changed(&self) -> bool {
        let desired = self.inner.roots_provider.roots();
        let Some(client) = self.inner.client() else {
            return false;
        };
        self.inner.submit_roots(&client, desired)
    }

    /// Replace the set of files visible in the host.
    ///
    /// Non-analyzable files are ignored. Sends priority files and subscriptions on change.
    pub fn set_visible_files(&self, files: impl IntoIterator<Item = String>) {
        let mut files: Vec<String> = files
            .into_iter()
            .filter(|file| self.inner.config.file_filter.accepts(file))
            .collect();
        files.sort();
        files.dedup();

        let client = {
            let mut state = self.inner.state.lock();
            if state.visible_files == files {
                return;
            }
            state.visible_files = files.clone();
            state.client.clone()
        };
        if let Some(client) = client {
            self.inner.submit_visible_files(&client, &files);
        }
    }

    /// Files currently considered visible.
    pub fn visible_files(&self) -> Vec<String> {
        self.inner.state.lock().visible_files.clone()
    }

    /// Queue `file` for the next debounced `analysis.updateContent`.
    pub fn schedule_content_update(&self, file: &str) {
        let mut state = self.inner.state.lock();
        state.changed_files.insert(file.to_string());
        state.content_due = Some(Instant::now() + self.inner.config.update_content_delay);
        self.inner.content_signal.notify_all();
    }

    /// Flush queued content if its debounce deadline has passed.
    ///
    /// Returns `true` if a flush happened.
    pub fn poll_content_updates(&self) -> bool {
        let due = self.inner.state.lock().content_due;
        match due {
            Some(due) if Instant::now() >= due => {
                self.inner.flush_content_updates();
                true
            }
            _ => false,
        }
    }

    /// Send queued content now.
    pub fn flush_content_updates(&self) {
        self.inner.flush_content_updates();
    }

    /// Drop the server-side overlay of `file` (e.g. after the document was saved).
    pub fn remove_overlay(&self, file: &str) {
        let Some(client) = self.inner.client() else {
            return;
        };
        let removed = self.inner.state.lock().overlaid_files.remove(file);
        if removed {
            self.inner.submit_overlays(&client, &[file.to_string()], false);
        }
    }

    /// Files with a live server-side overlay.
    pub fn overlaid_files(&self) -> Vec<String> {
        self.inner.state.lock().overlaid_files.iter().cloned().collect()
    }

    /// `analysis.getErrors`; `None` on timeout or failure.
    pub fn get_errors(&self, file: &str) -> Option<Vec<ErrorRegion>> {
        let result = self
            .request(protocol::ANALYSIS_GET_ERRORS, protocol::get_errors_params(file))
            .map_err(|err| debug!(file, error = %err, "analysis.getErrors failed"))
            .ok()?;
        protocol::errors_from_result(&result)
    }

    /// `analysis.getNavigation`; `None` on timeout or failure.
    pub fn get_navigation(&self, file: &str, offset: usize, length: usize) -> Option<Vec<NavigationRegion>> {
        let result = self
            .request(
                protocol::ANALYSIS_GET_NAVIGATION,
                protocol::get_navigation_params(file, offset, length),
            )
            .map_err(|err| debug!(file, error = %err, "analysis.getNavigation failed"))
            .ok()?;
        protocol::navigation_from_result(&result)
    }

    /// `analysis.reanalyze` (fire and forget).
    pub fn reanalyze(&self) -> SessionResult<()> {
        let client = self.inner.client().ok_or(SessionError::NotRunning)?;
        client.send(protocol::ANALYSIS_REANALYZE, Value::Null)?;
        Ok(())
    }

    /// Send an arbitrary request and wait up to the configured timeout.
    pub fn request(&self, method: &str, params: Value) -> SessionResult<Value> {
        let client = self.inner.client().ok_or(SessionError::NotRunning)?;
        client.request_blocking(method, params, self.inner.config.request_timeout)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.inner.stop();
        self.inner.store.unsubscribe(self.store_listener);
    }
}

impl Inner {
    fn client(&self) -> Option<Arc<AnalysisServerClient>> {
        self.state.lock().client.clone()
    }

    /// Start a server process, connect it, and apply the reset plan.
    ///
    /// `generation` must have been reserved by the caller under the state lock. The connection
    /// is installed only if no `stop` or other launch bumped the generation meanwhile.
    fn launch(&self, clear_store: bool, generation: u64) -> SessionResult<LaunchOutcome> {
        let roots = self.roots_provider.roots();
        let connection = self.launcher.launch(Some(&roots))?;

        let handler = Arc::new(ConnectionHandler {
            inner: self.weak_self(),
            generation,
        });
        let client = Arc::new(AnalysisServerClient::connect(
            connection,
            handler,
            self.debug_log.clone(),
        )?);

        let plan = {
            let mut state = self.state.lock();
            if state.generation != generation {
                drop(state);
                info!(generation, "session changed while launching; discarding new server");
                client.terminate(Duration::ZERO);
                return Ok(LaunchOutcome::Superseded);
            }
            state.status = SessionStatus::Running;
            state.client = Some(client.clone());
            state.roots.reset();
            let overlaid: Vec<String> = state.overlaid_files.iter().cloned().collect();
            ResetPlan::new(
                clear_store,
                roots,
                &state.visible_files,
                &self.store.dirty_files(),
                &overlaid,
            )
        };

        if client.is_closed() {
            return Err(SessionError::ServerExited);
        }
        info!(generation, steps = plan.steps.len(), "analysis server connected");
        self.apply_plan(&client, plan);
        Ok(LaunchOutcome::Connected)
    }

    fn apply_plan(&self, client: &Arc<AnalysisServerClient>, plan: ResetPlan) {
        for step in plan.steps {
            match step {
                ResetStep::ClearStore => self.store.clear_all(),
                ResetStep::SubscribeStatus => {
                    if let Err(err) = client.send(
                        protocol::SERVER_SET_SUBSCRIPTIONS,
                        protocol::server_subscriptions_params(),
                    ) {
                        warn!(error = %err, "failed to subscribe to server status");
                    }
                }
                ResetStep::SubmitRoots(roots) => {
                    self.submit_roots(client, roots);
                }
                ResetStep::SubmitVisibleFiles(files) => self.submit_visible_files(client, &files),
                ResetStep::SubmitOverlays(files) => self.submit_overlays(client, &files, true),
            }
        }
    }

    fn submit_roots(&self, client: &Arc<AnalysisServerClient>, roots: RootSet) -> bool {
        {
            let mut state = self.state.lock();
            if !state.roots.needs_push(&roots) {
                return false;
            }
            state.roots.mark_sent(roots.clone());
        }

        info!(
            included = roots.included().len(),
            excluded = roots.excluded().len(),
            "pushing analysis roots"
        );
        let params = protocol::analysis_roots_params(roots.included(), roots.excluded());
        let weak = self.weak_self();
        let acked = roots.clone();
        let sent = client.send_request(protocol::ANALYSIS_SET_ROOTS, params, move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state.lock();
            match outcome {
                Ok(_) => state.roots.mark_acknowledged(acked),
                Err(err) => {
                    warn!(error = %err, "analysis.setAnalysisRoots failed");
                    state.roots.mark_failed(&acked);
                }
            }
        });
        if let Err(err) = sent {
            warn!(error = %err, "failed to send analysis roots");
            self.state.lock().roots.mark_failed(&roots);
            return false;
        }
        true
    }

    fn submit_visible_files(&self, client: &AnalysisServerClient, files: &[String]) {
        let priority = client.send(
            protocol::ANALYSIS_SET_PRIORITY_FILES,
            protocol::priority_files_params(files),
        );
        let subscriptions = client.send(
            protocol::ANALYSIS_SET_SUBSCRIPTIONS,
            protocol::analysis_subscriptions_params(files),
        );
        if let Err(err) = priority.and(subscriptions) {
            warn!(error = %err, "failed to send visible files");
        }
    }

    /// Send current host content for `files`; files without host text get their overlay removed.
    ///
    /// The acknowledgement clears the unsent-change flag of files not edited since.
    fn submit_overlays(&self, client: &AnalysisServerClient, files: &[String], use_host_text: bool) {
        let mut overlays = Vec::with_capacity(files.len());
        let mut sent = Vec::with_capacity(files.len());
        for file in files {
            let generation = self.store.edit_generation(file);
            let text = if use_host_text { self.host.document_text(file) } else { None };
            match text {
                Some(content) => overlays.push(ContentOverlay::Add {
                    file: file.clone(),
                    content,
                }),
                None => overlays.push(ContentOverlay::Remove { file: file.clone() }),
            }
            sent.push((file.clone(), generation));
        }
        if overlays.is_empty() {
            return;
        }

        {
            let mut state = self.state.lock();
            for overlay in &overlays {
                match overlay {
                    ContentOverlay::Add { file, .. } => {
                        state.overlaid_files.insert(file.clone());
                    }
                    ContentOverlay::Remove { file } => {
                        state.overlaid_files.remove(file);
                    }
                }
            }
        }

        debug!(files = overlays.len(), "sending analysis.updateContent");
        let weak = self.weak_self();
        let result = client.send_request(
            protocol::ANALYSIS_UPDATE_CONTENT,
            protocol::update_content_params(&overlays),
            move |outcome| match outcome {
                Ok(_) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.store.acknowledge_content(&sent);
                    }
                }
                Err(err) => warn!(error = %err, "analysis.updateContent failed"),
            },
        );
        if let Err(err) = result {
            warn!(error = %err, "failed to send content update");
        }
    }

    fn flush_content_updates(&self) {
        let (client, files) = {
            let mut state = self.state.lock();
            state.content_due = None;
            let files: Vec<String> = std::mem::take(&mut state.changed_files).into_iter().collect();
            (state.client.clone(), files)
        };
        if files.is_empty() {
            return;
        }
        match client {
            Some(client) => self.submit_overlays(&client, &files, true),
            // Dirty files are re-sent by the next start's reset plan.
            None => debug!(files = files.len(), "content update skipped: server not running"),
        }
    }

    fn weak_self(&self) -> Weak<Inner> {
        self.self_ref.clone()
    }

    fn stop(&self) {
        let (client, debouncer) = {
            let mut state = self.state.lock();
            let was_running = state.status == SessionStatus::Running;
            state.status = SessionStatus::Stopped;
            state.generation += 1;
            state.changed_files.clear();
            state.content_due = None;
            state.overlaid_files.clear();
            state.roots.reset();
            state.analysis_busy = false;
            state.pub_busy = false;
            state.debounce_running = false;
            self.content_signal.notify_all();
            if was_running {
                info!("stopping analysis server");
            }
            (state.client.take(), state.debounce_thread.take())
        };

        if let Some(client) = client {
            if let Err(err) = client.send(protocol::SERVER_SHUTDOWN, Value::Null) {
                debug!(error = %err, "server.shutdown not sent");
            }
            client.terminate(self.config.shutdown_timeout);
        }
        if let Some(handle) = debouncer
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
        self.store.clear_all();
    }

    /// Record a start/restart failure of launch `generation` and report it once.
    ///
    /// Ignored if the session moved on (e.g. was stopped) since that launch began.
    fn fail(&self, generation: u64, err: &SessionError) {
        let first = {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(error = %err, "ignoring failure of a superseded launch");
                return;
            }
            state.status = SessionStatus::Failed;
            state.client = None;
            !std::mem::replace(&mut state.start_failure_reported, true)
        };
        error!(error = %err, "analysis server unavailable");
        if first {
            self.host.server_error(&ErrorReport {
                message: err.to_string(),
                details: self.debug_log.contents(),
            });
        }
    }

    fn spawn_debouncer(&self) {
        let mut state = self.state.lock();
        if state.debounce_running {
            return;
        }
        state.debounce_running = true;
        let weak = self.weak_self();
        let spawned = thread::Builder::new()
            .name("analysis-content-debounce".to_string())
            .spawn(move || debounce_loop(weak));
        match spawned {
            Ok(handle) => state.debounce_thread = Some(handle),
            Err(err) => {
                state.debounce_running = false;
                warn!(error = %err, "failed to spawn content debounce thread; call poll_content_updates");
            }
        }
    }

    fn handle_notification(&self, generation: u64, event: &str, params: Value) {
        if self.state.lock().generation != generation {
            debug!(event, "dropping notification from a previous server");
            return;
        }
        let Some(notification) = ServerNotification::from_event_and_params(event, &params) else {
            debug!(event, "ignoring unknown or malformed notification");
            return;
        };

        match notification {
            ServerNotification::Connected { version } => {
                info!(version = %version, "analysis server ready");
                self.state.lock().server_version = version;
            }
            ServerNotification::Errors { file, errors } => {
                self.store.computed_errors(&file, errors);
            }
            ServerNotification::Highlights { file, regions } => {
                self.store.computed_highlights(&file, regions);
            }
            ServerNotification::Navigation { file, regions } => {
                self.store.computed_navigation(&file, regions);
            }
            ServerNotification::Overrides { file, overrides } => {
                self.store.computed_overrides(&file, overrides);
            }
            ServerNotification::Implemented {
                file,
                classes,
                members,
            } => {
                self.store.computed_implemented(&file, classes, members);
            }
            ServerNotification::Outline { file, outline } => {
                self.store.computed_outline(&file, outline);
            }
            ServerNotification::FlushResults { files } => self.store.on_files_flushed(&files),
            ServerNotification::Status(status) => self.handle_status(status),
            ServerNotification::Error(params) => {
                if is_ignored_server_error(params.is_fatal, params.stack_trace.as_deref()) {
                    debug!(message = ?params.message, "ignoring known non-fatal server error");
                    return;
                }
                let version = self.state.lock().server_version.clone();
                let message = format_server_error(
                    &version,
                    params.is_fatal,
                    params.message.as_deref(),
                    params.stack_trace.as_deref(),
                );
                if params.is_fatal {
                    error!("{message}");
                } else {
                    warn!("{message}");
                }
                let report = self.reporter.lock().report(&message);
                if let Some(report) = report {
                    self.host.server_error(&report);
                }
            }
        }
    }

    fn handle_status(&self, status: ServerStatus) {
        let transition = {
            let mut state = self.state.lock();
            let was_busy = state.busy();
            if let Some(analyzing) = status.analyzing {
                state.analysis_busy = analyzing;
            }
            if let Some(listing) = status.listing_package_dirs {
                state.pub_busy = listing;
            }
            let busy = state.busy();
            (was_busy != busy).then_some(busy)
        };
        match transition {
            Some(true) => self.host.analysis_started(),
            Some(false) => self.host.analysis_finished(),
            None => {}
        }
    }

    fn handle_closed(&self, generation: u64) {
        let (was_busy, exhausted, next) = {
            let mut state = self.state.lock();
            if state.generation != generation
                || state.status != SessionStatus::Running
                || state.client.is_none()
            {
                return;
            }
            warn!(generation, "analysis server exited unexpectedly");
            state.client = None;
            let was_busy = state.busy();
            state.analysis_busy = false;
            state.pub_busy = false;

            let now = Instant::now();
            let window = self.config.restart_policy.window;
            while state
                .restarts
                .front()
                .is_some_and(|at| now.saturating_duration_since(*at) > window)
            {
                state.restarts.pop_front();
            }
            let exhausted = state.restarts.len() >= self.config.restart_policy.max_restarts;
            if !exhausted {
                state.restarts.push_back(now);
                state.generation += 1;
            }
            (was_busy, exhausted, state.generation)
        };

        if was_busy {
            self.host.analysis_finished();
        }
        if exhausted {
            let max = self.config.restart_policy.max_restarts;
            self.fail(next, &SessionError::RestartLimit(max));
            return;
        }

        info!(generation = next, "restarting analysis server");
        match self.launch(true, next) {
            Ok(LaunchOutcome::Connected) => {}
            Ok(LaunchOutcome::Superseded) => debug!("restart superseded"),
            Err(err) => self.fail(next, &err),
        }
    }
}

struct ConnectionHandler {
    inner: Weak<Inner>,
    generation: u64,
}

impl MessageHandler for ConnectionHandler {
    fn on_notification(&self, event: &str, params: Value) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_notification(self.generation, event, params);
        }
    }

    fn on_closed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_closed(self.generation);
        }
    }
}

fn debounce_loop(inner: Weak<Inner>) {
    loop {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        if !state.debounce_running {
            return;
        }
        match state.content_due {
            Some(due) if Instant::now() >= due => {
                drop(state);
                inner.flush_content_updates();
            }
            Some(due) => {
                inner.content_signal.wait_until(&mut state, due);
            }
            None => {
                inner
                    .content_signal
                    .wait_for(&mut state, Duration::from_millis(500));
            }
        }
    }
}
