use analysis_core::{Region, RegionKind, RegionStore};
use analysis_core_server::protocol;
use analysis_core_server::{
    AnalysisHost, EditBridge, ErrorReport, RestartPolicy, RootSet, RootsProvider, ServerConnection,
    ServerLauncher, SessionConfig, SessionError, SessionManager, SessionResult, SessionStatus,
    read_message, write_message,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::io::{BufReader, PipeReader, PipeWriter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const FILE: &str = "/p/lib/a.dart";

type SharedWriter = Arc<Mutex<Option<PipeWriter>>>;

/// In-process stand-in for the analysis server: records requests, answers them, and lets the
/// test push notifications or drop the connection.
#[derive(Default)]
struct FakeServer {
    requests: Mutex<Vec<(usize, Value)>>,
    connections: Mutex<Vec<SharedWriter>>,
    results: Mutex<HashMap<String, Value>>,
    silent: Mutex<HashSet<String>>,
    fail_launch: AtomicBool,
    hold_launch: AtomicBool,
    holding: AtomicBool,
    launches: AtomicUsize,
    closed_connections: AtomicUsize,
}

impl FakeServer {
    fn serve(&self, connection: usize, mut reader: BufReader<PipeReader>, writer: SharedWriter) {
        while let Ok(Some(request)) = read_message(&mut reader) {
            let method = request["method"].as_str().unwrap_or_default().to_string();
            let id = request["id"].as_str().unwrap_or_default().to_string();
            self.requests.lock().push((connection, request));
            if self.silent.lock().contains(&method) {
                continue;
            }
            let result = self.results.lock().get(&method).cloned().unwrap_or_else(|| json!({}));
            if let Some(writer) = writer.lock().as_mut() {
                let _ = write_message(writer, &protocol::response(&id, result));
            }
        }
        self.closed_connections.fetch_add(1, Ordering::SeqCst);
    }

    fn notify(&self, event: &str, params: Value) {
        let writer = self.connections.lock().last().cloned().unwrap();
        let mut writer = writer.lock();
        write_message(writer.as_mut().unwrap(), &protocol::notification(event, params)).unwrap();
    }

    /// Close the server output of the latest connection.
    fn crash(&self) {
        let writer = self.connections.lock().last().cloned().unwrap();
        writer.lock().take();
    }

    fn requests(&self, connection: usize, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(c, r)| *c == connection && r["method"] == method)
            .map(|(_, r)| r["params"].clone())
            .collect()
    }
}

struct FakeLauncher(Arc<FakeServer>);

impl ServerLauncher for FakeLauncher {
    fn launch(&self, _roots: Option<&RootSet>) -> SessionResult<ServerConnection> {
        let server = &self.0;
        if server.fail_launch.load(Ordering::SeqCst) {
            return Err(SessionError::RuntimeNotFound("dart".to_string()));
        }
        if server.hold_launch.load(Ordering::SeqCst) {
            server.holding.store(true, Ordering::SeqCst);
            while server.hold_launch.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        }
        let (client_reader, server_writer) = std::io::pipe()?;
        let (server_reader, client_writer) = std::io::pipe()?;
        let connection = server.launches.fetch_add(1, Ordering::SeqCst);
        let writer: SharedWriter = Arc::new(Mutex::new(Some(server_writer)));
        server.connections.lock().push(writer.clone());

        let fake = server.clone();
        thread::spawn(move || fake.serve(connection, BufReader::new(server_reader), writer));
        Ok(ServerConnection {
            reader: Box::new(client_reader),
            writer: Box::new(client_writer),
            process: None,
        })
    }
}

#[derive(Default)]
struct FakeHost {
    documents: Mutex<HashMap<String, String>>,
    invalidated: Mutex<Vec<(String, RegionKind)>>,
    reports: Mutex<Vec<ErrorReport>>,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl AnalysisHost for FakeHost {
    fn document_text(&self, file: &str) -> Option<String> {
        self.documents.lock().get(file).cloned()
    }

    fn invalidate(&self, file: &str, kind: RegionKind) {
        self.invalidated.lock().push((file.to_string(), kind));
    }

    fn analysis_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn analysis_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn server_error(&self, report: &ErrorReport) {
        self.reports.lock().push(report.clone());
    }
}

struct Fixture {
    server: Arc<FakeServer>,
    host: Arc<FakeHost>,
    roots: Arc<Mutex<RootSet>>,
    bridge: EditBridge,
}

impl Fixture {
    fn session(&self) -> &SessionManager {
        self.bridge.session()
    }

    fn store(&self) -> &RegionStore {
        self.session().store()
    }

    /// Wait until every notification pushed so far has been dispatched.
    fn sync(&self, tag: &str) {
        self.server
            .notify("server.connected", json!({ "version": tag }));
        wait_until(|| self.session().server_version() == tag);
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::ZERO,
        // Tests flush explicitly.
        update_content_delay: Duration::from_secs(60),
        ..SessionConfig::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn fixture(config: SessionConfig) -> Fixture {
    init_tracing();
    let server = Arc::new(FakeServer::default());
    let host = Arc::new(FakeHost::default());
    let roots = Arc::new(Mutex::new(RootSet::new(vec!["/p".to_string()], Vec::new())));
    let provider: Arc<dyn RootsProvider> = {
        let roots = roots.clone();
        Arc::new(move || roots.lock().clone())
    };
    let session = SessionManager::new(
        config,
        Box::new(FakeLauncher(server.clone())),
        Arc::new(RegionStore::new()),
        provider,
        host.clone(),
    );
    Fixture {
        server,
        host,
        roots,
        bridge: EditBridge::new(Arc::new(session)),
    }
}

fn started(config: SessionConfig) -> Fixture {
    let fixture = fixture(config);
    fixture.session().start().unwrap();
    wait_until(|| !fixture.server.requests(0, protocol::ANALYSIS_SET_ROOTS).is_empty());
    fixture
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn errors_params(offset: usize) -> Value {
    json!({
        "file": FILE,
        "errors": [{
            "severity": "ERROR",
            "type": "SYNTACTIC_ERROR",
            "location": { "file": FILE, "offset": offset, "length": 3, "startLine": 1, "startColumn": 1 },
            "message": "Expected ';'",
        }],
    })
}

#[test]
fn start_subscribes_and_pushes_roots_once() {
    let fx = started(config());

    assert_eq!(fx.session().status(), SessionStatus::Running);
    assert_eq!(
        fx.server.requests(0, protocol::SERVER_SET_SUBSCRIPTIONS),
        vec![json!({ "subscriptions": ["STATUS"] })]
    );
    assert_eq!(
        fx.server.requests(0, protocol::ANALYSIS_SET_ROOTS),
        vec![json!({ "included": ["/p"], "excluded": [] })]
    );

    assert!(!fx.bridge.on_roots_changed());

    *fx.roots.lock() = RootSet::new(vec!["/p".to_string(), "/q".to_string()], vec!["/p/build".to_string()]);
    assert!(fx.bridge.on_roots_changed());
    wait_until(|| fx.server.requests(0, protocol::ANALYSIS_SET_ROOTS).len() == 2);
    assert_eq!(
        fx.server.requests(0, protocol::ANALYSIS_SET_ROOTS)[1],
        json!({ "included": ["/p", "/q"], "excluded": ["/p/build"] })
    );
}

#[test]
fn notifications_populate_the_store_and_invalidate_the_host() {
    let fx = started(config());

    fx.server.notify("analysis.errors", errors_params(10));
    fx.server.notify(
        "analysis.highlights",
        json!({ "file": FILE, "regions": [{ "type": "KEYWORD", "offset": 0, "length": 5 }] }),
    );
    fx.sync("sync-1");

    assert_eq!(fx.store().errors(FILE).len(), 1);
    assert_eq!(fx.store().highlights(FILE).len(), 1);
    let invalidated = fx.host.invalidated.lock().clone();
    assert!(invalidated.contains(&(FILE.to_string(), RegionKind::Errors)));
    assert!(invalidated.contains(&(FILE.to_string(), RegionKind::Highlights)));

    fx.server.notify("analysis.flushResults", json!({ "files": [FILE] }));
    fx.sync("sync-2");
    assert!(fx.store().errors(FILE).is_empty());
}

#[test]
fn results_are_gated_until_content_is_acknowledged() {
    let fx = started(config());
    fx.host
        .documents
        .lock()
        .insert(FILE.to_string(), "abcvoid main() {}".to_string());

    assert_eq!(fx.bridge.on_document_changed(FILE, 0, 0, 3), Some(1));
    assert_eq!(fx.bridge.on_document_changed("/p/README.md", 0, 0, 3), None);
    assert!(fx.store().has_unsent_local_changes(FILE));

    fx.server.notify("analysis.errors", errors_params(10));
    fx.sync("sync-1");
    assert!(fx.store().errors(FILE).is_empty());

    fx.bridge.flush_content_updates();
    wait_until(|| !fx.store().has_unsent_local_changes(FILE));
    assert_eq!(
        fx.server.requests(0, protocol::ANALYSIS_UPDATE_CONTENT),
        vec![json!({ "files": { FILE: { "type": "add", "content": "abcvoid main() {}" } } })]
    );
    assert_eq!(fx.session().overlaid_files(), vec![FILE.to_string()]);

    fx.server.notify("analysis.errors", errors_params(13));
    fx.sync("sync-2");
    assert_eq!(fx.store().errors(FILE)[0].region.offset, 13);
}

#[test]
fn debounced_content_is_sent_by_the_background_thread() {
    let fx = started(SessionConfig {
        update_content_delay: Duration::from_millis(20),
        ..config()
    });
    fx.host.documents.lock().insert(FILE.to_string(), "x".to_string());

    fx.bridge.on_document_changed(FILE, 0, 0, 1);
    wait_until(|| !fx.store().has_unsent_local_changes(FILE));
    assert_eq!(fx.server.requests(0, protocol::ANALYSIS_UPDATE_CONTENT).len(), 1);
}

#[test]
fn visible_files_drive_priority_and_subscriptions() {
    let fx = started(config());

    fx.bridge.on_file_opened(FILE);
    fx.bridge.on_file_opened("/p/notes.txt");
    wait_until(|| !fx.server.requests(0, protocol::ANALYSIS_SET_SUBSCRIPTIONS).is_empty());

    assert_eq!(fx.session().visible_files(), vec![FILE.to_string()]);
    assert_eq!(
        fx.server.requests(0, protocol::ANALYSIS_SET_PRIORITY_FILES),
        vec![json!({ "files": [FILE] })]
    );

    fx.bridge.on_file_closed(FILE);
    wait_until(|| fx.server.requests(0, protocol::ANALYSIS_SET_PRIORITY_FILES).len() == 2);
    assert_eq!(
        fx.server.requests(0, protocol::ANALYSIS_SET_PRIORITY_FILES)[1],
        json!({ "files": [] })
    );
}

#[test]
fn typed_requests_decode_results() {
    let fx = started(config());
    fx.server
        .results
        .lock()
        .insert(protocol::ANALYSIS_GET_ERRORS.to_string(), errors_params(4));

    let errors = fx.session().get_errors(FILE).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Expected ';'");
    assert_eq!(fx.server.requests(0, protocol::ANALYSIS_GET_ERRORS), vec![json!({ "file": FILE })]);
}

#[test]
fn unanswered_request_times_out() {
    let fx = started(SessionConfig {
        request_timeout: Duration::from_millis(100),
        ..config()
    });
    fx.server
        .silent
        .lock()
        .insert(protocol::ANALYSIS_GET_NAVIGATION.to_string());

    let started_at = Instant::now();
    assert!(fx.session().get_navigation(FILE, 0, 10).is_none());
    assert!(started_at.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        fx.session().request(protocol::ANALYSIS_GET_NAVIGATION, json!({})),
        Err(SessionError::Timeout { .. })
    ));
}

#[test]
fn status_notifications_toggle_busy_state() {
    let fx = started(config());

    fx.server
        .notify("server.status", json!({ "analysis": { "isAnalyzing": true } }));
    fx.sync("sync-1");
    assert!(fx.session().is_busy());
    assert_eq!(fx.host.started.load(Ordering::SeqCst), 1);

    fx.server
        .notify("server.status", json!({ "pub": { "isListingPackageDirs": true } }));
    fx.server
        .notify("server.status", json!({ "analysis": { "isAnalyzing": false } }));
    fx.sync("sync-2");
    assert!(fx.session().is_busy());
    assert_eq!(fx.host.finished.load(Ordering::SeqCst), 0);

    fx.server
        .notify("server.status", json!({ "pub": { "isListingPackageDirs": false } }));
    fx.sync("sync-3");
    assert!(!fx.session().is_busy());
    assert_eq!(fx.host.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn server_errors_are_reported_to_the_host() {
    let fx = started(config());
    fx.sync("1.2.3");

    fx.server.notify(
        "server.error",
        json!({ "isFatal": false, "message": "oops", "stackTrace": "#0 main (a.dart:1)" }),
    );
    fx.sync("1.2.3-after");

    let reports = fx.host.reports.lock().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].message, "Analysis server 1.2.3 error: oops\n#0 main (a.dart:1)");
    assert!(reports[0].details.contains("server.error"));
}

#[test]
fn known_noise_errors_are_not_reported() {
    let fx = started(config());

    fx.server.notify(
        "server.error",
        json!({
            "isFatal": false,
            "message": "Invalid package URI",
            "stackTrace": "#0      checkValidPackageUri (package:package_config/src/util.dart:72)\n#1      main",
        }),
    );
    fx.sync("sync-1");
    assert!(fx.host.reports.lock().is_empty());

    fx.server.notify(
        "server.error",
        json!({
            "isFatal": true,
            "message": "Invalid package URI",
            "stackTrace": "#0      checkValidPackageUri (package:package_config/src/util.dart:72)",
        }),
    );
    fx.sync("sync-2");
    assert_eq!(fx.host.reports.lock().len(), 1);
}

#[test]
fn outline_notifications_are_cached_until_the_file_closes() {
    let fx = started(config());
    fx.bridge.on_file_opened(FILE);
    wait_until(|| !fx.server.requests(0, protocol::ANALYSIS_SET_SUBSCRIPTIONS).is_empty());
    assert_eq!(
        fx.server.requests(0, protocol::ANALYSIS_SET_SUBSCRIPTIONS)[0]["subscriptions"]["OUTLINE"],
        json!([FILE])
    );

    fx.server.notify(
        "analysis.outline",
        json!({
            "file": FILE,
            "kind": "LIBRARY",
            "outline": {
                "element": { "kind": "COMPILATION_UNIT", "name": "<unit>", "flags": 0 },
                "offset": 0,
                "length": 20,
                "children": [{
                    "element": { "kind": "FUNCTION", "name": "main", "flags": 8, "returnType": "void" },
                    "offset": 0,
                    "length": 17,
                    "codeOffset": 0,
                    "codeLength": 17,
                }],
            },
        }),
    );
    fx.sync("sync-1");

    let outline = fx.store().outline(FILE).unwrap();
    assert_eq!(outline.children[0].element.name, "main");
    assert_eq!(outline.children[0].code_region, Region::new(0, 17));
    assert!(
        fx.host
            .invalidated
            .lock()
            .contains(&(FILE.to_string(), RegionKind::Outline))
    );

    fx.bridge.on_file_closed(FILE);
    assert!(fx.store().outline(FILE).is_none());
}

#[test]
fn crash_restarts_and_replays_session_state() {
    let fx = started(config());
    fx.host.documents.lock().insert(FILE.to_string(), "edited".to_string());
    fx.bridge.on_file_opened(FILE);
    fx.server.notify("analysis.errors", errors_params(0));
    fx.sync("sync-1");
    fx.bridge.on_document_changed(FILE, 10, 0, 1);

    fx.server.crash();
    wait_until(|| !fx.server.requests(1, protocol::ANALYSIS_UPDATE_CONTENT).is_empty());

    assert_eq!(fx.server.launches.load(Ordering::SeqCst), 2);
    assert_eq!(fx.session().status(), SessionStatus::Running);
    assert!(fx.store().errors(FILE).is_empty());
    assert_eq!(
        fx.server.requests(1, protocol::ANALYSIS_SET_ROOTS),
        vec![json!({ "included": ["/p"], "excluded": [] })]
    );
    assert_eq!(
        fx.server.requests(1, protocol::ANALYSIS_SET_PRIORITY_FILES),
        vec![json!({ "files": [FILE] })]
    );
    assert_eq!(
        fx.server.requests(1, protocol::ANALYSIS_UPDATE_CONTENT),
        vec![json!({ "files": { FILE: { "type": "add", "content": "edited" } } })]
    );
    wait_until(|| !fx.store().has_unsent_local_changes(FILE));
}

#[test]
fn restart_budget_is_enforced() {
    let fx = started(SessionConfig {
        restart_policy: RestartPolicy {
            max_restarts: 1,
            window: Duration::from_secs(60),
        },
        ..config()
    });

    fx.server.crash();
    wait_until(|| !fx.server.requests(1, protocol::ANALYSIS_SET_ROOTS).is_empty());
    fx.server.crash();
    wait_until(|| fx.session().status() == SessionStatus::Failed);

    assert_eq!(fx.server.launches.load(Ordering::SeqCst), 2);
    assert_eq!(fx.host.reports.lock().len(), 1);

    // An explicit start resets the budget.
    fx.session().start().unwrap();
    assert_eq!(fx.session().status(), SessionStatus::Running);
}

#[test]
fn stop_during_restart_stays_stopped() {
    let fx = started(config());
    fx.server.hold_launch.store(true, Ordering::SeqCst);

    fx.server.crash();
    wait_until(|| fx.server.holding.load(Ordering::SeqCst));
    fx.session().stop();
    assert_eq!(fx.session().status(), SessionStatus::Stopped);

    fx.server.hold_launch.store(false, Ordering::SeqCst);
    wait_until(|| fx.server.closed_connections.load(Ordering::SeqCst) == 2);

    assert_eq!(fx.server.launches.load(Ordering::SeqCst), 2);
    assert_eq!(fx.session().status(), SessionStatus::Stopped);
    assert!(fx.host.reports.lock().is_empty());
    assert!(fx.server.requests.lock().iter().all(|(connection, _)| *connection == 0));
    assert!(matches!(fx.session().reanalyze(), Err(SessionError::NotRunning)));

    fx.session().start().unwrap();
    assert_eq!(fx.session().status(), SessionStatus::Running);
}

#[test]
fn dropping_a_session_removes_its_store_listener() {
    init_tracing();
    let store = Arc::new(RegionStore::new());
    let host = Arc::new(FakeHost::default());
    let provider: Arc<dyn RootsProvider> =
        Arc::new(|| RootSet::new(vec!["/p".to_string()], Vec::new()));

    for _ in 0..3 {
        let session = SessionManager::new(
            config(),
            Box::new(FakeLauncher(Arc::new(FakeServer::default()))),
            store.clone(),
            provider.clone(),
            host.clone(),
        );
        assert_eq!(store.listener_count(), 1);
        drop(session);
    }
    assert_eq!(store.listener_count(), 0);

    store.computed_implemented(FILE, vec![Region::new(0, 4)], Vec::new());
    assert!(host.invalidated.lock().is_empty());
}

#[test]
fn start_failure_is_reported_once() {
    let fx = fixture(config());
    fx.server.fail_launch.store(true, Ordering::SeqCst);

    assert!(matches!(fx.session().start(), Err(SessionError::RuntimeNotFound(_))));
    assert!(fx.session().start().is_err());
    assert_eq!(fx.session().status(), SessionStatus::Failed);
    assert_eq!(fx.host.reports.lock().len(), 1);

    fx.server.fail_launch.store(false, Ordering::SeqCst);
    fx.session().start().unwrap();
    assert_eq!(fx.session().status(), SessionStatus::Running);
}

#[test]
fn stop_shuts_down_and_clears_results() {
    let fx = started(config());
    fx.server.notify("analysis.errors", errors_params(0));
    fx.sync("sync-1");
    assert!(!fx.store().is_empty());

    fx.session().stop();

    assert_eq!(fx.session().status(), SessionStatus::Stopped);
    assert!(fx.store().errors(FILE).is_empty());
    wait_until(|| !fx.server.requests(0, protocol::SERVER_SHUTDOWN).is_empty());
    assert!(matches!(fx.session().reanalyze(), Err(SessionError::NotRunning)));
    assert!(fx.session().get_errors(FILE).is_none());
    assert_eq!(fx.server.launches.load(Ordering::SeqCst), 1);
}
