//! Request/response correlation over a server connection.
//!
//! This module stays runtime-agnostic (no async runtime required): one writer thread owns the
//! server input, one reader thread drains the server output and performs all dispatch.
//!
//! Every request gets a locally generated id and a completion callback. The reader thread
//! resolves each callback exactly once: with the server's result, with
//! [`SessionError::RequestFailed`] for an error response, or with [`SessionError::ServerExited`]
//! when the connection closes first.

use crate::error::{SessionError, SessionResult};
use crate::launcher::ServerConnection;
use crate::protocol::{self, Inbound};
use crate::reporter::DebugLog;
use crate::transport::{read_message, write_message};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Receives everything the server pushes on one connection.
///
/// Both methods run on the connection's reader thread.
pub trait MessageHandler: Send + Sync {
    /// A notification (`{"event": ..., "params": ...}`) arrived.
    fn on_notification(&self, event: &str, params: Value);

    /// The connection closed; every pending request has already been failed.
    fn on_closed(&self);
}

/// Completion callback of a request.
pub type Completion = Box<dyn FnOnce(SessionResult<Value>) + Send>;

struct PendingRequest {
    method: String,
    completion: Completion,
}

#[derive(Default)]
struct PendingState {
    requests: HashMap<String, PendingRequest>,
    closed: bool,
}

struct Shared {
    pending: Mutex<PendingState>,
    debug_log: DebugLog,
}

impl Shared {
    fn take(&self, id: &str) -> Option<PendingRequest> {
        self.pending.lock().requests.remove(id)
    }

    fn close(&self) {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.requests.drain().collect()
        };
        for (id, request) in drained {
            debug!(id = %id, method = %request.method, "failing pending request: server exited");
            (request.completion)(Err(SessionError::ServerExited));
        }
    }
}

/// A connection to one analysis server instance.
pub struct AnalysisServerClient {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Value>,
    next_id: AtomicU64,
    dispatch_thread: ThreadId,
    writer_failed: Arc<AtomicBool>,
    process: Mutex<Option<Child>>,
}

impl std::fmt::Debug for AnalysisServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisServerClient")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl AnalysisServerClient {
    /// Start the reader/writer threads for `connection`.
    pub fn connect(
        connection: ServerConnection,
        handler: Arc<dyn MessageHandler>,
        debug_log: DebugLog,
    ) -> SessionResult<Self> {
        let ServerConnection {
            reader,
            writer,
            process,
        } = connection;

        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingState::default()),
            debug_log,
        });
        let writer_failed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Value>();

        {
            let shared = shared.clone();
            let writer_failed = writer_failed.clone();
            thread::Builder::new()
                .name("analysis-server-writer".to_string())
                .spawn(move || write_loop(writer, rx, &shared, &writer_failed))?;
        }
        let reader_thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("analysis-server-reader".to_string())
                .spawn(move || read_loop(reader, &shared, handler.as_ref()))?
        };

        Ok(Self {
            shared,
            tx,
            next_id: AtomicU64::new(1),
            dispatch_thread: reader_thread.thread().id(),
            writer_failed,
            process: Mutex::new(process),
        })
    }

    /// Send a request; `completion` runs on the reader thread once the outcome is known.
    ///
    /// Returns the allocated request id.
    pub fn send_request<F>(&self, method: &str, params: Value, completion: F) -> SessionResult<String>
    where
        F: FnOnce(SessionResult<Value>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        {
            let mut pending = self.shared.pending.lock();
            if pending.closed || self.writer_failed.load(Ordering::Acquire) {
                return Err(SessionError::NotRunning);
            }
            pending.requests.insert(
                id.clone(),
                PendingRequest {
                    method: method.to_string(),
                    completion: Box::new(completion),
                },
            );
        }

        if self.tx.send(protocol::request(&id, method, params)).is_err() {
            self.shared.take(&id);
            return Err(SessionError::NotRunning);
        }
        Ok(id)
    }

    /// Send a request whose outcome is only logged.
    pub fn send(&self, method: &str, params: Value) -> SessionResult<String> {
        let method_name = method.to_string();
        self.send_request(method, params, move |outcome| match outcome {
            Ok(_) => {}
            Err(SessionError::ServerExited) => {
                debug!(method = %method_name, "request dropped: server exited");
            }
            Err(err) => warn!(method = %method_name, error = %err, "analysis server request failed"),
        })
    }

    /// Send a request and block until its response arrives or `timeout` elapses.
    ///
    /// Fails with [`SessionError::WouldDeadlock`] when called from the reader thread (e.g. from
    /// inside a [`MessageHandler`]), since that thread is the one delivering responses.
    pub fn request_blocking(&self, method: &str, params: Value, timeout: Duration) -> SessionResult<Value> {
        if self.is_dispatch_thread() {
            return Err(SessionError::WouldDeadlock);
        }

        let (done_tx, done_rx) = mpsc::channel();
        let id = self.send_request(method, params, move |outcome| {
            let _ = done_tx.send(outcome);
        })?;

        match done_rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.shared.take(&id);
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    id,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SessionError::ServerExited),
        }
    }

    /// Returns `true` if the current thread is this connection's reader thread.
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.dispatch_thread
    }

    /// Returns `true` once the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.pending.lock().closed
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().requests.len()
    }

    /// Process id of the server, if it runs as a subprocess.
    pub fn process_id(&self) -> Option<u32> {
        self.process.lock().as_ref().map(Child::id)
    }

    /// Wait up to `grace` for the server process to exit, then kill it.
    pub fn terminate(&self, grace: Duration) {
        let Some(mut child) = self.process.lock().take() else {
            return;
        };

        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "analysis server exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to poll analysis server process");
                    break;
                }
            }
        }

        warn!(pid = child.id(), "analysis server did not exit in time; killing it");
        if let Err(err) = child.kill() {
            debug!(error = %err, "failed to kill analysis server");
        }
        let _ = child.wait();
    }
}

impl Drop for AnalysisServerClient {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.get_mut().take()
            && matches!(child.try_wait(), Ok(None))
        {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn write_loop(
    writer: Box<dyn Write + Send>,
    rx: mpsc::Receiver<Value>,
    shared: &Shared,
    writer_failed: &AtomicBool,
) {
    let mut writer = BufWriter::new(writer);
    for message in rx {
        let line = message.to_string();
        debug!(target: "analysis_server::wire", "=> {line}");
        shared.debug_log.push(&format!("=> {line}"));
        if let Err(err) = write_message(&mut writer, &message) {
            warn!(error = %err, "failed to write to analysis server");
            writer_failed.store(true, Ordering::Release);
            break;
        }
    }
}

fn read_loop(reader: Box<dyn Read + Send>, shared: &Shared, handler: &dyn MessageHandler) {
    let mut reader = BufReader::new(reader);
    loop {
        match read_message(&mut reader) {
            Ok(Some(value)) => {
                let line = value.to_string();
                debug!(target: "analysis_server::wire", "<= {line}");
                shared.debug_log.push(&format!("<= {line}"));
                dispatch(value, shared, handler);
            }
            Ok(None) => break,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                debug!(error = %err, "ignoring malformed line from analysis server");
                shared.debug_log.push(&format!("<= {err}"));
            }
            Err(err) => {
                warn!(error = %err, "failed to read from analysis server");
                break;
            }
        }
    }

    shared.close();
    handler.on_closed();
}

fn dispatch(value: Value, shared: &Shared, handler: &dyn MessageHandler) {
    match Inbound::from_value(value) {
        Some(Inbound::Response { id, outcome }) => {
            let Some(request) = shared.take(&id) else {
                debug!(id = %id, "dropping response for unknown or expired request");
                return;
            };
            let outcome = outcome.map_err(|error| SessionError::RequestFailed {
                code: error.code,
                message: error.message,
                stack_trace: error.stack_trace,
            });
            (request.completion)(outcome);
        }
        Some(Inbound::Notification { event, params }) => handler.on_notification(&event, params),
        None => debug!("ignoring unrecognized message from analysis server"),
    }
}
