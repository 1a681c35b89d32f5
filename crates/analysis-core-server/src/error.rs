use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
/// Errors produced by the analysis server session.
pub enum SessionError {
    #[error("runtime not found: {0}")]
    /// No runtime executable could be located.
    RuntimeNotFound(String),

    #[error("analysis server not found: {}", .0.display())]
    /// The server snapshot does not exist.
    ServerNotFound(PathBuf),

    #[error("runtime is not executable: {}", .0.display())]
    /// The runtime exists but cannot be executed.
    NotExecutable(PathBuf),

    #[error("analysis server is not readable: {}", .0.display())]
    /// The server snapshot exists but cannot be read.
    NotReadable(PathBuf),

    #[error("failed to spawn analysis server: {0}")]
    /// Spawning the subprocess failed.
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    /// Transport I/O failed.
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    /// Encoding a request failed.
    Json(#[from] serde_json::Error),

    #[error("analysis server is not running")]
    /// No server connection is available.
    NotRunning,

    #[error("timed out waiting for response to '{method}' (id={id})")]
    /// A synchronous request did not receive a response in time.
    Timeout {
        /// Request method.
        method: String,
        /// Request id.
        id: String,
    },

    #[error("analysis server exited")]
    /// The connection closed before a response arrived.
    ServerExited,

    #[error("request failed with {code}: {message}")]
    /// The server answered with an error object.
    RequestFailed {
        /// Error code reported by the server.
        code: String,
        /// Error message reported by the server.
        message: String,
        /// Server-side stack trace, if any.
        stack_trace: Option<String>,
    },

    #[error("synchronous request issued from the dispatch thread")]
    /// Waiting on the dispatch thread would deadlock.
    WouldDeadlock,

    #[error("analysis server restarted {0} times in quick succession; giving up")]
    /// The restart budget was exhausted.
    RestartLimit(usize),
}

/// Result type of the session API.
pub type SessionResult<T> = Result<T, SessionError>;
