#![warn(missing_docs)]
//! `analysis-core-server` - drives an external analysis server for `analysis-core`.
//!
//! The server runs as a subprocess speaking newline-delimited JSON over stdio. This crate
//! locates and spawns it, correlates requests with responses, routes pushed results into an
//! [`analysis_core::RegionStore`], keeps the server's view of analysis roots, visible files and
//! unsaved content current, and restarts the server when it dies.
//!
//! Entry points:
//! - [`SessionManager`]: lifecycle, pushes and typed requests.
//! - [`EditBridge`]: host document and visibility events.
//! - [`AnalysisHost`] / [`RootsProvider`]: what the host supplies.

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod launcher;
pub mod protocol;
pub mod reporter;
pub mod roots;
pub mod session;
pub mod transport;

pub use bridge::{AnalysisHost, EditBridge};
pub use client::{AnalysisServerClient, Completion, MessageHandler};
pub use config::{FileFilter, RestartPolicy, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use launcher::{ProcessLauncher, ServerConnection, ServerLauncher};
pub use protocol::{
    ContentOverlay, Inbound, ResponseError, ServerErrorParams, ServerNotification, ServerStatus,
};
pub use reporter::{
    DebugLog, ErrorReport, ErrorReporter, ReporterConfig, format_server_error,
    is_ignored_server_error,
};
pub use roots::{RootSet, RootsProvider, RootsTracker};
pub use session::{ResetPlan, ResetStep, SessionManager, SessionStatus};
pub use transport::{read_message, write_message};
