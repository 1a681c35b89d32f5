//! Throttled surfacing of server errors.
//!
//! Server errors tend to arrive in bursts (the same crash repeated for every file). The
//! [`ErrorReporter`] decides which ones reach the user; everything else is only logged. Each
//! surfaced report carries the tail of the wire traffic kept by [`DebugLog`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const STACK_TRACE_MARKER: &str = "#0";

/// Top frame of a known harmless non-fatal error raised while resolving package URIs.
const PACKAGE_URI_NOISE: &str =
    "#0      checkValidPackageUri (package:package_config/src/util.dart:72)";

/// Reporter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig {
    /// Minimum time between two surfaced reports.
    pub min_report_interval: Duration,
    /// Maximum reports surfaced per session.
    pub max_reports_per_session: usize,
    /// Number of wire lines kept for the report detail.
    pub debug_log_capacity: usize,
    /// Wire lines are truncated to this many characters.
    pub max_debug_line_length: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_report_interval: Duration::from_secs(5),
            max_reports_per_session: 20,
            debug_log_capacity: 30,
            max_debug_line_length: 200,
        }
    }
}

/// Ring buffer of recent wire traffic.
#[derive(Debug, Clone)]
pub struct DebugLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    max_line_length: usize,
}

impl DebugLog {
    /// Create an empty log.
    pub fn new(capacity: usize, max_line_length: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            max_line_length,
        }
    }

    /// Append a line, evicting the oldest one when full.
    pub fn push(&self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        let line: String = line.chars().take(self.max_line_length).collect();
        let mut lines = self.lines.lock();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Current lines, oldest first, wrapped in a fenced block.
    pub fn contents(&self) -> String {
        let lines = self.lines.lock();
        let mut out = String::from("```\n");
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("```\n");
        out
    }

    /// Number of lines held.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns `true` if no line is held.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// A server error that should be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Formatted error (message and stack trace).
    pub message: String,
    /// Recent wire traffic.
    pub details: String,
}

/// Decides which server errors are surfaced.
#[derive(Debug)]
pub struct ErrorReporter {
    config: ReporterConfig,
    debug_log: DebugLog,
    previous_time: Option<Instant>,
    previous_message: String,
    reported: usize,
}

impl ErrorReporter {
    /// Create a reporter attached to `debug_log`.
    pub fn new(config: ReporterConfig, debug_log: DebugLog) -> Self {
        Self {
            config,
            debug_log,
            previous_time: None,
            previous_message: String::new(),
            reported: 0,
        }
    }

    /// Number of reports surfaced so far.
    pub fn reported(&self) -> usize {
        self.reported
    }

    /// [`Self::report_at`] with the current time.
    pub fn report(&mut self, message: &str) -> Option<ErrorReport> {
        self.report_at(message, Instant::now())
    }

    /// Decide whether `message`, observed at `now`, is surfaced.
    pub fn report_at(&mut self, message: &str, now: Instant) -> Option<ErrorReport> {
        if self.reported >= self.config.max_reports_per_session {
            warn!(message, "analysis server error (report limit reached)");
            return None;
        }

        if let Some(previous) = self.previous_time
            && now.saturating_duration_since(previous) < self.config.min_report_interval
        {
            if self.differs(message) {
                warn!(message, "analysis server error (throttled)");
                if self.reported > 0 {
                    self.reported += 1;
                }
            }
            return None;
        }

        self.previous_time = Some(now);
        let report = if self.differs(message) {
            self.reported += 1;
            Some(ErrorReport {
                message: message.to_string(),
                details: self.debug_log.contents(),
            })
        } else {
            None
        };
        self.previous_message = message.to_string();
        report
    }

    /// Compare against the previous message, by stack trace when both carry one.
    fn differs(&self, message: &str) -> bool {
        match (
            self.previous_message.find(STACK_TRACE_MARKER),
            message.find(STACK_TRACE_MARKER),
        ) {
            (Some(prev), Some(cur)) => message[cur..] != self.previous_message[prev..],
            _ => message != self.previous_message,
        }
    }
}

/// Returns `true` for non-fatal server errors that are known noise and must not be surfaced.
pub fn is_ignored_server_error(is_fatal: bool, stack_trace: Option<&str>) -> bool {
    !is_fatal && stack_trace.is_some_and(|trace| trace.starts_with(PACKAGE_URI_NOISE))
}

/// Format a `server.error` notification the way it is logged and reported.
pub fn format_server_error(
    server_version: &str,
    is_fatal: bool,
    message: Option<&str>,
    stack_trace: Option<&str>,
) -> String {
    let message = message.filter(|m| !m.is_empty()).unwrap_or("<no error message>");
    let stack_trace = stack_trace.filter(|s| !s.is_empty()).unwrap_or("<no stack trace>");
    let severity = if is_fatal { "FATAL error" } else { "error" };
    format!("Analysis server {server_version} {severity}: {message}\n{stack_trace}")
}
