//! Session configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds automatic restarts after the server dies unexpectedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Maximum number of restarts allowed inside `window`.
    pub max_restarts: usize,
    /// Sliding window for counting restarts.
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Which files the analyzer is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    /// File extensions (without dot) that are analyzable.
    pub extensions: Vec<String>,
    /// Exact file names that are analyzable regardless of extension.
    pub file_names: Vec<String>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            extensions: vec!["dart".to_string()],
            file_names: vec![
                "pubspec.yaml".to_string(),
                "analysis_options.yaml".to_string(),
            ],
        }
    }
}

impl FileFilter {
    /// Returns `true` if `path` should be sent to the analyzer.
    pub fn accepts(&self, path: &str) -> bool {
        let path = Path::new(path);
        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && self.file_names.iter().any(|f| f == name)
        {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// Options for [`crate::SessionManager`] and [`crate::ProcessLauncher`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SDK installation directory used to derive default runtime/server paths.
    pub sdk_home: Option<PathBuf>,
    /// Explicit runtime executable; overrides `sdk_home`.
    pub runtime_path: Option<PathBuf>,
    /// Runtime executable name looked up under `sdk_home/bin` or on `PATH`.
    pub runtime_name: String,
    /// Explicit server snapshot; overrides `sdk_home`.
    pub server_path: Option<PathBuf>,
    /// Server snapshot file name under `sdk_home/bin/snapshots`.
    pub server_name: String,
    /// Arguments passed to the runtime before the server path.
    pub vm_args: Vec<String>,
    /// Extra arguments passed to the server.
    pub server_args: Vec<String>,
    /// Value of `--client-id`.
    pub client_id: String,
    /// Value of `--client-version`.
    pub client_version: String,
    /// Pass the initial analysis roots as `--include`/`--exclude` flags.
    pub pass_roots_as_args: bool,
    /// How long synchronous requests wait for a response.
    pub request_timeout: Duration,
    /// Grace period between `server.shutdown` and killing the process.
    pub shutdown_timeout: Duration,
    /// Debounce delay before edited content is sent to the server.
    pub update_content_delay: Duration,
    /// Restart budget for unexpected server exits.
    pub restart_policy: RestartPolicy,
    /// Files the analyzer cares about.
    pub file_filter: FileFilter,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sdk_home: None,
            runtime_path: None,
            runtime_name: if cfg!(windows) { "dart.exe" } else { "dart" }.to_string(),
            server_path: None,
            server_name: "analysis_server.dart.snapshot".to_string(),
            vm_args: Vec::new(),
            server_args: Vec::new(),
            client_id: "analysis-core".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            pass_roots_as_args: false,
            request_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(1),
            update_content_delay: Duration::from_millis(300),
            restart_policy: RestartPolicy::default(),
            file_filter: FileFilter::default(),
        }
    }
}
