//! Locating and spawning the analysis server.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::roots::RootSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::thread;
use tracing::{debug, info};

/// Byte streams (and optional process handle) of a freshly started server.
pub struct ServerConnection {
    /// Server output (responses and notifications).
    pub reader: Box<dyn Read + Send>,
    /// Server input (requests).
    pub writer: Box<dyn Write + Send>,
    /// Child process, if the server runs out of process.
    pub process: Option<Child>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("pid", &self.process.as_ref().map(Child::id))
            .finish_non_exhaustive()
    }
}

/// Starts analysis servers. Called once per (re)start.
pub trait ServerLauncher: Send + Sync {
    /// Start a new server; `roots` are the roots known at this point, if any.
    fn launch(&self, roots: Option<&RootSet>) -> SessionResult<ServerConnection>;
}

/// Launches the analysis server as a subprocess of a runtime executable.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: SessionConfig,
}

impl ProcessLauncher {
    /// Create a launcher for `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Resolve the runtime executable: explicit path, then `sdk_home/bin`, then `PATH`.
    pub fn runtime_path(&self) -> SessionResult<PathBuf> {
        if let Some(path) = &self.config.runtime_path {
            return Ok(path.clone());
        }
        if let Some(home) = &self.config.sdk_home {
            return Ok(home.join("bin").join(&self.config.runtime_name));
        }
        which::which(&self.config.runtime_name)
            .map_err(|err| SessionError::RuntimeNotFound(format!("{}: {err}", self.config.runtime_name)))
    }

    /// Resolve the server snapshot: explicit path, then `sdk_home/bin/snapshots`.
    pub fn server_path(&self, runtime: &Path) -> SessionResult<PathBuf> {
        if let Some(path) = &self.config.server_path {
            return Ok(path.clone());
        }
        let home = match &self.config.sdk_home {
            Some(home) => home.clone(),
            // <sdk>/bin/<runtime>
            None => runtime
                .parent()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .ok_or_else(|| SessionError::ServerNotFound(runtime.to_path_buf()))?,
        };
        Ok(home.join("bin").join("snapshots").join(&self.config.server_name))
    }

    /// Resolve and validate both paths.
    pub fn locate(&self) -> SessionResult<(PathBuf, PathBuf)> {
        let runtime = self.runtime_path()?;
        if !runtime.is_file() {
            return Err(SessionError::RuntimeNotFound(runtime.display().to_string()));
        }
        let server = self.server_path(&runtime)?;
        if !server.is_file() {
            return Err(SessionError::ServerNotFound(server));
        }
        if !is_executable(&runtime) {
            return Err(SessionError::NotExecutable(runtime));
        }
        if File::open(&server).is_err() {
            return Err(SessionError::NotReadable(server));
        }
        Ok((runtime, server))
    }

    /// Build the server command line.
    pub fn command(&self, runtime: &Path, server: &Path, roots: Option<&RootSet>) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(runtime);
        cmd.args(&self.config.vm_args)
            .arg(server)
            .arg("--machine")
            .arg(format!("--client-id={}", self.config.client_id))
            .arg(format!("--client-version={}", self.config.client_version))
            .args(&self.config.server_args);

        if self.config.pass_roots_as_args
            && let Some(roots) = roots
        {
            for dir in roots.included() {
                cmd.arg(format!("--include={dir}"));
            }
            for dir in roots.excluded() {
                cmd.arg(format!("--exclude={dir}"));
            }
        }
        cmd
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, roots: Option<&RootSet>) -> SessionResult<ServerConnection> {
        let (runtime, server) = self.locate()?;
        let mut cmd = self.command(&runtime, &server, roots);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(SessionError::Spawn)?;
        info!(runtime = %runtime.display(), server = %server.display(), pid = child.id(), "analysis server started");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Spawn(std::io::Error::other("failed to open server stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Spawn(std::io::Error::other("failed to open server stdout")))?;
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(target: "analysis_server::stderr", "{line}");
                }
            });
        }

        Ok(ServerConnection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
