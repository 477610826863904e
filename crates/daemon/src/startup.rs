// Daemon startup: PID file, Unix socket creation, readiness signaling.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::config::global_dir;

/// Default socket path: ~/.treesync/daemon.sock
pub const SOCKET_NAME: &str = "daemon.sock";
/// PID file: ~/.treesync/daemon.pid (diagnostics only)
const PID_FILE_NAME: &str = "daemon.pid";

/// Resolved paths for daemon runtime files.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub base_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths under `~/.treesync/`, creating the directory.
    pub fn resolve() -> Result<Self> {
        let base_dir = global_dir().context("could not determine home directory")?;
        Self::in_dir(base_dir)
    }

    /// Runtime files under an explicit directory.
    pub fn in_dir(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("failed to create {}", base_dir.display()))?;
        ensure_owner_only(&base_dir, 0o700)?;
        Ok(Self {
            socket_path: base_dir.join(SOCKET_NAME),
            pid_path: base_dir.join(PID_FILE_NAME),
            base_dir,
        })
    }

    pub fn with_socket_path(mut self, socket_path: PathBuf) -> Self {
        self.socket_path = socket_path;
        self
    }
}

/// Write the current process PID to the PID file.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = fs::File::create(path).context("failed to create PID file")?;
    write!(file, "{pid}").context("failed to write PID")?;
    ensure_owner_only(path, 0o600)?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

/// Remove the PID file on shutdown.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Remove stale socket file and bind a new Unix listener.
/// The daemon signals readiness by accepting connections on this socket.
pub async fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        fs::remove_file(path).context("failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(path).context("failed to bind Unix socket")?;
    ensure_owner_only(path, 0o600)?;
    info!(path = %path.display(), "daemon socket ready");
    Ok(listener)
}

/// Check if a daemon is already running by connecting to the socket.
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    tokio::net::UnixStream::connect(socket_path).await.is_ok()
}

/// Restrict `path` to the owning user. No-op off Unix.
fn ensure_owner_only(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
        if metadata.permissions().mode() & 0o777 != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set owner-only mode on `{}`", path.display()))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_paths(tmp: &TempDir) -> DaemonPaths {
        DaemonPaths::in_dir(tmp.path().join("state")).unwrap()
    }

    #[test]
    fn in_dir_creates_private_directory() {
        let tmp = TempDir::new().unwrap();
        let paths = setup_test_paths(&tmp);
        assert!(paths.base_dir.is_dir());
        assert!(paths.socket_path.ends_with(SOCKET_NAME));
        assert!(paths.pid_path.ends_with(PID_FILE_NAME));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&paths.base_dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn socket_path_can_be_overridden() {
        let tmp = TempDir::new().unwrap();
        let custom = tmp.path().join("custom.sock");
        let paths = setup_test_paths(&tmp).with_socket_path(custom.clone());
        assert_eq!(paths.socket_path, custom);
    }

    #[test]
    fn write_and_remove_pid_file() {
        let tmp = TempDir::new().unwrap();
        let paths = setup_test_paths(&tmp);

        write_pid_file(&paths.pid_path).unwrap();
        let contents = fs::read_to_string(&paths.pid_path).unwrap();
        assert_eq!(contents.parse::<u32>().unwrap(), std::process::id());

        remove_pid_file(&paths.pid_path);
        assert!(!paths.pid_path.exists());
        // Removing again is silent.
        remove_pid_file(&paths.pid_path);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_and_reports_running() {
        let tmp = TempDir::new().unwrap();
        let paths = setup_test_paths(&tmp);
        assert!(!is_daemon_running(&paths.socket_path).await);

        let first = match bind_socket(&paths.socket_path).await {
            Ok(listener) => listener,
            Err(error) => {
                eprintln!("skipping unix socket test: {error:#}");
                return;
            }
        };
        drop(first);

        let _listener = bind_socket(&paths.socket_path).await.unwrap();
        assert!(paths.socket_path.exists());
        assert!(is_daemon_running(&paths.socket_path).await);
    }
}
