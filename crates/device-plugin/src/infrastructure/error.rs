use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures of process-level collaborators. All of them are fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Another instance is running (lock {path:?} held{})", holder_suffix(.holder))]
    AlreadyRunning { path: PathBuf, holder: Option<u32> },
    #[error("Failed to lock {path:?}")]
    LockFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to start host device init script {script:?}")]
    HostInitSpawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Host device init script {script:?} failed ({status}): {stderr}")]
    HostInit {
        script: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("Failed to watch {path:?}")]
    Watcher {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("Failed to install signal handler")]
    SignalHandler(#[source] std::io::Error),
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder.map(|pid| format!(" by pid {pid}")).unwrap_or_default()
}
