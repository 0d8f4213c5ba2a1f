use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while building, starting or registering device plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid device {path:?}: {reason}")]
    InvalidDevice { path: PathBuf, reason: String },
    #[error("Duplicate resource name {resource_name}")]
    DuplicateResource { resource_name: String },
    #[error("Failed to remove stale socket {path:?}")]
    StaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to bind device plugin socket {path:?}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to connect to {path:?}")]
    Connect {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Timed out after {timeout:?} connecting to {path:?}")]
    ConnectTimeout { path: PathBuf, timeout: Duration },
    #[error("Device plugin server on {path:?} is not ready")]
    NotReady {
        path: PathBuf,
        #[source]
        source: Box<PluginError>,
    },
    #[error("Kubelet rejected registration of {resource_name}")]
    Registration {
        resource_name: String,
        #[source]
        status: Box<tonic::Status>,
    },
    #[error("Timed out after {timeout:?} registering {resource_name}")]
    RegistrationTimeout {
        resource_name: String,
        timeout: Duration,
    },
}
