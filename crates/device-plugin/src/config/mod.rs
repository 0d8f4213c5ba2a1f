pub mod cli;
pub mod daemon;
pub mod devices;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

pub use cli::*;
pub use daemon::*;
pub use devices::*;

/// Health re-announcement period of `ListAndWatch` streams.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(10);
/// How long `start_all` waits for a freshly bound server to accept connections.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable runtime configuration of the device plugins.
///
/// Built once from the CLI and handed to every manager generation, so tests
/// can inject their own device table and directories.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// kubelet device plugin directory, also where our sockets live
    pub plugin_dir: PathBuf,
    /// kubelet registration socket
    pub kubelet_socket: PathBuf,
    /// prefix of every advertised resource name (e.g. "openvmi/")
    pub resource_prefix: String,
    pub devices: DeviceTable,
    /// number of schedulable instances advertised per device
    pub instance_count: usize,
    pub watch_interval: Duration,
    pub ready_timeout: Duration,
    /// delay between failed registration attempts
    pub retry_delay: Duration,
}

impl PluginSettings {
    /// File name of the kubelet socket, used to match directory events.
    pub fn kubelet_socket_name(&self) -> Option<&std::ffi::OsStr> {
        self.kubelet_socket.file_name()
    }
}

impl From<&DaemonArgs> for PluginSettings {
    fn from(args: &DaemonArgs) -> Self {
        Self {
            plugin_dir: args.device_plugin_path.clone(),
            kubelet_socket: args.device_plugin_path.join(&args.kubelet_socket),
            resource_prefix: args.resource_prefix.clone(),
            devices: args.devices.clone().unwrap_or_default(),
            instance_count: args.instance_count(),
            watch_interval: DEFAULT_WATCH_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            retry_delay: Duration::from_secs(args.registration_retry_secs),
        }
    }
}

/// Default number of instances per device: one per host CPU.
pub fn default_instance_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
