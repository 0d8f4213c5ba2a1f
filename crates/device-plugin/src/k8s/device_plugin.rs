use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::DeviceConfig;
use crate::config::PluginSettings;
use crate::k8s::api;
use crate::k8s::api::device_plugin_server::DevicePluginServer;
use crate::k8s::api::ContainerAllocateResponse;
use crate::k8s::api::DevicePluginOptions;
use crate::k8s::api::DeviceSpec;
use crate::k8s::api::ListAndWatchResponse;
use crate::k8s::api::RegisterRequest;
use crate::k8s::registration;
use crate::k8s::service::DevicePluginService;
use crate::k8s::types::PluginError;
use crate::k8s::uds;
use crate::k8s::API_VERSION;
use crate::k8s::HEALTHY;

/// Device IDs containing this marker are Android binder instances.
pub const BINDER_MARKER: &str = "binder";
/// Tells the container which binder instance it received.
pub const BINDER_INDEX_ENV: &str = "ANDROID_BINDER_IDX";

/// Bounded wait for a cancelled server task before it is aborted.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only description of one advertised resource.
///
/// Shared between the plugin and its gRPC handlers; never mutated after
/// construction.
#[derive(Debug)]
pub struct DeviceResource {
    /// device node on host, e.g. /dev/fuse
    device_path: String,
    /// "rwm" or a subset
    permissions: String,
    /// e.g. fuse
    base_name: String,
    /// resource name registered with kubelet, e.g. openvmi/fuse
    resource_name: String,
    /// plugin directory + base name + ".sock"
    socket_path: PathBuf,
    instances: Vec<api::Device>,
    options: DevicePluginOptions,
    watch_interval: Duration,
}

impl DeviceResource {
    pub fn new(device: &DeviceConfig, settings: &PluginSettings) -> Result<Self, PluginError> {
        let invalid = |reason: &str| PluginError::InvalidDevice {
            path: device.path.clone(),
            reason: reason.to_string(),
        };

        let base_name = device
            .base_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid("device path has no base name"))?
            .to_string();
        let device_path = device
            .path
            .to_str()
            .ok_or_else(|| invalid("device path is not valid UTF-8"))?
            .to_string();
        if !device.has_valid_permissions() {
            return Err(invalid("permissions must be a non-empty subset of \"rwm\""));
        }
        if settings.instance_count == 0 {
            return Err(invalid("instance count must be at least 1"));
        }

        let instances = (1..=settings.instance_count)
            .map(|i| api::Device {
                id: format!("{base_name}{i}"),
                health: HEALTHY.to_string(),
                topology: None,
            })
            .collect();

        Ok(Self {
            device_path,
            permissions: device.permissions.clone(),
            resource_name: format!("{}{}", settings.resource_prefix, base_name),
            socket_path: settings.plugin_dir.join(format!("{base_name}.sock")),
            base_name,
            instances,
            options: DevicePluginOptions {
                pre_start_required: false,
                get_preferred_allocation_available: false,
            },
            watch_interval: settings.watch_interval,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Socket file name, which is what kubelet expects as the endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}.sock", self.base_name)
    }

    pub fn instances(&self) -> &[api::Device] {
        &self.instances
    }

    pub fn options(&self) -> DevicePluginOptions {
        self.options
    }

    pub fn watch_interval(&self) -> Duration {
        self.watch_interval
    }

    pub fn list_response(&self) -> ListAndWatchResponse {
        ListAndWatchResponse {
            devices: self.instances.clone(),
        }
    }

    /// Build the container response for one allocated device ID.
    ///
    /// Binder instances live at /dev/<id> on the host and are mapped onto the
    /// plain binder path inside the container.
    pub fn allocate(&self, device_id: &str) -> ContainerAllocateResponse {
        let mut host_path = self.device_path.clone();
        let mut envs = HashMap::new();

        if device_id.contains(BINDER_MARKER) {
            host_path = format!("/dev/{device_id}");
            envs.insert(BINDER_INDEX_ENV.to_string(), binder_index(device_id));
        }

        ContainerAllocateResponse {
            envs,
            mounts: Vec::new(),
            devices: vec![DeviceSpec {
                container_path: self.device_path.clone(),
                host_path,
                permissions: self.permissions.clone(),
            }],
            annotations: HashMap::new(),
            cdi_devices: Vec::new(),
        }
    }
}

/// Strips the characters of "binder" from both ends of the ID.
///
/// Only meaningful for IDs shaped like "binder<N>".
fn binder_index(device_id: &str) -> String {
    device_id
        .trim_matches(|c: char| BINDER_MARKER.contains(c))
        .to_string()
}

/// Device plugin for one host device.
#[derive(Debug)]
pub struct DevicePlugin {
    resource: Arc<DeviceResource>,
    registered: bool,
    server: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
    /// fired on stop, ends the server and every ListAndWatch stream
    stop_token: CancellationToken,
}

impl DevicePlugin {
    pub fn new(device: &DeviceConfig, settings: &PluginSettings) -> Result<Self, PluginError> {
        Ok(Self {
            resource: Arc::new(DeviceResource::new(device, settings)?),
            registered: false,
            server: None,
            stop_token: CancellationToken::new(),
        })
    }

    pub fn resource_name(&self) -> &str {
        self.resource.resource_name()
    }

    pub fn socket_path(&self) -> &Path {
        self.resource.socket_path()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_serving(&self) -> bool {
        self.server.is_some()
    }

    /// A clone of the token fired when this plugin stops.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    /// Start the gRPC server and wait until it accepts connections.
    ///
    /// On a readiness failure the server is left running; callers clean up
    /// with [`DevicePlugin::stop`].
    pub async fn start(&mut self, ready_timeout: Duration) -> Result<(), PluginError> {
        let socket_path = self.resource.socket_path().to_path_buf();
        info!("Starting gRPC server on {:?}", socket_path);

        if self.stop_token.is_cancelled() {
            self.stop_token = CancellationToken::new();
        }

        // clean up old socket file if it exists
        remove_socket(&socket_path).map_err(|source| PluginError::StaleSocket {
            path: socket_path.clone(),
            source,
        })?;

        let listener = UnixListener::bind(&socket_path).map_err(|source| PluginError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        let service = DevicePluginService::new(self.resource.clone(), self.stop_token.clone());
        let shutdown = self.stop_token.clone();
        let resource_name = self.resource.resource_name().to_string();

        self.server = Some(tokio::spawn(async move {
            let result = tonic::transport::Server::builder()
                .add_service(DevicePluginServer::new(service))
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    shutdown.cancelled_owned(),
                )
                .await;
            info!("gRPC server of {} stopped", resource_name);
            result
        }));

        // prove the server accepts connections before returning
        uds::connect(&socket_path, ready_timeout)
            .await
            .map_err(|e| PluginError::NotReady {
                path: socket_path.clone(),
                source: Box::new(e),
            })?;
        debug!("gRPC server on {:?} is ready", socket_path);

        Ok(())
    }

    /// Stop the server, end all streams and remove the socket.
    ///
    /// Safe to call on a plugin that never started or is already stopped.
    pub async fn stop(&mut self) {
        self.stop_token.cancel();

        if let Some(mut server) = self.server.take() {
            match tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("gRPC server of {} failed: {e}", self.resource_name()),
                Ok(Err(e)) => warn!("gRPC server task of {} failed: {e}", self.resource_name()),
                Err(_) => {
                    warn!(
                        "gRPC server of {} did not stop within {:?}, aborting",
                        self.resource_name(),
                        SERVER_STOP_TIMEOUT
                    );
                    server.abort();
                    let _ = server.await;
                }
            }
        }

        self.registered = false;

        if let Err(e) = remove_socket(self.socket_path()) {
            warn!("Failed to remove socket {:?}: {e}", self.socket_path());
        }
    }

    /// Register this plugin's resource with the kubelet.
    pub async fn register(
        &mut self,
        kubelet_socket: &Path,
        timeout: Duration,
    ) -> Result<(), PluginError> {
        let request = RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: self.resource.endpoint(),
            resource_name: self.resource.resource_name().to_string(),
            options: Some(self.resource.options()),
        };

        match registration::register(kubelet_socket, request, timeout).await {
            Ok(()) => {
                self.registered = true;
                info!("Registered {} with kubelet", self.resource.device_path());
                Ok(())
            }
            Err(e) => {
                self.registered = false;
                Err(e)
            }
        }
    }
}

fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
