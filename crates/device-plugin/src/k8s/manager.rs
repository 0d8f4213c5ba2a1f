use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::error;
use tracing::info;

use crate::config::PluginSettings;
use crate::k8s::device_plugin::DevicePlugin;
use crate::k8s::types::PluginError;

/// Lifecycle position of a manager generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// plugins built, nothing bound yet
    Uninitialized,
    ServersRunning,
    Registered,
    Stopped,
}

/// Owns one [`DevicePlugin`] per configured device and drives them as a group.
///
/// A manager is built fresh for every restart cycle and discarded afterwards.
#[derive(Debug)]
pub struct DevicePluginManager {
    plugins: Vec<DevicePlugin>,
    kubelet_socket: PathBuf,
    ready_timeout: Duration,
    state: ManagerState,
}

impl DevicePluginManager {
    /// Build one plugin per device table entry.
    pub fn new(settings: &PluginSettings) -> Result<Self, PluginError> {
        let mut plugins = Vec::with_capacity(settings.devices.len());
        let mut resource_names = HashSet::new();

        for device in settings.devices.iter() {
            let plugin = DevicePlugin::new(device, settings)?;
            if !resource_names.insert(plugin.resource_name().to_string()) {
                return Err(PluginError::DuplicateResource {
                    resource_name: plugin.resource_name().to_string(),
                });
            }
            plugins.push(plugin);
        }

        Ok(Self {
            plugins,
            kubelet_socket: settings.kubelet_socket.clone(),
            ready_timeout: settings.ready_timeout,
            state: ManagerState::Uninitialized,
        })
    }

    pub fn plugins(&self) -> &[DevicePlugin] {
        &self.plugins
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Start every plugin server, stopping at the first failure.
    ///
    /// Servers already started are left running; call [`Self::stop_all`].
    pub async fn start_all(&mut self) -> Result<(), PluginError> {
        for plugin in &mut self.plugins {
            plugin.start(self.ready_timeout).await.map_err(|e| {
                error!(
                    "Failed to start gRPC server of {}: {e}",
                    plugin.resource_name()
                );
                e
            })?;
        }
        self.state = ManagerState::ServersRunning;
        Ok(())
    }

    /// Register every not yet registered plugin, stopping at the first failure.
    pub async fn register_all(&mut self) -> Result<(), PluginError> {
        for plugin in &mut self.plugins {
            if plugin.is_registered() {
                continue;
            }
            plugin
                .register(&self.kubelet_socket, self.ready_timeout)
                .await?;
        }
        self.state = ManagerState::Registered;
        Ok(())
    }

    /// Stop every plugin. Idempotent.
    pub async fn stop_all(&mut self) {
        if self.state != ManagerState::Stopped {
            info!("Stopping {} device plugins", self.plugins.len());
        }
        for plugin in &mut self.plugins {
            plugin.stop().await;
        }
        self.state = ManagerState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::config::DeviceConfig;
    use crate::config::DeviceTable;

    fn settings(dir: &Path, devices: DeviceTable) -> PluginSettings {
        PluginSettings {
            plugin_dir: dir.to_path_buf(),
            kubelet_socket: dir.join("kubelet.sock"),
            resource_prefix: "openvmi/".to_string(),
            devices,
            instance_count: 2,
            watch_interval: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn one_plugin_per_device() {
        let manager = DevicePluginManager::new(&settings(Path::new("/plugins"), DeviceTable::default()))
            .expect("should build manager");

        let names: Vec<_> = manager.plugins().iter().map(|p| p.resource_name()).collect();
        assert_eq!(names, vec!["openvmi/fuse", "openvmi/ashmem", "openvmi/binder"]);
        assert_eq!(manager.state(), ManagerState::Uninitialized);
    }

    #[test]
    fn duplicate_base_names_are_rejected() {
        let devices = DeviceTable::new(vec![
            DeviceConfig::new("/dev/fuse", "rwm"),
            DeviceConfig::new("/other/fuse", "rw"),
        ]);
        let result = DevicePluginManager::new(&settings(Path::new("/plugins"), devices));
        assert!(matches!(
            result,
            Err(PluginError::DuplicateResource { resource_name }) if resource_name == "openvmi/fuse"
        ));
    }

    #[test(tokio::test)]
    async fn stop_all_is_idempotent() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let mut manager = DevicePluginManager::new(&settings(dir.path(), DeviceTable::default()))
            .expect("should build manager");

        // stopping a manager that never started is fine too
        manager.stop_all().await;

        manager.start_all().await.expect("should start servers");
        assert_eq!(manager.state(), ManagerState::ServersRunning);
        assert!(manager.plugins().iter().all(|p| p.socket_path().exists()));

        manager.stop_all().await;
        manager.stop_all().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.plugins().iter().all(|p| !p.socket_path().exists()));
        assert!(manager.plugins().iter().all(|p| !p.is_serving()));
    }

    #[test(tokio::test)]
    async fn failed_registration_leaves_nothing_bound() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let mut manager = DevicePluginManager::new(&settings(dir.path(), DeviceTable::default()))
            .expect("should build manager");
        manager.start_all().await.expect("should start servers");

        // no kubelet is listening
        assert!(manager.register_all().await.is_err());
        assert_eq!(manager.state(), ManagerState::ServersRunning);

        manager.stop_all().await;
        for plugin in manager.plugins() {
            assert!(!plugin.is_registered());
            assert!(!plugin.is_serving());
            assert!(!plugin.socket_path().exists());
        }

        // the same socket paths can be bound again by a new generation
        let mut next = DevicePluginManager::new(&settings(dir.path(), DeviceTable::default()))
            .expect("should build manager");
        next.start_all().await.expect("should rebind sockets");
        next.stop_all().await;
    }

    #[test(tokio::test)]
    async fn start_all_fails_when_directory_is_missing() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let missing = dir.path().join("missing");
        let mut manager = DevicePluginManager::new(&settings(&missing, DeviceTable::default()))
            .expect("should build manager");

        let result = manager.start_all().await;
        assert!(matches!(result, Err(PluginError::Bind { .. })));
        manager.stop_all().await;
    }
}
