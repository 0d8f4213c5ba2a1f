//! Kubelet device plugin integration.
//!
//! The main components are:
//! - [`DevicePlugin`]: one gRPC server per host device, bound to its own socket
//! - [`DevicePluginService`]: the `v1beta1.DevicePlugin` service handlers
//! - [`DevicePluginManager`]: starts, registers and stops all plugins as a group
//! - [`registration`]: the one-shot `Register` call against the kubelet

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod device_plugin;
pub mod manager;
pub mod registration;
pub mod service;
pub mod types;
mod uds;

pub use device_plugin::DevicePlugin;
pub use device_plugin::DeviceResource;
pub use manager::DevicePluginManager;
pub use manager::ManagerState;
pub use service::DevicePluginService;
pub use types::PluginError;

/// Device plugin API version we implement and register with.
pub const API_VERSION: &str = "v1beta1";
/// Health value reported for every device instance.
pub const HEALTHY: &str = "Healthy";
