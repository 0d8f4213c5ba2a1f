//! One-shot registration of a device plugin with the kubelet.

use std::path::Path;
use std::time::Duration;

use tonic::Request;
use tracing::error;
use tracing::info;

use crate::k8s::api::registration_client::RegistrationClient;
use crate::k8s::api::RegisterRequest;
use crate::k8s::types::PluginError;
use crate::k8s::uds;

/// Announce a resource to the kubelet. No retry happens here.
pub async fn register(
    kubelet_socket: &Path,
    request: RegisterRequest,
    timeout: Duration,
) -> Result<(), PluginError> {
    info!(
        "registering {} (endpoint {}) with kubelet: {:?}",
        request.resource_name, request.endpoint, kubelet_socket
    );

    let channel = uds::connect(kubelet_socket, timeout).await.map_err(|e| {
        error!("Failed to connect to kubelet at {:?}: {e}", kubelet_socket);
        e
    })?;
    let mut client = RegistrationClient::new(channel);
    let resource_name = request.resource_name.clone();

    match tokio::time::timeout(timeout, client.register(Request::new(request))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(status)) => {
            error!("Register {} error: {}", resource_name, status);
            Err(PluginError::Registration {
                resource_name,
                status: Box::new(status),
            })
        }
        Err(_) => Err(PluginError::RegistrationTimeout {
            resource_name,
            timeout,
        }),
    }
}
