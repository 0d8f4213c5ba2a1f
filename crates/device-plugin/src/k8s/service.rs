use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::k8s::api::device_plugin_server::DevicePlugin;
use crate::k8s::api::AllocateRequest;
use crate::k8s::api::AllocateResponse;
use crate::k8s::api::DevicePluginOptions;
use crate::k8s::api::Empty;
use crate::k8s::api::ListAndWatchResponse;
use crate::k8s::api::PreStartContainerRequest;
use crate::k8s::api::PreStartContainerResponse;
use crate::k8s::api::PreferredAllocationRequest;
use crate::k8s::api::PreferredAllocationResponse;
use crate::k8s::device_plugin::DeviceResource;

/// DevicePlugin service implementation for one host device
#[derive(Debug)]
pub struct DevicePluginService {
    resource: Arc<DeviceResource>,
    /// fired when the owning plugin stops
    stop_token: CancellationToken,
}

impl DevicePluginService {
    pub fn new(resource: Arc<DeviceResource>, stop_token: CancellationToken) -> Self {
        Self {
            resource,
            stop_token,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");

        Ok(Response::new(self.resource.options()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// Send the device list now and again on every tick until the plugin stops.
    ///
    /// Health never changes, so every message carries the same list.
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!(
            "starting to watch device list of {}",
            self.resource.resource_name()
        );

        // one pending list at most, a slow reader only ever misses repeats
        let (tx, rx) = mpsc::channel::<Result<ListAndWatchResponse, Status>>(1);
        let resource = self.resource.clone();
        let stop_token = self.stop_token.clone();

        if let Err(e) = tx.try_send(Ok(resource.list_response())) {
            error!("failed to send initial device list: {}", e);
        }

        tokio::spawn(async move {
            let period = resource.watch_interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_token.cancelled() => {
                        info!("device watch of {} stopped", resource.resource_name());
                        break;
                    }
                    _ = ticker.tick() => match tx.try_send(Ok(resource.list_response())) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("device watch client of {} is behind, skipping tick", resource.resource_name());
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("device watch client of {} went away", resource.resource_name());
                            break;
                        }
                    },
                }
            }
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);
        let response = PreferredAllocationResponse {
            container_responses: vec![],
        };
        Ok(Response::new(response))
    }

    /// Allocate the device to a container.
    ///
    /// Only the first device ID of the first container request is honored,
    /// matching the one-unit-per-pod usage of these resources.
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();
        debug!("allocating devices: {:?}", req);

        let device_id = req
            .container_requests
            .first()
            .and_then(|container_req| container_req.devices_ids.first())
            .ok_or_else(|| {
                error!(
                    "allocate request for {} carries no device ID",
                    self.resource.resource_name()
                );
                Status::invalid_argument("allocate request carries no device ID")
            })?;

        let container_response = self.resource.allocate(device_id);
        info!(
            "allocated {} to container: {:?}",
            device_id, container_response.devices
        );

        Ok(Response::new(AllocateResponse {
            container_responses: vec![container_response],
        }))
    }

    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        debug!("pre-start container: {:?}", request.into_inner());
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
