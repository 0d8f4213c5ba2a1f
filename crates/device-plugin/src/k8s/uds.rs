use std::path::Path;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;

use crate::k8s::types::PluginError;

/// Open a gRPC channel over a unix socket, failing after `timeout`.
pub(crate) async fn connect(socket_path: &Path, timeout: Duration) -> Result<Channel, PluginError> {
    let path = socket_path.to_path_buf();

    // the URL is a placeholder, the connector always dials the unix socket
    let endpoint = Endpoint::from_static("http://tonic").connect_timeout(timeout);
    let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let path = path.clone();
        async move {
            match UnixStream::connect(path).await {
                Ok(stream) => Ok(TokioIo::new(stream)),
                Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            }
        }
    }));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(source)) => Err(PluginError::Connect {
            path: socket_path.to_path_buf(),
            source,
        }),
        Err(_) => Err(PluginError::ConnectTimeout {
            path: socket_path.to_path_buf(),
            timeout,
        }),
    }
}
