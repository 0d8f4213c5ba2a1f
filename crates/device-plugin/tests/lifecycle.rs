use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use device_plugin::app::ChannelEventSource;
use device_plugin::app::Event;
use device_plugin::app::LoopState;
use device_plugin::app::Orchestrator;
use device_plugin::app::Signal;
use device_plugin::config::DeviceTable;
use device_plugin::config::PluginSettings;
use device_plugin::k8s::api::device_plugin_client::DevicePluginClient;
use device_plugin::k8s::api::registration_server::Registration;
use device_plugin::k8s::api::registration_server::RegistrationServer;
use device_plugin::k8s::api::AllocateRequest;
use device_plugin::k8s::api::ContainerAllocateRequest;
use device_plugin::k8s::api::Empty;
use device_plugin::k8s::api::RegisterRequest;
use device_plugin::k8s::PluginError;
use hyper_util::rt::TokioIo;
use similar_asserts::assert_eq;
use test_log::test;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tower::service_fn;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
struct FakeKubelet {
    requests: Arc<Mutex<Vec<RegisterRequest>>>,
}

impl FakeKubelet {
    fn resource_names(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|r| r.resource_name.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.requests.lock().expect("lock poisoned").len()
    }

    async fn wait_for_registrations(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.count() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} registrations, got {}", self.count()));
    }

    fn serve(&self, socket: &Path) -> CancellationToken {
        let listener = UnixListener::bind(socket).expect("should bind kubelet socket");
        let token = CancellationToken::new();
        let shutdown = token.clone();
        let kubelet = self.clone();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(RegistrationServer::new(kubelet))
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    shutdown.cancelled_owned(),
                )
                .await
        });
        token
    }
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(request.into_inner());
        Ok(Response::new(Empty {}))
    }
}

type RunHandle = JoinHandle<(Orchestrator<ChannelEventSource>, Result<(), PluginError>)>;

fn settings(dir: &Path) -> PluginSettings {
    PluginSettings {
        plugin_dir: dir.to_path_buf(),
        kubelet_socket: dir.join("kubelet.sock"),
        resource_prefix: "openvmi/".to_string(),
        devices: DeviceTable::default(),
        instance_count: 2,
        watch_interval: Duration::from_secs(10),
        ready_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
    }
}

fn spawn_loop(dir: &Path) -> (UnboundedSender<Event>, RunHandle) {
    let (tx, events) = ChannelEventSource::channel();
    let mut orchestrator = Orchestrator::new(settings(dir), events);
    let handle = tokio::spawn(async move {
        let result = orchestrator.run().await;
        (orchestrator, result)
    });
    (tx, handle)
}

async fn finish(tx: &UnboundedSender<Event>, handle: RunHandle) -> Orchestrator<ChannelEventSource> {
    tx.send(Event::Signal(Signal::Terminate))
        .expect("loop should be alive");
    let (orchestrator, result) = tokio::time::timeout(WAIT, handle)
        .await
        .expect("loop should stop")
        .expect("loop task should not panic");
    result.expect("loop should end cleanly");
    assert_eq!(orchestrator.state(), LoopState::Terminated);
    orchestrator
}

async fn plugin_client(socket: &Path) -> DevicePluginClient<Channel> {
    let path = socket.to_path_buf();
    let channel = Endpoint::from_static("http://tonic")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { UnixStream::connect(path).await.map(TokioIo::new) }
        }))
        .await
        .expect("should connect to plugin");
    DevicePluginClient::new(channel)
}

fn assert_no_plugin_sockets(dir: &Path) {
    for name in ["fuse.sock", "ashmem.sock", "binder.sock"] {
        assert!(!dir.join(name).exists(), "{name} should be removed");
    }
}

#[test(tokio::test)]
async fn plugins_register_and_serve() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let kubelet = FakeKubelet::default();
    let _kubelet = kubelet.serve(&dir.path().join("kubelet.sock"));

    let (tx, handle) = spawn_loop(dir.path());
    kubelet.wait_for_registrations(3).await;

    let requests = kubelet.requests.lock().expect("lock poisoned").clone();
    let endpoints: Vec<_> = requests.iter().map(|r| r.endpoint.as_str()).collect();
    assert_eq!(endpoints, vec!["fuse.sock", "ashmem.sock", "binder.sock"]);
    assert!(requests.iter().all(|r| r.version == "v1beta1"));

    {
        let mut client = plugin_client(&dir.path().join("binder.sock")).await;
        let mut stream = client
            .list_and_watch(Empty {})
            .await
            .expect("should open stream")
            .into_inner();
        let first = stream
            .message()
            .await
            .expect("stream should not fail")
            .expect("should get the device list");
        let ids: Vec<_> = first.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["binder1", "binder2"]);

        let response = client
            .allocate(AllocateRequest {
                container_requests: vec![ContainerAllocateRequest {
                    devices_ids: vec!["binder2".to_string()],
                }],
            })
            .await
            .expect("should allocate")
            .into_inner();
        let container = &response.container_responses[0];
        assert_eq!(container.devices[0].host_path, "/dev/binder2");
        assert_eq!(container.devices[0].container_path, "/dev/binder");
        assert_eq!(
            container.envs.get("ANDROID_BINDER_IDX").map(String::as_str),
            Some("2")
        );
    }

    let orchestrator = finish(&tx, handle).await;
    assert_eq!(orchestrator.generation(), 1);
    assert_no_plugin_sockets(dir.path());
}

#[test(tokio::test)]
async fn kubelet_restart_triggers_one_restart_cycle() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let kubelet = FakeKubelet::default();
    let _kubelet = kubelet.serve(&dir.path().join("kubelet.sock"));

    let (tx, handle) = spawn_loop(dir.path());
    kubelet.wait_for_registrations(3).await;

    tx.send(Event::SocketCreated(dir.path().join("kubelet.sock")))
        .expect("loop should be alive");
    kubelet.wait_for_registrations(6).await;

    let orchestrator = finish(&tx, handle).await;
    assert_eq!(orchestrator.generation(), 2);
    assert_eq!(kubelet.count(), 6);
    assert_no_plugin_sockets(dir.path());
}

#[test(tokio::test)]
async fn hangup_restarts_plugins() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let kubelet = FakeKubelet::default();
    let _kubelet = kubelet.serve(&dir.path().join("kubelet.sock"));

    let (tx, handle) = spawn_loop(dir.path());
    kubelet.wait_for_registrations(3).await;

    tx.send(Event::Signal(Signal::Hangup))
        .expect("loop should be alive");
    kubelet.wait_for_registrations(6).await;

    let orchestrator = finish(&tx, handle).await;
    assert_eq!(orchestrator.generation(), 2);
}

#[test(tokio::test)]
async fn unrelated_files_and_watch_errors_are_ignored() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let kubelet = FakeKubelet::default();
    let _kubelet = kubelet.serve(&dir.path().join("kubelet.sock"));

    let (tx, handle) = spawn_loop(dir.path());
    kubelet.wait_for_registrations(3).await;

    tx.send(Event::SocketCreated(dir.path().join("other.sock")))
        .expect("loop should be alive");
    tx.send(Event::WatchError("queue overflow".to_string()))
        .expect("loop should be alive");

    // events are handled in order, so these were seen before the shutdown
    let orchestrator = finish(&tx, handle).await;
    assert_eq!(orchestrator.generation(), 1);
    assert_eq!(kubelet.count(), 3);
}

#[test(tokio::test)]
async fn registration_is_retried_until_kubelet_appears() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let (tx, handle) = spawn_loop(dir.path());

    // a few failed cycles with no kubelet listening
    tokio::time::sleep(Duration::from_millis(200)).await;

    let kubelet = FakeKubelet::default();
    let _kubelet = kubelet.serve(&dir.path().join("kubelet.sock"));
    kubelet.wait_for_registrations(3).await;

    assert_eq!(
        kubelet.resource_names(),
        vec!["openvmi/fuse", "openvmi/ashmem", "openvmi/binder"]
    );

    let orchestrator = finish(&tx, handle).await;
    assert!(orchestrator.generation() >= 2);
    assert_no_plugin_sockets(dir.path());
}
