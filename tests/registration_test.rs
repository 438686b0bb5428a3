//! Registration protocol scenarios over the in-memory transport

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use polyhub::action::{ActionContext, ActionHandler};
use polyhub::config::{ConnectionLimits, KeepaliveConfig};
use polyhub::connection::Registrar;
use polyhub::directory::{AdmitError, Directory};
use polyhub::metrics::{reason, HubMetrics};
use polyhub::peer::{AccessMode, PeerProfile, Role};
use polyhub::pump::{InboundExit, KeepaliveSettings};
use polyhub::transport::memory::{self, MemoryRemote};
use polyhub::transport::{Frame, Handshake};

/// Records every payload it is handed
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Bytes)>>,
}

#[async_trait]
impl ActionHandler for Recorder {
    async fn handle(&self, ctx: ActionContext, payload: Bytes) {
        self.seen.lock().await.push((ctx.peer().name().to_string(), payload));
    }
}

impl Recorder {
    async fn payloads(&self) -> Vec<Bytes> {
        self.seen.lock().await.iter().map(|(_, p)| p.clone()).collect()
    }
}

struct Hub {
    directory: Arc<Directory>,
    metrics: Arc<HubMetrics>,
    recorder: Arc<Recorder>,
    registrar: Registrar,
}

fn hub(limits: ConnectionLimits) -> Hub {
    let metrics = Arc::new(HubMetrics::new());
    let directory = Arc::new(Directory::new(limits, Arc::clone(&metrics)));
    let recorder = Arc::new(Recorder::default());
    let registrar = Registrar::new(
        Arc::clone(&directory),
        recorder.clone(),
        KeepaliveConfig::default(),
        Arc::clone(&metrics),
    );
    Hub {
        directory,
        metrics,
        recorder,
        registrar,
    }
}

fn keyed(key: &str) -> Handshake {
    Handshake {
        key: Some(key.to_string()),
        ..Handshake::default()
    }
}

fn connect(hub: &Hub, key: &str) -> (tokio::task::JoinHandle<Result<InboundExit, AdmitError>>, MemoryRemote) {
    let (transport, remote) = memory::pair(16);
    let registrar = hub.registrar.clone();
    let handshake = keyed(key);
    let task = tokio::spawn(async move {
        registrar
            .register(Box::new(transport), handshake, KeepaliveSettings::default())
            .await
    });
    (task, remote)
}

async fn wait_for(directory: &Directory, name: &str, role: Role) {
    for _ in 0..200 {
        if directory.exists(name, role).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{name} never registered as {role}");
}

#[tokio::test]
async fn test_payloads_are_normalized_and_dispatched() {
    let hub = hub(ConnectionLimits::default());
    let (task, remote) = connect(&hub, "peer1");
    wait_for(&hub.directory, "peer1", Role::Undefined).await;

    remote.send(Frame::Payload(Bytes::from("hello\r\nworld \n"))).await.unwrap();
    remote.send(Frame::close_normal("bye")).await.unwrap();

    let exit = task.await.unwrap().unwrap();
    assert!(matches!(exit, InboundExit::PeerClosed));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hub.recorder.payloads().await, vec![Bytes::from("hello world")]);
    assert_eq!(hub.metrics.frames_in(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_identity() {
    let hub = hub(ConnectionLimits::default());

    let (first, remote1) = memory::pair(16);
    let (second, remote2) = memory::pair(16);
    let settings = KeepaliveSettings::default();

    let (a, b) = tokio::join!(
        hub.registrar.admit(Box::new(first), keyed("peer1"), settings),
        hub.registrar.admit(Box::new(second), keyed("peer1"), settings),
    );

    let (admitted, refused_remote, err) = match (a, b) {
        (Ok(admitted), Err(e)) => (admitted, remote2, e),
        (Err(e), Ok(admitted)) => (admitted, remote1, e),
        _ => panic!("exactly one admission must succeed"),
    };

    assert!(matches!(err, AdmitError::Duplicate { .. }));
    assert_eq!(refused_remote.releases(), 1);
    assert_eq!(hub.directory.len().await, 1);
    assert_eq!(hub.metrics.rejections(reason::DUPLICATE), 1);

    admitted.reject().await;
    assert!(hub.directory.is_empty().await);
}

#[tokio::test]
async fn test_identity_already_connected_as_user_is_refused() {
    let hub = hub(ConnectionLimits::default());
    let settings = KeepaliveSettings::default();

    let (first, _remote1) = memory::pair(16);
    let mut admitted = hub.registrar.admit(Box::new(first), keyed("alice"), settings).await.unwrap();
    admitted.identify(Role::User, PeerProfile::default()).await.unwrap();

    let (second, remote2) = memory::pair(16);
    let err = hub
        .registrar
        .admit(Box::new(second), keyed("alice"), settings)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AdmitError::Duplicate {
            name: "alice".to_string(),
            role: Role::User
        }
    );
    assert_eq!(remote2.releases(), 1);
    assert_eq!(hub.directory.len().await, 1);
}

#[tokio::test]
async fn test_capacity_refusal_closes_transport() {
    let hub = hub(ConnectionLimits {
        max_incoming: 1,
        ..ConnectionLimits::default()
    });
    let (task, _remote) = connect(&hub, "first");
    wait_for(&hub.directory, "first", Role::Undefined).await;

    let (transport, remote) = memory::pair(16);
    let err = hub
        .registrar
        .register(Box::new(transport), keyed("second"), KeepaliveSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AdmitError::CapacityExceeded { role: Role::Undefined, limit: 1 }));
    assert_eq!(remote.releases(), 1);
    assert_eq!(hub.metrics.rejections(reason::CAPACITY), 1);

    task.abort();
}

#[tokio::test]
async fn test_oversized_frame_terminates_without_dispatch() {
    let hub = hub(ConnectionLimits::default());
    let (task, mut remote) = connect(&hub, "big");
    wait_for(&hub.directory, "big", Role::Undefined).await;

    remote.send(Frame::Payload(Bytes::from(vec![b'x'; 600]))).await.unwrap();

    let exit = task.await.unwrap().unwrap();
    assert!(matches!(exit, InboundExit::Failed(_)));
    assert!(!hub.directory.exists("big", Role::Undefined).await);
    assert!(hub.recorder.payloads().await.is_empty());

    // writer exited on termination: no close frame, transport released once
    assert_eq!(remote.recv().await, None);
    assert_eq!(remote.releases(), 1);
}

#[tokio::test]
async fn test_frame_at_limit_is_dispatched() {
    let hub = hub(ConnectionLimits::default());
    let (task, mut remote) = connect(&hub, "edge");
    wait_for(&hub.directory, "edge", Role::Undefined).await;

    remote.send(Frame::Payload(Bytes::from(vec![b'y'; 512]))).await.unwrap();
    remote.hang_up();

    let exit = task.await.unwrap().unwrap();
    assert!(matches!(exit, InboundExit::Ended));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hub.recorder.payloads().await.len(), 1);
    assert_eq!(remote.releases(), 1);
    assert!(hub.directory.is_empty().await);
}

#[tokio::test]
async fn test_clean_close_flushes_queue_then_close_frame() {
    let hub = hub(ConnectionLimits::default());
    let (task, mut remote) = connect(&hub, "flush");
    wait_for(&hub.directory, "flush", Role::Undefined).await;

    let peer = hub.directory.find("flush", Role::Undefined).await.unwrap();
    peer.send("A").await.unwrap();
    peer.send("B").await.unwrap();

    assert_eq!(remote.recv().await, Some(Frame::Payload(Bytes::from("A"))));
    remote.send(Frame::close_normal("done")).await.unwrap();

    let exit = task.await.unwrap().unwrap();
    assert!(exit.is_clean());
    assert_eq!(remote.recv().await, Some(Frame::Payload(Bytes::from("B"))));
    assert_eq!(remote.recv().await, Some(Frame::close_normal("Disconnected")));
    assert_eq!(remote.recv().await, None);
    assert_eq!(remote.releases(), 1);
    assert!(hub.directory.is_empty().await);
}

#[tokio::test]
async fn test_read_only_peer_payloads_are_not_dispatched() {
    let hub = hub(ConnectionLimits::default());
    let settings = KeepaliveSettings::default();
    let (transport, remote) = memory::pair(16);

    let mut admitted = hub
        .registrar
        .admit(Box::new(transport), keyed("viewer"), settings)
        .await
        .unwrap();
    admitted
        .identify(
            Role::Monitor,
            PeerProfile {
                mode: AccessMode::ReadOnly,
                ..PeerProfile::default()
            },
        )
        .await
        .unwrap();
    let task = tokio::spawn(admitted.run());

    remote.send(Frame::Payload(Bytes::from("ignored"))).await.unwrap();
    remote.send(Frame::close_normal("bye")).await.unwrap();
    task.await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(hub.recorder.payloads().await.is_empty());
    assert!(hub.directory.is_empty().await);
}

#[tokio::test]
async fn test_external_termination_removes_peer_once() {
    let hub = hub(ConnectionLimits::default());
    let (task, remote) = connect(&hub, "kicked");
    wait_for(&hub.directory, "kicked", Role::Undefined).await;

    let peer = hub.directory.find("kicked", Role::Undefined).await.unwrap();
    peer.terminate();

    let exit = task.await.unwrap().unwrap();
    assert!(matches!(exit, InboundExit::Terminated));
    assert!(hub.directory.is_empty().await);
    assert_eq!(remote.releases(), 1);
    assert!(!hub.directory.remove(&peer).await);
}
