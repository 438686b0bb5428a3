//! End-to-end tests over real WebSocket connections

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{eventually, start_hub, test_config};
use polyhub::action::{ActionContext, ActionHandler, EchoHandler, LogHandler};
use polyhub::metrics::reason;
use polyhub::peer::{PeerProfile, Role, TransportKind};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Treats a payload naming a role as a request to be identified as that role
struct RoleClaim;

#[async_trait]
impl ActionHandler for RoleClaim {
    async fn handle(&self, ctx: ActionContext, payload: Bytes) {
        let Ok(role) = String::from_utf8_lossy(&payload).parse::<Role>() else {
            return;
        };
        let answer = match ctx.identify(role, PeerProfile::default()).await {
            Ok(()) => "identified",
            Err(_) => "refused",
        };
        let _ = ctx.reply(answer).await;
    }
}

async fn claim(client: &mut Client, role: &str) -> Message {
    client.send(Message::Text(role.to_string())).await.unwrap();
    timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

/// Read until the server closes, ignoring anything else it sends
async fn expect_closed(client: &mut Client) {
    let closed = timeout(Duration::from_secs(5), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the connection");
}

#[tokio::test]
async fn test_echo_round_trip() {
    let hub = start_hub(test_config("echo-hub"), Arc::new(EchoHandler)).await;
    let (mut client, _) = connect_async(hub.ws_url()).await.unwrap();

    client.send(Message::Text("hello\r\nthere \n".to_string())).await.unwrap();

    let reply = timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::Text("hello there".to_string()));

    client.close(None).await.unwrap();
    let directory = Arc::clone(&hub.directory);
    eventually("peer removal", || {
        let directory = Arc::clone(&directory);
        async move { directory.is_empty().await }
    })
    .await;

    assert_eq!(hub.metrics.connections_total(), 1);
    hub.stop().await;
}

#[tokio::test]
async fn test_handshake_metadata_is_recorded() {
    let hub = start_hub(test_config("meta-hub"), Arc::new(LogHandler)).await;

    let mut request = hub.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("user-agent", HeaderValue::from_static("integration/1.0"));
    request
        .headers_mut()
        .insert("accept-language", HeaderValue::from_static("pt-BR,pt;q=0.9"));
    let (_client, _) = connect_async(request).await.unwrap();

    let directory = Arc::clone(&hub.directory);
    eventually("peer admission", || {
        let directory = Arc::clone(&directory);
        async move { directory.count(Role::Undefined).await == 1 }
    })
    .await;

    let peer = &hub.directory.enumerate(Role::Undefined).await[0];
    assert_eq!(peer.kind(), TransportKind::WebSocket);
    assert_eq!(peer.meta().user_agent, "integration/1.0");
    assert_eq!(peer.meta().locale, "pt-BR");
    assert!(peer.addr().is_some());
    assert!(!peer.is_identified());

    hub.stop().await;
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let hub = start_hub(test_config("limit-hub"), Arc::new(EchoHandler)).await;
    let (mut client, _) = connect_async(hub.ws_url()).await.unwrap();

    client.send(Message::Text("x".repeat(600))).await.unwrap();
    expect_closed(&mut client).await;

    let directory = Arc::clone(&hub.directory);
    eventually("peer removal", || {
        let directory = Arc::clone(&directory);
        async move { directory.is_empty().await }
    })
    .await;
    assert_eq!(hub.metrics.frames_in(), 0);

    hub.stop().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_peers() {
    let hub = start_hub(test_config("drain-hub"), Arc::new(LogHandler)).await;
    let (mut client, _) = connect_async(hub.ws_url()).await.unwrap();

    let directory = Arc::clone(&hub.directory);
    eventually("peer admission", || {
        let directory = Arc::clone(&directory);
        async move { directory.len().await == 1 }
    })
    .await;

    let directory = Arc::clone(&hub.directory);
    hub.stop().await;

    expect_closed(&mut client).await;
    assert!(directory.is_empty().await);
    assert!(directory.is_closed().await);
}

#[tokio::test]
async fn test_brother_link_registers_as_server() {
    let hub_a = start_hub(test_config("hub-a"), Arc::new(LogHandler)).await;

    let mut config_b = test_config("hub-b");
    config_b
        .brothers
        .insert("hub-a".to_string(), hub_a.http_addr.to_string());
    let hub_b = start_hub(config_b, Arc::new(LogHandler)).await;

    let directory_b = Arc::clone(&hub_b.directory);
    eventually("brother link", || {
        let directory = Arc::clone(&directory_b);
        async move { directory.exists("hub-a", Role::Server).await }
    })
    .await;

    let link = hub_b.directory.find("hub-a", Role::Server).await.unwrap();
    assert_eq!(link.kind(), TransportKind::WebSocketClient);
    assert!(link.is_identified());

    // the dialed side sees an ordinary, not yet identified connection
    let directory_a = Arc::clone(&hub_a.directory);
    eventually("inbound link", || {
        let directory = Arc::clone(&directory_a);
        async move { directory.count(Role::Undefined).await == 1 }
    })
    .await;
    let inbound = &hub_a.directory.enumerate(Role::Undefined).await[0];
    assert!(inbound.meta().user_agent.starts_with("polyhub/"));

    hub_b.stop().await;
    hub_a.stop().await;
}

#[tokio::test]
async fn test_identified_websocket_peers_are_bound_by_user_ceiling() {
    let mut config = test_config("claim-hub");
    config.limits.max_users = 1;
    config.limits.max_incoming = 10;
    let hub = start_hub(config, Arc::new(RoleClaim)).await;

    let (mut first, _) = connect_async(hub.ws_url()).await.unwrap();
    let (mut second, _) = connect_async(hub.ws_url()).await.unwrap();

    assert_eq!(claim(&mut first, "user").await, Message::Text("identified".to_string()));
    assert_eq!(claim(&mut second, "user").await, Message::Text("refused".to_string()));

    assert_eq!(hub.directory.count(Role::User).await, 1);
    assert_eq!(hub.directory.count(Role::Undefined).await, 1);
    assert_eq!(hub.metrics.rejections(reason::CAPACITY), 1);

    // other ceilings are independent of the full user bucket
    assert_eq!(claim(&mut second, "monitor").await, Message::Text("identified".to_string()));
    assert_eq!(hub.directory.count(Role::Monitor).await, 1);
    assert_eq!(hub.directory.count(Role::Undefined).await, 0);

    hub.stop().await;
}
