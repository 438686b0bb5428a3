//! Connection Manager Implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::brothers;
use super::registration::Registrar;
use crate::action::ActionHandler;
use crate::config::Config;
use crate::directory::Directory;
use crate::management::{AppState, ManagementApi};
use crate::metrics::HubMetrics;
use crate::peer::{PeerProfile, Role};
use crate::pump::KeepaliveSettings;
use crate::transport::{Handshake, TcpTransport, WebSocketTransport};
use crate::Result;

/// Owns the listeners and the directory of one hub
pub struct ConnectionManager {
    config: Arc<Config>,
    directory: Arc<Directory>,
    metrics: Arc<HubMetrics>,
    registrar: Registrar,
    http_listener: Option<TcpListener>,
    tcp_listener: Option<TcpListener>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: SystemTime,
}

#[derive(Clone)]
struct UpgradeState {
    registrar: Registrar,
    config: Arc<Config>,
    shutdown_flag: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>, handler: Arc<dyn ActionHandler>) -> Self {
        let metrics = Arc::new(HubMetrics::new());
        let directory = Arc::new(Directory::new(config.limits, Arc::clone(&metrics)));
        let registrar = Registrar::new(
            Arc::clone(&directory),
            handler,
            config.keepalive.clone(),
            Arc::clone(&metrics),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            directory,
            metrics,
            registrar,
            http_listener: None,
            tcp_listener: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            start_time: SystemTime::now(),
        }
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// Status routes plus the WebSocket upgrade endpoint
    pub fn router(&self) -> Router {
        let app_state = AppState {
            config: Arc::clone(&self.config),
            directory: Arc::clone(&self.directory),
            metrics: Arc::clone(&self.metrics),
            start_time: self.start_time,
        };
        let upgrade_state = UpgradeState {
            registrar: self.registrar.clone(),
            config: Arc::clone(&self.config),
            shutdown_flag: Arc::clone(&self.shutdown_flag),
        };

        ManagementApi::create_router(app_state).merge(
            Router::new()
                .route("/ws", get(upgrade_handler))
                .with_state(upgrade_state),
        )
    }

    /// Bind the HTTP listener and, when enabled, the framed TCP listener
    pub async fn bind(&mut self) -> Result<()> {
        let http_addr = self.config.server.http_addr;
        info!("Binding HTTP listener to {}", http_addr);
        let listener = TcpListener::bind(http_addr).await?;
        info!("Successfully bound to {}", listener.local_addr()?);
        self.http_listener = Some(listener);

        if self.config.server.tcp_enabled {
            let tcp_addr = self.config.server.tcp_addr;
            info!("Binding TCP listener to {}", tcp_addr);
            let listener = TcpListener::bind(tcp_addr).await?;
            info!("Successfully bound to {}", listener.local_addr()?);
            self.tcp_listener = Some(listener);
        }

        Ok(())
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Bind and serve until shutdown
    pub async fn start(&mut self) -> Result<()> {
        if self.http_listener.is_none() {
            self.bind().await?;
        }
        self.serve().await
    }

    /// Serve on previously bound listeners until shutdown is initiated
    pub async fn serve(&mut self) -> Result<()> {
        let http_listener = self
            .http_listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;
        let tcp_listener = self.tcp_listener.take();

        let app = self.router();
        let http = async move {
            axum::serve(
                http_listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
        };

        let tcp_settings = KeepaliveSettings::for_tcp(&self.config.keepalive, &self.config.tcp);
        let tcp = accept_tcp(
            tcp_listener,
            self.registrar.clone(),
            tcp_settings,
            Arc::clone(&self.shutdown_flag),
        );

        tokio::spawn(brothers::supervise(
            Arc::clone(&self.config),
            self.registrar.clone(),
            self.shutdown_tx.subscribe(),
        ));

        info!("Starting connection acceptance");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = http => {
                if let Err(e) = result {
                    error!("HTTP listener failed: {}", e);
                    return Err(e.into());
                }
            }
            _ = tcp => {}
            _ = shutdown_rx.recv() => {
                info!("Received shutdown signal, stopping connection acceptance");
            }
        }

        info!("Connection acceptance stopped");
        Ok(())
    }

    /// Stop admitting and fire every registered peer's termination signal
    pub async fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No listeners for shutdown signal: {}", e);
        }

        let peers = self.directory.close().await;
        info!("Terminating {} connected peers", peers.len());
        for peer in peers {
            peer.terminate();
        }
    }

    /// Get a shutdown receiver for external components
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub async fn active_peers(&self) -> usize {
        self.directory.len().await
    }

    /// Wait for the directory to drain, up to `server.shutdown_timeout`
    pub async fn wait_for_peers_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} peers to disconnect (timeout: {:?})",
            self.active_peers().await,
            shutdown_timeout
        );

        while self.active_peers().await > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.active_peers().await;
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All peers disconnected in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} peers still registered",
                elapsed, remaining
            );
            for peer in self.directory.snapshot().await.peers {
                warn!("Still registered: {} ({})", peer.name, peer.role);
            }
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown().await;
        self.wait_for_peers_to_close().await
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<UpgradeState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if state.shutdown_flag.load(Ordering::Relaxed) {
        debug!("Rejecting WebSocket upgrade from {} due to shutdown", addr);
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let handshake = handshake_from_headers(&headers, addr);
    let settings = KeepaliveSettings::from_config(&state.config.keepalive);
    let registrar = state.registrar;

    // protocol-level ceiling; the inbound pump enforces max_message_size
    ws.write_buffer_size(state.config.http.write_buffer_size)
        .max_message_size(state.config.http.read_buffer_size)
        .on_upgrade(move |socket| async move {
            let transport = Box::new(WebSocketTransport::new(socket));
            if let Err(e) = registrar.register(transport, handshake, settings).await {
                debug!("WebSocket from {} not registered: {}", addr, e);
            }
        })
}

fn handshake_from_headers(headers: &HeaderMap, addr: SocketAddr) -> Handshake {
    let value = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    // first language tag, without its quality value
    let locale = value(header::ACCEPT_LANGUAGE).and_then(|langs| {
        langs
            .split(',')
            .next()
            .and_then(|tag| tag.split(';').next())
            .map(|tag| tag.trim().to_string())
    });

    Handshake {
        key: value(header::SEC_WEBSOCKET_KEY),
        addr: Some(addr),
        user_agent: value(header::USER_AGENT),
        locale,
    }
}

async fn accept_tcp(
    listener: Option<TcpListener>,
    registrar: Registrar,
    settings: KeepaliveSettings,
    shutdown_flag: Arc<AtomicBool>,
) {
    let Some(listener) = listener else {
        debug!("TCP listener disabled");
        return std::future::pending().await;
    };

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting TCP connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        if shutdown_flag.load(Ordering::Relaxed) {
            debug!("Rejecting TCP connection from {} due to shutdown", addr);
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let transport = Box::new(TcpTransport::new(stream, settings.max_message_size));
        let registrar = registrar.clone();
        tokio::spawn(async move {
            let handshake = Handshake {
                addr: Some(addr),
                ..Handshake::default()
            };
            let Ok(mut admitted) = registrar.admit(transport, handshake, settings).await else {
                return;
            };
            if let Err(e) = admitted.identify(Role::Incoming, PeerProfile::default()).await {
                warn!("TCP peer from {} refused: {}", addr, e);
                admitted.reject().await;
                return;
            }
            admitted.run().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn handshake_reads_key_agent_and_first_language() {
        let mut headers = HeaderMap::new();
        headers.insert(header::SEC_WEBSOCKET_KEY, HeaderValue::from_static("abc=="));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("test-agent"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("de-CH;q=0.9, en;q=0.8"),
        );
        let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();

        let handshake = handshake_from_headers(&headers, addr);
        assert_eq!(handshake.identity(), "abc==");
        assert_eq!(handshake.addr, Some(addr));

        let meta = handshake.meta();
        assert_eq!(meta.user_agent, "test-agent");
        assert_eq!(meta.locale, "de-CH");
    }

    #[test]
    fn missing_headers_fall_back_to_sentinel() {
        let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let meta = handshake_from_headers(&HeaderMap::new(), addr).meta();
        assert_eq!(meta.user_agent, "n/a");
        assert_eq!(meta.locale, "n/a");
    }
}
