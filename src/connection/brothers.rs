//! Links to sibling servers
//!
//! Each configured brother is dialed over WebSocket and registered as a
//! `Server` peer under its configured name. A supervisor re-dials brothers
//! whose link has gone down.

use anyhow::Context;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registration::Registrar;
use crate::config::Config;
use crate::peer::{PeerProfile, Role};
use crate::pump::{InboundExit, KeepaliveSettings};
use crate::transport::{client, Handshake, WsClientTransport};
use crate::Result;

/// Dial one brother and serve the link until it ends
pub async fn connect_brother(
    registrar: &Registrar,
    name: &str,
    addr: SocketAddr,
    handshake_timeout: Duration,
    settings: KeepaliveSettings,
) -> Result<InboundExit> {
    let transport = WsClientTransport::dial(addr, handshake_timeout)
        .await
        .with_context(|| format!("Failed to dial brother {} at {}", name, addr))?;

    let handshake = Handshake {
        key: Some(name.to_string()),
        addr: Some(addr),
        user_agent: Some(client::CLIENT_AGENT.to_string()),
        locale: None,
    };

    let mut admitted = registrar.admit(Box::new(transport), handshake, settings).await?;
    if let Err(e) = admitted.identify(Role::Server, PeerProfile::default()).await {
        admitted.reject().await;
        return Err(e.into());
    }

    info!("Linked to brother {} at {}", name, addr);
    Ok(admitted.run().await)
}

/// Keep every configured brother linked until shutdown
pub async fn supervise(
    config: Arc<Config>,
    registrar: Registrar,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if config.brothers.is_empty() {
        debug!("No brothers configured");
        return;
    }

    let settings = KeepaliveSettings::from_config(&config.keepalive);
    let mut links: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut ticker = tokio::time::interval(config.tcp.scaling_check_period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.recv() => {
                debug!("Brother supervisor stopping");
                break;
            }
        }

        for name in config.brothers.keys() {
            if links.get(name).is_some_and(|link| !link.is_finished()) {
                continue;
            }

            let Some(addr) = config.brother_addr(name) else {
                warn!("Brother {} has no resolvable address", name);
                continue;
            };

            let registrar = registrar.clone();
            let brother = name.clone();
            let handshake_timeout = config.http.handshake_timeout;
            links.insert(
                name.clone(),
                tokio::spawn(async move {
                    match connect_brother(&registrar, &brother, addr, handshake_timeout, settings).await {
                        Ok(exit) => info!("Link to brother {} ended: {:?}", brother, exit),
                        Err(e) => warn!("Brother {} unavailable: {:#}", brother, e),
                    }
                }),
            );
        }
    }
}
