#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use polyhub::action::ActionHandler;
use polyhub::config::Config;
use polyhub::directory::Directory;
use polyhub::metrics::HubMetrics;
use polyhub::ConnectionManager;

/// A hub serving on ephemeral ports
pub struct TestHub {
    pub http_addr: SocketAddr,
    pub tcp_addr: Option<SocketAddr>,
    pub directory: Arc<Directory>,
    pub metrics: Arc<HubMetrics>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

pub fn test_config(name: &str) -> Config {
    let mut config = Config::default();
    config.server.name = name.to_string();
    config.server.http_addr = "127.0.0.1:0".parse().unwrap();
    config.server.tcp_addr = "127.0.0.1:0".parse().unwrap();
    config.server.shutdown_timeout = Duration::from_secs(2);
    config
}

pub async fn start_hub(config: Config, handler: Arc<dyn ActionHandler>) -> TestHub {
    let mut manager = ConnectionManager::new(Arc::new(config), handler);
    manager.bind().await.unwrap();

    let http_addr = manager.http_addr().unwrap();
    let tcp_addr = manager.tcp_addr();
    let directory = Arc::clone(manager.directory());
    let metrics = Arc::clone(manager.metrics());
    let (stop, stopped) = oneshot::channel();

    let task = tokio::spawn(async move {
        tokio::select! {
            result = manager.serve() => result.unwrap(),
            _ = stopped => {}
        }
        manager.shutdown().await.unwrap();
    });

    TestHub {
        http_addr,
        tcp_addr,
        directory,
        metrics,
        stop: Some(stop),
        task,
    }
}

impl TestHub {
    /// Run the shutdown sequence and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap();
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.http_addr)
    }
}

/// Poll until `check` holds, panicking after two seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
