// Real adapter for the `bastion-bridge` helper CLI.
//
// One-shot requests spawn a fresh process each; the event stream is a
// single supervised process owned by a background task.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::adapter::{AdapterConfig, IntegrationAdapter};
use super::error::IntegrationResult;
use super::subprocess::SubprocessManager;

pub const DEFAULT_BRIDGE_COMMAND: &str = "bastion-bridge";

struct Subscription {
    shutdown: CancellationToken,
    healthy: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct BridgeAdapter {
    command: String,
    config: AdapterConfig,
    subscription: Mutex<Option<Subscription>>,
}

impl BridgeAdapter {
    pub fn new(command: &str) -> Self {
        Self::with_config(command, AdapterConfig::default())
    }

    pub fn with_config(command: &str, config: AdapterConfig) -> Self {
        Self {
            command: command.to_string(),
            config,
            subscription: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn take_subscription(&self) -> Option<Subscription> {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Default for BridgeAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE_COMMAND)
    }
}

#[async_trait]
impl IntegrationAdapter for BridgeAdapter {
    async fn call(&self, args: &[&str]) -> IntegrationResult<String> {
        let (manager, _rx) = SubprocessManager::new(&self.command, self.config.clone());
        manager.call(args).await
    }

    async fn subscribe(&self, args: &[&str]) -> IntegrationResult<Receiver<String>> {
        // A second subscribe replaces the running stream
        self.stop().await?;

        let (mut manager, rx) = SubprocessManager::new(&self.command, self.config.clone());
        let healthy = manager.health_flag();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let command = self.command.clone();
        let args_owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();

        let task = tokio::spawn(async move {
            let args_refs: Vec<&str> = args_owned.iter().map(|s| s.as_str()).collect();
            match manager.start(&args_refs, token).await {
                Ok(()) => log::info!("Bridge: {} stream stopped", command),
                Err(e) => log::error!("Bridge: {} stream abandoned: {}", command, e),
            }
        });

        *self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Subscription {
            shutdown,
            healthy,
            task,
        });

        Ok(rx)
    }

    async fn stop(&self) -> IntegrationResult<()> {
        if let Some(subscription) = self.take_subscription() {
            subscription.shutdown.cancel();
            if let Err(e) = subscription.task.await {
                log::warn!("Bridge: stream task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.healthy.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "Bridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::IntegrationError;

    #[test]
    fn test_adapter_defaults() {
        let adapter = BridgeAdapter::default();
        assert_eq!(adapter.command(), "bastion-bridge");
        assert_eq!(adapter.name(), "Bridge");
        assert!(!adapter.is_healthy());
    }

    #[tokio::test]
    async fn test_call_cli_not_found() {
        let adapter = BridgeAdapter::new("nonexistent_bridge_xyz_123");
        let result = adapter.call(&["role", "--role", "1"]).await;
        assert!(matches!(result, Err(IntegrationError::CliNotFound(_))));
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let adapter = BridgeAdapter::default();
        assert!(adapter.stop().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subscribe_streams_and_stops() {
        let adapter = BridgeAdapter::new("sh");
        let mut rx = adapter
            .subscribe(&["-c", r#"echo '{"type":"heartbeat"}'; sleep 30"#])
            .await
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some(r#"{"type":"heartbeat"}"#));
        assert!(adapter.is_healthy());

        adapter.stop().await.unwrap();
        assert!(!adapter.is_healthy());
    }
}
