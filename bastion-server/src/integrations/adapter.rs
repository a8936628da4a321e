// Helper-process adapter trait
//
// The chat platform is reached through an external CLI. Implementors of
// `IntegrationAdapter` run it either once per request (`call`) or as a
// long-lived event stream (`subscribe`).

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use super::error::IntegrationResult;

/// Interface to an external CLI integration.
///
/// Arguments are always passed via `Command::arg()`, never through a shell,
/// so message text and ids cannot inject commands.
///
/// # Error Isolation
///
/// A failing helper never takes the coordinator down: every failure is an
/// `IntegrationError` that the caller maps to a degraded outcome.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Run the CLI once and return its stdout.
    async fn call(&self, args: &[&str]) -> IntegrationResult<String>;

    /// Start a long-running CLI and stream its stdout lines.
    ///
    /// The returned channel is bounded by `AdapterConfig::channel_capacity`;
    /// lines arriving while it is full are dropped with a warning. The
    /// process is restarted on crash up to `max_restarts` times.
    async fn subscribe(&self, args: &[&str]) -> IntegrationResult<Receiver<String>>;

    /// Stop the streaming process (SIGTERM, then SIGKILL after the
    /// shutdown timeout). Idempotent.
    async fn stop(&self) -> IntegrationResult<()>;

    /// `true` while a subscription process is running
    fn is_healthy(&self) -> bool;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Configuration for adapter behavior
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Maximum number of restart attempts before giving up
    pub max_restarts: u8,

    /// Capacity of the output channel
    pub channel_capacity: usize,

    /// Process liveness poll interval in seconds
    pub health_check_interval_secs: u64,

    /// Timeout for one-shot calls in seconds
    pub call_timeout_secs: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            channel_capacity: 100,
            health_check_interval_secs: 5,
            call_timeout_secs: 15,
            shutdown_timeout_secs: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_config_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.max_restarts, 3);
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.call_timeout_secs, 15);
    }
}
