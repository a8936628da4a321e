// Bridge process lifecycle
//
// One-shot calls with a timeout, and a supervised streaming process that is
// restarted with exponential backoff (1s, 2s, 4s, capped at 8s) and stopped
// with SIGTERM before SIGKILL.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::adapter::AdapterConfig;
use super::error::{IntegrationError, IntegrationResult};

/// Runs the helper CLI, either once or as a restarted stream.
///
/// Health and restart count are atomics so they can be read from other
/// tasks while `start` owns the manager.
pub struct SubprocessManager {
    command: String,
    config: AdapterConfig,
    child: Option<Child>,
    /// Reset whenever the stream produces a line
    restart_count: Arc<AtomicU8>,
    output_tx: Sender<String>,
    is_healthy: Arc<AtomicBool>,
}

impl SubprocessManager {
    /// Returns the manager and the receiving end of its output channel.
    pub fn new(command: &str, config: AdapterConfig) -> (Self, Receiver<String>) {
        let (output_tx, output_rx) = mpsc::channel(config.channel_capacity);

        let manager = Self {
            command: command.to_string(),
            config,
            child: None,
            restart_count: Arc::new(AtomicU8::new(0)),
            output_tx,
            is_healthy: Arc::new(AtomicBool::new(false)),
        };

        (manager, output_rx)
    }

    /// Run the command to completion and return its stdout.
    pub async fn call(&self, args: &[&str]) -> IntegrationResult<String> {
        let output = timeout(
            Duration::from_secs(self.config.call_timeout_secs),
            Command::new(&self.command)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| IntegrationError::Timeout {
            operation: format!("{} {}", self.command, args.first().unwrap_or(&"")),
            duration_secs: self.config.call_timeout_secs,
        })?
        .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(IntegrationError::ProcessExited {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Run a streaming process until `shutdown` is cancelled, restarting it
    /// when it exits on its own.
    ///
    /// Returns `Ok(())` after a requested shutdown and
    /// `MaxRestartsExceeded` when the process keeps dying.
    pub async fn start(
        &mut self,
        args: &[&str],
        shutdown: CancellationToken,
    ) -> IntegrationResult<()> {
        let mut last_error: Option<String> = None;

        loop {
            let current_restarts = self.restart_count.load(Ordering::Relaxed);

            if current_restarts >= self.config.max_restarts {
                self.is_healthy.store(false, Ordering::Relaxed);
                return Err(IntegrationError::MaxRestartsExceeded {
                    attempts: current_restarts,
                    last_error: last_error.unwrap_or_else(|| "Unknown error".to_string()),
                });
            }

            if current_restarts > 0 {
                let backoff = Self::calculate_backoff(current_restarts);
                log::info!(
                    "Bridge: {} exited, restarting in {:?} (attempt {}/{})",
                    self.command,
                    backoff,
                    current_restarts + 1,
                    self.config.max_restarts
                );
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }

            let child = match self.spawn_subprocess(args) {
                Ok(child) => child,
                Err(e @ IntegrationError::CliNotFound(_)) => {
                    // Restarting cannot fix a missing binary
                    self.is_healthy.store(false, Ordering::Relaxed);
                    return Err(e);
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    self.restart_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            self.child = Some(child);
            self.is_healthy.store(true, Ordering::Relaxed);

            match self.read_loop(&shutdown).await {
                Ok(()) | Err(IntegrationError::ShutdownRequested) => {
                    self.terminate().await;
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Bridge: {} stream failed: {}", self.command, e);
                    self.is_healthy.store(false, Ordering::Relaxed);
                    self.child = None;
                    last_error = Some(e.to_string());
                    self.restart_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn spawn_subprocess(&self, args: &[&str]) -> IntegrationResult<Child> {
        Command::new(&self.command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, e: std::io::Error) -> IntegrationError {
        if e.kind() == std::io::ErrorKind::NotFound {
            IntegrationError::CliNotFound(self.command.clone())
        } else {
            IntegrationError::SpawnFailed(e.to_string())
        }
    }

    /// Forward stdout lines until the process exits or shutdown is requested.
    async fn read_loop(&mut self, shutdown: &CancellationToken) -> IntegrationResult<()> {
        let child = self.child.as_mut().ok_or(IntegrationError::NotRunning)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IntegrationError::IoError("No stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| IntegrationError::IoError("No stderr".to_string()))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stderr_open = true;

        let mut health_check_interval =
            interval(Duration::from_secs(self.config.health_check_interval_secs));

        loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            self.restart_count.store(0, Ordering::Relaxed);
                            if self.output_tx.try_send(line).is_err() {
                                log::warn!("Bridge: output channel full, dropping line");
                            }
                        }
                        Ok(None) => {
                            return Err(IntegrationError::ProcessExited {
                                code: 0,
                                stderr: "stream ended".to_string(),
                            });
                        }
                        Err(e) => return Err(IntegrationError::IoError(e.to_string())),
                    }
                }

                line = stderr_reader.next_line(), if stderr_open => {
                    match line {
                        Ok(Some(line)) => log::warn!("Bridge: {} stderr: {}", self.command, line),
                        Ok(None) => stderr_open = false,
                        Err(e) => {
                            log::warn!("Bridge: error reading stderr: {}", e);
                            stderr_open = false;
                        }
                    }
                }

                _ = health_check_interval.tick() => {
                    if let Some(ref mut child) = self.child {
                        match child.try_wait() {
                            Ok(Some(status)) => {
                                return Err(IntegrationError::ProcessExited {
                                    code: status.code().unwrap_or(-1),
                                    stderr: "exited during health check".to_string(),
                                });
                            }
                            Ok(None) => self.is_healthy.store(true, Ordering::Relaxed),
                            Err(e) => log::warn!("Bridge: health check error: {}", e),
                        }
                    }
                }

                _ = shutdown.cancelled() => {
                    return Err(IntegrationError::ShutdownRequested);
                }
            }
        }
    }

    /// SIGTERM, wait `shutdown_timeout_secs`, then SIGKILL.
    async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.is_healthy.store(false, Ordering::Relaxed);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match timeout(
            Duration::from_secs(self.config.shutdown_timeout_secs),
            child.wait(),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("Bridge: error waiting for {}: {}", self.command, e),
            Err(_) => {
                log::warn!(
                    "Bridge: {} didn't exit gracefully, sending SIGKILL",
                    self.command
                );
                let _ = child.kill().await;
            }
        }
    }

    /// 1s, 2s, 4s for restart counts 1, 2, 3; 8s beyond.
    fn calculate_backoff(restart_count: u8) -> Duration {
        let secs = 1u64 << restart_count.saturating_sub(1).min(3);
        Duration::from_secs(secs)
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::Relaxed)
    }

    /// Shared flag, readable after `start` has taken the manager
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        self.is_healthy.clone()
    }

    pub fn restart_count(&self) -> u8 {
        self.restart_count.load(Ordering::Relaxed)
    }
}

impl Drop for SubprocessManager {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(SubprocessManager::calculate_backoff(1), Duration::from_secs(1));
        assert_eq!(SubprocessManager::calculate_backoff(2), Duration::from_secs(2));
        assert_eq!(SubprocessManager::calculate_backoff(3), Duration::from_secs(4));
        assert_eq!(SubprocessManager::calculate_backoff(4), Duration::from_secs(8));
        assert_eq!(SubprocessManager::calculate_backoff(9), Duration::from_secs(8));
    }

    #[test]
    fn test_initial_state() {
        let (manager, _rx) = SubprocessManager::new("bastion-bridge", AdapterConfig::default());
        assert!(!manager.is_healthy());
        assert_eq!(manager.restart_count(), 0);
    }

    #[tokio::test]
    async fn test_call_nonexistent_command() {
        let (manager, _rx) =
            SubprocessManager::new("nonexistent_bridge_xyz_123", AdapterConfig::default());
        let result = manager.call(&["send"]).await;
        assert!(matches!(result, Err(IntegrationError::CliNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_echo() {
        let (manager, _rx) = SubprocessManager::new("echo", AdapterConfig::default());
        let result = manager.call(&["{\"ok\":", "true}"]).await.unwrap();
        assert_eq!(result.trim(), "{\"ok\": true}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_reports_exit_code() {
        let (manager, _rx) = SubprocessManager::new("false", AdapterConfig::default());
        let result = manager.call(&[]).await;
        assert!(matches!(
            result,
            Err(IntegrationError::ProcessExited { code: 1, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_forwards_lines_and_stops_on_cancel() {
        let config = AdapterConfig {
            max_restarts: 1,
            ..Default::default()
        };
        let (mut manager, mut rx) = SubprocessManager::new("sh", config);
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            manager
                .start(&["-c", "echo first; echo second; sleep 30"], token)
                .await
        });

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));

        stop.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stream_gives_up_on_missing_binary() {
        let (mut manager, _rx) =
            SubprocessManager::new("nonexistent_bridge_xyz_123", AdapterConfig::default());
        let result = manager
            .start(&["subscribe"], CancellationToken::new())
            .await;
        assert!(matches!(result, Err(IntegrationError::CliNotFound(_))));
    }
}
