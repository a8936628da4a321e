//! Bastion - live defense panel and alert coordinator

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bastion_server::{
    clock::{Clock, SystemClock},
    config::{CoordinatorConfig, SchedulerConfig},
    integrations::{
        subscribe_events, BridgeAdapter, BridgeClient, IntegrationAdapter, DEFAULT_BRIDGE_COMMAND,
    },
    ledger::PingLedger,
    notifications::Dispatcher,
    panel::{PanelCoordinator, PanelScheduler, SupervisorExit},
    persistence::{GroupAffiliation, PersistenceManager, StorageConfig},
    presence::PresenceSampler,
    registry::GroupRegistry,
};
use bastion_utils::{ChannelId, RoleId};

/// Setting keys that override the channel options
const PANEL_CHANNEL_KEY: &str = "PANEL_CHANNEL_ID";
const ALERT_CHANNEL_KEY: &str = "ALERT_CHANNEL_ID";
const EVENT_QUEUE_CAPACITY: usize = 256;
/// Longest wait for event handlers still running at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug, Clone)]
#[clap(name = "bastion", version, about)]
struct Args {
    /// Bridge helper used to reach the chat platform
    #[clap(long, env = "BASTION_BRIDGE", default_value = DEFAULT_BRIDGE_COMMAND)]
    bridge_command: String,

    /// PostgreSQL URL of the durable store
    #[clap(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// SQLite file used when PostgreSQL is not configured or unreachable
    #[clap(long, env = "BASTION_SQLITE_PATH", default_value = "bastion.db")]
    sqlite_path: PathBuf,

    /// Channel holding the status panel
    #[clap(long, env = "PANEL_CHANNEL_ID")]
    panel_channel: String,

    /// Channel receiving alert incidents
    #[clap(long, env = "ALERT_CHANNEL_ID")]
    alert_channel: String,

    /// Role mentioned when a second defense is called
    #[clap(long, env = "ESCALATION_ROLE_ID")]
    escalation_role: Option<String>,

    /// JSON list of groups used when the store has none
    #[clap(long, env = "BASTION_FALLBACK_GROUPS")]
    fallback_groups: Option<PathBuf>,

    #[clap(long, env = "BASTION_COOLDOWN_SECS", default_value = "15")]
    cooldown_secs: u64,

    #[clap(long, env = "BASTION_RENDER_INTERVAL_SECS", default_value = "60")]
    render_interval_secs: u64,

    #[clap(long, env = "BASTION_RENDER_MIN_SPACING_SECS", default_value = "5")]
    render_min_spacing_secs: u64,

    #[clap(long, env = "BASTION_RENDER_BACKOFF_CEILING_SECS", default_value = "3600")]
    render_backoff_ceiling_secs: u64,

    #[clap(long, env = "BASTION_PRESENCE_MIN_INTERVAL_SECS", default_value = "600")]
    presence_min_interval_secs: u64,

    #[clap(long, env = "BASTION_EVENT_DEBOUNCE_SECS", default_value = "600")]
    event_debounce_secs: u64,

    #[clap(long, env = "BASTION_EVIDENCE_TIMEOUT_SECS", default_value = "60")]
    evidence_timeout_secs: u64,

    /// Incidents older than this are forgotten, resolved or not
    #[clap(long, env = "BASTION_INCIDENT_LIFETIME_HOURS", default_value = "24")]
    incident_lifetime_hours: u64,

    /// Log level for bastion crates; RUST_LOG takes precedence
    #[clap(long, env = "BASTION_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            database_url: self.database_url.clone(),
            sqlite_path: Some(self.sqlite_path.clone()),
        }
    }

    /// Options, with channel ids overridden by persisted settings
    async fn coordinator_config(&self, persistence: &PersistenceManager) -> CoordinatorConfig {
        let panel = persistence
            .setting_or(PANEL_CHANNEL_KEY, &self.panel_channel)
            .await;
        let alert = persistence
            .setting_or(ALERT_CHANNEL_KEY, &self.alert_channel)
            .await;

        CoordinatorConfig {
            escalation_role: self.escalation_role.as_deref().map(RoleId::new),
            cooldown: Duration::from_secs(self.cooldown_secs),
            presence_min_interval: Duration::from_secs(self.presence_min_interval_secs),
            event_debounce: Duration::from_secs(self.event_debounce_secs),
            evidence_timeout: Duration::from_secs(self.evidence_timeout_secs),
            incident_lifetime: Duration::from_secs(self.incident_lifetime_hours.saturating_mul(3600)),
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(self.render_interval_secs),
                min_spacing: Duration::from_secs(self.render_min_spacing_secs),
                backoff_ceiling: Duration::from_secs(self.render_backoff_ceiling_secs),
                ..SchedulerConfig::default()
            },
            ..CoordinatorConfig::new(ChannelId::new(panel), ChannelId::new(alert))
        }
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("bastion={},bastion_server={},warn", level, level).into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_fallback_groups(path: Option<&Path>) -> anyhow::Result<Vec<GroupAffiliation>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fallback groups from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid fallback groups file {}", path.display()))
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging(&args.log_level);

    let fallback = load_fallback_groups(args.fallback_groups.as_deref())?;
    let persistence = Arc::new(PersistenceManager::connect(&args.storage_config()).await);
    let config = args.coordinator_config(&persistence).await;

    info!("======================================");
    info!("  Bastion defense coordinator");
    info!("======================================");
    info!("Store: {}", persistence.backend().unwrap_or("none"));
    info!("Bridge: {}", args.bridge_command);
    info!("Panel channel: {}", config.panel_channel);
    info!("Alert channel: {}", config.alert_channel);
    info!("Cooldown: {:?}", config.cooldown);
    info!("Render interval: {:?}", config.scheduler.interval);
    info!("======================================");

    let adapter = Arc::new(BridgeAdapter::new(&args.bridge_command));
    let client = Arc::new(BridgeClient::new(adapter.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let registry = Arc::new(GroupRegistry::new(persistence.clone(), fallback));
    let groups = registry.reload().await;
    if groups.is_empty() {
        warn!("No groups registered; the panel will be empty");
    }

    let ledger = Arc::new(PingLedger::new(persistence.clone()));
    ledger.hydrate(&groups.names(), clock.now()).await;

    let presence = Arc::new(PresenceSampler::new(
        client.clone(),
        registry.clone(),
        clock.clone(),
        config.presence_min_interval,
    ));
    if let Err(e) = presence.refresh(true).await {
        warn!("Presence bootstrap failed, starting with zero counts: {}", e);
    }

    let coordinator = Arc::new(PanelCoordinator::new(
        client.clone(),
        registry.clone(),
        presence,
        ledger.clone(),
        clock.clone(),
        config.panel_channel.clone(),
        config.history_scan_limit,
        config.max_displayed_groups,
    ));
    let (scheduler, panel) = PanelScheduler::new(coordinator, config.scheduler.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        client,
        registry,
        ledger,
        panel,
        clock,
        config,
    ));

    let shutdown = CancellationToken::new();
    let mut scheduler_task = tokio::spawn(Arc::new(scheduler).supervise(shutdown.clone()));

    let mut events = subscribe_events(adapter.as_ref(), EVENT_QUEUE_CAPACITY)
        .await
        .context("Failed to subscribe to gateway events")?;
    info!("Listening for gateway events");

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut failure = None;
    let mut scheduler_done = false;

    loop {
        tokio::select! {
            _ = &mut signal => {
                info!("Shutdown requested");
                break;
            }
            exit = &mut scheduler_task => {
                scheduler_done = true;
                error!("Panel scheduler exited: {:?}", exit);
                failure = Some(match exit {
                    Ok(SupervisorExit::GaveUp { restarts }) => {
                        anyhow::anyhow!("panel render loop failed {} times", restarts + 1)
                    }
                    Ok(SupervisorExit::Stopped) => anyhow::anyhow!("panel render loop stopped"),
                    Err(e) => anyhow::anyhow!("panel scheduler task failed: {}", e),
                });
                break;
            }
            event = events.recv() => match event {
                Some(event) => dispatcher.dispatch(event),
                None => {
                    error!("Gateway event stream ended");
                    failure = Some(anyhow::anyhow!("gateway event stream ended"));
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    if !scheduler_done {
        // Lets a render already in flight finish
        if let Err(e) = scheduler_task.await {
            warn!("Panel scheduler task failed: {}", e);
        }
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.drain())
        .await
        .is_err()
    {
        warn!("Event handlers still running after {:?}, stopping anyway", SHUTDOWN_GRACE);
    }
    if let Err(e) = adapter.stop().await {
        warn!("Failed to stop the bridge: {}", e);
    }
    persistence.flush().await;
    info!("Bastion stopped");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "bastion",
            "--panel-channel",
            "100",
            "--alert-channel",
            "200",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn test_config_from_args() {
        let args = args(&["--cooldown-secs", "30", "--escalation-role", "900"]);
        let config = args
            .coordinator_config(&PersistenceManager::disabled())
            .await;

        assert_eq!(config.panel_channel, ChannelId::new("100"));
        assert_eq!(config.alert_channel, ChannelId::new("200"));
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert_eq!(config.escalation_role, Some(RoleId::new("900")));
        assert_eq!(config.scheduler.interval, Duration::from_secs(60));
        assert_eq!(config.scheduler.max_restarts, 5);
        assert_eq!(config.incident_lifetime, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_fallback_groups_file() {
        assert!(load_fallback_groups(None).unwrap().is_empty());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "Alpha", "icon_ref": "🏰", "membership_role_ref": "r-alpha"}}]"#
        )
        .unwrap();
        let groups = load_fallback_groups(Some(file.path())).unwrap();
        assert_eq!(groups, vec![GroupAffiliation::new("Alpha", "🏰", "r-alpha")]);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(load_fallback_groups(Some(broken.path())).is_err());
    }
}
