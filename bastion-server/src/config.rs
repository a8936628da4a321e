// Coordinator tunables

use bastion_utils::{ChannelId, RoleId};
use std::time::Duration;

/// Render loop timing
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Periodic render cadence
    pub interval: Duration,
    /// No two renders start closer together than this
    pub min_spacing: Duration,
    /// Upper bound for the rate-limit backoff of `interval`
    pub backoff_ceiling: Duration,
    /// Worker restarts the supervisor allows before giving up
    pub max_restarts: u32,
    /// Delay before the first restart; doubles per restart
    pub restart_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_spacing: Duration::from_secs(5),
            backoff_ceiling: Duration::from_secs(3600),
            max_restarts: 5,
            restart_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Where the status panel lives
    pub panel_channel: ChannelId,
    /// Where incident messages are posted
    pub alert_channel: ChannelId,
    /// Mentioned when an incident is escalated
    pub escalation_role: Option<RoleId>,
    /// Minimum spacing between two pings of the same group
    pub cooldown: Duration,
    pub presence_min_interval: Duration,
    /// Window collapsing membership (and, separately, presence) churn
    pub event_debounce: Duration,
    pub evidence_timeout: Duration,
    /// Incidents older than this are forgotten, resolved or not
    pub incident_lifetime: Duration,
    /// Messages inspected when looking for an existing panel
    pub history_scan_limit: usize,
    pub max_displayed_groups: usize,
    pub scheduler: SchedulerConfig,
}

impl CoordinatorConfig {
    pub fn new(panel_channel: ChannelId, alert_channel: ChannelId) -> Self {
        Self {
            panel_channel,
            alert_channel,
            ..Default::default()
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            panel_channel: ChannelId::new("panel"),
            alert_channel: ChannelId::new("alerts"),
            escalation_role: None,
            cooldown: Duration::from_secs(15),
            presence_min_interval: Duration::from_secs(600),
            event_debounce: Duration::from_secs(600),
            evidence_timeout: Duration::from_secs(60),
            incident_lifetime: Duration::from_secs(24 * 3600),
            history_scan_limit: 20,
            max_displayed_groups: 10,
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::new(ChannelId::new("1"), ChannelId::new("2"));
        assert_eq!(config.panel_channel, ChannelId::new("1"));
        assert_eq!(config.cooldown, Duration::from_secs(15));
        assert_eq!(config.scheduler.interval, Duration::from_secs(60));
        assert_eq!(config.max_displayed_groups, 10);
        assert!(config.escalation_role.is_none());
    }
}
