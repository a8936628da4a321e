//! Bastion coordinator.
//!
//! Keeps one live status panel per deployment in sync with group presence
//! and ping activity, and runs the lifecycle of the alert incidents that
//! pings create. The chat platform is only reached through the `Transport`
//! and `Directory` traits; `integrations` implements them over the bridge
//! helper CLI and `platform::MemoryPlatform` in memory.

pub mod clock;
pub mod config;
pub mod cooldown;
pub mod incident;
pub mod integrations;
pub mod ledger;
pub mod notifications;
pub mod panel;
pub mod persistence;
pub mod platform;
pub mod presence;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoordinatorConfig, SchedulerConfig};
pub use notifications::{AlertError, Dispatcher};
pub use panel::{PanelCoordinator, PanelHandle, PanelScheduler};
pub use presence::PresenceSampler;
pub use registry::GroupRegistry;
