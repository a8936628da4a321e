// Bridge integration layer
//
// The chat platform is reached through the `bastion-bridge` helper CLI
// instead of an in-process client library:
//
// ```text
// PanelCoordinator / Dispatcher
//         │  Transport + Directory
//         ▼
// ┌───────────────────┐
// │   BridgeClient    │  ← JSON envelopes → PlatformError
// └───────────────────┘
//         │  IntegrationAdapter
//         ▼
// ┌───────────────────┐
// │ SubprocessManager │  ← spawn, timeout, restart, SIGTERM/SIGKILL
// └───────────────────┘
//         │
//         ▼
//   bastion-bridge send | edit | history | pin | respond | role | subscribe
// ```
//
// Gateway events (`subscribe`) are parsed into `GatewayEvent`s and fed to
// the dispatcher by the binary's event pump.

mod adapter;
mod bridge;
mod client;
mod error;
pub mod gateway;
mod mock;
mod subprocess;

pub use adapter::{AdapterConfig, IntegrationAdapter};
pub use bridge::{BridgeAdapter, DEFAULT_BRIDGE_COMMAND};
pub use client::BridgeClient;
pub use error::{IntegrationError, IntegrationResult};
pub use gateway::{subscribe_events, GatewayEvent, IncidentAction};
pub use mock::MockAdapter;
pub use subprocess::SubprocessManager;
