//! # cr-hub
//!
//! The Progress Hub: a per-user multiplexed real-time channel. Internal job
//! events become ordered client-visible messages; a reconnecting client
//! recovers state from a single sync snapshot instead of replaying history.

mod health;
mod hub;
mod protocol;

pub use health::{ConnectionHealth, ConnectionState, HeartbeatConfig, InvalidTransition};
pub use hub::{ConnectionId, ProgressHub, Subscription, SyncSnapshot};
pub use protocol::ClientMessage;
