//! Per-guild voice session management.
//!
//! | Component | Role |
//! |---|---|
//! | [`VolumeRegistry`] | remembers the last volume per key, outlives sessions |
//! | [`IdleTimeoutScheduler`] | arms/cancels the idle teardown timer of a session |
//! | [`ConnectionManager`] | joins, reuses and destroys transport connections |
//! | [`PlaybackController`] | binds players to resources and reacts to their status |
//! | [`SessionRegistry`] | public facade; serializes all work per key |
//!
//! Every mutation of a [`Session`] happens while holding that key's lock, so
//! caller requests, player status events, end-of-stream signals and timer
//! firings for one key are applied strictly one at a time.

pub mod connection;
pub mod idle;
pub mod playback;
pub mod registry;
pub mod state;
pub mod volume;

pub use connection::ConnectionManager;
pub use idle::{IdleTimeoutScheduler, IdleTimer};
pub use playback::{PlayOptions, PlaybackController};
pub use registry::{SessionRegistry, resolve_key};
pub use state::{Session, SessionStatus};
pub use volume::VolumeRegistry;
