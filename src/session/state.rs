use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    common::types::SessionKey,
    session::idle::IdleTimer,
    voice::{
        engine::{AudioPlayer, AudioResource, PlayerId, PlayerStatus},
        transport::VoiceConnection,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// A player was bound; waiting for the engine to report playback.
    Connecting,
    Playing,
    /// Playback went idle; the teardown timer is armed.
    IdlePendingTeardown,
    Disconnected,
}

/// The player currently bound to a session.
pub(crate) struct ActivePlayer {
    pub(crate) player: Arc<dyn AudioPlayer>,
    /// Volume the play request asked for; used when no preference is stored.
    pub(crate) requested_volume: Option<f32>,
    /// Forwards the player's status events into the session.
    pub(crate) watcher: Option<JoinHandle<()>>,
}

impl ActivePlayer {
    pub(crate) fn id(&self) -> PlayerId {
        self.player.id()
    }
}

impl Drop for ActivePlayer {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Everything known about one session key: a single record, so connection,
/// player, resource and timer can never drift apart.
pub struct Session {
    key: SessionKey,
    status: SessionStatus,
    pub(crate) connection: Option<Arc<dyn VoiceConnection>>,
    pub(crate) player: Option<ActivePlayer>,
    pub(crate) resource: Option<AudioResource>,
    pub(crate) idle_timer: Option<IdleTimer>,
    /// Set once the record has been removed from the registry index.
    pub(crate) retired: bool,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            status: SessionStatus::Disconnected,
            connection: None,
            player: None,
            resource: None,
            idle_timer: None,
            retired: false,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn resource(&self) -> Option<&AudioResource> {
        self.resource.as_ref()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn idle_armed(&self) -> bool {
        self.idle_timer.is_some()
    }

    /// Live status of the bound player, if any.
    pub fn player_status(&self) -> Option<PlayerStatus> {
        self.player.as_ref().map(|active| active.player.status())
    }

    pub(crate) fn owns_player(&self, player_id: PlayerId) -> bool {
        self.player
            .as_ref()
            .is_some_and(|active| active.id() == player_id)
    }

    /// Nothing left worth keeping the record for.
    pub(crate) fn is_vacant(&self) -> bool {
        self.connection.is_none() && self.player.is_none() && self.idle_timer.is_none()
    }

    /// Timer handle present iff the status is `IdlePendingTeardown`.
    pub fn is_consistent(&self) -> bool {
        self.idle_timer.is_some() == (self.status == SessionStatus::IdlePendingTeardown)
    }

    pub(crate) fn transition(&mut self, next: SessionStatus) {
        if self.status != next {
            debug!("[{}] session {:?} -> {:?}", self.key, self.status, next);
            self.status = next;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("connection", &self.connection.as_ref().map(|c| c.state()))
            .field("player", &self.player_status())
            .field("resource", &self.resource)
            .field("idle_armed", &self.idle_armed())
            .finish()
    }
}
