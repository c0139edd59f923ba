use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::types::{AnyResult, ChannelId},
    voice::{context::VoiceContext, engine::AudioPlayer},
};

/// Lifecycle of a transport connection as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    /// Dropped by the remote side; must not be reused.
    Disconnected,
    Destroyed,
}

/// A joined voice channel.
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    fn state(&self) -> ConnectionState;

    /// Route `player`'s audio into this connection.
    fn subscribe(&self, player: Arc<dyn AudioPlayer>);

    /// Release the connection. Calling it again is a no-op.
    fn destroy(&self);

    /// True while the connection can still carry audio.
    fn is_live(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Ready
        )
    }
}

/// Joins voice channels on a platform.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, voice: &VoiceContext) -> AnyResult<Arc<dyn VoiceConnection>>;
}
