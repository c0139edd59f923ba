use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    common::{
        errors::{VoiceError, VoiceResult},
        types::SessionKey,
    },
    session::state::Session,
    voice::{
        context::VoiceContext,
        transport::{VoiceConnection, VoiceTransport},
    },
};

/// Owns the transport connection of each session.
///
/// A session never holds more than one connection: a recorded connection is
/// either reused (still live, same channel) or destroyed before a new one is
/// joined. Every recorded connection is also indexed here by key, so
/// [`ConnectionManager::destroy_all`] reaches it without the session lock.
pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    live: DashMap<SessionKey, Arc<dyn VoiceConnection>>,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            transport,
            live: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn acquire(
        &self,
        session: &mut Session,
        voice: &VoiceContext,
    ) -> VoiceResult<Arc<dyn VoiceConnection>> {
        if self.is_closed() {
            return Err(VoiceError::ShuttingDown);
        }

        if let Some(existing) = &session.connection {
            if existing.is_live() && existing.channel_id() == voice.channel_id {
                debug!(
                    "[{}] reusing voice connection in channel {}",
                    session.key(),
                    voice.channel_id
                );
                return Ok(existing.clone());
            }

            info!(
                "[{}] replacing voice connection (channel {} {:?} -> channel {})",
                session.key(),
                existing.channel_id(),
                existing.state(),
                voice.channel_id
            );
            self.destroy(session);
        }

        let connection = self.transport.join(voice).await.map_err(|e| {
            warn!("[{}] voice join failed: {}", session.key(), e);
            VoiceError::TransportAcquisitionFailed(e.to_string())
        })?;

        // Index before checking the gate: either this check sees the close or
        // `destroy_all` sees the entry.
        self.live.insert(session.key().clone(), connection.clone());
        if self.is_closed() {
            self.forget(session.key(), &connection);
            connection.destroy();
            return Err(VoiceError::ShuttingDown);
        }

        info!(
            "[{}] joined voice channel {}",
            session.key(),
            voice.channel_id
        );

        if let Some(active) = &session.player {
            connection.subscribe(active.player.clone());
        }
        session.connection = Some(connection.clone());
        Ok(connection)
    }

    /// Destroys and forgets the session's connection. No-op when absent.
    pub fn destroy(&self, session: &mut Session) -> bool {
        match session.connection.take() {
            Some(connection) => {
                self.forget(session.key(), &connection);
                connection.destroy();
                debug!("[{}] voice connection destroyed", session.key());
                true
            }
            None => false,
        }
    }

    /// Destroys every indexed connection without touching session records.
    /// Returns how many were destroyed.
    pub fn destroy_all(&self) -> usize {
        let keys: Vec<SessionKey> = self.live.iter().map(|entry| entry.key().clone()).collect();
        let mut destroyed = 0;
        for key in keys {
            if let Some((key, connection)) = self.live.remove(&key) {
                connection.destroy();
                debug!("[{}] voice connection destroyed on shutdown", key);
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Number of indexed connections.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Refuses all further acquisitions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn forget(&self, key: &SessionKey, connection: &Arc<dyn VoiceConnection>) {
        self.live
            .remove_if(key, |_, indexed| Arc::ptr_eq(indexed, connection));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::types::{ChannelId, SessionKey, UserId},
        voice::{
            loopback::LoopbackTransport,
            transport::ConnectionState,
        },
    };

    fn voice(channel: u64) -> VoiceContext {
        VoiceContext {
            guild_id: "123".into(),
            channel_id: ChannelId(channel),
            user_id: UserId(9),
        }
    }

    fn setup() -> (Arc<LoopbackTransport>, ConnectionManager, Session) {
        let transport = Arc::new(LoopbackTransport::new());
        let manager = ConnectionManager::new(transport.clone());
        (transport, manager, Session::new(SessionKey::discord("123")))
    }

    #[tokio::test]
    async fn live_connection_in_same_channel_is_reused() {
        let (transport, manager, mut session) = setup();

        let first = manager.acquire(&mut session, &voice(1)).await.unwrap();
        let second = manager.acquire(&mut session, &voice(1)).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.join_count(), 1);
    }

    #[tokio::test]
    async fn channel_change_destroys_before_joining() {
        let (transport, manager, mut session) = setup();

        manager.acquire(&mut session, &voice(1)).await.unwrap();
        manager.acquire(&mut session, &voice(2)).await.unwrap();

        let connections = transport.connections();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].state(), ConnectionState::Destroyed);
        assert_eq!(connections[1].channel_id(), ChannelId(2));
        assert_eq!(transport.live_connections(&"123".into()), 1);
    }

    #[tokio::test]
    async fn dropped_connection_is_replaced() {
        let (transport, manager, mut session) = setup();

        manager.acquire(&mut session, &voice(1)).await.unwrap();
        transport.connections()[0].disconnect();
        manager.acquire(&mut session, &voice(1)).await.unwrap();

        assert_eq!(transport.join_count(), 2);
        assert_eq!(transport.connections()[0].destroy_calls(), 1);
        assert_eq!(transport.live_connections(&"123".into()), 1);
    }

    #[tokio::test]
    async fn join_failure_maps_to_transport_error() {
        let (transport, manager, mut session) = setup();
        transport.fail_next_join("gateway timeout");

        let err = manager.acquire(&mut session, &voice(1)).await.err().unwrap();
        assert!(matches!(
            err,
            VoiceError::TransportAcquisitionFailed(ref msg) if msg == "gateway timeout"
        ));
        assert!(!session.has_connection());
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_close_blocks_acquire() {
        let (transport, manager, mut session) = setup();

        manager.acquire(&mut session, &voice(1)).await.unwrap();
        assert!(manager.destroy(&mut session));
        assert!(!manager.destroy(&mut session));

        manager.close();
        let err = manager.acquire(&mut session, &voice(1)).await.err().unwrap();
        assert!(matches!(err, VoiceError::ShuttingDown));
        assert_eq!(transport.join_count(), 1);
    }

    #[tokio::test]
    async fn index_follows_the_recorded_connection() {
        let (transport, manager, mut session) = setup();

        manager.acquire(&mut session, &voice(1)).await.unwrap();
        manager.acquire(&mut session, &voice(2)).await.unwrap();
        assert_eq!(manager.len(), 1);

        manager.destroy(&mut session);
        assert!(manager.is_empty());
        assert_eq!(transport.live_connections(&"123".into()), 0);
    }

    #[tokio::test]
    async fn destroy_all_reaches_connections_without_their_sessions() {
        let (transport, manager, mut first) = setup();
        let mut second = Session::new(SessionKey::discord("456"));

        manager.acquire(&mut first, &voice(1)).await.unwrap();
        manager
            .acquire(
                &mut second,
                &VoiceContext {
                    guild_id: "456".into(),
                    ..voice(3)
                },
            )
            .await
            .unwrap();

        assert_eq!(manager.destroy_all(), 2);
        assert!(manager.is_empty());
        assert!(
            transport
                .connections()
                .iter()
                .all(|c| c.state() == ConnectionState::Destroyed)
        );
        // The records still point at the dead connections; destroying them
        // again is harmless.
        assert!(manager.destroy(&mut first));
        assert_eq!(transport.connections()[0].destroy_calls(), 2);
    }
}
