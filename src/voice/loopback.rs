//! In-process voice backend.
//!
//! Joins nothing and decodes nothing: connections only record what was
//! subscribed to them, and players drain their source while reporting the
//! same status sequence a real engine would (`Buffering` -> `Playing` ->
//! `Idle`). Used by the harness binary and by the session tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{io::AsyncRead, task::JoinHandle};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace, warn};

use crate::{
    common::types::{AnyResult, ChannelId, GuildId},
    voice::{
        context::VoiceContext,
        engine::{
            AudioEngine, AudioPlayer, AudioResource, AudioSource, PlayerId, PlayerStatus,
            ResourceOptions,
        },
        transport::{ConnectionState, VoiceConnection, VoiceTransport},
    },
};

/// Connections and players kept for inspection per backend.
pub const HISTORY: usize = 64;

/// Appends `item`, making room by evicting the oldest entry that `spent`
/// accepts, or the oldest entry when none does.
fn remember<T>(history: &mut VecDeque<T>, item: T, spent: impl Fn(&T) -> bool) {
    if history.len() >= HISTORY {
        match history.iter().position(&spent) {
            Some(index) => {
                history.remove(index);
            }
            None => {
                history.pop_front();
            }
        }
    }
    history.push_back(item);
}

// ─── Transport ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct LoopbackTransport {
    joins: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    connections: Mutex<VecDeque<Arc<LoopbackConnection>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `join` fail with `reason`.
    pub fn fail_next_join(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::Acquire)
    }

    /// Recent connections, oldest first. Destroyed ones are forgotten first
    /// once [`HISTORY`] is reached.
    pub fn connections(&self) -> Vec<Arc<LoopbackConnection>> {
        self.connections.lock().iter().cloned().collect()
    }

    pub fn live_connections(&self, guild_id: &GuildId) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| &c.guild_id == guild_id && c.is_live())
            .count()
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn join(&self, voice: &VoiceContext) -> AnyResult<Arc<dyn VoiceConnection>> {
        self.joins.fetch_add(1, Ordering::AcqRel);

        if let Some(reason) = self.fail_next.lock().take() {
            return Err(reason.into());
        }

        let connection = Arc::new(LoopbackConnection {
            guild_id: voice.guild_id.clone(),
            channel_id: voice.channel_id,
            state: Mutex::new(ConnectionState::Ready),
            subscribers: Mutex::new(Vec::new()),
            destroy_calls: AtomicUsize::new(0),
        });
        debug!(
            "[loopback] joined guild {} channel {}",
            voice.guild_id, voice.channel_id
        );

        remember(&mut self.connections.lock(), connection.clone(), |c| {
            !c.is_live()
        });
        Ok(connection)
    }
}

pub struct LoopbackConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    state: Mutex<ConnectionState>,
    subscribers: Mutex<Vec<PlayerId>>,
    destroy_calls: AtomicUsize,
}

impl LoopbackConnection {
    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    /// Simulates the remote side dropping the connection.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Destroyed {
            *state = ConnectionState::Disconnected;
        }
    }

    pub fn subscribed_players(&self) -> Vec<PlayerId> {
        self.subscribers.lock().clone()
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::Acquire)
    }
}

impl VoiceConnection for LoopbackConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn subscribe(&self, player: Arc<dyn AudioPlayer>) {
        self.subscribers.lock().push(player.id());
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        if *state != ConnectionState::Destroyed {
            debug!(
                "[loopback] left guild {} channel {}",
                self.guild_id, self.channel_id
            );
            *state = ConnectionState::Destroyed;
        }
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct LoopbackEngine {
    next_player_id: AtomicU64,
    players: Mutex<VecDeque<Arc<LoopbackPlayer>>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recent players, oldest first. Idle ones are forgotten first once
    /// [`HISTORY`] is reached.
    pub fn players(&self) -> Vec<Arc<LoopbackPlayer>> {
        self.players.lock().iter().cloned().collect()
    }

    pub fn last_player(&self) -> Option<Arc<LoopbackPlayer>> {
        self.players.lock().back().cloned()
    }
}

#[async_trait]
impl AudioEngine for LoopbackEngine {
    async fn create_resource(
        &self,
        source: AudioSource,
        options: ResourceOptions,
    ) -> AnyResult<AudioResource> {
        if let AudioSource::Locator(path) = &source {
            let metadata = tokio::fs::metadata(path)
                .await
                .map_err(|e| format!("{}: {}", path, e))?;
            if !metadata.is_file() {
                return Err(format!("{}: not a file", path).into());
            }
        }
        Ok(AudioResource::new(source, options))
    }

    fn create_player(&self) -> Arc<dyn AudioPlayer> {
        let id = self.next_player_id.fetch_add(1, Ordering::AcqRel) + 1;
        let player = Arc::new(LoopbackPlayer {
            id,
            shared: Arc::new(PlayerShared {
                status: Mutex::new(PlayerStatus::Idle),
                listeners: Mutex::new(Vec::new()),
            }),
            drain: Mutex::new(None),
        });
        remember(&mut self.players.lock(), player.clone(), |p| {
            p.status() == PlayerStatus::Idle
        });
        player
    }
}

// ─── Player ───────────────────────────────────────────────────────────────────

struct PlayerShared {
    status: Mutex<PlayerStatus>,
    listeners: Mutex<Vec<flume::Sender<PlayerStatus>>>,
}

impl PlayerShared {
    fn transition(&self, next: PlayerStatus) {
        {
            let mut status = self.status.lock();
            if *status == next {
                return;
            }
            *status = next;
        }
        self.listeners.lock().retain(|tx| tx.send(next).is_ok());
    }
}

pub struct LoopbackPlayer {
    id: PlayerId,
    shared: Arc<PlayerShared>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackPlayer {
    /// Forces a status transition as if the engine reported it.
    pub fn set_status(&self, status: PlayerStatus) {
        self.shared.transition(status);
    }

    fn abort_drain(&self) -> bool {
        match self.drain.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl AudioPlayer for LoopbackPlayer {
    fn id(&self) -> PlayerId {
        self.id
    }

    fn play(&self, resource: &AudioResource) {
        self.abort_drain();

        let Some(source) = resource.take_source() else {
            warn!("[loopback] player {} got a resource with no payload", self.id);
            self.shared.transition(PlayerStatus::Idle);
            return;
        };

        self.shared.transition(PlayerStatus::Buffering);

        let shared = self.shared.clone();
        let resource = resource.clone();
        let player_id = self.id;
        let task = tokio::spawn(async move {
            let bytes = match source {
                AudioSource::Buffer(bytes) => {
                    shared.transition(PlayerStatus::Playing);
                    bytes.len() as u64
                }
                AudioSource::Stream(reader) => {
                    shared.transition(PlayerStatus::Playing);
                    drain(reader).await
                }
                AudioSource::Locator(path) => match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        shared.transition(PlayerStatus::Playing);
                        drain(file).await
                    }
                    Err(e) => {
                        warn!("[loopback] failed to open {}: {}", path, e);
                        0
                    }
                },
            };

            trace!("[loopback] player {} drained {} bytes", player_id, bytes);
            resource.mark_ended();
            shared.transition(PlayerStatus::Idle);
        });

        *self.drain.lock() = Some(task);
    }

    fn stop(&self, _force: bool) -> bool {
        let was_running = self.abort_drain();
        let was_active = self.status() != PlayerStatus::Idle;
        self.shared.transition(PlayerStatus::Idle);
        was_running || was_active
    }

    fn status(&self) -> PlayerStatus {
        *self.shared.status.lock()
    }

    fn subscribe(&self) -> flume::Receiver<PlayerStatus> {
        let (tx, rx) = flume::unbounded();
        self.shared.listeners.lock().push(tx);
        rx
    }
}

impl Drop for LoopbackPlayer {
    fn drop(&mut self) {
        self.abort_drain();
    }
}

async fn drain(reader: impl AsyncRead + Unpin) -> u64 {
    let mut chunks = ReaderStream::new(reader);
    let mut total = 0u64;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => total += chunk.len() as u64,
            Err(e) => {
                warn!("[loopback] source read failed: {}", e);
                break;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::UserId;
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    fn voice(guild: &str, channel: u64) -> VoiceContext {
        VoiceContext {
            guild_id: guild.into(),
            channel_id: ChannelId(channel),
            user_id: UserId(1),
        }
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let transport = LoopbackTransport::new();
        let connection = transport.join(&voice("1", 10)).await.unwrap();
        assert_eq!(transport.live_connections(&"1".into()), 1);

        connection.destroy();
        connection.destroy();

        assert_eq!(connection.state(), ConnectionState::Destroyed);
        assert_eq!(transport.live_connections(&"1".into()), 0);
        assert_eq!(transport.connections()[0].destroy_calls(), 2);
    }

    #[tokio::test]
    async fn injected_join_failure_is_one_shot() {
        let transport = LoopbackTransport::new();
        transport.fail_next_join("missing permissions");

        let err = transport.join(&voice("1", 10)).await.err().unwrap();
        assert_eq!(err.to_string(), "missing permissions");
        assert!(transport.join(&voice("1", 10)).await.is_ok());
        assert_eq!(transport.join_count(), 2);
    }

    #[tokio::test]
    async fn missing_file_locator_is_rejected() {
        let engine = LoopbackEngine::new();
        let result = engine
            .create_resource(
                AudioSource::Locator("/definitely/not/here.ogg".into()),
                ResourceOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn player_reports_playing_then_idle_when_stream_ends() {
        let engine = LoopbackEngine::new();
        let (mut writer, reader) = tokio::io::duplex(64);
        let resource = engine
            .create_resource(AudioSource::stream(reader), ResourceOptions::default())
            .await
            .unwrap();

        let player = engine.create_player();
        let events = player.subscribe();
        player.play(&resource);

        assert_eq!(events.recv_async().await.unwrap(), PlayerStatus::Buffering);
        assert_eq!(events.recv_async().await.unwrap(), PlayerStatus::Playing);

        writer.write_all(b"opus-ish").await.unwrap();
        drop(writer);

        assert_eq!(events.recv_async().await.unwrap(), PlayerStatus::Idle);
        assert!(resource.has_ended());
        assert_eq!(player.status(), PlayerStatus::Idle);
    }

    #[tokio::test]
    async fn stop_reports_idle_without_ending_the_stream() {
        let engine = LoopbackEngine::new();
        let (_writer, reader) = tokio::io::duplex(64);
        let resource = engine
            .create_resource(AudioSource::stream(reader), ResourceOptions::default())
            .await
            .unwrap();

        let player = engine.create_player();
        let events = player.subscribe();
        player.play(&resource);
        assert_eq!(events.recv_async().await.unwrap(), PlayerStatus::Buffering);
        assert_eq!(events.recv_async().await.unwrap(), PlayerStatus::Playing);

        assert!(player.stop(true));
        assert_eq!(events.recv_async().await.unwrap(), PlayerStatus::Idle);
        assert!(!resource.has_ended());
        assert!(!player.stop(true));
    }

    #[tokio::test]
    async fn buffer_sources_finish_immediately() {
        let engine = LoopbackEngine::new();
        let resource = engine
            .create_resource(
                AudioSource::Buffer(Bytes::from_static(b"pcm")),
                ResourceOptions::default(),
            )
            .await
            .unwrap();

        let player = engine.create_player();
        let events = player.subscribe();
        player.play(&resource);

        let seen: Vec<PlayerStatus> = vec![
            events.recv_async().await.unwrap(),
            events.recv_async().await.unwrap(),
            events.recv_async().await.unwrap(),
        ];
        assert_eq!(
            seen,
            vec![
                PlayerStatus::Buffering,
                PlayerStatus::Playing,
                PlayerStatus::Idle
            ]
        );
        resource.ended().await;
    }

    #[tokio::test]
    async fn history_forgets_destroyed_connections_first() {
        let transport = LoopbackTransport::new();
        let kept = transport.join(&voice("1", 10)).await.unwrap();
        for _ in 0..HISTORY + 6 {
            transport.join(&voice("2", 20)).await.unwrap().destroy();
        }

        let history = transport.connections();
        assert_eq!(history.len(), HISTORY);
        assert_eq!(history[0].channel_id(), kept.channel_id());
        assert_eq!(transport.live_connections(&"1".into()), 1);
        assert_eq!(transport.join_count(), HISTORY + 7);
    }

    #[test]
    fn player_history_is_bounded() {
        let engine = LoopbackEngine::new();
        for _ in 0..HISTORY + 6 {
            engine.create_player();
        }
        assert_eq!(engine.players().len(), HISTORY);
        assert_eq!(
            engine.last_player().map(|p| p.id()),
            Some((HISTORY + 6) as u64)
        );
    }
}
