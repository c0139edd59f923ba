use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    common::{
        errors::{VoiceError, VoiceResult, validate_volume},
        types::{SessionKey, Shared},
    },
    configs::VoiceConfig,
    session::{
        connection::ConnectionManager,
        idle::{IdleTimeoutScheduler, IdleTimer},
        playback::{PlayOptions, PlaybackController, PlayerFeed},
        state::{Session, SessionStatus},
        volume::VolumeRegistry,
    },
    voice::{
        context::{CallerContext, VoiceContext},
        engine::{AudioEngine, AudioResource, AudioSource, PlayerId, PlayerStatus, ResourceId},
        transport::VoiceTransport,
    },
};

/// Derives the session key for a caller.
pub fn resolve_key(ctx: &CallerContext) -> VoiceResult<SessionKey> {
    if !ctx.platform.supports_voice() {
        return Err(VoiceError::UnsupportedPlatform(ctx.platform.clone()));
    }
    let guild_id = ctx
        .guild_id
        .clone()
        .ok_or(VoiceError::NotInGroupContext)?;
    Ok(SessionKey::new(ctx.platform.clone(), guild_id))
}

/// Key for read-only queries: platforms without voice simply have nothing
/// to report.
fn query_key(ctx: &CallerContext) -> VoiceResult<Option<SessionKey>> {
    match resolve_key(ctx) {
        Ok(key) => Ok(Some(key)),
        Err(VoiceError::UnsupportedPlatform(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Something that happened to a session outside of a caller request.
#[derive(Debug, Clone, Copy)]
enum SessionEvent {
    Player {
        player_id: PlayerId,
        status: PlayerStatus,
    },
    StreamEnded {
        resource_id: ResourceId,
    },
    IdleElapsed {
        timer_id: u64,
    },
}

/// A locked session together with the index slot it was found in.
struct SessionGuard {
    slot: Shared<Session>,
    session: OwnedMutexGuard<Session>,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

struct RegistryInner {
    sessions: DashMap<SessionKey, Shared<Session>>,
    volumes: VolumeRegistry,
    connections: ConnectionManager,
    playback: PlaybackController,
    idle: IdleTimeoutScheduler,
}

/// Entry point for the command layer: one voice session per guild.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        engine: Arc<dyn AudioEngine>,
        config: &VoiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                volumes: VolumeRegistry::new(),
                connections: ConnectionManager::new(transport),
                playback: PlaybackController::new(engine, config.default_volume),
                idle: IdleTimeoutScheduler::new(config.idle_timeout()),
            }),
        }
    }

    /// Joins the caller's voice channel (or reuses the joined one) and starts
    /// `source` unless something is already playing for the guild. The
    /// returned resource is only attached in the latter case.
    pub async fn play(
        &self,
        ctx: &CallerContext,
        source: AudioSource,
        options: PlayOptions,
    ) -> VoiceResult<AudioResource> {
        let key = resolve_key(ctx)?;
        if let Some(volume) = options.volume {
            validate_volume(volume)?;
        }
        let voice = ctx.voice_context()?;
        self.inner.play(key, &voice, source, &options).await
    }

    /// Stores `volume` as the guild's preference and applies it to the live
    /// resource when something is playing. Returns whether it was applied
    /// live.
    pub async fn change_volume(&self, ctx: &CallerContext, volume: f32) -> VoiceResult<bool> {
        let key = resolve_key(ctx)?;
        let volume = validate_volume(volume)?;
        self.inner.volumes.set(&key, volume);

        let Some(session) = self.inner.existing(&key).await else {
            debug!("[{}] volume {} stored for the next play", key, volume);
            return Ok(false);
        };
        if !self.inner.playback.is_playing(&session) {
            return Ok(false);
        }
        let applied = session
            .resource()
            .is_some_and(|resource| resource.set_volume(volume));
        if applied {
            info!("[{}] live volume changed to {}", key, volume);
        }
        Ok(applied)
    }

    /// Force-stops the guild's player. Stopping with nothing bound is not an
    /// error. The connection stays until the idle timeout releases it.
    pub async fn stop_playing(&self, ctx: &CallerContext) -> VoiceResult<bool> {
        let key = resolve_key(ctx)?;
        let Some(mut session) = self.inner.existing(&key).await else {
            return Ok(false);
        };

        let stopped = self.inner.playback.stop(&mut session);
        if session.has_connection() {
            if !session.idle_armed() {
                self.inner.arm_idle(&mut session);
            }
        } else if session.is_vacant() {
            session.transition(SessionStatus::Disconnected);
            self.inner.retire(&mut session);
        }
        Ok(stopped)
    }

    pub async fn get_active_resource(
        &self,
        ctx: &CallerContext,
    ) -> VoiceResult<Option<AudioResource>> {
        let Some(key) = query_key(ctx)? else {
            return Ok(None);
        };
        Ok(self
            .inner
            .existing(&key)
            .await
            .and_then(|session| session.resource().cloned()))
    }

    pub async fn is_playing(&self, ctx: &CallerContext) -> VoiceResult<bool> {
        let Some(key) = query_key(ctx)? else {
            return Ok(false);
        };
        Ok(self
            .inner
            .existing(&key)
            .await
            .is_some_and(|session| self.inner.playback.is_playing(&session)))
    }

    pub async fn session_status(&self, ctx: &CallerContext) -> VoiceResult<SessionStatus> {
        let Some(key) = query_key(ctx)? else {
            return Ok(SessionStatus::Disconnected);
        };
        Ok(self
            .inner
            .existing(&key)
            .await
            .map_or(SessionStatus::Disconnected, |session| session.status()))
    }

    /// Keys that currently have a session record.
    pub fn active_sessions(&self) -> Vec<SessionKey> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn volumes(&self) -> &VolumeRegistry {
        &self.inner.volumes
    }

    /// Destroys every tracked connection, whatever its session is doing, and
    /// refuses further plays. Never waits on an in-flight operation: a busy
    /// session keeps its record until that operation finishes, but its
    /// connection is destroyed here all the same.
    pub async fn shutdown(&self) {
        self.inner.connections.close();

        let slots: Vec<Shared<Session>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut busy = 0usize;
        for slot in slots {
            let Ok(session) = slot.clone().try_lock_owned() else {
                busy += 1;
                continue;
            };
            if session.retired {
                continue;
            }
            let mut session = SessionGuard { slot, session };
            self.inner.teardown(&mut session, "shutdown");
        }

        let orphaned = self.inner.connections.destroy_all();
        self.inner.sessions.clear();
        info!(
            "Voice sessions shut down ({} busy, {} connections destroyed without their session)",
            busy, orphaned
        );
    }
}

impl RegistryInner {
    async fn play(
        self: &Arc<Self>,
        key: SessionKey,
        voice: &VoiceContext,
        source: AudioSource,
        options: &PlayOptions,
    ) -> VoiceResult<AudioResource> {
        if self.connections.is_closed() {
            return Err(VoiceError::ShuttingDown);
        }

        // Engine I/O happens before the key is locked.
        let resource = self.playback.build_resource(source, options).await?;

        let mut session = self.lock_or_create(&key).await;
        // Must precede acquire: a pending teardown may not hit the
        // connection this request is about to reuse.
        self.idle.cancel(&mut session);

        if let Err(e) = self.connections.acquire(&mut session, voice).await {
            self.recover(&mut session);
            return Err(e);
        }

        let attachment = self
            .playback
            .attach_or_ignore(&mut session, resource, options);
        if let Some(feed) = attachment.feed {
            let watcher = self.watch_player(key, feed);
            if let Some(active) = session.player.as_mut() {
                active.watcher = Some(watcher);
            }
        }
        Ok(attachment.resource)
    }

    /// Puts a session back into a resting state after a failed acquire.
    fn recover(self: &Arc<Self>, session: &mut SessionGuard) {
        if self.connections.is_closed() {
            self.teardown(session, "shutdown");
        } else if !session.has_connection() {
            self.playback.stop(session);
            session.transition(SessionStatus::Disconnected);
            self.retire(session);
        } else if !self.playback.is_playing(session) && !session.idle_armed() {
            self.arm_idle(session);
        }
    }

    fn arm_idle(self: &Arc<Self>, session: &mut Session) -> u64 {
        let registry = Arc::downgrade(self);
        let key = session.key().clone();
        self.idle.arm(session, move |timer_id| async move {
            if let Some(inner) = registry.upgrade() {
                inner
                    .handle_event(&key, SessionEvent::IdleElapsed { timer_id })
                    .await;
            }
        })
    }

    /// Forwards the player's status changes and the resource's end-of-stream
    /// into the session until the player is dropped.
    fn watch_player(self: &Arc<Self>, key: SessionKey, feed: PlayerFeed) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let PlayerFeed {
                player_id,
                events,
                resource,
            } = feed;
            let mut stream_open = true;

            loop {
                let event = tokio::select! {
                    status = events.recv_async() => match status {
                        Ok(status) => SessionEvent::Player { player_id, status },
                        Err(_) => break,
                    },
                    _ = resource.ended(), if stream_open => {
                        stream_open = false;
                        SessionEvent::StreamEnded { resource_id: resource.id() }
                    }
                };

                let Some(inner) = registry.upgrade() else {
                    break;
                };
                inner.handle_event(&key, event).await;
            }
            trace!("[{}] watcher for player {} finished", key, player_id);
        })
    }

    async fn handle_event(self: &Arc<Self>, key: &SessionKey, event: SessionEvent) {
        let Some(mut session) = self.existing(key).await else {
            trace!("[{}] dropping {:?}: no session", key, event);
            return;
        };

        match event {
            SessionEvent::Player { player_id, status } => {
                if !session.owns_player(player_id) {
                    trace!("[{}] ignoring {:?} from stale player {}", key, status, player_id);
                    return;
                }
                match status {
                    PlayerStatus::Playing => {
                        self.idle.cancel(&mut session);
                        self.playback.on_playing(&mut session, &self.volumes);
                    }
                    PlayerStatus::Idle => {
                        debug!("[{}] player {} went idle", key, player_id);
                        self.arm_idle(&mut session);
                    }
                    other => trace!("[{}] player {} is {:?}", key, player_id, other),
                }
            }
            SessionEvent::StreamEnded { resource_id } => {
                self.playback.on_stream_end(&mut session, resource_id);
            }
            SessionEvent::IdleElapsed { timer_id } => {
                if session.idle_timer.as_ref().map(IdleTimer::id) != Some(timer_id) {
                    trace!("[{}] idle timer {} no longer armed", key, timer_id);
                    return;
                }
                self.teardown(&mut session, "idle timeout");
            }
        }
    }

    /// Releases everything the session holds and retires the record.
    fn teardown(&self, session: &mut SessionGuard, reason: &str) {
        session.idle_timer = None;
        self.playback.stop(session);
        self.connections.destroy(session);
        session.transition(SessionStatus::Disconnected);
        self.retire(session);
        info!("[{}] left voice ({})", session.key(), reason);
    }

    /// Marks the record dead and unlinks it from the index. Anyone still
    /// waiting on its lock will look the key up again.
    fn retire(&self, session: &mut SessionGuard) {
        session.session.retired = true;
        let slot = &session.slot;
        self.sessions
            .remove_if(session.session.key(), |_, current| Arc::ptr_eq(current, slot));
    }

    async fn lock_or_create(&self, key: &SessionKey) -> SessionGuard {
        loop {
            let slot = self
                .sessions
                .entry(key.clone())
                .or_insert_with(|| {
                    debug!("[{}] new session", key);
                    Arc::new(Mutex::new(Session::new(key.clone())))
                })
                .clone();

            let session = slot.clone().lock_owned().await;
            if !session.retired {
                return SessionGuard { slot, session };
            }
        }
    }

    async fn existing(&self, key: &SessionKey) -> Option<SessionGuard> {
        loop {
            let slot = self.sessions.get(key).map(|entry| entry.value().clone())?;
            let session = slot.clone().lock_owned().await;
            if !session.retired {
                return Some(SessionGuard { slot, session });
            }
            if self
                .sessions
                .get(key)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &slot))
            {
                warn!("[{}] retired session still indexed", key);
                self.sessions
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
            }
        }
    }
}
