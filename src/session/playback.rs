use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    common::errors::{VoiceError, VoiceResult},
    session::{
        state::{ActivePlayer, Session, SessionStatus},
        volume::VolumeRegistry,
    },
    voice::engine::{
        AudioEngine, AudioResource, AudioSource, PlayerId, PlayerStatus, ResourceId,
        ResourceOptions,
    },
};

/// Optional knobs of a play request.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayOptions {
    pub volume: Option<f32>,
    pub seek: Option<Duration>,
    pub bitrate: Option<u32>,
}

impl PlayOptions {
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// What a freshly bound player hands back to the registry, which forwards
/// the player's status stream and the resource's end-of-stream into the
/// session.
pub(crate) struct PlayerFeed {
    pub(crate) player_id: PlayerId,
    pub(crate) events: flume::Receiver<PlayerStatus>,
    pub(crate) resource: AudioResource,
}

pub(crate) struct Attachment {
    pub(crate) resource: AudioResource,
    /// `None` when playback was already in progress and the resource was
    /// not attached.
    pub(crate) feed: Option<PlayerFeed>,
}

/// Binds players to resources and applies their status transitions.
pub struct PlaybackController {
    engine: Arc<dyn AudioEngine>,
    default_volume: f32,
}

impl PlaybackController {
    pub fn new(engine: Arc<dyn AudioEngine>, default_volume: f32) -> Self {
        Self {
            engine,
            default_volume,
        }
    }

    pub fn default_volume(&self) -> f32 {
        self.default_volume
    }

    /// Asks the engine for a playable resource with live volume control.
    /// Runs outside the session lock: the engine may do I/O here.
    pub async fn build_resource(
        &self,
        source: AudioSource,
        options: &PlayOptions,
    ) -> VoiceResult<AudioResource> {
        self.engine
            .create_resource(
                source,
                ResourceOptions {
                    inline_volume: true,
                    seek: options.seek,
                    bitrate: options.bitrate,
                },
            )
            .await
            .map_err(|e| VoiceError::ResourceUnavailable(e.to_string()))
    }

    /// Binds `resource` to a new player unless the session is already
    /// playing, in which case the resource is handed back unattached and the
    /// current playback continues.
    pub(crate) fn attach_or_ignore(
        &self,
        session: &mut Session,
        resource: AudioResource,
        options: &PlayOptions,
    ) -> Attachment {
        if self.is_playing(session) {
            info!(
                "[{}] already playing; '{}' was not attached",
                session.key(),
                resource.label()
            );
            return Attachment {
                resource,
                feed: None,
            };
        }

        if let Some(previous) = session.player.take() {
            debug!("[{}] replacing idle player {}", session.key(), previous.id());
            previous.player.stop(true);
        }

        let player = self.engine.create_player();
        // Subscribe before play so no transition is missed.
        let events = player.subscribe();
        player.play(&resource);
        if let Some(connection) = &session.connection {
            connection.subscribe(player.clone());
        }

        let player_id = player.id();
        info!(
            "[{}] player {} started '{}'",
            session.key(),
            player_id,
            resource.label()
        );

        session.player = Some(ActivePlayer {
            player,
            requested_volume: options.volume,
            watcher: None,
        });
        session.resource = Some(resource.clone());
        session.transition(SessionStatus::Connecting);

        Attachment {
            resource: resource.clone(),
            feed: Some(PlayerFeed {
                player_id,
                events,
                resource,
            }),
        }
    }

    /// Stored preference, then the request's volume, then the default.
    pub fn resolve_volume(&self, stored: Option<f32>, requested: Option<f32>) -> f32 {
        stored.or(requested).unwrap_or(self.default_volume)
    }

    /// The engine reported that playback started.
    pub(crate) fn on_playing(&self, session: &mut Session, volumes: &VolumeRegistry) {
        let requested = session
            .player
            .as_ref()
            .and_then(|active| active.requested_volume);
        let volume = self.resolve_volume(volumes.get(session.key()), requested);

        if let Some(resource) = &session.resource {
            resource.set_volume(volume);
            debug!("[{}] volume set to {}", session.key(), volume);
        }
        session.transition(SessionStatus::Playing);
    }

    /// The source signalled end-of-data; forget the resource right away.
    pub(crate) fn on_stream_end(&self, session: &mut Session, resource_id: ResourceId) -> bool {
        if session.resource.as_ref().map(AudioResource::id) != Some(resource_id) {
            return false;
        }
        session.resource = None;
        debug!("[{}] resource {} reached end of stream", session.key(), resource_id);
        true
    }

    /// Force-stops the bound player and drops the playback record. Leaves
    /// the connection alone.
    pub fn stop(&self, session: &mut Session) -> bool {
        let Some(active) = session.player.take() else {
            return false;
        };
        active.player.stop(true);
        session.resource = None;
        info!("[{}] player {} stopped", session.key(), active.id());
        true
    }

    pub fn is_playing(&self, session: &Session) -> bool {
        session.player_status() == Some(PlayerStatus::Playing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::types::SessionKey,
        configs::DEFAULT_VOLUME,
        voice::{engine::AudioPlayer, loopback::LoopbackEngine},
    };

    fn controller() -> (Arc<LoopbackEngine>, PlaybackController) {
        let engine = Arc::new(LoopbackEngine::new());
        (
            engine.clone(),
            PlaybackController::new(engine, DEFAULT_VOLUME),
        )
    }

    async fn attach(
        controller: &PlaybackController,
        session: &mut Session,
        source: AudioSource,
        options: PlayOptions,
    ) -> Attachment {
        let resource = controller.build_resource(source, &options).await.unwrap();
        controller.attach_or_ignore(session, resource, &options)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn volume_precedence() {
        let (_, controller) = controller();
        assert_eq!(controller.resolve_volume(Some(0.8), Some(0.5)), 0.8);
        assert_eq!(controller.resolve_volume(None, Some(0.5)), 0.5);
        assert_eq!(controller.resolve_volume(None, Some(0.0)), 0.0);
        assert_eq!(controller.resolve_volume(None, None), 0.2);
    }

    #[tokio::test]
    async fn unreadable_source_is_reported_as_unavailable() {
        let (engine, controller) = controller();
        let err = controller
            .build_resource(
                AudioSource::Locator("/no/such/file.ogg".into()),
                &PlayOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "resource_unavailable");
        assert!(engine.players().is_empty());
    }

    #[tokio::test]
    async fn attach_binds_a_player_and_enters_connecting() {
        let (engine, controller) = controller();
        let mut session = Session::new(SessionKey::discord("123"));
        let (_writer, reader) = tokio::io::duplex(64);

        let attachment = attach(
            &controller,
            &mut session,
            AudioSource::stream(reader),
            PlayOptions::default(),
        )
        .await;

        let feed = attachment.feed.expect("player should be bound");
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(session.owns_player(feed.player_id));
        assert_eq!(
            session.resource().map(AudioResource::id),
            Some(attachment.resource.id())
        );
        assert_eq!(feed.resource.id(), attachment.resource.id());
        assert_eq!(engine.players().len(), 1);
        assert!(attachment.resource.options().inline_volume);
    }

    #[tokio::test]
    async fn attach_while_playing_returns_unattached_resource() {
        let (engine, controller) = controller();
        let mut session = Session::new(SessionKey::discord("123"));
        let (_w1, r1) = tokio::io::duplex(64);
        let (_w2, r2) = tokio::io::duplex(64);

        let first = attach(
            &controller,
            &mut session,
            AudioSource::stream(r1),
            PlayOptions::default(),
        )
        .await;
        settle().await;
        assert!(controller.is_playing(&session));

        let second = attach(
            &controller,
            &mut session,
            AudioSource::stream(r2),
            PlayOptions::default(),
        )
        .await;

        assert!(second.feed.is_none());
        assert_ne!(second.resource.id(), first.resource.id());
        assert_eq!(
            session.resource().map(AudioResource::id),
            Some(first.resource.id())
        );
        assert_eq!(engine.players().len(), 1);
        // The dropped resource still owns its payload: nobody played it.
        assert!(second.resource.take_source().is_some());
    }

    #[tokio::test]
    async fn on_playing_prefers_stored_volume() {
        let (_, controller) = controller();
        let volumes = VolumeRegistry::new();
        let mut session = Session::new(SessionKey::discord("123"));
        let (_writer, reader) = tokio::io::duplex(64);

        let attachment = attach(
            &controller,
            &mut session,
            AudioSource::stream(reader),
            PlayOptions::default().with_volume(0.5),
        )
        .await;

        controller.on_playing(&mut session, &volumes);
        assert_eq!(attachment.resource.volume(), Some(0.5));

        volumes.set(session.key(), 0.9);
        controller.on_playing(&mut session, &volumes);
        assert_eq!(attachment.resource.volume(), Some(0.9));
        assert_eq!(session.status(), SessionStatus::Playing);
    }

    #[tokio::test]
    async fn stream_end_forgets_only_the_current_resource() {
        let (_, controller) = controller();
        let mut session = Session::new(SessionKey::discord("123"));
        let (_writer, reader) = tokio::io::duplex(64);

        let attachment = attach(
            &controller,
            &mut session,
            AudioSource::stream(reader),
            PlayOptions::default(),
        )
        .await;

        assert!(!controller.on_stream_end(&mut session, attachment.resource.id() + 1000));
        assert!(session.resource().is_some());
        assert!(controller.on_stream_end(&mut session, attachment.resource.id()));
        assert!(session.resource().is_none());
        // The player stays until it reports idle.
        assert!(session.player_status().is_some());
    }

    #[tokio::test]
    async fn stop_is_a_no_op_when_nothing_is_bound() {
        let (engine, controller) = controller();
        let mut session = Session::new(SessionKey::discord("123"));
        assert!(!controller.stop(&mut session));

        let (_writer, reader) = tokio::io::duplex(64);
        attach(
            &controller,
            &mut session,
            AudioSource::stream(reader),
            PlayOptions::default(),
        )
        .await;
        settle().await;

        assert!(controller.stop(&mut session));
        assert!(!controller.stop(&mut session));
        assert!(session.resource().is_none());
        assert_eq!(
            engine.last_player().map(|p| p.status()),
            Some(PlayerStatus::Idle)
        );
    }
}
