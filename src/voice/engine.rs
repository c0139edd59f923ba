//! Audio engine seam: resources, players and the statuses they report.
//!
//! The session core never decodes audio. It asks an [`AudioEngine`] for a
//! playable [`AudioResource`] and an [`AudioPlayer`], binds them, and reacts to
//! the player's status stream.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::common::types::AnyResult;

pub type PlayerId = u64;
pub type ResourceId = u64;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerStatus {
    Playing,
    /// Nothing left to play: the resource finished or was stopped.
    Idle,
    Buffering,
    Paused,
    /// Paused by the engine because no connection is subscribed.
    AutoPaused,
}

/// Audio to play: a live byte stream, an in-memory buffer, or a locator
/// (path/URL) the engine resolves itself.
pub enum AudioSource {
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    Buffer(Bytes),
    Locator(String),
}

impl AudioSource {
    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Stream(_) => "stream".to_string(),
            Self::Buffer(bytes) => format!("buffer ({} bytes)", bytes.len()),
            Self::Locator(locator) => locator.clone(),
        }
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioSource({})", self.describe())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResourceOptions {
    /// Enables live volume control on the resource.
    pub inline_volume: bool,
    pub seek: Option<Duration>,
    pub bitrate: Option<u32>,
}

/// A bound, playable instance of an [`AudioSource`].
///
/// Cheap to clone; clones share volume, payload and end-of-stream state.
#[derive(Clone)]
pub struct AudioResource {
    inner: Arc<ResourceInner>,
}

struct ResourceInner {
    id: ResourceId,
    label: String,
    options: ResourceOptions,
    volume: Option<AtomicU32>, // f32 bits
    source: parking_lot::Mutex<Option<AudioSource>>,
    ended: CancellationToken,
}

impl AudioResource {
    pub fn new(source: AudioSource, options: ResourceOptions) -> Self {
        let volume = options
            .inline_volume
            .then(|| AtomicU32::new(1.0f32.to_bits()));

        Self {
            inner: Arc::new(ResourceInner {
                id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
                label: source.describe(),
                options,
                volume,
                source: parking_lot::Mutex::new(Some(source)),
                ended: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn options(&self) -> ResourceOptions {
        self.inner.options
    }

    /// Current live volume, or `None` when inline volume is disabled.
    pub fn volume(&self) -> Option<f32> {
        self.inner
            .volume
            .as_ref()
            .map(|v| f32::from_bits(v.load(Ordering::Acquire)))
    }

    /// Returns `false` when the resource has no inline volume control.
    pub fn set_volume(&self, level: f32) -> bool {
        match &self.inner.volume {
            Some(v) => {
                v.store(level.to_bits(), Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Hands the payload to a player. Only the first caller gets it.
    pub fn take_source(&self) -> Option<AudioSource> {
        self.inner.source.lock().take()
    }

    /// Signals that the underlying source has no more data.
    pub fn mark_ended(&self) {
        self.inner.ended.cancel();
    }

    pub fn has_ended(&self) -> bool {
        self.inner.ended.is_cancelled()
    }

    /// Resolves once the source signals end-of-data.
    pub async fn ended(&self) {
        self.inner.ended.cancelled().await
    }
}

impl fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioResource")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("volume", &self.volume())
            .field("ended", &self.has_ended())
            .finish()
    }
}

/// Engine instance driving one resource at a time.
pub trait AudioPlayer: Send + Sync {
    fn id(&self) -> PlayerId;

    fn play(&self, resource: &AudioResource);

    /// Stops playback; the player reports `Idle` afterwards. Returns whether
    /// anything was playing.
    fn stop(&self, force: bool) -> bool;

    fn status(&self) -> PlayerStatus;

    /// Registers a listener for status transitions made after this call.
    fn subscribe(&self) -> flume::Receiver<PlayerStatus>;
}

#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Builds a resource; may open files or network streams.
    async fn create_resource(
        &self,
        source: AudioSource,
        options: ResourceOptions,
    ) -> AnyResult<AudioResource>;

    fn create_player(&self) -> Arc<dyn AudioPlayer>;
}
