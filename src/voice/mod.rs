//! Seams to the outside world: who is asking, how to join a voice channel,
//! and how audio gets played. [`loopback`] implements all of them in-process.

pub mod context;
pub mod engine;
pub mod loopback;
pub mod transport;

pub use context::{CallerContext, VoiceContext};
pub use engine::{
    AudioEngine, AudioPlayer, AudioResource, AudioSource, PlayerId, PlayerStatus, ResourceId,
    ResourceOptions,
};
pub use loopback::{LoopbackEngine, LoopbackTransport};
pub use transport::{ConnectionState, VoiceConnection, VoiceTransport};
