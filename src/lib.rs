pub mod common;
pub mod configs;
pub mod session;
pub mod voice;

pub use common::{VoiceError, VoiceResult};
pub use session::{PlayOptions, SessionRegistry, SessionStatus};
pub use voice::{AudioSource, CallerContext};
