use thiserror::Error;

use crate::common::types::Platform;

/// Failures surfaced by the session registry to the command layer.
///
/// Message text is for logs; user-facing wording belongs to the caller.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The caller context has no group (e.g. a direct message).
    #[error("Not in a guild")]
    NotInGroupContext,

    /// The caller's platform has no voice medium.
    #[error("Platform '{0}' does not support voice playback")]
    UnsupportedPlatform(Platform),

    /// The invoking user is not connected to a voice channel.
    #[error("Caller is not in a voice channel")]
    NotInVoiceChannel,

    /// The voice transport refused or failed to join.
    #[error("Failed to join voice channel: {0}")]
    TransportAcquisitionFailed(String),

    /// The audio engine could not build a playable resource.
    #[error("Audio resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Volume outside 0.0..=1.0 or not finite.
    #[error("Invalid volume {0}: expected a value between 0.0 and 1.0")]
    InvalidVolume(f32),

    /// The registry has been shut down.
    #[error("Voice sessions are shutting down")]
    ShuttingDown,
}

impl VoiceError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInGroupContext => "not_in_group_context",
            Self::UnsupportedPlatform(_) => "unsupported_platform",
            Self::NotInVoiceChannel => "not_in_voice_channel",
            Self::TransportAcquisitionFailed(_) => "transport_acquisition_failed",
            Self::ResourceUnavailable(_) => "resource_unavailable",
            Self::InvalidVolume(_) => "invalid_volume",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Convenient Result alias for session operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Checks that `volume` is a finite level within 0.0..=1.0.
pub fn validate_volume(volume: f32) -> VoiceResult<f32> {
    if volume.is_finite() && (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(VoiceError::InvalidVolume(volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(VoiceError::NotInGroupContext.code(), "not_in_group_context");
        assert_eq!(
            VoiceError::TransportAcquisitionFailed("timeout".into()).code(),
            "transport_acquisition_failed"
        );
        assert_eq!(VoiceError::ShuttingDown.code(), "shutting_down");
    }

    #[test]
    fn volume_bounds_are_inclusive() {
        assert_eq!(validate_volume(0.0).ok(), Some(0.0));
        assert_eq!(validate_volume(1.0).ok(), Some(1.0));
        assert!(matches!(
            validate_volume(1.5),
            Err(VoiceError::InvalidVolume(v)) if v == 1.5
        ));
        assert!(validate_volume(-0.1).is_err());
        assert!(validate_volume(f32::NAN).is_err());
    }

    #[test]
    fn display_keeps_collaborator_message() {
        let err = VoiceError::TransportAcquisitionFailed("missing permissions".into());
        assert_eq!(
            err.to_string(),
            "Failed to join voice channel: missing permissions"
        );
    }
}
