use crate::common::{
    errors::{VoiceError, VoiceResult},
    types::{ChannelId, GuildId, Platform, UserId},
};

/// Who invoked a command and from where, as supplied by the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub platform: Platform,
    /// `None` for direct/private message contexts.
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    /// Voice channel the invoking user currently sits in, if any.
    pub voice_channel: Option<ChannelId>,
}

impl CallerContext {
    pub fn discord(guild_id: impl Into<GuildId>, user_id: impl Into<UserId>) -> Self {
        Self {
            platform: Platform::Discord,
            guild_id: Some(guild_id.into()),
            user_id: user_id.into(),
            voice_channel: None,
        }
    }

    /// A context with no group scope.
    pub fn direct(platform: Platform, user_id: impl Into<UserId>) -> Self {
        Self {
            platform,
            guild_id: None,
            user_id: user_id.into(),
            voice_channel: None,
        }
    }

    pub fn in_voice(mut self, channel_id: impl Into<ChannelId>) -> Self {
        self.voice_channel = Some(channel_id.into());
        self
    }

    /// Where the transport should join on behalf of this caller.
    pub fn voice_context(&self) -> VoiceResult<VoiceContext> {
        let guild_id = self
            .guild_id
            .clone()
            .ok_or(VoiceError::NotInGroupContext)?;
        let channel_id = self.voice_channel.ok_or(VoiceError::NotInVoiceChannel)?;

        Ok(VoiceContext {
            guild_id,
            channel_id,
            user_id: self.user_id,
        })
    }
}

/// Guild + channel pair a voice connection is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceContext {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
}
