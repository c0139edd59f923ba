use std::sync::Arc;

use tokio::sync::Mutex;

/// A thread-safe, mutually exclusive shared component.
pub type Shared<T> = Arc<Mutex<T>>;

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Strongly typed identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub String);

impl From<String> for GuildId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GuildId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::ops::Deref for GuildId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for GuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl From<u64> for UserId {
    fn from(u: u64) -> Self {
        Self(u)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl From<u64> for ChannelId {
    fn from(u: u64) -> Self {
        Self(u)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat platform a command arrived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Discord => "discord",
            Self::Other(name) => name,
        }
    }

    /// Whether the platform has a voice medium this crate can join.
    pub fn supports_voice(&self) -> bool {
        matches!(self, Self::Discord)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index for all per-group voice state: platform plus group scope.
///
/// Rendered as `platform:group`, e.g. `discord:123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    platform: Platform,
    guild_id: GuildId,
}

impl SessionKey {
    pub fn new(platform: Platform, guild_id: impl Into<GuildId>) -> Self {
        Self {
            platform,
            guild_id: guild_id.into(),
        }
    }

    pub fn discord(guild_id: impl Into<GuildId>) -> Self {
        Self::new(Platform::Discord, guild_id)
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.guild_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_renders_platform_and_guild() {
        assert_eq!(SessionKey::discord("123").to_string(), "discord:123");
        assert_eq!(
            SessionKey::new(Platform::Other("matrix".into()), "!room").to_string(),
            "matrix:!room"
        );
    }

    #[test]
    fn session_keys_compare_exactly() {
        assert_eq!(SessionKey::discord("123"), SessionKey::discord("123"));
        assert_ne!(SessionKey::discord("123"), SessionKey::discord("1234"));
        assert_ne!(
            SessionKey::discord("123"),
            SessionKey::new(Platform::Other("discord2".into()), "123")
        );
    }

    #[test]
    fn only_discord_supports_voice() {
        assert!(Platform::Discord.supports_voice());
        assert!(!Platform::Other("telegram".into()).supports_voice());
    }
}
