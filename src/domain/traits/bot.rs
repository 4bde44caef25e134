use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::domain::entities::{ChannelView, User};

/// Exactly one key to resolve a user by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    /// System id; the quickest path, use it when possible.
    Id(i64),
    DiscordId(i64),
    DiscordName(String),
    TwitchName(String),
}

/// Host trait - the single connected destination the runtime serves
///
/// Platform adapters (discord, twitch, console) implement this; the plugin
/// runtime consumes it through the Communicator's bounded surface.
#[async_trait]
pub trait Host: Send + Sync {
    /// Resolve a user by one key. `None` when nothing matched.
    async fn resolve_user(&self, query: UserQuery) -> Result<Option<User>, BotError>;

    /// A channel on the connected server, if present.
    fn channel(&self, channel_id: i64) -> Option<ChannelView>;

    /// The connected stream channel, if the streamer is online.
    fn stream(&self) -> Option<ChannelView>;

    /// Users currently present in stream chat.
    async fn chatters(&self) -> Result<Vec<User>, BotError>;

    /// Command prefixes recognized on message text.
    fn command_prefixes(&self) -> Vec<String>;
}
