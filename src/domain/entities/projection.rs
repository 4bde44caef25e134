//! Platform-neutral views handed to plugin code
//!
//! Built fresh for every dispatch, never persisted. Plugins see opaque
//! id/name fields plus a `send` capability; platform identity is reduced to
//! the [`Platform`] tag.

use tokio::sync::mpsc;

use super::message::{Message, Platform};
use crate::application::errors::BotError;

/// Sink for messages a plugin wants delivered back to the platform
pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;

/// Where an outbound message should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Channel {
        platform: Platform,
        id: Option<i64>,
        name: Option<String>,
    },
    Direct {
        user_id: i64,
    },
}

/// A message queued for delivery by the host
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub destination: Destination,
    pub content: String,
}

/// Reduced view of the channel a message arrived in
#[derive(Clone)]
pub struct ChannelView {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub platform: Platform,
    sender: OutboundSender,
}

impl ChannelView {
    pub fn new(
        platform: Platform,
        id: Option<i64>,
        name: Option<String>,
        sender: OutboundSender,
    ) -> Self {
        Self {
            id,
            name,
            platform,
            sender,
        }
    }

    /// Queue a message back to this channel.
    pub fn send(&self, content: impl Into<String>) -> Result<(), BotError> {
        self.sender
            .send(OutboundMessage {
                destination: Destination::Channel {
                    platform: self.platform,
                    id: self.id,
                    name: self.name.clone(),
                },
                content: content.into(),
            })
            .map_err(|_| BotError::Internal("outbound channel closed".to_string()))
    }
}

impl std::fmt::Debug for ChannelView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelView")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("platform", &self.platform)
            .finish()
    }
}

/// Reduced view of a message author
#[derive(Clone)]
pub struct UserView {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub is_bot: bool,
    sender: Option<OutboundSender>,
}

impl UserView {
    pub fn new(id: i64, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            display_name: display_name.into(),
            is_bot: false,
            sender: None,
        }
    }

    pub fn with_dm_sender(mut self, sender: OutboundSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn as_bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Whether the host can deliver a direct message to this user.
    pub fn can_dm(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a direct message. A no-op when the platform offers no DM path.
    pub fn send(&self, content: impl Into<String>) -> Result<(), BotError> {
        if let Some(sender) = &self.sender {
            sender
                .send(OutboundMessage {
                    destination: Destination::Direct { user_id: self.id },
                    content: content.into(),
                })
                .map_err(|_| BotError::Internal("outbound channel closed".to_string()))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for UserView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserView")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("is_bot", &self.is_bot)
            .finish()
    }
}

/// Platform-neutral message projection delivered to plugin listeners
#[derive(Debug, Clone)]
pub struct MessageView {
    pub channel: ChannelView,
    pub author: UserView,
    pub content: String,
    pub tags: Option<std::collections::HashMap<String, String>>,
    pub platform: Platform,
}

impl MessageView {
    /// Build the projection for one dispatch of `message`.
    pub fn from_message(message: &Message, outbound: OutboundSender) -> Self {
        let channel = ChannelView::new(
            message.platform,
            message.channel_id,
            message.channel_name.clone(),
            outbound.clone(),
        );

        let mut author = UserView::new(
            message.author.id,
            message.author.name.clone(),
            message.author.display_name.clone(),
        );
        if message.author.is_bot {
            author = author.as_bot();
        }
        // Twitch chat offers no DM path from here; discord authors do.
        if message.platform == Platform::Discord && !message.author.is_bot {
            author = author.with_dm_sender(outbound);
        }

        Self {
            channel,
            author,
            content: message.content.clone(),
            tags: message.tags.clone(),
            platform: message.platform,
        }
    }
}
