use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Chat platform a message originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Twitch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Twitch => "twitch",
        }
    }

    /// Platform-qualified event name, e.g. `discord_message`.
    pub fn qualified_event(&self, event: &str) -> String {
        format!("{}_{}", self.as_str(), event)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of an incoming message as the platform adapter saw it
#[derive(Debug, Clone)]
pub struct MessageAuthor {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub is_bot: bool,
}

impl MessageAuthor {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: name.clone(),
            name,
            is_bot: false,
        }
    }

    pub fn with_display_name(mut self, display: impl Into<String>) -> Self {
        self.display_name = display.into();
        self
    }

    pub fn as_bot(mut self) -> Self {
        self.is_bot = true;
        self
    }
}

/// An incoming chat message, normalized from a platform adapter
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub platform: Platform,
    pub channel_id: Option<i64>,
    pub channel_name: Option<String>,
    pub author: MessageAuthor,
    pub content: String,
    pub tags: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(platform: Platform, author: MessageAuthor, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform,
            channel_id: None,
            channel_name: None,
            author,
            content: content.into(),
            tags: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_channel_id(mut self, id: i64) -> Self {
        self.channel_id = Some(id);
        self
    }

    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = Some(tags);
        self
    }
}
