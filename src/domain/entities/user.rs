use std::fmt;

/// Represents a user in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub id: i64,
    pub discord_id: Option<i64>,
    pub twitch_name: Option<String>,
    pub display_name: Option<String>,
    pub editor: bool,
}

impl User {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            discord_id: None,
            twitch_name: None,
            display_name: None,
            editor: false,
        }
    }

    pub fn with_discord_id(mut self, id: i64) -> Self {
        self.discord_id = Some(id);
        self
    }

    pub fn with_twitch_name(mut self, name: impl Into<String>) -> Self {
        self.twitch_name = Some(name.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> String {
        if let Some(ref display) = self.display_name {
            display.clone()
        } else if let Some(ref twitch) = self.twitch_name {
            twitch.clone()
        } else {
            self.id.to_string()
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
