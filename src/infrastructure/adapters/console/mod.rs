//! Console adapter for development/testing
//!
//! Stands in for the discord/twitch adapters: stdin lines become twitch
//! messages, outbound plugin messages print to stdout, and `:`-prefixed
//! lines drive the manager's command surface.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::application::errors::BotError;
use crate::domain::entities::{
    ChannelView, Message, MessageAuthor, OutboundMessage, OutboundSender, Platform, User,
};
use crate::domain::traits::{Host, UserQuery};
use crate::infrastructure::database::Storage;
use crate::plugins::PluginManager;

/// Console host for local development
pub struct ConsoleHost {
    prefixes: Vec<String>,
    storage: Storage,
    outbound: OutboundSender,
}

impl ConsoleHost {
    pub fn new(prefixes: Vec<String>, storage: Storage, outbound: OutboundSender) -> Self {
        Self {
            prefixes,
            storage,
            outbound,
        }
    }
}

#[async_trait]
impl Host for ConsoleHost {
    async fn resolve_user(&self, query: UserQuery) -> Result<Option<User>, BotError> {
        let user = match query {
            UserQuery::Id(id) => self.storage.user_by_id(id)?,
            UserQuery::DiscordId(id) => self.storage.user_by_discord_id(id)?,
            UserQuery::DiscordName(name) => self.storage.user_by_display_name(&name)?,
            UserQuery::TwitchName(name) => self.storage.user_by_twitch_name(&name)?,
        };
        Ok(user)
    }

    fn channel(&self, channel_id: i64) -> Option<ChannelView> {
        Some(ChannelView::new(
            Platform::Discord,
            Some(channel_id),
            None,
            self.outbound.clone(),
        ))
    }

    fn stream(&self) -> Option<ChannelView> {
        Some(ChannelView::new(
            Platform::Twitch,
            None,
            Some("console".to_string()),
            self.outbound.clone(),
        ))
    }

    async fn chatters(&self) -> Result<Vec<User>, BotError> {
        Ok(Vec::new())
    }

    fn command_prefixes(&self) -> Vec<String> {
        self.prefixes.clone()
    }
}

/// Print queued plugin output as it arrives.
pub fn spawn_outbound_printer(mut rx: mpsc::UnboundedReceiver<OutboundMessage>) {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            println!("[BOT] {}", message.content);
        }
    });
}

/// Read stdin until EOF or `:quit`, dispatching chat lines to plugins and
/// `:`-commands to the manager.
pub async fn run_console(manager: &mut PluginManager) {
    tracing::info!("Console mode; type :help for runtime commands");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix(':') {
            if !handle_runtime_command(manager, command).await {
                break;
            }
            continue;
        }

        let author = MessageAuthor::new(0, "console");
        let message = Message::new(Platform::Twitch, author, line).with_channel_name("console");
        manager.dispatch_message(&message);
        // Let the spawned listener tasks run before the next read.
        tokio::task::yield_now().await;
    }
}

/// Returns `false` when the loop should exit.
async fn handle_runtime_command(manager: &mut PluginManager, command: &str) -> bool {
    let mut parts = command.split_whitespace();
    let verb = parts.next().unwrap_or("");
    let arg = parts.next().map(|s| s.to_string());

    match (verb, arg) {
        ("quit", _) => return false,
        ("list", _) => {
            for identifier in manager.identifiers() {
                let enabled = manager
                    .get(&identifier)
                    .map(|h| h.is_enabled())
                    .unwrap_or(false);
                println!("{} (enabled: {})", identifier, enabled);
            }
            for (path, error) in manager.load_errors() {
                println!("failed: {} :: {}", path.display(), error);
            }
        }
        ("enable", Some(id)) => match manager.get(&id) {
            Some(handler) => match handler.enable() {
                Ok(()) => println!("enabled {}", id),
                Err(e) => println!("{}", e),
            },
            None => println!("unknown plugin {}", id),
        },
        ("disable", Some(id)) => match manager.get(&id) {
            Some(handler) => match handler.disable() {
                Ok(()) => println!("disabled {}", id),
                Err(e) => println!("{}", e),
            },
            None => println!("unknown plugin {}", id),
        },
        ("reload", Some(id)) => match manager.reload(&id).await {
            Ok(()) => println!("reloaded {}", id),
            Err(e) => println!("{}", e),
        },
        ("reload-all", _) => match manager.reload_all().await {
            Ok(()) => println!("reloaded all plugins"),
            Err(e) => println!("{}", e),
        },
        ("download", Some(id)) => println!("{}", manager.download_plugin(&id).await),
        ("update", Some(id)) => println!("{}", manager.update_plugin(&id).await),
        ("upload", Some(id)) => println!("{}", manager.upload_plugin(&id, None).await),
        ("help", _) => {
            println!(
                ":list | :enable <id> | :disable <id> | :reload <id> | :reload-all | \
                 :download <id> | :update <id> | :upload <id> | :quit"
            );
        }
        _ => println!("unknown command; try :help"),
    }
    true
}

/// Convenience constructor for the dev-mode wiring.
pub fn console_pair(
    prefixes: Vec<String>,
    storage: Storage,
) -> (Arc<ConsoleHost>, OutboundSender, mpsc::UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let host = Arc::new(ConsoleHost::new(prefixes, storage, tx.clone()));
    (host, tx, rx)
}
