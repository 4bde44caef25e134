use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use super::projection::MessageView;
use crate::application::errors::PluginError;

/// Future returned by a plugin command handler
pub type CommandFuture = Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send>>;

/// Command handler function type
pub type CommandFn = Arc<dyn Fn(MessageView) -> CommandFuture + Send + Sync>;

/// Command table for one plugin instance
///
/// Shared between the instance's Communicator (which fills it through
/// injections) and the instance itself (which sweeps it on message events).
#[derive(Default, Clone)]
pub struct CommandTable {
    commands: Arc<Mutex<HashMap<String, CommandFn>>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, handler: CommandFn) {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.insert(name.into(), handler);
    }

    pub fn remove(&self, name: &str) {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<CommandFn> {
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
