//! The capability-scoped façade a plugin's entry point receives
//!
//! The Communicator owns the injection registry and exposes the bounded
//! host surface: user lookup, channel/stream lookup, quotes, and settings.
//! It is a plugin's sole gateway to host state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::application::errors::{BotError, PluginError};
use crate::application::messaging::{EventDispatcher, EventPayload};
use crate::domain::entities::{ChannelView, CommandTable, Quote, User};
use crate::domain::traits::{Host, UserQuery};
use crate::infrastructure::database::Storage;

use super::injection::{injection_key, Injection};

/// In-memory settings blob with optional file-backed persistence
#[derive(Clone, Default)]
pub struct SettingsCell {
    inner: Arc<Mutex<SettingsState>>,
}

struct SettingsState {
    values: serde_json::Value,
    save_file: Option<PathBuf>,
}

impl Default for SettingsState {
    fn default() -> Self {
        Self {
            values: serde_json::Value::Object(Default::default()),
            save_file: None,
        }
    }
}

impl SettingsCell {
    /// Load settings from `save_file` when configured. A missing or corrupt
    /// file degrades to empty settings.
    pub fn load_from(save_file: Option<PathBuf>) -> Self {
        let values = save_file
            .as_deref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        Self {
            inner: Arc::new(Mutex::new(SettingsState { values, save_file })),
        }
    }

    /// Re-point a shared cell at a settings file, reading it in place. Used
    /// once per load; every clone observes the new state.
    pub fn reload_from(&self, save_file: Option<PathBuf>) {
        let fresh = Self::load_from(save_file);
        let fresh_state = fresh.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.values = fresh_state.values.clone();
        state.save_file = fresh_state.save_file.clone();
    }

    pub fn get(&self) -> serde_json::Value {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.values.clone()
    }

    /// Replace the settings wholesale, persisting when file-backed.
    pub fn replace(&self, spec: serde_json::Value) -> Result<(), PluginError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = &state.save_file {
            let content = serde_json::to_string(&spec)
                .map_err(|e| PluginError::Validation(format!("unserializable settings: {}", e)))?;
            std::fs::write(path, content)
                .map_err(|e| PluginError::Validation(format!("failed to write settings: {}", e)))?;
        }
        state.values = spec;
        Ok(())
    }

    /// Whether the plugin's own settings mark `command` enabled. Absent
    /// entries count as disabled.
    pub fn command_enabled(&self, command: &str) -> bool {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.values["commands"][command]["enabled"] == serde_json::Value::Bool(true)
    }
}

/// The façade handed to `setup`
pub struct Communicator {
    dispatcher: Arc<EventDispatcher>,
    commands: CommandTable,
    settings: SettingsCell,
    storage: Storage,
    host: Arc<dyn Host>,
    injections: HashMap<&'static str, Vec<String>>,
}

impl Communicator {
    pub(crate) fn new(
        dispatcher: Arc<EventDispatcher>,
        commands: CommandTable,
        settings: SettingsCell,
        storage: Storage,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            dispatcher,
            commands,
            settings,
            storage,
            host,
            injections: HashMap::new(),
        }
    }

    /// Activate every listener and command declared by `unit`. The registry
    /// key is the concrete type name; a second active instance of the same
    /// type is a contract violation.
    pub fn inject<I: Injection>(&mut self, unit: I) -> Result<(), PluginError> {
        let key = injection_key::<I>();
        if self.injections.contains_key(key) {
            return Err(PluginError::Configuration(format!(
                "an injection named {} already exists",
                key
            )));
        }

        let bindings = Arc::new(unit).bindings();
        let mut command_names = Vec::with_capacity(bindings.commands.len());

        for (event, listener) in bindings.listeners {
            self.dispatcher.add_listener(key, event, listener);
        }
        for (name, handler) in bindings.commands {
            self.commands.insert(name.clone(), handler);
            command_names.push(name);
        }

        self.injections.insert(key, command_names);
        Ok(())
    }

    /// Deactivate one injection by its type name.
    pub fn eject(&mut self, key: &str) -> Result<(), PluginError> {
        let Some((key, command_names)) = self.injections.remove_entry(key) else {
            return Err(PluginError::Configuration(
                "this injection has not been injected".to_string(),
            ));
        };

        self.dispatcher.remove_owner(key);
        for name in command_names {
            self.commands.remove(&name);
        }
        Ok(())
    }

    /// Deactivate every injection. Safe with zero injections.
    pub fn eject_all(&mut self) {
        for (key, command_names) in self.injections.drain() {
            self.dispatcher.remove_owner(key);
            for name in command_names {
                self.commands.remove(&name);
            }
        }
    }

    pub fn injected(&self, key: &str) -> bool {
        self.injections.contains_key(key)
    }

    /// Fetch a user by system id, discord id, discord name, or twitch name.
    pub async fn get_user(&self, query: UserQuery) -> Result<Option<User>, BotError> {
        self.host.resolve_user(query).await
    }

    /// A channel on the connected server. `None` when the host is not
    /// connected or the channel was not found.
    pub fn get_channel(&self, channel_id: i64) -> Option<ChannelView> {
        self.host.channel(channel_id)
    }

    /// The connected stream channel.
    pub fn get_stream(&self) -> Option<ChannelView> {
        self.host.stream()
    }

    /// Users currently present in stream chat.
    pub async fn chatters(&self) -> Result<Vec<User>, BotError> {
        self.host.chatters().await
    }

    /// All quotes, oldest first.
    pub fn get_quotes(&self) -> Result<Vec<Quote>, PluginError> {
        Ok(self.storage.quotes()?)
    }

    /// Add a quote. `timestamp` overrides the insert time, which is useful
    /// for undoing accidental deletes.
    pub fn add_quote(&self, quote: &str, timestamp: Option<i64>) -> Result<(), PluginError> {
        let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
        Ok(self.storage.add_quote(quote, timestamp)?)
    }

    /// Delete the quote at `index` in insertion order, returning it.
    pub fn delete_quote(&self, index: usize) -> Result<Option<Quote>, PluginError> {
        Ok(self.storage.delete_quote(index)?)
    }

    /// The plugin's current settings.
    pub fn settings(&self) -> serde_json::Value {
        self.settings.get()
    }

    /// Replace the plugin's settings wholesale; persists when file-backed
    /// and notifies the plugin through `spec_update`.
    pub fn update_settings(&self, spec: serde_json::Value) -> Result<(), PluginError> {
        self.settings.replace(spec.clone())?;
        self.dispatcher.emit("spec_update", EventPayload::Spec(spec));
        Ok(())
    }
}
