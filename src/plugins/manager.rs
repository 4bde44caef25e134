//! Plugin manager - discovery, lifecycle, event fan-out and remote transfer

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::application::errors::{BotError, PluginError, TransportError};
use crate::application::messaging::EventPayload;
use crate::domain::entities::{Message, MessageView};
use crate::infrastructure::config::Config;

use super::handler::PluginHandler;
use super::loader::ModuleLoader;
use super::manifest::MANIFEST_FILE;
use super::monitor::{MonitorStats, StackMonitor};
use super::transfer::{
    pack_plugin, sanitize_id, unpack_archive, valid_identifier, validate_archive, HubClient,
    UploadRequest,
};
use super::RuntimeContext;

/// Scheduler passes yielded before teardown so in-flight listener tasks get
/// a chance to finish. A heuristic, not a guarantee.
const DRAIN_PASSES: usize = 5;

/// Manages every plugin instance for the bot
pub struct PluginManager {
    ctx: Arc<RuntimeContext>,
    loader: Arc<ModuleLoader>,
    plugins: HashMap<String, PluginHandler>,
    errors: Vec<(PathBuf, String)>,
    hub: HubClient,
    download_lock: tokio::sync::Mutex<()>,
    monitor: StackMonitor,
    plugin_root: PathBuf,
    tmp_dir: PathBuf,
}

impl PluginManager {
    pub fn new(ctx: Arc<RuntimeContext>, loader: Arc<ModuleLoader>, config: &Config) -> Self {
        let plugin_root = config.plugins.directory.clone();
        let tmp_dir = plugin_root
            .parent()
            .map(|p| p.join("tmp"))
            .unwrap_or_else(|| PathBuf::from("tmp"));

        let mut monitor = StackMonitor::with_timing(
            ctx.handle.clone(),
            ctx.activity.clone(),
            std::time::Duration::from_secs(config.monitor.check_interval_secs),
            std::time::Duration::from_secs(config.monitor.block_threshold_secs),
        );
        if config.monitor.enabled {
            monitor.start();
        }

        Self {
            ctx,
            loader,
            plugins: HashMap::new(),
            errors: Vec::new(),
            hub: HubClient::new(config.hub.base_url.clone(), config.hub.token.clone()),
            download_lock: tokio::sync::Mutex::new(()),
            monitor,
            plugin_root,
            tmp_dir,
        }
    }

    /// Scan the plugin root and load every directory carrying a manifest.
    /// One plugin's validation failure is recorded and never aborts the
    /// scan of the rest.
    pub async fn discover(&mut self) -> Result<(), PluginError> {
        if !self.plugin_root.is_dir() {
            std::fs::create_dir_all(&self.plugin_root).map_err(|e| {
                PluginError::Validation(format!("failed to create plugin root: {}", e))
            })?;
        }

        let entries = std::fs::read_dir(&self.plugin_root)
            .map_err(|e| PluginError::Validation(format!("failed to read plugin root: {}", e)))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            debug!("Scanning path {}", path.display());

            if !path.join(MANIFEST_FILE).exists() {
                info!("Missing {}; skipping load of {}", MANIFEST_FILE, path.display());
                continue;
            }

            if let Err(e) = self.load(&path).await {
                debug!("failed to load plugin at {}: {}", path.display(), e);
                self.errors.push((path, e.to_string()));
            }
        }

        Ok(())
    }

    /// Load one plugin directory and register it by identifier. A duplicate
    /// identifier discards the new instance and leaves the existing one
    /// untouched.
    pub async fn load(&mut self, path: impl Into<PathBuf>) -> Result<String, PluginError> {
        let path = path.into();
        let mut handler = PluginHandler::new(&path, self.ctx.clone());

        let manifest = handler.read_manifest()?;
        let identifier = manifest.identifier.clone();
        if self.plugins.contains_key(&identifier) {
            return Err(PluginError::Validation(format!(
                "Bundle identifier already exists: {}",
                identifier
            )));
        }

        handler.initialize(&self.loader)?;
        self.plugins.insert(identifier.clone(), handler);
        Ok(identifier)
    }

    /// Tear a plugin down and load it fresh from the same directory. Not
    /// atomic: a failure after teardown leaves the plugin unloaded.
    pub async fn reload(&mut self, identifier: &str) -> Result<(), PluginError> {
        let handler = self
            .plugins
            .get(identifier)
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
        debug!("Reloading plugin {}", handler.name());

        handler.will_unload();
        Self::drain_passes().await;

        let mut handler = self
            .plugins
            .remove(identifier)
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
        let directory = handler.directory().clone();
        handler.unload()?;
        // Dropping the handler releases the module handle, purging its
        // cached representation before the fresh load.
        drop(handler);

        self.load(directory).await?;
        Ok(())
    }

    /// Unload everything and rescan the plugin root.
    pub async fn reload_all(&mut self) -> Result<(), PluginError> {
        debug!("Reloading all plugins : start unload");
        self.unload_all().await;
        debug!("Reloading all plugins : start load");
        self.discover().await?;
        debug!("Reloading all plugins : complete");
        Ok(())
    }

    /// Broadcast `will_unload`, let in-flight listener tasks drain, then
    /// unload each instance and clear the registry.
    pub async fn unload_all(&mut self) {
        for handler in self.plugins.values() {
            handler.will_unload();
        }

        Self::drain_passes().await;

        for (identifier, mut handler) in self.plugins.drain() {
            if let Err(e) = handler.unload() {
                warn!("failed to unload plugin {}: {}", identifier, e);
            }
        }
    }

    async fn drain_passes() {
        // Run through the scheduler a few times so emitted listener tasks
        // get a chance to run before teardown.
        for _ in 0..DRAIN_PASSES {
            tokio::task::yield_now().await;
        }
    }

    /// Fan a message event out to every instance: once under the
    /// platform-qualified name, once under the generic `message`, both
    /// carrying the platform-neutral projection built for this dispatch.
    pub fn dispatch_message(&self, message: &Message) {
        let view = MessageView::from_message(message, self.ctx.outbound.clone());
        let qualified = message.platform.qualified_event("message");

        for handler in self.plugins.values() {
            handler.handle_dispatch(&qualified, EventPayload::Message(view.clone()));
        }
        for handler in self.plugins.values() {
            handler.handle_dispatch("message", EventPayload::Message(view.clone()));
        }
    }

    /// Fan any other event out to every instance.
    pub fn dispatch(&self, event: &str, payload: EventPayload) {
        for handler in self.plugins.values() {
            handler.handle_dispatch(event, payload.clone());
        }
    }

    /// Fetch, validate and install a plugin package from the hub, then load
    /// it. Always reports through the returned string; never panics or
    /// propagates past this boundary.
    pub async fn download_plugin(&mut self, plugin_id: &str) -> String {
        match self.download_and_install(plugin_id).await {
            Ok(identifier) => {
                info!("Downloaded plugin {}", identifier);
                format!("Successfully installed {}", identifier)
            }
            Err(e) => Self::user_message(e),
        }
    }

    async fn download_and_install(&mut self, plugin_id: &str) -> Result<String, BotError> {
        let installed = self.fetch_and_unpack(plugin_id).await?;
        let identifier = self.load(installed).await?;
        Ok(identifier)
    }

    async fn fetch_and_unpack(&self, plugin_id: &str) -> Result<PathBuf, TransportError> {
        if !self.tmp_dir.is_dir() {
            std::fs::create_dir_all(&self.tmp_dir)?;
        }

        let archive = self.hub.download(plugin_id, &self.tmp_dir).await?;

        if let Err(e) = validate_archive(&archive) {
            let _ = std::fs::remove_file(&archive);
            debug!(
                "aborted plugin unpackaging ({}): downloaded file was not a valid archive",
                plugin_id
            );
            return Err(e);
        }

        // Serialize installs: two concurrent extractions would trample the
        // shared `plugin/` staging name.
        let _guard = self.download_lock.lock().await;
        match unpack_archive(&archive, &self.plugin_root, plugin_id) {
            Ok(target) => Ok(target),
            Err(e) => {
                let _ = std::fs::remove_file(&archive);
                let _ = std::fs::remove_dir_all(self.plugin_root.join("plugin"));
                let _ = std::fs::remove_dir_all(self.plugin_root.join(sanitize_id(plugin_id)));
                Err(e)
            }
        }
    }

    /// Replace an installed plugin with the hub's newer build. Any
    /// mid-sequence failure leaves the plugin uninstalled.
    pub async fn update_plugin(&mut self, plugin_id: &str) -> String {
        match self.try_update(plugin_id).await {
            Ok(message) => message,
            Err(e) => Self::user_message(e),
        }
    }

    async fn try_update(&mut self, plugin_id: &str) -> Result<String, BotError> {
        let handler = self.plugins.get(plugin_id).ok_or_else(|| {
            BotError::NotFound("Plugin does not exist, or is not installed".to_string())
        })?;
        let info = handler.package_info().cloned().ok_or_else(|| {
            BotError::NotFound(
                "This plugin does not appear to have been installed from the hub".to_string(),
            )
        })?;
        let old_version = handler
            .manifest()
            .map(|m| m.version.clone())
            .unwrap_or_default();

        let published = self.hub.published(plugin_id).await?;
        if info.numeric_version >= published.numeric_version {
            return Ok("This plugin is up to date!".to_string());
        }

        let mut handler = self
            .plugins
            .remove(plugin_id)
            .ok_or_else(|| BotError::NotFound(plugin_id.to_string()))?;
        handler.will_unload();
        Self::drain_passes().await;
        handler.unload().map_err(BotError::Plugin)?;
        let directory = handler.directory().clone();
        drop(handler);

        std::fs::remove_dir_all(&directory)
            .map_err(|e| BotError::Internal(format!("failed to remove old version: {}", e)))?;
        let _ = std::fs::remove_file(self.plugin_root.join(format!("{}.plug", plugin_id)));

        self.fetch_and_unpack(plugin_id).await?;
        let identifier = self.load(directory).await?;

        let new_numeric = self
            .plugins
            .get(&identifier)
            .and_then(|h| h.package_info())
            .map(|i| i.numeric_version)
            .unwrap_or(published.numeric_version);
        let new_version = self
            .plugins
            .get(&identifier)
            .and_then(|h| h.manifest())
            .map(|m| m.version.clone())
            .unwrap_or_default();

        Ok(format!(
            "Successfully updated from version {} ({}) -> version {} ({})",
            old_version, info.numeric_version, new_version, new_numeric
        ))
    }

    /// Package a loaded plugin and publish it through the hub.
    pub async fn upload_plugin(&self, identifier: &str, targets: Option<Vec<i64>>) -> String {
        match self.try_upload(identifier, targets).await {
            Ok(()) => {
                info!("successfully uploaded {}", identifier);
                format!("Successfully uploaded {}", identifier)
            }
            Err(e) => Self::user_message(e),
        }
    }

    async fn try_upload(&self, identifier: &str, targets: Option<Vec<i64>>) -> Result<(), BotError> {
        let handler = self.plugins.get(identifier).ok_or_else(|| {
            BotError::NotFound("Plugin does not exist, or is not installed".to_string())
        })?;
        debug!("User requests upload for plugin {} ({})", handler.name(), identifier);

        let mut errors: Vec<&str> = Vec::new();
        if !valid_identifier(identifier) {
            errors.push("Plugin ID contains invalid characters");
        }
        if let Some(info) = handler.package_info() {
            if info.id != identifier {
                errors.push("Plugin identifier cannot change");
            }
        }
        if !errors.is_empty() {
            debug!("Aborted due to the following errors: {}", errors.join(", "));
            return Err(PluginError::Validation(errors.join("\n")).into());
        }

        if !self.tmp_dir.is_dir() {
            std::fs::create_dir_all(&self.tmp_dir)
                .map_err(|e| BotError::Transport(TransportError::Io(e)))?;
        }
        let archive = pack_plugin(handler.directory(), &self.tmp_dir, identifier)
            .map_err(BotError::Transport)?;

        let manifest = handler
            .manifest()
            .ok_or_else(|| BotError::Internal("plugin has no manifest".to_string()))?;
        let request = UploadRequest {
            id: identifier.to_string(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            discord_id: manifest.author.discord_id(),
            targets,
        };

        let result = self.hub.publish(&request, &archive).await;
        let _ = std::fs::remove_file(&archive);
        result?;
        Ok(())
    }

    /// One spec blob per instance, for the external settings surface.
    pub fn assemble_spec(&self) -> Vec<serde_json::Value> {
        self.plugins.values().map(|h| h.get_spec()).collect()
    }

    fn user_message(err: BotError) -> String {
        match err {
            BotError::NotFound(message) => message,
            BotError::Transport(TransportError::Rejected(message)) => message,
            BotError::Transport(TransportError::InvalidArchive(message)) => message,
            other => other.to_string(),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&PluginHandler> {
        self.plugins.get(identifier)
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Per-plugin load failures recorded by [`discover`](Self::discover).
    pub fn load_errors(&self) -> &[(PathBuf, String)] {
        &self.errors
    }

    pub fn monitor_stats(&self) -> Arc<MonitorStats> {
        self.monitor.stats()
    }
}
