//! One loaded plugin instance
//!
//! `Unloaded → Loading → Loaded(Enabled|Disabled) → Unloading → Unloaded`.
//! The handler owns the manifest, the private dispatcher, the command table
//! and the Communicator handed to the plugin's entry module. Loading is
//! two-phase: the manager validates the manifest (and checks identifier
//! uniqueness) before any entry-module resolution is attempted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::application::errors::PluginError;
use crate::application::messaging::{EventDispatcher, EventPayload, Listener, MessageParser};
use crate::domain::entities::CommandTable;

use super::communicator::{Communicator, SettingsCell};
use super::loader::{LoadedModule, ModuleLoader};
use super::manifest::{PluginManifest, MANIFEST_FILE};
use super::transfer::{read_package_info, PackageInfo};
use super::RuntimeContext;

/// Owner key for the handler's own message listener
const CORE_OWNER: &str = "core";

pub struct PluginHandler {
    directory: PathBuf,
    ctx: Arc<RuntimeContext>,
    dispatcher: Arc<EventDispatcher>,
    commands: CommandTable,
    settings: SettingsCell,
    comm: Communicator,
    manifest: Option<PluginManifest>,
    module: Option<LoadedModule>,
    ui_spec: Option<serde_json::Value>,
    package_info: Option<PackageInfo>,
    attached_schema: Option<String>,
    enabled: AtomicBool,
}

impl PluginHandler {
    pub fn new(directory: impl Into<PathBuf>, ctx: Arc<RuntimeContext>) -> Self {
        let directory = directory.into();
        let label = directory
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| directory.display().to_string());

        let dispatcher = Arc::new(EventDispatcher::new(
            label,
            ctx.handle.clone(),
            ctx.activity.clone(),
        ));
        let commands = CommandTable::new();
        let settings = SettingsCell::default();
        let comm = Communicator::new(
            dispatcher.clone(),
            commands.clone(),
            settings.clone(),
            ctx.storage.clone(),
            ctx.host.clone(),
        );

        Self {
            directory,
            ctx,
            dispatcher,
            commands,
            settings,
            comm,
            manifest: None,
            module: None,
            ui_spec: None,
            package_info: None,
            attached_schema: None,
            enabled: AtomicBool::new(false),
        }
    }

    /// Phase one of loading: manifest, settings file, UI descriptor. Fails
    /// before the entry module could ever be resolved. The manager checks
    /// identifier uniqueness between this and [`initialize`](Self::initialize).
    pub fn read_manifest(&mut self) -> Result<&PluginManifest, PluginError> {
        let manifest = PluginManifest::from_file(self.directory.join(MANIFEST_FILE))?;

        // Missing or corrupt settings degrade to empty; a declared UI file
        // that is absent or malformed is a hard failure.
        let save_file = manifest.save_file.as_ref().map(|f| self.directory.join(f));
        self.settings.reload_from(save_file);

        if let Some(ui_file) = &manifest.ui_file {
            let path = self.directory.join(ui_file);
            let content = std::fs::read_to_string(&path).map_err(|_| {
                PluginError::Validation(format!(
                    "{} :: load :: ui :: specified ui file not found",
                    manifest.identifier
                ))
            })?;
            let spec = serde_json::from_str(&content).map_err(|_| {
                PluginError::Validation(format!(
                    "{} :: load :: ui :: invalid json file",
                    manifest.identifier
                ))
            })?;
            self.ui_spec = Some(spec);
        }

        Ok(self.manifest.insert(manifest))
    }

    /// Phase two: registry row, schema attachment, entry-module setup.
    pub fn initialize(&mut self, loader: &ModuleLoader) -> Result<(), PluginError> {
        let manifest = self
            .manifest
            .clone()
            .ok_or_else(|| PluginError::Validation("manifest not read".to_string()))?;

        match self.ctx.storage.plugin_row(&manifest.identifier)? {
            Some(row) => {
                self.enabled.store(row.enabled, Ordering::SeqCst);
            }
            None => {
                self.ctx
                    .storage
                    .insert_plugin_row(&manifest.identifier, &manifest.name)?;
            }
        }

        if let Some(schema) = &manifest.schema {
            let file = self.directory.join(&schema.database_file);
            self.ctx.plugin_db.attach(&schema.name, &file)?;
            if let Err(e) = self.ctx.plugin_db.execute_batch(&schema.creation) {
                // No partial attachment may survive a failed creation script.
                let _ = self.ctx.plugin_db.detach(&schema.name);
                return Err(PluginError::Validation(format!(
                    "{} :: load :: schema :: bad SQL statement. {}",
                    manifest.identifier, e
                )));
            }
            self.attached_schema = Some(schema.name.clone());
        }

        if let Err(e) = self.resolve_and_setup(&manifest, loader) {
            // Discarding an instance always takes its attachment with it.
            if let Some(schema) = self.attached_schema.take() {
                let _ = self.ctx.plugin_db.detach(&schema);
            }
            return Err(e);
        }

        // Sidecar left next to the plugin directory by a hub download.
        if let Some(parent) = self.directory.parent() {
            self.package_info =
                read_package_info(&parent.join(format!("{}.plug", manifest.identifier)));
        }

        tracing::debug!(
            "Loaded plugin {} in directory {}",
            manifest.name,
            self.directory.display()
        );
        Ok(())
    }

    fn resolve_and_setup(
        &mut self,
        manifest: &PluginManifest,
        loader: &ModuleLoader,
    ) -> Result<(), PluginError> {
        self.register_command_sweep(manifest);

        let module = loader.resolve(&manifest.loader, &self.directory)?;
        module
            .instance()
            .setup(&mut self.comm)
            .map_err(|e| PluginError::Setup {
                plugin: manifest.name.clone(),
                reason: e.to_string(),
            })?;
        self.module = Some(module);
        Ok(())
    }

    /// The handler's own `message` listener: sweep the text for a prefixed
    /// command, invoke it when the plugin's settings enable it. Unknown or
    /// disabled names are silently ignored.
    fn register_command_sweep(&self, manifest: &PluginManifest) {
        let commands = self.commands.clone();
        let settings = self.settings.clone();
        let host = self.ctx.host.clone();
        let name = manifest.name.clone();
        let identifier = manifest.identifier.clone();

        let listener: Listener = Arc::new(move |payload| {
            let commands = commands.clone();
            let settings = settings.clone();
            let host = host.clone();
            let name = name.clone();
            let identifier = identifier.clone();
            Box::pin(async move {
                let EventPayload::Message(message) = payload else {
                    return Ok(());
                };

                let parser = MessageParser::new(host.command_prefixes());
                let Some((command, _rest)) = parser.command_token(&message.content) else {
                    return Ok(());
                };
                let Some(handler) = commands.get(command) else {
                    return Ok(());
                };
                if !settings.command_enabled(command) {
                    return Ok(());
                }

                if let Err(e) = handler(message).await {
                    tracing::error!("Error in plugin {} ({}): {}", name, identifier, e);
                }
                Ok(())
            })
        });

        self.dispatcher.add_listener(CORE_OWNER, "message", listener);
    }

    pub fn identifier(&self) -> &str {
        self.manifest.as_ref().map(|m| m.identifier.as_str()).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.manifest.as_ref().map(|m| m.name.as_str()).unwrap_or("")
    }

    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.manifest.as_ref()
    }

    pub fn directory(&self) -> &PathBuf {
        &self.directory
    }

    pub fn package_info(&self) -> Option<&PackageInfo> {
        self.package_info.as_ref()
    }

    pub fn ui_spec(&self) -> Option<&serde_json::Value> {
        self.ui_spec.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) -> Result<(), PluginError> {
        self.enabled.store(true, Ordering::SeqCst);
        self.ctx.storage.set_plugin_state(self.identifier(), true)?;
        self.dispatcher.emit("state_update", EventPayload::State(true));
        Ok(())
    }

    pub fn disable(&self) -> Result<(), PluginError> {
        self.enabled.store(false, Ordering::SeqCst);
        self.ctx.storage.set_plugin_state(self.identifier(), false)?;
        self.dispatcher.emit("state_update", EventPayload::State(false));
        Ok(())
    }

    /// Notify the plugin it is about to be torn down.
    pub fn will_unload(&self) {
        self.dispatcher.emit("will_unload", EventPayload::None);
    }

    /// Detach the private schema and eject every injection. Safe to call
    /// with zero injections.
    pub fn unload(&mut self) -> Result<(), PluginError> {
        if let Some(schema) = self.attached_schema.take() {
            self.ctx.plugin_db.detach(&schema)?;
        }
        self.comm.eject_all();
        Ok(())
    }

    /// Forward an event to this instance's dispatcher, respecting the
    /// enabled flag. Listener failures stay inside this plugin.
    pub fn handle_dispatch(&self, event: &str, payload: EventPayload) {
        if self.is_enabled() {
            self.dispatcher.emit(event, payload);
        }
    }

    /// External description of this instance: identity, commands and the
    /// current settings blob.
    pub fn get_spec(&self) -> serde_json::Value {
        let manifest = match &self.manifest {
            Some(m) => m,
            None => return serde_json::Value::Null,
        };

        let commands: Vec<serde_json::Value> = self
            .commands
            .names()
            .into_iter()
            .map(|name| {
                let enabled = self.settings.command_enabled(&name);
                serde_json::json!({ "name": name, "enabled": enabled })
            })
            .collect();

        serde_json::json!({
            "id": manifest.identifier,
            "name": manifest.name,
            "author": {
                "display_name": manifest.author.display_name(),
                "platform_id": manifest.author.discord_id(),
                "email": manifest.author.email(),
            },
            "description": manifest.description,
            "version": manifest.version,
            "commands": commands,
            "existing_settings": self.settings.get(),
        })
    }

    /// Replace the settings wholesale, persisting when file-backed, and
    /// notify the plugin through `spec_update`.
    pub fn set_spec(&self, spec: serde_json::Value) -> Result<(), PluginError> {
        self.settings.replace(spec.clone())?;
        self.dispatcher.emit("spec_update", EventPayload::Spec(spec));
        Ok(())
    }
}
