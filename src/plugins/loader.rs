//! Entry-module resolution
//!
//! A plugin's `loader` key names its entry module. Resolution checks the
//! in-process factory registry first (builtin bundles, test doubles), then
//! falls back to a dynamically loaded shared library in the plugin
//! directory. The library handle travels with the instance so that dropping
//! a [`LoadedModule`] purges the module's cached representation, which is
//! what lets a hot reload pick up fresh code.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use libloading::{Library, Symbol};

use crate::application::errors::PluginError;

use super::communicator::Communicator;

/// Symbol every plugin shared library must export
pub const ENTRY_SYMBOL: &[u8] = b"strix_plugin_entry";

/// Function signature for the exported entry symbol
pub type EntryInitFn = extern "C" fn() -> *mut dyn EntryModule;

/// Contract every entry module satisfies: `setup` is invoked exactly once
/// at load time with the instance's Communicator.
pub trait EntryModule: Send + Sync {
    fn setup(&self, comm: &mut Communicator) -> Result<(), PluginError>;
}

/// Factory for in-process entry modules
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn EntryModule> + Send + Sync>;

/// A resolved entry module together with its library handle, if any
pub struct LoadedModule {
    #[allow(dead_code)]
    library: Option<Library>,
    instance: Arc<dyn EntryModule>,
}

impl LoadedModule {
    pub fn instance(&self) -> &dyn EntryModule {
        self.instance.as_ref()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("library", &self.library.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolves `loader` keys to entry modules
#[derive(Default)]
pub struct ModuleLoader {
    factories: Mutex<HashMap<String, ModuleFactory>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-process entry module under a loader key.
    pub fn register<F>(&self, loader: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn EntryModule> + Send + Sync + 'static,
    {
        let mut factories = self.factories.lock().unwrap_or_else(|e| e.into_inner());
        factories.insert(loader.into(), Arc::new(factory));
    }

    /// Resolve a manifest's `loader` key against `plugin_dir`.
    pub fn resolve(&self, loader: &str, plugin_dir: &Path) -> Result<LoadedModule, PluginError> {
        let factory = {
            let factories = self.factories.lock().unwrap_or_else(|e| e.into_inner());
            factories.get(loader).cloned()
        };
        if let Some(factory) = factory {
            return Ok(LoadedModule {
                library: None,
                instance: factory().into(),
            });
        }

        self.load_library(loader, plugin_dir)
    }

    fn load_library(&self, loader: &str, plugin_dir: &Path) -> Result<LoadedModule, PluginError> {
        let library_path = plugin_dir.join(format!("lib{}.so", loader));
        if !library_path.exists() {
            return Err(PluginError::Validation(format!(
                "{} :: invalid loader key",
                super::manifest::MANIFEST_FILE
            )));
        }

        let library = unsafe {
            Library::new(&library_path)
                .map_err(|e| PluginError::Validation(format!("failed to load library: {}", e)))?
        };

        let init_fn: Symbol<EntryInitFn> = unsafe {
            library
                .get(ENTRY_SYMBOL)
                .map_err(|e| PluginError::Validation(format!("failed to find entry symbol: {}", e)))?
        };

        let instance = unsafe {
            let ptr = init_fn();
            if ptr.is_null() {
                return Err(PluginError::Validation(
                    "plugin entry returned null".to_string(),
                ));
            }
            Arc::from_raw(ptr)
        };

        Ok(LoadedModule {
            library: Some(library),
            instance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl EntryModule for Noop {
        fn setup(&self, _comm: &mut Communicator) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn registered_factory_wins() {
        let loader = ModuleLoader::new();
        loader.register("main", || Box::new(Noop));
        let module = loader.resolve("main", Path::new("/nonexistent")).unwrap();
        assert!(module.library.is_none());
    }

    #[test]
    fn unknown_loader_key_fails() {
        let loader = ModuleLoader::new();
        let err = loader
            .resolve("missing", Path::new("/nonexistent"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid loader key"));
    }
}
