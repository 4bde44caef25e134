//! Plugin runtime for strix-bot
//!
//! Discovers, loads, hot-reloads and network-distributes extension
//! packages, fans platform events out to them with per-plugin failure
//! containment, and watches the scheduler for stalls from an independent
//! thread.

use std::sync::Arc;

use crate::application::messaging::ActivityTracker;
use crate::domain::entities::OutboundSender;
use crate::domain::traits::Host;
use crate::infrastructure::database::Storage;

pub mod communicator;
pub mod handler;
pub mod injection;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod monitor;
pub mod transfer;

pub use communicator::Communicator;
pub use handler::PluginHandler;
pub use injection::{Injection, InjectionBindings};
pub use loader::{EntryModule, ModuleLoader};
pub use manager::PluginManager;
pub use manifest::{Author, PluginManifest, SchemaSpec};
pub use monitor::StackMonitor;

/// Shared services every plugin instance is built against
pub struct RuntimeContext {
    /// System database: registry rows, quotes, users
    pub storage: Storage,
    /// Engine hosting per-plugin attached schemas
    pub plugin_db: Storage,
    /// The single connected destination
    pub host: Arc<dyn Host>,
    /// Sink for messages plugins send back to the platform
    pub outbound: OutboundSender,
    /// The cooperative scheduler running all host and plugin logic
    pub handle: tokio::runtime::Handle,
    /// What the scheduler is executing right now, for the liveness monitor
    pub activity: ActivityTracker,
}
