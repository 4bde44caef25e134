//! Declarative extension units
//!
//! An injection is a reusable bundle of event listeners and commands a
//! plugin registers as one unit. The concrete type declares its bindings
//! once in [`Injection::bindings`]; the Communicator activates them under
//! the concrete type's name, so tables are never shared across unrelated
//! types and at most one instance of a type can be active at a time.

use std::future::Future;
use std::sync::Arc;

use crate::application::errors::PluginError;
use crate::application::messaging::{EventPayload, Listener};
use crate::domain::entities::{CommandFn, MessageView};

/// A reusable bundle of listeners and commands
///
/// Implementors hold their own state behind `Arc` and wire their methods in
/// `bindings`:
///
/// ```ignore
/// struct Welcome;
///
/// impl Injection for Welcome {
///     fn bindings(self: Arc<Self>) -> InjectionBindings {
///         InjectionBindings::new()
///             .listen("message", {
///                 let this = self.clone();
///                 move |payload| {
///                     let this = this.clone();
///                     async move { this.on_message(payload).await }
///                 }
///             })
///             .command("hello", {
///                 let this = self;
///                 move |message| {
///                     let this = this.clone();
///                     async move { this.hello(message).await }
///                 }
///             })
///     }
/// }
/// ```
pub trait Injection: Send + Sync + 'static {
    /// Declare every listener and command this unit activates.
    fn bindings(self: Arc<Self>) -> InjectionBindings;
}

/// Listener/command table declared by one injection type
#[derive(Default)]
pub struct InjectionBindings {
    pub(crate) listeners: Vec<(String, Listener)>,
    pub(crate) commands: Vec<(String, CommandFn)>,
}

impl InjectionBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener to `event`.
    pub fn listen<F, Fut>(mut self, event: impl Into<String>, callback: F) -> Self
    where
        F: Fn(EventPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |payload| Box::pin(callback(payload)));
        self.listeners.push((event.into(), listener));
        self
    }

    /// Bind a command handler to `name`.
    pub fn command<F, Fut>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(MessageView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        let handler: CommandFn = Arc::new(move |message| Box::pin(callback(message)));
        self.commands.push((name.into(), handler));
        self
    }
}

/// Registry key for a concrete injection type: its unqualified type name.
pub(crate) fn injection_key<I: Injection>() -> &'static str {
    let full = std::any::type_name::<I>();
    full.rsplit("::").next().unwrap_or(full)
}
