//! strix-bot: a stream chat bot built around a hot-reloadable plugin
//! runtime.
//!
//! The [`plugins`] module is the core: discovery and dynamic loading of
//! extension packages, per-plugin storage isolation, fire-and-forget event
//! fan-out, networked package distribution and a scheduler watchdog.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;
