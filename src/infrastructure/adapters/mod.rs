//! Platform adapters
//!
//! The discord and twitch adapters live outside this crate; the console
//! adapter drives the runtime in dev mode.

pub mod console;
