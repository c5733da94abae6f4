//! Shared config, error taxonomy, message model and translator for the Omni relay.

pub mod classify;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod translate;
pub mod wire;
