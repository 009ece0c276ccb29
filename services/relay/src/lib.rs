//! Assistant Relay Library Crate
//!
//! Process bootstrap around the assistant facade: environment configuration
//! and the relay loop that plays a conversation script through the facade.
//! The `relay` binary is a thin wrapper around this library.

pub mod config;
pub mod relay;
