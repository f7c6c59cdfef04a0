//! Data models and domain types for the proxy.
//!
//! - [`settings`] - configuration file shapes as deserialized by serde
//! - [`proxy`] - validated runtime configuration built from the settings
//! - [`error`] - the crate-wide error type

pub mod error;
pub mod proxy;
pub mod settings;
