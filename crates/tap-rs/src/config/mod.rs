//! Configuration file loading.

pub mod settings;
