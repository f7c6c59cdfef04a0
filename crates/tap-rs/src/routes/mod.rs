//! HTTP route wiring.

pub mod http;
