//! # tap-rs
//!
//! A reverse HTTP proxy for the Talon JSON API, built with Actix Web and
//! Reqwest. The proxy accepts requests from clients, rewrites them onto a
//! configured upstream, optionally attaches per-application credentials
//! (an `Api-Key` token and an HMAC-MD5 content signature over the request
//! body), and streams the upstream response back.
//!
//! Name resolution for the upstream never touches the host's DNS
//! configuration: each proxy instance runs a private caching DNS resolver
//! on a loopback UDP socket, pre-seeded with the upstream's A and AAAA
//! records at startup and refreshed lazily on TTL expiry, and the outbound
//! HTTP client performs all of its lookups against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐    ┌──────────────────────────────┐    ┌───────────┐
//! │ Client │───▶│ ProxyHandler                 │───▶│ Talon API │
//! └────────┘    │  ├ rewrite (URL, HMAC, token)│    └───────────┘
//!               │  └ reqwest client            │
//!               │       │ name lookups         │
//!               │       ▼                      │
//!               │  DnsServer (127.0.0.1:0/udp) │
//!               │       │                      │
//!               │  DnsCache ⇄ upstream DNS     │
//!               └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tap_rs::models::proxy::ProxyConfig;
//! use tap_rs::models::settings::ProxySettings;
//! use tap_rs::services::http::ProxyHandler;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ProxySettings {
//!         talon_api: "https://demo.talon.one".to_string(),
//!         ..ProxySettings::default()
//!     };
//!     let config = ProxyConfig::new(&settings)?;
//!     let handler = ProxyHandler::new(config).await?;
//!
//!     // Mount with routes::http::configure_route inside an actix App.
//!     # let _ = handler;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration Example
//!
//! ```json
//! {
//!   "Address": "127.0.0.1:8000",
//!   "TalonAPI": "https://demo.talon.one",
//!   "DNSServer": "8.8.8.8:53",
//!   "MaxConnections": 100,
//!   "Application": {
//!     "73": {
//!       "CalculateHMAC": true,
//!       "ApplicationKey": "e3b620ed8144f292",
//!       "ApplicationToken": ""
//!     }
//!   }
//! }
//! ```
//!
//! An array of such objects runs several independent proxies in one
//! process.
//!
//! ## Environment Variables
//!
//! - `TAP_CONFIG_PATH`: configuration file path (default `./config.json`)
//! - `ADDRESS` / `APP_ADDRESS`: listen address (`host:port`)
//! - `PORT` / `APP_PORT` / `HTTP_PLATFORM_PORT` / `ASPNETCORE_PORT`: listen port
//! - `APP_ROOT`: URL prefix to serve under
//! - `DEBUG`: values > 0 enable per-request debug logging
//! - `NO_COLOR`: disable colored log output
//!
//! ## Module Organization
//!
//! - [`config`] - configuration file loading and environment overrides
//! - [`models`] - settings, validated runtime configuration, error type
//! - [`services`] - request pipeline and the DNS subsystem
//! - [`routes`] - actix route wiring
//! - [`logs`] - logger setup
//! - [`utils`] - header parsing helpers
//! - [`version`] - build information written into the `X-TAP` header

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
pub mod version;
