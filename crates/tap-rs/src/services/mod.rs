//! Service layer: the request pipeline and the DNS subsystem.
//!
//! - [`http`] - proxy handler and the pooled upstream HTTP client
//! - [`rewrite`] - outbound request construction and credential injection
//! - [`dns_cache`] - TTL-aware record cache shared by a proxy instance
//! - [`dns_resolver`] - upstream DNS query client feeding the cache
//! - [`dns_server`] - loopback UDP server the HTTP dialer resolves through
//!
//! ```text
//! Client → ProxyHandler → rewrite → reqwest Client → Upstream
//!                                        │ (dialer)
//!                                        ▼
//!                                   DnsServer → DnsCache ⇄ resolver
//! ```

pub mod dns_cache;
pub mod dns_resolver;
pub mod dns_server;
pub mod http;
pub mod rewrite;
