//! TTL-aware DNS record cache.
//!
//! The cache is the only mutable shared state of a proxy instance. It holds
//! resource records together with their expiry deadline and the upstream
//! server they were resolved from, so expired record sets can be re-resolved
//! by replaying the original query (see
//! [`resolve_and_add`](DnsCache::resolve_and_add)). Statically added records
//! never expire.

use crate::models::error::ProxyError;
use hickory_proto::rr::{DNSClass, Name, Record, RecordType};
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Transport used to reach an upstream DNS server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsTransport {
    Udp,
    Tcp,
}

impl fmt::Display for DnsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsTransport::Udp => write!(f, "udp"),
            DnsTransport::Tcp => write!(f, "tcp"),
        }
    }
}

/// Where a dynamically resolved record came from. Replayed on refresh.
#[derive(Debug, Clone)]
pub struct RecordOrigin {
    /// Upstream DNS server address, `host:port`.
    pub server: String,
    /// Transport the record was resolved over.
    pub transport: DnsTransport,
}

/// Identity of a record set: owner name, class, and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RrKey {
    name: Name,
    class: DNSClass,
    rtype: RecordType,
}

#[derive(Debug)]
struct CacheEntry {
    record: Record,
    /// Absolute expiry. `None` marks a static entry that never expires.
    valid_until: Option<Instant>,
    /// Set only for dynamically resolved entries.
    origin: Option<RecordOrigin>,
}

impl CacheEntry {
    fn matches(&self, key: &RrKey) -> bool {
        self.record.dns_class() == key.class
            && self.record.record_type() == key.rtype
            && *self.record.name() == key.name
    }

    fn expired(&self, now: Instant) -> bool {
        matches!(self.valid_until, Some(deadline) if deadline <= now)
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: Vec<CacheEntry>,
    /// Record sets with a refresh in flight. Keeping the state here, keyed
    /// by record-set identity, survives the eviction of the entries being
    /// refreshed and dedups concurrent refreshes.
    refreshing: HashSet<RrKey>,
}

/// Thread-safe DNS record cache with lazy TTL-based refresh.
///
/// All reads and writes go through a single mutex; the working set is tens
/// of names. The lock is never held across I/O.
#[derive(Debug)]
pub struct DnsCache {
    inner: Mutex<CacheInner>,
    /// How often an upstream query is retried before giving up.
    pub max_lookup_attempts: usize,
    /// Timeout for a single upstream DNS exchange.
    pub dial_timeout: Duration,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_lookup_attempts: 4,
            dial_timeout: Duration::from_secs(30),
        }
    }

    /// Appends static entries. They never expire and are never re-resolved.
    pub fn add(&self, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock().unwrap();
        for record in records {
            debug!("Adding static entry to cache: {record}");
            inner.entries.push(CacheEntry {
                record: normalize_record(record),
                valid_until: None,
                origin: None,
            });
        }
    }

    /// Appends dynamically resolved entries. Each record's expiry deadline
    /// is `now` plus its TTL, and the origin is remembered so the record
    /// set can be refreshed once it expires.
    pub fn add_resolved(
        &self,
        server: &str,
        transport: DnsTransport,
        records: impl IntoIterator<Item = Record>,
        now: Instant,
    ) {
        let mut inner = self.inner.lock().unwrap();
        for record in records {
            let valid_until = now + Duration::from_secs(u64::from(record.ttl()));
            debug!("Adding resolved entry to cache: {record} (origin {server})");
            inner.entries.push(CacheEntry {
                record: normalize_record(record),
                valid_until: Some(valid_until),
                origin: Some(RecordOrigin {
                    server: server.to_string(),
                    transport,
                }),
            });
        }
    }

    /// Looks up all live records for `(host, class, rtype)`.
    ///
    /// When the record set has expired, a refresh against the origin server
    /// is performed before returning and the result of this call is empty;
    /// the next lookup sees the refreshed data. Concurrent lookups of a
    /// record set that is already being refreshed return empty without
    /// issuing a second query. Refresh failures are logged; the lookup
    /// itself only fails on an unparsable name.
    pub async fn lookup(
        &self,
        host: &str,
        class: DNSClass,
        rtype: RecordType,
    ) -> Result<Vec<Record>, ProxyError> {
        let name = sanitize_name(host)?;
        Ok(self.lookup_name(name, class, rtype).await)
    }

    /// [`lookup`](Self::lookup) for an already normalized name.
    pub(crate) async fn lookup_name(
        &self,
        name: Name,
        class: DNSClass,
        rtype: RecordType,
    ) -> Vec<Record> {
        let key = RrKey { name, class, rtype };

        enum Decision {
            Fresh(Vec<Record>),
            Refresh(RecordOrigin),
            RefreshInFlight,
        }

        let decision = {
            let now = Instant::now();
            let mut inner = self.inner.lock().unwrap();

            let mut expired_origin = None;
            let mut records = Vec::new();
            for entry in inner.entries.iter().filter(|e| e.matches(&key)) {
                if entry.expired(now) {
                    if let Some(origin) = &entry.origin {
                        expired_origin = Some(origin.clone());
                    }
                } else {
                    records.push(entry.record.clone());
                }
            }

            match expired_origin {
                None => Decision::Fresh(records),
                Some(_) if inner.refreshing.contains(&key) => Decision::RefreshInFlight,
                Some(origin) => {
                    inner.refreshing.insert(key.clone());
                    inner
                        .entries
                        .retain(|e| !(e.origin.is_some() && e.matches(&key)));
                    Decision::Refresh(origin)
                }
            }
        };

        match decision {
            Decision::Fresh(records) => records,
            Decision::RefreshInFlight => Vec::new(),
            Decision::Refresh(origin) => {
                debug!("Refreshing expired records for {}", key.name);
                let result = self
                    .resolve_and_add(
                        &origin.server,
                        origin.transport,
                        &key.name.to_string(),
                        key.class,
                        key.rtype,
                    )
                    .await;
                self.inner.lock().unwrap().refreshing.remove(&key);
                if let Err(e) = result {
                    warn!("Refresh failed: {e}");
                }
                // This call reports a miss either way; the caller's next
                // lookup returns the refreshed records.
                Vec::new()
            }
        }
    }

    /// Drops all entries.
    pub fn truncate(&self) {
        debug!("Truncating cache");
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.refreshing.clear();
    }
}

/// Normalizes a host into cache form: lowercase with exactly one trailing
/// dot.
pub fn sanitize_name(host: &str) -> Result<Name, ProxyError> {
    let trimmed = host.trim_end_matches('.').to_ascii_lowercase();
    Name::from_ascii(format!("{trimmed}.")).map_err(|e| ProxyError::DnsLookup {
        host: host.to_string(),
        message: e.to_string(),
    })
}

fn normalize_record(mut record: Record) -> Record {
    let mut name = record.name().to_lowercase();
    name.set_fqdn(true);
    record.set_name(name);
    record
}
