use crate::models::error::ProxyError;
use crate::models::proxy::ProxyConfig;
use crate::services::dns_cache::{DnsCache, DnsTransport};
use crate::services::dns_server::DnsServer;
use crate::services::rewrite::rewrite_request;
use crate::version::BUILD_INFO;

use actix_web::http::{Method as ActixMethod, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use hickory_proto::rr::{DNSClass, RecordType};
use log::debug;
use reqwest::{Client, Method as ReqwestMethod};
use std::sync::Arc;
use std::time::Duration;
use url::Host;
use uuid::Uuid;

/// Request handler of one proxy instance.
///
/// Owns the instance's validated configuration, its DNS cache with the
/// loopback resolver server, and the pooled upstream HTTP client whose
/// dialer resolves every name through that server. Cheap to clone; clones
/// share all of it.
///
/// # Construction
///
/// [`ProxyHandler::new`] validates nothing itself — it receives an already
/// validated [`ProxyConfig`] — but it does the instance's startup work:
/// when the upstream host is a DNS name its A and AAAA records are
/// pre-seeded into the cache (a resolution failure is fatal), the loopback
/// DNS server is started, and the HTTP client is built with:
///
/// - 30 s connect timeout, 30 s TCP keepalive
/// - idle pool bounded by `MaxConnections`, unbounded idle timeout
/// - name resolution through the loopback DNS server only
/// - standard environment proxy variables honored
#[derive(Clone)]
pub struct ProxyHandler {
    client: Client,
    config: Arc<ProxyConfig>,
    cache: Arc<DnsCache>,
    dns_server: Arc<DnsServer>,
}

/// Response headers owned by the connection layer, not copied upstream.
const RESPONSE_SKIP_HEADERS: &[&str] = &["connection", "transfer-encoding"];

impl ProxyHandler {
    /// Builds the handler for `config`: seeds the DNS cache, starts the
    /// loopback resolver, and creates the upstream client.
    pub async fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let config = Arc::new(config);
        let cache = Arc::new(DnsCache::new());

        match config.talon_api.host() {
            Some(Host::Domain(host)) => {
                let host = host.to_string();
                for rtype in [RecordType::A, RecordType::AAAA] {
                    cache
                        .resolve_and_add(
                            &config.dns_server,
                            DnsTransport::Udp,
                            &host,
                            DNSClass::IN,
                            rtype,
                        )
                        .await?;
                }
            }
            Some(_) => {} // literal IP, nothing to seed
            None => {
                return Err(ProxyError::config(
                    "TalonAPI",
                    "does not contain a valid host part",
                ))
            }
        }

        let dns_server = Arc::new(DnsServer::start(Arc::clone(&cache)).await?);

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(None::<Duration>)
            .dns_resolver(Arc::new(dns_server.resolver()))
            .build()
            .map_err(|e| ProxyError::config("Client", e.to_string()))?;

        Ok(Self {
            client,
            config,
            cache,
            dns_server,
        })
    }

    /// The validated configuration this handler runs with.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The DNS cache backing this handler's resolver.
    pub fn dns_cache(&self) -> &Arc<DnsCache> {
        &self.cache
    }

    /// Stops the loopback DNS server. In-flight requests fail their name
    /// lookups from here on.
    pub fn shutdown(&self) {
        self.dns_server.shutdown();
    }

    /// Forwards one inbound request to the upstream and streams the
    /// response back.
    ///
    /// The request is rewritten (URL replacement, credential injection),
    /// sent through the pooled client, and the upstream response is
    /// relayed: status verbatim, one value per header name, `X-TAP` set to
    /// the build version, body streamed. Upstream transport failures
    /// surface as `500` with the error message as body.
    pub async fn handle_request(
        &self,
        req: HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ProxyError> {
        let path = match req.match_info().get("tail") {
            Some(tail) => format!("/{tail}"),
            None => req.path().to_string(),
        };

        let request_id = log::log_enabled!(log::Level::Debug).then(Uuid::new_v4);
        let outbound = rewrite_request(&self.config, &req, &path, body)?;
        if let Some(id) = request_id {
            debug!(
                "[{id}] Performing request: {} {} content-length={} headers={:?}",
                req.method(),
                outbound.url,
                outbound.body.len(),
                outbound.headers,
            );
        }

        let response = self
            .client
            .request(parse_method(req.method()), outbound.url)
            .headers(outbound.headers)
            .body(outbound.body)
            .send()
            .await
            .map_err(|e| {
                if let Some(id) = request_id {
                    debug!("[{id}] Request got error: {e}");
                }
                ProxyError::Upstream(e.to_string())
            })?;

        if let Some(id) = request_id {
            debug!(
                "[{id}] Request succeeded: status={} headers={:?}",
                response.status(),
                response.headers(),
            );
        }

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = HttpResponse::build(status);

        // Only the first value per header name is relayed.
        for key in response.headers().keys() {
            if RESPONSE_SKIP_HEADERS.contains(&key.as_str()) {
                continue;
            }
            if let Some(value) = response.headers().get(key) {
                if let Ok(header_value) =
                    actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
                {
                    builder.insert_header((key.as_str(), header_value));
                }
            }
        }
        builder.insert_header(("X-TAP", BUILD_INFO.version));

        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                // The client connection may already be gone at this point.
                debug!("Response body stream failed: {e}");
                std::io::Error::other(e)
            })
        });
        Ok(builder.streaming(stream))
    }
}

fn parse_method(method: &ActixMethod) -> ReqwestMethod {
    match method {
        &ActixMethod::GET => ReqwestMethod::GET,
        &ActixMethod::POST => ReqwestMethod::POST,
        &ActixMethod::PUT => ReqwestMethod::PUT,
        &ActixMethod::DELETE => ReqwestMethod::DELETE,
        &ActixMethod::HEAD => ReqwestMethod::HEAD,
        &ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
        &ActixMethod::CONNECT => ReqwestMethod::CONNECT,
        &ActixMethod::PATCH => ReqwestMethod::PATCH,
        &ActixMethod::TRACE => ReqwestMethod::TRACE,
        _ => ReqwestMethod::GET,
    }
}
