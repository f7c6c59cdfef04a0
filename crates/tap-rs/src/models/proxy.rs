use crate::models::error::ProxyError;
use crate::models::settings::ProxySettings;
use std::collections::HashMap;
use url::Url;

/// Default DNS server used when the configuration leaves `DNSServer` empty.
pub const DEFAULT_DNS_SERVER: &str = "8.8.8.8:53";

/// Default idle-connection bound when `MaxConnections` is omitted.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default request body bound (1 MiB) when `MaxRequestBody` is omitted.
pub const DEFAULT_MAX_REQUEST_BODY: usize = 1024 * 1024;

/// Validated per-application credentials.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    /// Compute an HMAC-MD5 content signature over JSON request bodies.
    pub calculate_hmac: bool,
    /// Decoded key material for the content signature.
    pub application_key: Vec<u8>,
    /// Token attached as `Api-Key`; empty leaves the header alone.
    pub application_token: String,
}

/// Validated, immutable configuration of one proxy instance.
///
/// Constructed once from [`ProxySettings`]; every default and invariant of
/// the configuration contract is applied here so the rest of the proxy can
/// rely on the values without re-checking them.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream endpoint. Always carries a scheme (`https` when the
    /// configuration omitted one) and a host.
    pub talon_api: Url,
    /// DNS server used for upstream host resolution, `host:port`.
    pub dns_server: String,
    /// Upper bound for idle upstream connections.
    pub max_connections: usize,
    /// Largest accepted request body in bytes.
    pub max_request_body: usize,
    /// Application credentials keyed by application identifier.
    pub applications: HashMap<String, ApplicationConfig>,
}

impl ProxyConfig {
    /// Validates `settings` and builds the immutable runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] naming the offending field when:
    /// - `TalonAPI` is unset or does not parse into a URL with a host
    /// - `DNSServer` is not a `host:port` dial string
    /// - an `ApplicationKey` is not valid hex
    /// - `CalculateHMAC` is set without a non-empty `ApplicationKey`
    pub fn new(settings: &ProxySettings) -> Result<Self, ProxyError> {
        if settings.talon_api.is_empty() {
            return Err(ProxyError::config("TalonAPI", "is not set"));
        }
        let talon_api = parse_upstream_url(&settings.talon_api)?;

        let dns_server = if settings.dns_server.is_empty() {
            DEFAULT_DNS_SERVER.to_string()
        } else {
            settings.dns_server.clone()
        };
        if !is_dial_string(&dns_server) {
            return Err(ProxyError::config(
                "DNSServer",
                "must be in the form of host:port",
            ));
        }

        let max_connections = match settings.max_connections {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(n) if n < 0 => 0,
            Some(n) => n as usize,
        };

        let mut applications = HashMap::with_capacity(settings.application.len());
        for (id, app) in &settings.application {
            let application_key = hex::decode(&app.application_key).map_err(|_| {
                ProxyError::config(
                    "ApplicationKey",
                    format!("is not valid hex (ApplicationID={id})"),
                )
            })?;
            if app.calculate_hmac && application_key.is_empty() {
                return Err(ProxyError::config(
                    "ApplicationKey",
                    format!("must be set to use CalculateHMAC (ApplicationID={id})"),
                ));
            }
            applications.insert(
                id.clone(),
                ApplicationConfig {
                    calculate_hmac: app.calculate_hmac,
                    application_key,
                    application_token: app.application_token.clone(),
                },
            );
        }

        Ok(Self {
            talon_api,
            dns_server,
            max_connections,
            max_request_body: settings.max_request_body.unwrap_or(DEFAULT_MAX_REQUEST_BODY),
            applications,
        })
    }

    /// Host part of the upstream URL, without a port.
    pub fn upstream_host(&self) -> &str {
        self.talon_api.host_str().unwrap_or_default()
    }

    /// Finds the application entry whose identifier equals `app_id`,
    /// compared case-insensitively. Returns the configured identifier along
    /// with the credentials; the configured spelling is the one written into
    /// outbound headers.
    pub fn find_application(&self, app_id: &str) -> Option<(&str, &ApplicationConfig)> {
        self.applications
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(app_id))
            .map(|(id, app)| (id.as_str(), app))
    }
}

/// Parses the upstream URL, defaulting the scheme to `https` when absent.
///
/// `Url::parse` treats `demo.talon.one:443` as scheme `demo.talon.one`, so
/// anything that does not come out as an http(s) URL with a host is retried
/// with an `https://` prefix.
fn parse_upstream_url(raw: &str) -> Result<Url, ProxyError> {
    let url = match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() && matches!(url.scheme(), "http" | "https") => url,
        _ => Url::parse(&format!("https://{raw}"))
            .map_err(|e| ProxyError::config("TalonAPI", e.to_string()))?,
    };
    if url.host_str().is_none() {
        return Err(ProxyError::config(
            "TalonAPI",
            "does not contain a valid host part",
        ));
    }
    Ok(url)
}

/// Returns whether `addr` looks like a `host:port` dial string.
fn is_dial_string(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
