use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-application credential settings as they appear in the configuration
/// file.
///
/// The application identifier is the key of the [`ProxySettings::application`]
/// map; it is matched case-insensitively against the identifier extracted
/// from inbound requests.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ApplicationSettings {
    /// Compute an HMAC-MD5 content signature over JSON request bodies.
    #[serde(rename = "CalculateHMAC", default)]
    pub calculate_hmac: bool,

    /// Hex-encoded key material used for the content signature.
    /// Required (and must decode to at least one byte) when
    /// `CalculateHMAC` is set.
    #[serde(rename = "ApplicationKey", default)]
    pub application_key: String,

    /// Token attached to outbound requests as
    /// `Api-Key: application=<id>.token=<token>`. Empty means "do not touch
    /// the Api-Key header".
    #[serde(rename = "ApplicationToken", default)]
    pub application_token: String,
}

/// Settings for one proxy instance as read from the configuration file.
///
/// A configuration file holds either a single object of this shape or an
/// array of them; each entry becomes an independent proxy with its own
/// listener, DNS cache, and HTTP client. Unknown keys are rejected during
/// deserialization rather than silently ignored.
///
/// # Configuration File Format
///
/// ```json
/// {
///   "Address": "127.0.0.1:8000",
///   "Root": "/",
///   "TalonAPI": "https://demo.talon.one",
///   "DNSServer": "8.8.8.8:53",
///   "MaxConnections": 100,
///   "Application": {
///     "73": {
///       "CalculateHMAC": true,
///       "ApplicationKey": "e3b620ed8144f292",
///       "ApplicationToken": ""
///     }
///   }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// URL of the Talon API this instance fronts. A missing scheme defaults
    /// to `https`.
    #[serde(rename = "TalonAPI", default)]
    pub talon_api: String,

    /// DNS server used to resolve the upstream host, `host:port`.
    /// Defaults to `8.8.8.8:53`.
    #[serde(rename = "DNSServer", default)]
    pub dns_server: String,

    /// Upper bound for idle connections kept to the upstream.
    /// Omitted defaults to 100; negative values are normalized to 0.
    #[serde(rename = "MaxConnections", default)]
    pub max_connections: Option<i64>,

    /// Largest request body the proxy accepts, in bytes. Bounds the buffer
    /// used while computing content signatures. Defaults to 1 MiB.
    #[serde(rename = "MaxRequestBody", default)]
    pub max_request_body: Option<usize>,

    /// Application credentials keyed by application identifier.
    #[serde(rename = "Application", default)]
    pub application: HashMap<String, ApplicationSettings>,

    /// Address the HTTP listener binds to, `host:port`. A bare `:port` binds
    /// all interfaces.
    #[serde(rename = "Address", default)]
    pub address: String,

    /// URL prefix this instance is served under, normalized to
    /// `/` + trimmed slashes.
    #[serde(rename = "Root", default)]
    pub root: String,
}
