//! Outbound request construction.
//!
//! Rewrites an inbound request onto the configured upstream: the URL's
//! scheme and authority are replaced while path and query are preserved,
//! hop-by-hop headers are dropped, and — when the caller identifies a
//! configured application — the upstream credentials are attached: an
//! HMAC-MD5 content signature over the body and/or the application token.

use crate::models::error::ProxyError;
use crate::models::proxy::{ApplicationConfig, ProxyConfig};
use crate::utils::application_id::extract_application_id;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::web::Bytes;
use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use log::debug;
use md5::Md5;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

type HmacMd5 = Hmac<Md5>;

/// Headers tied to the inbound connection; never forwarded. The outbound
/// client derives its own host, framing, and content length.
const SKIP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// An inbound request rewritten for the upstream.
#[derive(Debug)]
pub struct RewrittenRequest {
    /// Target URL: upstream scheme and authority, inbound path and query.
    pub url: Url,
    /// Forwarded headers, including any injected credentials.
    pub headers: HeaderMap,
    /// The request body to send upstream.
    pub body: Bytes,
}

/// Builds the outbound request for `req`.
///
/// `path` is the request path as the proxy should forward it (already
/// stripped of any mount prefix). Credential injection only happens when
/// the configuration has applications, the request identifies one, and the
/// identifier matches a configured entry; in every other case the request
/// passes through with its headers untouched.
pub fn rewrite_request(
    config: &ProxyConfig,
    req: &HttpRequest,
    path: &str,
    body: Bytes,
) -> Result<RewrittenRequest, ProxyError> {
    let mut url = config.talon_api.clone();
    url.set_path(path);
    let query = req.query_string();
    url.set_query((!query.is_empty()).then_some(query));

    let mut rewritten = RewrittenRequest {
        url,
        headers: build_headers(req.headers()),
        body,
    };

    if config.applications.is_empty() {
        return Ok(rewritten);
    }
    let Some(app_id) = extract_application_id(req.headers()) else {
        return Ok(rewritten);
    };
    let Some((id, application)) = config.find_application(&app_id) else {
        return Ok(rewritten);
    };

    apply_application_headers(req, id, application, &mut rewritten)?;
    Ok(rewritten)
}

fn apply_application_headers(
    req: &HttpRequest,
    id: &str,
    application: &ApplicationConfig,
    rewritten: &mut RewrittenRequest,
) -> Result<(), ProxyError> {
    if application.calculate_hmac && content_type_is_json(req) {
        debug!("Calculating HMAC for application {id}");
        let mut mac = HmacMd5::new_from_slice(&application.application_key)
            .map_err(|e| ProxyError::config("ApplicationKey", e.to_string()))?;
        mac.update(&rewritten.body);
        let signature = hex::encode(mac.finalize().into_bytes());
        rewritten.headers.insert(
            HeaderName::from_static("content-signature"),
            credential_value("Content-Signature", format!("signer={id};signature={signature}"))?,
        );
        debug!("HMAC calculated: signer={id} signature={signature}");
    }

    if !application.application_token.is_empty() {
        debug!("Adding Api-Key for application {id}");
        rewritten.headers.insert(
            HeaderName::from_static("api-key"),
            credential_value(
                "ApplicationToken",
                format!("application={id}.token={}", application.application_token),
            )?,
        );
    }
    Ok(())
}

fn credential_value(field: &str, value: String) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(&value).map_err(|e| ProxyError::config(field, e.to_string()))
}

fn content_type_is_json(req: &HttpRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("application/json"))
}

/// Copies the inbound headers for upstream forwarding, dropping the
/// hop-by-hop set. Multi-valued headers are preserved.
fn build_headers(original: &actix_web::http::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(original.len());
    for (key, value) in original {
        if SKIP_HEADERS.contains(&key.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    headers
}
