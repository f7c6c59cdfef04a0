//! Tests for outbound request construction: URL replacement, header
//! pass-through, HMAC signing, and token injection.

use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use hmac::{Hmac, Mac};
use md5::Md5;
use tap_rs::models::proxy::ProxyConfig;
use tap_rs::models::settings::{ApplicationSettings, ProxySettings};
use tap_rs::services::rewrite::rewrite_request;

fn config_with_application(id: &str, app: ApplicationSettings) -> ProxyConfig {
    let mut settings = ProxySettings {
        talon_api: "https://demo.talon.one".to_string(),
        ..ProxySettings::default()
    };
    settings.application.insert(id.to_string(), app);
    ProxyConfig::new(&settings).unwrap()
}

fn expected_signature(key_hex: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Md5>::new_from_slice(&hex::decode(key_hex).unwrap()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[test]
fn url_scheme_and_authority_are_replaced() {
    let settings = ProxySettings {
        talon_api: "https://demo.talon.one".to_string(),
        ..ProxySettings::default()
    };
    let config = ProxyConfig::new(&settings).unwrap();
    let req = TestRequest::get()
        .uri("/v1/customer_profiles/165f239c?expand=1&verbose=true")
        .to_http_request();

    let rewritten = rewrite_request(
        &config,
        &req,
        "/v1/customer_profiles/165f239c",
        Bytes::new(),
    )
    .unwrap();

    assert_eq!(
        rewritten.url.as_str(),
        "https://demo.talon.one/v1/customer_profiles/165f239c?expand=1&verbose=true"
    );
}

#[test]
fn hop_by_hop_headers_are_dropped() {
    let settings = ProxySettings {
        talon_api: "https://demo.talon.one".to_string(),
        ..ProxySettings::default()
    };
    let config = ProxyConfig::new(&settings).unwrap();
    let req = TestRequest::get()
        .uri("/ping")
        .insert_header(("Host", "proxy.local"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("Accept", "application/json"))
        .insert_header(("Authorization", "Bearer token"))
        .to_http_request();

    let rewritten = rewrite_request(&config, &req, "/ping", Bytes::new()).unwrap();

    assert!(rewritten.headers.get("host").is_none());
    assert!(rewritten.headers.get("connection").is_none());
    assert_eq!(rewritten.headers.get("accept").unwrap(), "application/json");
    assert_eq!(rewritten.headers.get("authorization").unwrap(), "Bearer token");
}

#[test]
fn json_body_is_signed() {
    let config = config_with_application(
        "73",
        ApplicationSettings {
            calculate_hmac: true,
            application_key: "e3b620ed8144f292".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let body = br#"{"attributes":{"Email":"x@y"}}"#;
    let req = TestRequest::put()
        .uri("/v1/customer_profiles/165f239c")
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Content-Signature", "signer=73"))
        .to_http_request();

    let rewritten = rewrite_request(
        &config,
        &req,
        "/v1/customer_profiles/165f239c",
        Bytes::from_static(body),
    )
    .unwrap();

    let signature = expected_signature("e3b620ed8144f292", body);
    assert_eq!(
        rewritten.headers.get("content-signature").unwrap(),
        format!("signer=73;signature={signature}").as_str()
    );
    // The signed body is forwarded unchanged.
    assert_eq!(&rewritten.body[..], body);
}

#[test]
fn non_json_body_is_not_signed() {
    let config = config_with_application(
        "73",
        ApplicationSettings {
            calculate_hmac: true,
            application_key: "e3b620ed8144f292".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let req = TestRequest::put()
        .uri("/v1/upload")
        .insert_header(("Content-Type", "text/plain"))
        .insert_header(("Content-Signature", "signer=73"))
        .to_http_request();

    let rewritten =
        rewrite_request(&config, &req, "/v1/upload", Bytes::from_static(b"hello")).unwrap();

    // The inbound header passes through untouched.
    assert_eq!(
        rewritten.headers.get("content-signature").unwrap(),
        "signer=73"
    );
}

#[test]
fn token_is_injected_for_matching_application() {
    let config = config_with_application(
        "A1",
        ApplicationSettings {
            application_token: "SECRET".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let req = TestRequest::get()
        .uri("/v1/ping")
        .insert_header(("Api-Key", "application=A1"))
        .to_http_request();

    let rewritten = rewrite_request(&config, &req, "/v1/ping", Bytes::new()).unwrap();

    assert_eq!(
        rewritten.headers.get("api-key").unwrap(),
        "application=A1.token=SECRET"
    );
}

#[test]
fn token_injection_matches_case_insensitively() {
    let config = config_with_application(
        "A1",
        ApplicationSettings {
            application_token: "SECRET".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let req = TestRequest::get()
        .uri("/v1/ping")
        .insert_header(("Api-Key", "application=a1"))
        .to_http_request();

    let rewritten = rewrite_request(&config, &req, "/v1/ping", Bytes::new()).unwrap();

    // The configured spelling of the identifier is written out.
    assert_eq!(
        rewritten.headers.get("api-key").unwrap(),
        "application=A1.token=SECRET"
    );
}

#[test]
fn unknown_application_passes_through() {
    let config = config_with_application(
        "A1",
        ApplicationSettings {
            application_token: "SECRET".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let req = TestRequest::get()
        .uri("/v1/ping")
        .insert_header(("Api-Key", "application=OTHER"))
        .to_http_request();

    let rewritten = rewrite_request(&config, &req, "/v1/ping", Bytes::new()).unwrap();

    assert_eq!(rewritten.headers.get("api-key").unwrap(), "application=OTHER");
}

#[test]
fn empty_application_map_means_no_mutation() {
    let settings = ProxySettings {
        talon_api: "https://demo.talon.one".to_string(),
        ..ProxySettings::default()
    };
    let config = ProxyConfig::new(&settings).unwrap();
    let req = TestRequest::put()
        .uri("/v1/x")
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Content-Signature", "signer=73"))
        .to_http_request();

    let rewritten = rewrite_request(&config, &req, "/v1/x", Bytes::from_static(b"{}")).unwrap();

    assert_eq!(
        rewritten.headers.get("content-signature").unwrap(),
        "signer=73"
    );
    assert!(rewritten.headers.get("api-key").is_none());
}
