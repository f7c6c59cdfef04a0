//! End-to-end proxy tests: a real canned-response upstream on a local TCP
//! socket, the full rewrite pipeline, and the loopback DNS resolver.

use actix_web::http::StatusCode;
use actix_web::{test, App};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record};
use hmac::{Hmac, Mac};
use md5::Md5;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tap_rs::models::proxy::ProxyConfig;
use tap_rs::models::settings::{ApplicationSettings, ProxySettings};
use tap_rs::routes::http::configure_route;
use tap_rs::services::dns_cache::DnsCache;
use tap_rs::services::dns_server::DnsServer;
use tap_rs::services::http::ProxyHandler;
use tap_rs::version::BUILD_INFO;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Starts a minimal HTTP/1.1 upstream that answers every request with
/// `200 OK` and `body`, and forwards each raw request it received on the
/// returned channel.
async fn spawn_upstream(body: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request_complete(&request) {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&chunk[..read]),
                    }
                }
                let _ = tx.send(request);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Upstream: yes\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, rx)
}

fn request_complete(buffer: &[u8]) -> bool {
    let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buffer[..position]);
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    buffer.len() >= position + 4 + content_length
}

async fn proxy_for(settings: ProxySettings) -> ProxyHandler {
    let config = ProxyConfig::new(&settings).unwrap();
    ProxyHandler::new(config).await.unwrap()
}

#[actix_web::test]
async fn json_request_is_signed_and_response_is_relayed() {
    let (upstream_addr, mut requests) = spawn_upstream("{\"ok\":true}").await;

    let mut settings = ProxySettings {
        talon_api: format!("http://{upstream_addr}"),
        ..ProxySettings::default()
    };
    settings.application.insert(
        "73".to_string(),
        ApplicationSettings {
            calculate_hmac: true,
            application_key: "e3b620ed8144f292".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let handler = proxy_for(settings).await;
    let app = test::init_service(
        App::new().configure(|cfg| configure_route(cfg, handler.clone())),
    )
    .await;

    let body = r#"{"attributes":{"Email":"x@y"}}"#;
    let request = test::TestRequest::put()
        .uri("/v1/customer_profiles/165f239c")
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Content-Signature", "signer=73"))
        .set_payload(body)
        .to_request();
    let response = test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("X-TAP").unwrap(),
        BUILD_INFO.version
    );
    assert_eq!(response.headers().get("X-Upstream").unwrap(), "yes");
    let response_body = test::read_body(response).await;
    assert_eq!(&response_body[..], b"{\"ok\":true}");

    let raw = requests.recv().await.unwrap();
    let raw = String::from_utf8_lossy(&raw);
    assert!(
        raw.starts_with("PUT /v1/customer_profiles/165f239c HTTP/1.1\r\n"),
        "unexpected request line: {raw}"
    );

    let mut mac =
        Hmac::<Md5>::new_from_slice(&hex::decode("e3b620ed8144f292").unwrap()).unwrap();
    mac.update(body.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    assert!(
        raw.contains(&format!("content-signature: signer=73;signature={signature}")),
        "signature header missing: {raw}"
    );
    assert!(raw.ends_with(body), "body not forwarded: {raw}");
}

#[actix_web::test]
async fn api_key_token_is_injected() {
    let (upstream_addr, mut requests) = spawn_upstream("ok").await;

    let mut settings = ProxySettings {
        talon_api: format!("http://{upstream_addr}"),
        ..ProxySettings::default()
    };
    settings.application.insert(
        "A1".to_string(),
        ApplicationSettings {
            application_token: "SECRET".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let handler = proxy_for(settings).await;
    let app = test::init_service(
        App::new().configure(|cfg| configure_route(cfg, handler.clone())),
    )
    .await;

    let request = test::TestRequest::get()
        .uri("/v1/ping")
        .insert_header(("Api-Key", "application=A1"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let raw = requests.recv().await.unwrap();
    let raw = String::from_utf8_lossy(&raw);
    assert!(
        raw.contains("api-key: application=A1.token=SECRET"),
        "token not injected: {raw}"
    );
}

#[actix_web::test]
async fn unknown_application_passes_through_unchanged() {
    let (upstream_addr, mut requests) = spawn_upstream("ok").await;

    let mut settings = ProxySettings {
        talon_api: format!("http://{upstream_addr}"),
        ..ProxySettings::default()
    };
    settings.application.insert(
        "A1".to_string(),
        ApplicationSettings {
            application_token: "SECRET".to_string(),
            ..ApplicationSettings::default()
        },
    );
    let handler = proxy_for(settings).await;
    let app = test::init_service(
        App::new().configure(|cfg| configure_route(cfg, handler.clone())),
    )
    .await;

    let request = test::TestRequest::get()
        .uri("/v1/ping")
        .insert_header(("Api-Key", "application=OTHER"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let raw = requests.recv().await.unwrap();
    let raw = String::from_utf8_lossy(&raw);
    assert!(
        raw.contains("api-key: application=OTHER"),
        "header was modified: {raw}"
    );
    assert!(!raw.contains("token=SECRET"));
}

#[actix_web::test]
async fn hostname_upstream_resolves_through_the_loopback_cache() {
    let (upstream_addr, _requests) = spawn_upstream("pong").await;

    // A private DNS server seeded with the upstream name stands in for the
    // configured resolver.
    let dns_cache = Arc::new(DnsCache::new());
    let name = Name::from_ascii("upstream.internal.").unwrap();
    let mut a = Record::from_rdata(name.clone(), 60, RData::A(A(Ipv4Addr::LOCALHOST)));
    a.set_dns_class(DNSClass::IN);
    let mut aaaa = Record::from_rdata(name, 60, RData::AAAA(AAAA(Ipv6Addr::LOCALHOST)));
    aaaa.set_dns_class(DNSClass::IN);
    dns_cache.add([a, aaaa]);
    let dns_server = DnsServer::start(dns_cache).await.unwrap();

    let settings = ProxySettings {
        talon_api: format!("http://upstream.internal:{}", upstream_addr.port()),
        dns_server: dns_server.local_addr().to_string(),
        ..ProxySettings::default()
    };
    let handler = proxy_for(settings).await;
    let app = test::init_service(
        App::new().configure(|cfg| configure_route(cfg, handler.clone())),
    )
    .await;

    let request = test::TestRequest::get().uri("/ping").to_request();
    let response = test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = test::read_body(response).await;
    assert_eq!(&body[..], b"pong");
}

#[actix_web::test]
async fn upstream_dial_failure_returns_500_with_the_error() {
    // Nothing listens on the discard port.
    let settings = ProxySettings {
        talon_api: "http://127.0.0.1:9".to_string(),
        ..ProxySettings::default()
    };
    let handler = proxy_for(settings).await;
    let app = test::init_service(
        App::new().configure(|cfg| configure_route(cfg, handler.clone())),
    )
    .await;

    let request = test::TestRequest::get().uri("/v1/ping").to_request();
    let response = test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = test::read_body(response).await;
    assert!(!body.is_empty());
}
