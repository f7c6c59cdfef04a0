use crate::services::http::ProxyHandler;
use actix_web::{web, HttpRequest};

/// Mounts the proxy on a service configuration.
///
/// A single catch-all resource `/{tail:.*}` forwards every path to the
/// handler; the `tail` match is what the handler uses as the upstream
/// path, so mounting inside a `web::scope` serves the proxy under a
/// prefix with the prefix stripped. The payload limit comes from the
/// instance's `MaxRequestBody` setting.
pub fn configure_route(cfg: &mut web::ServiceConfig, handler: ProxyHandler) {
    cfg.app_data(web::PayloadConfig::new(handler.config().max_request_body))
        .service(
            web::resource("/{tail:.*}").to(move |req: HttpRequest, body: web::Bytes| {
                let handler = handler.clone();
                async move { handler.handle_request(req, body).await }
            }),
        );
}
