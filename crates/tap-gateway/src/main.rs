//! talon-access-proxy server
//!
//! Loads the configuration, builds one proxy instance per configuration
//! entry (each with its own DNS cache, loopback resolver, and HTTP
//! client), serves every instance on its configured address — optionally
//! under a URL prefix — and shuts down on Ctrl-C.

use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use log::{error, info};
use tap_rs::config::settings::load_settings;
use tap_rs::logs::logger::configure_logger;
use tap_rs::models::error::ProxyError;
use tap_rs::models::proxy::ProxyConfig;
use tap_rs::models::settings::ProxySettings;
use tap_rs::routes::http::configure_route;
use tap_rs::services::http::ProxyHandler;
use tap_rs::version::BUILD_INFO;
use tokio::signal;

mod update;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    info!(
        "Starting talon-access-proxy {} {} {}",
        BUILD_INFO.version, BUILD_INFO.version_hash, BUILD_INFO.build_date
    );

    let all_settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    tokio::spawn(update::check_updates());

    let mut servers = Vec::with_capacity(all_settings.len());
    let mut handlers = Vec::with_capacity(all_settings.len());
    for settings in &all_settings {
        match run_proxy(settings).await {
            Ok((server, handler)) => {
                servers.push(server);
                handlers.push(handler);
            }
            Err(e) => {
                error!("Unable to create proxy: {e}");
                std::process::exit(1);
            }
        }
    }

    tokio::select! {
        result = futures_util::future::try_join_all(servers) => {
            if let Err(e) = result {
                error!("Listen error: {e}");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
        }
    }

    for handler in &handlers {
        handler.shutdown();
    }
    Ok(())
}

/// Builds and starts one proxy instance, returning the running server and
/// its handler.
async fn run_proxy(
    settings: &ProxySettings,
) -> Result<(actix_web::dev::Server, ProxyHandler), Box<dyn std::error::Error>> {
    let config = ProxyConfig::new(settings)?;
    let handler = ProxyHandler::new(config).await?;

    let (host, port) = split_listen_addr(&settings.address)?;
    let root = settings.root.clone();
    let app_handler = handler.clone();

    let server = HttpServer::new(move || {
        let handler = app_handler.clone();
        let app = App::new().wrap(Logger::new(
            r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
        ));
        if root == "/" {
            app.configure(|cfg| configure_route(cfg, handler))
        } else {
            app.service(
                web::redirect(root.clone(), format!("{root}/"))
                    .using_status_code(StatusCode::TEMPORARY_REDIRECT),
            )
            .service(web::scope(&root).configure(|cfg| configure_route(cfg, handler)))
        }
    })
    .bind((host.as_str(), port))?
    .run();

    info!(
        "Listening on {host}:{port} (root {}, api {})",
        settings.root, settings.talon_api
    );
    Ok((server, handler))
}

/// Splits a listen address into bind host and port. A bare `:port` binds
/// all interfaces.
fn split_listen_addr(address: &str) -> Result<(String, u16), ProxyError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::config("Address", "unable to find port in address"))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ProxyError::config("Address", format!("`{port}' is not a port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok((host.to_string(), port))
}
