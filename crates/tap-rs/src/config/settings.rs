use crate::models::error::ProxyError;
use crate::models::settings::ProxySettings;
use log::debug;
use serde_json::Value;
use std::env;
use std::fs;

/// Default listen port when neither the configuration nor the environment
/// names one.
const DEFAULT_PORT: u16 = 8000;

/// Loads the proxy configuration from the file named by `TAP_CONFIG_PATH`
/// (default `./config.json`).
///
/// See [`load_settings_from`] for the file format and the applied
/// environment overrides.
pub fn load_settings() -> Result<Vec<ProxySettings>, ProxyError> {
    let config_path =
        env::var("TAP_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());
    load_settings_from(&config_path)
}

/// Loads proxy configuration from `path`.
///
/// The file holds either a single settings object or an array of them; each
/// object configures one independent proxy instance. After parsing, the
/// environment overrides are applied to every instance:
///
/// - `ADDRESS` / `APP_ADDRESS` — listen address, overrides the port
/// - `PORT` / `APP_PORT` / `HTTP_PLATFORM_PORT` / `ASPNETCORE_PORT` —
///   listen port, used when no address is set
/// - `APP_ROOT` — URL prefix the instance is served under
///
/// Finally the listen address is checked for a port and the root is
/// normalized to `/` + trimmed slashes.
pub fn load_settings_from(path: &str) -> Result<Vec<ProxySettings>, ProxyError> {
    debug!("Loading configuration from {path}");

    let data = fs::read_to_string(path).map_err(|e| {
        ProxyError::config("config", format!("unable to read config file `{path}': {e}"))
    })?;
    let value: Value = serde_json::from_str(&data).map_err(|e| {
        ProxyError::config("config", format!("unable to read config file `{path}': {e}"))
    })?;

    let mut all = match value {
        Value::Object(_) => vec![parse_settings(value)?],
        Value::Array(items) => items
            .into_iter()
            .map(parse_settings)
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(ProxyError::config(
                "config",
                format!("unknown config type: {other}"),
            ))
        }
    };

    for settings in &mut all {
        apply_env_overrides(settings)?;
        normalize(settings)?;
    }

    debug!("Loaded {} proxy configuration(s)", all.len());
    Ok(all)
}

fn parse_settings(value: Value) -> Result<ProxySettings, ProxyError> {
    serde_json::from_value(value).map_err(|e| ProxyError::config("config", e.to_string()))
}

fn apply_env_overrides(settings: &mut ProxySettings) -> Result<(), ProxyError> {
    if let Some(address) = first_env(&["ADDRESS", "APP_ADDRESS"]) {
        settings.address = address;
    }
    if settings.address.is_empty() {
        let port = match first_env(&["PORT", "APP_PORT", "HTTP_PLATFORM_PORT", "ASPNETCORE_PORT"])
        {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ProxyError::config("PORT", format!("`{raw}' is not a port")))?,
            None => DEFAULT_PORT,
        };
        settings.address = format!(":{port}");
    }
    if let Some(root) = first_env(&["APP_ROOT"]) {
        settings.root = root;
    }
    Ok(())
}

fn normalize(settings: &mut ProxySettings) -> Result<(), ProxyError> {
    let has_port = settings
        .address
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if !has_port {
        return Err(ProxyError::config("Address", "unable to find port in address"));
    }
    settings.root = format!("/{}", settings.root.trim_matches('/'));
    Ok(())
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
}
