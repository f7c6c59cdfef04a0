//! Release-feed update check.
//!
//! Fetches the public releases feed once at startup and logs when a newer
//! tagged release with published assets exists. Every failure is logged and
//! otherwise ignored; the proxy never depends on this.

use chrono::{DateTime, FixedOffset};
use log::{debug, error, info};
use serde_json::Value;
use tap_rs::version::BUILD_INFO;

const RELEASES_URL: &str =
    "https://api.github.com/repos/talon-one/talon-access-proxy/releases";

pub async fn check_updates() {
    let client = match reqwest::Client::builder()
        .user_agent(format!("talon-access-proxy/{}", BUILD_INFO.version))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to create update client: {e}");
            return;
        }
    };

    let response = match client.get(RELEASES_URL).send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Fetching update information failed: {e}");
            return;
        }
    };
    if !response.status().is_success() {
        debug!("Invalid status: {}", response.status());
        return;
    }

    let releases: Vec<Value> = match response.json().await {
        Ok(releases) => releases,
        Err(e) => {
            error!("Invalid update format: {e}");
            return;
        }
    };

    let mut newest: Option<(DateTime<FixedOffset>, String)> = None;
    for release in &releases {
        let Some(published_at) = release.get("published_at").and_then(Value::as_str) else {
            error!("published_at is not present or a string");
            continue;
        };
        let Some(tag_name) = release.get("tag_name").and_then(Value::as_str) else {
            error!("tag_name is not present or a string");
            continue;
        };
        // Tags without assets are not installable releases.
        if !release
            .get("assets")
            .and_then(Value::as_array)
            .is_some_and(|assets| !assets.is_empty())
        {
            debug!("Release {tag_name} has no assets");
            continue;
        }
        let published = match DateTime::parse_from_rfc3339(published_at) {
            Ok(published) => published,
            Err(e) => {
                error!("Invalid time format `{published_at}': {e}");
                continue;
            }
        };
        if newest.as_ref().map_or(true, |(time, _)| *time < published) {
            newest = Some((published, tag_name.to_string()));
        }
    }

    match newest {
        Some((_, version)) if version.as_str() > BUILD_INFO.version => {
            info!("There is a new version available: {version}");
        }
        _ => debug!("Got latest version"),
    }
}
