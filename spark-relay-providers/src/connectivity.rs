//! Upstream reachability check

use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Check whether a GET to the upstream host succeeds.
///
/// Only a 2xx response counts as reachable. Only the host of `host_url` is
/// contacted; the chat path is never requested.
pub async fn test_connection(host_url: &str, timeout: Duration) -> bool {
    let Some(root) = root_url(host_url) else {
        warn!(host_url, "Cannot check upstream: invalid host url");
        return false;
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build connectivity client");
            return false;
        }
    };

    match client.get(root.clone()).send().await {
        Ok(response) if response.status().is_success() => {
            info!(url = %root, status = %response.status(), "Upstream reachable");
            true
        }
        Ok(response) => {
            warn!(url = %root, status = %response.status(), "Upstream answered with an error status");
            false
        }
        Err(e) => {
            debug!(url = %root, error = %e, "Upstream unreachable");
            false
        }
    }
}

/// Root URL of the upstream host, with ws schemes mapped back to http
fn root_url(host_url: &str) -> Option<Url> {
    let base = Url::parse(host_url).ok()?;
    let scheme = match base.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        _ => return None,
    };
    let host = base.host_str()?;
    let authority = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Url::parse(&format!("{}://{}/", scheme, authority)).ok()
}
