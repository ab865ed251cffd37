//! Signed upstream connection URLs
//!
//! The upstream authenticates the WebSocket handshake through query
//! parameters: an HMAC-SHA256 signature over the host, the request date and
//! the request line, wrapped in a base64 `authorization` value.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use spark_relay_core::config::SparkConfig;

use crate::error::{RelayError, RelayResult};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "hmac-sha256";
const SIGNED_HEADERS: &str = "host date request-line";

/// A signed connection URL and the date it was signed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUpstreamRequest {
    pub url: Url,
    /// RFC 1123 GMT date; the upstream rejects signatures that are too old
    pub date: String,
}

/// Builds signed upstream URLs from static credentials
#[derive(Clone)]
pub struct UrlSigner {
    host_url: String,
    api_key: String,
    api_secret: String,
}

impl UrlSigner {
    pub fn new(
        host_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            host_url: host_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn from_config(config: &SparkConfig) -> Self {
        Self::new(&config.host_url, &config.api_key, &config.api_secret)
    }

    /// Sign against the current wall-clock time
    pub fn sign(&self) -> RelayResult<SignedUpstreamRequest> {
        self.sign_at(Utc::now())
    }

    /// Sign against a fixed instant
    pub fn sign_at(&self, now: DateTime<Utc>) -> RelayResult<SignedUpstreamRequest> {
        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return Err(RelayError::Signing(
                "api_key and api_secret must be configured".to_string(),
            ));
        }

        let base = Url::parse(&self.host_url)
            .map_err(|e| RelayError::Signing(format!("invalid host url {}: {}", self.host_url, e)))?;
        let host = base
            .host_str()
            .ok_or_else(|| RelayError::Signing(format!("host url {} has no host", self.host_url)))?;
        let scheme = websocket_scheme(base.scheme())?;
        let path = base.path();
        let date = rfc1123_date(now);

        let canonical = format!("host: {}\ndate: {}\nGET {} HTTP/1.1", host, date, path);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| RelayError::Signing(format!("invalid api secret: {}", e)))?;
        mac.update(canonical.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let authorization_origin = format!(
            "api_key=\"{}\", algorithm=\"{}\", headers=\"{}\", signature=\"{}\"",
            self.api_key, ALGORITHM, SIGNED_HEADERS, signature
        );
        let authorization = STANDARD.encode(authorization_origin.as_bytes());

        let authority = match base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let url = Url::parse_with_params(
            &format!("{}://{}{}", scheme, authority, path),
            &[
                ("authorization", authorization.as_str()),
                ("date", date.as_str()),
                ("host", host),
            ],
        )
        .map_err(|e| RelayError::Signing(format!("failed to build signed url: {}", e)))?;

        Ok(SignedUpstreamRequest { url, date })
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("host_url", &self.host_url)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

/// `Mon, 01 Jan 2024 00:00:00 GMT`
pub fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn websocket_scheme(scheme: &str) -> RelayResult<&'static str> {
    match scheme {
        "http" | "ws" => Ok("ws"),
        "https" | "wss" => Ok("wss"),
        other => Err(RelayError::Signing(format!(
            "unsupported host url scheme: {}",
            other
        ))),
    }
}
