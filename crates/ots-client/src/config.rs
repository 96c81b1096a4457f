//! Client configuration.
//!
//! [`ClientConfig`] is injected once at startup and treated as immutable for
//! the lifetime of an [`ApiClient`](crate::ApiClient). Defaults point at the
//! public service; a TOML file and `OTS_*` environment variables can
//! override them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{OtsError, Result};
use crate::pinning;
use crate::retry::RetryConfig;

/// Default API base.
pub const DEFAULT_API_BASE: &str = "https://onetimesecret.com/api/v2";

/// Default base for shareable links.
pub const DEFAULT_SHARE_BASE: &str = "https://onetimesecret.com";

/// Default per-attempt request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for the API client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL for API calls when no endpoint is stored with the
    /// credentials.
    ///
    /// Default: **`https://onetimesecret.com/api/v2`**.
    pub base_url: Url,

    /// Base URL for shareable `/secret/:key` and `/private/:key` links.
    pub share_base_url: Url,

    /// Upper bound for one HTTP attempt, in seconds.
    ///
    /// Default: **30**.
    pub request_timeout_secs: u64,

    pub user_agent: String,

    pub retry: RetryConfig,

    /// Verify the server leaf certificate against `cert_pins`.
    ///
    /// Default: **false**.
    pub cert_pinning: bool,

    /// Base64 SHA-256 fingerprints of accepted leaf certificates.
    pub cert_pins: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_url(DEFAULT_API_BASE),
            share_base_url: default_url(DEFAULT_SHARE_BASE),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: format!("ots-client/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryConfig::default(),
            cert_pinning: false,
            cert_pins: Vec::new(),
        }
    }
}

fn default_url(raw: &str) -> Url {
    match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => unreachable!("built-in URL {raw} must parse: {e}"),
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| OtsError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlay `OTS_*` variables read through `lookup`.
    ///
    /// Recognised: `OTS_API_BASE`, `OTS_SHARE_BASE`, `OTS_TIMEOUT_SECS`,
    /// `OTS_ENABLE_CERT_PINNING`, `OTS_CERT_PINS` (comma separated) and
    /// `OTS_MAX_RETRIES`.
    pub fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("OTS_API_BASE") {
            self.base_url = parse_url("OTS_API_BASE", &raw)?;
        }
        if let Some(raw) = lookup("OTS_SHARE_BASE") {
            self.share_base_url = parse_url("OTS_SHARE_BASE", &raw)?;
        }
        if let Some(raw) = lookup("OTS_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("OTS_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("OTS_MAX_RETRIES") {
            self.retry.max_retries = parse_number("OTS_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("OTS_ENABLE_CERT_PINNING") {
            self.cert_pinning = matches!(raw.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(raw) = lookup("OTS_CERT_PINS") {
            self.cert_pins = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cert_pins(mut self, pins: Vec<String>) -> Self {
        self.cert_pinning = true;
        self.cert_pins = pins;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        check_endpoint(&self.base_url, "base_url")?;
        check_endpoint(&self.share_base_url, "share_base_url")?;

        if self.request_timeout_secs == 0 {
            return Err(OtsError::config("request_timeout_secs must be positive"));
        }
        if self.retry.initial_delay_ms == 0 {
            return Err(OtsError::config("retry.initial_delay_ms must be positive"));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(OtsError::config(
                "retry.max_delay_ms must not be below retry.initial_delay_ms",
            ));
        }
        if self.cert_pinning {
            if self.cert_pins.is_empty() {
                return Err(OtsError::config("cert_pinning is enabled but no pins are set"));
            }
            for pin in &self.cert_pins {
                pinning::check_pin(pin)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Parse `raw` and apply [`check_endpoint`].
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    parse_url("endpoint", raw)
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| OtsError::config(format!("{what} is not an absolute URL: {e}")))?;
    check_endpoint(&url, what)?;
    Ok(url)
}

/// An endpoint must be an absolute http(s) URL with a host. Plain http to a
/// non-loopback host is accepted but logged.
pub fn check_endpoint(url: &Url, what: &str) -> Result<()> {
    let scheme = url.scheme();
    if scheme != "https" && scheme != "http" {
        return Err(OtsError::config(format!(
            "{what} has unsupported scheme `{scheme}`"
        )));
    }
    if url.host().is_none() {
        return Err(OtsError::config(format!("{what} has no host")));
    }
    if scheme == "http" && !is_loopback(url) {
        tracing::warn!(
            field = what,
            host = url.host_str().unwrap_or_default(),
            "endpoint uses plain http; traffic is not encrypted"
        );
    }
    Ok(())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn parse_number<T: std::str::FromStr>(what: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| OtsError::config(format!("{what} must be a non-negative integer")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
