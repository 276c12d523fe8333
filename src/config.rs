use crate::ip_lookup::DEFAULT_IP_LOOKUP_URL;
use crate::submission::DEFAULT_LEAD_ENDPOINT;
use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_WIDGET_MAX: usize = 10_000;

/// Runtime configuration for the widget server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub lead_endpoint: Url,
    pub ip_lookup_url: Url,
    pub ip_lookup_timeout: Option<Duration>,
    pub ip_grace: Duration,
    pub submit_timeout: Option<Duration>,
    pub enable_cors: bool,
    pub widget_ttl: Duration,
    /// Most widgets held at once; the oldest are evicted first.
    pub widget_max: usize,
    pub trust_forwarded_for: bool,
    pub locales_path: Option<PathBuf>,
    /// Prefix for form actions, e.g. `https://forms.example.com`.
    pub public_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = var("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .context("failed to parse BIND_ADDR")?;

        let lead_endpoint = Url::parse(
            &var("LEAD_ENDPOINT_URL").unwrap_or_else(|| DEFAULT_LEAD_ENDPOINT.to_string()),
        )
        .context("failed to parse LEAD_ENDPOINT_URL")?;

        let ip_lookup_url = Url::parse(
            &var("IP_LOOKUP_URL").unwrap_or_else(|| DEFAULT_IP_LOOKUP_URL.to_string()),
        )
        .context("failed to parse IP_LOOKUP_URL")?;

        let millis = |key: &str| var(key).and_then(|v| v.parse::<u64>().ok());

        let ip_lookup_timeout = match millis("IP_LOOKUP_TIMEOUT_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(Duration::from_secs(5)),
        };
        let ip_grace = Duration::from_millis(millis("IP_GRACE_MS").unwrap_or(0));
        let submit_timeout = millis("SUBMIT_TIMEOUT_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let flag = |key: &str| {
            var(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        let enable_cors = flag("ENABLE_CORS");
        let trust_forwarded_for = flag("TRUST_FORWARDED_FOR");

        let widget_ttl = var("WIDGET_TTL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30 * 60));

        let widget_max = var("WIDGET_MAX")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_WIDGET_MAX);

        let locales_path = var("LOCALES_PATH").map(PathBuf::from);
        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bind_addr,
            lead_endpoint,
            ip_lookup_url,
            ip_lookup_timeout,
            ip_grace,
            submit_timeout,
            enable_cors,
            widget_ttl,
            widget_max,
            trust_forwarded_for,
            locales_path,
            public_base_url,
        })
    }

    /// Base of the widget submit routes as seen by browsers.
    pub fn action_base(&self) -> String {
        format!("{}/widget", self.public_base_url)
    }
}
