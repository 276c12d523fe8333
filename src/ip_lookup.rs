use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("ip lookup request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ip lookup returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("ip lookup response has no `ip` string")]
    Malformed,
}

/// Resolves the caller's public IP address.
#[async_trait]
pub trait IpLookup: Send + Sync {
    async fn lookup(&self) -> Result<String, LookupError>;
}

/// Queries a JSON lookup service answering `{"ip": "..."}`.
#[derive(Clone)]
pub struct HttpIpLookup {
    url: url::Url,
    client: reqwest::Client,
}

impl HttpIpLookup {
    pub fn new(url: url::Url, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            url,
            client: builder.build()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: Option<serde_json::Value>,
}

#[async_trait]
impl IpLookup for HttpIpLookup {
    async fn lookup(&self) -> Result<String, LookupError> {
        let resp = self.client.get(self.url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }
        let bytes = resp.bytes().await?;
        let body: IpResponse = serde_json::from_slice(&bytes).map_err(|_| LookupError::Malformed)?;
        match body.ip {
            Some(serde_json::Value::String(ip)) if !ip.trim().is_empty() => Ok(ip),
            _ => Err(LookupError::Malformed),
        }
    }
}

/// Lookup with a known answer, e.g. an address taken from a trusted proxy header.
#[derive(Clone, Debug)]
pub struct StaticIpLookup(pub Option<String>);

#[async_trait]
impl IpLookup for StaticIpLookup {
    async fn lookup(&self) -> Result<String, LookupError> {
        self.0.clone().ok_or(LookupError::Malformed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpState {
    Pending,
    Resolved(String),
    Unavailable,
}

/// Handle to a lookup running in the background. Dropping it aborts the
/// lookup if it is still in flight.
#[derive(Debug)]
pub struct IpLookupTask {
    rx: watch::Receiver<IpState>,
    handle: Option<JoinHandle<()>>,
}

impl IpLookupTask {
    /// Spawns the lookup on the current tokio runtime. Without a runtime the
    /// address is reported unavailable.
    pub fn spawn(lookup: Arc<dyn IpLookup>) -> Self {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime; skipping IP lookup");
            let (_tx, rx) = watch::channel(IpState::Unavailable);
            return Self { rx, handle: None };
        };
        let (tx, rx) = watch::channel(IpState::Pending);
        let handle = runtime.spawn(async move {
            let state = match lookup.lookup().await {
                Ok(ip) => {
                    debug!(%ip, "ip lookup resolved");
                    IpState::Resolved(ip)
                }
                Err(err) => {
                    warn!(%err, "IP lookup failed");
                    IpState::Unavailable
                }
            };
            let _ = tx.send(state);
        });
        Self {
            rx,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> IpState {
        self.rx.borrow().clone()
    }

    /// The address if the lookup has already resolved; never waits.
    pub fn current(&self) -> Option<String> {
        match &*self.rx.borrow() {
            IpState::Resolved(ip) => Some(ip.clone()),
            _ => None,
        }
    }

    /// Waits up to `grace` for the lookup to settle, then reports whatever
    /// is known.
    pub async fn settle(&self, grace: Duration) -> Option<String> {
        if grace.is_zero() {
            return self.current();
        }
        let mut rx = self.rx.clone();
        let _ = tokio::time::timeout(grace, rx.wait_for(|s| *s != IpState::Pending)).await;
        self.current()
    }
}

impl Drop for IpLookupTask {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
