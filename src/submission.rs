use crate::attribution::UtmParams;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_LEAD_ENDPOINT: &str = "https://api.yoursite.com/lead";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("lead endpoint returned status {0}")]
    Rejected(reqwest::StatusCode),
    #[error("lead request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The four values a visitor types into the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LeadFields {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub message: String,
}

impl LeadFields {
    /// Names of required fields left empty. Whitespace counts as a value,
    /// as it does for the browser's `required` check.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("message", &self.message),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| key)
        .collect()
    }
}

/// Flat field set sent to the lead endpoint. Every field is always present;
/// unknown attribution values travel as empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadSubmission {
    fields: Vec<(&'static str, String)>,
}

impl LeadSubmission {
    pub fn new(
        lead: LeadFields,
        utm: &UtmParams,
        ip_address: Option<&str>,
        referrer: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        let mut fields = vec![
            ("name", lead.name),
            ("email", lead.email),
            ("phone", lead.phone),
            ("message", lead.message),
        ];
        for (key, value) in utm.fields() {
            fields.push((key, value.unwrap_or_default().to_string()));
        }
        fields.push(("ipAddress", ip_address.unwrap_or_default().to_string()));
        fields.push(("httpReferrer", referrer.unwrap_or_default().to_string()));
        fields.push(("httpUserAgent", user_agent.unwrap_or_default().to_string()));
        Self { fields }
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_multipart(&self) -> reqwest::multipart::Form {
        self.fields
            .iter()
            .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                form.text(*key, value.clone())
            })
    }
}

/// Destination for lead submissions.
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn send(&self, submission: &LeadSubmission) -> Result<(), SubmitError>;
}

/// Posts submissions as `multipart/form-data` to a fixed endpoint.
#[derive(Clone)]
pub struct HttpLeadSink {
    endpoint: url::Url,
    client: reqwest::Client,
}

impl HttpLeadSink {
    pub fn new(endpoint: url::Url, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            endpoint,
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl LeadSink for HttpLeadSink {
    async fn send(&self, submission: &LeadSubmission) -> Result<(), SubmitError> {
        debug!(endpoint = %self.endpoint, "posting lead");
        let resp = self
            .client
            .post(self.endpoint.clone())
            .multipart(submission.to_multipart())
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            info!(%status, "lead accepted");
            Ok(())
        } else {
            Err(SubmitError::Rejected(status))
        }
    }
}
