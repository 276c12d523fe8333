use crate::ip_lookup::{IpLookup, IpLookupTask};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// What the widget can see of the page it is mounted in.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: Option<Url>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

impl PageContext {
    pub fn new(url: Option<Url>, referrer: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            url,
            referrer,
            user_agent,
        }
    }
}

/// The five marketing tags read from the page query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtmParams {
    pub campaign: Option<String>,
    pub source: Option<String>,
    pub medium: Option<String>,
    pub content: Option<String>,
    pub term: Option<String>,
}

impl UtmParams {
    /// First occurrence of each `utm_*` parameter wins.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "utm_campaign" => &mut params.campaign,
                "utm_source" => &mut params.source,
                "utm_medium" => &mut params.medium,
                "utm_content" => &mut params.content,
                "utm_term" => &mut params.term,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    /// Multipart field names paired with their values, in wire order.
    pub fn fields(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("utmCampaign", self.campaign.as_deref()),
            ("utmSource", self.source.as_deref()),
            ("utmMedium", self.medium.as_deref()),
            ("utmContent", self.content.as_deref()),
            ("utmTerm", self.term.as_deref()),
        ]
    }
}

/// Attribution captured once when a widget mounts.
#[derive(Debug)]
pub struct AttributionSnapshot {
    pub utm: UtmParams,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    ip: IpLookupTask,
}

impl AttributionSnapshot {
    /// Reads the page synchronously and starts the IP lookup in the background.
    pub fn capture(page: &PageContext, ip_lookup: Arc<dyn IpLookup>) -> Self {
        Self {
            utm: page.url.as_ref().map(UtmParams::from_url).unwrap_or_default(),
            referrer: non_empty(page.referrer.as_deref()),
            user_agent: non_empty(page.user_agent.as_deref()),
            ip: IpLookupTask::spawn(ip_lookup),
        }
    }

    pub async fn ip_address_within(&self, grace: Duration) -> Option<String> {
        self.ip.settle(grace).await
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
