use crate::attribution::{AttributionSnapshot, PageContext};
use crate::ip_lookup::IpLookup;
use crate::labels::{LabelCatalog, LabelOverrides, LabelSet};
use crate::render::{RenderError, RenderOptions, render_form, scope_class};
use crate::submission::{LeadFields, LeadSink, LeadSubmission};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_LANG: &str = "en";
pub const DEFAULT_SUCCESS_URL: &str = "/";
pub const DEFAULT_ERROR_URL: &str = "/error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    pub lang: String,
    pub success_url: String,
    pub error_url: String,
    pub overrides: LabelOverrides,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            lang: DEFAULT_LANG.to_string(),
            success_url: DEFAULT_SUCCESS_URL.to_string(),
            error_url: DEFAULT_ERROR_URL.to_string(),
            overrides: LabelOverrides::default(),
        }
    }
}

impl WidgetConfig {
    /// Builds a config from element attributes (`lang`, `success-url`,
    /// `error-url`, `custom-labels`). Missing or empty attributes take the
    /// defaults, and so do redirect URLs that could not travel in a
    /// `Location` header.
    pub fn from_attributes<'a>(attr: impl Fn(&str) -> Option<&'a str>) -> Self {
        let pick = |name: &str, default: &str| {
            attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default.to_string())
        };
        let pick_url = |name: &str, default: &str| {
            let url = pick(name, default);
            if url.chars().all(|c| c.is_ascii_graphic()) {
                url
            } else {
                warn!(attribute = name, "redirect URL is not header-safe; using default");
                default.to_string()
            }
        };
        Self {
            lang: pick("lang", DEFAULT_LANG),
            success_url: pick_url("success-url", DEFAULT_SUCCESS_URL),
            error_url: pick_url("error-url", DEFAULT_ERROR_URL),
            overrides: attr("custom-labels")
                .map(LabelOverrides::from_json)
                .unwrap_or_default(),
        }
    }

    pub fn from_map(attrs: &HashMap<String, String>) -> Self {
        Self::from_attributes(|name| attrs.get(name).map(String::as_str))
    }

    /// Makes relative redirect URLs absolute against the host page.
    pub fn resolved_against(mut self, page: &Url) -> Self {
        for url in [&mut self.success_url, &mut self.error_url] {
            if let Ok(joined) = page.join(url.as_str()) {
                *url = joined.to_string();
            }
        }
        self
    }
}

#[derive(Clone)]
pub struct WidgetServices {
    pub catalog: Arc<LabelCatalog>,
    pub ip_lookup: Arc<dyn IpLookup>,
    pub sink: Arc<dyn LeadSink>,
    /// How long a submit waits for a pending IP lookup. Zero never waits.
    pub ip_grace: Duration,
    pub action_base: Option<String>,
}

/// Stand-in for the browser's submit event.
#[derive(Debug, Default)]
pub struct SubmitEvent {
    default_prevented: bool,
}

impl SubmitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Success(String),
    Error(String),
}

impl Navigation {
    pub fn location(&self) -> &str {
        match self {
            Navigation::Success(url) | Navigation::Error(url) => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Navigation::Success(_))
    }
}

pub struct Widget {
    id: Uuid,
    scope: String,
    config: WidgetConfig,
    labels: LabelSet,
    attribution: AttributionSnapshot,
    markup: String,
    services: WidgetServices,
}

impl Widget {
    /// Resolves labels, captures attribution (starting the IP lookup in the
    /// background) and renders the form. Outside a tokio runtime the IP is
    /// reported unavailable.
    pub fn mount(
        config: WidgetConfig,
        page: &PageContext,
        services: WidgetServices,
    ) -> Result<Self, RenderError> {
        let id = Uuid::new_v4();
        let scope = scope_class(&id);
        let labels = services.catalog.resolve(&config.lang, &config.overrides);
        let attribution = AttributionSnapshot::capture(page, services.ip_lookup.clone());
        let action = action_for(services.action_base.as_deref(), &id);
        let markup = render_form(
            &scope,
            &labels,
            RenderOptions {
                action: action.as_deref(),
                invalid: &[],
            },
        )?;
        info!(widget = %id, lang = %config.lang, "mounted lead form");
        Ok(Self {
            id,
            scope,
            config,
            labels,
            attribution,
            markup,
            services,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn attribution(&self) -> &AttributionSnapshot {
        &self.attribution
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn render_with_errors(&self, invalid: &[&str]) -> Result<String, RenderError> {
        let action = action_for(self.services.action_base.as_deref(), &self.id);
        render_form(
            &self.scope,
            &self.labels,
            RenderOptions {
                action: action.as_deref(),
                invalid,
            },
        )
    }

    pub async fn build_submission(&self, fields: LeadFields) -> LeadSubmission {
        let ip = self
            .attribution
            .ip_address_within(self.services.ip_grace)
            .await;
        LeadSubmission::new(
            fields,
            &self.attribution.utm,
            ip.as_deref(),
            self.attribution.referrer.as_deref(),
            self.attribution.user_agent.as_deref(),
        )
    }

    /// Handles a submit: suppresses the default action, sends the lead and
    /// picks the redirect. Failures of any kind lead to the error URL.
    pub async fn submit(&self, event: &mut SubmitEvent, fields: LeadFields) -> Navigation {
        event.prevent_default();
        let submission = self.build_submission(fields).await;
        match self.services.sink.send(&submission).await {
            Ok(()) => {
                info!(widget = %self.id, "lead submitted");
                Navigation::Success(self.config.success_url.clone())
            }
            Err(err) => {
                warn!(widget = %self.id, %err, "lead submission failed");
                Navigation::Error(self.config.error_url.clone())
            }
        }
    }
}

fn action_for(base: Option<&str>, id: &Uuid) -> Option<String> {
    base.map(|base| format!("{}/{id}/submit", base.trim_end_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_lookup::StaticIpLookup;
    use crate::submission::SubmitError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        outcome: Option<u16>,
        seen: Mutex<Vec<LeadSubmission>>,
    }

    #[async_trait]
    impl LeadSink for RecordingSink {
        async fn send(&self, submission: &LeadSubmission) -> Result<(), SubmitError> {
            self.seen.lock().unwrap().push(submission.clone());
            match self.outcome {
                None => Ok(()),
                Some(code) => Err(SubmitError::Rejected(
                    reqwest::StatusCode::from_u16(code).unwrap(),
                )),
            }
        }
    }

    fn services(ip: Option<&str>, sink: Arc<RecordingSink>) -> WidgetServices {
        WidgetServices {
            catalog: Arc::new(LabelCatalog::default()),
            ip_lookup: Arc::new(StaticIpLookup(ip.map(str::to_string))),
            sink,
            ip_grace: Duration::from_secs(1),
            action_base: Some("/widget".into()),
        }
    }

    fn fields() -> LeadFields {
        LeadFields {
            name: "Grace".into(),
            email: "grace@example.com".into(),
            phone: "555-0199".into(),
            message: "Hello".into(),
        }
    }

    fn page(url: &str) -> PageContext {
        PageContext::new(
            Some(url::Url::parse(url).unwrap()),
            Some("https://search.example/".into()),
            Some("TestAgent/1.0".into()),
        )
    }

    #[test]
    fn attributes_take_defaults_when_missing_or_empty() {
        let mut attrs = HashMap::new();
        attrs.insert("lang".to_string(), String::new());
        attrs.insert("custom-labels".to_string(), "{broken".to_string());
        let config = WidgetConfig::from_map(&attrs);
        assert_eq!(config, WidgetConfig::default());

        attrs.insert("lang".to_string(), "es".to_string());
        attrs.insert("success-url".to_string(), "/thanks".to_string());
        attrs.insert("custom-labels".to_string(), r#"{"submit":"Go"}"#.to_string());
        let config = WidgetConfig::from_map(&attrs);
        assert_eq!(config.lang, "es");
        assert_eq!(config.success_url, "/thanks");
        assert_eq!(config.error_url, DEFAULT_ERROR_URL);
        assert!(!config.overrides.is_empty());
    }

    #[test]
    fn control_characters_in_redirect_urls_fall_back_to_defaults() {
        let mut attrs = HashMap::new();
        attrs.insert("success-url".to_string(), "/thanks\nx".to_string());
        attrs.insert("error-url".to_string(), "/oops page".to_string());
        let config = WidgetConfig::from_map(&attrs);
        assert_eq!(config.success_url, DEFAULT_SUCCESS_URL);
        assert_eq!(config.error_url, DEFAULT_ERROR_URL);
    }

    #[test]
    fn relative_redirects_resolve_against_host_page() {
        let config = WidgetConfig {
            success_url: "/thanks".into(),
            error_url: "https://other.example/err".into(),
            ..WidgetConfig::default()
        }
        .resolved_against(&url::Url::parse("https://shop.example/landing?utm_source=ads").unwrap());
        assert_eq!(config.success_url, "https://shop.example/thanks");
        assert_eq!(config.error_url, "https://other.example/err");
    }

    #[test]
    fn mount_outside_runtime_still_renders() {
        let sink = Arc::new(RecordingSink::default());
        let widget = Widget::mount(
            WidgetConfig::default(),
            &page("https://a.example/"),
            services(Some("203.0.113.5"), sink),
        )
        .unwrap();
        assert!(widget.markup().contains("<form"));
    }

    #[tokio::test]
    async fn mount_renders_resolved_labels() {
        let sink = Arc::new(RecordingSink::default());
        let config = WidgetConfig {
            lang: "es".into(),
            overrides: LabelOverrides::from_json(r#"{"title":"Hablemos"}"#),
            ..WidgetConfig::default()
        };
        let widget = Widget::mount(config, &page("https://a.example/"), services(None, sink)).unwrap();
        assert!(widget.markup().contains(">Hablemos</h3>"));
        assert!(widget.markup().contains(">Nombre</label>"));
        assert!(
            widget
                .markup()
                .contains(&format!("action=\"/widget/{}/submit\"", widget.id()))
        );
    }

    #[tokio::test]
    async fn successful_submit_navigates_to_success_url() {
        let sink = Arc::new(RecordingSink::default());
        let config = WidgetConfig {
            success_url: "/thanks".into(),
            ..WidgetConfig::default()
        };
        let widget = Widget::mount(
            config,
            &page("https://a.example/?utm_campaign=spring&utm_medium=email"),
            services(Some("203.0.113.5"), sink.clone()),
        )
        .unwrap();
        let mut event = SubmitEvent::new();
        let nav = widget.submit(&mut event, fields()).await;
        assert_eq!(nav, Navigation::Success("/thanks".into()));
        assert!(event.default_prevented());

        let seen = sink.seen.lock().unwrap();
        let submission = &seen[0];
        assert_eq!(submission.get("utmCampaign"), Some("spring"));
        assert_eq!(submission.get("utmMedium"), Some("email"));
        assert_eq!(submission.get("utmSource"), Some(""));
        assert_eq!(submission.get("ipAddress"), Some("203.0.113.5"));
        assert_eq!(submission.get("httpUserAgent"), Some("TestAgent/1.0"));
        assert_eq!(submission.get("httpReferrer"), Some("https://search.example/"));
    }

    #[tokio::test]
    async fn rejected_submit_navigates_to_error_url_and_still_prevents_default() {
        let sink = Arc::new(RecordingSink {
            outcome: Some(500),
            ..RecordingSink::default()
        });
        let widget = Widget::mount(
            WidgetConfig::default(),
            &page("https://a.example/"),
            services(None, sink),
        )
        .unwrap();
        let mut event = SubmitEvent::new();
        let nav = widget.submit(&mut event, fields()).await;
        assert_eq!(nav, Navigation::Error("/error".into()));
        assert!(!nav.is_success());
        assert!(event.default_prevented());
    }

    #[tokio::test]
    async fn failed_ip_lookup_sends_empty_address() {
        let sink = Arc::new(RecordingSink::default());
        let widget = Widget::mount(
            WidgetConfig::default(),
            &page("https://a.example/"),
            services(None, sink.clone()),
        )
        .unwrap();
        widget.submit(&mut SubmitEvent::new(), fields()).await;
        assert_eq!(sink.seen.lock().unwrap()[0].get("ipAddress"), Some(""));
    }

    #[tokio::test]
    async fn instances_keep_separate_snapshots() {
        let sink = Arc::new(RecordingSink::default());
        let first = Widget::mount(
            WidgetConfig::default(),
            &page("https://a.example/?utm_source=alpha"),
            services(Some("192.0.2.10"), sink.clone()),
        )
        .unwrap();
        let second = Widget::mount(
            WidgetConfig::default(),
            &PageContext::new(
                Some(url::Url::parse("https://a.example/?utm_term=beta").unwrap()),
                None,
                None,
            ),
            services(None, sink.clone()),
        )
        .unwrap();
        assert_ne!(first.id(), second.id());
        first.submit(&mut SubmitEvent::new(), fields()).await;
        second.submit(&mut SubmitEvent::new(), fields()).await;

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen[0].get("utmSource"), Some("alpha"));
        assert_eq!(seen[0].get("utmTerm"), Some(""));
        assert_eq!(seen[1].get("utmSource"), Some(""));
        assert_eq!(seen[1].get("utmTerm"), Some("beta"));
        assert_eq!(seen[1].get("ipAddress"), Some(""));
        assert_eq!(seen[1].get("httpReferrer"), Some(""));
    }
}
