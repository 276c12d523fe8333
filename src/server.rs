use crate::api;
use crate::config::AppConfig;
use crate::ip_lookup::{IpLookup, StaticIpLookup};
use crate::widget::{Widget, WidgetServices};
use axum::Router;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::routing::{get, post};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

struct StoredWidget {
    widget: Arc<Widget>,
    mounted_at: Instant,
}

/// Widgets mounted by this process, waiting for their form post.
pub struct WidgetStore {
    ttl: Duration,
    max: usize,
    inner: RwLock<HashMap<Uuid, StoredWidget>>,
}

impl WidgetStore {
    pub fn new(ttl: Duration, max: usize) -> Self {
        Self {
            ttl,
            max: max.max(1),
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, widget: Widget) -> Arc<Widget> {
        let widget = Arc::new(widget);
        self.restore(widget.clone()).await;
        widget
    }

    /// Puts a taken widget back, e.g. after a post that failed the
    /// required-field check.
    pub async fn restore(&self, widget: Arc<Widget>) {
        let mut inner = self.inner.write().await;
        let ttl = self.ttl;
        let before = inner.len();
        inner.retain(|_, stored| stored.mounted_at.elapsed() < ttl);
        if inner.len() != before {
            debug!(expired = before - inner.len(), "pruned expired widgets");
        }
        while inner.len() >= self.max {
            let Some(oldest) = inner
                .iter()
                .min_by_key(|(_, stored)| stored.mounted_at)
                .map(|(id, _)| *id)
            else {
                break;
            };
            inner.remove(&oldest);
            debug!(widget = %oldest, "evicted oldest widget");
        }
        inner.insert(
            widget.id(),
            StoredWidget {
                widget,
                mounted_at: Instant::now(),
            },
        );
    }

    /// Removes and returns a live widget. Only one caller can take a given id.
    pub async fn take(&self, id: &Uuid) -> Option<Arc<Widget>> {
        self.inner
            .write()
            .await
            .remove(id)
            .filter(|stored| stored.mounted_at.elapsed() < self.ttl)
            .map(|stored| stored.widget)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: WidgetServices,
    pub widgets: Arc<WidgetStore>,
}

impl AppState {
    pub fn new(config: AppConfig, services: WidgetServices) -> Self {
        let widgets = Arc::new(WidgetStore::new(config.widget_ttl, config.widget_max));
        Self {
            config,
            services,
            widgets,
        }
    }

    /// Services for one mount. The visitor's address comes from the request:
    /// a trusted `X-Forwarded-For` first, then the TCP peer.
    pub fn services_for(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> WidgetServices {
        let forwarded = if self.config.trust_forwarded_for {
            forwarded_for(headers)
        } else {
            None
        };
        let ip = forwarded.or_else(|| peer.map(|ip| ip.to_string()));
        let lookup: Arc<dyn IpLookup> = Arc::new(StaticIpLookup(ip));
        WidgetServices {
            ip_lookup: lookup,
            ..self.services.clone()
        }
    }
}

pub fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(api::health))
        .route("/lead-form.js", get(api::serve_loader))
        .route("/widget", get(api::mount_widget))
        .route("/widget/{id}/submit", post(api::submit_widget))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http());
    if state.config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.with_state(state)
}

pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelCatalog;
    use crate::submission::HttpLeadSink;
    use crate::widget::WidgetConfig;

    fn app_config(vars: &[(&str, &str)]) -> AppConfig {
        AppConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    fn services() -> WidgetServices {
        let sink = HttpLeadSink::new(url::Url::parse("http://127.0.0.1:9/lead").unwrap(), None)
            .unwrap();
        WidgetServices {
            catalog: Arc::new(LabelCatalog::default()),
            ip_lookup: Arc::new(StaticIpLookup(None)),
            sink: Arc::new(sink),
            ip_grace: Duration::ZERO,
            action_base: None,
        }
    }

    fn widget() -> Widget {
        Widget::mount(WidgetConfig::default(), &Default::default(), services()).unwrap()
    }

    #[test]
    fn forwarded_for_takes_first_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.4, 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers).as_deref(), Some("198.51.100.4"));
        assert_eq!(forwarded_for(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn store_evicts_oldest_past_capacity() {
        let store = WidgetStore::new(Duration::from_secs(60), 2);
        let first = store.insert(widget()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.insert(widget()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = store.insert(widget()).await;
        assert_eq!(store.len().await, 2);
        assert!(store.take(&first.id()).await.is_none());
        assert!(store.take(&second.id()).await.is_some());
        assert!(store.take(&third.id()).await.is_some());
    }

    #[tokio::test]
    async fn take_hands_out_a_widget_once() {
        let store = WidgetStore::new(Duration::from_secs(60), 10);
        let id = store.insert(widget()).await.id();
        let taken = store.take(&id).await.unwrap();
        assert!(store.take(&id).await.is_none());
        store.restore(taken).await;
        assert!(store.take(&id).await.is_some());
    }

    #[tokio::test]
    async fn expired_widgets_cannot_be_taken() {
        let store = WidgetStore::new(Duration::ZERO, 10);
        let id = store.insert(widget()).await.id();
        assert!(store.take(&id).await.is_none());
    }

    #[tokio::test]
    async fn visitor_address_prefers_trusted_header_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4"));
        let peer: IpAddr = "192.0.2.33".parse().unwrap();

        let untrusted = AppState::new(app_config(&[]), services());
        let lookup = untrusted.services_for(&headers, Some(peer)).ip_lookup;
        assert_eq!(lookup.lookup().await.unwrap(), "192.0.2.33");

        let trusted = AppState::new(app_config(&[("TRUST_FORWARDED_FOR", "true")]), services());
        let lookup = trusted.services_for(&headers, Some(peer)).ip_lookup;
        assert_eq!(lookup.lookup().await.unwrap(), "198.51.100.4");

        let lookup = untrusted.services_for(&HeaderMap::new(), None).ip_lookup;
        assert!(lookup.lookup().await.is_err());
    }
}
