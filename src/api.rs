use crate::attribution::PageContext;
use crate::server::AppState;
use crate::submission::LeadFields;
use crate::widget::{SubmitEvent, Widget, WidgetConfig};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{Extensions, HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn serve_loader(State(state): State<AppState>) -> impl IntoResponse {
    let script = crate::embed::loader_script(&state.config.action_base());
    let mut resp = Response::new(script);
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript; charset=utf-8"),
    );
    resp
}

/// Host attributes plus what the loader knows about the page.
#[derive(Debug, Default, Deserialize)]
pub struct MountQuery {
    pub lang: Option<String>,
    #[serde(rename = "success-url")]
    pub success_url: Option<String>,
    #[serde(rename = "error-url")]
    pub error_url: Option<String>,
    #[serde(rename = "custom-labels")]
    pub custom_labels: Option<String>,
    #[serde(rename = "page-url")]
    pub page_url: Option<String>,
    pub referrer: Option<String>,
}

impl MountQuery {
    fn widget_config(&self, page: &PageContext) -> WidgetConfig {
        let mut attrs = HashMap::new();
        for (name, value) in [
            ("lang", &self.lang),
            ("success-url", &self.success_url),
            ("error-url", &self.error_url),
            ("custom-labels", &self.custom_labels),
        ] {
            if let Some(value) = value {
                attrs.insert(name.to_string(), value.clone());
            }
        }
        let config = WidgetConfig::from_map(&attrs);
        match &page.url {
            Some(url) => config.resolved_against(url),
            None => config,
        }
    }

    fn page_context(&self, headers: &HeaderMap) -> PageContext {
        let header_str = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let url = self
            .page_url
            .clone()
            .or_else(|| header_str(header::REFERER))
            .and_then(|raw| url::Url::parse(&raw).ok());
        PageContext::new(url, self.referrer.clone(), header_str(header::USER_AGENT))
    }
}

pub async fn mount_widget(
    State(state): State<AppState>,
    Query(query): Query<MountQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let page = query.page_context(&headers);
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let services = state.services_for(&headers, peer);
    match Widget::mount(query.widget_config(&page), &page, services) {
        Ok(widget) => {
            let widget = state.widgets.insert(widget).await;
            Html(widget.markup().to_string()).into_response()
        }
        Err(err) => {
            warn!(%err, "failed to render lead form");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

/// Runs the submit contract for a mounted widget. The loader script asks for
/// JSON and navigates itself; plain form posts get a `303`.
pub async fn submit_widget(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(fields): Form<LeadFields>,
) -> Response {
    let Ok(id) = id.parse::<Uuid>() else {
        return (StatusCode::NOT_FOUND, "unknown or expired form").into_response();
    };
    let Some(widget) = state.widgets.take(&id).await else {
        return (StatusCode::NOT_FOUND, "unknown or expired form").into_response();
    };
    let reply_json = wants_json(&headers);

    let missing = fields.missing();
    if !missing.is_empty() {
        info!(widget = %id, ?missing, "required fields missing");
        let rendered = widget.render_with_errors(&missing);
        state.widgets.restore(widget).await;
        return match rendered {
            Ok(html) if reply_json => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "html": html }))).into_response()
            }
            Ok(html) => (StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        };
    }

    let mut event = SubmitEvent::new();
    let navigation = widget.submit(&mut event, fields).await;
    if reply_json {
        Json(json!({
            "location": navigation.location(),
            "success": navigation.is_success(),
        }))
        .into_response()
    } else {
        Redirect::to(navigation.location()).into_response()
    }
}
