//! Page-level wiring: dropping a widget into the `#form-wrapper`
//! placeholder and upgrading `<lead-form>` elements already in a page.

use crate::attribution::PageContext;
use crate::registry::{ElementRegistry, LEAD_FORM_ELEMENT};
use crate::render::{RenderError, select_all};
use crate::widget::{DEFAULT_ERROR_URL, DEFAULT_LANG, DEFAULT_SUCCESS_URL, Widget, WidgetConfig, WidgetServices};
use kuchiki::NodeRef;
use kuchiki::traits::*;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const WRAPPER_SELECTOR: &str = "#form-wrapper";
const MOUNTED_ATTR: &str = "data-lead-form-id";

/// Configuration carried on the embedding `<script>` tag as `data-*` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDataset {
    pub lang: Option<String>,
    pub success_url: Option<String>,
    pub error_url: Option<String>,
    pub custom_labels: Option<String>,
}

impl ScriptDataset {
    pub fn from_attributes<'a>(attr: impl Fn(&str) -> Option<&'a str>) -> Self {
        let read = |name: &str| {
            attr(name)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            lang: read("data-lang"),
            success_url: read("data-success-url"),
            error_url: read("data-error-url"),
            custom_labels: read("data-custom-labels"),
        }
    }

    /// Attributes for the `<lead-form>` element the wrapper receives.
    /// `custom-labels` is only emitted when the script carried it.
    pub fn element_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![
            ("lang", self.lang.clone().unwrap_or_else(|| DEFAULT_LANG.into())),
            (
                "success-url",
                self.success_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SUCCESS_URL.into()),
            ),
            (
                "error-url",
                self.error_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ERROR_URL.into()),
            ),
        ];
        if let Some(labels) = &self.custom_labels {
            attrs.push(("custom-labels", labels.clone()));
        }
        attrs
    }

    pub fn to_widget_config(&self) -> WidgetConfig {
        let attrs: HashMap<String, String> = self
            .element_attributes()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        WidgetConfig::from_map(&attrs)
    }
}

/// A page after widgets were mounted into it.
pub struct MountedPage {
    pub html: String,
    pub widgets: Vec<Widget>,
}

/// Reads the dataset of the embedding script: a `<script data-lead-form>` tag
/// or one whose `src` names the loader.
pub fn find_embed_script(document: &NodeRef) -> Option<ScriptDataset> {
    let scripts = select_all(document, "script[data-lead-form], script[src*=\"lead-form\"]").ok()?;
    let script = scripts.into_iter().next()?;
    let element = script.as_element()?;
    let attributes = element.attributes.borrow();
    Some(ScriptDataset::from_attributes(|name| attributes.get(name)))
}

/// Injects exactly one widget into `#form-wrapper`. Without a wrapper the
/// document is left alone and `None` is returned.
pub fn automount(
    document: &NodeRef,
    dataset: &ScriptDataset,
    page: &PageContext,
    services: &WidgetServices,
) -> Result<Option<Widget>, RenderError> {
    let Some(wrapper) = select_all(document, WRAPPER_SELECTOR)?.into_iter().next() else {
        debug!("no {WRAPPER_SELECTOR} in page; skipping auto-mount");
        return Ok(None);
    };

    let placeholder = parse_fragment(&format!("<{LEAD_FORM_ELEMENT}></{LEAD_FORM_ELEMENT}>"))?
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Html("failed to build placeholder element".into()))?;
    if let Some(element) = placeholder.as_element() {
        let mut attributes = element.attributes.borrow_mut();
        for (name, value) in dataset.element_attributes() {
            attributes.insert(name, value);
        }
    }
    clear_children(&wrapper);
    wrapper.append(placeholder.clone());

    let widget = Widget::mount(dataset.to_widget_config(), page, services.clone())?;
    fill_element(&placeholder, &widget)?;
    Ok(Some(widget))
}

/// Mounts every `<lead-form>` in the document that has not been mounted yet.
/// Nothing happens unless the element name is registered.
pub fn upgrade_elements(
    document: &NodeRef,
    registry: &ElementRegistry,
    page: &PageContext,
    services: &WidgetServices,
) -> Result<Vec<Widget>, RenderError> {
    if !registry.is_defined(LEAD_FORM_ELEMENT) {
        warn!("{LEAD_FORM_ELEMENT} is not registered; leaving elements as-is");
        return Ok(Vec::new());
    }
    let mut widgets = Vec::new();
    for node in select_all(document, LEAD_FORM_ELEMENT)? {
        let Some(element) = node.as_element() else {
            continue;
        };
        let config = {
            let attributes = element.attributes.borrow();
            if attributes.contains(MOUNTED_ATTR) {
                continue;
            }
            WidgetConfig::from_attributes(|name| attributes.get(name))
        };
        let widget = Widget::mount(config, page, services.clone())?;
        fill_element(&node, &widget)?;
        widgets.push(widget);
    }
    Ok(widgets)
}

/// Auto-mounts from the script dataset (explicit, or read from the page's
/// embed script), then upgrades any other `<lead-form>` elements.
pub fn mount_page(
    html: &str,
    dataset: Option<&ScriptDataset>,
    registry: &ElementRegistry,
    page: &PageContext,
    services: &WidgetServices,
) -> Result<MountedPage, RenderError> {
    let document = kuchiki::parse_html().one(html);
    let dataset = dataset
        .cloned()
        .or_else(|| find_embed_script(&document))
        .unwrap_or_default();
    let mut widgets = Vec::new();
    if let Some(widget) = automount(&document, &dataset, page, services)? {
        widgets.push(widget);
    }
    widgets.extend(upgrade_elements(&document, registry, page, services)?);
    Ok(MountedPage {
        html: document.to_string(),
        widgets,
    })
}

fn fill_element(node: &NodeRef, widget: &Widget) -> Result<(), RenderError> {
    if let Some(element) = node.as_element() {
        element
            .attributes
            .borrow_mut()
            .insert(MOUNTED_ATTR, widget.id().to_string());
    }
    clear_children(node);
    for child in parse_fragment(widget.markup())? {
        node.append(child);
    }
    Ok(())
}

fn clear_children(node: &NodeRef) {
    let existing: Vec<_> = node.children().collect();
    for child in existing {
        child.detach();
    }
}

fn parse_fragment(html: &str) -> Result<Vec<NodeRef>, RenderError> {
    // Wrap to keep the parser from hoisting fragment nodes out of place.
    let wrapper_html = format!("<div id=\"__lead_form_fragment\">{html}</div>");
    let fragment_doc = kuchiki::parse_html().one(wrapper_html);
    let wrapper = select_all(&fragment_doc, "#__lead_form_fragment")?
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Html("select fragment wrapper failed".into()))?;
    let children: Vec<_> = wrapper.children().collect();
    for child in &children {
        child.detach();
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_lookup::StaticIpLookup;
    use crate::labels::LabelCatalog;
    use crate::submission::{LeadSink, LeadSubmission, SubmitError};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl LeadSink for NullSink {
        async fn send(&self, _submission: &LeadSubmission) -> Result<(), SubmitError> {
            Ok(())
        }
    }

    fn services() -> WidgetServices {
        WidgetServices {
            catalog: Arc::new(LabelCatalog::default()),
            ip_lookup: Arc::new(StaticIpLookup(None)),
            sink: Arc::new(NullSink),
            ip_grace: Duration::ZERO,
            action_base: None,
        }
    }

    fn registry() -> ElementRegistry {
        let registry = ElementRegistry::default();
        registry.define(LEAD_FORM_ELEMENT).unwrap();
        registry
    }

    #[tokio::test]
    async fn mounts_one_widget_into_wrapper() {
        let html = r#"<html><body>
            <div id="form-wrapper"><p>loading</p></div>
            <script src="/lead-form.js" data-lang="es" data-success-url="/gracias"></script>
            </body></html>"#;
        let mounted = mount_page(html, None, &registry(), &PageContext::default(), &services()).unwrap();
        assert_eq!(mounted.widgets.len(), 1);
        let widget = &mounted.widgets[0];
        assert_eq!(widget.config().lang, "es");
        assert_eq!(widget.config().success_url, "/gracias");
        assert_eq!(widget.config().error_url, "/error");
        assert!(!mounted.html.contains("loading"));
        assert!(mounted.html.contains("<lead-form"));
        assert!(mounted.html.contains(">Contáctanos</h3>"));
        assert!(!mounted.html.contains("custom-labels"));
    }

    #[tokio::test]
    async fn page_without_wrapper_is_untouched() {
        let html = "<html><head></head><body><main>hi</main></body></html>";
        let document = kuchiki::parse_html().one(html);
        let widget = automount(
            &document,
            &ScriptDataset::default(),
            &PageContext::default(),
            &services(),
        )
        .unwrap();
        assert!(widget.is_none());
        assert_eq!(document.to_string(), html);
    }

    #[tokio::test]
    async fn upgrades_authored_elements_with_their_own_attributes() {
        let html = r#"<body>
            <lead-form lang="es" custom-labels='{"submit":"Mandar"}'></lead-form>
            <lead-form></lead-form>
            </body>"#;
        let mounted = mount_page(html, None, &registry(), &PageContext::default(), &services()).unwrap();
        assert_eq!(mounted.widgets.len(), 2);
        assert!(mounted.html.contains(">Mandar</button>"));
        assert!(mounted.html.contains(">Submit</button>"));
        assert_eq!(mounted.html.matches(MOUNTED_ATTR).count(), 2);
    }

    #[tokio::test]
    async fn unregistered_element_is_not_upgraded() {
        let document = kuchiki::parse_html().one("<body><lead-form></lead-form></body>");
        let widgets = upgrade_elements(
            &document,
            &ElementRegistry::default(),
            &PageContext::default(),
            &services(),
        )
        .unwrap();
        assert!(widgets.is_empty());
    }

    #[test]
    fn dataset_defaults_fill_element_attributes() {
        let dataset = ScriptDataset::from_attributes(|name| match name {
            "data-error-url" => Some("/oops"),
            "data-lang" => Some(""),
            _ => None,
        });
        assert_eq!(
            dataset.element_attributes(),
            vec![
                ("lang", "en".to_string()),
                ("success-url", "/".to_string()),
                ("error-url", "/oops".to_string()),
            ]
        );
    }
}
