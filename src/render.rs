use crate::labels::{LabelKey, LabelSet};
use kuchiki::NodeRef;
use kuchiki::traits::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("html manipulation failed: {0}")]
    Html(String),
}

/// Per-render inputs that are not labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    /// Where the form posts to. `None` leaves the attribute off.
    pub action: Option<&'a str>,
    /// Required fields to flag with the `errorRequired` label.
    pub invalid: &'a [&'a str],
}

/// Class prefix isolating one widget's markup and styles from the host page.
pub fn scope_class(instance: &uuid::Uuid) -> String {
    format!("lf-{}", &instance.simple().to_string()[..12])
}

fn scoped_style(s: &str) -> String {
    format!(
        ".{s}{{all:initial;display:block;box-sizing:border-box;font-family:Arial,sans-serif;\
border:1px solid #ddd;padding:20px;border-radius:6px;max-width:400px;color:#222}}\
.{s} *{{box-sizing:border-box}}\
.{s}-title{{display:block;font-size:1.17em;font-weight:700;margin:0 0 10px}}\
.{s}-form{{display:block;margin:0}}\
.{s}-label{{display:block;margin:10px 0 5px;font-weight:600}}\
.{s}-input{{display:block;width:100%;padding:10px;border:1px solid #ccc;border-radius:4px;\
margin:0 0 10px;font:inherit}}\
.{s}-error{{display:block;color:#b00020;margin:-6px 0 10px;font-size:.9em}}\
.{s}-button{{display:inline-block;background:#007bff;color:#fff;border:none;padding:10px 18px;\
cursor:pointer;border-radius:4px;font:inherit}}"
    )
}

fn skeleton(s: &str) -> String {
    let field = |name: &str, input: &str| {
        format!(
            "<label class=\"{s}-label\" for=\"{s}-{name}\" data-label=\"{name}\"></label>\
{input}\
<p class=\"{s}-error\" role=\"alert\" data-error-for=\"{name}\"></p>"
        )
    };
    let name = field(
        "name",
        &format!(
            "<input class=\"{s}-input\" id=\"{s}-name\" name=\"name\" type=\"text\" required data-placeholder=\"name\">"
        ),
    );
    let email = field(
        "email",
        &format!(
            "<input class=\"{s}-input\" id=\"{s}-email\" name=\"email\" type=\"email\" required data-placeholder=\"email\">"
        ),
    );
    let phone = field(
        "phone",
        &format!(
            "<input class=\"{s}-input\" id=\"{s}-phone\" name=\"phone\" type=\"text\" required data-placeholder=\"phone\">"
        ),
    );
    let message = field(
        "message",
        &format!(
            "<textarea class=\"{s}-input\" id=\"{s}-message\" name=\"message\" required data-placeholder=\"message\"></textarea>"
        ),
    );
    format!(
        "<div class=\"{s}\" data-lead-form=\"{s}\">\
<style>{style}</style>\
<h3 class=\"{s}-title\" data-label=\"title\"></h3>\
<form class=\"{s}-form\" id=\"{s}-form\" method=\"post\" accept-charset=\"utf-8\" enctype=\"application/x-www-form-urlencoded\">\
{name}{email}{phone}{message}\
<button class=\"{s}-button\" type=\"submit\" data-label=\"submit\"></button>\
</form></div>",
        style = scoped_style(s),
    )
}

/// Renders the form markup. Label text and placeholders are inserted as
/// text/attribute nodes, so the serializer escapes them.
pub fn render_form(
    scope: &str,
    labels: &LabelSet,
    options: RenderOptions<'_>,
) -> Result<String, RenderError> {
    let document = kuchiki::parse_html().one(skeleton(scope));

    for node in select_all(&document, "[data-label]")? {
        let element = node
            .as_element()
            .ok_or_else(|| RenderError::Html("label target is not an element".into()))?;
        let key = element.attributes.borrow_mut().remove("data-label");
        let Some(key) = key.and_then(|attr| LabelKey::parse(&attr.value)) else {
            continue;
        };
        set_text(&node, labels.get(key));
    }

    for node in select_all(&document, "[data-placeholder]")? {
        let Some(element) = node.as_element() else {
            continue;
        };
        let mut attributes = element.attributes.borrow_mut();
        if let Some(key) = attributes
            .remove("data-placeholder")
            .and_then(|attr| LabelKey::parse(&attr.value))
        {
            attributes.insert("placeholder", labels.get(key).to_string());
        }
    }

    for node in select_all(&document, "[data-error-for]")? {
        let Some(element) = node.as_element() else {
            continue;
        };
        let field = element
            .attributes
            .borrow_mut()
            .remove("data-error-for")
            .map(|attr| attr.value)
            .unwrap_or_default();
        if options.invalid.contains(&field.as_str()) {
            set_text(&node, &labels.error_required);
        } else {
            node.detach();
        }
    }

    let form = select_all(&document, "form")?
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Html("form element missing".into()))?;
    if let (Some(action), Some(element)) = (options.action, form.as_element()) {
        element
            .attributes
            .borrow_mut()
            .insert("action", action.to_string());
    }

    let root = select_all(&document, "[data-lead-form]")?
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::Html("widget root missing".into()))?;
    Ok(root.to_string())
}

pub(crate) fn select_all(node: &NodeRef, selector: &str) -> Result<Vec<NodeRef>, RenderError> {
    let nodes = node
        .select(selector)
        .map_err(|e| RenderError::Html(format!("query selector {selector} failed: {e:?}")))?;
    Ok(nodes.map(|n| n.as_node().clone()).collect())
}

fn set_text(node: &NodeRef, text: &str) {
    let existing: Vec<_> = node.children().collect();
    for child in existing {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}
