use std::collections::HashSet;
use std::sync::{OnceLock, RwLock};
use thiserror::Error;
use tracing::debug;

/// Tag name the lead form answers to.
pub const LEAD_FORM_ELEMENT: &str = "lead-form";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid custom element name: {0}")]
    InvalidName(String),
}

/// Names of custom elements this process knows how to upgrade.
#[derive(Debug, Default)]
pub struct ElementRegistry {
    defined: RwLock<HashSet<String>>,
}

impl ElementRegistry {
    pub fn global() -> &'static ElementRegistry {
        static REGISTRY: OnceLock<ElementRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ElementRegistry::default)
    }

    /// Registers `name`. Returns `Ok(false)` when it was already defined, so
    /// loading the module twice is harmless.
    pub fn define(&self, name: &str) -> Result<bool, RegistryError> {
        if !is_valid_element_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        let mut defined = self
            .defined
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let added = defined.insert(name.to_string());
        if !added {
            debug!(%name, "element already defined");
        }
        Ok(added)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defined
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(name)
    }
}

/// Defines `lead-form` on the process-wide registry.
pub fn register_lead_form() -> bool {
    ElementRegistry::global()
        .define(LEAD_FORM_ELEMENT)
        .unwrap_or(false)
}

/// Lowercase ASCII, starts with a letter, contains a hyphen.
fn is_valid_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && name.contains('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'))
}
