use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

pub const BASE_LOCALE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelKey {
    Title,
    Name,
    Email,
    Phone,
    Message,
    Submit,
    ErrorRequired,
}

impl LabelKey {
    pub const ALL: [LabelKey; 7] = [
        LabelKey::Title,
        LabelKey::Name,
        LabelKey::Email,
        LabelKey::Phone,
        LabelKey::Message,
        LabelKey::Submit,
        LabelKey::ErrorRequired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LabelKey::Title => "title",
            LabelKey::Name => "name",
            LabelKey::Email => "email",
            LabelKey::Phone => "phone",
            LabelKey::Message => "message",
            LabelKey::Submit => "submit",
            LabelKey::ErrorRequired => "errorRequired",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSet {
    pub title: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: String,
    pub submit: String,
    pub error_required: String,
}

impl LabelSet {
    pub fn english() -> Self {
        Self {
            title: "Get in Touch".into(),
            name: "Name".into(),
            email: "Email".into(),
            phone: "Phone".into(),
            message: "Message".into(),
            submit: "Submit".into(),
            error_required: "This field is required.".into(),
        }
    }

    pub fn spanish() -> Self {
        Self {
            title: "Contáctanos".into(),
            name: "Nombre".into(),
            email: "Correo electrónico".into(),
            phone: "Teléfono".into(),
            message: "Mensaje".into(),
            submit: "Enviar".into(),
            error_required: "Este campo es obligatorio.".into(),
        }
    }

    pub fn get(&self, key: LabelKey) -> &str {
        match key {
            LabelKey::Title => &self.title,
            LabelKey::Name => &self.name,
            LabelKey::Email => &self.email,
            LabelKey::Phone => &self.phone,
            LabelKey::Message => &self.message,
            LabelKey::Submit => &self.submit,
            LabelKey::ErrorRequired => &self.error_required,
        }
    }

    pub fn set(&mut self, key: LabelKey, value: String) {
        let slot = match key {
            LabelKey::Title => &mut self.title,
            LabelKey::Name => &mut self.name,
            LabelKey::Email => &mut self.email,
            LabelKey::Phone => &mut self.phone,
            LabelKey::Message => &mut self.message,
            LabelKey::Submit => &mut self.submit,
            LabelKey::ErrorRequired => &mut self.error_required,
        };
        *slot = value;
    }

    pub fn with_overrides(&self, overrides: &LabelOverrides) -> Self {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.set(key, value.to_string());
        }
        merged
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelOverrides(HashMap<LabelKey, String>);

impl LabelOverrides {
    /// Parses the `custom-labels` attribute. Malformed JSON yields an empty
    /// set; non-string values and unknown keys are skipped.
    pub fn from_json(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::default();
        }
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "custom-labels is not valid JSON; using no overrides");
                return Self::default();
            }
        };
        let Some(object) = value.as_object() else {
            warn!("custom-labels is not a JSON object; using no overrides");
            return Self::default();
        };
        let mut overrides = HashMap::new();
        for (key, value) in object {
            match (LabelKey::parse(key), value.as_str()) {
                (Some(label), Some(text)) => {
                    overrides.insert(label, text.to_string());
                }
                (None, _) => debug!(%key, "ignoring unknown label override"),
                (Some(_), None) => debug!(%key, "ignoring non-string label override"),
            }
        }
        Self(overrides)
    }

    pub fn insert(&mut self, key: LabelKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (LabelKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialLabelSet {
    title: Option<String>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    message: Option<String>,
    submit: Option<String>,
    error_required: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalesFile {
    #[serde(default)]
    locales: HashMap<String, PartialLabelSet>,
}

/// Locale → label set mapping. Starts with the built-in `en` and `es` sets.
#[derive(Debug, Clone)]
pub struct LabelCatalog {
    sets: HashMap<String, LabelSet>,
}

impl Default for LabelCatalog {
    fn default() -> Self {
        let mut sets = HashMap::new();
        sets.insert("en".to_string(), LabelSet::english());
        sets.insert("es".to_string(), LabelSet::spanish());
        Self { sets }
    }
}

impl LabelCatalog {
    pub fn insert(&mut self, locale: &str, labels: LabelSet) {
        self.sets.insert(locale.to_ascii_lowercase(), labels);
    }

    pub fn base(&self) -> LabelSet {
        self.sets
            .get(BASE_LOCALE)
            .cloned()
            .unwrap_or_else(LabelSet::english)
    }

    /// Looks up a language code: exact match, then primary subtag, then the
    /// base set.
    pub fn lookup(&self, lang: &str) -> LabelSet {
        let lang = lang.trim().to_ascii_lowercase();
        if let Some(set) = self.sets.get(&lang) {
            return set.clone();
        }
        let primary = lang.split(['-', '_']).next().unwrap_or_default();
        if let Some(set) = self.sets.get(primary) {
            return set.clone();
        }
        debug!(%lang, "no label set for language; using base locale");
        self.base()
    }

    pub fn resolve(&self, lang: &str, overrides: &LabelOverrides) -> LabelSet {
        self.lookup(lang).with_overrides(overrides)
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(|k| k.as_str())
    }

    /// Merges `[locales.<code>]` tables from a TOML string. Keys a table
    /// omits fall back to the base set.
    pub fn merge_toml(&mut self, raw: &str) -> anyhow::Result<()> {
        let file: LocalesFile = toml::from_str(raw).context("failed to parse locales file")?;
        let base = self.base();
        for (locale, partial) in file.locales {
            let set = LabelSet {
                title: partial.title.unwrap_or_else(|| base.title.clone()),
                name: partial.name.unwrap_or_else(|| base.name.clone()),
                email: partial.email.unwrap_or_else(|| base.email.clone()),
                phone: partial.phone.unwrap_or_else(|| base.phone.clone()),
                message: partial.message.unwrap_or_else(|| base.message.clone()),
                submit: partial.submit.unwrap_or_else(|| base.submit.clone()),
                error_required: partial
                    .error_required
                    .unwrap_or_else(|| base.error_required.clone()),
            };
            self.insert(&locale, set);
        }
        Ok(())
    }

    pub fn load_toml_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading locales file {}", path.display()))?;
        self.merge_toml(&raw)
    }
}
