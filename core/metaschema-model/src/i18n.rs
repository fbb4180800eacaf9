use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Localized text keyed by BCP 47 locale tag (e.g., "en", "pt-BR").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct I18nText(BTreeMap<String, String>);

impl I18nText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single-locale text.
    pub fn with(locale: &str, text: &str) -> Self {
        let mut t = Self::new();
        t.set(locale, text);
        t
    }

    pub fn set(&mut self, locale: &str, text: &str) {
        self.0.insert(locale.to_string(), text.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves text for `locale`: exact tag, then its language subtag,
    /// then English, then any available translation.
    pub fn get(&self, locale: &str) -> Option<&str> {
        if let Some(text) = self.0.get(locale) {
            return Some(text);
        }
        if let Some((language, _)) = locale.split_once('-') {
            if let Some(text) = self.0.get(language) {
                return Some(text);
            }
        }
        self.0
            .get("en")
            .or_else(|| self.0.values().next())
            .map(String::as_str)
    }
}
