use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned record identifier.
pub type RecordId = String;

/// A row of the hosted key-value entity used for configuration storage.
///
/// The same envelope text is written redundantly into `value`,
/// `description` and `app_subtitle`; readers take whichever is non-empty.
/// Payload fields are optional because filter results may come back
/// "shallow", without the large text columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub id: RecordId,
    pub key: Option<String>,
    pub config_key: Option<String>,

    // Aliased payload fields
    pub value: Option<String>,
    pub description: Option<String>,
    pub app_subtitle: Option<String>,

    // Cosmetic metadata
    pub app_name: Option<String>,
    pub is_active: Option<bool>,

    // Store bookkeeping, never used for ordering
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigRecord {
    /// First non-empty aliased payload field.
    pub fn payload_text(&self) -> Option<&str> {
        [&self.value, &self.description, &self.app_subtitle]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|text| !text.trim().is_empty())
    }

    /// First aliased payload field that is not empty, whitespace included.
    /// Chunk fragments are arbitrary slices of JSON text and must not be trimmed.
    pub fn fragment_text(&self) -> Option<&str> {
        [&self.value, &self.description, &self.app_subtitle]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|text| !text.is_empty())
    }

    /// Whether any aliased payload field carries content.
    pub fn has_payload(&self) -> bool {
        self.payload_text().is_some()
    }

    /// The logical key, preferring the current field name over the legacy one.
    pub fn logical_key(&self) -> Option<&str> {
        self.key
            .as_deref()
            .filter(|k| !k.is_empty())
            .or(self.config_key.as_deref().filter(|k| !k.is_empty()))
    }

    /// Whether this record is discoverable under `key` via either key field.
    pub fn matches_key(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key) || self.config_key.as_deref() == Some(key)
    }

    /// A copy with the payload fields stripped, as a shallow filter result.
    pub fn shallow(&self) -> Self {
        Self {
            value: None,
            description: None,
            app_subtitle: None,
            ..self.clone()
        }
    }
}

/// Field values sent to `create` or `update`.
///
/// `None` fields are left untouched on update and unset on create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub key: Option<String>,
    pub config_key: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
    pub app_subtitle: Option<String>,
    pub app_name: Option<String>,
    pub is_active: Option<bool>,
}

impl RecordDraft {
    /// Draft carrying `text` in every aliased payload field and `key` in both
    /// key fields.
    pub fn aliased(key: impl Into<String>, text: impl Into<String>) -> Self {
        let key = key.into();
        let text = text.into();
        Self {
            key: Some(key.clone()),
            config_key: Some(key),
            value: Some(text.clone()),
            description: Some(text.clone()),
            app_subtitle: Some(text),
            app_name: None,
            is_active: Some(true),
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Apply this draft onto an existing record, as `update` does.
    pub fn apply_to(&self, record: &mut ConfigRecord) {
        if let Some(k) = &self.key {
            record.key = Some(k.clone());
        }
        if let Some(k) = &self.config_key {
            record.config_key = Some(k.clone());
        }
        if let Some(v) = &self.value {
            record.value = Some(v.clone());
        }
        if let Some(v) = &self.description {
            record.description = Some(v.clone());
        }
        if let Some(v) = &self.app_subtitle {
            record.app_subtitle = Some(v.clone());
        }
        if let Some(v) = &self.app_name {
            record.app_name = Some(v.clone());
        }
        if let Some(v) = self.is_active {
            record.is_active = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Option<&str>, description: Option<&str>, subtitle: Option<&str>) -> ConfigRecord {
        ConfigRecord {
            id: "r1".into(),
            key: Some("cfg".into()),
            config_key: None,
            value: value.map(Into::into),
            description: description.map(Into::into),
            app_subtitle: subtitle.map(Into::into),
            app_name: None,
            is_active: Some(true),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn payload_text_prefers_value_then_aliases() {
        assert_eq!(record(Some("a"), Some("b"), Some("c")).payload_text(), Some("a"));
        assert_eq!(record(Some(""), Some("b"), Some("c")).payload_text(), Some("b"));
        assert_eq!(record(None, Some("  "), Some("c")).payload_text(), Some("c"));
        assert_eq!(record(None, None, None).payload_text(), None);
    }

    #[test]
    fn fragment_text_keeps_whitespace_fragments() {
        let r = record(Some("   "), None, None);
        assert_eq!(r.payload_text(), None);
        assert_eq!(r.fragment_text(), Some("   "));
    }

    #[test]
    fn logical_key_falls_back_to_legacy_field() {
        let mut r = record(None, None, None);
        r.key = None;
        r.config_key = Some("legacy".into());
        assert_eq!(r.logical_key(), Some("legacy"));
        assert!(r.matches_key("legacy"));
        assert!(!r.matches_key("cfg"));
    }

    #[test]
    fn aliased_draft_applies_over_existing_record() {
        let mut r = record(Some("old"), Some("old"), Some("old"));
        RecordDraft::aliased("cfg", "new").apply_to(&mut r);
        assert_eq!(r.value.as_deref(), Some("new"));
        assert_eq!(r.description.as_deref(), Some("new"));
        assert_eq!(r.app_subtitle.as_deref(), Some("new"));
        assert_eq!(r.config_key.as_deref(), Some("cfg"));
    }

    #[test]
    fn shallow_strips_payload_only() {
        let r = record(Some("a"), Some("a"), Some("a")).shallow();
        assert!(!r.has_payload());
        assert_eq!(r.key.as_deref(), Some("cfg"));
    }
}
