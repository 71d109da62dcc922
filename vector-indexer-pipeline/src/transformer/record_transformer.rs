//! Record transformer implementation.
//!
//! Turns raw rows into [`Item`]s, and raw datapoint JSON into [`Datapoint`]s.

use serde_json::{Map, Value};
use tracing::debug;

use super::fields::{numeric_value, restrict_tokens, scalar_text};
use vector_indexer_shared::{
    Datapoint, Item, NumericRestrict, RawRecord, RejectReason, Restrict,
};

/// Configuration for the record transformer.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Field holding the item identifier.
    pub id_field: String,
    /// Fields concatenated (newline separated) into the embedded text.
    pub text_fields: Vec<String>,
    /// Fields copied into the item metadata.
    pub metadata_fields: Vec<String>,
    /// Fields turned into categorical restricts.
    pub restricts_fields: Vec<String>,
    /// Fields turned into numeric restricts.
    pub numeric_restricts_fields: Vec<String>,
    /// Numeric restrict fields that may hold timestamps.
    pub timestamp_fields: Vec<String>,
    /// Index namespace stamped on every item.
    pub namespace: Option<String>,
    /// Field holding the crowding tag.
    pub crowding_tag_field: Option<String>,
    /// Largest accepted serialized row, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            text_fields: vec!["title".to_string()],
            metadata_fields: vec!["id".to_string(), "title".to_string()],
            restricts_fields: Vec::new(),
            numeric_restricts_fields: Vec::new(),
            timestamp_fields: vec!["created_at".to_string(), "updated_at".to_string()],
            namespace: None,
            crowding_tag_field: None,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

/// Transformer that validates and normalizes raw records.
///
/// Every method is a pure function of its input and the configuration.
pub struct RecordTransformer {
    config: TransformerConfig,
}

impl RecordTransformer {
    /// Create a transformer with default configuration.
    pub fn new() -> Self {
        Self::with_config(TransformerConfig::default())
    }

    /// Create a transformer with custom configuration.
    pub fn with_config(config: TransformerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Transform a raw row into an item.
    ///
    /// # Arguments
    ///
    /// * `raw` - The row as read from the source
    ///
    /// # Returns
    ///
    /// The canonical item, or the reason the row cannot be indexed.
    pub fn transform(&self, raw: &RawRecord) -> Result<Item, RejectReason> {
        self.check_size(raw)?;
        let id = self.identify(raw)?;

        let mut parts = Vec::new();
        for field in &self.config.text_fields {
            if let Some(value) = raw.get(field) {
                parts.extend(scalar_text(field, value)?);
            }
        }
        let text = parts.join("\n");

        let metadata: Map<String, Value> = self
            .config
            .metadata_fields
            .iter()
            .filter_map(|field| match raw.get(field) {
                Some(Value::Null) | None => None,
                Some(value) => Some((field.clone(), value.clone())),
            })
            .collect();

        let has_metadata = metadata.keys().any(|field| *field != self.config.id_field);
        if text.is_empty() && !has_metadata {
            return Err(RejectReason::EmptyContent);
        }

        let mut restricts = Vec::new();
        for field in &self.config.restricts_fields {
            if let Some(value) = raw.get(field) {
                let tokens = restrict_tokens(field, value)?;
                if !tokens.is_empty() {
                    restricts.push(Restrict::allow(field.clone(), tokens));
                }
            }
        }

        let mut numeric_restricts = Vec::new();
        for field in &self.config.numeric_restricts_fields {
            let timestamp = self.config.timestamp_fields.contains(field);
            if let Some(value) = raw.get(field) {
                if let Some(value) = numeric_value(field, value, timestamp)? {
                    numeric_restricts.push(NumericRestrict {
                        namespace: field.clone(),
                        value,
                    });
                }
            }
        }

        let crowding_tag = match &self.config.crowding_tag_field {
            Some(field) => match raw.get(field) {
                Some(value) => scalar_text(field, value)?,
                None => None,
            },
            None => None,
        };

        Ok(Item {
            id,
            namespace: self.config.namespace.clone(),
            // Metadata-only rows still need non-empty model input.
            text: if text.is_empty() { " ".to_string() } else { text },
            metadata,
            restricts,
            numeric_restricts,
            crowding_tag,
        })
    }

    /// Extract the identifier of a row.
    pub fn identify(&self, raw: &RawRecord) -> Result<String, RejectReason> {
        match raw.get(&self.config.id_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            None | Some(Value::Null) | Some(Value::String(_)) => Err(RejectReason::MissingIdentifier),
            Some(_) => Err(RejectReason::IncompatibleType {
                field: self.config.id_field.clone(),
                expected: "a string or number".to_string(),
            }),
        }
    }

    /// Validate a pre-embedded datapoint.
    ///
    /// On failure returns the identifier, when one could be read, with the reason.
    pub fn validate_datapoint(&self, value: Value) -> Result<Datapoint, (Option<String>, RejectReason)> {
        let id = match value.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let datapoint: Datapoint = serde_json::from_value(value).map_err(|e| {
            (
                id.clone(),
                RejectReason::Malformed {
                    message: e.to_string(),
                },
            )
        })?;

        if datapoint.id.trim().is_empty() {
            return Err((None, RejectReason::MissingIdentifier));
        }
        Ok(datapoint)
    }

    fn check_size(&self, raw: &RawRecord) -> Result<(), RejectReason> {
        let size = serde_json::to_vec(raw).map(|bytes| bytes.len()).unwrap_or(0);
        if size > self.config.max_payload_bytes {
            debug!(size, limit = self.config.max_payload_bytes, "Row exceeds payload limit");
            return Err(RejectReason::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }
        Ok(())
    }
}

impl Default for RecordTransformer {
    fn default() -> Self {
        Self::new()
    }
}
