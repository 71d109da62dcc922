//! Item and datapoint types.
//!
//! An [`Item`] is the canonical record produced by validation. Once embedded
//! it becomes a [`Datapoint`], the newline-delimited JSON shape written to
//! shard files and sent to the vector index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::vector::SparseVector;

/// A raw row as yielded by a tabular source.
pub type RawRecord = Map<String, Value>;

/// Categorical restrict used for filtered search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrict {
    /// Restrict namespace (usually the source field name).
    pub namespace: String,
    /// Tokens the datapoint belongs to.
    #[serde(default, alias = "allow_list", skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    /// Tokens the datapoint is excluded from.
    #[serde(default, alias = "deny_list", skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

impl Restrict {
    /// Create an allow-only restrict.
    pub fn allow(namespace: impl Into<String>, allow: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            allow,
            deny: Vec::new(),
        }
    }
}

/// Value of a numeric restrict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericValue {
    /// Integer value.
    ValueInt(i64),
    /// Floating point value.
    ValueFloat(f64),
}

/// Numeric restrict used for range-filtered search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRestrict {
    /// Restrict namespace.
    pub namespace: String,
    /// The numeric value.
    #[serde(flatten)]
    pub value: NumericValue,
}

/// Canonical, validated record awaiting embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable identifier; the idempotency key for upsert and delete.
    pub id: String,
    /// Index namespace the item belongs to, if any.
    pub namespace: Option<String>,
    /// Normalized text submitted to the embedding model.
    pub text: String,
    /// Opaque metadata returned with search results.
    pub metadata: Map<String, Value>,
    /// Categorical restricts.
    pub restricts: Vec<Restrict>,
    /// Numeric restricts.
    pub numeric_restricts: Vec<NumericRestrict>,
    /// Optional crowding tag.
    pub crowding_tag: Option<String>,
}

impl Item {
    /// Create an item with only an identifier and text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: None,
            text: text.into(),
            metadata: Map::new(),
            restricts: Vec::new(),
            numeric_restricts: Vec::new(),
            crowding_tag: None,
        }
    }

    /// Attach vectors, producing the ingestible datapoint.
    pub fn into_datapoint(self, embedding: Vec<f32>, sparse: Option<SparseVector>) -> Datapoint {
        Datapoint {
            id: self.id,
            namespace: self.namespace,
            embedding,
            sparse_embedding: sparse,
            restricts: self.restricts,
            numeric_restricts: self.numeric_restricts,
            embedding_metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(self.metadata)
            },
            crowding_tag: self.crowding_tag,
        }
    }
}

/// Embedded record in the index ingestion format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Stable identifier.
    pub id: String,
    /// Index namespace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Dense embedding. Empty for delete-only datapoints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Sparse embedding for hybrid search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_embedding: Option<SparseVector>,
    /// Categorical restricts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restricts: Vec<Restrict>,
    /// Numeric restricts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric_restricts: Vec<NumericRestrict>,
    /// Metadata returned with search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_metadata: Option<Map<String, Value>>,
    /// Optional crowding tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crowding_tag: Option<String>,
}

impl Datapoint {
    /// A datapoint carrying only an identifier, used for deletes.
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: None,
            embedding: Vec::new(),
            sparse_embedding: None,
            restricts: Vec::new(),
            numeric_restricts: Vec::new(),
            embedding_metadata: None,
            crowding_tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datapoint_wire_format() {
        let mut item = Item::new("42", "hello");
        item.metadata.insert("title".to_string(), json!("Hello"));
        item.restricts.push(Restrict::allow("level", vec!["Beginner".to_string()]));
        item.numeric_restricts.push(NumericRestrict {
            namespace: "score".to_string(),
            value: NumericValue::ValueFloat(1.5),
        });

        let datapoint = item.into_datapoint(vec![0.6, 0.8], None);
        let value = serde_json::to_value(&datapoint).unwrap();

        assert_eq!(
            value,
            json!({
                "id": "42",
                "embedding": [0.6f32, 0.8f32],
                "restricts": [{"namespace": "level", "allow": ["Beginner"]}],
                "numeric_restricts": [{"namespace": "score", "value_float": 1.5}],
                "embedding_metadata": {"title": "Hello"}
            })
        );
    }

    #[test]
    fn test_restrict_accepts_list_aliases() {
        let restrict: Restrict =
            serde_json::from_value(json!({"namespace": "color", "allow_list": ["red"], "deny_list": ["blue"]}))
                .unwrap();
        assert_eq!(restrict.allow, vec!["red".to_string()]);
        assert_eq!(restrict.deny, vec!["blue".to_string()]);
    }

    #[test]
    fn test_numeric_restrict_int() {
        let restrict: NumericRestrict =
            serde_json::from_value(json!({"namespace": "created_at", "value_int": 1700000000})).unwrap();
        assert_eq!(restrict.value, NumericValue::ValueInt(1_700_000_000));
    }

    #[test]
    fn test_id_only_serializes_minimal() {
        let value = serde_json::to_value(Datapoint::id_only("7")).unwrap();
        assert_eq!(value, json!({"id": "7"}));
    }
}
