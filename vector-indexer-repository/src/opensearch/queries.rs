//! OpenSearch query and document builders.

use serde_json::{json, Map, Value};

use crate::opensearch::index_config::{EMBEDDING_FIELD, RESTRICT_ALLOW_FIELD, RESTRICT_DENY_FIELD};
use crate::types::{NamespaceFilter, NeighborQuery};
use vector_indexer_shared::{Datapoint, Restrict};

/// Keyword encoding of a restrict token.
pub fn restrict_token(namespace: &str, token: &str) -> String {
    format!("{}={}", namespace, token)
}

fn tokens<'a>(restricts: &'a [Restrict], pick: fn(&'a Restrict) -> &'a [String]) -> Vec<String> {
    restricts
        .iter()
        .flat_map(|r| pick(r).iter().map(move |t| restrict_token(&r.namespace, t)))
        .collect()
}

/// Build the stored document for a datapoint.
pub fn build_document(datapoint: &Datapoint) -> Value {
    let mut doc = Map::new();
    doc.insert("datapoint_id".to_string(), json!(datapoint.id));
    doc.insert(EMBEDDING_FIELD.to_string(), json!(datapoint.embedding));
    doc.insert(
        RESTRICT_ALLOW_FIELD.to_string(),
        json!(tokens(&datapoint.restricts, |r| r.allow.as_slice())),
    );
    doc.insert(
        RESTRICT_DENY_FIELD.to_string(),
        json!(tokens(&datapoint.restricts, |r| r.deny.as_slice())),
    );
    if let Some(ref namespace) = datapoint.namespace {
        doc.insert("namespace".to_string(), json!(namespace));
    }
    if let Some(ref tag) = datapoint.crowding_tag {
        doc.insert("crowding_tag".to_string(), json!(tag));
    }
    if !datapoint.numeric_restricts.is_empty() {
        doc.insert("numeric_restricts".to_string(), json!(datapoint.numeric_restricts));
    }
    if let Some(ref sparse) = datapoint.sparse_embedding {
        doc.insert("sparse_embedding".to_string(), json!(sparse));
    }
    if let Some(ref metadata) = datapoint.embedding_metadata {
        doc.insert("metadata".to_string(), Value::Object(metadata.clone()));
    }
    Value::Object(doc)
}

/// Translate namespace filters into a bool filter clause.
///
/// Returns `None` when no filter applies.
fn build_filter(filters: &[NamespaceFilter]) -> Option<Value> {
    let mut must = Vec::new();
    let mut must_not = Vec::new();

    for filter in filters {
        if !filter.allow.is_empty() {
            let allowed: Vec<String> = filter
                .allow
                .iter()
                .map(|t| restrict_token(&filter.namespace, t))
                .collect();
            must.push(json!({ "terms": { RESTRICT_ALLOW_FIELD: allowed } }));
            // A datapoint denying a queried token is excluded.
            must_not.push(json!({ "terms": { RESTRICT_DENY_FIELD: allowed } }));
        }
        if !filter.deny.is_empty() {
            let denied: Vec<String> = filter
                .deny
                .iter()
                .map(|t| restrict_token(&filter.namespace, t))
                .collect();
            must_not.push(json!({ "terms": { RESTRICT_ALLOW_FIELD: denied } }));
        }
    }

    if must.is_empty() && must_not.is_empty() {
        return None;
    }
    Some(json!({ "bool": { "must": must, "must_not": must_not } }))
}

/// Build a knn search request.
pub fn build_knn_query(query: &NeighborQuery) -> Value {
    let mut knn = json!({
        "vector": query.vector,
        "k": query.top_k
    });
    if let Some(filter) = build_filter(&query.filters) {
        knn["filter"] = filter;
    }

    json!({
        "size": query.top_k,
        "_source": ["metadata"],
        "query": {
            "knn": {
                EMBEDDING_FIELD: knn
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_document_flattens_restricts() {
        let datapoint = Datapoint {
            embedding: vec![0.6, 0.8],
            restricts: vec![Restrict {
                namespace: "color".to_string(),
                allow: vec!["red".to_string()],
                deny: vec!["blue".to_string()],
            }],
            ..Datapoint::id_only("1")
        };
        let doc = build_document(&datapoint);

        assert_eq!(doc[RESTRICT_ALLOW_FIELD], json!(["color=red"]));
        assert_eq!(doc[RESTRICT_DENY_FIELD], json!(["color=blue"]));
        assert!(doc.get("metadata").is_none());
    }

    #[test]
    fn test_knn_query_without_filters() {
        let query = NeighborQuery {
            vector: vec![1.0, 0.0],
            sparse: None,
            top_k: 5,
            filters: Vec::new(),
        };
        let body = build_knn_query(&query);

        assert_eq!(body["size"], 5);
        assert_eq!(body["query"]["knn"][EMBEDDING_FIELD]["k"], 5);
        assert!(body["query"]["knn"][EMBEDDING_FIELD].get("filter").is_none());
    }

    #[test]
    fn test_knn_query_with_filters() {
        let query = NeighborQuery {
            vector: vec![1.0, 0.0],
            sparse: None,
            top_k: 3,
            filters: vec![NamespaceFilter {
                namespace: "level".to_string(),
                allow: vec!["Beginner".to_string()],
                deny: vec!["Archived".to_string()],
            }],
        };
        let filter = &build_knn_query(&query)["query"]["knn"][EMBEDDING_FIELD]["filter"];

        assert_eq!(
            filter["bool"]["must"][0]["terms"][RESTRICT_ALLOW_FIELD],
            json!(["level=Beginner"])
        );
        assert_eq!(filter["bool"]["must_not"].as_array().unwrap().len(), 2);
    }
}
