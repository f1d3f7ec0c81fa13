//! Dense retrieval adapter backed by Qdrant
//!
//! Implements [`VectorSearcher`] over a Qdrant collection. The adapter
//! owns the embedding model; callers hand it query text and get scored
//! passages back. Scores are clamped into [0, 1].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, r#match::MatchValue, value::Kind, Condition, FieldCondition,
        Filter, Match, RepeatedStrings, SearchPointsBuilder,
    },
    Qdrant,
};

use ragpipe_config::VectorStoreConfig;
use ragpipe_core::{Embedder, Error, Result, SearchFilters, SearchResult, VectorSearcher};

/// Qdrant-backed vector searcher
pub struct QdrantSearcher {
    client: Qdrant,
    embedder: Arc<dyn Embedder>,
    config: VectorStoreConfig,
}

impl QdrantSearcher {
    /// Connect to Qdrant.
    pub fn new(config: VectorStoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| Error::AdapterUnavailable(format!("qdrant connection: {e}")))?;

        Ok(Self {
            client,
            embedder,
            config,
        })
    }

    /// Map metadata filters onto Qdrant keyword conditions.
    ///
    /// Scalars become exact keyword matches, string arrays become any-of
    /// matches. Conditions with unsupported value shapes are skipped with
    /// a warning.
    fn filters_to_qdrant(filters: &SearchFilters) -> Filter {
        let mut conditions = Vec::new();

        for (key, value) in filters {
            let match_value = match value {
                serde_json::Value::String(s) => Some(MatchValue::Keyword(s.clone())),
                serde_json::Value::Bool(b) => Some(MatchValue::Boolean(*b)),
                serde_json::Value::Number(n) if n.is_i64() => {
                    n.as_i64().map(MatchValue::Integer)
                },
                serde_json::Value::Array(values) => {
                    let strings: Vec<String> = values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    if strings.len() == values.len() {
                        Some(MatchValue::Keywords(RepeatedStrings { strings }))
                    } else {
                        None
                    }
                },
                _ => None,
            };

            match match_value {
                Some(match_value) => conditions.push(Condition {
                    condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                        key: key.clone(),
                        r#match: Some(Match {
                            match_value: Some(match_value),
                        }),
                        ..Default::default()
                    })),
                }),
                None => tracing::warn!(key, "skipping unsupported vector filter condition"),
            }
        }

        Filter {
            must: conditions,
            ..Default::default()
        }
    }
}

#[async_trait]
impl VectorSearcher for QdrantSearcher {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.embedder.embed(query).await?;

        let mut builder =
            SearchPointsBuilder::new(&self.config.collection, embedding, k as u64)
                .with_payload(true);

        if let Some(filters) = filters {
            builder = builder.filter(Self::filters_to_qdrant(filters));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| Error::AdapterUnavailable(format!("qdrant search: {e}")))?;

        let results = response
            .result
            .into_iter()
            .map(|point| {
                let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
                let mut text = String::new();

                for (key, value) in point.payload {
                    match value.kind {
                        Some(Kind::StringValue(s)) if key == "text" => text = s,
                        Some(Kind::StringValue(s)) => {
                            metadata.insert(key, serde_json::Value::String(s));
                        },
                        Some(Kind::IntegerValue(n)) => {
                            metadata.insert(key, serde_json::json!(n));
                        },
                        Some(Kind::DoubleValue(d)) => {
                            metadata.insert(key, serde_json::json!(d));
                        },
                        Some(Kind::BoolValue(b)) => {
                            metadata.insert(key, serde_json::Value::Bool(b));
                        },
                        _ => {},
                    }
                }

                let id = point
                    .id
                    .and_then(|pid| pid.point_id_options)
                    .map(|options| match options {
                        qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u) => u,
                        qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
                    })
                    .unwrap_or_default();

                let mut result = SearchResult::new(id, text, point.score.clamp(0.0, 1.0));
                result.metadata = metadata;
                result.annotate("retrieval_method", "vector");
                result
            })
            .collect();

        Ok(results)
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_filters_become_keyword_conditions() {
        let mut filters = SearchFilters::new();
        filters.insert("language".into(), serde_json::json!("en"));
        filters.insert("year".into(), serde_json::json!(2024));

        let filter = QdrantSearcher::filters_to_qdrant(&filters);
        assert_eq!(filter.must.len(), 2);
    }

    #[test]
    fn test_string_array_becomes_any_of() {
        let mut filters = SearchFilters::new();
        filters.insert("content_type".into(), serde_json::json!(["html", "pdf"]));

        let filter = QdrantSearcher::filters_to_qdrant(&filters);
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn test_unsupported_shapes_are_skipped() {
        let mut filters = SearchFilters::new();
        filters.insert("nested".into(), serde_json::json!({"a": 1}));
        filters.insert("mixed".into(), serde_json::json!(["ok", 3]));

        let filter = QdrantSearcher::filters_to_qdrant(&filters);
        assert!(filter.must.is_empty());
    }
}
