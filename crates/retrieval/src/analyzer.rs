//! Query analysis and expansion
//!
//! Classifies query intent and produces a rewrite plus alternative
//! phrasings. The language model adapter supplies the richer
//! classification; when it is absent or failing, a structural heuristic
//! answers and the query stands in for its own variants. Analysis never
//! fails.

use std::sync::Arc;

use ragpipe_core::{LanguageModel, QueryAnalysis, QueryType};
use ragpipe_llm::prompt;

use crate::expansion::SynonymExpander;
use crate::metrics::RetrievalMetrics;

/// Interrogative words that mark a natural-language query.
fn interrogatives(language: &str) -> &'static [&'static str] {
    match language {
        "tr" => &[
            "ne", "neden", "nasıl", "nerede", "nereye", "nerde", "kim", "kime", "hangi", "kaç",
            "niçin", "niye", "mi", "mı", "mu", "mü",
        ],
        _ => &[
            "what", "who", "where", "when", "why", "how", "is", "are", "can", "could", "would",
            "should", "do", "does", "did", "which",
        ],
    }
}

/// Analyzer configuration
#[derive(Debug, Clone)]
pub struct QueryAnalyzerConfig {
    /// Maximum variant phrasings kept
    pub max_variants: usize,
    /// Temperature for classification calls
    pub classify_temperature: f32,
    /// Temperature for variant generation
    pub expand_temperature: f32,
    /// Consult the LLM for expansion at all
    pub expansion_enabled: bool,
}

impl Default for QueryAnalyzerConfig {
    fn default() -> Self {
        Self {
            max_variants: 5,
            classify_temperature: 0.1,
            expand_temperature: 0.7,
            expansion_enabled: true,
        }
    }
}

/// Query analyzer / expander
pub struct QueryAnalyzer {
    llm: Option<Arc<dyn LanguageModel>>,
    expander: Option<Arc<SynonymExpander>>,
    config: QueryAnalyzerConfig,
    metrics: Option<Arc<RetrievalMetrics>>,
}

impl QueryAnalyzer {
    /// Heuristic-only analyzer
    pub fn new(config: QueryAnalyzerConfig) -> Self {
        Self {
            llm: None,
            expander: None,
            config,
            metrics: None,
        }
    }

    /// Analyzer backed by a language model
    pub fn with_llm(config: QueryAnalyzerConfig, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm: Some(llm),
            expander: None,
            config,
            metrics: None,
        }
    }

    /// Attach a dictionary expander for LLM-free variants
    pub fn with_expander(mut self, expander: Arc<SynonymExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Attach the metrics recorder
    pub fn with_metrics(mut self, metrics: Arc<RetrievalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Structural classification used when the LLM is unavailable.
    ///
    /// Ends with `?` -> natural language; starts with an interrogative
    /// word for the language -> natural language; four or more tokens with
    /// mixed case -> natural language; otherwise keyword.
    pub fn heuristic_type(query: &str, language: &str) -> QueryType {
        let trimmed = query.trim();
        if trimmed.ends_with('?') {
            return QueryType::NaturalLanguage;
        }

        let words: Vec<&str> = trimmed.split_whitespace().collect();
        if let Some(first) = words.first() {
            let first_lower = first.to_lowercase();
            if interrogatives(language).contains(&first_lower.as_str()) {
                return QueryType::NaturalLanguage;
            }
        }

        if words.len() >= 4
            && words
                .iter()
                .skip(1)
                .any(|w| w.chars().next().is_some_and(char::is_uppercase))
        {
            return QueryType::NaturalLanguage;
        }

        QueryType::Keyword
    }

    /// Analyze a query: classify intent, rewrite, and produce variants.
    pub async fn analyze(&self, query: &str, language: &str) -> QueryAnalysis {
        let heuristic = Self::heuristic_type(query, language);

        let Some(ref llm) = self.llm else {
            let mut analysis = QueryAnalysis::fallback(query, heuristic);
            analysis.variants = self.local_variants(query);
            return analysis;
        };

        let (query_type, reasoning) = match self.classify(llm.as_ref(), query).await {
            Some((query_type, reasoning)) => (query_type, reasoning),
            None => {
                tracing::debug!(query, "LLM classification failed, using heuristic");
                self.record_fallback();
                (heuristic, None)
            },
        };

        if !self.config.expansion_enabled {
            let mut analysis = QueryAnalysis::fallback(query, query_type);
            analysis.variants = self.local_variants(query);
            analysis.reasoning = reasoning;
            return analysis;
        }

        let (rewritten, variants) = match self.expand(llm.as_ref(), query, query_type, language).await
        {
            Some(expansion) => expansion,
            None => {
                tracing::debug!(query, "LLM expansion failed, using local variants");
                self.record_fallback();
                (query.to_string(), self.local_variants(query))
            },
        };

        QueryAnalysis {
            original: query.to_string(),
            query_type,
            rewritten,
            variants,
            reasoning,
        }
    }

    /// Variants from the synonym dictionaries, with the query itself as
    /// the last resort.
    fn local_variants(&self, query: &str) -> Vec<String> {
        let mut variants = self
            .expander
            .as_ref()
            .map(|expander| expander.variants(query))
            .unwrap_or_default();
        variants.truncate(self.config.max_variants);
        if variants.is_empty() {
            variants.push(query.to_string());
        }
        variants
    }

    async fn classify(
        &self,
        llm: &dyn LanguageModel,
        query: &str,
    ) -> Option<(QueryType, Option<String>)> {
        let response = llm
            .generate_json(&prompt::query_analysis(query), self.config.classify_temperature)
            .await
            .map_err(|e| tracing::warn!(error = %e, "query classification call failed"))
            .ok()?;

        let query_type = match response.get("query_type").and_then(|v| v.as_str()) {
            Some("keyword") => QueryType::Keyword,
            Some("natural_language") => QueryType::NaturalLanguage,
            Some("hybrid") => QueryType::Hybrid,
            other => {
                tracing::warn!(?other, "unrecognized query_type from LLM");
                return None;
            },
        };

        let reasoning = response
            .get("reasoning")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Some((query_type, reasoning))
    }

    async fn expand(
        &self,
        llm: &dyn LanguageModel,
        query: &str,
        query_type: QueryType,
        language: &str,
    ) -> Option<(String, Vec<String>)> {
        let response = llm
            .generate_json(
                &prompt::query_expansion(query, query_type, language),
                self.config.expand_temperature,
            )
            .await
            .map_err(|e| tracing::warn!(error = %e, "query expansion call failed"))
            .ok()?;

        let rewritten = response
            .get("rewritten_query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(query)
            .to_string();

        let raw_variants = response
            .get("expanded_queries")
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Some((rewritten, self.dedup_variants(query, raw_variants)))
    }

    /// Drop variants equal to the original query, deduplicate
    /// case-insensitively, and cap the list.
    fn dedup_variants(&self, original: &str, variants: Vec<String>) -> Vec<String> {
        let original_lower = original.to_lowercase();
        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::new();

        for variant in variants {
            let lower = variant.to_lowercase();
            if lower == original_lower || !seen.insert(lower) {
                continue;
            }
            unique.push(variant);
            if unique.len() >= self.config.max_variants {
                break;
            }
        }

        if unique.is_empty() {
            unique.push(original.to_string());
        }
        unique
    }

    fn record_fallback(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_analyzer_fallback();
        }
    }
}
