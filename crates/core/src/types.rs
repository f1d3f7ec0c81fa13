//! Shared data model for the retrieval pipeline

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Metadata filters applied during retrieval.
///
/// A scalar value means equality; an array value means membership (the
/// passage's value must be one of the listed values). `document_id` is a
/// first-class key matched against the passage's owning document. A
/// `BTreeMap` keeps serialization canonical so filter sets hash stably for
/// cache keys.
pub type SearchFilters = BTreeMap<String, serde_json::Value>;

/// A retrievable passage (chunk) of a source document.
///
/// Passages are created by an external ingester; the core treats them as
/// read-only. The dense embedding lives in the external vector store,
/// indexed by passage id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    /// Globally unique passage id
    pub id: String,
    /// The originating document
    pub document_id: String,
    /// Indexable content
    pub text: String,
    /// Ordinal within the document
    pub chunk_index: usize,
    /// Embedding model identifier, if embedded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    /// Open key-value metadata. Recognized keys: `title`, `url`,
    /// `language`, `author`, `date`, `content_type`, `source`.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Passage {
    /// Create a new passage
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        text: impl Into<String>,
        chunk_index: usize,
    ) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            text: text.into(),
            chunk_index,
            embedding_model: None,
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A scored passage returned by any retriever.
///
/// `score` semantics depend on the producing stage; scores are only
/// directly comparable within one `retrieval_method`. Hybrid fusion
/// normalizes before combining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Passage id
    pub id: String,
    /// Passage text
    pub text: String,
    /// Relevance score
    pub score: f32,
    /// Passage metadata plus runtime annotations (`retrieval_method`,
    /// `original_score`, `reranker`, `boosting`, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    /// Create a new search result
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry (builder form)
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Insert a runtime annotation
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Read a metadata value as a string, if present and a string
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// The owning document id, when the retriever carried it through
    pub fn document_id(&self) -> Option<&str> {
        self.metadata_str("document_id")
    }
}

/// Classified intent of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Bare terms without grammatical structure
    Keyword,
    /// A grammatical question or sentence
    NaturalLanguage,
    /// A mix of keywords and natural language
    Hybrid,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Keyword => "keyword",
            QueryType::NaturalLanguage => "natural_language",
            QueryType::Hybrid => "hybrid",
        }
    }
}

/// Analyzer output: classification, rewrite, and variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// The query as received
    pub original: String,
    /// Classified intent
    pub query_type: QueryType,
    /// Single paraphrase that best preserves intent
    pub rewritten: String,
    /// Alternative phrasings (at most 5, original excluded)
    pub variants: Vec<String>,
    /// Classifier reasoning, when the LLM provided one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl QueryAnalysis {
    /// Heuristic-only analysis: no rewrite, the query is its own variant set.
    pub fn fallback(query: &str, query_type: QueryType) -> Self {
        Self {
            original: query.to_string(),
            query_type,
            rewritten: query.to_string(),
            variants: vec![query.to_string()],
            reasoning: None,
        }
    }

    /// The top variant distinct from the rewritten query, if any
    pub fn top_distinct_variant(&self) -> Option<&str> {
        self.variants
            .iter()
            .map(String::as_str)
            .find(|v| !v.eq_ignore_ascii_case(&self.rewritten))
    }
}

/// First-stage retrieval method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Bm25,
    Vector,
    Hybrid,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Bm25 => "bm25",
            RetrievalMethod::Vector => "vector",
            RetrievalMethod::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for RetrievalMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bm25" => Ok(RetrievalMethod::Bm25),
            "vector" => Ok(RetrievalMethod::Vector),
            "hybrid" => Ok(RetrievalMethod::Hybrid),
            other => Err(crate::Error::Validation(format!(
                "unknown retrieval method '{other}'"
            ))),
        }
    }
}

/// Wall-clock timings captured per request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings {
    /// End-to-end latency in milliseconds
    pub total_ms: u64,
    /// Per-stage latency in milliseconds, keyed by stage name
    #[serde(default)]
    pub per_stage_ms: BTreeMap<String, u64>,
}

impl StageTimings {
    /// Record one stage's elapsed time
    pub fn record(&mut self, stage: &str, elapsed_ms: u64) {
        self.per_stage_ms.insert(stage.to_string(), elapsed_ms);
    }
}

/// Response envelope for the `retrieve` operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalEnvelope {
    /// Final ranked results
    pub results: Vec<SearchResult>,
    /// The first-stage method the selector chose
    pub retrieval_method: String,
    /// Analyzer output for this query
    pub query_analysis: QueryAnalysis,
    /// Request timings
    pub timings: StageTimings,
    /// Whether the response was served from the result cache
    pub cache_hit: bool,
}

/// A chunk selected into a context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Position in the candidate list before optimization
    pub order: usize,
    /// Owning document, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl ContextChunk {
    /// Build from a search result, keeping its original candidate position.
    pub fn from_result(result: &SearchResult, order: usize) -> Self {
        let document_id = result.document_id().map(str::to_string);
        Self {
            id: result.id.clone(),
            text: result.text.clone(),
            score: result.score,
            metadata: result.metadata.clone(),
            order,
            document_id,
        }
    }
}

/// Aggregated information about one source document in a context window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub content_type: String,
    /// Number of selected chunks from this document
    pub chunk_count: usize,
}

/// Optimizer output: an ordered, token-budgeted set of chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    pub chunks: Vec<ContextChunk>,
    pub total_tokens: usize,
    pub total_chars: usize,
    /// Source documents represented in the window, keyed by document id
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContextWindow {
    /// An empty window
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            total_tokens: 0,
            total_chars: 0,
            sources: BTreeMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Concatenated chunk text, one chunk per paragraph
    pub fn text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Citation rendering style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    /// `[n]` markers
    #[default]
    Numbered,
    /// `<sup>n</sup>` markers
    Superscript,
    /// `(Author, Date)` markers
    AuthorDate,
}

/// One citation: a response sentence attributed to a source passage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    /// Citation label, 1-based
    pub id: usize,
    /// The sentence being cited
    pub text: String,
    /// The cited passage id
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Attribution confidence in [0, 1]
    pub relevance: f32,
}

/// One entry in the deduplicated sources list of an attributed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedSource {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Citation labels referencing this source, in emission order
    pub citations: Vec<usize>,
}

/// Attribution enhancer output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedResponse {
    /// The response with citation markers inserted
    pub response: String,
    pub citations: Vec<Attribution>,
    /// Unique sources in order of first citation
    pub sources: Vec<CitedSource>,
    /// Markdown rendering with a `### Sources` footer
    pub markdown: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AttributedResponse {
    /// A response with no computable attributions, returned unchanged.
    pub fn unattributed(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            markdown: response.clone(),
            response,
            citations: Vec::new(),
            sources: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}
