//! Response attribution
//!
//! Maps sentences of a generated response back to the source passages
//! that support them and renders citations. Auto-detect mode asks the
//! language model for sentence/source pairs; explicit mode trusts `[n]`
//! markers already present in the response (1-based into the sources
//! list). If attribution cannot be computed the response is returned
//! unchanged with an empty citation list.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use ragpipe_core::{
    AttributedResponse, Attribution, CitationStyle, CitedSource, LanguageModel, SearchResult,
};
use ragpipe_llm::prompt;

use crate::text::truncate_chars;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

/// Attribution configuration
#[derive(Debug, Clone)]
pub struct AttributionConfig {
    /// Citation rendering style
    pub style: CitationStyle,
    /// Include source URLs in the markdown footer
    pub include_urls: bool,
    /// Render URLs as markdown links
    pub link_citations: bool,
    /// Sources passed to the LLM for auto-detection
    pub max_llm_sources: usize,
    /// Attributions below this confidence are dropped
    pub min_confidence: f32,
    /// Temperature for the detection call
    pub detect_temperature: f32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            style: CitationStyle::Numbered,
            include_urls: true,
            link_citations: true,
            max_llm_sources: 5,
            min_confidence: 0.5,
            detect_temperature: 0.1,
        }
    }
}

/// One detected (not yet numbered) attribution
struct RawAttribution {
    text: String,
    source_id: String,
    confidence: f32,
}

/// Attribution enhancer
pub struct AttributionEnhancer {
    llm: Option<Arc<dyn LanguageModel>>,
    config: AttributionConfig,
}

impl AttributionEnhancer {
    pub fn new(config: AttributionConfig) -> Self {
        Self { llm: None, config }
    }

    pub fn with_llm(config: AttributionConfig, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm: Some(llm),
            config,
        }
    }

    /// Enhance a response with citations against its source passages.
    pub async fn enhance(
        &self,
        response: &str,
        sources: &[SearchResult],
        query: Option<&str>,
        style: Option<CitationStyle>,
        auto_detect: bool,
    ) -> AttributedResponse {
        if sources.is_empty() {
            return AttributedResponse::unattributed(response);
        }

        let style = style.unwrap_or(self.config.style);

        let (raw, markers_present) = if auto_detect && self.llm.is_some() {
            (self.detect(response, sources, query).await, false)
        } else {
            (extract_explicit(response, sources), true)
        };

        let (annotated, citations) = self.number_citations(response, raw, sources, style, markers_present);

        if citations.is_empty() {
            return AttributedResponse::unattributed(response);
        }

        let cited_sources = build_source_index(&citations, sources);
        let markdown = render_markdown(
            &annotated,
            &cited_sources,
            self.config.include_urls,
            self.config.link_citations,
        );

        let mut result = AttributedResponse {
            response: annotated,
            citations,
            sources: cited_sources,
            markdown,
            metadata: HashMap::new(),
        };
        result.metadata.insert(
            "citation_style".into(),
            serde_json::json!(match style {
                CitationStyle::Numbered => "numbered",
                CitationStyle::Superscript => "superscript",
                CitationStyle::AuthorDate => "author_date",
            }),
        );
        result
            .metadata
            .insert("auto_detect".into(), serde_json::json!(auto_detect));
        result
    }

    /// Ask the language model which response sentences come from which
    /// sources. Failures produce no attributions.
    async fn detect(
        &self,
        response: &str,
        sources: &[SearchResult],
        query: Option<&str>,
    ) -> Vec<RawAttribution> {
        let Some(ref llm) = self.llm else {
            return Vec::new();
        };

        let snippet_block = sources
            .iter()
            .take(self.config.max_llm_sources)
            .enumerate()
            .map(|(i, source)| {
                let title = source
                    .metadata_str("title")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Source {}", i + 1));
                format!(
                    "Source {} (ID: {}): {}\n{}...",
                    i + 1,
                    source.id,
                    title,
                    truncate_chars(&source.text, 300)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let detection_prompt = prompt::attribution_detection(
            query.unwrap_or("unknown query"),
            response,
            &snippet_block,
        );

        let parsed = match llm
            .generate_json(&detection_prompt, self.config.detect_temperature)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "attribution detection failed");
                return Vec::new();
            },
        };

        let Some(entries) = parsed.as_array() else {
            tracing::warn!("attribution detection returned a non-array value");
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let text = entry.get("text")?.as_str()?.trim().to_string();
                let source_id = entry.get("source_id")?.as_str()?.to_string();
                let confidence = entry.get("confidence")?.as_f64()? as f32;
                if text.is_empty() {
                    return None;
                }
                Some(RawAttribution {
                    text,
                    source_id,
                    confidence,
                })
            })
            .collect()
    }

    /// Assign consecutive 1-based citation ids and, unless markers are
    /// already present, insert style-appropriate markers after the
    /// attributed text.
    fn number_citations(
        &self,
        response: &str,
        raw: Vec<RawAttribution>,
        sources: &[SearchResult],
        style: CitationStyle,
        markers_present: bool,
    ) -> (String, Vec<Attribution>) {
        let source_by_id: HashMap<&str, &SearchResult> =
            sources.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut annotated = response.to_string();
        let mut citations = Vec::new();

        for attr in raw {
            if attr.confidence < self.config.min_confidence {
                continue;
            }
            let Some(source) = source_by_id.get(attr.source_id.as_str()) else {
                tracing::debug!(source_id = %attr.source_id, "attribution to unknown source dropped");
                continue;
            };

            let id = citations.len() + 1;
            citations.push(Attribution {
                id,
                text: attr.text.clone(),
                source_id: attr.source_id.clone(),
                source_title: source.metadata_str("title").map(str::to_string),
                source_url: source.metadata_str("url").map(str::to_string),
                relevance: attr.confidence,
            });

            if markers_present {
                continue;
            }

            let marker = match style {
                CitationStyle::Numbered => format!("[{id}]"),
                CitationStyle::Superscript => format!("<sup>{id}</sup>"),
                CitationStyle::AuthorDate => {
                    let author = source.metadata_str("author").unwrap_or("Source");
                    let date = source.metadata_str("date").unwrap_or("n.d.");
                    format!("({author}, {date})")
                },
            };

            if annotated.contains(&attr.text) && !annotated.contains(&marker) {
                annotated = annotated.replacen(&attr.text, &format!("{}{marker}", attr.text), 1);
            }
        }

        (annotated, citations)
    }
}

/// Extract `[n]` markers already present in the response. `n` is 1-based
/// into the sources list; out-of-range markers are ignored.
fn extract_explicit(response: &str, sources: &[SearchResult]) -> Vec<RawAttribution> {
    let spans = sentence_spans(response);
    let mut attributions = Vec::new();

    for capture in MARKER_RE.captures_iter(response) {
        let Ok(n) = capture[1].parse::<usize>() else {
            continue;
        };
        if n == 0 || n > sources.len() {
            continue;
        }

        let marker_start = capture.get(0).map(|m| m.start()).unwrap_or(0);
        let sentence = spans
            .iter()
            .find(|&&(start, end)| marker_start >= start && marker_start < end)
            .map(|&(start, end)| response[start..end].trim().to_string())
            .unwrap_or_else(|| response.trim().to_string());

        attributions.push(RawAttribution {
            text: sentence,
            source_id: sources[n - 1].id.clone(),
            confidence: 0.9,
        });
    }

    attributions
}

/// Byte spans of sentences, split after `.`, `?`, or `!` followed by
/// whitespace.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!') {
            let boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
            if boundary {
                let end = i + c.len_utf8();
                if !text[start..end].trim().is_empty() {
                    spans.push((start, end));
                }
                start = end;
            }
        }
    }

    if !text[start..].trim().is_empty() {
        spans.push((start, text.len()));
    }

    spans
}

/// Unique sources in order of first citation.
fn build_source_index(citations: &[Attribution], sources: &[SearchResult]) -> Vec<CitedSource> {
    let source_by_id: HashMap<&str, &SearchResult> =
        sources.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut index: Vec<CitedSource> = Vec::new();

    for citation in citations {
        if let Some(existing) = index.iter_mut().find(|s| s.id == citation.source_id) {
            existing.citations.push(citation.id);
            continue;
        }

        let source = source_by_id.get(citation.source_id.as_str());
        index.push(CitedSource {
            id: citation.source_id.clone(),
            title: source
                .and_then(|s| s.metadata_str("title"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Source {}", citation.id)),
            url: source.and_then(|s| s.metadata_str("url")).map(str::to_string),
            content_type: source
                .and_then(|s| s.metadata_str("content_type"))
                .unwrap_or("text")
                .to_string(),
            author: source
                .and_then(|s| s.metadata_str("author"))
                .map(str::to_string),
            date: source.and_then(|s| s.metadata_str("date")).map(str::to_string),
            citations: vec![citation.id],
        });
    }

    index
}

/// Append a `### Sources` footer to the annotated response.
fn render_markdown(
    response: &str,
    sources: &[CitedSource],
    include_urls: bool,
    link_citations: bool,
) -> String {
    if sources.is_empty() {
        return response.to_string();
    }

    let mut markdown = format!("{response}\n\n---\n\n### Sources\n\n");

    for (i, source) in sources.iter().enumerate() {
        let mut line = format!("{}. **{}**", i + 1, source.title);

        if let (Some(author), Some(date)) = (&source.author, &source.date) {
            line.push_str(&format!(" by {author} ({date})"));
        }

        if include_urls {
            if let Some(ref url) = source.url {
                if link_citations {
                    line.push_str(&format!(" [Link]({url})"));
                } else {
                    line.push_str(&format!(" - {url}"));
                }
            }
        }

        markdown.push_str(&line);
        markdown.push('\n');
    }

    markdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragpipe_core::{Error, Result};

    fn sources() -> Vec<SearchResult> {
        vec![
            SearchResult::new("src-1", "Okapi BM25 ranks passages by term statistics.", 0.9)
                .with_metadata("title", "Sparse Retrieval Primer")
                .with_metadata("url", "https://example.com/bm25")
                .with_metadata("author", "Aydın")
                .with_metadata("date", "2024"),
            SearchResult::new("src-2", "Cross-encoders jointly score query and passage.", 0.8)
                .with_metadata("title", "Reranking Notes"),
        ]
    }

    struct CannedDetector {
        payload: Option<serde_json::Value>,
    }

    #[async_trait]
    impl LanguageModel for CannedDetector {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Err(Error::AdapterUnavailable("not implemented".into()))
        }

        async fn generate_json(&self, _prompt: &str, _temperature: f32) -> Result<serde_json::Value> {
            self.payload
                .clone()
                .ok_or_else(|| Error::AdapterUnavailable("llm down".into()))
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_explicit_markers() {
        let enhancer = AttributionEnhancer::new(AttributionConfig::default());
        let response = "BM25 ranks by term statistics [1]. Cross-encoders rescore pairs [2].";

        let attributed = enhancer
            .enhance(response, &sources(), None, None, false)
            .await;

        assert_eq!(attributed.citations.len(), 2);
        assert_eq!(attributed.citations[0].id, 1);
        assert_eq!(attributed.citations[0].source_id, "src-1");
        assert_eq!(attributed.citations[1].id, 2);
        assert_eq!(attributed.citations[1].source_id, "src-2");
        // Explicit mode leaves the response text untouched.
        assert_eq!(attributed.response, response);
        assert!(attributed.markdown.contains("### Sources"));
        assert!(attributed.markdown.contains("Sparse Retrieval Primer"));
    }

    #[tokio::test]
    async fn test_explicit_out_of_range_markers_ignored() {
        let enhancer = AttributionEnhancer::new(AttributionConfig::default());
        let response = "A claim [0]. Another claim [7]. A good one [2].";

        let attributed = enhancer
            .enhance(response, &sources(), None, None, false)
            .await;

        assert_eq!(attributed.citations.len(), 1);
        assert_eq!(attributed.citations[0].source_id, "src-2");
        assert_eq!(attributed.citations[0].id, 1);
    }

    #[tokio::test]
    async fn test_auto_detect_inserts_markers() {
        let llm = Arc::new(CannedDetector {
            payload: Some(serde_json::json!([
                {
                    "text": "BM25 ranks passages by term statistics.",
                    "source_id": "src-1",
                    "confidence": 0.92
                },
                {
                    "text": "This claim is too uncertain.",
                    "source_id": "src-2",
                    "confidence": 0.3
                }
            ])),
        });

        let enhancer = AttributionEnhancer::with_llm(AttributionConfig::default(), llm);
        let response = "BM25 ranks passages by term statistics. This claim is too uncertain.";

        let attributed = enhancer
            .enhance(response, &sources(), Some("how does bm25 work"), None, true)
            .await;

        assert_eq!(attributed.citations.len(), 1);
        assert!(attributed
            .response
            .contains("BM25 ranks passages by term statistics.[1]"));
        assert_eq!(attributed.citations[0].relevance, 0.92);
    }

    #[tokio::test]
    async fn test_citation_source_ids_come_from_sources() {
        let llm = Arc::new(CannedDetector {
            payload: Some(serde_json::json!([
                {"text": "Valid claim.", "source_id": "src-1", "confidence": 0.9},
                {"text": "Phantom claim.", "source_id": "made-up", "confidence": 0.9}
            ])),
        });

        let enhancer = AttributionEnhancer::with_llm(AttributionConfig::default(), llm);
        let attributed = enhancer
            .enhance("Valid claim. Phantom claim.", &sources(), None, None, true)
            .await;

        let known: std::collections::HashSet<String> =
            sources().iter().map(|s| s.id.clone()).collect();
        assert!(attributed
            .citations
            .iter()
            .all(|c| known.contains(&c.source_id)));
        // Indices stay consecutive from 1 even after the drop.
        for (i, citation) in attributed.citations.iter().enumerate() {
            assert_eq!(citation.id, i + 1);
        }
    }

    #[tokio::test]
    async fn test_llm_failure_returns_response_unchanged() {
        let llm = Arc::new(CannedDetector { payload: None });
        let enhancer = AttributionEnhancer::with_llm(AttributionConfig::default(), llm);

        let attributed = enhancer
            .enhance("Some response.", &sources(), None, None, true)
            .await;

        assert_eq!(attributed.response, "Some response.");
        assert!(attributed.citations.is_empty());
        assert!(attributed.sources.is_empty());
        assert_eq!(attributed.markdown, "Some response.");
    }

    #[tokio::test]
    async fn test_no_sources_returns_unchanged() {
        let enhancer = AttributionEnhancer::new(AttributionConfig::default());
        let attributed = enhancer.enhance("Response [1].", &[], None, None, false).await;
        assert!(attributed.citations.is_empty());
        assert_eq!(attributed.response, "Response [1].");
    }

    #[tokio::test]
    async fn test_superscript_and_author_date_styles() {
        let llm = Arc::new(CannedDetector {
            payload: Some(serde_json::json!([
                {"text": "A cited claim.", "source_id": "src-1", "confidence": 0.9}
            ])),
        });

        let enhancer = AttributionEnhancer::with_llm(AttributionConfig::default(), llm.clone());
        let superscript = enhancer
            .enhance(
                "A cited claim.",
                &sources(),
                None,
                Some(CitationStyle::Superscript),
                true,
            )
            .await;
        assert!(superscript.response.contains("<sup>1</sup>"));

        let enhancer = AttributionEnhancer::with_llm(AttributionConfig::default(), llm);
        let author_date = enhancer
            .enhance(
                "A cited claim.",
                &sources(),
                None,
                Some(CitationStyle::AuthorDate),
                true,
            )
            .await;
        assert!(author_date.response.contains("(Aydın, 2024)"));
    }

    #[tokio::test]
    async fn test_repeat_citations_share_one_source_entry() {
        let enhancer = AttributionEnhancer::new(AttributionConfig::default());
        let response = "First fact [1]. Second fact [1]. Third fact [2].";

        let attributed = enhancer
            .enhance(response, &sources(), None, None, false)
            .await;

        assert_eq!(attributed.citations.len(), 3);
        assert_eq!(attributed.sources.len(), 2);
        assert_eq!(attributed.sources[0].citations, vec![1, 2]);
        assert_eq!(attributed.sources[1].citations, vec![3]);
    }

    #[test]
    fn test_markdown_footer_format() {
        let sources = vec![CitedSource {
            id: "s1".into(),
            title: "Primer".into(),
            url: Some("https://example.com".into()),
            content_type: "text".into(),
            author: Some("Writer".into()),
            date: Some("2023".into()),
            citations: vec![1],
        }];

        let markdown = render_markdown("Body.", &sources, true, true);
        assert!(markdown.contains("1. **Primer** by Writer (2023) [Link](https://example.com)"));

        let plain = render_markdown("Body.", &sources, true, false);
        assert!(plain.contains(" - https://example.com"));
    }
}
