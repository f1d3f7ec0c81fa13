//! Context optimization
//!
//! Chooses an ordered subset of reranked candidates that fits a token
//! budget while maximizing utility. Four strategies: greedy (score order
//! with dedup and per-document caps), relevance (pure score order),
//! coverage (marginal term coverage against relevance), and diverse
//! (round-robin over source documents).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use ragpipe_core::{
    estimate_tokens, ContextChunk, ContextWindow, SearchResult, SourceInfo, TokenCounter,
};

use crate::text::{extract_key_terms, split_sentences};

/// Selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeStrategy {
    /// Score order with near-duplicate rejection and per-document caps
    Greedy,
    /// Pure score order under the token budget, no dedup
    Relevance,
    /// Marginal term coverage weighed against relevance
    Coverage,
    /// Round-robin over distinct source documents
    Diverse,
}

impl OptimizeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizeStrategy::Greedy => "greedy",
            OptimizeStrategy::Relevance => "relevance",
            OptimizeStrategy::Coverage => "coverage",
            OptimizeStrategy::Diverse => "diverse",
        }
    }

    /// Parse a strategy name, falling back to greedy with a warning on
    /// unknown input.
    pub fn parse_or_greedy(name: &str) -> Self {
        match name.parse() {
            Ok(strategy) => strategy,
            Err(_) => {
                tracing::warn!(name, "unknown optimization strategy, falling back to greedy");
                OptimizeStrategy::Greedy
            },
        }
    }
}

impl std::str::FromStr for OptimizeStrategy {
    type Err = ragpipe_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(OptimizeStrategy::Greedy),
            "relevance" => Ok(OptimizeStrategy::Relevance),
            "coverage" => Ok(OptimizeStrategy::Coverage),
            "diverse" => Ok(OptimizeStrategy::Diverse),
            other => Err(ragpipe_core::Error::Validation(format!(
                "unknown optimization strategy '{other}'"
            ))),
        }
    }
}

/// Optimizer configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub max_tokens: usize,
    pub max_chunks: usize,
    /// Sentence-overlap fraction that marks a near-duplicate
    pub overlap_threshold: f32,
    /// Lambda trading coverage against relevance in the coverage strategy
    pub diversity_weight: f32,
    /// Chunks allowed per document once three documents are represented
    pub max_same_doc: usize,
    /// Re-sort the selection by original candidate position
    pub preserve_order: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            max_chunks: 10,
            overlap_threshold: 0.7,
            diversity_weight: 0.3,
            max_same_doc: 2,
            preserve_order: false,
        }
    }
}

impl From<&ragpipe_config::OptimizerConfig> for OptimizerConfig {
    fn from(config: &ragpipe_config::OptimizerConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            max_chunks: config.max_chunks,
            overlap_threshold: config.overlap_threshold,
            diversity_weight: config.diversity_weight,
            max_same_doc: config.max_same_doc,
            preserve_order: config.preserve_order,
        }
    }
}

/// Entry in the diverse strategy's per-document heap
struct DocHead {
    score: f32,
    doc: String,
    position: usize,
}

impl PartialEq for DocHead {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.doc == other.doc
    }
}
impl Eq for DocHead {}

impl Ord for DocHead {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.doc.cmp(&self.doc))
    }
}
impl PartialOrd for DocHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Token-budgeted context selection
pub struct ContextOptimizer {
    config: OptimizerConfig,
    tokenizer: Option<Arc<dyn TokenCounter>>,
}

impl ContextOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            tokenizer: None,
        }
    }

    /// Use an injected tokenizer instead of the character estimate.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn TokenCounter>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer {
            Some(ref tokenizer) => tokenizer.count(text),
            None => estimate_tokens(text),
        }
    }

    /// Build an optimized context window from candidates.
    pub fn optimize(
        &self,
        results: &[SearchResult],
        query: &str,
        strategy: OptimizeStrategy,
        max_tokens: Option<usize>,
    ) -> ContextWindow {
        let start = Instant::now();
        let budget = max_tokens.unwrap_or(self.config.max_tokens);

        let chunks: Vec<ContextChunk> = results
            .iter()
            .enumerate()
            .map(|(order, result)| ContextChunk::from_result(result, order))
            .collect();
        let token_counts: Vec<usize> = chunks.iter().map(|c| self.count_tokens(&c.text)).collect();
        let sentence_sets: Vec<Vec<String>> =
            chunks.iter().map(|c| split_sentences(&c.text)).collect();

        let selected = match strategy {
            OptimizeStrategy::Greedy => self.select_greedy(&chunks, &token_counts, &sentence_sets, budget),
            OptimizeStrategy::Relevance => self.select_relevance(&chunks, &token_counts, budget),
            OptimizeStrategy::Coverage => {
                self.select_coverage(&chunks, &token_counts, query, budget)
            },
            OptimizeStrategy::Diverse => {
                self.select_diverse(&chunks, &token_counts, &sentence_sets, budget)
            },
        };

        let window = self.build_window(chunks, token_counts, selected, strategy);

        tracing::debug!(
            strategy = strategy.as_str(),
            chunks = window.chunks.len(),
            total_tokens = window.total_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "context optimization completed"
        );

        window
    }

    /// Candidate order shared by the score-driven strategies: score
    /// descending, original position as tiebreak.
    fn score_order(chunks: &[ContextChunk]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        order.sort_by(|&a, &b| {
            chunks[b]
                .score
                .total_cmp(&chunks[a].score)
                .then_with(|| chunks[a].order.cmp(&chunks[b].order))
        });
        order
    }

    fn select_greedy(
        &self,
        chunks: &[ContextChunk],
        token_counts: &[usize],
        sentence_sets: &[Vec<String>],
        budget: usize,
    ) -> Vec<usize> {
        let mut selected = Vec::new();
        let mut tokens_used = 0;
        let mut doc_counts: HashMap<&str, usize> = HashMap::new();

        for idx in Self::score_order(chunks) {
            if selected.len() >= self.config.max_chunks {
                break;
            }
            if tokens_used + token_counts[idx] > budget {
                continue;
            }

            if let Some(ref doc) = chunks[idx].document_id {
                let represented = doc_counts.len();
                let already = doc_counts.get(doc.as_str()).copied().unwrap_or(0);
                if represented >= 3 && already >= self.config.max_same_doc {
                    continue;
                }
            }

            if self.overlaps_selection(idx, &selected, sentence_sets) {
                continue;
            }

            tokens_used += token_counts[idx];
            if let Some(ref doc) = chunks[idx].document_id {
                *doc_counts.entry(doc.as_str()).or_insert(0) += 1;
            }
            selected.push(idx);
        }

        selected
    }

    fn select_relevance(
        &self,
        chunks: &[ContextChunk],
        token_counts: &[usize],
        budget: usize,
    ) -> Vec<usize> {
        let mut selected = Vec::new();
        let mut tokens_used = 0;

        for idx in Self::score_order(chunks) {
            if selected.len() >= self.config.max_chunks {
                break;
            }
            if tokens_used + token_counts[idx] > budget {
                continue;
            }
            tokens_used += token_counts[idx];
            selected.push(idx);
        }

        selected
    }

    fn select_coverage(
        &self,
        chunks: &[ContextChunk],
        token_counts: &[usize],
        _query: &str,
        budget: usize,
    ) -> Vec<usize> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let lambda = self.config.diversity_weight;
        let order = Self::score_order(chunks);

        // Min-max normalize scores so they are commensurable with the
        // coverage fraction.
        let max_score = chunks[order[0]].score;
        let min_score = order.last().map_or(max_score, |&idx| chunks[idx].score);
        let range = max_score - min_score;
        let normalized = |idx: usize| -> f32 {
            if range.abs() < f32::EPSILON {
                0.0
            } else {
                (chunks[idx].score - min_score) / range
            }
        };

        let term_sets: Vec<HashSet<String>> =
            chunks.iter().map(|c| extract_key_terms(&c.text)).collect();

        let mut selected = Vec::new();
        let mut tokens_used = 0;
        let mut covered: HashSet<String> = HashSet::new();
        let mut remaining: Vec<usize> = order;

        // Seed with the best-scored chunk that fits the budget.
        if let Some(pos) = remaining
            .iter()
            .position(|&idx| token_counts[idx] <= budget)
        {
            let idx = remaining.remove(pos);
            tokens_used += token_counts[idx];
            covered.extend(term_sets[idx].iter().cloned());
            selected.push(idx);
        }

        while !remaining.is_empty() && selected.len() < self.config.max_chunks {
            let mut best: Option<(usize, f32)> = None;

            for (pos, &idx) in remaining.iter().enumerate() {
                if tokens_used + token_counts[idx] > budget {
                    continue;
                }

                let terms = &term_sets[idx];
                let new_terms = terms.difference(&covered).count();
                let coverage = new_terms as f32 / terms.len().max(1) as f32;
                let combined = (1.0 - lambda) * normalized(idx) + lambda * coverage;

                if best.map_or(true, |(_, score)| combined > score) {
                    best = Some((pos, combined));
                }
            }

            let Some((pos, _)) = best else {
                break;
            };
            let idx = remaining.remove(pos);
            tokens_used += token_counts[idx];
            covered.extend(term_sets[idx].iter().cloned());
            selected.push(idx);
        }

        selected
    }

    fn select_diverse(
        &self,
        chunks: &[ContextChunk],
        token_counts: &[usize],
        sentence_sets: &[Vec<String>],
        budget: usize,
    ) -> Vec<usize> {
        // Group candidate indices by source document, best score first.
        let mut by_doc: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let doc = chunk
                .document_id
                .clone()
                .unwrap_or_else(|| chunk.id.clone());
            by_doc.entry(doc).or_default().push(idx);
        }
        for group in by_doc.values_mut() {
            group.sort_by(|&a, &b| chunks[b].score.total_cmp(&chunks[a].score));
        }

        let mut heap: BinaryHeap<DocHead> = by_doc
            .iter()
            .map(|(doc, group)| DocHead {
                score: chunks[group[0]].score,
                doc: doc.clone(),
                position: 0,
            })
            .collect();

        let mut selected = Vec::new();
        let mut tokens_used = 0;

        while let Some(head) = heap.pop() {
            if selected.len() >= self.config.max_chunks {
                break;
            }

            let group = &by_doc[&head.doc];
            let idx = group[head.position];

            let fits = tokens_used + token_counts[idx] <= budget;
            if fits && !self.overlaps_selection(idx, &selected, sentence_sets) {
                tokens_used += token_counts[idx];
                selected.push(idx);
            }

            // Advance this document's cursor either way.
            if head.position + 1 < group.len() {
                let next = group[head.position + 1];
                heap.push(DocHead {
                    score: chunks[next].score,
                    doc: head.doc,
                    position: head.position + 1,
                });
            }
        }

        selected
    }

    /// Whether the candidate's sentences overlap an already selected chunk
    /// beyond the configured threshold.
    fn overlaps_selection(
        &self,
        candidate: usize,
        selected: &[usize],
        sentence_sets: &[Vec<String>],
    ) -> bool {
        let candidate_sentences = &sentence_sets[candidate];
        if candidate_sentences.is_empty() {
            return false;
        }

        for &idx in selected {
            let selected_set: HashSet<&str> =
                sentence_sets[idx].iter().map(String::as_str).collect();
            let overlap = candidate_sentences
                .iter()
                .filter(|s| selected_set.contains(s.as_str()))
                .count();
            let ratio = overlap as f32 / candidate_sentences.len() as f32;
            if ratio >= self.config.overlap_threshold {
                return true;
            }
        }

        false
    }

    fn build_window(
        &self,
        chunks: Vec<ContextChunk>,
        token_counts: Vec<usize>,
        mut selected: Vec<usize>,
        strategy: OptimizeStrategy,
    ) -> ContextWindow {
        if self.config.preserve_order {
            selected.sort_by_key(|&idx| chunks[idx].order);
        }

        let mut window = ContextWindow::empty();

        for &idx in &selected {
            let chunk = &chunks[idx];
            let doc_key = chunk
                .document_id
                .clone()
                .unwrap_or_else(|| chunk.id.clone());

            let title = chunk
                .metadata
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string();
            let url = chunk
                .metadata
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let content_type = chunk
                .metadata
                .get("content_type")
                .and_then(|v| v.as_str())
                .unwrap_or("text")
                .to_string();

            window
                .sources
                .entry(doc_key.clone())
                .and_modify(|source| source.chunk_count += 1)
                .or_insert(SourceInfo {
                    id: doc_key,
                    title,
                    url,
                    content_type,
                    chunk_count: 1,
                });

            window.total_tokens += token_counts[idx];
            window.total_chars += chunk.text.len();
        }

        window.chunks = selected.into_iter().map(|idx| chunks[idx].clone()).collect();
        window
            .metadata
            .insert("chunk_count".into(), serde_json::json!(window.chunks.len()));
        window.metadata.insert(
            "optimization_strategy".into(),
            serde_json::json!(strategy.as_str()),
        );

        window
    }
}
