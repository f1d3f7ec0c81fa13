//! BM25 index structures and scoring
//!
//! The index is a plain inverted structure: per-term postings with
//! frequencies, per-passage lengths, and a metadata snapshot for filter
//! evaluation. Once published it is treated as immutable; mutations go
//! through clone-and-swap in the retriever.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use ragpipe_core::{Passage, SearchFilters};

use super::tokenize::tokenize;

/// Okapi BM25 parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term frequency saturation
    pub k1: f64,
    /// Document length normalization
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Inverted index over the passage corpus
///
/// Serializable so a snapshot can be persisted for warm restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    /// Passage id -> token count
    pub(crate) doc_lengths: HashMap<String, usize>,
    /// Sum of all document lengths, kept for O(1) average updates
    pub(crate) total_tokens: usize,
    /// Average document length
    pub(crate) avg_doc_length: f64,
    /// Term -> (passage id -> frequency)
    pub(crate) term_frequencies: HashMap<String, HashMap<String, usize>>,
    /// Term -> number of passages containing it
    pub(crate) doc_frequencies: HashMap<String, usize>,
    /// Indexed passage count
    pub(crate) document_count: usize,
    /// Passage id -> metadata snapshot (includes `document_id`)
    pub(crate) document_metadata: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl Bm25Index {
    /// Build an index from a corpus in a single pass.
    pub fn build(passages: &[Passage]) -> Self {
        let mut index = Self::default();
        for passage in passages {
            index.add(passage);
        }
        index
    }

    /// Add one passage. Re-adding an existing id replaces it.
    pub fn add(&mut self, passage: &Passage) {
        if self.doc_lengths.contains_key(&passage.id) {
            self.remove(&passage.id);
        }

        let tokens = tokenize(&passage.text);

        let mut metadata = passage.metadata.clone();
        metadata.insert(
            "document_id".to_string(),
            serde_json::Value::String(passage.document_id.clone()),
        );
        self.document_metadata.insert(passage.id.clone(), metadata);

        self.doc_lengths.insert(passage.id.clone(), tokens.len());
        self.total_tokens += tokens.len();

        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.as_str()).or_insert(0) += 1;
        }

        for (term, count) in term_counts {
            self.term_frequencies
                .entry(term.to_string())
                .or_default()
                .insert(passage.id.clone(), count);
            *self.doc_frequencies.entry(term.to_string()).or_insert(0) += 1;
        }

        self.document_count += 1;
        self.recompute_avg_length();
    }

    /// Remove one passage by id. Unknown ids are ignored.
    pub fn remove(&mut self, id: &str) {
        let Some(length) = self.doc_lengths.remove(id) else {
            return;
        };
        self.total_tokens -= length;
        self.document_count -= 1;
        self.document_metadata.remove(id);

        let mut emptied_terms = Vec::new();
        for (term, postings) in self.term_frequencies.iter_mut() {
            if postings.remove(id).is_some() {
                match self.doc_frequencies.get_mut(term) {
                    Some(df) if *df > 1 => *df -= 1,
                    _ => {
                        self.doc_frequencies.remove(term);
                    },
                }
                if postings.is_empty() {
                    emptied_terms.push(term.clone());
                }
            }
        }
        for term in emptied_terms {
            self.term_frequencies.remove(&term);
        }

        self.recompute_avg_length();
    }

    fn recompute_avg_length(&mut self) {
        self.avg_doc_length = if self.document_count > 0 {
            self.total_tokens as f64 / self.document_count as f64
        } else {
            0.0
        };
    }

    /// Passages containing at least one query term.
    pub fn candidates<'a>(&'a self, query_terms: &[String]) -> HashSet<&'a str> {
        let mut relevant = HashSet::new();
        for term in query_terms {
            if let Some(postings) = self.term_frequencies.get(term) {
                relevant.extend(postings.keys().map(String::as_str));
            }
        }
        relevant
    }

    /// Okapi BM25 score of one passage against the query terms.
    ///
    /// score(p, Q) = Σ idf(t) · tf·(k1+1) / (tf + k1·(1 - b + b·len/avgLen))
    /// idf(t)      = ln((N - df + 0.5) / (df + 0.5) + 1)
    pub fn score(&self, query_terms: &[String], id: &str, params: Bm25Params) -> f64 {
        let doc_length = match self.doc_lengths.get(id) {
            Some(&length) => length as f64,
            None => return 0.0,
        };
        if self.avg_doc_length == 0.0 {
            return 0.0;
        }

        let n = self.document_count as f64;
        let mut score = 0.0;

        for term in query_terms {
            let Some(postings) = self.term_frequencies.get(term) else {
                continue;
            };
            let Some(&term_freq) = postings.get(id) else {
                continue;
            };
            let Some(&doc_freq) = self.doc_frequencies.get(term) else {
                continue;
            };

            let tf = term_freq as f64;
            let df = doc_freq as f64;

            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf_sat = tf * (params.k1 + 1.0)
                / (tf + params.k1 * (1.0 - params.b + params.b * doc_length / self.avg_doc_length));

            score += idf * tf_sat;
        }

        score
    }

    /// Evaluate metadata filters against an indexed passage.
    ///
    /// Scalars mean equality, arrays mean membership, `document_id` is
    /// first-class. A required key missing from the metadata eliminates
    /// the passage; a malformed condition (non-scalar, non-array value)
    /// is skipped with a warning.
    pub fn matches_filters(&self, id: &str, filters: &SearchFilters) -> bool {
        let Some(metadata) = self.document_metadata.get(id) else {
            return false;
        };

        for (key, expected) in filters {
            let actual = metadata.get(key);
            match expected {
                serde_json::Value::Array(allowed) => match actual {
                    Some(value) if allowed.contains(value) => {},
                    _ => return false,
                },
                serde_json::Value::Object(_) => {
                    tracing::warn!(key, "skipping malformed filter condition");
                },
                scalar => match actual {
                    Some(value) if value == scalar => {},
                    _ => return false,
                },
            }
        }

        true
    }

    /// Number of indexed passages
    pub fn document_count(&self) -> usize {
        self.document_count
    }

    /// Number of distinct terms
    pub fn term_count(&self) -> usize {
        self.term_frequencies.len()
    }

    /// Average indexed passage length in tokens
    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    /// Verify the structural invariants:
    /// `doc_lengths[p] = Σ_t term_frequencies[t][p]` and
    /// `doc_frequencies[t] = |{p : term_frequencies[t][p] > 0}|`.
    pub fn validate(&self) -> Result<(), String> {
        for (term, postings) in &self.term_frequencies {
            let df = self.doc_frequencies.get(term).copied().unwrap_or(0);
            if df != postings.len() {
                return Err(format!(
                    "doc_frequencies[{term}] = {df}, postings have {} entries",
                    postings.len()
                ));
            }
            if postings.is_empty() {
                return Err(format!("term '{term}' has an empty posting list"));
            }
        }

        for (id, &length) in &self.doc_lengths {
            let summed: usize = self
                .term_frequencies
                .values()
                .filter_map(|postings| postings.get(id))
                .sum();
            if summed != length {
                return Err(format!(
                    "doc_lengths[{id}] = {length}, term frequencies sum to {summed}"
                ));
            }
        }

        if self.doc_lengths.len() != self.document_count {
            return Err(format!(
                "document_count = {}, doc_lengths has {} entries",
                self.document_count,
                self.doc_lengths.len()
            ));
        }

        Ok(())
    }
}
