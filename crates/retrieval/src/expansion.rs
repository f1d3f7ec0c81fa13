//! Dictionary-based query expansion
//!
//! Local, LLM-free expansion used when the language model is unavailable
//! or disabled: weighted terms from configured synonym dictionaries, and
//! variant phrasings built by single-term substitution. Dictionaries are
//! supplied by the host (domain vocabularies, transliteration tables);
//! an empty expander passes queries through untouched.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Expansion configuration
#[derive(Debug, Clone)]
pub struct SynonymExpanderConfig {
    /// Enable synonym expansion
    pub enable_synonyms: bool,
    /// Maximum expansion terms added per query term
    pub max_expansions_per_term: usize,
    /// Weight of original terms relative to expansions
    pub original_term_boost: f32,
    /// Maximum substituted variant phrasings produced
    pub max_variants: usize,
}

impl Default for SynonymExpanderConfig {
    fn default() -> Self {
        Self {
            enable_synonyms: true,
            max_expansions_per_term: 3,
            original_term_boost: 2.0,
            max_variants: 5,
        }
    }
}

/// Origin of an expanded term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSource {
    /// Original query term
    Original,
    /// Synonym expansion
    Synonym,
}

/// A weighted query term
#[derive(Debug, Clone)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
    pub source: TermSource,
}

/// Expanded query result
#[derive(Debug, Clone)]
pub struct ExpandedQuery {
    pub original: String,
    pub terms: Vec<WeightedTerm>,
    pub was_expanded: bool,
}

/// Dictionary-backed query expander
pub struct SynonymExpander {
    config: SynonymExpanderConfig,
    synonyms: RwLock<HashMap<String, Vec<String>>>,
    stopwords: RwLock<HashSet<String>>,
}

impl SynonymExpander {
    /// Create an empty expander; dictionaries can be added later.
    pub fn new(config: SynonymExpanderConfig) -> Self {
        Self {
            config,
            synonyms: RwLock::new(HashMap::new()),
            stopwords: RwLock::new(HashSet::new()),
        }
    }

    /// Create from host-supplied dictionaries.
    pub fn from_dictionaries(
        config: SynonymExpanderConfig,
        synonyms: HashMap<String, Vec<String>>,
        stopwords: Vec<String>,
    ) -> Self {
        let synonyms = synonyms
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self {
            config,
            synonyms: RwLock::new(synonyms),
            stopwords: RwLock::new(stopwords.into_iter().map(|w| w.to_lowercase()).collect()),
        }
    }

    /// Add synonym mappings at runtime.
    pub fn add_synonyms(&self, term: &str, alternatives: Vec<String>) {
        self.synonyms
            .write()
            .entry(term.to_lowercase())
            .or_default()
            .extend(alternatives);
    }

    /// Whether a word is a configured stopword.
    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.read().contains(&word.to_lowercase())
    }

    /// Expand a query into weighted terms.
    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let synonyms = self.synonyms.read();
        let stopwords = self.stopwords.read();

        let mut terms = Vec::new();
        let mut was_expanded = false;

        for word in query.split_whitespace() {
            let lower = word.to_lowercase();
            if stopwords.contains(&lower) {
                continue;
            }

            terms.push(WeightedTerm {
                term: lower.clone(),
                weight: self.config.original_term_boost,
                source: TermSource::Original,
            });

            if !self.config.enable_synonyms {
                continue;
            }
            if let Some(alternatives) = synonyms.get(&lower) {
                for alt in alternatives.iter().take(self.config.max_expansions_per_term) {
                    terms.push(WeightedTerm {
                        term: alt.to_lowercase(),
                        weight: 1.0,
                        source: TermSource::Synonym,
                    });
                    was_expanded = true;
                }
            }
        }

        ExpandedQuery {
            original: query.to_string(),
            terms,
            was_expanded,
        }
    }

    /// Produce variant phrasings by substituting one term with a synonym
    /// at a time, in query order.
    pub fn variants(&self, query: &str) -> Vec<String> {
        if !self.config.enable_synonyms {
            return Vec::new();
        }

        let synonyms = self.synonyms.read();
        let words: Vec<&str> = query.split_whitespace().collect();
        let mut variants = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        'outer: for (i, word) in words.iter().enumerate() {
            let Some(alternatives) = synonyms.get(&word.to_lowercase()) else {
                continue;
            };
            for alt in alternatives.iter().take(self.config.max_expansions_per_term) {
                let mut substituted: Vec<&str> = words.clone();
                substituted[i] = alt;
                let variant = substituted.join(" ");
                if seen.insert(variant.to_lowercase()) {
                    variants.push(variant);
                }
                if variants.len() >= self.config.max_variants {
                    break 'outer;
                }
            }
        }

        variants
    }
}
