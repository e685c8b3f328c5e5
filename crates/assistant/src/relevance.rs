//! Relevance scoring: approximate keyword matching between a user query and
//! record text.
//!
//! Retrieval uses the boolean form to decide membership in the context
//! bundle; search uses the float form to rank hits. Both sit behind
//! [`RelevanceScorer`] so a vector-similarity ranker can replace the keyword
//! heuristic without touching call sites.

use std::collections::HashSet;

/// Query-words longer than this many characters count as a substring hit.
const SIGNIFICANT_WORD_CHARS: usize = 3;

/// Word overlap needed for a boolean match.
const MIN_OVERLAP: usize = 2;

const TITLE_WORD_WEIGHT: f64 = 0.3;
const BODY_WORD_WEIGHT: f64 = 0.1;
const TITLE_PHRASE_BONUS: f64 = 0.5;
const BODY_PHRASE_BONUS: f64 = 0.2;

/// Scores record text against a free-text query.
pub trait RelevanceScorer: Send + Sync {
    /// Whether any of `fields` is relevant to `query`. Absent fields are skipped.
    fn is_relevant(&self, query: &str, fields: &[Option<&str>]) -> bool;

    /// A ranking score in `[0, 1]` for a (title, body) pair.
    fn score(&self, query: &str, title: Option<&str>, body: Option<&str>) -> f64;
}

/// Case-folded whitespace-token matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn new() -> Self {
        Self
    }
}

fn words(text: &str) -> HashSet<&str> {
    text.split_whitespace().collect()
}

fn overlap(query_words: &HashSet<&str>, text: &str) -> usize {
    words(text).intersection(query_words).count()
}

impl RelevanceScorer for KeywordScorer {
    fn is_relevant(&self, query: &str, fields: &[Option<&str>]) -> bool {
        let query = query.to_lowercase();
        let query_words = words(&query);
        if query_words.is_empty() {
            return false;
        }

        fields.iter().flatten().any(|field| {
            let field = field.to_lowercase();
            overlap(&query_words, &field) >= MIN_OVERLAP
                || query_words
                    .iter()
                    .filter(|w| w.chars().count() > SIGNIFICANT_WORD_CHARS)
                    .any(|w| field.contains(*w))
        })
    }

    fn score(&self, query: &str, title: Option<&str>, body: Option<&str>) -> f64 {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return 0.0;
        }
        let query_words = words(&query);
        let mut score = 0.0;

        if let Some(title) = title {
            let title = title.to_lowercase();
            score += overlap(&query_words, &title) as f64 * TITLE_WORD_WEIGHT;
            if title.contains(&query) {
                score += TITLE_PHRASE_BONUS;
            }
        }

        if let Some(body) = body {
            let body = body.to_lowercase();
            score += overlap(&query_words, &body) as f64 * BODY_WORD_WEIGHT;
            if body.contains(&query) {
                score += BODY_PHRASE_BONUS;
            }
        }

        score.min(1.0)
    }
}
