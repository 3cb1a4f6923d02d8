// Field Matching Engine
// Decides which known constant (if any) answers an arbitrary, unlabeled form field.
// Stages, first confident answer wins: exact → semantic (embedding index) → pattern.
// Generative completion lives in `generative` and is only reached through `fill`.

pub mod exact;
pub mod generative;
pub mod normalize;
pub mod pattern;
pub mod prompts;
pub mod semantic;

#[cfg(test)]
pub mod test_support;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::matcher::normalize::{detect_negation, invert_boolean, normalize};
use crate::matcher::semantic::EmbeddingIndex;

/// One `<option>` / radio choice of a form field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub value: String,
}

/// A form field as scraped from the page. `id` is opaque and only used as an output key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default, rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<FieldOption>,
}

impl FieldDescriptor {
    /// `select`/`radio` fields that actually expose options.
    pub fn has_discrete_options(&self) -> bool {
        let kind = self.field_type.to_ascii_lowercase();
        (kind == "select" || kind == "radio") && !self.options.is_empty()
    }
}

/// Which stage produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Exact,
    Pattern,
    Semantic,
}

/// Outcome of a matcher stage. A miss is a normal value, never an error.
///
/// `Miss` may carry the embedding index's best guess for diagnostics; callers must
/// not treat it as an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Found {
        value: String,
        key: String,
        source: MatchSource,
        /// Cosine similarity for semantic matches; 1.0 otherwise.
        similarity: f64,
    },
    Miss {
        best_key: Option<String>,
        best_similarity: f64,
    },
}

impl MatchResult {
    pub fn found(value: String, key: String, source: MatchSource, similarity: f64) -> Self {
        MatchResult::Found {
            value,
            key,
            source,
            similarity,
        }
    }

    pub fn miss() -> Self {
        MatchResult::Miss {
            best_key: None,
            best_similarity: 0.0,
        }
    }

    pub fn best_guess(key: String, similarity: f64) -> Self {
        MatchResult::Miss {
            best_key: Some(key),
            best_similarity: similarity,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MatchResult::Found { .. })
    }

    /// The answer, only for a found match.
    pub fn value(&self) -> Option<&str> {
        match self {
            MatchResult::Found { value, .. } => Some(value),
            MatchResult::Miss { .. } => None,
        }
    }

    /// The matched key, or the best guess for a miss.
    pub fn key(&self) -> Option<&str> {
        match self {
            MatchResult::Found { key, .. } => Some(key),
            MatchResult::Miss { best_key, .. } => best_key.as_deref(),
        }
    }

    pub fn source(&self) -> Option<MatchSource> {
        match self {
            MatchResult::Found { source, .. } => Some(*source),
            MatchResult::Miss { .. } => None,
        }
    }

    pub fn similarity(&self) -> f64 {
        match self {
            MatchResult::Found { similarity, .. } => *similarity,
            MatchResult::Miss {
                best_similarity, ..
            } => *best_similarity,
        }
    }

    /// Applies boolean inversion to a found value.
    fn inverted(self) -> Self {
        match self {
            MatchResult::Found {
                value,
                key,
                source,
                similarity,
            } => MatchResult::Found {
                value: invert_boolean(&value),
                key,
                source,
                similarity,
            },
            miss => miss,
        }
    }
}

/// Runs the constant-backed stages for one field. Cheap to clone.
#[derive(Clone)]
pub struct FieldMatcher {
    index: Option<Arc<EmbeddingIndex>>,
    threshold: f64,
}

impl FieldMatcher {
    /// `index = None` degrades to exact + pattern matching only.
    pub fn new(index: Option<Arc<EmbeddingIndex>>, threshold: f64) -> Self {
        Self { index, threshold }
    }

    /// Matches a field against a constants snapshot. A negated label flips a boolean
    /// answer whichever stage found it.
    pub async fn match_field(
        &self,
        label: &str,
        name: &str,
        placeholder: &str,
        constants: &HashMap<String, String>,
    ) -> MatchResult {
        let result = self.resolve(label, name, placeholder, constants).await;
        if detect_negation(label) {
            result.inverted()
        } else {
            result
        }
    }

    async fn resolve(
        &self,
        label: &str,
        name: &str,
        placeholder: &str,
        constants: &HashMap<String, String>,
    ) -> MatchResult {
        let exact = exact::match_field_sources(label, name, placeholder, constants);
        if exact.is_found() {
            return exact;
        }

        let normalized = normalize(label);
        if normalized.is_empty() {
            return MatchResult::miss();
        }

        let mut best = MatchResult::miss();
        if let Some(index) = &self.index {
            match index.query(&normalized, self.threshold).await {
                MatchResult::Found {
                    key, similarity, ..
                } => match constants.get(&key) {
                    // Value comes from the caller's snapshot, not the index.
                    Some(value) => {
                        return MatchResult::found(
                            value.clone(),
                            key,
                            MatchSource::Semantic,
                            similarity,
                        );
                    }
                    None => warn!("Semantic match '{key}' is not in the current constants; ignoring"),
                },
                miss => best = miss,
            }
        }

        let pattern = pattern::match_pattern(&normalized, constants);
        if pattern.is_found() {
            return pattern;
        }

        debug!("No constant match for '{normalized}'");
        best
    }
}
