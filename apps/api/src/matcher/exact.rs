//! Exact Matcher — direct key lookup on a normalized field source.

use std::collections::HashMap;

use crate::matcher::normalize::normalize;
use crate::matcher::{MatchResult, MatchSource};

/// Looks up a normalized candidate as-is, then with spaces turned into underscores.
pub fn match_exact(candidate: &str, constants: &HashMap<String, String>) -> MatchResult {
    if candidate.is_empty() {
        return MatchResult::miss();
    }

    let underscored = candidate.replace(' ', "_");
    let hit = constants
        .get_key_value(candidate)
        .or_else(|| constants.get_key_value(underscored.as_str()));

    match hit {
        Some((key, value)) => {
            MatchResult::found(value.clone(), key.clone(), MatchSource::Exact, 1.0)
        }
        None => MatchResult::miss(),
    }
}

/// Tries `name`, then `label`, then `placeholder`, each normalized independently.
/// The first source that hits wins.
pub fn match_field_sources(
    label: &str,
    name: &str,
    placeholder: &str,
    constants: &HashMap<String, String>,
) -> MatchResult {
    [name, label, placeholder]
        .into_iter()
        .map(|source| match_exact(&normalize(source), constants))
        .find(MatchResult::is_found)
        .unwrap_or_else(MatchResult::miss)
}
