//! Pattern Matcher — last-resort heuristics for fields the embedding index handles poorly.
//!
//! Keep this MINIMAL. Name splitting needs real logic ("Luke Stogsdill" → "Stogsdill");
//! the synonym table only covers contact fields whose labels vary wildly across ATS forms.
//! Everything else is left to semantic matching.

use std::collections::HashMap;

use crate::matcher::{MatchResult, MatchSource};

/// Canonical key → label substrings known to ask for it. First matching row wins.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("email", &["email", "e mail"]),
    (
        "phone",
        &["phone number", "mobile", "telephone", "cell phone", "phone"],
    ),
    ("linkedin", &["linkedin"]),
    ("github", &["github"]),
    (
        "website",
        &["portfolio", "personal website", "personal site", "website"],
    ),
    ("address", &["street address", "address line", "mailing address"]),
    ("city", &["city", "town"]),
    ("zip", &["zip", "postal code", "postcode"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamePart {
    Given,
    Surname,
    Full,
}

/// Runs name splitting, then the synonym table, against a normalized label.
pub fn match_pattern(label: &str, constants: &HashMap<String, String>) -> MatchResult {
    if label.is_empty() {
        return MatchResult::miss();
    }

    if let Some(part) = name_part(label) {
        let result = match_name(part, constants);
        if result.is_found() {
            return result;
        }
    }

    SYNONYMS
        .iter()
        .filter(|(_, needles)| needles.iter().any(|n| label.contains(n)))
        .find_map(|(key, _)| {
            constants
                .get(*key)
                .map(|v| pattern_hit(v.clone(), key))
        })
        .unwrap_or_else(MatchResult::miss)
}

fn name_part(label: &str) -> Option<NamePart> {
    if !label.contains("name") {
        return None;
    }
    if ["last", "sur", "family"].iter().any(|q| label.contains(q)) {
        Some(NamePart::Surname)
    } else if ["first", "given"].iter().any(|q| label.contains(q)) {
        Some(NamePart::Given)
    } else {
        Some(NamePart::Full)
    }
}

fn match_name(part: NamePart, constants: &HashMap<String, String>) -> MatchResult {
    let full_name = constants.get("name");
    let tokens: Vec<&str> = full_name
        .map(|n| n.split_whitespace().collect())
        .unwrap_or_default();

    match part {
        NamePart::Surname => {
            if let Some(v) = constants.get("last_name") {
                return pattern_hit(v.clone(), "last_name");
            }
            // A single-token name has no surname to offer.
            match tokens.as_slice() {
                [_, .., last] => pattern_hit(last.to_string(), "name"),
                _ => MatchResult::miss(),
            }
        }
        NamePart::Given => {
            if let Some(v) = constants.get("first_name") {
                return pattern_hit(v.clone(), "first_name");
            }
            match tokens.first() {
                Some(first) => pattern_hit(first.to_string(), "name"),
                None => MatchResult::miss(),
            }
        }
        NamePart::Full => {
            if let Some(v) = full_name {
                return pattern_hit(v.clone(), "name");
            }
            match (constants.get("first_name"), constants.get("last_name")) {
                (Some(first), Some(last)) => {
                    pattern_hit(format!("{first} {last}").trim().to_string(), "first_name")
                }
                _ => MatchResult::miss(),
            }
        }
    }
}

fn pattern_hit(value: String, key: &str) -> MatchResult {
    MatchResult::found(value, key.to_string(), MatchSource::Pattern, 1.0)
}
