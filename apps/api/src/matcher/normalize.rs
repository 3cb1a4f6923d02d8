//! Label canonicalization and negation handling.

/// Substrings that flip the meaning of a yes/no question.
/// Two-word forms are listed explicitly; `not` alone already covers most of them.
const NEGATION_PATTERNS: &[&str] = &[
    "not", "don't", "do not", "doesn't", "does not", "aren't", "are not", "isn't", "is not",
    "won't", "will not", "can't", "cannot", "haven't", "have not",
];

const YES_VARIANTS: &[&str] = &["yes", "y", "true", "1"];
const NO_VARIANTS: &[&str] = &["no", "n", "false", "0"];

/// Lower-cases, strips everything outside `[a-z0-9_ ]`, collapses whitespace and trims.
///
/// `"E-Mail Address!!"` → `"email address"`.
pub fn normalize(label: &str) -> String {
    let lowered = label.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if the raw label contains a negation. Runs on the raw text so apostrophes survive.
pub fn detect_negation(label: &str) -> bool {
    let lowered = label.to_lowercase();
    NEGATION_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Flips boolean-like answers; anything else passes through unchanged.
pub fn invert_boolean(value: &str) -> String {
    let normalized = value.trim().to_lowercase();
    if YES_VARIANTS.contains(&normalized.as_str()) {
        "no".to_string()
    } else if NO_VARIANTS.contains(&normalized.as_str()) {
        "yes".to_string()
    } else {
        value.to_string()
    }
}

/// Renders a constant key as the phrase that gets embedded: `first_name` → `first name`.
pub fn key_to_label(key: &str) -> String {
    key.replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize("E-Mail Address!!"), "email address");
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_keeps_underscores() {
        assert_eq!(normalize("  First\t  Name "), "first name");
        assert_eq!(normalize("authorized_to_work"), "authorized_to_work");
        assert_eq!(normalize("Zip / Postal Code*"), "zip postal code");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("?!*"), "");
    }

    #[test]
    fn test_negation_on_raw_label() {
        assert!(detect_negation("Are you NOT authorized to work?"));
        assert!(detect_negation("I don't require sponsorship"));
        assert!(detect_negation("Cannot relocate"));
        assert!(!detect_negation("Are you authorized to work?"));
    }

    #[test]
    fn test_invert_boolean() {
        assert_eq!(invert_boolean("yes"), "no");
        assert_eq!(invert_boolean(" TRUE "), "no");
        assert_eq!(invert_boolean("1"), "no");
        assert_eq!(invert_boolean("No"), "yes");
        assert_eq!(invert_boolean("n"), "yes");
        assert_eq!(invert_boolean("0"), "yes");
        assert_eq!(invert_boolean("Luke"), "Luke");
    }

    #[test]
    fn test_key_to_label() {
        assert_eq!(key_to_label("first_name"), "first name");
        assert_eq!(key_to_label("authorized_to_work"), "authorized to work");
        assert_eq!(key_to_label("email"), "email");
        assert_eq!(key_to_label("years_experience"), "years experience");
    }
}
