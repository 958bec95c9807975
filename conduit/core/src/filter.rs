//! Content filtering applied to chunk text before release.
//!
//! The filter is a pure, synchronous transform over the two text fields of a
//! chunk (`content` and `delta`). It never touches chunk identity, ordering,
//! or timestamps. Redaction replaces matches with fixed placeholders that no
//! rule can match again, which makes the whole transform idempotent:
//! filtering already-filtered text is a no-op.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder substituted for payment-card-like sequences
pub const CARD_PLACEHOLDER: &str = "[redacted-card]";
/// Placeholder substituted for email-like strings
pub const EMAIL_PLACEHOLDER: &str = "[redacted-email]";
/// Substitution for profanity matches
pub const PROFANITY_PLACEHOLDER: &str = "****";

/// 13 to 19 digits with optional single space/dash separators.
///
/// Longer digit runs are deliberately not matched: the boundary anchors stop
/// this rule from eating a prefix of an arbitrary numeric blob.
static CARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap());

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PROFANITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:damn|hell|crap|shit|fuck|ass|bastard|bitch)\b").unwrap()
});

/// Which redaction rules are active
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Replace payment-card-like numeric sequences
    pub redact_cards: bool,
    /// Replace email-like strings
    pub redact_emails: bool,
    /// Coarse profanity substitution (off by default)
    pub filter_profanity: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            redact_cards: true,
            redact_emails: true,
            filter_profanity: false,
        }
    }
}

impl FilterConfig {
    /// A configuration with every rule disabled (pass-through filter)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            redact_cards: false,
            redact_emails: false,
            filter_profanity: false,
        }
    }
}

/// Redaction transform for chunk text
///
/// Rules are applied email-first so that an address whose local part looks
/// card-like is redacted as one email rather than left half-mangled.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    config: FilterConfig,
}

impl ContentFilter {
    /// Create a filter with the given rule set
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Whether any rule is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.config.redact_cards || self.config.redact_emails || self.config.filter_profanity
    }

    /// Apply every active rule to `text`, returning the filtered copy
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        let mut filtered = text.to_string();
        if self.config.redact_emails {
            replace_in_place(&mut filtered, &EMAIL_PATTERN, EMAIL_PLACEHOLDER);
        }
        if self.config.redact_cards {
            replace_in_place(&mut filtered, &CARD_PATTERN, CARD_PLACEHOLDER);
        }
        if self.config.filter_profanity {
            replace_in_place(&mut filtered, &PROFANITY_PATTERN, PROFANITY_PLACEHOLDER);
        }
        filtered
    }
}

/// Replace matches of `pattern`, skipping reallocation when nothing matched
fn replace_in_place(text: &mut String, pattern: &Regex, placeholder: &str) {
    if let Cow::Owned(replaced) = pattern.replace_all(text, placeholder) {
        *text = replaced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn default_filter() -> ContentFilter {
        ContentFilter::new(FilterConfig::default())
    }

    #[test]
    fn redacts_dashed_card_number() {
        let filter = default_filter();
        let out = filter.apply("pay with 4111-1111-1111-1111 today");
        assert_eq!(out, format!("pay with {CARD_PLACEHOLDER} today"));
    }

    #[test]
    fn redacts_spaced_and_plain_card_numbers() {
        let filter = default_filter();
        assert_eq!(
            filter.apply("4111 1111 1111 1111"),
            CARD_PLACEHOLDER.to_string()
        );
        assert_eq!(
            filter.apply("4111111111111111"),
            CARD_PLACEHOLDER.to_string()
        );
    }

    #[test]
    fn short_digit_runs_are_left_alone() {
        let filter = default_filter();
        let text = "call 555-0100 at 10:30";
        assert_eq!(filter.apply(text), text);
    }

    #[test]
    fn redacts_email_addresses() {
        let filter = default_filter();
        let out = filter.apply("reach me at alice@example.com or bob@test.org");
        assert_eq!(
            out,
            format!("reach me at {EMAIL_PLACEHOLDER} or {EMAIL_PLACEHOLDER}")
        );
    }

    #[test]
    fn filtering_is_idempotent() {
        let filter = default_filter();
        let once = filter.apply("card 4111-1111-1111-1111, mail alice@example.com");
        let twice = filter.apply(&once);
        assert_eq!(twice, once, "second pass over filtered text must be a no-op");
    }

    #[test]
    fn profanity_off_by_default() {
        let filter = default_filter();
        let text = "well damn that took a while";
        assert_eq!(filter.apply(text), text);
    }

    #[test]
    fn profanity_substitution_when_enabled() {
        let filter = ContentFilter::new(FilterConfig {
            filter_profanity: true,
            ..FilterConfig::default()
        });
        let out = filter.apply("well damn that took a while");
        assert_eq!(out, format!("well {PROFANITY_PLACEHOLDER} that took a while"));
    }

    #[test]
    fn profanity_respects_word_boundaries() {
        let filter = ContentFilter::new(FilterConfig {
            filter_profanity: true,
            ..FilterConfig::default()
        });
        // "hello" contains "hell" but is not a match
        assert_eq!(filter.apply("hello there"), "hello there");
    }

    #[test]
    fn disabled_filter_passes_everything_through() {
        let filter = ContentFilter::new(FilterConfig::disabled());
        assert!(!filter.is_active());
        let text = "4111-1111-1111-1111 alice@example.com damn";
        assert_eq!(filter.apply(text), text);
    }

    #[test]
    fn card_like_email_local_part_redacts_as_email() {
        let filter = default_filter();
        let out = filter.apply("1111111111111@example.com");
        assert_eq!(out, EMAIL_PLACEHOLDER.to_string());
    }
}
