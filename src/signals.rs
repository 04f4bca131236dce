use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ExtractedSignals;

/// "language code <code> ... detected", any case
static LANGUAGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\blanguage code ([a-z]{1,8})\b.*?\bdetected\b").expect("valid language pattern")
});

/// "extracted user intents: <list>"
static INTENTS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"extracted user intents: (.+)").expect("valid intents pattern"));

const INTENT_DELIMITERS: &[char] = &[',', ';', '|'];
const LIST_DECORATION: &[char] = &['[', ']', '\'', '"', '(', ')', ' '];

/// Lower-cased language code, if the message announces one
pub fn detect_language(message: &str) -> Option<String> {
    LANGUAGE_PATTERN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|code| code.as_str().to_ascii_lowercase())
}

/// Intent names in the order they were logged; empty when the pattern is absent
pub fn extract_intents(message: &str) -> Vec<String> {
    let Some(list) = INTENTS_PATTERN.captures(message).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };

    list.as_str()
        .split(INTENT_DELIMITERS)
        .map(|name| name.trim().trim_matches(LIST_DECORATION))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn extract(message: &str) -> ExtractedSignals {
    ExtractedSignals {
        language: detect_language(message),
        intents: extract_intents(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detected_by_model() {
        assert_eq!(
            detect_language("language code en detected by gpt-4o."),
            Some("en".to_string())
        );
    }

    #[test]
    fn test_language_with_text_between() {
        assert_eq!(
            detect_language("Language Code ES was finally DETECTED"),
            Some("es".to_string())
        );
    }

    #[test]
    fn test_language_requires_detected() {
        assert_eq!(detect_language("language code fr requested"), None);
        assert_eq!(detect_language("text message from abc received."), None);
    }

    #[test]
    fn test_single_intent() {
        assert_eq!(
            extract_intents("extracted user intents: clear-dev-agentic-mcp"),
            vec!["clear-dev-agentic-mcp"]
        );
    }

    #[test]
    fn test_intent_list_is_trimmed_and_ordered() {
        assert_eq!(
            extract_intents("extracted user intents: get-passage-summary, , translate-scripture ,help"),
            vec!["get-passage-summary", "translate-scripture", "help"]
        );
    }

    #[test]
    fn test_bracketed_intent_list() {
        assert_eq!(
            extract_intents("extracted user intents: ['retrieve-scripture', 'get-translation-helps']"),
            vec!["retrieve-scripture", "get-translation-helps"]
        );
    }

    #[test]
    fn test_no_intents() {
        assert!(extract_intents("language code en detected").is_empty());
        assert!(extract_intents("extracted user intents: ").is_empty());
    }

    #[test]
    fn test_both_rules_can_fire() {
        let signals = extract("language code pt detected; extracted user intents: greet");
        assert_eq!(signals.language.as_deref(), Some("pt"));
        assert_eq!(signals.intents, vec!["greet"]);

        assert!(extract("nothing to see").is_empty());
    }
}
