//! Keyword/pattern intent classification, used when the model's output is
//! unusable.
//!
//! Rules are checked in order; the first match wins. Arithmetic comes before
//! the knowledge rule so that "what is 15 + 27" runs the calculator.

use cortex_common::{ClassificationSource, IntentType, QueryIntent};
use once_cell::sync::Lazy;
use regex::Regex;

pub const HEURISTIC_CONFIDENCE: f32 = 0.3;
pub const HEURISTIC_REASONING: &str = "fallback heuristic";

static ARITHMETIC: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\d\s*(?:[-+*/%^×÷−]|\bplus\b|\bminus\b|\btimes\b|\bmultiplied by\b|\bdivided by\b|\bmod(?:ulo)?\b)\s*[-(]?\s*\d",
    )
    .ok()
});

static UNIT_WORDS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:convert|conversion|km|kilometers?|kilometres?|miles?|meters?|metres?|cm|mm|feet|foot|ft|inch(?:es)?|kg|kilograms?|grams?|lbs?|pounds?|ounces?|oz|celsius|fahrenheit|kelvin|liters?|litres?|gallons?|mph|kph)\b",
    )
    .ok()
});

static URL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"https?://\S+").ok());

static RECALL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:remember\w*|recall\w*|remind\w*)\b").ok());

static PERSONAL_OR_PAST: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:i|me|my|mine|we|us|our|did|was|were|said|told|mentioned|asked|talked|discussed|\w+ed)\b",
    )
    .ok()
});

static KNOWLEDGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:what\s+is|what's|what\s+are|explain|how\s+does|how\s+do)\b").ok()
});

fn matches(pattern: &Lazy<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Classify `query` with keyword rules alone.
pub fn classify(query: &str) -> QueryIntent {
    let (intent_type, tools): (IntentType, &[&str]) = if matches(&ARITHMETIC, query) {
        (IntentType::ToolExecution, &["calculator"])
    } else if matches(&URL, query) {
        (IntentType::ToolExecution, &["http_fetch"])
    } else if matches(&UNIT_WORDS, query) && query.chars().any(|c| c.is_ascii_digit()) {
        (IntentType::ToolExecution, &[])
    } else if matches(&RECALL, query) && matches(&PERSONAL_OR_PAST, query) {
        (IntentType::MemoryChat, &[])
    } else if matches(&KNOWLEDGE, query) {
        (IntentType::KnowledgeSearch, &[])
    } else {
        (IntentType::Conversation, &[])
    };

    QueryIntent::new(intent_type, HEURISTIC_CONFIDENCE)
        .with_tools(tools.iter().copied())
        .with_reasoning(HEURISTIC_REASONING)
        .with_source(ClassificationSource::Heuristic)
}
