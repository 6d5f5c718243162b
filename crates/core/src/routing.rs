//! Lexical routing rules for incoming user messages.
//!
//! The rules are deterministic and explainable: small-talk phrases always
//! stay conversational, strong analytical vocabulary routes to the CSV
//! analysis path, and everything else is declared ambiguous so a caller can
//! consult the language model with a short classification prompt.

use crate::domain::turn::Route;

/// Outcome of the deterministic rule pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LexicalDecision {
    Conversation,
    Analysis,
    Ambiguous,
}

impl LexicalDecision {
    pub fn into_route(self) -> Option<Route> {
        match self {
            Self::Conversation => Some(Route::Conversation),
            Self::Analysis => Some(Route::Analysis),
            Self::Ambiguous => None,
        }
    }
}

const SMALL_TALK_PHRASES: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "how are you",
    "who are you",
    "what can you do",
    "help",
    "thanks",
    "thank you",
    "about you",
    "what is this",
    "explain yourself",
    "your name",
    "good morning",
    "good afternoon",
    "good evening",
];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "calculate",
    "total",
    "gain",
    "gains",
    "loss",
    "losses",
    "cost basis",
    "export",
    "categorize",
    "summarize",
    "tag",
    "label",
    "expense",
    "expenses",
    "parse",
    "process",
    "analyze",
    "extract",
    "receipt",
    "lookup",
    "transactions",
    "fees",
    "hash",
];

const ACTION_VERBS: &[&str] = &["process", "analyze", "extract", "get", "parse", "calculate"];
const TARGET_NOUNS: &[&str] = &["transactions", "data", "events", "records", "rows", "columns"];
const CSV_CONTEXT: &[&str] =
    &["from the csv", "in the csv", "from this file", "this data", "uploaded file"];

/// Substring matching with word boundaries, so "hi" does not fire inside
/// "this" and "tag" does not fire inside "stage".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let mut start = 0;
    while let Some(offset) = text[start..].find(phrase) {
        let begin = start + offset;
        let end = begin + phrase.len();
        let boundary_before =
            begin == 0 || !text[..begin].ends_with(|c: char| c.is_ascii_alphanumeric());
        let boundary_after =
            end == text.len() || !text[end..].starts_with(|c: char| c.is_ascii_alphanumeric());
        if boundary_before && boundary_after {
            return true;
        }
        start = begin + 1;
    }
    false
}

/// Classify a message with lexical/structural rules alone. Column names of
/// the active dataset sharpen the "explicit column reference" check.
pub fn lexical_route(user_text: &str, column_names: &[String]) -> LexicalDecision {
    let text = user_text.to_ascii_lowercase();

    if SMALL_TALK_PHRASES.iter().any(|phrase| contains_phrase(&text, phrase)) {
        return LexicalDecision::Conversation;
    }

    if ANALYSIS_KEYWORDS.iter().any(|keyword| contains_phrase(&text, keyword)) {
        return LexicalDecision::Analysis;
    }

    // Contextual scoring: verb + noun + csv-context phrasing. Two of three
    // is strong enough evidence to route without the LLM.
    let mut context_score = 0;
    if ACTION_VERBS.iter().any(|verb| contains_phrase(&text, verb)) {
        context_score += 1;
    }
    if TARGET_NOUNS.iter().any(|noun| contains_phrase(&text, noun)) {
        context_score += 1;
    }
    if CSV_CONTEXT.iter().any(|phrase| contains_phrase(&text, phrase)) {
        context_score += 1;
    }
    if context_score >= 2 {
        return LexicalDecision::Analysis;
    }

    // A numeric value alongside a known column name is an explicit data
    // reference, e.g. "amount above 500".
    let mentions_column = column_names
        .iter()
        .any(|column| !column.is_empty() && contains_phrase(&text, &column.to_ascii_lowercase()));
    if mentions_column && text.chars().any(|character| character.is_ascii_digit()) {
        return LexicalDecision::Analysis;
    }

    LexicalDecision::Ambiguous
}

/// Reduce a user message to a short imperative instruction for the analysis
/// subprocess: strip polite framing, keep the first sentence, cap length.
pub fn simplify_request(user_text: &str) -> String {
    let mut text = user_text.trim().to_string();

    let lowered = text.to_ascii_lowercase();
    for prefix in ["please ", "can you ", "could you ", "would you ", "kindly ", "hey ", "hi "] {
        if lowered.starts_with(prefix) {
            text = text[prefix.len()..].trim_start().to_string();
            break;
        }
    }
    // Trailing punctuation hides the politeness suffix ("..., thanks."),
    // so trim it before matching and again after stripping.
    let kept = text.trim_end_matches(['.', '!', ',']).len();
    text.truncate(kept);
    for suffix in [" please", " thanks", " thank you"] {
        let lowered = text.to_ascii_lowercase();
        if let Some(stripped) = lowered.strip_suffix(suffix) {
            text.truncate(stripped.len());
            break;
        }
    }
    let text = text.trim_end_matches(['.', '!', ',']).trim();

    let first_sentence = text.split(". ").next().unwrap_or(text);
    let mut simplified = first_sentence.chars().take(120).collect::<String>();

    if !ANALYSIS_KEYWORDS.iter().any(|keyword| simplified.to_ascii_lowercase().contains(keyword)) {
        simplified = "Process transactions in the uploaded CSV".to_string();
    }
    simplified
}
