//! Penny persona and prompt assembly.
//!
//! The prompt builder is a pure function of its inputs: preamble first,
//! retrieved context by descending score under a character budget, then the
//! user message, which is never dropped.

use serde::{Deserialize, Serialize};

use crate::domain::fragment::ScoredFragment;

const DEFAULT_PREAMBLE: &str = "You are Penny, a friendly, respectful, and helpful AI assistant \
for crypto-based accounting firms. Your tone is enthusiastic, warm, and professional, always \
using PG-appropriate language. Stay on topic: accounting, bookkeeping, crypto transactions, and \
relevant finance topics. Never give speculative investment advice, always maintain user \
confidentiality, and defer transaction processing to the external analysis tool. Greet users \
warmly, clarify unclear requests politely, and keep answers concise and accurate. Decline \
off-topic or inappropriate requests and steer the conversation back to accounting.";

/// The fixed tone/style/scope contract applied to all replies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub name: String,
    pub preamble: String,
}

impl Default for PersonaProfile {
    fn default() -> Self {
        Self { name: "Penny".to_string(), preamble: DEFAULT_PREAMBLE.to_string() }
    }
}

impl PersonaProfile {
    /// Canned reply when the language model is unreachable after retry.
    pub fn llm_unavailable_reply(&self) -> String {
        format!(
            "I'm so sorry, I'm having trouble reaching my reasoning service right now. \
Please give me a moment and try again — I'll be right here. — {}",
            self.name
        )
    }

    /// Persona-voiced explanation for a failed or malformed analysis run.
    pub fn analysis_failed_reply(&self) -> String {
        format!(
            "I'm sorry, I couldn't complete the analysis of your file this time. \
Nothing is lost — your data is still loaded, so feel free to rephrase or try again. — {}",
            self.name
        )
    }

    /// Persona-voiced explanation for an analysis that ran out of time.
    pub fn analysis_timeout_reply(&self) -> String {
        format!(
            "I'm sorry, the analysis took longer than I allow and I had to stop it. \
A narrower question (for example one month or one asset) usually finishes quickly. — {}",
            self.name
        )
    }

    /// Reply when the user asks for analysis but no dataset is loaded.
    pub fn upload_required_reply(&self) -> String {
        "Please upload a CSV file first so I have transactions to work with.".to_string()
    }

    /// Weave a successful analysis payload into the persona voice.
    pub fn analysis_success_reply(&self, output_text: &str) -> String {
        format!("Great news — the analysis is done! Here's what I found:\n{output_text}")
    }
}

/// Deterministic prompt assembly for the conversational executor.
#[derive(Clone, Debug)]
pub struct PersonaPromptBuilder {
    persona: PersonaProfile,
    context_budget_chars: usize,
}

impl PersonaPromptBuilder {
    pub fn new(persona: PersonaProfile, context_budget_chars: usize) -> Self {
        Self { persona, context_budget_chars }
    }

    pub fn persona(&self) -> &PersonaProfile {
        &self.persona
    }

    /// Compose preamble, ranked context, and the user message. Fragments are
    /// taken in descending score order until the character budget is spent;
    /// the user message is always included regardless of budget.
    pub fn build(&self, user_text: &str, retrieved: &[ScoredFragment]) -> String {
        let mut ranked = retrieved.to_vec();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut context = String::new();
        let mut spent = 0usize;
        for fragment in &ranked {
            let len = fragment.text.chars().count();
            if spent + len > self.context_budget_chars {
                continue;
            }
            spent += len;
            context.push_str("- ");
            context.push_str(&fragment.text);
            context.push('\n');
        }

        let mut prompt = String::new();
        prompt.push_str(&self.persona.preamble);
        prompt.push_str("\n\n");
        if !context.is_empty() {
            prompt.push_str("Relevant context:\n");
            prompt.push_str(&context);
            prompt.push('\n');
        }
        prompt.push_str("User: ");
        prompt.push_str(user_text);
        prompt.push_str(&format!("\n{}:", self.persona.name));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::fragment::{FragmentId, FragmentMetadata, ScoredFragment};

    use super::{PersonaProfile, PersonaPromptBuilder};

    fn fragment(id: &str, score: f32, text: &str) -> ScoredFragment {
        ScoredFragment {
            id: FragmentId(id.to_string()),
            score,
            text: text.to_string(),
            metadata: FragmentMetadata::default(),
        }
    }

    #[test]
    fn prompt_orders_sections_and_ranks_context() {
        let builder = PersonaPromptBuilder::new(PersonaProfile::default(), 500);
        let prompt = builder.build(
            "what did I ask before?",
            &[fragment("f1", 0.2, "older note"), fragment("f2", 0.9, "newer note")],
        );

        let preamble_pos = prompt.find("You are Penny").expect("preamble");
        let newer_pos = prompt.find("newer note").expect("high-score fragment");
        let older_pos = prompt.find("older note").expect("low-score fragment");
        let user_pos = prompt.find("User: what did I ask before?").expect("user message");
        assert!(preamble_pos < newer_pos);
        assert!(newer_pos < older_pos);
        assert!(older_pos < user_pos);
        assert!(prompt.trim_end().ends_with("Penny:"));
    }

    #[test]
    fn budget_drops_lowest_ranked_fragments_first() {
        let builder = PersonaPromptBuilder::new(PersonaProfile::default(), 15);
        let prompt = builder.build(
            "hello",
            &[fragment("f1", 0.9, "keep this one"), fragment("f2", 0.1, "this fragment is far too long to fit")],
        );

        assert!(prompt.contains("keep this one"));
        assert!(!prompt.contains("far too long"));
    }

    #[test]
    fn user_message_survives_zero_budget() {
        let builder = PersonaPromptBuilder::new(PersonaProfile::default(), 0);
        let prompt = builder.build("am I still here?", &[fragment("f1", 1.0, "context")]);
        assert!(prompt.contains("User: am I still here?"));
        assert!(!prompt.contains("Relevant context"));
    }
}
