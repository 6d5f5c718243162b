//! Reply composition for the two routes.
//!
//! Both executors resolve to an [`ExecutionOutcome`] rather than an error:
//! whatever goes wrong downstream, the turn still gets a persona-voiced
//! reply and diagnostic metadata for the operator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use penny_core::domain::analysis::{AnalysisResult, AnalysisStatus};
use penny_core::domain::dataset::DatasetHandle;
use penny_core::domain::fragment::ScoredFragment;
use penny_core::domain::turn::{META_DIAGNOSTIC, META_LLM_FALLBACK};
use penny_core::persona::{PersonaProfile, PersonaPromptBuilder};

use crate::delegate::AnalysisRunner;
use crate::llm::LlmClient;

/// What an executor produced for one turn: the reply text plus whatever
/// the orchestrator needs to record alongside it.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub reply_text: String,
    pub analysis: Option<AnalysisResult>,
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionOutcome {
    fn reply(reply_text: String) -> Self {
        Self { reply_text, analysis: None, metadata: BTreeMap::new() }
    }
}

/// Conversational route: persona prompt to the LLM, bounded by a timeout,
/// with one retry. If both attempts fail the canned unavailable reply goes
/// out and the turn is flagged instead of erroring.
pub struct ConversationExecutor {
    llm: Arc<dyn LlmClient>,
    prompts: PersonaPromptBuilder,
    llm_timeout: Duration,
    max_retries: u32,
}

impl ConversationExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: PersonaPromptBuilder,
        llm_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self { llm, prompts, llm_timeout, max_retries }
    }

    pub async fn respond(&self, user_text: &str, retrieved: &[ScoredFragment]) -> ExecutionOutcome {
        let prompt = self.prompts.build(user_text, retrieved);

        let mut attempt = 0u32;
        loop {
            match tokio::time::timeout(self.llm_timeout, self.llm.complete(&prompt)).await {
                Ok(Ok(reply)) if !reply.trim().is_empty() => {
                    return ExecutionOutcome::reply(reply);
                }
                Ok(Ok(_)) => {
                    warn!(event_name = "conversation.empty_reply", attempt, "llm returned an empty reply");
                }
                Ok(Err(error)) => {
                    warn!(event_name = "conversation.llm_failed", attempt, error = %error, "llm call failed");
                }
                Err(_) => {
                    warn!(
                        event_name = "conversation.llm_timeout",
                        attempt,
                        timeout_secs = self.llm_timeout.as_secs(),
                        "llm call timed out"
                    );
                }
            }

            if attempt >= self.max_retries {
                let mut outcome =
                    ExecutionOutcome::reply(self.prompts.persona().llm_unavailable_reply());
                outcome.metadata.insert(META_LLM_FALLBACK.to_string(), "true".to_string());
                return outcome;
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
        }
    }
}

/// Analysis route: delegate to the subprocess runner and translate the
/// structured result into the persona voice.
pub struct AnalysisExecutor {
    runner: Arc<dyn AnalysisRunner>,
    persona: PersonaProfile,
}

impl AnalysisExecutor {
    pub fn new(runner: Arc<dyn AnalysisRunner>, persona: PersonaProfile) -> Self {
        Self { runner, persona }
    }

    pub async fn respond(&self, user_text: &str, dataset: &DatasetHandle) -> ExecutionOutcome {
        let analysis = self.runner.run(dataset, user_text).await;

        let mut metadata = BTreeMap::new();
        let reply_text = match analysis.status {
            AnalysisStatus::Success => {
                let output = analysis.output_text.as_deref().unwrap_or_default();
                self.persona.analysis_success_reply(output)
            }
            AnalysisStatus::Failed => {
                if let Some(detail) = &analysis.error_detail {
                    metadata.insert(META_DIAGNOSTIC.to_string(), detail.clone());
                }
                self.persona.analysis_failed_reply()
            }
            AnalysisStatus::Timeout => self.persona.analysis_timeout_reply(),
        };

        info!(
            event_name = "analysis.composed",
            status = analysis.status.as_str(),
            duration_ms = analysis.duration_ms,
            dataset = %dataset.name,
            "analysis reply composed"
        );

        ExecutionOutcome { reply_text, analysis: Some(analysis), metadata }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use penny_core::domain::analysis::{AnalysisResult, AnalysisStatus};
    use penny_core::domain::dataset::{DatasetHandle, DatasetId};
    use penny_core::domain::turn::{META_DIAGNOSTIC, META_LLM_FALLBACK};
    use penny_core::persona::{PersonaProfile, PersonaPromptBuilder};

    use crate::delegate::AnalysisRunner;
    use crate::llm::{LlmClient, LlmError};

    use super::{AnalysisExecutor, ConversationExecutor};

    struct FlakyLlm {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl LlmClient for FlakyLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(LlmError::Transport("connection reset".to_string()))
            } else {
                Ok("Happy to help!".to_string())
            }
        }
    }

    struct FixedRunner {
        result: AnalysisResult,
    }

    #[async_trait]
    impl AnalysisRunner for FixedRunner {
        async fn run(&self, _dataset: &DatasetHandle, _user_text: &str) -> AnalysisResult {
            self.result.clone()
        }
    }

    fn conversation(fail_first: u32) -> ConversationExecutor {
        ConversationExecutor::new(
            Arc::new(FlakyLlm { calls: AtomicU32::new(0), fail_first }),
            PersonaPromptBuilder::new(PersonaProfile::default(), 1000),
            Duration::from_millis(500),
            1,
        )
    }

    fn dataset() -> DatasetHandle {
        DatasetHandle {
            id: DatasetId("D-1".to_string()),
            name: "ledger".to_string(),
            row_count: 3,
            column_names: vec!["date".to_string(), "amount".to_string()],
            path: PathBuf::from("/tmp/ledger.csv"),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let outcome = conversation(0).respond("hello", &[]).await;
        assert_eq!(outcome.reply_text, "Happy to help!");
        assert!(outcome.metadata.is_empty());
        assert!(outcome.analysis.is_none());
    }

    #[tokio::test]
    async fn one_transport_failure_is_retried() {
        let outcome = conversation(1).respond("hello", &[]).await;
        assert_eq!(outcome.reply_text, "Happy to help!");
        assert!(!outcome.metadata.contains_key(META_LLM_FALLBACK));
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_canned_reply() {
        let outcome = conversation(5).respond("hello", &[]).await;
        assert!(outcome.reply_text.contains("trouble reaching"));
        assert_eq!(outcome.metadata.get(META_LLM_FALLBACK).map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn successful_analysis_is_woven_into_persona_voice() {
        let executor = AnalysisExecutor::new(
            Arc::new(FixedRunner { result: AnalysisResult::success("Total fees: 12.5".to_string(), 40) }),
            PersonaProfile::default(),
        );
        let outcome = executor.respond("calculate total fees", &dataset()).await;
        assert!(outcome.reply_text.contains("Great news"));
        assert!(outcome.reply_text.contains("Total fees: 12.5"));
        assert_eq!(outcome.analysis.as_ref().map(|a| a.status), Some(AnalysisStatus::Success));
    }

    #[tokio::test]
    async fn failed_analysis_keeps_detail_in_metadata_not_reply() {
        let executor = AnalysisExecutor::new(
            Arc::new(FixedRunner {
                result: AnalysisResult::failed("bad row 7".to_string(), Some(3), 40),
            }),
            PersonaProfile::default(),
        );
        let outcome = executor.respond("calculate total fees", &dataset()).await;
        assert!(!outcome.reply_text.contains("bad row 7"));
        assert_eq!(outcome.metadata.get(META_DIAGNOSTIC).map(String::as_str), Some("bad row 7"));
    }

    #[tokio::test]
    async fn timed_out_analysis_suggests_narrower_question() {
        let executor = AnalysisExecutor::new(
            Arc::new(FixedRunner { result: AnalysisResult::timeout(60_000) }),
            PersonaProfile::default(),
        );
        let outcome = executor.respond("calculate everything", &dataset()).await;
        assert!(outcome.reply_text.contains("narrower question"));
        assert_eq!(outcome.analysis.as_ref().map(|a| a.status), Some(AnalysisStatus::Timeout));
    }
}
