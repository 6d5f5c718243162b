use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use penny_core::domain::dataset::DatasetHandle;
use penny_core::domain::turn::Route;
use penny_core::routing::{lexical_route, LexicalDecision};

use crate::llm::LlmClient;

/// Routing decision for one user message, with a flag set when the
/// classifier had to fall back because its LLM consult failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub route: Route,
    pub degraded: bool,
}

impl Classification {
    fn clean(route: Route) -> Self {
        Self { route, degraded: false }
    }

    fn degraded() -> Self {
        Self { route: Route::Conversation, degraded: true }
    }
}

/// Decides, per message, whether to reason conversationally or delegate to
/// CSV analysis. Deterministic rules first; the LLM is only consulted for
/// ambiguous messages, under a timeout, and any failure there degrades to
/// the conversational path rather than blocking the turn.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, llm_timeout: Duration) -> Self {
        Self { llm, llm_timeout }
    }

    pub async fn classify(
        &self,
        user_text: &str,
        active_dataset: Option<&DatasetHandle>,
    ) -> Classification {
        // Nothing to analyze without a dataset.
        let Some(dataset) = active_dataset else {
            return Classification::clean(Route::Conversation);
        };

        match lexical_route(user_text, &dataset.column_names) {
            LexicalDecision::Conversation => Classification::clean(Route::Conversation),
            LexicalDecision::Analysis => Classification::clean(Route::Analysis),
            LexicalDecision::Ambiguous => self.consult_llm(user_text).await,
        }
    }

    async fn consult_llm(&self, user_text: &str) -> Classification {
        let prompt = format!(
            "Does the following message ask to analyze or process a CSV file containing \
expenses or blockchain transactions? Respond only with 'true' or 'false'.\nMessage: {user_text}"
        );

        match tokio::time::timeout(self.llm_timeout, self.llm.complete(&prompt)).await {
            Ok(Ok(response)) => {
                let verdict = response.to_ascii_lowercase();
                debug!(
                    event_name = "classifier.llm_verdict",
                    verdict = %verdict.trim(),
                    "ambiguous message classified by llm"
                );
                if verdict.contains("true") {
                    Classification::clean(Route::Analysis)
                } else {
                    Classification::clean(Route::Conversation)
                }
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "classifier.llm_failed",
                    error = %error,
                    "classifier llm consult failed, defaulting to conversation"
                );
                Classification::degraded()
            }
            Err(_) => {
                warn!(
                    event_name = "classifier.llm_timeout",
                    timeout_secs = self.llm_timeout.as_secs(),
                    "classifier llm consult timed out, defaulting to conversation"
                );
                Classification::degraded()
            }
        }
    }
}
