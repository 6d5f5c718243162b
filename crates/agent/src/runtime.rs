//! Turn orchestration.
//!
//! One orchestrator owns the whole message lifecycle: number the turn,
//! retrieve context, classify, execute the chosen route, persist, and index
//! the exchange for future retrieval. `submit` never returns an error to
//! the caller; every failure downstream degrades into a persona reply with
//! diagnostic metadata on the turn.
//!
//! Sessions are isolated: each one has its own active dataset and turn
//! counter, and submits within a session run one at a time.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use penny_core::config::RetrievalConfig;
use penny_core::domain::dataset::{row_excerpts, summarize_csv, DatasetHandle, DatasetId};
use penny_core::domain::fragment::{FragmentMetadata, FragmentSource};
use penny_core::domain::turn::{
    Route, SessionId, Turn, TurnId, TurnPhase, TurnProgress, META_CLASSIFIER_DEGRADED,
    META_NOT_DURABLY_PERSISTED,
};
use penny_core::errors::ApplicationError;
use penny_core::persona::PersonaProfile;
use penny_core::routing::{lexical_route, LexicalDecision};
use penny_db::repositories::{ContextStore, DatasetRepository, TurnRepository};

use crate::classifier::IntentClassifier;
use crate::executor::{AnalysisExecutor, ConversationExecutor, ExecutionOutcome};

pub struct TurnOrchestrator {
    classifier: IntentClassifier,
    conversation: ConversationExecutor,
    analysis: AnalysisExecutor,
    persona: PersonaProfile,
    turns: Arc<dyn TurnRepository>,
    datasets: Arc<dyn DatasetRepository>,
    context: Arc<dyn ContextStore>,
    retrieval: RetrievalConfig,
    spool_dir: PathBuf,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

/// Per-session mutable state. The lock on a session's state is held for
/// the whole of `submit`, so turns within one session are processed and
/// persisted strictly one after another, and the dataset one session
/// activates is invisible to every other session.
#[derive(Default)]
struct SessionState {
    active_dataset: Option<DatasetHandle>,
    // Seeded lazily from the repository so numbering stays monotonic
    // across restarts.
    next_turn_number: Option<u32>,
}

impl TurnOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: IntentClassifier,
        conversation: ConversationExecutor,
        analysis: AnalysisExecutor,
        persona: PersonaProfile,
        turns: Arc<dyn TurnRepository>,
        datasets: Arc<dyn DatasetRepository>,
        context: Arc<dyn ContextStore>,
        retrieval: RetrievalConfig,
        spool_dir: PathBuf,
    ) -> Self {
        Self {
            classifier,
            conversation,
            analysis,
            persona,
            turns,
            datasets,
            context,
            retrieval,
            spool_dir,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Process one user message end to end and return the completed turn.
    /// Infallible from the caller's perspective: degraded paths produce a
    /// persona reply and flag the turn instead of surfacing an error.
    pub async fn submit(&self, session_id: &SessionId, user_text: &str) -> Turn {
        let state = self.session_state(session_id).await;
        let mut state = state.lock().await;

        let turn_id = TurnId(Uuid::new_v4().to_string());
        let timestamp = Utc::now();
        let turn_number = self.claim_turn_number(session_id, &mut state).await;
        let mut progress = TurnProgress::default();

        // Retrieval must see only prior turns, so it runs before this
        // exchange is indexed.
        let retrieved = match self.context.query(user_text, self.retrieval.top_k).await {
            Ok(hits) => hits,
            Err(error) => {
                warn!(
                    event_name = "turn.retrieval_failed",
                    error = %error,
                    "context retrieval failed, continuing without context"
                );
                Vec::new()
            }
        };

        let active = state.active_dataset.clone();
        let classification = self.classifier.classify(user_text, active.as_ref()).await;
        advance(&mut progress, TurnPhase::Classified);

        let outcome = match classification.route {
            Route::Analysis => {
                advance(&mut progress, TurnPhase::AwaitingAnalysis);
                match &active {
                    Some(dataset) => self.analysis.respond(user_text, dataset).await,
                    // The classifier only routes to analysis with a dataset
                    // loaded; this arm is a belt-and-braces reply.
                    None => ExecutionOutcome {
                        reply_text: self.persona.upload_required_reply(),
                        analysis: None,
                        metadata: BTreeMap::new(),
                    },
                }
            }
            Route::Conversation => {
                advance(&mut progress, TurnPhase::AwaitingLlm);
                if active.is_none()
                    && lexical_route(user_text, &[]) == LexicalDecision::Analysis
                {
                    // Clear analytical intent with nothing to analyze: ask
                    // for an upload instead of wasting an LLM round trip.
                    ExecutionOutcome {
                        reply_text: self.persona.upload_required_reply(),
                        analysis: None,
                        metadata: BTreeMap::new(),
                    }
                } else {
                    self.conversation.respond(user_text, &retrieved).await
                }
            }
        };
        advance(&mut progress, TurnPhase::Composed);

        let mut metadata = outcome.metadata;
        if classification.degraded {
            metadata.insert(META_CLASSIFIER_DEGRADED.to_string(), "true".to_string());
        }

        // Route is derived from what actually happened, so the turn
        // invariant holds by construction.
        let route_taken =
            if outcome.analysis.is_some() { Route::Analysis } else { Route::Conversation };
        let retrieved_ids = retrieved.iter().map(|hit| hit.id.clone()).collect::<Vec<_>>();

        let mut turn = match Turn::new(
            turn_id.clone(),
            session_id.clone(),
            turn_number,
            timestamp,
            user_text.to_string(),
            route_taken,
            outcome.reply_text.clone(),
            outcome.analysis,
            retrieved_ids,
            metadata,
        ) {
            Ok(turn) => turn,
            Err(error) => {
                warn!(
                    event_name = "turn.invariant_repair",
                    error = %error,
                    "turn construction failed, recording as conversational"
                );
                Turn {
                    id: turn_id,
                    session_id: session_id.clone(),
                    turn_number,
                    timestamp,
                    user_text: user_text.to_string(),
                    route_taken: Route::Conversation,
                    reply_text: outcome.reply_text,
                    analysis: None,
                    retrieved_context: Vec::new(),
                    metadata: BTreeMap::new(),
                }
            }
        };

        self.index_exchange(&turn).await;

        if let Err(error) = self.turns.save(turn.clone()).await {
            warn!(
                event_name = "turn.persist_failed",
                session_id = %turn.session_id.0,
                turn_number = turn.turn_number,
                error = %error,
                "turn could not be saved, returning it flagged"
            );
            turn.metadata.insert(META_NOT_DURABLY_PERSISTED.to_string(), "true".to_string());
        } else {
            advance(&mut progress, TurnPhase::Persisted);
        }

        info!(
            event_name = "turn.completed",
            session_id = %turn.session_id.0,
            turn_number = turn.turn_number,
            route = turn.route_taken.as_str(),
            phase = ?progress.phase(),
            "turn completed"
        );
        turn
    }

    /// Validate, spool, and index an uploaded CSV. Re-uploading under an
    /// existing name retires the old fragments before the new rows are
    /// indexed, so stale data can never outrank fresh data.
    pub async fn upload_dataset(
        &self,
        session_id: &SessionId,
        name: &str,
        content: &str,
    ) -> Result<DatasetHandle, ApplicationError> {
        let state = self.session_state(session_id).await;
        let mut state = state.lock().await;

        let summary = summarize_csv(content)?;

        let id = DatasetId(Uuid::new_v4().to_string());
        let path = self.spool_dir.join(format!("{}-{}.csv", sanitize_name(name), id.0));
        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|error| ApplicationError::Integration(format!("spool dir: {error}")))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|error| ApplicationError::Integration(format!("spool write: {error}")))?;

        let retired = self
            .context
            .retire_dataset(name)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        let handle = DatasetHandle {
            id,
            name: name.to_string(),
            row_count: summary.row_count,
            column_names: summary.column_names,
            path,
            uploaded_at: Utc::now(),
        };
        self.datasets
            .save(handle.clone())
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        for excerpt in row_excerpts(content, self.retrieval.rows_per_excerpt) {
            self.context
                .upsert(
                    &excerpt.text,
                    FragmentSource::Dataset,
                    FragmentMetadata::for_dataset(name, excerpt.row_start, excerpt.row_end),
                )
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        }

        info!(
            event_name = "dataset.uploaded",
            dataset = %handle.name,
            rows = handle.row_count,
            retired_fragments = retired,
            "dataset spooled and indexed"
        );

        state.active_dataset = Some(handle.clone());
        Ok(handle)
    }

    pub async fn history(&self, session_id: &SessionId) -> Result<Vec<Turn>, ApplicationError> {
        self.turns
            .list_session(session_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))
    }

    pub async fn active_dataset(&self, session_id: &SessionId) -> Option<DatasetHandle> {
        self.session_state(session_id).await.lock().await.active_dataset.clone()
    }

    /// Restore a session's active dataset from a previously saved handle,
    /// e.g. on process restart.
    pub async fn activate_dataset(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<DatasetHandle, ApplicationError> {
        let handle = self
            .datasets
            .find_active_by_name(name)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| ApplicationError::DatasetNotFound(name.to_string()))?;
        self.session_state(session_id).await.lock().await.active_dataset = Some(handle.clone());
        Ok(handle)
    }

    async fn session_state(&self, session_id: &SessionId) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id.0.clone()).or_default().clone()
    }

    async fn claim_turn_number(&self, session_id: &SessionId, state: &mut SessionState) -> u32 {
        let next = match state.next_turn_number {
            Some(cached) => cached,
            None => match self.turns.next_turn_number(session_id).await {
                Ok(next) => next,
                Err(error) => {
                    warn!(
                        event_name = "turn.number_seed_failed",
                        session_id = %session_id.0,
                        error = %error,
                        "could not seed turn numbering from the repository"
                    );
                    1
                }
            },
        };
        state.next_turn_number = Some(next + 1);
        next
    }

    /// Index both sides of a completed exchange for future retrieval.
    /// Failures are logged, not fatal: a turn that cannot be indexed is
    /// still a valid turn.
    async fn index_exchange(&self, turn: &Turn) {
        let user_meta = FragmentMetadata::for_chat(
            &turn.session_id.0,
            &turn.id.0,
            turn.turn_number,
            "user",
        );
        if let Err(error) =
            self.context.upsert(&turn.user_text, FragmentSource::Chat, user_meta).await
        {
            warn!(event_name = "turn.index_failed", side = "user", error = %error, "fragment upsert failed");
        }

        let reply_meta = FragmentMetadata::for_chat(
            &turn.session_id.0,
            &turn.id.0,
            turn.turn_number,
            "assistant",
        );
        if let Err(error) =
            self.context.upsert(&turn.reply_text, FragmentSource::Chat, reply_meta).await
        {
            warn!(event_name = "turn.index_failed", side = "assistant", error = %error, "fragment upsert failed");
        }
    }
}

fn advance(progress: &mut TurnProgress, next: TurnPhase) {
    if let Err(error) = progress.advance_to(next) {
        warn!(event_name = "turn.phase_skew", error = %error, "unexpected phase transition");
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();
    if cleaned.is_empty() {
        "dataset".to_string()
    } else {
        cleaned
    }
}
