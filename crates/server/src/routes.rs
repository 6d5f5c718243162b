//! JSON API for the conversational core.
//!
//! Endpoints:
//! - `POST /api/sessions/{session_id}/messages`        — submit a user message, get the turn
//! - `GET  /api/sessions/{session_id}/turns`           — ordered session history
//! - `POST /api/sessions/{session_id}/datasets`        — upload a CSV dataset for the session
//! - `GET  /api/sessions/{session_id}/datasets/active` — the session's active dataset, if any

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use penny_agent::TurnOrchestrator;
use penny_core::domain::dataset::DatasetHandle;
use penny_core::domain::turn::{SessionId, Turn};
use penny_core::errors::{ApplicationError, DomainError, InterfaceError};

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<TurnOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub turn_id: String,
    pub turn_number: u32,
    pub route: &'static str,
    pub reply: String,
    pub analysis_status: Option<&'static str>,
    pub flags: BTreeMap<String, String>,
}

impl TurnResponse {
    fn from_turn(turn: &Turn) -> Self {
        Self {
            turn_id: turn.id.0.clone(),
            turn_number: turn.turn_number,
            route: turn.route_taken.as_str(),
            reply: turn.reply_text.clone(),
            analysis_status: turn.analysis.as_ref().map(|analysis| analysis.status.as_str()),
            flags: turn.metadata.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DatasetResponse {
    pub name: String,
    pub row_count: u32,
    pub column_names: Vec<String>,
}

impl DatasetResponse {
    fn from_handle(handle: &DatasetHandle) -> Self {
        Self {
            name: handle.name.clone(),
            row_count: handle.row_count,
            column_names: handle.column_names.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(orchestrator: Arc<TurnOrchestrator>) -> Router {
    Router::new()
        .route("/api/sessions/{session_id}/messages", post(submit_message))
        .route("/api/sessions/{session_id}/turns", get(list_turns))
        .route("/api/sessions/{session_id}/datasets", post(upload_dataset))
        .route("/api/sessions/{session_id}/datasets/active", get(active_dataset))
        .with_state(ApiState { orchestrator })
}

async fn submit_message(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, Json<ErrorBody>)> {
    if request.text.trim().is_empty() {
        return Err(error_response(
            DomainError::InvariantViolation("message text must not be empty".to_string()).into(),
        ));
    }

    let session = SessionId(session_id);
    let turn = state.orchestrator.submit(&session, &request.text).await;

    info!(
        event_name = "api.message_handled",
        session_id = %session.0,
        turn_number = turn.turn_number,
        route = turn.route_taken.as_str(),
        "message handled"
    );
    Ok(Json(TurnResponse::from_turn(&turn)))
}

async fn list_turns(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<TurnResponse>>, (StatusCode, Json<ErrorBody>)> {
    let session = SessionId(session_id);
    let turns = state.orchestrator.history(&session).await.map_err(error_response)?;
    Ok(Json(turns.iter().map(TurnResponse::from_turn).collect()))
}

async fn upload_dataset(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<DatasetResponse>), (StatusCode, Json<ErrorBody>)> {
    let session = SessionId(session_id);
    let handle = state
        .orchestrator
        .upload_dataset(&session, &request.name, &request.content)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(DatasetResponse::from_handle(&handle))))
}

async fn active_dataset(
    Path(session_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<Option<DatasetResponse>>, (StatusCode, Json<ErrorBody>)> {
    let session = SessionId(session_id);
    let active = state.orchestrator.active_dataset(&session).await;
    Ok(Json(active.as_ref().map(DatasetResponse::from_handle)))
}

/// Map application failures to the wire: the correlation id goes to the
/// client and the logs, the internal detail only to the logs.
fn error_response(error: ApplicationError) -> (StatusCode, Json<ErrorBody>) {
    let correlation_id = Uuid::new_v4().to_string();
    tracing::warn!(
        event_name = "api.request_failed",
        correlation_id = %correlation_id,
        error = %error,
        "request failed"
    );

    let interface = error.into_interface(correlation_id.clone());
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: interface.user_message().to_string(), correlation_id }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::Json;

    use penny_agent::{
        AnalysisExecutor, ConversationExecutor, IntentClassifier, LlmClient, NoopLlmClient,
        SubprocessAnalysisDelegate, TurnOrchestrator,
    };
    use penny_core::config::RetrievalConfig;
    use penny_core::persona::{PersonaProfile, PersonaPromptBuilder};
    use penny_db::repositories::{
        InMemoryContextStore, InMemoryDatasetRepository, InMemoryTurnRepository,
    };

    use super::{
        active_dataset, list_turns, submit_message, upload_dataset, ApiState, MessageRequest,
        UploadRequest,
    };

    fn state(spool: &tempfile::TempDir) -> ApiState {
        let llm: Arc<dyn LlmClient> = Arc::new(NoopLlmClient);
        let persona = PersonaProfile::default();
        let orchestrator = TurnOrchestrator::new(
            IntentClassifier::new(llm.clone(), Duration::from_millis(100)),
            ConversationExecutor::new(
                llm,
                PersonaPromptBuilder::new(persona.clone(), 4_000),
                Duration::from_millis(100),
                0,
            ),
            AnalysisExecutor::new(
                Arc::new(SubprocessAnalysisDelegate::new(
                    "/nonexistent/analyzer".to_string(),
                    Duration::from_secs(1),
                    256,
                )),
                persona.clone(),
            ),
            persona,
            Arc::new(InMemoryTurnRepository::default()),
            Arc::new(InMemoryDatasetRepository::default()),
            Arc::new(InMemoryContextStore::default()),
            RetrievalConfig { top_k: 5, context_budget_chars: 4_000, rows_per_excerpt: 25 },
            spool.path().to_path_buf(),
        );
        ApiState { orchestrator: Arc::new(orchestrator) }
    }

    #[tokio::test]
    async fn message_endpoint_returns_a_turn_even_with_llm_down() {
        let spool = tempfile::tempdir().expect("spool dir");
        let state = state(&spool);

        let Json(response) = submit_message(
            Path("S-1".to_string()),
            State(state.clone()),
            Json(MessageRequest { text: "hello there".to_string() }),
        )
        .await
        .expect("turn response");

        assert_eq!(response.turn_number, 1);
        assert_eq!(response.route, "conversation");
        assert!(!response.reply.is_empty());

        let Json(turns) =
            list_turns(Path("S-1".to_string()), State(state)).await.expect("history");
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let spool = tempfile::tempdir().expect("spool dir");
        let result = submit_message(
            Path("S-1".to_string()),
            State(state(&spool)),
            Json(MessageRequest { text: "   ".to_string() }),
        )
        .await;

        let (status, Json(body)) = result.err().expect("rejection");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.correlation_id.is_empty());
    }

    #[tokio::test]
    async fn dataset_upload_round_trips_through_active_endpoint() {
        let spool = tempfile::tempdir().expect("spool dir");
        let state = state(&spool);

        let (status, Json(dataset)) = upload_dataset(
            Path("S-1".to_string()),
            State(state.clone()),
            Json(UploadRequest {
                name: "ledger".to_string(),
                content: "date,asset,amount\n2024-01-02,BTC,0.5\n".to_string(),
            }),
        )
        .await
        .expect("upload");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(dataset.row_count, 1);

        let Json(active) =
            active_dataset(Path("S-1".to_string()), State(state.clone())).await.expect("active");
        assert_eq!(active.map(|d| d.name), Some("ledger".to_string()));

        // The upload belongs to its session only.
        let Json(other) =
            active_dataset(Path("S-2".to_string()), State(state)).await.expect("active");
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn invalid_csv_upload_is_a_bad_request() {
        let spool = tempfile::tempdir().expect("spool dir");
        let result = upload_dataset(
            Path("S-1".to_string()),
            State(state(&spool)),
            Json(UploadRequest { name: "bad".to_string(), content: "one_column\n1\n".to_string() }),
        )
        .await;

        let (status, Json(body)) = result.err().expect("rejection");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.error.is_empty());
    }
}
