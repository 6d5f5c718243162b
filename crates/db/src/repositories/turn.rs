use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use penny_core::domain::analysis::AnalysisResult;
use penny_core::domain::fragment::FragmentId;
use penny_core::domain::turn::{Route, SessionId, Turn, TurnId};

use super::{RepositoryError, TurnRepository};
use crate::DbPool;

pub struct SqlTurnRepository {
    pool: DbPool,
}

impl SqlTurnRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TurnRepository for SqlTurnRepository {
    async fn save(&self, turn: Turn) -> Result<(), RepositoryError> {
        let analysis_json = turn
            .analysis
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let retrieved_json = serde_json::to_string(&turn.retrieved_context)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let metadata_json = serde_json::to_string(&turn.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO turns (id, session_id, turn_number, timestamp, user_text, route_taken, \
             reply_text, analysis_json, retrieved_context_json, metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&turn.id.0)
        .bind(&turn.session_id.0)
        .bind(turn.turn_number as i64)
        .bind(turn.timestamp.to_rfc3339())
        .bind(&turn.user_text)
        .bind(turn.route_taken.as_str())
        .bind(&turn.reply_text)
        .bind(analysis_json)
        .bind(retrieved_json)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_session(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, session_id, turn_number, timestamp, user_text, route_taken, reply_text, \
             analysis_json, retrieved_context_json, metadata_json \
             FROM turns WHERE session_id = ?1 ORDER BY turn_number ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_turn).collect()
    }

    async fn next_turn_number(&self, session_id: &SessionId) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(turn_number), 0) AS max_turn FROM turns WHERE session_id = ?1",
        )
        .bind(&session_id.0)
        .fetch_one(&self.pool)
        .await?;

        let max_turn: i64 = row.get("max_turn");
        Ok(max_turn as u32 + 1)
    }
}

fn decode_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, RepositoryError> {
    let route: String = row.get("route_taken");
    let route = route
        .parse::<Route>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let timestamp: String = row.get("timestamp");
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?
        .with_timezone(&Utc);

    let analysis = row
        .get::<Option<String>, _>("analysis_json")
        .map(|raw| serde_json::from_str::<AnalysisResult>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let retrieved_context: Vec<FragmentId> =
        serde_json::from_str(row.get::<String, _>("retrieved_context_json").as_str())
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let metadata: BTreeMap<String, String> =
        serde_json::from_str(row.get::<String, _>("metadata_json").as_str())
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Turn::new(
        TurnId(row.get("id")),
        SessionId(row.get("session_id")),
        row.get::<i64, _>("turn_number") as u32,
        timestamp,
        row.get("user_text"),
        route,
        row.get("reply_text"),
        analysis,
        retrieved_context,
        metadata,
    )
    .map_err(|error| RepositoryError::Decode(error.to_string()))
}
