use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use penny_core::domain::fragment::{FragmentId, FragmentMetadata, FragmentSource, ScoredFragment};

use super::{ContextStore, RepositoryError};
use crate::DbPool;

/// SQLite-backed context store. Similarity is lexical token overlap scored
/// in-process; the embedding representation is internal to this store and
/// never crosses its boundary.
pub struct SqlContextStore {
    pool: DbPool,
}

impl SqlContextStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContextStore for SqlContextStore {
    async fn upsert(
        &self,
        text: &str,
        source: FragmentSource,
        metadata: FragmentMetadata,
    ) -> Result<FragmentId, RepositoryError> {
        let id = FragmentId(Uuid::new_v4().to_string());
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO context_fragments (id, source, raw_text, metadata_json, dataset_name, \
             session_id, retired, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        )
        .bind(&id.0)
        .bind(source.as_str())
        .bind(text)
        .bind(metadata_json)
        .bind(&metadata.dataset_name)
        .bind(&metadata.session_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredFragment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, raw_text, metadata_json FROM context_fragments WHERE retired = 0",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_text: String = row.get("raw_text");
            let score = lexical_score(text, &raw_text);
            if score <= 0.0 {
                continue;
            }
            let metadata: FragmentMetadata =
                serde_json::from_str(row.get::<String, _>("metadata_json").as_str())
                    .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            scored.push(ScoredFragment {
                id: FragmentId(row.get("id")),
                score,
                text: raw_text,
                metadata,
            });
        }

        rank(&mut scored, k);
        Ok(scored)
    }

    async fn retire_dataset(&self, name: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE context_fragments SET retired = 1 WHERE dataset_name = ?1 AND retired = 0",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Sort by descending score (id as tiebreak for determinism) and truncate.
pub(crate) fn rank(scored: &mut Vec<ScoredFragment>, k: usize) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    scored.truncate(k);
}

/// Token-overlap similarity: shared lowercase alphanumeric tokens divided
/// by the geometric mean of both token counts.
pub(crate) fn lexical_score(query: &str, candidate: &str) -> f32 {
    let query_tokens = tokens(query);
    let candidate_tokens = tokens(candidate);
    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0.0;
    }

    let shared = query_tokens.iter().filter(|token| candidate_tokens.contains(*token)).count();
    if shared == 0 {
        return 0.0;
    }
    shared as f32 / ((query_tokens.len() * candidate_tokens.len()) as f32).sqrt()
}

fn tokens(text: &str) -> std::collections::BTreeSet<String> {
    text.split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|token| token.len() > 1)
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use penny_core::domain::fragment::{FragmentMetadata, FragmentSource};

    use crate::repositories::{ContextStore, SqlContextStore};
    use crate::{connect_with_settings, migrations};

    use super::lexical_score;

    async fn store() -> SqlContextStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30, 5_000).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlContextStore::new(pool)
    }

    #[test]
    fn scoring_prefers_higher_overlap() {
        let close = lexical_score("total cost basis", "your cost basis for Q1 was 1200");
        let far = lexical_score("total cost basis", "hello there, how are you");
        assert!(close > far);
        assert_eq!(far, 0.0);
    }

    #[tokio::test]
    async fn query_ranks_by_descending_similarity() {
        let store = store().await;
        store
            .upsert("cost basis summary for bitcoin", FragmentSource::Chat, FragmentMetadata::default())
            .await
            .expect("upsert");
        store
            .upsert("the weather is nice today", FragmentSource::Chat, FragmentMetadata::default())
            .await
            .expect("upsert");

        let hits = store.query("bitcoin cost basis", 5).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("cost basis summary"));
    }

    #[tokio::test]
    async fn query_honors_k() {
        let store = store().await;
        for index in 0..4 {
            store
                .upsert(
                    &format!("transactions batch {index}"),
                    FragmentSource::Dataset,
                    FragmentMetadata::for_dataset("ledger", index, index),
                )
                .await
                .expect("upsert");
        }

        let hits = store.query("transactions", 2).await.expect("query");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn retired_dataset_fragments_leave_retrieval() {
        let store = store().await;
        store
            .upsert(
                "date,asset,amount\n2024-01-02,BTC,0.5",
                FragmentSource::Dataset,
                FragmentMetadata::for_dataset("ledger", 1, 1),
            )
            .await
            .expect("upsert");

        let before = store.query("BTC amount", 5).await.expect("query");
        assert_eq!(before.len(), 1);

        let retired = store.retire_dataset("ledger").await.expect("retire");
        assert_eq!(retired, 1);

        let after = store.query("BTC amount", 5).await.expect("query");
        assert!(after.is_empty());
    }
}
