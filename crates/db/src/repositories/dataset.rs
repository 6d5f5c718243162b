use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use penny_core::domain::dataset::{DatasetHandle, DatasetId};

use super::{DatasetRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDatasetRepository {
    pool: DbPool,
}

impl SqlDatasetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatasetRepository for SqlDatasetRepository {
    async fn save(&self, handle: DatasetHandle) -> Result<(), RepositoryError> {
        let column_names_json = serde_json::to_string(&handle.column_names)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;

        // Supersede any previous upload under the same name before the new
        // handle becomes visible.
        sqlx::query("UPDATE datasets SET active = 0 WHERE name = ?1 AND active = 1")
            .bind(&handle.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO datasets (id, name, row_count, column_names_json, path, uploaded_at, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        )
        .bind(&handle.id.0)
        .bind(&handle.name)
        .bind(handle.row_count as i64)
        .bind(column_names_json)
        .bind(handle.path.to_string_lossy().to_string())
        .bind(handle.uploaded_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_active_by_name(
        &self,
        name: &str,
    ) -> Result<Option<DatasetHandle>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, row_count, column_names_json, path, uploaded_at \
             FROM datasets WHERE name = ?1 AND active = 1 ORDER BY uploaded_at DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let column_names: Vec<String> =
                serde_json::from_str(row.get::<String, _>("column_names_json").as_str())
                    .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            let uploaded_at: String = row.get("uploaded_at");
            let uploaded_at = DateTime::parse_from_rfc3339(&uploaded_at)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?
                .with_timezone(&Utc);

            Ok(DatasetHandle {
                id: DatasetId(row.get("id")),
                name: row.get("name"),
                row_count: row.get::<i64, _>("row_count") as u32,
                column_names,
                path: PathBuf::from(row.get::<String, _>("path")),
                uploaded_at,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use penny_core::domain::dataset::{DatasetHandle, DatasetId};

    use crate::repositories::{DatasetRepository, SqlDatasetRepository};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlDatasetRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30, 5_000).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlDatasetRepository::new(pool)
    }

    fn handle(id: &str, name: &str) -> DatasetHandle {
        DatasetHandle {
            id: DatasetId(id.to_string()),
            name: name.to_string(),
            row_count: 10,
            column_names: vec!["date".to_string(), "amount".to_string()],
            path: PathBuf::from(format!("/tmp/{id}.csv")),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn saves_and_finds_active_dataset() {
        let repo = repo().await;
        repo.save(handle("D-1", "ledger")).await.expect("save");

        let found = repo.find_active_by_name("ledger").await.expect("find").expect("present");
        assert_eq!(found.id, DatasetId("D-1".to_string()));
        assert_eq!(found.column_names, vec!["date", "amount"]);
    }

    #[tokio::test]
    async fn reupload_supersedes_previous_handle() {
        let repo = repo().await;
        repo.save(handle("D-1", "ledger")).await.expect("first upload");
        repo.save(handle("D-2", "ledger")).await.expect("second upload");

        let found = repo.find_active_by_name("ledger").await.expect("find").expect("present");
        assert_eq!(found.id, DatasetId("D-2".to_string()));
    }

    #[tokio::test]
    async fn unknown_name_yields_none() {
        let repo = repo().await;
        assert!(repo.find_active_by_name("nope").await.expect("find").is_none());
    }
}
