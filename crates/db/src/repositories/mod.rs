use async_trait::async_trait;
use thiserror::Error;

use penny_core::domain::dataset::DatasetHandle;
use penny_core::domain::fragment::{FragmentId, FragmentMetadata, FragmentSource, ScoredFragment};
use penny_core::domain::turn::{SessionId, Turn};

pub mod dataset;
pub mod fragment;
pub mod memory;
pub mod turn;

pub use dataset::SqlDatasetRepository;
pub use fragment::SqlContextStore;
pub use memory::{InMemoryContextStore, InMemoryDatasetRepository, InMemoryTurnRepository};
pub use turn::SqlTurnRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable, ordered per-session turn history.
#[async_trait]
pub trait TurnRepository: Send + Sync {
    async fn save(&self, turn: Turn) -> Result<(), RepositoryError>;
    async fn list_session(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError>;
    async fn next_turn_number(&self, session_id: &SessionId) -> Result<u32, RepositoryError>;
}

/// Uploaded dataset handles. Saving a handle supersedes any active handle
/// with the same name.
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    async fn save(&self, handle: DatasetHandle) -> Result<(), RepositoryError>;
    async fn find_active_by_name(
        &self,
        name: &str,
    ) -> Result<Option<DatasetHandle>, RepositoryError>;
}

/// The retrieval capability: embedded text fragments with similarity query.
/// Embeddings are the store's concern; callers only see ranked text.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn upsert(
        &self,
        text: &str,
        source: FragmentSource,
        metadata: FragmentMetadata,
    ) -> Result<FragmentId, RepositoryError>;

    /// Top-`k` non-retired fragments ranked by descending similarity.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredFragment>, RepositoryError>;

    /// Tombstone every fragment belonging to the named dataset. Returns the
    /// number of fragments retired.
    async fn retire_dataset(&self, name: &str) -> Result<u64, RepositoryError>;
}
