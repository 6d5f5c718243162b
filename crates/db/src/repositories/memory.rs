use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use penny_core::domain::dataset::DatasetHandle;
use penny_core::domain::fragment::{
    ContextFragment, FragmentId, FragmentMetadata, FragmentSource, ScoredFragment,
};
use penny_core::domain::turn::{SessionId, Turn};

use super::fragment::{lexical_score, rank};
use super::{ContextStore, DatasetRepository, RepositoryError, TurnRepository};

#[derive(Default)]
pub struct InMemoryTurnRepository {
    turns: RwLock<Vec<Turn>>,
}

#[async_trait]
impl TurnRepository for InMemoryTurnRepository {
    async fn save(&self, turn: Turn) -> Result<(), RepositoryError> {
        let mut turns = self.turns.write().await;
        turns.push(turn);
        Ok(())
    }

    async fn list_session(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let turns = self.turns.read().await;
        let mut session_turns = turns
            .iter()
            .filter(|turn| &turn.session_id == session_id)
            .cloned()
            .collect::<Vec<_>>();
        session_turns.sort_by_key(|turn| turn.turn_number);
        Ok(session_turns)
    }

    async fn next_turn_number(&self, session_id: &SessionId) -> Result<u32, RepositoryError> {
        let turns = self.turns.read().await;
        let max = turns
            .iter()
            .filter(|turn| &turn.session_id == session_id)
            .map(|turn| turn.turn_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}

#[derive(Default)]
pub struct InMemoryDatasetRepository {
    active: RwLock<HashMap<String, DatasetHandle>>,
}

#[async_trait]
impl DatasetRepository for InMemoryDatasetRepository {
    async fn save(&self, handle: DatasetHandle) -> Result<(), RepositoryError> {
        let mut active = self.active.write().await;
        active.insert(handle.name.clone(), handle);
        Ok(())
    }

    async fn find_active_by_name(
        &self,
        name: &str,
    ) -> Result<Option<DatasetHandle>, RepositoryError> {
        let active = self.active.read().await;
        Ok(active.get(name).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryContextStore {
    fragments: RwLock<Vec<ContextFragment>>,
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn upsert(
        &self,
        text: &str,
        source: FragmentSource,
        metadata: FragmentMetadata,
    ) -> Result<FragmentId, RepositoryError> {
        let id = FragmentId(Uuid::new_v4().to_string());
        let mut fragments = self.fragments.write().await;
        fragments.push(ContextFragment {
            id: id.clone(),
            source,
            raw_text: text.to_string(),
            metadata,
            retired: false,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredFragment>, RepositoryError> {
        let fragments = self.fragments.read().await;
        let mut scored = fragments
            .iter()
            .filter(|fragment| !fragment.retired)
            .filter_map(|fragment| {
                let score = lexical_score(text, &fragment.raw_text);
                (score > 0.0).then(|| ScoredFragment {
                    id: fragment.id.clone(),
                    score,
                    text: fragment.raw_text.clone(),
                    metadata: fragment.metadata.clone(),
                })
            })
            .collect::<Vec<_>>();
        rank(&mut scored, k);
        Ok(scored)
    }

    async fn retire_dataset(&self, name: &str) -> Result<u64, RepositoryError> {
        let mut fragments = self.fragments.write().await;
        let mut retired = 0u64;
        for fragment in fragments.iter_mut() {
            if !fragment.retired && fragment.metadata.dataset_name.as_deref() == Some(name) {
                fragment.retired = true;
                retired += 1;
            }
        }
        Ok(retired)
    }
}
