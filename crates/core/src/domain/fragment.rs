use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentId(pub String);

/// Where a retrievable fragment originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentSource {
    Chat,
    Dataset,
}

impl FragmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Dataset => "dataset",
        }
    }
}

impl std::str::FromStr for FragmentSource {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "chat" => Ok(Self::Chat),
            "dataset" => Ok(Self::Dataset),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown fragment source `{other}`")))
            }
        }
    }
}

/// Provenance attached to a fragment at upsert time. Exactly one owner:
/// a turn (chat) or a dataset handle (dataset rows).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_end: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl FragmentMetadata {
    pub fn for_chat(session_id: &str, turn_id: &str, turn_number: u32, speaker: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            turn_id: Some(turn_id.to_string()),
            turn_number: Some(turn_number),
            speaker: Some(speaker.to_string()),
            ..Self::default()
        }
    }

    pub fn for_dataset(dataset_name: &str, row_start: u32, row_end: u32) -> Self {
        Self {
            dataset_name: Some(dataset_name.to_string()),
            row_start: Some(row_start),
            row_end: Some(row_end),
            ..Self::default()
        }
    }
}

/// An embedded, retrievable unit of prior chat or dataset text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextFragment {
    pub id: FragmentId,
    pub source: FragmentSource,
    pub raw_text: String,
    pub metadata: FragmentMetadata,
    pub retired: bool,
    pub created_at: DateTime<Utc>,
}

/// Retrieval hit: a fragment with its similarity score, ranked descending.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredFragment {
    pub id: FragmentId,
    pub score: f32,
    pub text: String,
    pub metadata: FragmentMetadata,
}
