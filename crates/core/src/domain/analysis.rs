use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    Failed,
    Timeout,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown analysis status `{other}`")))
            }
        }
    }
}

/// Outcome of one analysis-subprocess invocation. Created once,
/// referenced by at most one turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: AnalysisStatus,
    pub output_text: Option<String>,
    pub error_detail: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl AnalysisResult {
    pub fn success(output_text: String, duration_ms: u64) -> Self {
        Self {
            status: AnalysisStatus::Success,
            output_text: Some(output_text),
            error_detail: None,
            exit_code: Some(0),
            duration_ms,
        }
    }

    pub fn failed(error_detail: String, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            status: AnalysisStatus::Failed,
            output_text: None,
            error_detail: Some(error_detail),
            exit_code,
            duration_ms,
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self {
            status: AnalysisStatus::Timeout,
            output_text: None,
            error_detail: None,
            exit_code: None,
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == AnalysisStatus::Success
    }
}
