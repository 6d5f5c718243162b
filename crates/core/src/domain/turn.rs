use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::analysis::AnalysisResult;
use crate::domain::fragment::FragmentId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Which executor produced the reply for a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Conversation,
    Analysis,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Analysis => "analysis",
        }
    }
}

impl std::str::FromStr for Route {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "conversation" => Ok(Self::Conversation),
            "analysis" => Ok(Self::Analysis),
            other => Err(DomainError::InvariantViolation(format!("unknown route `{other}`"))),
        }
    }
}

/// Metadata keys attached to a turn for operator diagnostics.
pub const META_CLASSIFIER_DEGRADED: &str = "classifier_degraded";
pub const META_NOT_DURABLY_PERSISTED: &str = "not_durably_persisted";
pub const META_LLM_FALLBACK: &str = "llm_fallback";
pub const META_DIAGNOSTIC: &str = "diagnostic";

/// One completed user-message/reply exchange. Immutable once persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub session_id: SessionId,
    pub turn_number: u32,
    pub timestamp: DateTime<Utc>,
    pub user_text: String,
    pub route_taken: Route,
    pub reply_text: String,
    pub analysis: Option<AnalysisResult>,
    pub retrieved_context: Vec<FragmentId>,
    pub metadata: BTreeMap<String, String>,
}

impl Turn {
    /// Checked constructor. A turn routed to analysis must carry an
    /// analysis result, and a conversational turn must not.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TurnId,
        session_id: SessionId,
        turn_number: u32,
        timestamp: DateTime<Utc>,
        user_text: String,
        route_taken: Route,
        reply_text: String,
        analysis: Option<AnalysisResult>,
        retrieved_context: Vec<FragmentId>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, DomainError> {
        match (route_taken, analysis.is_some()) {
            (Route::Analysis, false) | (Route::Conversation, true) => {
                return Err(DomainError::RouteAnalysisMismatch { route: route_taken });
            }
            _ => {}
        }

        Ok(Self {
            id,
            session_id,
            turn_number,
            timestamp,
            user_text,
            route_taken,
            reply_text,
            analysis,
            retrieved_context,
            metadata,
        })
    }

    pub fn is_flagged(&self, key: &str) -> bool {
        self.metadata.get(key).is_some_and(|value| value == "true")
    }
}

/// Lifecycle phase of an in-flight turn inside the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Received,
    Classified,
    AwaitingLlm,
    AwaitingAnalysis,
    Composed,
    Persisted,
}

/// Tracks phase transitions for one turn; invalid transitions are
/// domain errors rather than silent corruption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnProgress {
    phase: TurnPhase,
}

impl Default for TurnProgress {
    fn default() -> Self {
        Self { phase: TurnPhase::Received }
    }
}

impl TurnProgress {
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn can_advance_to(&self, next: TurnPhase) -> bool {
        matches!(
            (self.phase, next),
            (TurnPhase::Received, TurnPhase::Classified)
                | (TurnPhase::Classified, TurnPhase::AwaitingLlm)
                | (TurnPhase::Classified, TurnPhase::AwaitingAnalysis)
                | (TurnPhase::AwaitingLlm, TurnPhase::Composed)
                | (TurnPhase::AwaitingAnalysis, TurnPhase::Composed)
                | (TurnPhase::Composed, TurnPhase::Persisted)
        )
    }

    pub fn advance_to(&mut self, next: TurnPhase) -> Result<(), DomainError> {
        if self.can_advance_to(next) {
            self.phase = next;
            return Ok(());
        }

        Err(DomainError::InvalidTurnTransition { from: self.phase, to: next })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::domain::analysis::AnalysisResult;
    use crate::errors::DomainError;

    use super::{Route, SessionId, Turn, TurnId, TurnPhase, TurnProgress};

    fn turn(route: Route, analysis: Option<AnalysisResult>) -> Result<Turn, DomainError> {
        Turn::new(
            TurnId("T-1".to_string()),
            SessionId("S-1".to_string()),
            1,
            Utc::now(),
            "what's my total cost basis".to_string(),
            route,
            "Here you go!".to_string(),
            analysis,
            Vec::new(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn conversation_turn_must_not_carry_analysis() {
        let result = turn(Route::Conversation, Some(AnalysisResult::timeout(1_000)));
        assert!(matches!(result, Err(DomainError::RouteAnalysisMismatch { .. })));
    }

    #[test]
    fn analysis_turn_must_carry_analysis() {
        let result = turn(Route::Analysis, None);
        assert!(matches!(result, Err(DomainError::RouteAnalysisMismatch { .. })));
    }

    #[test]
    fn valid_pairings_construct() {
        assert!(turn(Route::Conversation, None).is_ok());
        assert!(turn(Route::Analysis, Some(AnalysisResult::timeout(1_000))).is_ok());
    }

    #[test]
    fn phases_advance_along_llm_branch() {
        let mut progress = TurnProgress::default();
        progress.advance_to(TurnPhase::Classified).expect("received -> classified");
        progress.advance_to(TurnPhase::AwaitingLlm).expect("classified -> awaiting_llm");
        progress.advance_to(TurnPhase::Composed).expect("awaiting_llm -> composed");
        progress.advance_to(TurnPhase::Persisted).expect("composed -> persisted");
        assert_eq!(progress.phase(), TurnPhase::Persisted);
    }

    #[test]
    fn phases_advance_along_analysis_branch() {
        let mut progress = TurnProgress::default();
        progress.advance_to(TurnPhase::Classified).expect("received -> classified");
        progress.advance_to(TurnPhase::AwaitingAnalysis).expect("classified -> awaiting_analysis");
        progress.advance_to(TurnPhase::Composed).expect("awaiting_analysis -> composed");
        assert_eq!(progress.phase(), TurnPhase::Composed);
    }

    #[test]
    fn skipping_classification_is_rejected() {
        let mut progress = TurnProgress::default();
        let error =
            progress.advance_to(TurnPhase::Composed).expect_err("received -> composed must fail");
        assert!(matches!(error, DomainError::InvalidTurnTransition { .. }));
    }
}
