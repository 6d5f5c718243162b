pub mod config;
pub mod domain;
pub mod errors;
pub mod persona;
pub mod routing;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::analysis::{AnalysisResult, AnalysisStatus};
pub use domain::dataset::{row_excerpts, summarize_csv, CsvSummary, DatasetHandle, DatasetId};
pub use domain::fragment::{
    ContextFragment, FragmentId, FragmentMetadata, FragmentSource, ScoredFragment,
};
pub use domain::turn::{Route, SessionId, Turn, TurnId, TurnPhase, TurnProgress};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use persona::{PersonaProfile, PersonaPromptBuilder};
pub use routing::{lexical_route, simplify_request, LexicalDecision};
