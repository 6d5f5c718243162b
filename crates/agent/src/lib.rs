//! Conversational agent runtime: intent classification, the two reply
//! executors, the analysis subprocess delegate, and the turn orchestrator
//! that ties them to persistence and retrieval.

pub mod classifier;
pub mod delegate;
pub mod executor;
pub mod llm;
pub mod runtime;

pub use classifier::{Classification, IntentClassifier};
pub use delegate::{AnalysisRunner, SubprocessAnalysisDelegate};
pub use executor::{AnalysisExecutor, ConversationExecutor, ExecutionOutcome};
pub use llm::{scrub_think, LlmClient, LlmError, NoopLlmClient, OllamaClient};
pub use runtime::TurnOrchestrator;
