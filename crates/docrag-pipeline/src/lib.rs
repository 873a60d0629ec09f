pub mod api;
pub mod gemini;
pub mod health;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod service;

pub use api::{ErrorResponse, QueryRequest, QueryResponse};
pub use gemini::GeminiGenerator;
pub use health::{HealthReport, HealthReporter, HealthStatus, VectorStoreStats};
pub use pipeline::{QueryFailure, QueryState, RagPipeline, NO_CONTEXT_ANSWER};
pub use prompt::{AssembledPrompt, CitationMap, PromptAssembler, NO_CONTEXT_NOTICE};
pub use retriever::Retriever;
pub use service::{BuildSummary, IndexService, InitOutcome};
