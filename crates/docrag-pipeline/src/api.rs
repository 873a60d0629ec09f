//! Request and response shapes of the query and health contracts.

use serde::{Deserialize, Serialize};

use docrag_core::{Answer, Citation, ErrorKind, Query};

use crate::pipeline::{QueryFailure, QueryState, RagPipeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    /// Must be positive; larger values are clamped to `retrieval.max_top_k`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl From<QueryRequest> for Query {
    fn from(req: QueryRequest) -> Self {
        Query { text: req.query, top_k: req.top_k }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Citation>,
    pub num_sources: usize,
    pub retrieval_time: f64,
}

impl From<Answer> for QueryResponse {
    fn from(answer: Answer) -> Self {
        Self { answer: answer.text, sources: answer.sources, num_sources: answer.num_sources, retrieval_time: answer.retrieval_time }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    pub state: QueryState,
}

impl From<&QueryFailure> for ErrorResponse {
    fn from(f: &QueryFailure) -> Self {
        Self { error: f.kind(), message: f.message(), state: f.state }
    }
}

impl RagPipeline {
    /// Serve one wire-level query.
    pub async fn handle(&self, request: QueryRequest) -> Result<QueryResponse, QueryFailure> {
        self.answer(request.into()).await.map(QueryResponse::from)
    }
}
