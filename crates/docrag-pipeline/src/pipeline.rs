//! Per-query orchestration: embed, retrieve, assemble, generate, cite.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::{Captures, Regex};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docrag_core::{Answer, Citation, Embedder, Error, ErrorKind, GenerationError, Generator, Query, Result, Settings};

use crate::prompt::{CitationMap, PromptAssembler};
use crate::retriever::Retriever;
use crate::service::IndexService;

/// Returned instead of calling the generator when nothing relevant was retrieved
/// and `pipeline.skip_generation_without_context` is set.
pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in the documentation for your query. \
Please try rephrasing your question or check whether the topic is covered in the documentation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Idle,
    EmbeddingQuery,
    Retrieving,
    AssemblingPrompt,
    AwaitingGeneration,
    Completed,
    Failed,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryState::Idle => "idle",
            QueryState::EmbeddingQuery => "embedding_query",
            QueryState::Retrieving => "retrieving",
            QueryState::AssemblingPrompt => "assembling_prompt",
            QueryState::AwaitingGeneration => "awaiting_generation",
            QueryState::Completed => "completed",
            QueryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A query that ended in `Failed`, with the state it failed from.
#[derive(Debug, thiserror::Error)]
#[error("query failed during {state}: {error}")]
pub struct QueryFailure {
    pub state: QueryState,
    #[source]
    pub error: Error,
}

impl QueryFailure {
    pub fn kind(&self) -> ErrorKind { self.error.kind() }
    pub fn message(&self) -> String { self.error.to_string() }
    pub fn is_client_error(&self) -> bool { self.error.is_client_error() }
}

/// State of one query run. Logs every transition.
struct Run {
    state: QueryState,
}

impl Run {
    fn new() -> Self { Self { state: QueryState::Idle } }

    fn advance(&mut self, next: QueryState) {
        debug!(from = %self.state, to = %next, "query state");
        self.state = next;
    }

    fn fail(&mut self, error: Error) -> QueryFailure {
        warn!(state = %self.state, kind = %error.kind(), error = %error, "query failed");
        let failure = QueryFailure { state: self.state, error };
        self.state = QueryState::Failed;
        failure
    }
}

pub struct RagPipeline {
    index: Arc<IndexService>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    retriever: Retriever,
    assembler: PromptAssembler,
    marker: Regex,
    generation_timeout: Duration,
    embedding_retries: usize,
    skip_generation_without_context: bool,
}

impl RagPipeline {
    pub fn new(settings: &Settings, index: Arc<IndexService>, embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Result<Self> {
        let marker = Regex::new(r"\[(\d+)\]").map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self {
            index,
            embedder,
            generator,
            retriever: Retriever::new(settings.retrieval.clone()),
            assembler: PromptAssembler::new(settings.pipeline.subject.clone()),
            marker,
            generation_timeout: Duration::from_secs(settings.generation.timeout_secs),
            embedding_retries: settings.embedding.retries,
            skip_generation_without_context: settings.pipeline.skip_generation_without_context,
        })
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub async fn answer(&self, query: Query) -> std::result::Result<Answer, QueryFailure> {
        self.answer_with_cancel(query, CancellationToken::new()).await
    }

    /// Run one query. Cancelling `cancel` drops an in-flight generation call.
    pub async fn answer_with_cancel(&self, query: Query, cancel: CancellationToken) -> std::result::Result<Answer, QueryFailure> {
        let started = Instant::now();
        let mut run = Run::new();

        let question = query.text.trim();
        if question.is_empty() {
            return Err(run.fail(Error::EmptyQuery));
        }
        if query.top_k == Some(0) {
            return Err(run.fail(Error::InvalidQuery("top_k must be a positive integer".to_string())));
        }
        let index = self.index.current().map_err(|e| run.fail(e))?;

        run.advance(QueryState::EmbeddingQuery);
        let embedding = self.embed_query(question).await.map_err(|e| run.fail(e))?;

        run.advance(QueryState::Retrieving);
        let results = self.retriever.retrieve(index.as_ref(), &embedding, query.top_k).map_err(|e| run.fail(e))?;

        run.advance(QueryState::AssemblingPrompt);
        if results.is_empty() && self.skip_generation_without_context {
            run.advance(QueryState::Completed);
            return Ok(Answer { text: NO_CONTEXT_ANSWER.to_string(), sources: Vec::new(), num_sources: 0, retrieval_time: started.elapsed().as_secs_f64() });
        }
        let assembled = self.assembler.assemble(question, &results);

        run.advance(QueryState::AwaitingGeneration);
        let raw = self.generate(&assembled.prompt, &cancel).await.map_err(|e| run.fail(e.into()))?;
        let (text, sources) = self.attach_citations(&raw, assembled.citations);

        run.advance(QueryState::Completed);
        let retrieval_time = started.elapsed().as_secs_f64();
        info!(results = results.len(), sources = sources.len(), retrieval_time, "answered query");
        Ok(Answer { text, num_sources: sources.len(), sources, retrieval_time })
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_error = Error::Embedding("no embedding attempt was made".to_string());
        for attempt in 0..=self.embedding_retries {
            let embedder = Arc::clone(&self.embedder);
            let owned = text.to_string();
            match tokio::task::spawn_blocking(move || embedder.embed(&owned)).await {
                Ok(Ok(vector)) => return Ok(vector),
                Ok(Err(e)) => last_error = e,
                Err(join) => last_error = Error::embedding(join),
            }
            if attempt < self.embedding_retries {
                warn!(attempt = attempt + 1, error = %last_error, "query embedding failed, retrying");
            }
        }
        Err(last_error)
    }

    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> std::result::Result<String, GenerationError> {
        let timeout = self.generation_timeout;
        debug!(generator = self.generator.name(), prompt_chars = prompt.len(), timeout_secs = timeout.as_secs(), "calling generator");
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.generator.generate(prompt, timeout)) => match outcome {
                Ok(result) => result?,
                Err(_) => return Err(GenerationError::Timeout(timeout)),
            },
        };
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }

    /// Keep the cited sources in marker order and renumber the text to match.
    ///
    /// Bracketed numbers that resolve to no source are left as written, since
    /// they are usually answer content (k-point meshes, indices). Text that
    /// cites nothing gets every retrieved source attached.
    fn attach_citations(&self, raw: &str, citations: CitationMap) -> (String, Vec<Citation>) {
        let cited: BTreeSet<usize> = self
            .marker
            .captures_iter(raw)
            .filter_map(|caps| caps[1].parse::<usize>().ok())
            .filter(|n| citations.resolve(*n).is_some())
            .collect();

        let renumbered: BTreeMap<usize, usize> = cited.iter().enumerate().map(|(i, old)| (*old, i + 1)).collect();
        let text = self
            .marker
            .replace_all(raw, |caps: &Captures<'_>| {
                match caps[1].parse::<usize>().ok().and_then(|n| renumbered.get(&n)) {
                    Some(new) => format!("[{new}]"),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        if cited.is_empty() {
            return (text, citations.into_vec());
        }
        let sources = cited
            .iter()
            .filter_map(|old| citations.resolve(*old))
            .enumerate()
            .map(|(i, c)| Citation { marker: i + 1, ..c.clone() })
            .collect();
        (text, sources)
    }
}
