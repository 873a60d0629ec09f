use std::time::Duration;
use thiserror::Error;

/// Document-local chunking failure. The document is skipped, the build continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("document {0} has no text")]
    Empty(String),

    #[error("document {document_id} is malformed: {reason}")]
    Malformed { document_id: String, reason: String },

    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of the text-generation capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation service failed: {0}")]
    Upstream(String),

    #[error("generation service returned no text")]
    EmptyResponse,

    #[error("generation was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query text is empty")]
    EmptyQuery,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No index has been built or loaded yet")]
    IndexNotBuilt,

    #[error("Index snapshot is corrupt or incompatible: {0}")]
    IndexCorruption(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate chunk id {0}")]
    DuplicateChunk(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable identifier for an error, surfaced to callers next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    NotFound,
    EmptyQuery,
    InvalidQuery,
    IndexNotBuilt,
    IndexCorruption,
    DimensionMismatch,
    DuplicateChunk,
    EmbeddingError,
    ChunkingError,
    GenerationError,
    Io,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::NotFound => "not_found",
            ErrorKind::EmptyQuery => "empty_query",
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::IndexNotBuilt => "index_not_built",
            ErrorKind::IndexCorruption => "index_corruption",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::DuplicateChunk => "duplicate_chunk",
            ErrorKind::EmbeddingError => "embedding_error",
            ErrorKind::ChunkingError => "chunking_error",
            ErrorKind::GenerationError => "generation_error",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::EmptyQuery => ErrorKind::EmptyQuery,
            Error::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Error::IndexNotBuilt => ErrorKind::IndexNotBuilt,
            Error::IndexCorruption(_) => ErrorKind::IndexCorruption,
            Error::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Error::DuplicateChunk(_) => ErrorKind::DuplicateChunk,
            Error::Embedding(_) => ErrorKind::EmbeddingError,
            Error::Chunking(_) => ErrorKind::ChunkingError,
            Error::Generation(_) => ErrorKind::GenerationError,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Errors caused by the request itself rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::EmptyQuery | Error::InvalidQuery(_))
    }

    /// Conditions under which the process must not serve queries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::IndexCorruption(_))
    }

    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Error::Embedding(err.to_string())
    }
}
