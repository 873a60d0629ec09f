pub mod chunker;
pub mod config;
pub mod corpus;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use chunker::{Chunker, ChunkingConfig};
pub use config::Settings;
pub use corpus::DirectoryCorpus;
pub use error::{ChunkingError, Error, ErrorKind, GenerationError, Result};
pub use traits::{CorpusLoader, Embedder, Generator, VectorIndex};
pub use types::{Answer, Chunk, ChunkId, Citation, Document, DocumentId, DocumentMeta, Metric, Query, RetrievalResult, SearchHit};
