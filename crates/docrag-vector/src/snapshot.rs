//! Versioned JSON snapshots of a `FlatIndex`.
//!
//! A snapshot is a single `snapshot.json` inside the index directory. It is
//! written to a temporary file in the same directory and renamed into place,
//! so readers never observe a half-written file.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use docrag_core::{Chunk, DocumentMeta, Error, Metric, Result, VectorIndex};

use crate::flat::FlatIndex;

pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const FORMAT_TAG: &str = "docrag-index";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: String,
    pub version: u32,
    pub metric: Metric,
    pub dimension: usize,
    pub embedder_id: String,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<DocumentMeta>,
    pub chunks: Vec<Chunk>,
}

pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

pub fn exists(dir: &Path) -> bool {
    snapshot_path(dir).is_file()
}

pub fn write(index: &FlatIndex, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let snapshot = Snapshot {
        format: FORMAT_TAG.to_string(),
        version: FORMAT_VERSION,
        metric: index.metric(),
        dimension: index.dimension(),
        embedder_id: index.embedder_id().to_string(),
        created_at: index.created_at(),
        documents: index.documents().cloned().collect(),
        chunks: index.chunks().to_vec(),
    };

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    let target = snapshot_path(dir);
    tmp.persist(&target).map_err(|e| Error::Io(e.error))?;
    info!(path = %target.display(), chunks = snapshot.chunks.len(), documents = snapshot.documents.len(), "persisted index snapshot");
    Ok(())
}

pub fn read(dir: &Path, expected_dim: usize) -> Result<FlatIndex> {
    let path = snapshot_path(dir);
    let file = File::open(&path)?;
    let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::IndexCorruption(format!("{}: {e}", path.display())))?;
    let index = from_snapshot(snapshot, expected_dim)?;
    info!(path = %path.display(), chunks = index.size(), documents = index.num_documents(), "loaded index snapshot");
    Ok(index)
}

fn from_snapshot(snapshot: Snapshot, expected_dim: usize) -> Result<FlatIndex> {
    let corrupt = |msg: String| Error::IndexCorruption(msg);
    if snapshot.format != FORMAT_TAG {
        return Err(corrupt(format!("unknown format tag {:?}", snapshot.format)));
    }
    if snapshot.version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", snapshot.version)));
    }
    if snapshot.dimension != expected_dim {
        return Err(corrupt(format!("snapshot dimension {} does not match embedder dimension {expected_dim}", snapshot.dimension)));
    }

    let document_ids: HashSet<&str> = snapshot.documents.iter().map(|d| d.id.as_str()).collect();
    let mut seen = HashSet::with_capacity(snapshot.chunks.len());
    for chunk in &snapshot.chunks {
        if chunk.embedding.len() != snapshot.dimension {
            return Err(corrupt(format!("chunk {} has {} dimensions, expected {}", chunk.id, chunk.embedding.len(), snapshot.dimension)));
        }
        if !seen.insert(chunk.id.as_str()) {
            return Err(corrupt(format!("duplicate chunk id {}", chunk.id)));
        }
        if !document_ids.contains(chunk.document_id.as_str()) {
            return Err(corrupt(format!("chunk {} references unknown document {}", chunk.id, chunk.document_id)));
        }
    }

    let index = FlatIndex::build(snapshot.dimension, snapshot.metric, snapshot.embedder_id, snapshot.documents, snapshot.chunks)
        .map_err(|e| corrupt(e.to_string()))?;
    Ok(index.with_created_at(snapshot.created_at))
}
