//! Directory-backed corpus loading.
//!
//! Accepts the scraper's processed JSON pages (`{title, url, markdown}` with
//! `plain_text` or `raw_text` as fallbacks) plus loose `.md` / `.txt` files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::traits::CorpusLoader;
use crate::types::Document;

#[derive(Debug, Deserialize)]
struct ProcessedPage {
    title: Option<String>,
    url: Option<String>,
    markdown: Option<String>,
    plain_text: Option<String>,
    raw_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    fn list_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches!(extension(p).as_deref(), Some("json" | "md" | "txt")))
            .collect();
        files.sort();
        files
    }

    fn load_file(&self, path: &Path) -> Result<Option<Document>> {
        let content = read_lossy(path)?;
        match extension(path).as_deref() {
            Some("json") => load_page(path, &content),
            _ => Ok(load_text(path, &content)),
        }
    }
}

impl CorpusLoader for DirectoryCorpus {
    fn load_corpus(&self) -> Result<Vec<Document>> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(format!("corpus directory {}", self.root.display())));
        }
        let files = self.list_files();
        let mut documents = Vec::with_capacity(files.len());
        for path in &files {
            match self.load_file(path) {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => warn!(path = %path.display(), "no text in file, skipping"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to load file, skipping"),
            }
        }
        info!(root = %self.root.display(), files = files.len(), documents = documents.len(), "loaded corpus");
        Ok(documents)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

fn read_lossy(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).into_owned()),
    }
}

fn file_url(path: &Path) -> String {
    let abs = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

fn load_page(path: &Path, content: &str) -> Result<Option<Document>> {
    let page: ProcessedPage = serde_json::from_str(content)?;
    let text = [page.markdown, page.plain_text, page.raw_text].into_iter().flatten().find(|t| !t.trim().is_empty());
    let Some(text) = text else { return Ok(None) };
    let title = page.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| file_stem(path));
    let url = page.url.filter(|u| !u.trim().is_empty()).unwrap_or_else(|| file_url(path));
    Ok(Some(Document::new(url, title, text)))
}

fn load_text(path: &Path, content: &str) -> Option<Document> {
    if content.trim().is_empty() { return None; }
    let title = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| file_stem(path));
    Some(Document::new(file_url(path), title, content))
}
