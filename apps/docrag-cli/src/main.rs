use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use docrag_core::{logging, Chunker, CorpusLoader, DirectoryCorpus, Error, Query, Settings, VectorIndex};
use docrag_embed::embedder_from_settings;
use docrag_pipeline::{GeminiGenerator, HealthReporter, IndexService, InitOutcome, QueryFailure, QueryResponse, RagPipeline};

const USAGE: &str = "Usage:
  docrag index [--corpus DIR] [--force]
  docrag query \"<question>\" [--top-k N] [--json]
  docrag health
  docrag stats";

#[derive(Debug, PartialEq)]
enum Command {
    Index { corpus: Option<PathBuf>, force: bool },
    Query { text: String, top_k: Option<usize>, json: bool },
    Health,
    Stats,
}

fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let Some((cmd, rest)) = args.split_first() else { return Err("missing command".to_string()) };
    match cmd.as_str() {
        "index" => {
            let (mut corpus, mut force) = (None, false);
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--force" | "-f" => force = true,
                    "--corpus" => {
                        i += 1;
                        corpus = Some(PathBuf::from(rest.get(i).ok_or("--corpus requires a directory")?));
                    }
                    other => return Err(format!("unknown argument for index: {other}")),
                }
                i += 1;
            }
            Ok(Command::Index { corpus, force })
        }
        "query" => {
            let (mut text, mut top_k, mut json) = (None, None, false);
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--json" => json = true,
                    "--top-k" | "-k" => {
                        i += 1;
                        let n = rest.get(i).and_then(|v| v.parse::<usize>().ok()).ok_or("--top-k requires a number")?;
                        top_k = Some(n);
                    }
                    other if !other.starts_with("--") && text.is_none() => text = Some(other.to_string()),
                    other => return Err(format!("unknown argument for query: {other}")),
                }
                i += 1;
            }
            Ok(Command::Query { text: text.unwrap_or_default(), top_k, json })
        }
        "health" => Ok(Command::Health),
        "stats" => Ok(Command::Stats),
        other => Err(format!("unknown command: {other}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            return ExitCode::from(1);
        }
    };
    logging::init(&settings.logging.level);

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report(&e)),
    }
}

/// Print an error and pick the exit code: 2 for client errors, 1 otherwise.
fn report(err: &anyhow::Error) -> u8 {
    let core = err.downcast_ref::<QueryFailure>().map(|f| &f.error).or_else(|| err.downcast_ref::<Error>());
    match core {
        Some(Error::IndexNotBuilt) => eprintln!("Service unavailable: no index has been built yet. Run `docrag index` first."),
        Some(e) if e.is_client_error() => eprintln!("Invalid request: {e}"),
        _ => eprintln!("Error: {err:#}"),
    }
    if core.is_some_and(Error::is_client_error) { 2 } else { 1 }
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Index { corpus, force } => index(settings, corpus, force).await,
        Command::Query { text, top_k, json } => query(settings, text, top_k, json).await,
        Command::Health => health(settings).await,
        Command::Stats => stats(settings).await,
    }
}

async fn index(settings: Settings, corpus: Option<PathBuf>, force: bool) -> Result<()> {
    let corpus_dir = corpus.unwrap_or_else(|| settings.corpus_dir());
    let corpus: Arc<dyn CorpusLoader> = Arc::new(DirectoryCorpus::new(&corpus_dir));
    let chunker = Chunker::new(settings.chunking.clone())?;
    let embedder = embedder_from_settings(&settings)?;
    let service = IndexService::new(&settings).with_progress(true);

    println!("Corpus: {}", corpus_dir.display());
    println!("Index:  {}", service.index_dir().display());
    if force {
        let summary = service.rebuild(corpus, &chunker, embedder).await?;
        println!(
            "Indexed {} documents into {} chunks in {:.1}s ({} skipped)",
            summary.documents,
            summary.chunks,
            summary.elapsed.as_secs_f64(),
            summary.skipped_documents
        );
    } else {
        match service.init(corpus, &chunker, embedder).await? {
            InitOutcome::Loaded => println!("Index already present; pass --force to rebuild it."),
            InitOutcome::Built => println!("Index built."),
        }
        let index = service.current()?;
        println!("{} documents, {} chunks, dimension {}", index.num_documents(), index.size(), index.dimension());
    }
    Ok(())
}

async fn query(settings: Settings, text: String, top_k: Option<usize>, json: bool) -> Result<()> {
    let service = Arc::new(IndexService::new(&settings));
    service.load_existing(settings.embedding.dimension).await?;
    if text.trim().is_empty() {
        return Err(Error::EmptyQuery.into());
    }
    if !service.is_ready() {
        return Err(Error::IndexNotBuilt.into());
    }

    let embedder = embedder_from_settings(&settings)?;
    let generator = Arc::new(GeminiGenerator::from_settings(&settings.generation)?);
    let pipeline = RagPipeline::new(&settings, service, embedder, generator)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling query");
            on_interrupt.cancel();
        }
    });

    let query = Query { text, top_k };
    let answer = pipeline.answer_with_cancel(query, cancel).await?;
    let response = QueryResponse::from(answer);
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    println!("{}\n", response.answer);
    if !response.sources.is_empty() {
        println!("Sources:");
        for c in &response.sources {
            let heading = c.heading.as_deref().map(|h| format!(" - {h}")).unwrap_or_default();
            println!("  [{}] {}{} ({:.3})\n      {}", c.marker, c.title, heading, c.similarity, c.url);
        }
    }
    println!("\nAnswered in {:.2}s", response.retrieval_time);
    Ok(())
}

async fn health(settings: Settings) -> Result<()> {
    let service = Arc::new(IndexService::new(&settings));
    if let Err(e) = service.load_existing(settings.embedding.dimension).await {
        warn!(error = %e, "could not load index snapshot");
    }
    let report = HealthReporter::new(service).report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn stats(settings: Settings) -> Result<()> {
    let service = IndexService::new(&settings);
    let loaded = service
        .load_existing(settings.embedding.dimension)
        .await
        .with_context(|| format!("loading index from {}", service.index_dir().display()))?;
    if !loaded {
        return Err(Error::IndexNotBuilt.into());
    }
    let index = service.current()?;
    println!("Index directory: {}", service.index_dir().display());
    println!("Backend:         {}", index.backend());
    println!("Documents:       {}", index.num_documents());
    println!("Chunks:          {}", index.size());
    println!("Dimension:       {}", index.dimension());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_index_flags() {
        assert_eq!(parse_args(&args(&["index"])).unwrap(), Command::Index { corpus: None, force: false });
        assert_eq!(
            parse_args(&args(&["index", "--corpus", "data/pages", "--force"])).unwrap(),
            Command::Index { corpus: Some(PathBuf::from("data/pages")), force: true }
        );
        assert!(parse_args(&args(&["index", "--corpus"])).is_err());
    }

    #[test]
    fn parses_query_flags() {
        assert_eq!(
            parse_args(&args(&["query", "What is ENCUT?", "--top-k", "3", "--json"])).unwrap(),
            Command::Query { text: "What is ENCUT?".to_string(), top_k: Some(3), json: true }
        );
        assert!(parse_args(&args(&["query", "x", "--top-k", "many"])).is_err());
        assert_eq!(parse_args(&args(&["query"])).unwrap(), Command::Query { text: String::new(), top_k: None, json: false });
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["serve"])).is_err());
        assert_eq!(parse_args(&args(&["health"])).unwrap(), Command::Health);
    }

    #[test]
    fn client_errors_exit_with_two() {
        assert_eq!(report(&anyhow::Error::from(Error::EmptyQuery)), 2);
        assert_eq!(report(&anyhow::Error::from(Error::IndexNotBuilt)), 1);
    }
}
