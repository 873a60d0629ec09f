mod common;

use std::fs;
use std::sync::Arc;

use docrag_core::{Chunker, ChunkingConfig, CorpusLoader, DirectoryCorpus, Document, Embedder, Error, Query, Result, VectorIndex};
use docrag_embed::HashEmbedder;
use docrag_pipeline::{HealthReporter, HealthStatus, IndexService, InitOutcome, RagPipeline, NO_CONTEXT_NOTICE};

use common::{test_settings, FixedEmbedder, ScriptedGenerator};

struct StaticCorpus(Vec<Document>);

impl StaticCorpus {
    fn of(documents: Vec<Document>) -> Arc<dyn CorpusLoader> { Arc::new(Self(documents)) }
    fn empty() -> Arc<dyn CorpusLoader> { Self::of(Vec::new()) }
}

impl CorpusLoader for StaticCorpus {
    fn load_corpus(&self) -> Result<Vec<Document>> { Ok(self.0.clone()) }
}

fn incar_text() -> String {
    "Gardening notes about tomatoes and soil moisture. ".repeat(100)
}

fn write_incar_page(dir: &std::path::Path) {
    let page = serde_json::json!({
        "title": "INCAR",
        "url": "https://www.vasp.at/wiki/index.php/INCAR",
        "markdown": incar_text(),
    });
    fs::write(dir.join("incar.json"), page.to_string()).unwrap();
}

fn chunker() -> Chunker {
    Chunker::new(ChunkingConfig::default()).unwrap()
}

#[test]
fn health_is_degraded_before_any_build() {
    let tmp = tempfile::tempdir().unwrap();
    let service = Arc::new(IndexService::new(&test_settings(tmp.path())));
    let report = HealthReporter::new(service.clone()).report();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.vector_store_stats.num_documents, 0);
    assert_eq!(report.vector_store_stats.num_chunks, 0);
    assert!(!service.is_ready());
    assert!(matches!(service.current(), Err(Error::IndexNotBuilt)));
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn unrelated_corpus_yields_no_context_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus_dir = tmp.path().join("corpus");
    fs::create_dir(&corpus_dir).unwrap();
    write_incar_page(&corpus_dir);
    assert_eq!(incar_text().chars().count(), 5000);

    let settings = test_settings(&tmp.path().join("index"));
    let service = Arc::new(IndexService::new(&settings));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(1024));
    let summary = service.rebuild(Arc::new(DirectoryCorpus::new(&corpus_dir)), &chunker(), embedder.clone()).await.unwrap();
    assert_eq!(summary.documents, 1);
    assert_eq!(summary.chunks, 6);

    let report = HealthReporter::new(service.clone()).report();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.vector_store_stats.num_chunks, 6);
    assert_eq!(report.vector_store_stats.dimension, 1024);

    let generator = Arc::new(ScriptedGenerator::replying("No relevant documentation was found for ENCUT."));
    let pipeline = RagPipeline::new(&settings, service, embedder, generator.clone()).unwrap();
    let answer = pipeline.answer(Query::new("What is ENCUT?")).await.unwrap();
    assert!(answer.sources.is_empty());
    assert!(generator.prompts()[0].contains(NO_CONTEXT_NOTICE));
}

#[tokio::test]
async fn init_builds_then_loads_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = StaticCorpus::of(vec![Document::new("https://wiki/ENCUT", "ENCUT", "ENCUT sets the energy cutoff for plane waves.")]);
    let settings = test_settings(tmp.path());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));

    let first = IndexService::new(&settings);
    assert_eq!(first.init(corpus.clone(), &chunker(), embedder.clone()).await.unwrap(), InitOutcome::Built);
    assert!(tmp.path().join(docrag_vector::SNAPSHOT_FILE).is_file());

    let second = IndexService::new(&settings);
    assert_eq!(second.init(StaticCorpus::empty(), &chunker(), embedder.clone()).await.unwrap(), InitOutcome::Loaded);
    let query = embedder.embed("energy cutoff").unwrap();
    assert_eq!(first.current().unwrap().search(&query, 3).unwrap(), second.current().unwrap().search(&query, 3).unwrap());
}

#[tokio::test]
async fn corrupt_snapshot_is_fatal_at_init() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join(docrag_vector::SNAPSHOT_FILE), r#"{"format":"docrag-index","version":99}"#).unwrap();
    let service = IndexService::new(&test_settings(tmp.path()));
    let err = service.init(StaticCorpus::empty(), &chunker(), Arc::new(HashEmbedder::new(8))).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(!service.is_ready());
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let text = "ISMEAR determines how partial occupancies are set. ".repeat(60);
    let corpus = StaticCorpus::of(vec![Document::new("https://wiki/ISMEAR", "ISMEAR", text)]);
    let service = IndexService::new(&test_settings(tmp.path()));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128));
    let query = embedder.embed("partial occupancies").unwrap();

    service.rebuild(corpus.clone(), &chunker(), embedder.clone()).await.unwrap();
    let first = service.current().unwrap().search(&query, 5).unwrap();
    service.rebuild(corpus.clone(), &chunker(), embedder.clone()).await.unwrap();
    let second = service.current().unwrap().search(&query, 5).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn rebuild_swap_leaves_existing_readers_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let service = IndexService::new(&test_settings(tmp.path()));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(32));

    let one = StaticCorpus::of(vec![Document::new("u1", "One", "first corpus text")]);
    service.rebuild(one.clone(), &chunker(), embedder.clone()).await.unwrap();
    let reader = service.current().unwrap();

    let two = StaticCorpus::of(vec![Document::new("u2", "Two", "second corpus"), Document::new("u3", "Three", "third text")]);
    service.rebuild(two.clone(), &chunker(), embedder).await.unwrap();

    assert_eq!(reader.num_documents(), 1);
    assert_eq!(service.current().unwrap().num_documents(), 2);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_index() {
    let tmp = tempfile::tempdir().unwrap();
    let service = IndexService::new(&test_settings(tmp.path()));
    let corpus = StaticCorpus::of(vec![Document::new("u1", "One", "some text")]);
    service.rebuild(corpus.clone(), &chunker(), Arc::new(HashEmbedder::new(16))).await.unwrap();

    let broken = Arc::new(FixedEmbedder::failing(vec![0.0; 16], usize::MAX));
    let err = service.rebuild(corpus.clone(), &chunker(), broken).await.unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
    assert_eq!(service.current().unwrap().size(), 1);
}

#[tokio::test]
async fn failing_documents_are_skipped_and_duplicates_collapsed() {
    let tmp = tempfile::tempdir().unwrap();
    let service = IndexService::new(&test_settings(tmp.path()));
    let good = Document::new("u1", "One", "useful text");
    let corpus = StaticCorpus::of(vec![good.clone(), Document::new("u2", "Blank", "  "), good]);
    let summary = service.rebuild(corpus.clone(), &chunker(), Arc::new(HashEmbedder::new(16))).await.unwrap();
    assert_eq!(summary.documents, 1);
    assert_eq!(summary.skipped_documents, 1);
    assert_eq!(summary.chunks, 1);
}

struct ThreadRecordingCorpus {
    documents: Vec<Document>,
    loaded_on: parking_lot::Mutex<Option<std::thread::ThreadId>>,
}

impl CorpusLoader for ThreadRecordingCorpus {
    fn load_corpus(&self) -> Result<Vec<Document>> {
        *self.loaded_on.lock() = Some(std::thread::current().id());
        Ok(self.documents.clone())
    }
}

#[tokio::test]
async fn corpus_is_loaded_off_the_runtime_thread() {
    let tmp = tempfile::tempdir().unwrap();
    let service = IndexService::new(&test_settings(tmp.path()));
    let corpus = Arc::new(ThreadRecordingCorpus { documents: vec![Document::new("u1", "One", "some text")], loaded_on: parking_lot::Mutex::new(None) });
    service.rebuild(corpus.clone(), &chunker(), Arc::new(HashEmbedder::new(16))).await.unwrap();
    let loaded_on = (*corpus.loaded_on.lock()).unwrap();
    assert_ne!(loaded_on, std::thread::current().id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queries_keep_answering_while_the_index_is_swapped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = test_settings(tmp.path());
    settings.retrieval.min_similarity = 0.0;
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let service = Arc::new(IndexService::new(&settings));
    let old = StaticCorpus::of(vec![Document::new("https://wiki/ENCUT_old", "Old", "ENCUT sets the plane-wave energy cutoff.")]);
    let new = StaticCorpus::of(vec![Document::new("https://wiki/ENCUT_new", "New", "ENCUT controls the size of the basis set.")]);
    service.rebuild(old.clone(), &chunker(), embedder.clone()).await.unwrap();

    let generator = Arc::new(ScriptedGenerator::replying("See [1]."));
    let pipeline = Arc::new(RagPipeline::new(&settings, service.clone(), embedder.clone(), generator).unwrap());
    let queries: Vec<_> = (0..32)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.answer(Query::new("What is ENCUT?")).await })
        })
        .collect();
    for round in 0..4 {
        let corpus = if round % 2 == 0 { new.clone() } else { old.clone() };
        service.rebuild(corpus, &chunker(), embedder.clone()).await.unwrap();
    }

    for query in queries {
        let answer = query.await.unwrap().unwrap_or_else(|failure| panic!("{failure}"));
        assert_eq!(answer.sources.len(), 1);
        assert!(["Old", "New"].contains(&answer.sources[0].title.as_str()), "{}", answer.sources[0].title);
    }
    assert!(service.is_ready());
}
