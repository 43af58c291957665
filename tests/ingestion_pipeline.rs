//! End-to-end runs of the document ingestion workflow against in-memory
//! stores and scripted gateways.

mod common;

use std::sync::Arc;

use mindgraph::config::Settings;
use mindgraph::gateways::{FileRef, GatewayError};
use mindgraph::ingestion::{IngestStage, IngestionPipeline};
use mindgraph::stores::memory::MemoryStore;
use mindgraph::stores::{ChunkFilter, MapStore, VectorStore};
use mindgraph::workflow::Outcome;

use common::{FailingParser, HashEmbedder, ScriptedLlm, StaticParser};

const DOCUMENT: &str = "\
# Machine Learning
An overview of the field.

## Supervised Learning
Models learn from labeled examples.

## Unsupervised Learning
Models find structure without labels.
";

const OUTLINE: &str = "Machine Learning\n  Supervised Learning\n  Unsupervised Learning";

fn pipeline(
    parser: Arc<dyn mindgraph::gateways::DocumentParser>,
    llm: Arc<ScriptedLlm>,
    store: Arc<MemoryStore>,
) -> IngestionPipeline {
    IngestionPipeline::new(
        parser,
        llm,
        Arc::new(HashEmbedder),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        store,
        &Settings::default(),
    )
    .expect("wiring is valid")
}

#[tokio::test]
async fn document_becomes_a_stored_map_with_chunks() {
    let llm = Arc::new(ScriptedLlm::new("unused"));
    // One section, so one outline call, then one optimizer call.
    llm.push_completion(Ok(OUTLINE.to_string()));
    llm.push_completion(Ok(OUTLINE.to_string()));

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(Arc::new(StaticParser(DOCUMENT)), llm, Arc::clone(&store));

    let run = pipeline
        .run(FileRef::new("/tmp/ml.pdf", "ml.pdf"), "user-1", "map-1")
        .await
        .unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(run.state.stage, IngestStage::Completed);
    assert_eq!(run.state.chunk_count, Some(3));
    assert!(run.state.processing_seconds().is_some());

    let map = store.get_map("user-1", "map-1").await.unwrap().unwrap();
    assert_eq!(map.title, "Machine Learning");
    assert_eq!(map.hierarchy.children.len(), 2);
    assert!(!map.layout.nodes.is_empty());
    assert_eq!(map.processing.chunk_count, Some(3));

    let filter = ChunkFilter {
        user_id: "user-1".into(),
        map_id: "map-1".into(),
    };
    assert_eq!(store.count(&filter).await.unwrap(), 3);
    // Chunks carry the header path for citations.
    let query = common::embed_text("Models learn from labeled examples.");
    let hits = store.search(&query, 3, &filter).await.unwrap();
    assert!(hits
        .iter()
        .any(|hit| hit.chunk.hierarchy_path == vec!["Machine Learning", "Supervised Learning"]));
}

#[tokio::test]
async fn parser_failure_fails_the_run_and_stores_nothing() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(
        Arc::new(FailingParser),
        Arc::new(ScriptedLlm::new("unused")),
        Arc::clone(&store),
    );

    let run = pipeline
        .run(FileRef::new("/tmp/x.pdf", "x.pdf"), "user-1", "map-1")
        .await
        .unwrap();

    assert_eq!(run.outcome, Outcome::Failed);
    assert_eq!(run.state.stage, IngestStage::Failed);
    let error = run.state.error.unwrap();
    assert!(error.contains("extract_content"), "{error}");
    assert!(error.contains("x.pdf"), "{error}");

    assert!(store.get_map("user-1", "map-1").await.unwrap().is_none());
    let filter = ChunkFilter {
        user_id: "user-1".into(),
        map_id: "map-1".into(),
    };
    assert_eq!(store.count(&filter).await.unwrap(), 0);
}

#[tokio::test]
async fn optimizer_failure_keeps_the_unoptimized_outline() {
    let llm = Arc::new(ScriptedLlm::new("unused"));
    llm.push_completion(Ok(OUTLINE.to_string()));
    llm.push_completion(Err(GatewayError::Llm {
        provider: "scripted",
        message: "rate limited".into(),
    }));

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(Arc::new(StaticParser(DOCUMENT)), llm, Arc::clone(&store));

    let run = pipeline
        .run(FileRef::new("/tmp/ml.pdf", "ml.pdf"), "user-1", "map-1")
        .await
        .unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    let hierarchy = run.state.hierarchy.unwrap();
    assert_eq!(hierarchy.title, "Machine Learning");
    assert_eq!(hierarchy.children.len(), 2);
}

#[tokio::test]
async fn empty_outline_falls_back_to_the_filename_stem() {
    let llm = Arc::new(ScriptedLlm::new("unused"));
    // Pure preamble; sanitization leaves nothing, so no optimizer call happens.
    llm.push_completion(Ok("Sure! Here is the outline you requested:".to_string()));

    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(Arc::new(StaticParser(DOCUMENT)), llm, Arc::clone(&store));

    let run = pipeline
        .run(FileRef::new("/tmp/notes.pdf", "notes.pdf"), "user-1", "map-1")
        .await
        .unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    let hierarchy = run.state.hierarchy.unwrap();
    assert_eq!(hierarchy.title, "notes");
    assert!(hierarchy.children.is_empty());
    // The layout still renders a clickable root node.
    let layout = run.state.layout.unwrap();
    assert_eq!(layout.nodes.len(), 1);
    assert_eq!(layout.nodes[0].label, "notes");
}
