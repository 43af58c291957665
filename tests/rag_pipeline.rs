//! End-to-end runs of the question-answering workflow against in-memory
//! stores and scripted gateways.

mod common;

use std::sync::Arc;

use serde_json::json;

use mindgraph::config::Settings;
use mindgraph::gateways::{EmbeddingGateway, WebSearch};
use mindgraph::rag::{NodeContext, RagPipeline, RagRequest, RagStage};
use mindgraph::stores::memory::MemoryStore;
use mindgraph::stores::{ChunkRecord, VectorStore};
use mindgraph::workflow::Outcome;

use common::{CountingWeb, FlakyEmbedder, HashEmbedder, ScriptedLlm, embed_text};

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let texts = [
        "Backpropagation updates weights from output-layer gradients.",
        "Gradient descent minimizes the loss one small step at a time.",
        "Learning rates trade convergence speed against stability.",
    ];
    let chunks = texts
        .iter()
        .map(|text| {
            ChunkRecord::new("user-1", "map-1", *text)
                .with_embedding(embed_text(text))
                .with_hierarchy_path(vec!["Neural Networks".into(), "Training".into()])
                .with_source("ml.pdf")
        })
        .collect();
    store.insert_chunks(chunks).await.unwrap();
    store
}

fn pipeline(
    llm: Arc<ScriptedLlm>,
    embedder: Arc<dyn EmbeddingGateway>,
    store: Arc<MemoryStore>,
    web: Option<Arc<dyn WebSearch>>,
) -> RagPipeline {
    RagPipeline::new(
        llm,
        embedder,
        Arc::clone(&store) as Arc<dyn VectorStore>,
        store,
        web,
        &Settings::default(),
    )
    .expect("wiring is valid")
}

fn request(question: &str) -> RagRequest {
    RagRequest {
        user_id: "user-1".into(),
        map_id: "map-1".into(),
        question: question.into(),
        top_k: None,
        node: None,
    }
}

#[tokio::test]
async fn sufficient_documents_answer_without_escalation() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    llm.push_structured(Ok(json!({
        "is_sufficient": true,
        "confidence": 0.9,
        "reasoning": "snippets cover the question"
    })));
    llm.push_completion(Ok("Backpropagation is how networks learn.".into()));

    let web = Arc::new(CountingWeb::new());
    let store = seeded_store().await;
    let pipeline = pipeline(llm, Arc::new(HashEmbedder), store, Some(Arc::clone(&web) as Arc<dyn WebSearch>));

    let run = pipeline.ask(request("How do networks learn?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(run.state.stage, RagStage::Completed);
    assert_eq!(
        run.state.answer.as_deref(),
        Some("Backpropagation is how networks learn.")
    );
    assert!(!run.state.escalated);
    assert_eq!(web.calls(), 0);
    assert_eq!(run.state.total_documents_found, Some(3));
    assert_eq!(run.state.citations.len(), 3);
    assert_eq!(run.state.citations[0].title, "Neural Networks > Training");
    // Three documents saturate the confidence heuristic.
    assert_eq!(run.state.confidence, Some(1.0));
}

#[tokio::test]
async fn low_confidence_escalates_to_the_web() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    llm.push_structured(Ok(json!({
        "is_sufficient": true,
        "confidence": 0.4,
        "reasoning": "snippets are thin"
    })));
    llm.push_completion(Ok("Answer drawing on external coverage.".into()));

    let web = Arc::new(CountingWeb::new());
    let store = seeded_store().await;
    let pipeline = pipeline(llm, Arc::new(HashEmbedder), store, Some(Arc::clone(&web) as Arc<dyn WebSearch>));

    let run = pipeline.ask(request("How do networks learn?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert!(run.state.escalated);
    assert_eq!(web.calls(), 1);
    // Three local documents plus one web hit, all cited.
    assert_eq!(run.state.documents.len(), 4);
    assert!(run
        .state
        .citations
        .iter()
        .any(|c| c.source_id == "https://example.com/article"));
}

#[tokio::test]
async fn zero_documents_skip_grading_entirely() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    llm.push_completion(Ok("I could not find this in your document.".into()));

    let pipeline = pipeline(
        llm.clone(),
        Arc::new(HashEmbedder),
        Arc::new(MemoryStore::new()),
        None,
    );

    let run = pipeline.ask(request("What is in the appendix?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(run.state.total_documents_found, Some(0));
    assert!(run.state.grade.is_none());
    assert!(run.state.citations.is_empty());
    assert_eq!(run.state.confidence, Some(0.0));
    // Only the generation call happened; nothing was graded.
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn sparse_local_results_skip_grading_and_escalate() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    llm.push_completion(Ok("Answer drawing on external coverage.".into()));

    let store = Arc::new(MemoryStore::new());
    let text = "Backpropagation updates weights from output-layer gradients.";
    store
        .insert_chunks(vec![
            ChunkRecord::new("user-1", "map-1", text)
                .with_embedding(embed_text(text))
                .with_source("ml.pdf"),
        ])
        .await
        .unwrap();

    let web = Arc::new(CountingWeb::new());
    let settings = Settings {
        min_docs_for_grading: 2,
        ..Settings::default()
    };
    let pipeline = RagPipeline::new(
        llm.clone(),
        Arc::new(HashEmbedder),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        store,
        Some(Arc::clone(&web) as Arc<dyn WebSearch>),
        &settings,
    )
    .expect("wiring is valid");

    let run = pipeline.ask(request("How do networks learn?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert!(run.state.escalated);
    assert_eq!(web.calls(), 1);
    let grade = run.state.grade.unwrap();
    assert!(!grade.is_sufficient);
    assert_eq!(grade.confidence, 0.0);
    // The single local chunk plus the web hit both feed generation.
    assert_eq!(run.state.documents.len(), 2);
    // Grading never reached the model; only generation did.
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn grade_falls_back_to_free_text_json_recovery() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    // No structured replies queued, so grading degrades to free text.
    llm.push_completion(Ok(
        "```json\n{\"is_sufficient\": true, \"confidence\": 0.95}\n```".into(),
    ));
    llm.push_completion(Ok("Answer from graded documents.".into()));

    let web = Arc::new(CountingWeb::new());
    let store = seeded_store().await;
    let pipeline = pipeline(llm, Arc::new(HashEmbedder), store, Some(Arc::clone(&web) as Arc<dyn WebSearch>));

    let run = pipeline.ask(request("How do networks learn?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert!(!run.state.escalated);
    assert_eq!(web.calls(), 0);
    let grade = run.state.grade.unwrap();
    assert!(grade.is_sufficient);
    assert!((grade.confidence - 0.95).abs() < 1e-6);
}

#[tokio::test]
async fn node_scoped_repeat_question_is_served_from_cache() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    llm.push_structured(Ok(json!({"is_sufficient": true, "confidence": 0.9})));
    llm.push_completion(Ok("First answer.".into()));

    let store = seeded_store().await;
    let pipeline = pipeline(llm.clone(), Arc::new(HashEmbedder), store, None);

    let node = NodeContext {
        id: "training".into(),
        label: "Training".into(),
        children: vec!["Backpropagation".into()],
    };
    let mut req = request("How do networks learn?");
    req.node = Some(node);

    let first = pipeline.ask(req.clone()).await.unwrap();
    assert_eq!(first.outcome, Outcome::Completed);
    assert_eq!(first.state.answer.as_deref(), Some("First answer."));
    let calls_after_first = llm.calls();

    let second = pipeline.ask(req).await.unwrap();
    assert_eq!(second.outcome, Outcome::Completed);
    assert_eq!(second.steps, 0);
    assert_eq!(second.state.answer.as_deref(), Some("First answer."));
    assert_eq!(second.state.citations, first.state.citations);
    assert_eq!(llm.calls(), calls_after_first);
}

#[tokio::test]
async fn deleting_the_conversation_invalidates_the_cache() {
    let llm = Arc::new(ScriptedLlm::new("regenerated answer"));
    llm.push_structured(Ok(json!({"is_sufficient": true, "confidence": 0.9})));
    llm.push_completion(Ok("First answer.".into()));
    llm.push_structured(Ok(json!({"is_sufficient": true, "confidence": 0.9})));
    llm.push_completion(Ok("Second answer.".into()));

    let store = seeded_store().await;
    let pipeline = pipeline(llm, Arc::new(HashEmbedder), store, None);

    let mut req = request("How do networks learn?");
    req.node = Some(NodeContext {
        id: "training".into(),
        label: "Training".into(),
        children: Vec::new(),
    });

    pipeline.ask(req.clone()).await.unwrap();
    assert!(pipeline
        .conversations()
        .delete("user-1", "map-1", "training")
        .await
        .unwrap());

    let rerun = pipeline.ask(req).await.unwrap();
    assert!(rerun.steps > 0);
    assert_eq!(rerun.state.answer.as_deref(), Some("Second answer."));
}

#[tokio::test]
async fn transient_retrieval_failures_are_retried() {
    let llm = Arc::new(ScriptedLlm::new("fallback"));
    llm.push_structured(Ok(json!({"is_sufficient": true, "confidence": 0.9})));
    llm.push_completion(Ok("Recovered answer.".into()));

    let store = seeded_store().await;
    // Fails exactly as many times as the retry cap allows.
    let pipeline = pipeline(llm, Arc::new(FlakyEmbedder::new(2)), store, None);

    let run = pipeline.ask(request("How do networks learn?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Completed);
    assert_eq!(run.state.retry_count, 2);
    assert_eq!(run.state.answer.as_deref(), Some("Recovered answer."));
}

#[tokio::test]
async fn persistent_retrieval_failure_fails_after_the_retry_cap() {
    let store = seeded_store().await;
    let pipeline = pipeline(
        Arc::new(ScriptedLlm::new("fallback")),
        Arc::new(FlakyEmbedder::new(10)),
        store,
        None,
    );

    let run = pipeline.ask(request("How do networks learn?")).await.unwrap();

    assert_eq!(run.outcome, Outcome::Failed);
    assert_eq!(run.state.stage, RagStage::Failed);
    assert_eq!(run.state.retry_count, 2);
    let error = run.state.error.unwrap();
    assert!(error.contains("retrieve"), "{error}");
    assert!(error.contains("embedding"), "{error}");
}
