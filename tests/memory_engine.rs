use echo_memory::config::{EngineConfig, ModuleSeed, PersistenceConfig};
use echo_memory::embedding::EmbeddingProvider;
use echo_memory::engine::{MAIN_FILE_NAME, MemoryEngine};
use echo_memory::error::{EmbeddingError, EngineError, LoadFailure};
use echo_memory::executor::MemoryCall;
use echo_memory::memory::{LongTermItem, LongTermMemory};
use echo_memory::testing::MockEmbeddingProvider;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn config(dir: &Path) -> EngineConfig {
    EngineConfig {
        data_dir: dir.to_path_buf(),
        persona: ModuleSeed::new(20, ""),
        human: ModuleSeed::new(50, ""),
        ..EngineConfig::default()
    }
}

fn geography() -> Arc<MockEmbeddingProvider> {
    Arc::new(
        MockEmbeddingProvider::new()
            .with_vector("Paris is in France", vec![1.0, 0.0])
            .with_vector("Bananas are yellow", vec![0.0, 1.0])
            .with_vector("capital of France", vec![0.9, 0.1])
            .with_vector("unrelated", vec![-1.0, 0.0]),
    )
}

#[tokio::test]
async fn persona_capacity_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MemoryEngine::open(config(dir.path()), geography())
        .await
        .unwrap();

    let out = engine
        .dispatch(MemoryCall::AppendToModule {
            module_name: "persona".into(),
            content: "I am a helpful".into(),
        })
        .await;
    assert_eq!(out, "Content appended to module 'persona'.");

    let out = engine
        .dispatch(MemoryCall::AppendToModule {
            module_name: "persona".into(),
            content: " assistant".into(),
        })
        .await;
    assert!(out.contains("exceeding the memory limit of 20 characters"));

    let state = engine.main().snapshot().await;
    assert_eq!(state.core.get_module("persona").unwrap().content, "I am a helpful");
}

#[tokio::test]
async fn archival_search_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let provider = geography();
    let engine = MemoryEngine::open(config(dir.path()), provider.clone())
        .await
        .unwrap();
    for content in ["Paris is in France", "Bananas are yellow"] {
        engine
            .dispatch_value(json!({"name": "add_memory", "args": {"content": content}}))
            .await;
    }
    drop(engine);

    let reopened = MemoryEngine::open(config(dir.path()), provider)
        .await
        .unwrap();
    let out = reopened
        .dispatch_value(json!({"name": "search_memory", "args": {"query": "capital of France", "top_k": 1}}))
        .await;
    let results: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["text"], "Paris is in France");
    assert!(results[0]["score"].as_f64().unwrap() > 0.99);

    let out = reopened
        .dispatch_value(json!({"name": "search_memory", "args": {"query": "unrelated"}}))
        .await;
    assert_eq!(out, "[]");
}

#[tokio::test]
async fn corrupt_main_file_starts_cold() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(MAIN_FILE_NAME), "{{{ definitely not json").unwrap();

    let engine = MemoryEngine::open(config(dir.path()), geography())
        .await
        .unwrap();
    let state = engine.main().snapshot().await;
    assert_eq!(state.archival.len(), 0);
    assert!(state.core.contains("persona"));
    assert!(state.core.contains("human"));
}

#[tokio::test]
async fn strict_load_surfaces_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(MAIN_FILE_NAME)).unwrap();
    let mut config = config(dir.path());
    config.persistence = PersistenceConfig {
        strict_load: true,
        pretty: true,
    };

    let err = MemoryEngine::open(config, geography())
        .await
        .err()
        .expect("strict load should fail");
    assert!(matches!(err, EngineError::Load(LoadFailure::Io { .. })));
}

#[tokio::test]
async fn embedding_outage_is_reported_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        MockEmbeddingProvider::new()
            .with_fallback(vec![1.0, 0.0])
            .with_failure(EmbeddingError::ServiceUnavailable("maintenance".into())),
    );
    let engine = MemoryEngine::open(config(dir.path()), provider)
        .await
        .unwrap();

    let out = engine
        .dispatch(MemoryCall::AddMemory {
            content: "lost".into(),
        })
        .await;
    assert!(out.starts_with("Failed to add memory: "));
    assert!(engine.main().read(|s| s.archival.is_empty()).await);
}

#[tokio::test]
async fn long_term_memory_written_through_to_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::new(MockEmbeddingProvider::new().with_fallback(vec![0.6, 0.8]));
    let engine = MemoryEngine::open(config(dir.path()), provider.clone())
        .await
        .unwrap();

    engine
        .long_term()
        .save(&LongTermItem::new("writer", "write report", "a PDF", "2024-05-01"))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(dir.path().join(LongTermMemory::FILE_NAME)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["archival_memory"][0]["memory"], "write report");
    assert_eq!(json["archival_memory"][0]["metadata"]["agent"], "writer");
    assert!(!dir.path().join(MAIN_FILE_NAME).exists());
}
