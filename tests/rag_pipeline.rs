use awful_rag::config::{self, RagConfig, SYSTEM_PROMPT_KEY};
use awful_rag::documents::DocumentProcessor;
use awful_rag::embeddings::Embedder;
use awful_rag::llm::Llm;
use awful_rag::query_engine::{ENGINE_UNAVAILABLE, QueryEngine};
use httpmock::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use tempfile::{TempDir, tempdir};

fn config(root: &TempDir, server: &MockServer) -> RagConfig {
    RagConfig {
        api_key: "mock_api_key".to_string(),
        api_base: server.base_url(),
        model: "mock_model".to_string(),
        documents_dir: root.path().join("documents"),
        vector_store_dir: root.path().join("vector_store"),
        ..RagConfig::default()
    }
}

async fn mock_embeddings(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "object": "list",
                "model": "text-embedding-ada-002",
                "data": [{"index": 0, "object": "embedding", "embedding": [0.6, 0.8]}],
                "usage": {"prompt_tokens": 8, "total_tokens": 8}
            }));
        })
        .await
}

#[tokio::test]
async fn index_then_query_answers_from_documents() {
    let server = MockServer::start_async().await;
    let embeddings = mock_embeddings(&server).await;
    let chat = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_includes("Paris is the capital of France.")
                .body_includes("What is the capital of France?");
            then.status(200).json_body(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 0,
                "model": "mock_model",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Paris."},
                    "finish_reason": "stop"
                }]
            }));
        })
        .await;

    let root = tempdir().unwrap();
    let config = config(&root, &server);
    fs::create_dir_all(&config.documents_dir).unwrap();
    fs::write(
        config.documents_dir.join("hello.txt"),
        "Paris is the capital of France.",
    )
    .unwrap();

    // index
    let processor = DocumentProcessor::new(&config, Embedder::from_config(&config).unwrap());
    let index = processor.process_documents(None).await.unwrap().unwrap();
    assert_eq!(index.len(), 1);
    assert!(config.vector_store_dir.join("docstore.bin").exists());

    // query, in a fresh engine that loads the persisted index
    let processor = DocumentProcessor::new(&config, Embedder::from_config(&config).unwrap());
    let engine = QueryEngine::open(&config, processor, Llm::from_config(&config)).await;
    assert!(engine.is_ready());

    let response = engine
        .query_with_sources("What is the capital of France?")
        .await
        .unwrap();

    assert!(response.answer.contains("Paris"));
    assert!(!response.source_nodes.is_empty());
    assert_eq!(
        response.source_nodes[0].node.metadata.get("file_name").map(String::as_str),
        Some("hello.txt")
    );
    assert_eq!(embeddings.calls_async().await, 2);
    chat.assert_async().await;
}

#[tokio::test]
async fn empty_documents_directory_leaves_engine_unavailable() {
    let server = MockServer::start_async().await;
    let embeddings = mock_embeddings(&server).await;

    let root = tempdir().unwrap();
    let config = config(&root, &server);
    fs::create_dir_all(&config.documents_dir).unwrap();

    let processor = DocumentProcessor::new(&config, Embedder::from_config(&config).unwrap());
    assert!(processor.load_documents(None).unwrap().is_empty());
    assert!(processor.load_index().unwrap().is_none());

    let engine = QueryEngine::open(&config, processor, Llm::from_config(&config)).await;
    assert_eq!(engine.query("anything").await.unwrap(), ENGINE_UNAVAILABLE);
    assert_eq!(embeddings.calls_async().await, 0);
}

#[test]
fn updated_prompt_is_appended_and_wins() {
    let root = tempdir().unwrap();
    let env_file = root.path().join(".env");
    fs::write(&env_file, "MODEL_NAME=gpt-4o\nSYSTEM_PROMPT=\"old\"\n").unwrap();

    config::persist_setting(&env_file, SYSTEM_PROMPT_KEY, "Answer \"briefly\".\nCite files.").unwrap();

    let contents = fs::read_to_string(&env_file).unwrap();
    assert!(contents.starts_with("MODEL_NAME=gpt-4o\nSYSTEM_PROMPT=\"old\"\n"));

    let values = config::read_settings_file(&env_file).unwrap();
    let loaded = config::load_config_with(&values, |_| None).unwrap();
    assert_eq!(loaded.model, "gpt-4o");
    assert_eq!(loaded.system_prompt, "Answer \"briefly\".\nCite files.");

    let untouched: HashMap<String, String> = HashMap::new();
    let defaults = config::load_config_with(&untouched, |_| None).unwrap();
    assert_eq!(defaults.system_prompt, config::DEFAULT_SYSTEM_PROMPT);
}
