//! Classifier backends against a local mock of the Ollama API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use context_gate::classify::{
    self, Classifier, ClassifierChain, ClassifyError, KeywordClassifier, OllamaClassifier,
};
use context_gate::config::{ClassifierBackend, ClassifierConfig};
use context_gate::detect::ContextDetector;
use context_gate::models::*;

#[derive(Clone)]
struct Mock {
    reply: &'static str,
    status: StatusCode,
    delay: Duration,
    last_request: Arc<Mutex<Option<Value>>>,
}

impl Mock {
    fn replying(reply: &'static str) -> Self {
        Self {
            reply,
            status: StatusCode::OK,
            delay: Duration::ZERO,
            last_request: Arc::new(Mutex::new(None)),
        }
    }
}

async fn generate(State(mock): State<Mock>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    *mock.last_request.lock().unwrap() = Some(body.clone());
    tokio::time::sleep(mock.delay).await;
    (
        mock.status,
        Json(json!({ "model": body["model"], "response": mock.reply, "done": true })),
    )
}

/// Serve `mock` on an ephemeral port and return its base URL.
async fn serve(mock: Mock) -> String {
    let app = Router::new()
        .route("/api/generate", post(generate))
        .route("/api/tags", get(|| async { Json(json!({ "models": [] })) }))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A URL nothing is listening on.
async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

const RAG_REPLY: &str = r#"{"complexity":"complex","domain":"ai","intent":"new_feature","entities":["rag","document","search"]}"#;

#[tokio::test]
async fn ollama_reply_becomes_a_context() {
    let url = serve(Mock::replying(RAG_REPLY)).await;
    let classifier = OllamaClassifier::new(url, "llama3.2");

    let ctx = classifier
        .classify("Build a RAG system for document search", None)
        .await
        .unwrap();

    assert_eq!(ctx.complexity, Complexity::Complex);
    assert_eq!(ctx.domain, "ai");
    assert_eq!(ctx.intent, Intent::NewFeature);
    assert_eq!(ctx.entities, vec!["rag", "document", "search"]);
}

#[tokio::test]
async fn request_asks_for_json_without_streaming() {
    let mock = Mock::replying(RAG_REPLY);
    let captured = mock.last_request.clone();
    let url = serve(mock).await;

    OllamaClassifier::new(url, "qwen2.5")
        .classify("Build a RAG system", None)
        .await
        .unwrap();

    let body = captured.lock().unwrap().clone().expect("no request captured");
    assert_eq!(body["model"], "qwen2.5");
    assert_eq!(body["stream"], false);
    assert_eq!(body["format"], "json");
    assert!(body["prompt"].as_str().unwrap().contains("Build a RAG system"));
}

#[tokio::test]
async fn slow_backend_times_out() {
    let mut mock = Mock::replying(RAG_REPLY);
    mock.delay = Duration::from_secs(2);
    let url = serve(mock).await;

    let err = OllamaClassifier::new(url, "llama3.2")
        .with_timeout(Duration::from_millis(100))
        .classify("anything", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ClassifyError::Timeout(_)));
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    let classifier = OllamaClassifier::new(dead_url().await, "llama3.2");

    assert!(!classifier.is_available().await);
    let err = classifier.classify("anything", None).await.unwrap_err();
    assert!(matches!(err, ClassifyError::Unavailable(_)));
}

#[tokio::test]
async fn error_status_is_an_api_error() {
    let mut mock = Mock::replying("model not found");
    mock.status = StatusCode::INTERNAL_SERVER_ERROR;
    let url = serve(mock).await;

    let err = OllamaClassifier::new(url, "llama3.2")
        .classify("anything", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClassifyError::Api(_)));
}

#[tokio::test]
async fn prose_reply_is_a_parse_error() {
    let url = serve(Mock::replying("Sure! This looks like an AI project.")).await;

    let err = OllamaClassifier::new(url, "llama3.2")
        .classify("anything", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClassifyError::Parse(_)));
}

#[tokio::test]
async fn available_backend_reports_available() {
    let url = serve(Mock::replying(RAG_REPLY)).await;
    assert!(OllamaClassifier::new(url, "llama3.2").is_available().await);
}

#[tokio::test]
async fn chain_falls_back_to_keywords_when_ollama_is_down() {
    let ollama: Arc<dyn Classifier> = Arc::new(OllamaClassifier::new(dead_url().await, "llama3.2"));
    let keyword: Arc<dyn Classifier> = Arc::new(KeywordClassifier::new());
    let chain = ClassifierChain::new(vec![ollama, keyword]);

    let ctx = chain
        .classify("Fix the crash in the checkout page", None)
        .await
        .unwrap();
    assert_eq!(ctx.intent, Intent::BugFix);
}

#[tokio::test]
async fn configured_ollama_without_fallback_yields_detector_fallback() {
    let config = ClassifierConfig {
        backend: ClassifierBackend::Ollama,
        ollama_url: dead_url().await,
        fallback_to_keywords: false,
        ..Default::default()
    };
    let detector = ContextDetector::new(classify::from_config(&config));

    let detection = detector
        .detect_or_fallback("Build a RAG system for document search")
        .await
        .unwrap();
    assert!(detection.fallback);
    assert_eq!(detection.context, ProjectContext::fallback());
    assert!(detection.notice.is_some());
}
