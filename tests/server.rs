use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

use hierarag::config::parse_config;
use hierarag::migrate::migrate;
use hierarag::server::{router, AppState};
use hierarag::sqlite_store::SqliteStore;

async fn app(provider: &str) -> Router {
    let config = parse_config(&format!(
        r#"
        [db]
        path = "unused.sqlite"
        [embedding]
        provider = "{}"
        dims = 32
        [chunking]
        max_tokens = 32
        overlap_tokens = 4
        parent_max_tokens = 128
        min_tokens = 4
        [graph]
        min_entity_mentions = 1
        "#,
        provider
    ))
    .unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    router(AppState::new(config, SqliteStore::new(pool)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, owner: &str, filename: &str, text: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/documents",
        Some(json!({
            "owner_id": owner,
            "filename": filename,
            "text": text,
            "tags": ["Streaming"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["status"], "complete");
    body["document_id"].as_str().unwrap().to_string()
}

const KAFKA: &str = "Teams run Apache Kafka to store events in partitioned logs. \
    Consumer groups read partitions in parallel.\n\n\
    Stream jobs in Apache Spark read from Apache Kafka for stream processing.";

#[tokio::test]
async fn test_health() {
    let app = app("disabled").await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_document_lifecycle() {
    let app = app("hash").await;
    let id = create(&app, "alice", "kafka.md", KAFKA).await;

    let (status, body) = send(&app, "GET", &format!("/api/documents/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "kafka.md");
    assert_eq!(body["content_type"], "text/markdown");
    assert!(!body["chunks"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, "GET", "/api/documents?owner_id=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (_, body) = send(&app, "GET", "/api/documents?owner_id=bob", None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "DELETE", &format!("/api/documents/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, "GET", &format!("/api/documents/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("not found"));
    let (status, _) = send(&app, "DELETE", &format!("/api/documents/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_document_rejects_bad_input() {
    let app = app("disabled").await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/documents",
        Some(json!({ "filename": " ", "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/documents",
        Some(json!({ "filename": "scan.pdf", "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_modes() {
    let app = app("disabled").await;
    create(&app, "alice", "kafka.md", KAFKA).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/search/semantic",
        Some(json!({ "query": "consumer groups", "explain": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filename"], "kafka.md");
    assert!(results[0]["explain"]["keyword_score"].is_number());

    let (status, body) = send(
        &app,
        "POST",
        "/api/search/semantic",
        Some(json!({ "query": "consumer groups", "mode": "semantic" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("embeddings"));

    let (status, _) = send(
        &app,
        "POST",
        "/api/search/semantic",
        Some(json!({ "query": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/search/semantic",
        Some(json!({ "query": "kafka", "limit": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_knowledge_graph_routes() {
    let app = app("disabled").await;
    let id = create(&app, "alice", "kafka.md", KAFKA).await;

    let (status, body) = send(&app, "GET", &format!("/api/knowledge-graph/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["entities"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["name"].as_str())
        .collect();
    assert!(names.contains(&"Apache Kafka"));
    assert!(names.contains(&"Apache Spark"));

    let (status, body) = send(&app, "GET", "/api/knowledge-graph", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["entities"].as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", "/api/knowledge-graph/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ask_then_profile_and_memory() {
    let app = app("disabled").await;
    create(&app, "alice", "kafka.md", KAFKA).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/chat/ask",
        Some(json!({ "question": "How do consumer groups read partitions?", "user_id": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["citations"].as_array().unwrap().is_empty());
    assert!(body["reasoning"].is_array());
    let confidence = body["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));

    let (status, body) = send(&app, "GET", "/api/users/u1/memory", None).await;
    assert_eq!(status, StatusCode::OK);
    let total = body["short_term"].as_array().unwrap().len()
        + body["long_term"].as_array().unwrap().len();
    assert_eq!(total, 1);

    let (status, body) = send(&app, "GET", "/api/users/u1/profile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["expertise"]["streaming"].as_f64().unwrap() > 0.0);

    let (status, _) = send(
        &app,
        "POST",
        "/api/chat/ask",
        Some(json!({ "question": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_put_patches_fields() {
    let app = app("disabled").await;

    let (status, body) = send(&app, "GET", "/api/users/u9/profile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "u9");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/users/u9/profile",
        Some(json!({ "personalization_level": 0.25, "expertise": { "Kafka": 0.6 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["personalization_level"], 0.25);
    assert_eq!(body["expertise"]["kafka"], 0.6);

    let (_, body) = send(
        &app,
        "PUT",
        "/api/users/u9/profile",
        Some(json!({ "preferred_domains": ["Streaming"] })),
    )
    .await;
    assert_eq!(body["personalization_level"], 0.25);
    assert_eq!(body["preferences"]["preferred_domains"][0], "streaming");

    let (status, body) = send(
        &app,
        "PUT",
        "/api/users/u9/profile",
        Some(json!({ "personalization_level": 2.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("between 0 and 1"));
}
