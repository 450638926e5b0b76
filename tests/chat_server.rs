//! End-to-end tests through the HTTP server.
//!
//! A scripted translator stands in for the model; the `application_db`
//! source is a real read-only SQLite file, so every answered question
//! goes through sanitize → validate → gate → sqlx → formatter.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use askdata::backend_sqlite::SqliteBackend;
use askdata::config::Config;
use askdata::core::backend::{Backend, BackendError};
use askdata::core::models::QueryResult;
use askdata::core::SchemaCatalog;
use askdata::dispatch::BackendRegistry;
use askdata::pipeline::{Pipeline, PARSE_FAILURE_MESSAGE, SECURITY_REFUSAL_MESSAGE};
use askdata::server::run_server_with_pipeline;
use askdata::translate::{TranslationGateway, Translator};

// ─── Test Translator ────────────────────────────────────────────────

/// Answers based on keywords in the question at the end of the prompt.
struct ScriptedTranslator;

#[async_trait]
impl Translator for ScriptedTranslator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let question = prompt
            .rsplit("# Question\n")
            .next()
            .unwrap_or_default()
            .to_lowercase();

        let reply = if question.contains("templates") {
            json!({
                "success": true,
                "query": "SELECT COUNT(*) FROM templates",
                "dataSourceId": "application_db",
                "explanation": "Counting all templates.",
                "confidence": 0.95
            })
            .to_string()
        } else if question.contains("wipe") {
            json!({
                "success": true,
                "query": "DELETE FROM customers",
                "dataSourceId": "warehouse",
                "confidence": 0.9
            })
            .to_string()
        } else if question.contains("usual") {
            json!({
                "success": true,
                "query": "SELECT * FROM customers",
                "confidence": 0.4
            })
            .to_string()
        } else if question.contains("tickets") {
            format!(
                "```json\n{}\n```",
                json!({
                    "success": true,
                    "query": "SELECT subject FROM tickets /* newest first */ ORDER BY id DESC",
                    "dataSourceId": "application_db",
                    "confidence": 0.85
                })
            )
        } else {
            "Hmm, I am not sure what you mean.".to_string()
        };
        Ok(reply)
    }
}

/// Counts calls so tests can prove a backend was never reached.
struct CountingBackend {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Backend for CountingBackend {
    fn kind(&self) -> &str {
        "counting"
    }

    async fn execute(&self, _query: &str) -> Result<QueryResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(QueryResult::default())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

async fn seed_app_db(dir: &Path) -> PathBuf {
    let path = dir.join("app.sqlite");
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    for stmt in [
        "CREATE TABLE templates (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 42) \
         INSERT INTO templates (name) SELECT 'template ' || i FROM n",
        "CREATE TABLE tickets (id INTEGER PRIMARY KEY, subject TEXT)",
        "INSERT INTO tickets (subject) VALUES ('Login broken'), (NULL)",
    ] {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    pool.close().await;
    path
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct TestServer {
    base: String,
    warehouse_calls: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(max_requests: u32, trust_client_id: bool) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let db_path = seed_app_db(tmp.path()).await;

    let catalog = Arc::new(SchemaCatalog::builtin().unwrap());
    let warehouse_calls = Arc::new(AtomicUsize::new(0));
    let mut backends = BackendRegistry::new(
        catalog.describe().iter().map(|s| s.id.clone()),
        "warehouse",
        true,
        Duration::from_secs(5),
    );
    backends.register("application_db", Arc::new(SqliteBackend::open(&db_path).unwrap()));
    backends.register(
        "warehouse",
        Arc::new(CountingBackend {
            calls: warehouse_calls.clone(),
        }),
    );

    let gateway = TranslationGateway::new(Arc::new(ScriptedTranslator), Duration::from_secs(5));
    let pipeline = Arc::new(Pipeline::new(catalog, gateway, backends));

    let port = find_free_port();
    let mut cfg = Config::minimal();
    cfg.server.bind = format!("127.0.0.1:{}", port);
    cfg.rate_limit.max_requests = max_requests;
    cfg.rate_limit.trust_client_id_header = trust_client_id;

    let handle = tokio::spawn(async move {
        run_server_with_pipeline(&cfg, pipeline).await.ok();
    });
    wait_for_server(port).await;

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        warehouse_calls,
        handle,
        _tmp: tmp,
    }
}

async fn chat(server: &TestServer, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", server.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_count_question_is_answered_from_sqlite() {
    let server = start_server(100, false).await;

    let (status, body) = chat(
        &server,
        json!({ "message": "How many templates do we have?", "dataSource": "auto", "messageHistory": [] }),
    )
    .await;

    assert_eq!(status, 200);
    assert!(
        body["response"].as_str().unwrap().contains("42"),
        "unexpected response: {}",
        body
    );
    assert_eq!(body["rowCount"], 1);
    assert_eq!(body["dataSource"], "application_db");
    assert_eq!(body["query"], "SELECT COUNT(*) FROM templates");
    assert_eq!(body["confidence"], 0.95);
    assert!(body["executionTime"].as_f64().unwrap() >= 0.0);
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_delete_is_refused_without_backend_call() {
    let server = start_server(100, false).await;

    let (status, body) = chat(&server, json!({ "message": "Please wipe the customers", "dataSource": "auto" })).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"], SECURITY_REFUSAL_MESSAGE);
    assert!(body["error"].is_string());
    assert!(body.get("query").is_none());
    assert_eq!(server.warehouse_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_low_confidence_asks_for_clarification() {
    let server = start_server(100, false).await;

    let (status, body) = chat(&server, json!({ "message": "Show me the usual", "dataSource": "auto" })).await;

    assert_eq!(status, 200);
    assert!(body["response"].as_str().unwrap().contains("40%"));
    assert_eq!(body["confidence"], 0.4);
    assert_eq!(body["dataSource"], "warehouse");
    assert_eq!(server.warehouse_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_json_translation_is_not_understood() {
    let server = start_server(100, false).await;

    let (status, body) = chat(&server, json!({ "message": "Tell me a joke" })).await;

    assert_eq!(status, 200);
    assert_eq!(body["response"], PARSE_FAILURE_MESSAGE);
    assert!(body.get("query").is_none());
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_fenced_reply_with_comments_lists_rows() {
    let server = start_server(100, false).await;

    let (status, body) = chat(
        &server,
        json!({
            "message": "Latest tickets?",
            "dataSource": "application_db",
            "messageHistory": [
                { "role": "user", "content": "hi", "timestamp": "2024-05-01T10:00:00Z" },
                { "role": "assistant", "content": "Hello! Ask me about your data." }
            ]
        }),
    )
    .await;

    assert_eq!(status, 200, "unexpected body: {}", body);
    assert_eq!(body["query"], "SELECT subject FROM tickets ORDER BY id DESC");
    assert_eq!(body["rowCount"], 2);
    let response = body["response"].as_str().unwrap();
    assert!(response.contains("I found 2 results"));
    assert!(response.contains("N/A"));
    assert!(response.contains("Login broken"));
}

#[tokio::test]
async fn test_missing_message_is_bad_request() {
    let server = start_server(100, false).await;

    let (status, body) = chat(&server, json!({ "dataSource": "auto" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn test_validate_endpoint() {
    let server = start_server(100, false).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/validate", server.base))
        .json(&json!({ "query": "SELECT 1; DR/**/OP TABLE customers" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["safe"], false);
    assert_eq!(body["sanitized"], "SELECT 1; DROP TABLE customers");
    assert!(body["reason"].is_string());

    let body: Value = client
        .post(format!("{}/validate", server.base))
        .json(&json!({ "query": "select name   from templates" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["safe"], true);
    assert!(body.get("reason").is_none());
}

#[tokio::test]
async fn test_sources_endpoint() {
    let server = start_server(100, false).await;

    let body: Value = reqwest::get(format!("{}/sources", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sources = body["sources"].as_array().unwrap();
    let ids: Vec<&str> = sources.iter().map(|s| s["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"warehouse"));
    assert!(ids.contains(&"crm"));

    let app = sources.iter().find(|s| s["id"] == "application_db").unwrap();
    assert_eq!(app["backend"], "sqlite");
    assert_eq!(app["isDefault"], false);
    let crm = sources.iter().find(|s| s["id"] == "crm").unwrap();
    assert!(crm["backend"].is_null());
}

#[tokio::test]
async fn test_rate_limit_per_trusted_client_id() {
    let server = start_server(2, true).await;
    let client = reqwest::Client::new();
    let url = format!("{}/validate", server.base);

    for _ in 0..2 {
        let resp = client
            .post(&url)
            .header("x-client-id", "alice")
            .json(&json!({ "query": "SELECT 1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    let resp = client
        .post(&url)
        .header("x-client-id", "alice")
        .json(&json!({ "query": "SELECT 1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 429);
    assert!(resp.headers().get("retry-after").is_some());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "rate_limited");

    // another client is unaffected, and health is never limited
    let resp = client
        .post(&url)
        .header("x-client-id", "bob")
        .json(&json!({ "query": "SELECT 1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let resp = client.get(format!("{}/health", server.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn test_rotating_client_ids_share_the_peer_window() {
    let server = start_server(2, false).await;
    let client = reqwest::Client::new();
    let url = format!("{}/validate", server.base);

    let mut statuses = Vec::new();
    for i in 0..3 {
        let resp = client
            .post(&url)
            .header("x-client-id", format!("client-{}", i))
            .json(&json!({ "query": "SELECT 1" }))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);
}
