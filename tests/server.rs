//! HTTP API tests against an in-process server on an ephemeral port.

use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use docfusion::federation::{Capabilities, FederationOptions, IndexFederation};
use docfusion::server::router;
use docfusion_core::embedding::HashingEmbedder;

struct TestServer {
    base: String,
    client: reqwest::Client,
    _data: TempDir,
}

async fn start() -> TestServer {
    let data = TempDir::new().unwrap();
    let federation = IndexFederation::open(
        FederationOptions::new(data.path()),
        Capabilities::new(Arc::new(HashingEmbedder::new(64))),
    )
    .await
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(federation), 4);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        _data: data,
    }
}

impl TestServer {
    async fn upload(&self, filename: &str, body: &str) -> reqwest::Response {
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);
        self.client
            .post(format!("{}/documents", self.base))
            .json(&json!({ "filename": filename, "content_base64": encoded }))
            .send()
            .await
            .unwrap()
    }

    async fn ask(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/ask", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

const MANUAL: &str = "The drill press spindle runs at 1200 rpm.\x0c\
    Always clamp the workpiece before drilling.";

#[tokio::test]
async fn test_health_and_root() {
    let server = start().await;

    let health: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let root: Value = server
        .client
        .get(&server.base)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["service"], "docfusion");
    assert_eq!(root["documents"], json!([]));
}

#[tokio::test]
async fn test_upload_then_ask() {
    let server = start().await;

    let resp = server.upload("manual.txt", MANUAL).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["filename"], "manual.txt");
    assert_eq!(body["added"], true);
    assert_eq!(body["passages"], 2);

    let resp = server.ask(json!({ "question": "spindle rpm" })).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["answer"].as_str().unwrap().contains("1200"));
    assert!(body.get("chunks").is_none());

    let resp = server
        .ask(json!({ "question": "spindle rpm", "best_only": false, "top_k": 1 }))
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["chunks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ask_validation_errors() {
    let server = start().await;

    let resp = server.ask(json!({ "question": "   " })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = server.ask(json!({ "question": "x", "top_k": 0 })).await;
    assert_eq!(resp.status(), 400);

    let resp = server.ask(json!({ "question": "x", "style": "poetic" })).await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_ask_on_empty_corpus() {
    let server = start().await;
    let body: Value = server
        .ask(json!({ "question": "anything" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["answer"], "No documents indexed yet.");
}

#[tokio::test]
async fn test_upload_rejects_bad_input() {
    let server = start().await;

    let resp = server.upload("../escape.txt", MANUAL).await;
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .post(format!("{}/documents", server.base))
        .json(&json!({ "filename": "ok.txt", "content_base64": "!!not base64!!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_delete_and_reset() {
    let server = start().await;
    server.upload("manual.txt", MANUAL).await;
    server.upload("other.txt", "Unrelated notes.").await;

    let resp = server
        .client
        .delete(format!("{}/documents/manual.txt", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = server
        .client
        .delete(format!("{}/documents/manual.txt", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = server
        .client
        .post(format!("{}/reset", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let root: Value = server
        .client
        .get(&server.base)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["documents"], json!([]));
}
