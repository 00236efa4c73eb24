//! REST API 测试

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use rule_engine::{RulesEngine, http};
use serde_json::{Value, json};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const PREMIUMS: &str = r#"
ruleset:
  name: Premiums
  version: "1.0"
  author: QA
rules:
  - id: senior_discount
    priority: 10
    condition: "age > 60"
    actions:
      - multiply: base_premium
        by: 0.9
      - log: "Premium is {base_premium}"
  - id: smoker_surcharge
    priority: 20
    condition: "smoker"
    actions:
      - add: base_premium
        by: 100
"#;

fn create_test_app() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("premiums.yaml"), PREMIUMS).unwrap();
    let app = http::router(RulesEngine::from_dir(dir.path()));
    (dir, app)
}

async fn send(app: Router, method: &str, uri: &str, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, serde_json::to_string(&body).unwrap()).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, bytes) = send(app, "GET", uri, Body::empty()).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (_dir, app) = create_test_app();

    let (status, body) = get_json(app, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engine"], "running");
    assert_eq!(body["rulesets_loaded"], 1);
}

#[tokio::test]
async fn test_list_rulesets() {
    let (_dir, app) = create_test_app();

    let (status, body) = get_json(app, "/api/rulesets").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["rulesets"][0]["id"], "premiums");
    assert_eq!(body["rulesets"][0]["name"], "Premiums");
    assert_eq!(body["rulesets"][0]["rule_count"], 2);
}

#[tokio::test]
async fn test_get_ruleset_detail() {
    let (_dir, app) = create_test_app();

    let (status, body) = get_json(app, "/api/rulesets/premiums").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ruleset"]["author"], "QA");
    assert_eq!(body["rule_count"], 2);
    assert_eq!(body["rules"][0]["id"], "senior_discount");
    assert_eq!(body["rules"][0]["actions"][0]["multiply"], "base_premium");
}

#[tokio::test]
async fn test_get_missing_ruleset_is_404() {
    let (_dir, app) = create_test_app();

    let (status, body) = get_json(app, "/api/rulesets/unknown").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_get_raw_yaml() {
    let (_dir, app) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/rulesets/premiums/yaml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(std::str::from_utf8(&body).unwrap(), PREMIUMS);
}

#[tokio::test]
async fn test_put_yaml_hot_reloads() {
    let (_dir, app) = create_test_app();
    let updated = PREMIUMS.replace("age > 60", "age > 50");

    let (status, bytes) = send(app.clone(), "PUT", "/api/rulesets/premiums/yaml", updated).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);
    assert_eq!(body["rule_count"], 2);

    let (status, body) = send_json(
        app,
        "POST",
        "/api/evaluate/premiums",
        json!({"age": 55, "base_premium": 400.0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rules_fired"], json!(["senior_discount"]));
}

#[tokio::test]
async fn test_put_invalid_yaml_is_400() {
    let (_dir, app) = create_test_app();

    let (status, bytes) = send(
        app.clone(),
        "PUT",
        "/api/rulesets/premiums/yaml",
        "ruleset: {name: Broken}\n",
    )
    .await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["details"].as_str().unwrap().contains("rules"));

    // 原文档保持不变
    let (_, bytes) = send(app, "GET", "/api/rulesets/premiums/yaml", Body::empty()).await;
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), PREMIUMS);
}

#[tokio::test]
async fn test_put_empty_body_is_400() {
    let (_dir, app) = create_test_app();

    let (status, _) = send(app, "PUT", "/api/rulesets/premiums/yaml", "  \n").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_evaluate() {
    let (_dir, app) = create_test_app();
    let input = json!({"age": 67, "smoker": false, "base_premium": 400.0});

    let (status, body) = send_json(app, "POST", "/api/evaluate/premiums", input.clone()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["input"], input);
    assert_eq!(body["output"]["base_premium"], json!(360.0));
    assert_eq!(body["rules_fired"], json!(["senior_discount"]));
    assert_eq!(body["rules_fired_count"], 1);
    assert_eq!(body["rules_total"], 2);
    assert_eq!(body["metadata"]["ruleset"], "premiums");
    assert_eq!(body["metadata"]["priority_mode"], "all");
    assert!(body.get("execution_trace").is_none());
}

#[tokio::test]
async fn test_evaluate_with_debug_trace() {
    let (_dir, app) = create_test_app();

    let (status, body) = send_json(
        app,
        "POST",
        "/api/evaluate/premiums?debug=true&reload=true",
        json!({"age": 67, "base_premium": 400.0}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let trace = body["execution_trace"].as_array().unwrap();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0]["matched"], true);
    assert_eq!(trace[0]["logs"][1], "Premium is 360.0");
    assert_eq!(trace[1]["matched"], false);
}

#[tokio::test]
async fn test_evaluate_missing_ruleset_is_404() {
    let (_dir, app) = create_test_app();

    let (status, _) = send_json(app, "POST", "/api/evaluate/nope", json!({})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_evaluate_rejects_malformed_body() {
    let (_dir, app) = create_test_app();

    let (status, bytes) = send(app.clone(), "POST", "/api/evaluate/premiums", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "error");

    let (status, _) = send_json(app, "POST", "/api/evaluate/premiums", json!([1, 2])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_evaluate_empty_body_uses_empty_record() {
    let (_dir, app) = create_test_app();

    let (status, bytes) = send(app, "POST", "/api/evaluate/premiums", Body::empty()).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rules_fired_count"], 0);
    assert_eq!(body["output"], json!({"tags": []}));
}

#[tokio::test]
async fn test_batch_evaluate() {
    let (_dir, app) = create_test_app();

    let (status, body) = send_json(
        app,
        "POST",
        "/api/evaluate/premiums/batch",
        json!({"records": [
            {"age": 70, "base_premium": 100},
            "not a record",
            {"age": 30, "smoker": true, "base_premium": 100}
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ruleset"], "premiums");
    assert_eq!(body["total_records"], 3);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["index"], 0);
    assert_eq!(results[0]["output"]["base_premium"], json!(90.0));
    assert!(results[1]["error"].is_string());
    assert_eq!(results[1]["input"], "not a record");
    assert_eq!(results[2]["rules_fired"], json!(["smoker_surcharge"]));
    assert_eq!(results[2]["output"]["base_premium"], json!(200.0));
}

#[tokio::test]
async fn test_batch_records_must_be_list() {
    let (_dir, app) = create_test_app();

    let (status, body) = send_json(
        app,
        "POST",
        "/api/evaluate/premiums/batch",
        json!({"records": {"age": 1}}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_timeout_layer_returns_408() {
    let app = Router::new()
        .route(
            "/slow",
            axum::routing::get(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "done"
            }),
        )
        .layer(http::timeout_layer(Duration::from_millis(10)));

    let (status, _) = send(app, "GET", "/slow", Body::empty()).await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn test_batch_rejects_non_object_body() {
    let (_dir, app) = create_test_app();

    let (status, body) = send_json(
        app,
        "POST",
        "/api/evaluate/premiums/batch",
        json!([{"age": 70, "base_premium": 100}]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "BAD_REQUEST");
}
