//! REST API
//!
//! 薄封装：解析请求、在阻塞线程池中调用 `RulesEngine`、统一响应信封。
//! 成功响应为 `{"status": "ok", ...}`，失败响应为 `{"status": "error", "message": ..., "details"?}`。

use crate::engine::RulesEngine;
use crate::error::RuleError;
use crate::models::BatchRecordResult;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: RulesEngine,
}

impl AppState {
    pub fn new(engine: RulesEngine) -> Self {
        Self { engine }
    }
}

/// 构建 API 路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/rulesets", get(list_rulesets))
        .route("/api/rulesets/{id}", get(get_ruleset))
        .route(
            "/api/rulesets/{id}/yaml",
            get(get_ruleset_yaml).put(update_ruleset_yaml),
        )
        .route("/api/evaluate/{id}", post(evaluate))
        .route("/api/evaluate/{id}/batch", post(batch_evaluate))
}

/// 构建带状态的完整路由
pub fn router(engine: RulesEngine) -> Router {
    routes().with_state(AppState::new(engine))
}

/// 请求超时层，超时返回 408
pub fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

// ==================== 错误 ====================

/// API 错误
#[derive(Debug)]
pub enum ApiError {
    Engine(RuleError),
    BadRequest(String),
    Internal(String),
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        Self::Engine(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Engine(RuleError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Engine(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Self::Engine(RuleError::NotFound(id)) => json!({
                "status": "error",
                "code": "NOT_FOUND",
                "message": format!("规则集 '{}' 不存在", id),
            }),
            Self::Engine(e) if e.is_client_error() => json!({
                "status": "error",
                "code": e.code(),
                "message": "规则文档结构非法",
                "details": e.to_string(),
            }),
            Self::Engine(e @ RuleError::Io(_)) => {
                error!(error = %e, "规则文档读写失败");
                json!({
                    "status": "error",
                    "code": e.code(),
                    "message": "服务内部错误，请稍后重试",
                })
            }
            Self::Engine(e) => json!({
                "status": "error",
                "code": e.code(),
                "message": "评估失败",
                "details": e.to_string(),
            }),
            Self::BadRequest(message) => json!({
                "status": "error",
                "code": "BAD_REQUEST",
                "message": message,
            }),
            Self::Internal(e) => {
                error!(error = %e, "内部错误");
                json!({
                    "status": "error",
                    "code": "INTERNAL_ERROR",
                    "message": "服务内部错误，请稍后重试",
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// 在阻塞线程池中执行引擎调用
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// 包装为成功信封，`status` 位于最前
fn ok(data: impl Serialize) -> ApiResult<Json<Value>> {
    let mut envelope = Map::new();
    envelope.insert("status".to_string(), Value::String("ok".to_string()));

    match serde_json::to_value(data).map_err(RuleError::from)? {
        Value::Object(fields) => envelope.extend(fields),
        other => {
            envelope.insert("data".to_string(), other);
        }
    }
    Ok(Json(Value::Object(envelope)))
}

/// 解析 JSON 请求体，空请求体视为 `{}`
fn parse_body(body: &Bytes) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("请求体不是合法的 JSON: {}", e)))
}

// ==================== 处理器 ====================

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let engine = state.engine.clone();
    let rulesets = blocking(move || engine.list_rulesets()).await?;

    ok(json!({
        "engine": "running",
        "rulesets_loaded": rulesets.len(),
    }))
}

async fn list_rulesets(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let engine = state.engine.clone();
    let rulesets = blocking(move || engine.list_rulesets()).await?;

    ok(json!({
        "count": rulesets.len(),
        "rulesets": rulesets,
    }))
}

async fn get_ruleset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let engine = state.engine.clone();
    let detail = blocking(move || engine.get_ruleset_detail(&id)).await?;
    ok(detail)
}

async fn get_ruleset_yaml(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let engine = state.engine.clone();
    let text = blocking(move || engine.get_raw_document(&id)).await?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

async fn update_ruleset_yaml(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> ApiResult<Json<Value>> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("请求体不能为空".to_string()));
    }

    let engine = state.engine.clone();
    let ruleset_id = id.clone();
    let outcome = blocking(move || engine.put_raw_document(&ruleset_id, &body)).await?;

    info!(ruleset = %id, rules = outcome.rule_count, "规则集已通过 API 更新");
    ok(outcome)
}

/// 评估查询参数，取值 "true"（不区分大小写）时开启
#[derive(Debug, Default, Deserialize)]
pub struct EvaluateParams {
    pub debug: Option<String>,
    pub reload: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

async fn evaluate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EvaluateParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let input = parse_body(&body)?;
    if !input.is_object() {
        return Err(ApiError::BadRequest("请求体必须是 JSON 对象".to_string()));
    }

    let debug = flag(&params.debug);
    let force_reload = flag(&params.reload);

    let engine = state.engine.clone();
    let record = input.clone();
    let result = blocking(move || engine.evaluate(&id, &record, force_reload)).await?;

    let mut response = json!({
        "input": input,
        "output": result.context,
        "rules_fired": result.rules_fired,
        "rules_fired_count": result.rules_fired_count,
        "rules_total": result.rules_total,
        "metadata": result.metadata,
    });
    if debug {
        response["execution_trace"] = serde_json::to_value(&result.execution_log).map_err(RuleError::from)?;
    }

    ok(response)
}

/// 批量评估：每条记录在独立的阻塞任务中评估，失败互不影响
async fn batch_evaluate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body = parse_body(&body)?;
    if !body.is_object() {
        return Err(ApiError::BadRequest("请求体必须是 JSON 对象".to_string()));
    }
    let records = match body.get("records") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(records)) => records.clone(),
        Some(_) => return Err(ApiError::BadRequest("'records' 必须是列表".to_string())),
    };

    let tasks = records.into_iter().enumerate().map(|(index, record)| {
        let engine = state.engine.clone();
        let id = id.clone();
        async move {
            let input = record.clone();
            let outcome = tokio::task::spawn_blocking(move || engine.evaluate(&id, &record, false))
                .await
                .unwrap_or_else(|e| Err(RuleError::EvaluationFailure(e.to_string())));
            BatchRecordResult::from_outcome(index, input, outcome)
        }
    });
    let results = join_all(tasks).await;

    ok(json!({
        "total_records": results.len(),
        "ruleset": id,
        "results": results,
    }))
}
