//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 单次规则集评估通常在亚毫秒级，默认桶过粗
const EVALUATION_BUCKETS: &[f64] = &[
    0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("rule_evaluation_duration_seconds".to_string()),
            EVALUATION_BUCKETS,
        )?
        .install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "rule_evaluations_total",
        "Total number of ruleset evaluations"
    );
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Ruleset evaluation duration in seconds"
    );
    metrics::describe_counter!("rules_fired_total", "Total number of rules that fired");

    metrics::describe_counter!(
        "ruleset_loads_total",
        "Total number of ruleset document parses (cache misses and reloads)"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次规则集评估
#[inline]
pub fn record_rule_evaluation(ruleset: &str, status: &str, fired: usize, duration_secs: f64) {
    metrics::counter!(
        "rule_evaluations_total",
        "ruleset" => ruleset.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::counter!("rules_fired_total", "ruleset" => ruleset.to_string())
        .increment(fired as u64);

    metrics::histogram!(
        "rule_evaluation_duration_seconds",
        "ruleset" => ruleset.to_string()
    )
    .record(duration_secs);
}

/// 记录规则文档解析
#[inline]
pub fn record_ruleset_load(ruleset: &str, status: &str) {
    metrics::counter!(
        "ruleset_loads_total",
        "ruleset" => ruleset.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
