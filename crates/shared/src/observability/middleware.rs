//! HTTP 中间件

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span, warn};

use super::metrics;

/// 未匹配任何路由时的指标标签
const UNMATCHED_ROUTE: &str = "<unmatched>";

/// HTTP 请求追踪和指标中间件
///
/// 指标按路由模板（如 `/api/evaluate/{id}`）聚合，避免每个规则集 ID 产生一条时间序列；
/// span 中记录实际请求路径。需通过 `Router::layer` 挂载才能拿到路由模板。
///
/// ```ignore
/// let app = router.layer(middleware::from_fn(http_tracing));
/// ```
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_string(), |m| m.as_str().to_string());

    let span = info_span!(
        "http_request",
        method = %method,
        path = %path,
        route = %route,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let latency = start.elapsed();
    let status = response.status();

    span.record("status", status.as_u16());
    span.record("latency_ms", latency.as_millis() as i64);

    if status.is_server_error() {
        span.in_scope(|| warn!(status = status.as_u16(), "请求处理失败"));
    }

    metrics::record_http_request(&method, &route, status.as_u16(), latency.as_secs_f64());

    response
}
