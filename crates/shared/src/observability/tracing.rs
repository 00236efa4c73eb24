//! 日志初始化模块
//!
//! 基于 tracing-subscriber 构建日志输出，支持 JSON 与人类可读两种格式。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 构建环境过滤器
///
/// RUST_LOG 优先，其次是配置中的 log_level，都无效时回退到 info。
pub fn build_env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化 tracing 日志
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = build_env_filter(config);

    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_log_level_falls_back() {
        let config = ObservabilityConfig {
            log_level: "not a [valid filter".to_string(),
            ..Default::default()
        };
        // 无效过滤表达式不应该 panic
        let _ = build_env_filter(&config);
    }
}
