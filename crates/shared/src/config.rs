//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use crate::observability::ObservabilityConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 单个请求的超时时间（秒）
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_seconds: 30,
        }
    }
}

/// 规则文档存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// 规则 YAML 文件所在目录
    pub dir: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dir: "rules".to_string(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub rules: RulesConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（RULES_ 前缀，层级用 `__` 分隔，如 RULES_SERVER__PORT -> server.port）
    /// 5. RULES_DIR 直接覆盖规则目录
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RULES_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("RULES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        if let Ok(dir) = std::env::var("RULES_DIR") {
            config.rules.dir = dir;
        }

        Ok(config)
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
