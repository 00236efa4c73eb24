//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则集未找到: {0}")]
    NotFound(String),

    /// 文档结构校验失败，`key` 指向缺失或非法的键
    #[error("规则集校验失败: {message}")]
    Validation {
        key: Option<String>,
        message: String,
    },

    /// 条件表达式无法解析
    #[error("条件解析失败{}: {message}", .position.map(|p| format!(" (位置 {})", p)).unwrap_or_default())]
    Condition {
        position: Option<usize>,
        message: String,
    },

    #[error("规则执行失败: {0}")]
    EvaluationFailure(String),

    #[error("规则集读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuleError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            key: Some(key.into()),
            message: message.into(),
        }
    }

    pub fn condition(position: usize, message: impl Into<String>) -> Self {
        Self::Condition {
            position: Some(position),
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Condition { .. } => "CONDITION_ERROR",
            Self::EvaluationFailure(_) => "EVALUATION_FAILURE",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "SERIALIZATION_ERROR",
        }
    }

    /// 是否属于调用方提交的文档内容有误
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
