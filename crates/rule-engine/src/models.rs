//! 规则引擎领域模型

use crate::error::{Result, RuleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// 评估上下文：一次评估独占的可变键值记录
pub type Context = Map<String, Value>;

/// 规则未声明优先级时的默认值
pub const DEFAULT_PRIORITY: i64 = 50;

/// 按点号路径读取上下文字段（如 "applicant.address.city"）
///
/// 任一段不存在或中间值不是对象时返回 None，不视为错误。
pub fn lookup_path<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = context.get(parts.next()?)?;

    for part in parts {
        match current {
            Value::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }

    Some(current)
}

/// 规则匹配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    /// 第一条匹配的规则执行后立即停止
    FirstMatch,
    /// 执行所有匹配的规则；未知取值也按此处理
    #[default]
    #[serde(other)]
    All,
}

impl PriorityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::FirstMatch => "first_match",
        }
    }
}

/// 规则集元数据（文档中的 `ruleset` 块）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RulesetMeta {
    #[serde(default, deserialize_with = "de_opt_scalar")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_scalar_or_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "de_opt_scalar")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "de_opt_scalar")]
    pub author: Option<String>,
    #[serde(default)]
    pub priority_mode: PriorityMode,
    /// 引擎不关心的其他元数据，原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "default_rule_id", deserialize_with = "de_rule_id")]
    pub id: String,
    #[serde(default, deserialize_with = "de_opt_scalar")]
    pub name: Option<String>,
    /// 整数或浮点数，越小越先执行
    #[serde(default = "default_priority")]
    pub priority: Number,
    #[serde(default, deserialize_with = "de_scalar_or_empty")]
    pub description: String,
    /// 空字符串视为恒真
    #[serde(default, deserialize_with = "de_scalar_or_empty")]
    pub condition: String,
    #[serde(default, deserialize_with = "de_actions")]
    pub actions: Vec<Action>,
}

impl Rule {
    /// 展示名称，未配置时回退到规则 ID
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// 排序用的优先级数值
    pub fn priority_rank(&self) -> f64 {
        self.priority.as_f64().unwrap_or(DEFAULT_PRIORITY as f64)
    }
}

fn default_rule_id() -> String {
    "???".to_string()
}

fn default_priority() -> Number {
    Number::from(DEFAULT_PRIORITY)
}

/// 动作描述符
///
/// 文档中的写法为 `{multiply: base_premium, by: 0.9}`、`{set: status, value: approved}`、
/// `{append: tags, value: senior}`、`{log: "Premium is {base_premium}"}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub enum Action {
    Set { field: String, value: Value },
    Multiply { field: String, by: Option<Value> },
    Add { field: String, by: Option<Value> },
    Subtract { field: String, by: Option<Value> },
    Divide { field: String, by: Option<Value> },
    Append { field: String, value: Value },
    Log { message: String },
}

impl Action {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Set { .. } => "SET",
            Self::Multiply { .. } => "MULTIPLY",
            Self::Add { .. } => "ADD",
            Self::Subtract { .. } => "SUBTRACT",
            Self::Divide { .. } => "DIVIDE",
            Self::Append { .. } => "APPEND",
            Self::Log { .. } => "LOG",
        }
    }
}

/// 动作在文档中的原始形态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multiply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    add: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subtract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    divide: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    append: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    by: Option<Value>,
}

impl TryFrom<RawAction> for Action {
    type Error = String;

    fn try_from(raw: RawAction) -> std::result::Result<Self, Self::Error> {
        let value = raw.value.unwrap_or(Value::Null);
        let by = raw.by;

        // 同一条目声明多个动作时按固定顺序取第一个
        let action = if let Some(field) = raw.set {
            Self::Set { field, value }
        } else if let Some(field) = raw.multiply {
            Self::Multiply { field, by }
        } else if let Some(field) = raw.add {
            Self::Add { field, by }
        } else if let Some(field) = raw.subtract {
            Self::Subtract { field, by }
        } else if let Some(field) = raw.divide {
            Self::Divide { field, by }
        } else if let Some(field) = raw.append {
            Self::Append { field, value }
        } else if let Some(message) = raw.log {
            Self::Log {
                message: scalar_to_string(message).unwrap_or_default(),
            }
        } else {
            return Err(
                "动作必须声明 set/multiply/add/subtract/divide/append/log 之一".to_string(),
            );
        };

        Ok(action)
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Set { field, value } => Self {
                set: Some(field),
                value: Some(value),
                ..Default::default()
            },
            Action::Multiply { field, by } => Self {
                multiply: Some(field),
                by,
                ..Default::default()
            },
            Action::Add { field, by } => Self {
                add: Some(field),
                by,
                ..Default::default()
            },
            Action::Subtract { field, by } => Self {
                subtract: Some(field),
                by,
                ..Default::default()
            },
            Action::Divide { field, by } => Self {
                divide: Some(field),
                by,
                ..Default::default()
            },
            Action::Append { field, value } => Self {
                append: Some(field),
                value: Some(value),
                ..Default::default()
            },
            Action::Log { message } => Self {
                log: Some(Value::String(message)),
                ..Default::default()
            },
        }
    }
}

/// 规则文档：元数据 + 规则序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetDocument {
    pub ruleset: RulesetMeta,
    #[serde(default, deserialize_with = "de_rules")]
    pub rules: Vec<Rule>,
    /// 输入字段说明，供管理界面展示
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl RulesetDocument {
    /// 解析并校验 YAML 文档
    ///
    /// `ruleset` 与 `rules` 两个顶层键必须存在，`rules` 允许为空。
    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: Value = serde_yaml::from_str(text).map_err(|e| RuleError::Validation {
            key: None,
            message: format!("YAML 语法错误: {}", e),
        })?;

        let Value::Object(top) = &raw else {
            return Err(RuleError::Validation {
                key: None,
                message: "文档顶层必须是映射".to_string(),
            });
        };

        match top.get("ruleset") {
            None => return Err(RuleError::validation("ruleset", "缺少 'ruleset' 键")),
            Some(Value::Object(_)) => {}
            Some(_) => return Err(RuleError::validation("ruleset", "'ruleset' 必须是映射")),
        }

        match top.get("rules") {
            None => return Err(RuleError::validation("rules", "缺少 'rules' 键")),
            Some(Value::Array(_)) | Some(Value::Null) => {}
            Some(_) => return Err(RuleError::validation("rules", "'rules' 必须是序列")),
        }

        serde_json::from_value(raw).map_err(|e| RuleError::validation("rules", e.to_string()))
    }

    /// 按优先级升序稳定排序，同优先级保持文档顺序
    pub fn sort_by_priority(&mut self) {
        self.rules
            .sort_by(|a, b| a.priority_rank().total_cmp(&b.priority_rank()));
    }

    pub fn name(&self) -> Option<&str> {
        self.ruleset.name.as_deref()
    }
}

/// 单条规则的执行记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionLogEntry {
    pub rule_id: String,
    pub name: String,
    pub priority: Number,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub condition: String,
    pub matched: bool,
    pub actions_executed: usize,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 评估元数据
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationMetadata {
    pub ruleset: String,
    pub ruleset_name: Option<String>,
    pub version: Option<String>,
    pub priority_mode: PriorityMode,
    pub evaluated_at: DateTime<Utc>,
    pub elapsed_ms: f64,
}

/// 评估结果
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub context: Context,
    pub rules_fired: Vec<String>,
    pub rules_skipped: Vec<String>,
    pub rules_fired_count: usize,
    pub rules_total: usize,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub metadata: EvaluationMetadata,
}

/// 规则集列表项；单个文档加载失败时只携带 ID 和错误信息
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RulesetSummary {
    Loaded {
        id: String,
        name: String,
        description: String,
        version: String,
        author: String,
        rule_count: usize,
        priority_mode: PriorityMode,
    },
    Failed {
        id: String,
        error: String,
    },
}

impl RulesetSummary {
    pub fn id(&self) -> &str {
        match self {
            Self::Loaded { id, .. } | Self::Failed { id, .. } => id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// 规则集详情
#[derive(Debug, Clone, Serialize)]
pub struct RulesetDetail {
    pub ruleset: RulesetMeta,
    pub rules: Vec<Rule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub rule_count: usize,
}

/// 文档写回结果
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub saved: bool,
    pub rule_count: usize,
}

/// 批量评估中单条记录的结果，失败只影响该条记录
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecordResult {
    pub index: usize,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_fired: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchRecordResult {
    pub fn from_outcome(index: usize, input: Value, outcome: Result<EvaluationResult>) -> Self {
        match outcome {
            Ok(result) => Self {
                index,
                input,
                output: Some(result.context),
                rules_fired: Some(result.rules_fired),
                elapsed_ms: Some(result.metadata.elapsed_ms),
                error: None,
            },
            Err(e) => Self {
                index,
                input,
                output: None,
                rules_fired: None,
                elapsed_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

// ==================== 反序列化辅助 ====================

/// 标量转字符串：YAML 中 `version: 1.2` 或 `id: 7` 会被解析为数字
fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn de_opt_scalar<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(scalar_to_string))
}

fn de_scalar_or_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(de_opt_scalar(d)?.unwrap_or_default())
}

fn de_rule_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(de_opt_scalar(d)?.unwrap_or_else(default_rule_id))
}

fn de_actions<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<Action>, D::Error> {
    Ok(Option::<Vec<Action>>::deserialize(d)?.unwrap_or_default())
}

fn de_rules<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<Rule>, D::Error> {
    Ok(Option::<Vec<Rule>>::deserialize(d)?.unwrap_or_default())
}
