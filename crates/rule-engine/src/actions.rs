//! 动作执行器
//!
//! 按顺序对可变上下文执行规则的动作列表，每个动作产生一行可读日志。
//! 同一规则中后面的动作能看到前面动作的修改；任何动作都不会中断序列。

use crate::models::{Action, Context};
use serde_json::{Number, Value};

/// 算术结果保留的小数位数
const ROUND_DECIMALS: i32 = 4;

/// 动作执行器
pub struct ActionExecutor;

impl ActionExecutor {
    /// 执行动作列表，返回每个动作的日志
    pub fn execute(actions: &[Action], context: &mut Context, rule_id: &str) -> Vec<String> {
        actions
            .iter()
            .map(|action| Self::execute_action(action, context, rule_id))
            .collect()
    }

    fn execute_action(action: &Action, ctx: &mut Context, rule_id: &str) -> String {
        match action {
            Action::Set { field, value } => {
                ctx.insert(field.clone(), value.clone());
                format!("[{}] SET {} = {}", rule_id, field, value)
            }
            Action::Multiply { field, by } => {
                let factor = operand(by.as_ref(), 1.0);
                let result = Self::apply(ctx, field, |current| current * factor);
                format!(
                    "[{}] MULTIPLY {} × {} → {}",
                    rule_id,
                    field,
                    display_operand(by.as_ref(), factor),
                    result
                )
            }
            Action::Add { field, by } => {
                let amount = operand(by.as_ref(), 0.0);
                let result = Self::apply(ctx, field, |current| current + amount);
                format!(
                    "[{}] ADD {} + {} → {}",
                    rule_id,
                    field,
                    display_operand(by.as_ref(), amount),
                    result
                )
            }
            Action::Subtract { field, by } => {
                let amount = operand(by.as_ref(), 0.0);
                let result = Self::apply(ctx, field, |current| current - amount);
                format!(
                    "[{}] SUBTRACT {} - {} → {}",
                    rule_id,
                    field,
                    display_operand(by.as_ref(), amount),
                    result
                )
            }
            Action::Divide { field, by } => {
                let divisor = operand(by.as_ref(), 1.0);
                // 除数为 0 时保持字段不变
                if divisor != 0.0 {
                    Self::apply(ctx, field, |current| current / divisor);
                }
                let current = ctx.get(field).cloned().unwrap_or(Value::Null);
                format!(
                    "[{}] DIVIDE {} / {} → {}",
                    rule_id,
                    field,
                    display_operand(by.as_ref(), divisor),
                    current
                )
            }
            Action::Append { field, value } => {
                let slot = ctx.entry(field.clone()).or_insert(Value::Null);
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                if let Value::Array(items) = slot {
                    items.push(value.clone());
                }
                format!("[{}] APPEND {} → {}", rule_id, value, field)
            }
            Action::Log { message } => render_template(message, ctx),
        }
    }

    /// 读取字段数值（缺失或非数值按 0 处理），计算并写回四舍五入后的结果
    fn apply<F>(ctx: &mut Context, field: &str, op: F) -> Value
    where
        F: FnOnce(f64) -> f64,
    {
        let current = ctx.get(field).and_then(to_number).unwrap_or(0.0);
        let result = float_value(round(op(current)));
        ctx.insert(field.to_string(), result.clone());
        result
    }
}

/// 数值强转：数字原样，数字字符串解析，布尔值转 1/0
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn operand(by: Option<&Value>, default: f64) -> f64 {
    by.and_then(to_number).unwrap_or(default)
}

fn display_operand(by: Option<&Value>, resolved: f64) -> String {
    match by {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => float_value(resolved).to_string(),
    }
}

fn round(value: f64) -> f64 {
    let factor = 10f64.powi(ROUND_DECIMALS);
    (value * factor).round() / factor
}

/// 非有限结果（溢出）无法表示为 JSON 数字，写入 null
fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// 值的展示形式：字符串不带引号，其余使用 JSON 表示
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 将 `{key}` 占位符替换为上下文中同名顶层字段的值
///
/// 单遍扫描，替换结果不会再次展开；未知的占位符原样保留。
pub fn render_template(message: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                match ctx.get(key) {
                    Some(value) => out.push_str(&display_value(value)),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
