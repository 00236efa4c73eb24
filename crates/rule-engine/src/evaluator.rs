//! 条件评估器
//!
//! 遍历编译后的条件语法树，对上下文的只读视图求值。评估过程没有副作用。
//!
//! 比较语义：
//! - 整数与浮点数统一按数值比较
//! - 字符串按字典序比较，布尔值 false < true
//! - 字段缺失等同于 null，仅与 null 相等
//! - 列表/对象只支持 `==` 与 `!=`（结构比较）
//! - 类型不兼容时 `==` 为假、`!=` 为真、大小比较为假，不会报错

use crate::compiler::{Expr, Operand, compile_condition};
use crate::error::Result;
use crate::models::{Context, lookup_path};
use crate::operators::{CompareOp, LogicalOperator};
use serde_json::{Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估编译后的条件
    pub fn evaluate(expr: &Expr, context: &Context) -> bool {
        match expr {
            Expr::Always => true,
            Expr::Logical {
                op: LogicalOperator::And,
                children,
            } => children.iter().all(|c| Self::evaluate(c, context)),
            Expr::Logical {
                op: LogicalOperator::Or,
                children,
            } => children.iter().any(|c| Self::evaluate(c, context)),
            Expr::Not(inner) => !Self::evaluate(inner, context),
            Expr::Compare { left, op, right } => {
                let left = Self::resolve(left, context);
                let right = Self::resolve(right, context);
                Self::compare(&left, *op, &right)
            }
            Expr::Truthy(operand) => is_truthy(&Self::resolve(operand, context)),
        }
    }

    /// 解析操作数；缺失字段解析为 null
    fn resolve<'a>(operand: &'a Operand, context: &'a Context) -> Cow<'a, Value> {
        match operand {
            Operand::Literal(v) => Cow::Borrowed(v),
            Operand::Path(path) => {
                lookup_path(context, path).map_or(Cow::Owned(Value::Null), Cow::Borrowed)
            }
            Operand::Group(expr) => Cow::Owned(Value::Bool(Self::evaluate(expr, context))),
        }
    }

    /// 比较两个值
    pub fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
        match op {
            CompareOp::Eq => values_equal(left, right),
            CompareOp::Neq => !values_equal(left, right),
            CompareOp::Gt => ordering(left, right) == Some(Ordering::Greater),
            CompareOp::Lt => ordering(left, right) == Some(Ordering::Less),
            CompareOp::Gte => matches!(
                ordering(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Lte => matches!(
                ordering(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// 编译并评估条件字符串
///
/// 只有条件本身无法解析时才返回错误。
pub fn evaluate_condition(condition: &str, context: &Context) -> Result<bool> {
    let expr = compile_condition(condition)?;
    Ok(ConditionEvaluator::evaluate(&expr, context))
}

/// 真值判定：仅 false、null（含缺失字段）和数值 0 为假
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(_) | Value::Array(_) | Value::Object(_) => true,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}
