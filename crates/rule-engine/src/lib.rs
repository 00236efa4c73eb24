//! 规则引擎
//!
//! 以 YAML 文档声明条件/动作规则，运行时热加载并对任意 JSON 记录求值：
//! - 条件表达式编译与求值
//! - 动作解释执行
//! - 按优先级执行规则集，支持 first_match
//! - 基于文档版本标记的规则集缓存
//! - REST API

pub mod actions;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod http;
pub mod models;
pub mod operators;
pub mod source;
pub mod store;

pub use actions::ActionExecutor;
pub use compiler::{CompiledRule, Expr, compile_condition};
pub use engine::RulesEngine;
pub use error::{Result, RuleError};
pub use evaluator::{ConditionEvaluator, evaluate_condition, is_truthy};
pub use executor::{RuleExecutor, RunOutcome};
pub use models::{
    Action, BatchRecordResult, Context, EvaluationResult, ExecutionLogEntry, PriorityMode, Rule,
    RulesetDocument, RulesetSummary,
};
pub use operators::{CompareOp, LogicalOperator};
pub use source::{FsRulesetSource, MemoryRulesetSource, RulesetSource, SourceVersion};
pub use store::{CachedRuleset, RulesetStore};
