//! 规则执行器
//!
//! 单遍按优先级执行规则集：评估条件，匹配则执行动作，记录执行轨迹。
//! 所有规则共享同一个可变上下文，后面的规则能看到前面规则的修改。

use crate::actions::ActionExecutor;
use crate::compiler::CompiledRule;
use crate::evaluator::ConditionEvaluator;
use crate::models::{Context, ExecutionLogEntry, PriorityMode};
use tracing::{debug, warn};

/// 一次执行的结果
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub context: Context,
    pub rules_fired: Vec<String>,
    pub rules_skipped: Vec<String>,
    pub execution_log: Vec<ExecutionLogEntry>,
}

/// 规则执行器
pub struct RuleExecutor;

impl RuleExecutor {
    /// 对已排序的规则执行一遍
    ///
    /// `input` 只读，执行在其深拷贝上进行；`tags` 字段缺失时补为空列表。
    pub fn run(rules: &[CompiledRule], mode: PriorityMode, input: &Context) -> RunOutcome {
        let mut outcome = RunOutcome {
            context: input.clone(),
            ..Default::default()
        };
        outcome
            .context
            .entry("tags")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));

        for compiled in rules {
            let rule = &compiled.rule;
            let mut entry = ExecutionLogEntry {
                rule_id: rule.id.clone(),
                name: rule.display_name().to_string(),
                priority: rule.priority.clone(),
                description: String::new(),
                condition: rule.condition.clone(),
                matched: false,
                actions_executed: 0,
                logs: Vec::new(),
                error: None,
            };

            let expr = match &compiled.condition {
                Ok(expr) => expr,
                Err(message) => {
                    warn!(rule_id = %rule.id, error = %message, "条件无法解析，跳过规则");
                    entry.error = Some(message.clone());
                    outcome.rules_skipped.push(rule.id.clone());
                    outcome.execution_log.push(entry);
                    continue;
                }
            };

            if !ConditionEvaluator::evaluate(expr, &outcome.context) {
                debug!(rule_id = %rule.id, "规则未匹配");
                outcome.rules_skipped.push(rule.id.clone());
                outcome.execution_log.push(entry);
                continue;
            }

            let logs = ActionExecutor::execute(&rule.actions, &mut outcome.context, &rule.id);
            debug!(rule_id = %rule.id, actions = rule.actions.len(), "规则已触发");

            entry.matched = true;
            entry.description = rule.description.clone();
            entry.actions_executed = rule.actions.len();
            entry.logs = logs;
            outcome.rules_fired.push(rule.id.clone());
            outcome.execution_log.push(entry);

            if mode == PriorityMode::FirstMatch {
                debug!(rule_id = %rule.id, "first_match 模式，停止执行");
                break;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rule;
    use serde_json::{Value, json};

    fn compile_rules(rules: Value) -> Vec<CompiledRule> {
        let rules: Vec<Rule> = serde_json::from_value(rules).unwrap();
        rules.into_iter().map(CompiledRule::compile).collect()
    }

    fn input(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => panic!("input must be an object"),
        }
    }

    #[test]
    fn test_insurance_example() {
        let rules = compile_rules(json!([{
            "id": "senior_discount",
            "condition": "age > 60",
            "actions": [{"multiply": "base_premium", "by": 0.9}]
        }]));
        let outcome = RuleExecutor::run(
            &rules,
            PriorityMode::All,
            &input(json!({"age": 67, "base_premium": 400.0})),
        );

        assert_eq!(outcome.context["base_premium"], json!(360.0));
        assert_eq!(outcome.rules_fired, vec!["senior_discount"]);
        assert!(outcome.rules_skipped.is_empty());
        assert_eq!(outcome.context["tags"], json!([]));
    }

    #[test]
    fn test_rules_chain_through_context() {
        let rules = compile_rules(json!([
            {"id": "surcharge", "condition": "smoker", "actions": [{"add": "premium", "by": 100}]},
            {"id": "cap", "condition": "premium > 450", "actions": [{"set": "premium", "value": 450}]}
        ]));
        let outcome = RuleExecutor::run(
            &rules,
            PriorityMode::All,
            &input(json!({"smoker": true, "premium": 400})),
        );

        assert_eq!(outcome.rules_fired, vec!["surcharge", "cap"]);
        assert_eq!(outcome.context["premium"], json!(450));
    }

    #[test]
    fn test_first_match_stops() {
        let rules = compile_rules(json!([
            {"id": "a", "condition": "x > 0", "actions": [{"append": "tags", "value": "a"}]},
            {"id": "b", "condition": "x > 0", "actions": [{"append": "tags", "value": "b"}]}
        ]));
        let outcome =
            RuleExecutor::run(&rules, PriorityMode::FirstMatch, &input(json!({"x": 1})));

        assert_eq!(outcome.rules_fired, vec!["a"]);
        assert!(outcome.rules_skipped.is_empty());
        assert_eq!(outcome.execution_log.len(), 1);
        assert_eq!(outcome.context["tags"], json!(["a"]));
    }

    #[test]
    fn test_condition_error_is_recorded_and_skipped() {
        let rules = compile_rules(json!([
            {"id": "broken", "condition": "age >>> 3"},
            {"id": "ok", "condition": "age > 3", "actions": [{"log": "age {age}"}]}
        ]));
        let outcome = RuleExecutor::run(&rules, PriorityMode::All, &input(json!({"age": 5})));

        assert_eq!(outcome.rules_skipped, vec!["broken"]);
        assert_eq!(outcome.rules_fired, vec!["ok"]);
        let broken = &outcome.execution_log[0];
        assert!(!broken.matched);
        assert!(broken.error.is_some());
        assert_eq!(outcome.execution_log[1].logs, vec!["age 5"]);
    }

    #[test]
    fn test_trace_entry_for_match() {
        let rules = compile_rules(json!([{
            "id": "r1",
            "name": "Rule one",
            "priority": 5,
            "description": "desc",
            "condition": "",
            "actions": [{"set": "ok", "value": true}, {"log": "done"}]
        }]));
        let outcome = RuleExecutor::run(&rules, PriorityMode::All, &Context::new());

        let entry = &outcome.execution_log[0];
        assert!(entry.matched);
        assert_eq!(entry.name, "Rule one");
        assert_eq!(entry.priority.as_i64(), Some(5));
        assert_eq!(entry.description, "desc");
        assert_eq!(entry.actions_executed, 2);
        assert_eq!(entry.logs.len(), 2);
    }

    #[test]
    fn test_input_not_mutated() {
        let rules = compile_rules(json!([
            {"id": "r", "actions": [{"set": "age", "value": 99}, {"append": "tags", "value": "x"}]}
        ]));
        let original = input(json!({"age": 30, "tags": ["keep"]}));
        let snapshot = original.clone();

        let outcome = RuleExecutor::run(&rules, PriorityMode::All, &original);

        assert_eq!(original, snapshot);
        assert_eq!(outcome.context["tags"], json!(["keep", "x"]));
    }
}
