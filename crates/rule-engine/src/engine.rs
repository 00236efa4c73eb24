//! 规则引擎门面
//!
//! 对外暴露评估、批量评估、规则集浏览和文档读写。所有方法都是同步的，
//! 可能阻塞在存储介质的 I/O 上；异步调用方应放到阻塞线程池中执行。

use crate::error::{Result, RuleError};
use crate::executor::RuleExecutor;
use crate::models::{
    BatchRecordResult, EvaluationMetadata, EvaluationResult, RulesetDetail, RulesetSummary,
    WriteOutcome,
};
use crate::source::RulesetSource;
use crate::store::RulesetStore;
use chrono::Utc;
use ruleset_shared::observability::metrics::record_rule_evaluation;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// 规则引擎
#[derive(Clone)]
pub struct RulesEngine {
    store: RulesetStore,
}

impl RulesEngine {
    pub fn new(store: RulesetStore) -> Self {
        Self { store }
    }

    /// 以规则目录创建
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(RulesetStore::from_dir(dir))
    }

    /// 以任意存储介质创建
    pub fn with_source(source: impl RulesetSource + 'static) -> Self {
        Self::new(RulesetStore::new(source))
    }

    pub fn store(&self) -> &RulesetStore {
        &self.store
    }

    /// 对单条输入记录评估规则集
    ///
    /// 输入记录不会被修改；结果中的上下文是其深拷贝经规则处理后的状态。
    #[instrument(skip(self, input))]
    pub fn evaluate(&self, id: &str, input: &Value, force_reload: bool) -> Result<EvaluationResult> {
        let started = Instant::now();
        let result = self.evaluate_inner(id, input, force_reload, started);

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(r) => record_rule_evaluation(id, "ok", r.rules_fired_count, elapsed),
            Err(e) => {
                warn!(error = %e, "规则集评估失败: {}", id);
                record_rule_evaluation(id, "error", 0, elapsed);
            }
        }
        result
    }

    fn evaluate_inner(
        &self,
        id: &str,
        input: &Value,
        force_reload: bool,
        started: Instant,
    ) -> Result<EvaluationResult> {
        let evaluated_at = Utc::now();

        let Value::Object(record) = input else {
            return Err(RuleError::EvaluationFailure(
                "输入记录必须是 JSON 对象".to_string(),
            ));
        };

        let ruleset = self.store.load(id, force_reload)?;
        let outcome = RuleExecutor::run(&ruleset.rules, ruleset.meta.priority_mode, record);

        let elapsed_ms = (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;
        debug!(
            fired = outcome.rules_fired.len(),
            skipped = outcome.rules_skipped.len(),
            elapsed_ms,
            "评估完成"
        );

        Ok(EvaluationResult {
            rules_fired_count: outcome.rules_fired.len(),
            rules_total: ruleset.rule_count(),
            context: outcome.context,
            rules_fired: outcome.rules_fired,
            rules_skipped: outcome.rules_skipped,
            execution_log: outcome.execution_log,
            metadata: EvaluationMetadata {
                ruleset: id.to_string(),
                ruleset_name: ruleset.meta.name.clone(),
                version: ruleset.meta.version.clone(),
                priority_mode: ruleset.meta.priority_mode,
                evaluated_at,
                elapsed_ms,
            },
        })
    }

    /// 逐条评估多条记录，单条失败只记录在该条结果中
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub fn evaluate_batch(&self, id: &str, records: &[Value]) -> Vec<BatchRecordResult> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                BatchRecordResult::from_outcome(
                    index,
                    record.clone(),
                    self.evaluate(id, record, false),
                )
            })
            .collect()
    }

    /// 列出所有规则集
    pub fn list_rulesets(&self) -> Result<Vec<RulesetSummary>> {
        self.store.list()
    }

    /// 获取规则集详情（总是重新读取文档）
    pub fn get_ruleset_detail(&self, id: &str) -> Result<RulesetDetail> {
        let ruleset = self.store.load(id, true)?;

        Ok(RulesetDetail {
            ruleset: ruleset.meta.clone(),
            rules: ruleset.rule_definitions(),
            context: ruleset.context.clone(),
            rule_count: ruleset.rule_count(),
        })
    }

    /// 读取文档原文
    pub fn get_raw_document(&self, id: &str) -> Result<String> {
        self.store.read_raw(id)
    }

    /// 校验并写回文档，下一次评估即使用新规则
    pub fn put_raw_document(&self, id: &str, text: &str) -> Result<WriteOutcome> {
        let rule_count = self.store.write_raw(id, text)?;
        Ok(WriteOutcome {
            saved: true,
            rule_count,
        })
    }
}
