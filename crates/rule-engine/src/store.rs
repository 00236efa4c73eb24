//! 规则集存储管理
//!
//! 按文档 ID 缓存解析并编译后的规则集，以存储介质的版本标记判断缓存是否过期。
//! 缓存项以 `Arc` 整体替换，评估方持有的旧快照不受后续重载影响。

use crate::compiler::CompiledRule;
use crate::error::{Result, RuleError};
use crate::models::{Rule, RulesetDocument, RulesetMeta, RulesetSummary};
use crate::source::{FsRulesetSource, RulesetSource, SourceVersion};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ruleset_shared::observability::metrics::record_ruleset_load;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 列表中缺失的版本/作者显示为此占位符
const PLACEHOLDER: &str = "—";

/// 缓存的规则集：规则已按优先级排序并编译
#[derive(Debug, Clone)]
pub struct CachedRuleset {
    pub id: String,
    pub meta: RulesetMeta,
    pub rules: Vec<CompiledRule>,
    pub context: Option<Value>,
    pub version: SourceVersion,
    pub loaded_at: DateTime<Utc>,
}

impl CachedRuleset {
    fn build(id: &str, text: &str, version: SourceVersion) -> Result<Self> {
        let mut document = RulesetDocument::from_yaml(text)?;
        document.sort_by_priority();

        Ok(Self {
            id: id.to_string(),
            meta: document.ruleset,
            rules: document.rules.into_iter().map(CompiledRule::compile).collect(),
            context: document.context,
            version,
            loaded_at: Utc::now(),
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 规则集展示名称，未配置时回退到文档 ID
    pub fn display_name(&self) -> &str {
        self.meta.name.as_deref().unwrap_or(&self.id)
    }

    /// 按执行顺序返回规则定义
    pub fn rule_definitions(&self) -> Vec<Rule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }

    pub fn summary(&self) -> RulesetSummary {
        RulesetSummary::Loaded {
            id: self.id.clone(),
            name: self.display_name().to_string(),
            description: self.meta.description.clone(),
            version: self
                .meta
                .version
                .clone()
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            author: self
                .meta
                .author
                .clone()
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            rule_count: self.rule_count(),
            priority_mode: self.meta.priority_mode,
        }
    }
}

/// 文档 ID 仅允许字母、数字、下划线和连字符
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// 规则集存储
#[derive(Clone)]
pub struct RulesetStore {
    source: Arc<dyn RulesetSource>,
    cache: Arc<DashMap<String, Arc<CachedRuleset>>>,
}

impl RulesetStore {
    /// 以指定存储介质创建
    pub fn new(source: impl RulesetSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            cache: Arc::new(DashMap::new()),
        }
    }

    /// 以规则目录创建
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(FsRulesetSource::new(dir))
    }

    /// 当前缓存的规则集数量
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// 加载规则集
    ///
    /// 版本标记未变化时直接返回缓存；`force_reload` 跳过版本检查重新解析。
    /// 解析失败时保留旧缓存，错误返回给调用方。
    #[instrument(skip(self))]
    pub fn load(&self, id: &str, force_reload: bool) -> Result<Arc<CachedRuleset>> {
        if !is_valid_id(id) {
            return Err(RuleError::NotFound(id.to_string()));
        }

        if !force_reload {
            let Some(current) = self.source.version(id)? else {
                self.forget(id);
                return Err(RuleError::NotFound(id.to_string()));
            };

            let cached = self.cache.get(id).map(|e| Arc::clone(e.value()));
            if let Some(cached) = cached.filter(|c| c.version == current) {
                debug!("命中缓存");
                return Ok(cached);
            }
        }

        let Some((text, version)) = self.source.read(id)? else {
            self.forget(id);
            return Err(RuleError::NotFound(id.to_string()));
        };

        match CachedRuleset::build(id, &text, version) {
            Ok(ruleset) => {
                let ruleset = Arc::new(ruleset);
                self.cache.insert(id.to_string(), Arc::clone(&ruleset));
                record_ruleset_load(id, "ok");
                info!(rules = ruleset.rule_count(), "规则集已加载: {}", id);
                Ok(ruleset)
            }
            Err(e) => {
                record_ruleset_load(id, "error");
                warn!(error = %e, "规则集解析失败: {}", id);
                Err(e)
            }
        }
    }

    /// 列出所有规则集
    ///
    /// 单个文档加载失败不会中断列表，该项只携带错误信息。
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RulesetSummary>> {
        let ids = self.source.list_ids()?;

        let summaries: Vec<RulesetSummary> = ids
            .into_iter()
            .map(|id| match self.load(&id, false) {
                Ok(ruleset) => ruleset.summary(),
                Err(e) => RulesetSummary::Failed {
                    id,
                    error: e.to_string(),
                },
            })
            .collect();

        let failed = summaries.iter().filter(|s| s.is_failed()).count();
        if failed > 0 {
            warn!("{} 个规则集加载失败", failed);
        }
        Ok(summaries)
    }

    /// 读取文档原文
    pub fn read_raw(&self, id: &str) -> Result<String> {
        if !is_valid_id(id) {
            return Err(RuleError::NotFound(id.to_string()));
        }

        self.source
            .read(id)?
            .map(|(text, _)| text)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))
    }

    /// 校验并写回文档原文，返回规则数量
    ///
    /// 校验失败时不写入，已有缓存保持不变。
    #[instrument(skip(self, text), fields(bytes = text.len()))]
    pub fn write_raw(&self, id: &str, text: &str) -> Result<usize> {
        if !is_valid_id(id) {
            return Err(RuleError::validation(
                "id",
                format!("非法的规则集 ID '{}'，只允许字母、数字、'_' 和 '-'", id),
            ));
        }
        if text.trim().is_empty() {
            return Err(RuleError::validation("document", "文档内容为空"));
        }

        let document = RulesetDocument::from_yaml(text)?;
        let rule_count = document.rules.len();

        self.source.write(id, text)?;
        self.invalidate(id);

        info!(rules = rule_count, "规则集已写入: {}", id);
        Ok(rule_count)
    }

    /// 丢弃缓存，下次访问重新解析
    #[instrument(skip(self))]
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.cache.remove(id).is_some();
        if removed {
            debug!("缓存已失效");
        }
        removed
    }

    fn forget(&self, id: &str) {
        if self.cache.remove(id).is_some() {
            info!("规则集已被移除: {}", id);
        }
    }
}
