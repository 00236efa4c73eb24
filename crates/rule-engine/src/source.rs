//! 规则文档存储介质
//!
//! `RulesetSource` 抽象了文档的读写与版本标记，存储层据此判断缓存是否过期。
//! 内置两种实现：目录下的 YAML 文件，以及用于嵌入和测试的内存存储。

use crate::error::Result;
use dashmap::DashMap;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// 文档版本标记，变化即表示文档内容可能已修改
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceVersion {
    stamp: u128,
    len: u64,
}

impl SourceVersion {
    pub fn new(stamp: u128, len: u64) -> Self {
        Self { stamp, len }
    }

    fn from_metadata(meta: &fs::Metadata) -> Self {
        let stamp = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        Self::new(stamp, meta.len())
    }
}

/// 规则文档存储介质
///
/// 所有方法都可能阻塞在 I/O 上。
pub trait RulesetSource: Send + Sync {
    /// 列出所有文档 ID
    fn list_ids(&self) -> Result<Vec<String>>;

    /// 获取文档当前版本，文档不存在时返回 None
    fn version(&self, id: &str) -> Result<Option<SourceVersion>>;

    /// 读取文档原文及其版本，文档不存在时返回 None
    fn read(&self, id: &str) -> Result<Option<(String, SourceVersion)>>;

    /// 覆盖写入文档（不存在则创建）
    fn write(&self, id: &str, text: &str) -> Result<()>;
}

// ==================== 文件目录 ====================

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// 基于目录的文档存储：`<dir>/<id>.yaml` 或 `<dir>/<id>.yml`，以修改时间作为版本
#[derive(Debug, Clone)]
pub struct FsRulesetSource {
    dir: PathBuf,
}

impl FsRulesetSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 定位已存在的文档文件
    fn locate(&self, id: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", id, ext)))
            .find(|p| p.is_file())
    }
}

impl RulesetSource for FsRulesetSource {
    fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if !is_yaml || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn version(&self, id: &str) -> Result<Option<SourceVersion>> {
        let Some(path) = self.locate(id) else {
            return Ok(None);
        };
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(SourceVersion::from_metadata(&meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, id: &str) -> Result<Option<(String, SourceVersion)>> {
        let Some(path) = self.locate(id) else {
            return Ok(None);
        };
        // 内容与版本取自同一个句柄，并发的重命名替换不会让旧内容配上新版本
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version = SourceVersion::from_metadata(&file.metadata()?);
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        Ok(Some((text, version)))
    }

    fn write(&self, id: &str, text: &str) -> Result<()> {
        let path = self
            .locate(id)
            .unwrap_or_else(|| self.dir.join(format!("{}.yaml", id)));

        // 先写临时文件再重命名，读取方不会看到写了一半的文档
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), "规则文档已写入");
        Ok(())
    }
}

// ==================== 内存 ====================

/// 内存文档存储，以递增修订号作为版本
#[derive(Debug, Default)]
pub struct MemoryRulesetSource {
    documents: DashMap<String, (String, u64)>,
    revision: AtomicU64,
}

impl MemoryRulesetSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以初始文档构建
    pub fn with_documents<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source = Self::new();
        for (id, text) in documents {
            source.insert(id, text);
        }
        source
    }

    pub fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.documents.insert(id.into(), (text.into(), revision));
    }
}

impl RulesetSource for MemoryRulesetSource {
    fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    fn version(&self, id: &str) -> Result<Option<SourceVersion>> {
        Ok(self
            .documents
            .get(id)
            .map(|e| SourceVersion::new(u128::from(e.1), e.0.len() as u64)))
    }

    fn read(&self, id: &str) -> Result<Option<(String, SourceVersion)>> {
        Ok(self.documents.get(id).map(|e| {
            let (text, revision) = e.value();
            (
                text.clone(),
                SourceVersion::new(u128::from(*revision), text.len() as u64),
            )
        }))
    }

    fn write(&self, id: &str, text: &str) -> Result<()> {
        self.insert(id, text);
        Ok(())
    }
}
