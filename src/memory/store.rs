//! 通用键控条目存储
//!
//! 每条 [`Entry`] 拥有单调递增的 `id`、文本值、字符串键的元数据和可选向量。
//!
//! | 检索 | 说明 |
//! |------|------|
//! | [`MemoryStore::search_text`] | 在序列化后的条目（不含向量）上做不区分大小写的子串匹配 |
//! | [`MemoryStore::search_similar`] | 按余弦相似度降序排列，相同分数保持插入顺序 |
//! | [`MemoryStore::search_by_text`] | 仅匹配 `value` |
//! | [`MemoryStore::search_by_date`] | `created_at` 落在闭区间内 |
//!
//! 对带向量的条目做 `append` / `replace` 时应经由
//! [`MemoryFamily`](super::family::MemoryFamily)，它会先为新值重新计算向量再提交。

use super::timestamp;
use crate::embedding::EmbeddingProvider;
use crate::error::MemoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// 元数据中用于定位"模块"的键
pub const MODULE_NAME_KEY: &str = "module_name";

/// 存储中的单条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub value: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Entry {
    fn module_name(&self) -> Option<&str> {
        self.metadata.get(MODULE_NAME_KEY).and_then(Value::as_str)
    }

    /// 文本检索用的序列化形式（不含向量）
    fn searchable_text(&self) -> String {
        json!({
            "id": self.id,
            "value": self.value,
            "metadata": self.metadata,
            "created_at": self.created_at.to_rfc3339(),
        })
        .to_string()
        .to_lowercase()
    }
}

/// 检索命中；`score` 仅在向量检索时存在
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: Entry,
    pub score: Option<f32>,
}

/// 对某条记录的待提交修改（见 [`MemoryStore::plan_append`]）
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub module_name: String,
    pub id: u64,
    /// 计算新值时记录的原值
    pub base: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    entries: Vec<Entry>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有条目恢复，id 计数器接在最大 id 之后
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        let next_id = entries
            .iter()
            .map(|e| e.id.saturating_add(1))
            .max()
            .unwrap_or(0);
        Self { entries, next_id }
    }

    /// 新建一条记录，返回其 id
    pub fn save(
        &mut self,
        value: impl Into<String>,
        metadata: Map<String, Value>,
        embedding: Option<Vec<f32>>,
    ) -> u64 {
        let id = self.next_id;
        self.entries.push(Entry {
            id,
            value: value.into(),
            metadata,
            embedding,
            created_at: Utc::now(),
        });
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// 撤销一条记录；被撤销的是最新一条时 id 计数器一并回退
    pub fn remove(&mut self, id: u64) -> Option<Entry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let entry = self.entries.remove(index);
        if id.checked_add(1) == Some(self.next_id) {
            self.next_id = id;
        }
        Some(entry)
    }

    pub fn search_text(&self, query: &str) -> Vec<SearchHit> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.searchable_text().contains(&query))
            .map(|e| SearchHit {
                entry: e.clone(),
                score: None,
            })
            .collect()
    }

    /// 向量检索：`threshold` 为 `Some(t)` 时只保留分数严格大于 `t` 的条目；
    /// 没有向量的条目不参与排序
    pub fn search_similar(
        &self,
        query_embedding: &[f32],
        provider: &dyn EmbeddingProvider,
        threshold: Option<f32>,
    ) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|e| {
                let embedding = e.embedding.as_deref()?;
                let score = provider.similarity(query_embedding, embedding);
                if threshold.is_some_and(|t| score <= t) {
                    return None;
                }
                Some(SearchHit {
                    entry: e.clone(),
                    score: Some(score),
                })
            })
            .collect();
        // sort_by 是稳定排序，同分保持插入顺序
        hits.sort_by(|a, b| {
            b.score
                .unwrap_or(f32::MIN)
                .total_cmp(&a.score.unwrap_or(f32::MIN))
        });
        hits
    }

    /// 计算向第一条 `module_name` 匹配的记录追加文本后的新值，不修改存储
    pub fn plan_append(&self, module_name: &str, text: &str) -> Result<Revision, MemoryError> {
        let entry = self.find_module(module_name)?;
        Ok(Revision {
            module_name: module_name.to_string(),
            id: entry.id,
            base: entry.value.clone(),
            value: format!("{}{}", entry.value, text),
        })
    }

    /// 计算替换后的新值，不修改存储
    pub fn plan_replace(
        &self,
        module_name: &str,
        old: &str,
        new: &str,
    ) -> Result<Revision, MemoryError> {
        let entry = self.find_module(module_name)?;
        if old.is_empty() || !entry.value.contains(old) {
            return Err(MemoryError::ContentNotFound {
                module: module_name.to_string(),
                content: old.to_string(),
            });
        }
        Ok(Revision {
            module_name: module_name.to_string(),
            id: entry.id,
            base: entry.value.clone(),
            value: entry.value.replace(old, new),
        })
    }

    /// 提交修改；`embedding` 为新值对应的向量。
    /// 记录在计划之后被改动过时返回 [`MemoryError::ConcurrentModification`]
    pub fn apply(
        &mut self,
        revision: Revision,
        embedding: Option<Vec<f32>>,
    ) -> Result<u64, MemoryError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == revision.id)
            .ok_or(MemoryError::ModuleNotFound(revision.module_name.clone()))?;
        if entry.value != revision.base {
            return Err(MemoryError::ConcurrentModification(revision.module_name));
        }
        entry.value = revision.value;
        entry.embedding = embedding;
        Ok(entry.id)
    }

    /// 不带向量的存储上直接追加
    pub fn append(&mut self, module_name: &str, text: &str) -> Result<u64, MemoryError> {
        let revision = self.plan_append(module_name, text)?;
        self.apply(revision, None)
    }

    /// 不带向量的存储上直接替换
    pub fn replace(&mut self, module_name: &str, old: &str, new: &str) -> Result<u64, MemoryError> {
        let revision = self.plan_replace(module_name, old, new)?;
        self.apply(revision, None)
    }

    /// 清空所有条目，id 计数器归零
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_id = 0;
    }

    pub fn search_by_text(&self, query: &str) -> Vec<&Entry> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.value.to_lowercase().contains(&query))
            .collect()
    }

    pub fn search_by_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|e| start <= e.created_at && e.created_at <= end)
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_module(&self, module_name: &str) -> Result<&Entry, MemoryError> {
        self.entries
            .iter()
            .find(|e| e.module_name() == Some(module_name))
            .ok_or_else(|| MemoryError::ModuleNotFound(module_name.to_string()))
    }
}

/// 便捷构造元数据
pub fn metadata<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
