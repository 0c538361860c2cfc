//! 记忆族：一组核心 / 归档 / 回忆记忆及其快照文件
//!
//! 锁的约定：
//!
//! - `state`（读写锁）只在纯内存的读写期间持有，临界区内不做 IO、不 await 外部服务
//! - `writer`（互斥锁）串行化同一记忆族的所有修改与持久化，保证快照与内存状态一致
//! - 计算 embedding 时两把锁都不持有；`append` / `replace` 提交前核对原值，
//!   记录在此期间被改动则重新计划

use super::archival::ArchivalMemory;
use super::core::CoreMemory;
use super::persistence::PersistenceManager;
use super::recall::{Message, RecallMemory};
use super::store::{MemoryStore, Revision, SearchHit};
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, MemoryError, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// 相似度阈值的默认值
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

/// `append` / `replace` 遇到并发改动时的最多尝试次数
const MAX_REVISION_ATTEMPTS: u32 = 3;

/// 一个记忆族在内存中的全部内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub core: CoreMemory,
    pub archival: ArchivalMemory,
    pub recall: RecallMemory,
}

/// `clear_memory` 的清理范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Core,
    Archival,
    Recall,
    All,
}

impl ClearTarget {
    /// 精确匹配（区分大小写）；其余取值一律按 `All` 处理
    pub fn parse(raw: &str) -> Self {
        match raw {
            "core" => ClearTarget::Core,
            "archival" => ClearTarget::Archival,
            "recall" => ClearTarget::Recall,
            _ => ClearTarget::All,
        }
    }
}

impl fmt::Display for ClearTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearTarget::Core => write!(f, "core"),
            ClearTarget::Archival => write!(f, "archival"),
            ClearTarget::Recall => write!(f, "recall"),
            ClearTarget::All => write!(f, "all"),
        }
    }
}

pub struct MemoryFamily {
    name: String,
    path: PathBuf,
    state: RwLock<MemoryState>,
    writer: Mutex<()>,
    persistence: Arc<PersistenceManager>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    similarity_threshold: f32,
}

impl MemoryFamily {
    /// 创建空的记忆族；需要恢复已有快照时调用 [`load`](Self::load)
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        persistence: Arc<PersistenceManager>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            state: RwLock::new(MemoryState::default()),
            writer: Mutex::new(()),
            persistence,
            embedder,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    // ── 持久化 ──────────────────────────────────────────────────────────────

    /// 从快照文件恢复，替换当前内存状态
    pub async fn load(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        let loaded = self.persistence.load(&self.path).await?;
        *self.state.write().await = loaded;
        info!(family = %self.name, "📂 记忆族已就绪");
        Ok(())
    }

    /// 把当前状态原子地写入快照文件
    pub async fn persist(&self) -> Result<()> {
        let writer = self.writer.lock().await;
        self.persist_locked(&writer).await
    }

    async fn persist_locked(&self, _writer: &MutexGuard<'_, ()>) -> Result<()> {
        let bytes = {
            let state = self.state.read().await;
            self.persistence.encode(&state)?
        };
        self.persistence.write_atomic(&self.path, &bytes).await
    }

    // ── 通用访问 ────────────────────────────────────────────────────────────

    pub async fn read<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    /// 同步修改；闭包内不得做 IO
    pub async fn update<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let _writer = self.writer.lock().await;
        let mut state = self.state.write().await;
        f(&mut state)
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.read().await.clone()
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        match &self.embedder {
            Some(provider) => {
                let vector = provider.embed(text).await?;
                self.check_dimensions(&vector).await?;
                Ok(Some(vector))
            }
            None => Ok(None),
        }
    }

    /// 新向量的维度必须与存储中已有向量一致
    async fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        let expected = self
            .read(|s| {
                s.archival
                    .store()
                    .entries()
                    .iter()
                    .find_map(|e| e.embedding.as_ref().map(Vec::len))
            })
            .await;
        match expected {
            Some(expected) if expected != vector.len() => Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    // ── MemoryStore 操作（作用于归档存储）─────────────────────────────────────

    /// 新建一条记录；embedding 失败时存储不变
    pub async fn save(&self, value: impl Into<String>, metadata: Map<String, Value>) -> Result<u64> {
        self.save_inner(value.into(), metadata, false).await
    }

    /// 同 [`save`](Self::save)，并在同一次写锁内落盘
    pub async fn save_persisted(
        &self,
        value: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<u64> {
        self.save_inner(value.into(), metadata, true).await
    }

    async fn save_inner(
        &self,
        value: String,
        metadata: Map<String, Value>,
        persist: bool,
    ) -> Result<u64> {
        let embedding = self.embed(&value).await?;
        let writer = self.writer.lock().await;
        let id = self
            .state
            .write()
            .await
            .archival
            .store_mut()
            .save(value, metadata, embedding);
        debug!(family = %self.name, id, "记录已写入");
        if persist && let Err(e) = self.persist_locked(&writer).await {
            self.state.write().await.archival.store_mut().remove(id);
            warn!(family = %self.name, id, "↩️ 落盘失败，已撤销写入");
            return Err(e);
        }
        Ok(id)
    }

    /// 有 embedder 时按相似度检索（阈值过滤），否则做文本子串检索
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        match &self.embedder {
            Some(provider) => {
                let query_embedding = provider.embed(query).await?;
                self.check_dimensions(&query_embedding).await?;
                let state = self.state.read().await;
                Ok(state.archival.store().search_similar(
                    &query_embedding,
                    provider.as_ref(),
                    Some(self.similarity_threshold),
                ))
            }
            None => Ok(self.state.read().await.archival.store().search_text(query)),
        }
    }

    /// 向 `module_name` 对应的记录追加文本，并为新值重新计算向量
    pub async fn append(&self, module_name: &str, text: &str) -> Result<u64> {
        self.revise(module_name, |store| store.plan_append(module_name, text))
            .await
    }

    /// 在 `module_name` 对应的记录中替换文本，并为新值重新计算向量
    pub async fn replace(&self, module_name: &str, old: &str, new: &str) -> Result<u64> {
        self.revise(module_name, |store| store.plan_replace(module_name, old, new))
            .await
    }

    /// 计划 → 无锁计算向量 → 持 `writer` 提交；原值已变时重新计划
    async fn revise(
        &self,
        module_name: &str,
        plan: impl Fn(&MemoryStore) -> std::result::Result<Revision, MemoryError>,
    ) -> Result<u64> {
        for attempt in 1..=MAX_REVISION_ATTEMPTS {
            let revision = plan(self.state.read().await.archival.store())?;
            let embedding = self.embed(&revision.value).await?;

            let _writer = self.writer.lock().await;
            let mut state = self.state.write().await;
            match state.archival.store_mut().apply(revision, embedding) {
                Err(MemoryError::ConcurrentModification(_)) => {
                    debug!(family = %self.name, module = module_name, attempt, "记录已被改动，重新计划");
                }
                result => return Ok(result?),
            }
        }
        Err(MemoryError::ConcurrentModification(module_name.to_string()).into())
    }

    /// 清空存储
    pub async fn reset(&self) {
        self.update(|s| s.archival.clear()).await;
        info!(family = %self.name, "🧹 存储已清空");
    }

    /// 清空存储并在同一次写锁内落盘
    pub async fn reset_persisted(&self) -> Result<()> {
        let writer = self.writer.lock().await;
        let previous = std::mem::take(&mut self.state.write().await.archival);
        if let Err(e) = self.persist_locked(&writer).await {
            self.state.write().await.archival = previous;
            warn!(family = %self.name, "↩️ 落盘失败，已恢复清空前的存储");
            return Err(e);
        }
        info!(family = %self.name, "🧹 存储已清空");
        Ok(())
    }

    // ── 归档记忆 ────────────────────────────────────────────────────────────

    pub async fn add_archival(&self, content: impl Into<String>) -> Result<u64> {
        self.save(content, Map::new()).await
    }

    /// 归档检索，不做阈值过滤；没有 embedder 时退化为文本检索
    pub async fn search_archival(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        match &self.embedder {
            Some(provider) => {
                let query_embedding = provider.embed(query).await?;
                let state = self.state.read().await;
                Ok(state
                    .archival
                    .search(&query_embedding, provider.as_ref(), top_k))
            }
            None => {
                let mut hits = self.state.read().await.archival.store().search_text(query);
                hits.truncate(top_k);
                Ok(hits)
            }
        }
    }

    // ── 回忆记忆 ────────────────────────────────────────────────────────────

    pub async fn record_message(&self, message: Message) {
        self.update(|s| s.recall.add_message(message)).await;
    }

    pub async fn search_messages(&self, query: &str) -> Vec<Message> {
        self.read(|s| s.recall.search_by_text(query).into_iter().cloned().collect())
            .await
    }

    // ── 核心记忆 ────────────────────────────────────────────────────────────

    /// 模块不存在时以给定上限和内容创建
    pub async fn ensure_module(&self, name: &str, limit: usize, content: &str) -> Result<bool> {
        self.update(|s| -> Result<bool> {
            if s.core.contains(name) {
                return Ok(false);
            }
            s.core.add_module(name, limit, content)?;
            Ok(true)
        })
        .await
    }

    pub async fn append_to_module(&self, name: &str, text: &str) -> Result<()> {
        self.update(|s| s.core.append(name, text)).await?;
        Ok(())
    }

    pub async fn replace_in_module(&self, name: &str, old: &str, new: &str) -> Result<()> {
        self.update(|s| s.core.replace(name, old, new)).await?;
        Ok(())
    }

    pub async fn render_core(&self) -> String {
        self.read(|s| s.core.render()).await
    }

    pub async fn clear(&self, target: ClearTarget) {
        self.update(|s| match target {
            ClearTarget::Core => s.core.clear(),
            ClearTarget::Archival => s.archival.clear(),
            ClearTarget::Recall => s.recall.clear(),
            ClearTarget::All => *s = MemoryState::default(),
        })
        .await;
        info!(family = %self.name, target = %target, "🧹 记忆已清空");
    }
}

impl fmt::Debug for MemoryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFamily")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}
