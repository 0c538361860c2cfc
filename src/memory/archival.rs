//! 归档记忆：启用向量的 [`MemoryStore`]
//!
//! 只追加，按向量相似度检索；只能通过 `clear` 清空。
//! 向量在进入这里之前已经算好（见 [`MemoryFamily`](super::family::MemoryFamily)），
//! 因此写入本身不做任何 IO。

use super::store::{MemoryStore, SearchHit};
use crate::embedding::EmbeddingProvider;
use serde_json::Map;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchivalMemory {
    store: MemoryStore,
}

impl ArchivalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_store(store: MemoryStore) -> Self {
        Self { store }
    }

    /// 追加一条内容及其向量
    pub fn add(&mut self, content: impl Into<String>, embedding: Vec<f32>) -> u64 {
        self.store.save(content, Map::new(), Some(embedding))
    }

    /// 按相似度降序返回至多 `top_k` 条，不做阈值过滤
    pub fn search(
        &self,
        query_embedding: &[f32],
        provider: &dyn EmbeddingProvider,
        top_k: usize,
    ) -> Vec<SearchHit> {
        let mut hits = self.store.search_similar(query_embedding, provider, None);
        hits.truncate(top_k);
        hits
    }

    pub fn clear(&mut self) {
        self.store.reset();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MemoryStore {
        &mut self.store
    }
}
