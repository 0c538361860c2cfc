//! Embedding 能力
//!
//! 引擎只依赖 [`EmbeddingProvider`] 的两个操作：`embed` 与 `similarity`。
//!
//! | 实现 | 说明 |
//! |------|------|
//! | [`OpenAiEmbeddingProvider`] | OpenAI 兼容的 `/embeddings` 接口 |
//! | [`HashEmbeddingProvider`] | 本地确定性词袋哈希，离线开发 / 测试用 |
//! | [`RetryingProvider`] | 包装任意实现，提供超时与指数退避重试 |
//!
//! 不同实现产生的向量互不可比，同一记忆族应始终使用同一个 provider。

mod hash;
mod openai;
mod retry;

pub use hash::HashEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;
pub use retry::RetryingProvider;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// 文本向量化接口
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本转换为定长向量
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;

    /// 两个向量的相似度，取值 [-1, 1]，对称，自身相似度为 1
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    /// 用于日志的实现名
    fn name(&self) -> &str;
}

/// 余弦相似度；维度不一致或存在零向量时返回 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// 按配置构造远程 provider，并套上超时重试
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let remote = OpenAiEmbeddingProvider::from_config(config)?;
    Ok(Arc::new(RetryingProvider::new(
        Arc::new(remote),
        config.timeout_ms,
        config.max_retries,
        config.retry_delay_ms,
    )))
}
