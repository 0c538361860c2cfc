//! 分层记忆
//!
//! | 层次 | 实现 | 作用 |
//! |------|------|------|
//! | 核心记忆 | [`CoreMemory`] | 有字符上限的命名文本块，始终放在提示词里 |
//! | 归档记忆 | [`ArchivalMemory`] | 只追加的向量存储，按相似度召回 |
//! | 回忆记忆 | [`RecallMemory`] | 按时间顺序的对话日志 |
//! | 通用存储 | [`MemoryStore`] | 带 metadata 的条目，可按模块名追加 / 替换 |
//!
//! 三层记忆组成一个 [`MemoryFamily`]，对应一个快照文件，由 [`PersistenceManager`] 读写。
//! [`typed`] 下的实体 / 长期 / 短期记忆各自占用一个记忆族。
//!
//! ```rust,no_run
//! use echo_memory::memory::{MemoryFamily, PersistenceManager};
//! use echo_memory::embedding::{EmbeddingProvider, HashEmbeddingProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> echo_memory::error::Result<()> {
//! let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
//! let family = MemoryFamily::new(
//!     "main",
//!     "data/memgpt.json",
//!     Arc::new(PersistenceManager::default()),
//!     Some(embedder),
//! );
//! family.load().await?;
//! family.add_archival("Paris is in France").await?;
//! let hits = family.search_archival("capital of France", 3).await?;
//! family.persist().await?;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

pub mod archival;
pub mod core;
pub mod family;
pub mod persistence;
pub mod recall;
pub mod store;
pub mod timestamp;
pub mod typed;

pub use archival::ArchivalMemory;
pub use self::core::{CoreMemory, MemoryModule};
pub use family::{ClearTarget, DEFAULT_SIMILARITY_THRESHOLD, MemoryFamily, MemoryState};
pub use persistence::{ArchivalRecord, PersistenceManager, Snapshot};
pub use recall::{Message, RecallMemory};
pub use store::{Entry, MemoryStore, Revision, SearchHit};
pub use typed::{
    EntityItem, EntityMemory, LongTermItem, LongTermMemory, ShortTermItem, ShortTermMemory,
};
