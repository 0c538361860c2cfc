//! 类型化记忆：在独立记忆族之上按固定格式存取条目
//!
//! | 类型 | 条目 | 默认文件 |
//! |------|------|----------|
//! | [`EntityMemory`] | [`EntityItem`] | `entity_memory.json` |
//! | [`LongTermMemory`] | [`LongTermItem`] | `long_term_memory.json` |
//! | [`ShortTermMemory`] | [`ShortTermItem`] | `short_term_memory.json` |
//!
//! 每次写入后立即落盘（write-through）。

mod entity;
mod long_term;
mod short_term;

pub use entity::{EntityItem, EntityMemory};
pub use long_term::{LongTermItem, LongTermMemory};
pub use short_term::{ShortTermItem, ShortTermMemory};

use super::family::MemoryFamily;
use super::store::SearchHit;
use crate::error::Result;
use serde_json::{Map, Value};

/// 三种类型化记忆共用的存取逻辑
struct TypedStore {
    kind: &'static str,
    family: MemoryFamily,
}

impl TypedStore {
    async fn open(kind: &'static str, family: MemoryFamily) -> Result<Self> {
        family.load().await?;
        Ok(Self { kind, family })
    }

    async fn save(&self, value: String, metadata: Map<String, Value>) -> Result<u64> {
        self.family.save_persisted(value, metadata).await
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.family.search(query).await
    }

    async fn reset(&self) -> Result<()> {
        self.family
            .reset_persisted()
            .await
            .map_err(|e| e.context(format!("error resetting the {} memory", self.kind)))
    }
}
