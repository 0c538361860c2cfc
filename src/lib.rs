pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod executor;
pub mod memory;
pub mod testing;

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::embedding::{EmbeddingProvider, HashEmbeddingProvider};
    pub use crate::engine::MemoryEngine;
    pub use crate::error::{EngineError, Result};
    pub use crate::executor::{FunctionExecutor, MemoryCall};
    pub use crate::memory::{
        CoreMemory, EntityItem, EntityMemory, LongTermItem, LongTermMemory, MemoryFamily,
        MemoryStore, Message, PersistenceManager, ShortTermItem, ShortTermMemory,
    };
}
