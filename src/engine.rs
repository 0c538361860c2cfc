//! 记忆引擎：把主记忆族、执行器和三种类型化记忆组装在一起
//!
//! ```text
//! <data_dir>/
//!   memgpt.json             主记忆族（核心 / 归档 / 回忆）
//!   short_term_memory.json
//!   long_term_memory.json
//!   entity_memory.json
//! ```

use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::executor::{FunctionExecutor, MemoryCall, dispatch_error_message};
use crate::memory::{
    EntityMemory, LongTermMemory, MemoryFamily, Message, PersistenceManager, ShortTermMemory,
};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

pub const MAIN_FILE_NAME: &str = "memgpt.json";
pub const PERSONA_MODULE: &str = "persona";
pub const HUMAN_MODULE: &str = "human";

pub struct MemoryEngine {
    config: EngineConfig,
    main: Arc<MemoryFamily>,
    executor: FunctionExecutor,
    short_term: ShortTermMemory,
    long_term: LongTermMemory,
    entity: EntityMemory,
}

impl MemoryEngine {
    /// 并发加载所有记忆族，并确保 `persona` / `human` 模块存在
    pub async fn open(config: EngineConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let persistence = Arc::new(PersistenceManager::new(config.persistence.clone()));
        let family = |name: &str, file: &str| {
            MemoryFamily::new(
                name,
                config.data_dir.join(file),
                persistence.clone(),
                Some(embedder.clone()),
            )
            .with_similarity_threshold(config.similarity_threshold)
        };

        let main = Arc::new(family("main", MAIN_FILE_NAME));
        let ((), short_term, long_term, entity) = tokio::try_join!(
            main.load(),
            ShortTermMemory::open(family("short-term", ShortTermMemory::FILE_NAME)),
            LongTermMemory::open(family("long-term", LongTermMemory::FILE_NAME)),
            EntityMemory::open(family("entity", EntityMemory::FILE_NAME)),
        )?;

        for (name, seed) in [(PERSONA_MODULE, &config.persona), (HUMAN_MODULE, &config.human)] {
            if main.ensure_module(name, seed.limit, &seed.content).await? {
                info!(module = name, limit = seed.limit, "🧩 已创建核心记忆模块");
            }
        }

        let executor = FunctionExecutor::new(main.clone()).with_default_top_k(config.default_top_k);
        info!(
            data_dir = %config.data_dir.display(),
            embedder = embedder.name(),
            "🧠 记忆引擎已启动"
        );

        Ok(Self {
            config,
            main,
            executor,
            short_term,
            long_term,
            entity,
        })
    }

    /// 执行一次函数调用；修改类调用之后持久化主记忆族
    ///
    /// 落盘失败不会丢弃执行结果，失败原因附在返回文本末尾。
    pub async fn dispatch(&self, call: MemoryCall) -> String {
        let mutating = call.is_mutating();
        let mut result = self.executor.execute(call).await;
        if mutating && let Err(e) = self.main.persist().await {
            error!(error = %e, "❌ 主记忆族持久化失败");
            result.push_str(&format!(" (Failed to persist memory: {})", e));
        }
        result
    }

    pub async fn dispatch_value(&self, raw: Value) -> String {
        match MemoryCall::from_value(raw) {
            Ok(call) => self.dispatch(call).await,
            Err(e) => dispatch_error_message(&e),
        }
    }

    pub async fn dispatch_json(&self, raw: &str) -> String {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.dispatch_value(value).await,
            Err(e) => format!("Invalid function call JSON: {}", e),
        }
    }

    /// 追加一条对话消息并落盘
    pub async fn record_message(&self, role: &str, content: &str) -> Result<()> {
        self.main.record_message(Message::new(role, content)).await;
        self.main.persist().await
    }

    /// 持久化全部记忆族
    pub async fn save_all(&self) -> Result<()> {
        let families = self.families();
        try_join_all(families.iter().map(|f| f.persist())).await?;
        info!(families = families.len(), "💾 全部记忆已保存");
        Ok(())
    }

    /// 从快照重新加载全部记忆族，丢弃未保存的修改
    pub async fn load_all(&self) -> Result<()> {
        try_join_all(self.families().iter().map(|f| f.load())).await?;
        Ok(())
    }

    fn families(&self) -> [&MemoryFamily; 4] {
        [
            self.main.as_ref(),
            self.short_term.family(),
            self.long_term.family(),
            self.entity.family(),
        ]
    }

    /// 核心记忆的提示词片段
    pub async fn core_prompt(&self) -> String {
        self.main.render_core().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn main(&self) -> &Arc<MemoryFamily> {
        &self.main
    }

    pub fn executor(&self) -> &FunctionExecutor {
        &self.executor
    }

    pub fn short_term(&self) -> &ShortTermMemory {
        &self.short_term
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }

    pub fn entity(&self) -> &EntityMemory {
        &self.entity
    }
}
