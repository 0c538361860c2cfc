use super::TypedStore;
use crate::error::Result;
use crate::memory::family::MemoryFamily;
use crate::memory::store::SearchHit;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 当前任务相关的临时数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermItem {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ShortTermItem {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            agent: None,
            metadata: Map::new(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn storage_metadata(&self) -> Map<String, Value> {
        let mut metadata = self.metadata.clone();
        if let Some(agent) = &self.agent {
            metadata.insert("agent".to_string(), Value::String(agent.clone()));
        }
        metadata
    }
}

pub struct ShortTermMemory {
    store: TypedStore,
}

impl ShortTermMemory {
    pub const FILE_NAME: &'static str = "short_term_memory.json";

    pub async fn open(family: MemoryFamily) -> Result<Self> {
        Ok(Self {
            store: TypedStore::open("short-term", family).await?,
        })
    }

    pub async fn save(&self, item: &ShortTermItem) -> Result<u64> {
        self.store
            .save(item.data.clone(), item.storage_metadata())
            .await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.store.search(query).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }

    pub async fn persist(&self) -> Result<()> {
        self.store.family.persist().await
    }

    pub async fn load(&self) -> Result<()> {
        self.store.family.load().await
    }

    pub fn family(&self) -> &MemoryFamily {
        &self.store.family
    }
}
