use super::TypedStore;
use crate::error::Result;
use crate::memory::family::MemoryFamily;
use crate::memory::store::SearchHit;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 一次任务执行的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermItem {
    pub agent: String,
    pub task: String,
    pub expected_output: String,
    pub datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl LongTermItem {
    pub fn new(
        agent: impl Into<String>,
        task: impl Into<String>,
        expected_output: impl Into<String>,
        datetime: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            expected_output: expected_output.into(),
            datetime: datetime.into(),
            quality: None,
            metadata: Map::new(),
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 条目自带的 metadata，叠加 agent / expected_output / datetime / quality
    pub fn storage_metadata(&self) -> Map<String, Value> {
        let mut metadata = self.metadata.clone();
        metadata.insert("agent".to_string(), Value::String(self.agent.clone()));
        metadata.insert(
            "expected_output".to_string(),
            Value::String(self.expected_output.clone()),
        );
        metadata.insert(
            "datetime".to_string(),
            Value::String(self.datetime.clone()),
        );
        if let Some(quality) = self.quality {
            metadata.insert("quality".to_string(), Value::from(quality));
        }
        metadata
    }
}

pub struct LongTermMemory {
    store: TypedStore,
}

impl LongTermMemory {
    pub const FILE_NAME: &'static str = "long_term_memory.json";

    pub async fn open(family: MemoryFamily) -> Result<Self> {
        Ok(Self {
            store: TypedStore::open("long-term", family).await?,
        })
    }

    /// 以任务描述作为检索值写入
    pub async fn save(&self, item: &LongTermItem) -> Result<u64> {
        self.store
            .save(item.task.clone(), item.storage_metadata())
            .await
    }

    /// 与 `task` 最相关的至多 `latest_n` 条记录
    pub async fn search(&self, task: &str, latest_n: usize) -> Result<Vec<SearchHit>> {
        let mut hits = self.store.search(task).await?;
        hits.truncate(latest_n);
        Ok(hits)
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
