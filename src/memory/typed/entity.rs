use super::TypedStore;
use crate::error::Result;
use crate::memory::family::MemoryFamily;
use crate::memory::store::SearchHit;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 实体及其关系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityItem {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub relationships: String,
}

impl EntityItem {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
        relationships: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            relationships: relationships.into(),
        }
    }

    /// `"<name>(<type>): <description>"`
    pub fn value(&self) -> String {
        format!("{}({}): {}", self.name, self.entity_type, self.description)
    }

    pub fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert(
            "relationships".to_string(),
            Value::String(self.relationships.clone()),
        );
        metadata
    }
}

pub struct EntityMemory {
    store: TypedStore,
}

impl EntityMemory {
    pub const FILE_NAME: &'static str = "entity_memory.json";

    /// 包装记忆族并立即从其快照文件恢复
    pub async fn open(family: MemoryFamily) -> Result<Self> {
        Ok(Self {
            store: TypedStore::open("entity", family).await?,
        })
    }

    pub async fn save(&self, item: &EntityItem) -> Result<u64> {
        self.store.save(item.value(), item.metadata()).await
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
