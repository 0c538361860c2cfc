//! 记忆族快照的读写
//!
//! 每个记忆族对应一个 JSON 文件：
//!
//! ```json
//! {
//!   "core_memory": { "persona": { "name": "persona", "limit": 2000, "content": "..." } },
//!   "archival_memory": [ { "memory": "...", "embedding": [0.1, ...], "id": 0, "metadata": {}, "created_at": "..." } ],
//!   "recall_memory": [ { "role": "user", "content": "...", "created_at": "2024-01-01T00:00:00+00:00" } ]
//! }
//! ```
//!
//! 写入：先写同目录下的临时文件并 fsync，再 rename 覆盖，读者不会看到写了一半的快照。
//!
//! 读取失败时回退为空状态（冷启动），三类失败分别记录：
//!
//! | 情况 | 日志级别 | 严格模式 |
//! |------|----------|----------|
//! | 文件不存在 | info | 冷启动 |
//! | 内容损坏 | warn | 冷启动 |
//! | 其他 IO 错误 | error | 返回错误 |

use super::archival::ArchivalMemory;
use super::core::CoreMemory;
use super::family::MemoryState;
use super::recall::RecallMemory;
use super::store::{Entry, MemoryStore};
use super::timestamp;
use crate::config::PersistenceConfig;
use crate::error::{EngineError, LoadFailure, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// 归档记忆在快照中的一条记录
///
/// 只有 `memory` 是必需字段；缺失 `embedding` 或为空数组表示该条没有向量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivalRecord {
    pub memory: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&Entry> for ArchivalRecord {
    fn from(entry: &Entry) -> Self {
        Self {
            memory: entry.value.clone(),
            embedding: entry.embedding.clone().unwrap_or_default(),
            id: Some(entry.id),
            metadata: entry.metadata.clone(),
            created_at: Some(entry.created_at),
        }
    }
}

/// 一个记忆族的完整快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub core_memory: CoreMemory,
    #[serde(default)]
    pub archival_memory: Vec<ArchivalRecord>,
    #[serde(default)]
    pub recall_memory: RecallMemory,
}

impl Snapshot {
    pub fn capture(state: &MemoryState) -> Self {
        Self {
            core_memory: state.core.clone(),
            archival_memory: state
                .archival
                .store()
                .entries()
                .iter()
                .map(ArchivalRecord::from)
                .collect(),
            recall_memory: state.recall.clone(),
        }
    }

    /// 还原为内存结构；缺少 id 的记录接在已有最大 id 之后编号。
    /// id 超出可编号范围时返回错误说明
    pub fn into_state(self) -> std::result::Result<MemoryState, String> {
        let out_of_range = |id: u64| format!("archival id {} is out of range", id);
        let mut next_id = 0u64;
        for id in self.archival_memory.iter().filter_map(|r| r.id) {
            next_id = next_id.max(id.checked_add(1).ok_or_else(|| out_of_range(id))?);
        }
        let loaded_at = Utc::now();
        let mut entries = Vec::with_capacity(self.archival_memory.len());
        for r in self.archival_memory {
            let id = match r.id {
                Some(id) => id,
                None => {
                    let id = next_id;
                    next_id = id.checked_add(1).ok_or_else(|| out_of_range(id))?;
                    id
                }
            };
            entries.push(Entry {
                id,
                value: r.memory,
                metadata: r.metadata,
                embedding: (!r.embedding.is_empty()).then_some(r.embedding),
                created_at: r.created_at.unwrap_or(loaded_at),
            });
        }
        Ok(MemoryState {
            core: self.core_memory,
            archival: ArchivalMemory::from_store(MemoryStore::from_entries(entries)),
            recall: self.recall_memory,
        })
    }
}

/// 快照读写器，在整个会话内被所有记忆族共享
#[derive(Debug, Clone, Default)]
pub struct PersistenceManager {
    config: PersistenceConfig,
}

impl PersistenceManager {
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// 序列化为快照字节
    pub fn encode(&self, state: &MemoryState) -> Result<Vec<u8>> {
        let snapshot = Snapshot::capture(state);
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(&snapshot)?
        } else {
            serde_json::to_vec(&snapshot)?
        };
        Ok(bytes)
    }

    /// 原子地保存整个记忆族
    pub async fn save(&self, path: &Path, state: &MemoryState) -> Result<()> {
        let bytes = self.encode(state)?;
        self.write_atomic(path, &bytes).await
    }

    /// 写临时文件 → fsync → rename
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = path
            .file_name()
            .ok_or_else(|| EngineError::Other(format!("无效的快照路径: {}", path.display())))?;
        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = write_and_rename(&tmp, path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            error!(path = %path.display(), error = %e, "❌ 快照写入失败");
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "💾 快照已持久化");
        Ok(())
    }

    /// 读取快照，失败原因原样返回
    pub async fn try_load(&self, path: &Path) -> std::result::Result<MemoryState, LoadFailure> {
        let raw = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => LoadFailure::Missing(path.to_path_buf()),
            _ => LoadFailure::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;
        let snapshot: Snapshot =
            serde_json::from_slice(&raw).map_err(|e| LoadFailure::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        snapshot
            .into_state()
            .map_err(|message| LoadFailure::Malformed {
                path: path.to_path_buf(),
                message,
            })
    }

    /// 读取快照；失败时按策略回退为空状态
    pub async fn load(&self, path: &Path) -> Result<MemoryState> {
        match self.try_load(path).await {
            Ok(state) => {
                info!(
                    path = %path.display(),
                    modules = state.core.len(),
                    archival = state.archival.len(),
                    messages = state.recall.len(),
                    "📂 记忆快照已加载"
                );
                Ok(state)
            }
            Err(LoadFailure::Missing(_)) => {
                info!(path = %path.display(), "🆕 未找到记忆文件，从空状态开始");
                Ok(MemoryState::default())
            }
            Err(failure @ LoadFailure::Malformed { .. }) => {
                warn!(error = %failure, "⚠️ 记忆文件解析失败，从空状态开始");
                Ok(MemoryState::default())
            }
            Err(failure @ LoadFailure::Io { .. }) => {
                if self.config.strict_load {
                    error!(error = %failure, "❌ 记忆文件读取失败（严格模式）");
                    return Err(failure.into());
                }
                error!(error = %failure, "❌ 记忆文件读取失败，从空状态开始");
                Ok(MemoryState::default())
            }
        }
    }
}

async fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::recall::Message;
    use chrono::TimeZone;
    use serde_json::json;

    fn populated_state() -> MemoryState {
        let mut state = MemoryState::default();
        state.core.add_module("persona", 50, "Helpful bot").unwrap();
        state.core.add_module("human", 50, "Name: Ada").unwrap();
        state.archival.add("Paris is in France", vec![0.1, -0.25, 0.333]);
        state
            .archival
            .store_mut()
            .save("note", json!({"module_name": "notes"}).as_object().unwrap().clone(), Some(vec![1.0, 0.0, 0.0]));
        for (i, role) in ["user", "assistant", "user"].iter().enumerate() {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, i as u32, 0).unwrap();
            state.recall.add_message(Message::at(*role, format!("message {i}"), at));
        }
        state
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("family.json");
        let manager = PersistenceManager::default();
        let state = populated_state();

        manager.save(&path, &state).await.unwrap();
        let loaded = manager.load(&path).await.unwrap();

        assert_eq!(loaded.core, state.core);
        assert_eq!(loaded.recall, state.recall);
        let before = state.archival.store().entries();
        let after = loaded.archival.store().entries();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.value, b.value);
            assert_eq!(a.metadata, b.metadata);
            let (ea, eb) = (a.embedding.as_ref().unwrap(), b.embedding.as_ref().unwrap());
            assert!(ea.iter().zip(eb).all(|(x, y)| (x - y).abs() < 1e-6));
        }
    }

    #[tokio::test]
    async fn test_file_shape_matches_documented_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("family.json");
        PersistenceManager::default()
            .save(&path, &populated_state())
            .await
            .unwrap();

        let json: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["core_memory"]["persona"]["limit"], 50);
        assert_eq!(json["core_memory"]["persona"]["name"], "persona");
        assert_eq!(json["archival_memory"][0]["memory"], "Paris is in France");
        assert_eq!(json["archival_memory"][0]["embedding"].as_array().unwrap().len(), 3);
        assert_eq!(json["recall_memory"][2]["role"], "user");
        assert_eq!(json["recall_memory"][0]["created_at"], "2024-01-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_missing_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::default();
        let path = dir.path().join("nope.json");

        assert!(matches!(
            manager.try_load(&path).await.unwrap_err(),
            LoadFailure::Missing(_)
        ));
        let state = manager.load(&path).await.unwrap();
        assert_eq!(state, MemoryState::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::default();
        for (name, body) in [("garbage.json", "{not json"), ("array.json", "[1, 2, 3]")] {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            assert!(matches!(
                manager.try_load(&path).await.unwrap_err(),
                LoadFailure::Malformed { .. }
            ));
            assert_eq!(manager.load(&path).await.unwrap(), MemoryState::default());
        }
    }

    #[tokio::test]
    async fn test_io_error_respects_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        // 目录不能当文件读
        let path = dir.path().to_path_buf();

        let lenient = PersistenceManager::default();
        assert!(matches!(
            lenient.try_load(&path).await.unwrap_err(),
            LoadFailure::Io { .. }
        ));
        assert_eq!(lenient.load(&path).await.unwrap(), MemoryState::default());

        let strict = PersistenceManager::new(PersistenceConfig {
            strict_load: true,
            pretty: false,
        });
        assert!(matches!(
            strict.load(&path).await.unwrap_err(),
            EngineError::Load(LoadFailure::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_minimal_legacy_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{
                "core_memory": {"persona": {"name": "persona", "limit": 20, "content": "Helpful bot"}},
                "archival_memory": [
                    {"memory": "first", "embedding": [1.0, 0.0]},
                    {"memory": "second", "embedding": []}
                ],
                "recall_memory": [
                    {"role": "user", "content": "hi", "created_at": "2024-06-01T08:00:00.123456"}
                ]
            }"#,
        )
        .unwrap();

        let state = PersistenceManager::default().load(&path).await.unwrap();
        assert_eq!(state.core.get_module("persona").unwrap().content, "Helpful bot");
        let entries = state.archival.store().entries();
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[1].id, 1);
        assert_eq!(entries[0].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(entries[1].embedding, None);
        assert_eq!(state.recall.messages()[0].content, "hi");
    }

    #[tokio::test]
    async fn test_out_of_range_id_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::default();
        let path = dir.path().join("huge-id.json");
        std::fs::write(
            &path,
            r#"{"archival_memory": [{"memory": "edge", "id": 18446744073709551615}]}"#,
        )
        .unwrap();

        assert!(matches!(
            manager.try_load(&path).await.unwrap_err(),
            LoadFailure::Malformed { .. }
        ));
        assert_eq!(manager.load(&path).await.unwrap(), MemoryState::default());
    }

    #[tokio::test]
    async fn test_atomic_save_leaves_no_temp_files_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("family.json");
        let manager = PersistenceManager::default();

        manager.save(&path, &populated_state()).await.unwrap();
        manager.save(&path, &MemoryState::default()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["family.json".to_string()]);
        assert_eq!(manager.load(&path).await.unwrap(), MemoryState::default());
    }
}
