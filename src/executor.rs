//! 函数调用执行器
//!
//! 模型以 `{"name": ..., "args": {...}}` 的形式发起记忆操作，执行器把它解析为
//! [`MemoryCall`] 后作用于一个 [`MemoryFamily`]，并始终返回一段给模型看的文本。
//! 结构性错误（超限、模块不存在等）在这里转换为文本，不再向上传播。
//!
//! | 函数 | 参数 | 说明 |
//! |------|------|------|
//! | `add_memory` | `content` | 写入归档记忆 |
//! | `search_memory` | `query`, `top_k=5` | 相似度检索，返回 `[{"text","score"}]` |
//! | `append_to_module` | `module_name`, `content` | 核心记忆追加 |
//! | `replace_in_module` | `module_name`, `old_content`, `new_content` | 核心记忆替换 |
//! | `retrieve_messages` | `query` | 回忆记忆文本检索 |
//! | `clear_memory` | `type=all` | `core` / `archival` / `recall` / 其他一律视为全部 |

use crate::error::DispatchError;
use crate::memory::{ClearTarget, MemoryFamily};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const UNKNOWN_FUNCTION: &str = "Unknown function call.";
pub const DEFAULT_TOP_K: usize = 5;

/// 执行器识别的全部函数名
pub const FUNCTION_NAMES: [&str; 6] = [
    "add_memory",
    "search_memory",
    "append_to_module",
    "replace_in_module",
    "retrieve_messages",
    "clear_memory",
];

fn default_clear_type() -> String {
    "all".to_string()
}

/// 一次记忆函数调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum MemoryCall {
    AddMemory {
        #[serde(default)]
        content: String,
    },
    SearchMemory {
        #[serde(default)]
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
    AppendToModule {
        #[serde(default)]
        module_name: String,
        #[serde(default)]
        content: String,
    },
    ReplaceInModule {
        #[serde(default)]
        module_name: String,
        #[serde(default)]
        old_content: String,
        #[serde(default)]
        new_content: String,
    },
    RetrieveMessages {
        #[serde(default)]
        query: String,
    },
    ClearMemory {
        #[serde(rename = "type", default = "default_clear_type")]
        memory_type: String,
    },
}

#[derive(Deserialize)]
struct RawCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Value,
}

impl MemoryCall {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryCall::AddMemory { .. } => "add_memory",
            MemoryCall::SearchMemory { .. } => "search_memory",
            MemoryCall::AppendToModule { .. } => "append_to_module",
            MemoryCall::ReplaceInModule { .. } => "replace_in_module",
            MemoryCall::RetrieveMessages { .. } => "retrieve_messages",
            MemoryCall::ClearMemory { .. } => "clear_memory",
        }
    }

    /// 调用是否会修改记忆（需要随后落盘）
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            MemoryCall::SearchMemory { .. } | MemoryCall::RetrieveMessages { .. }
        )
    }

    /// 从未类型化的 JSON 解析；`args` 缺失或为 `null` 时按空对象处理
    pub fn from_value(value: Value) -> Result<Self, DispatchError> {
        let raw: RawCall =
            serde_json::from_value(value).map_err(|e| DispatchError::InvalidArguments {
                name: String::new(),
                message: e.to_string(),
            })?;
        if !FUNCTION_NAMES.contains(&raw.name.as_str()) {
            return Err(DispatchError::UnknownFunction(raw.name));
        }
        let args = if raw.args.is_null() {
            Value::Object(Default::default())
        } else {
            raw.args
        };
        let tagged = serde_json::json!({ "name": raw.name, "args": args });
        serde_json::from_value(tagged).map_err(|e| DispatchError::InvalidArguments {
            name: raw.name,
            message: e.to_string(),
        })
    }
}

/// 分发失败时返回给模型的文本
pub fn dispatch_error_message(err: &DispatchError) -> String {
    match err {
        DispatchError::UnknownFunction(name) => {
            warn!(function = %name, "⚠️ 未知函数调用");
            UNKNOWN_FUNCTION.to_string()
        }
        DispatchError::InvalidArguments { .. } => {
            warn!(error = %err, "⚠️ 函数参数无效");
            err.to_string()
        }
    }
}

/// `search_memory` 的单条结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredText {
    pub text: String,
    pub score: Option<f32>,
}

pub struct FunctionExecutor {
    family: Arc<MemoryFamily>,
    default_top_k: usize,
}

impl FunctionExecutor {
    pub fn new(family: Arc<MemoryFamily>) -> Self {
        Self {
            family,
            default_top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    pub fn family(&self) -> &Arc<MemoryFamily> {
        &self.family
    }

    /// 分发未类型化的调用
    pub async fn dispatch_value(&self, raw: Value) -> String {
        match MemoryCall::from_value(raw) {
            Ok(call) => self.execute(call).await,
            Err(e) => dispatch_error_message(&e),
        }
    }

    /// 分发 JSON 文本形式的调用
    pub async fn dispatch_json(&self, raw: &str) -> String {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.dispatch_value(value).await,
            Err(e) => format!("Invalid function call JSON: {}", e),
        }
    }

    pub async fn execute(&self, call: MemoryCall) -> String {
        debug!(function = call.name(), "🔧 执行记忆函数");
        match call {
            MemoryCall::AddMemory { content } => self.add_memory(content).await,
            MemoryCall::SearchMemory { query, top_k } => {
                self.search_memory(&query, top_k.unwrap_or(self.default_top_k))
                    .await
            }
            MemoryCall::AppendToModule {
                module_name,
                content,
            } => match self.family.append_to_module(&module_name, &content).await {
                Ok(()) => format!("Content appended to module '{}'.", module_name),
                Err(e) => e.to_string(),
            },
            MemoryCall::ReplaceInModule {
                module_name,
                old_content,
                new_content,
            } => match self
                .family
                .replace_in_module(&module_name, &old_content, &new_content)
                .await
            {
                Ok(()) => format!("Content in module '{}' replaced successfully.", module_name),
                Err(e) => e.to_string(),
            },
            MemoryCall::RetrieveMessages { query } => {
                let messages = self.family.search_messages(&query).await;
                let quoted: Vec<String> = messages.iter().map(|m| format!("'{}'", m)).collect();
                format!("Messages retrieved: [{}]", quoted.join(", "))
            }
            MemoryCall::ClearMemory { memory_type } => {
                let target = ClearTarget::parse(&memory_type);
                self.family.clear(target).await;
                match target {
                    ClearTarget::Core => "Core memory cleared.",
                    ClearTarget::Archival => "Archival memory cleared.",
                    ClearTarget::Recall => "Recall memory cleared.",
                    ClearTarget::All => "All memory cleared.",
                }
                .to_string()
            }
        }
    }

    async fn add_memory(&self, content: String) -> String {
        match self.family.add_archival(content).await {
            Ok(id) => {
                debug!(id, "归档记忆已写入");
                "Memory added successfully.".to_string()
            }
            Err(e) => {
                warn!(error = %e, "⚠️ 归档记忆写入失败");
                format!("Failed to add memory: {}", e)
            }
        }
    }

    /// 相似度严格高于阈值的结果，按分数降序取前 `top_k` 条
    pub async fn search_results(&self, query: &str, top_k: usize) -> crate::error::Result<Vec<ScoredText>> {
        let threshold = self.family.similarity_threshold();
        let hits = self.family.search_archival(query, usize::MAX).await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.score.is_none_or(|s| s > threshold))
            .take(top_k)
            .map(|h| ScoredText {
                text: h.entry.value,
                score: h.score,
            })
            .collect())
    }

    async fn search_memory(&self, query: &str, top_k: usize) -> String {
        match self.search_results(query, top_k).await {
            Ok(results) => serde_json::to_string(&results)
                .unwrap_or_else(|e| format!("Failed to search memory: {}", e)),
            Err(e) => {
                warn!(error = %e, "⚠️ 归档检索失败");
                format!("Failed to search memory: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::memory::{Message, PersistenceManager};
    use crate::testing::MockEmbeddingProvider;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn executor_with(mock: MockEmbeddingProvider) -> FunctionExecutor {
        let family = MemoryFamily::new(
            "main",
            std::env::temp_dir().join("echo-memory-executor-unused.json"),
            Arc::new(PersistenceManager::default()),
            Some(Arc::new(mock) as Arc<dyn EmbeddingProvider>),
        );
        FunctionExecutor::new(Arc::new(family))
    }

    fn geography() -> MockEmbeddingProvider {
        MockEmbeddingProvider::new()
            .with_vector("Paris is in France", vec![1.0, 0.0])
            .with_vector("Bananas are yellow", vec![0.0, 1.0])
            .with_vector("capital of France", vec![0.9, 0.1])
            .with_vector("unrelated", vec![-1.0, 0.0])
    }

    #[test]
    fn test_parse_fills_defaults() {
        let call = MemoryCall::from_value(json!({"name": "search_memory", "args": {"query": "x"}}))
            .unwrap();
        assert_eq!(
            call,
            MemoryCall::SearchMemory {
                query: "x".into(),
                top_k: None
            }
        );

        let call = MemoryCall::from_value(json!({"name": "clear_memory"})).unwrap();
        assert_eq!(
            call,
            MemoryCall::ClearMemory {
                memory_type: "all".into()
            }
        );
        assert!(call.is_mutating());

        let call = MemoryCall::from_value(json!({"name": "retrieve_messages", "args": null})).unwrap();
        assert!(!call.is_mutating());
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert_eq!(
            MemoryCall::from_value(json!({"name": "fly_to_moon", "args": {}})).unwrap_err(),
            DispatchError::UnknownFunction("fly_to_moon".into())
        );
        let err = MemoryCall::from_value(json!({"name": "search_memory", "args": {"top_k": "many"}}))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArguments { ref name, .. } if name == "search_memory"));
    }

    #[tokio::test]
    async fn test_add_then_search_memory() {
        let executor = executor_with(geography());
        for content in ["Paris is in France", "Bananas are yellow"] {
            let out = executor
                .dispatch_value(json!({"name": "add_memory", "args": {"content": content}}))
                .await;
            assert_eq!(out, "Memory added successfully.");
        }

        let out = executor
            .dispatch_value(json!({"name": "search_memory", "args": {"query": "capital of France", "top_k": 1}}))
            .await;
        let results: Vec<ScoredText> = serde_json::from_str(&out).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Paris is in France");
        assert!(results[0].score.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_search_below_threshold_is_empty_list() {
        let executor = executor_with(geography());
        executor
            .execute(MemoryCall::AddMemory {
                content: "Paris is in France".into(),
            })
            .await;
        let out = executor
            .execute(MemoryCall::SearchMemory {
                query: "unrelated".into(),
                top_k: None,
            })
            .await;
        assert_eq!(out, "[]");
    }

    #[tokio::test]
    async fn test_add_memory_failure_is_reported() {
        let mock = MockEmbeddingProvider::new()
            .with_failure(crate::error::EmbeddingError::ServiceUnavailable("down".into()));
        let executor = executor_with(mock);
        let out = executor
            .execute(MemoryCall::AddMemory {
                content: "x".into(),
            })
            .await;
        assert!(out.starts_with("Failed to add memory: "));
        assert!(executor.family().read(|s| s.archival.is_empty()).await);
    }

    #[tokio::test]
    async fn test_core_module_calls() {
        let executor = executor_with(geography());
        executor.family().ensure_module("persona", 20, "").await.unwrap();

        let out = executor
            .dispatch_json(r#"{"name": "append_to_module", "args": {"module_name": "persona", "content": "I am a helpful"}}"#)
            .await;
        assert_eq!(out, "Content appended to module 'persona'.");

        let out = executor
            .dispatch_json(r#"{"name": "append_to_module", "args": {"module_name": "persona", "content": " assistant"}}"#)
            .await;
        assert!(out.contains("exceeding the memory limit of 20"));

        let out = executor
            .execute(MemoryCall::ReplaceInModule {
                module_name: "persona".into(),
                old_content: "helpful".into(),
                new_content: "kind".into(),
            })
            .await;
        assert_eq!(out, "Content in module 'persona' replaced successfully.");

        let out = executor
            .execute(MemoryCall::AppendToModule {
                module_name: "nobody".into(),
                content: "x".into(),
            })
            .await;
        assert_eq!(out, "Memory module 'nobody' not found.");
    }

    #[tokio::test]
    async fn test_retrieve_messages_and_clear() {
        let executor = executor_with(geography());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        executor
            .family()
            .record_message(Message::at("user", "I love Paris", at))
            .await;
        executor
            .family()
            .record_message(Message::at("assistant", "Noted", at))
            .await;

        let out = executor
            .execute(MemoryCall::RetrieveMessages {
                query: "paris".into(),
            })
            .await;
        assert_eq!(
            out,
            "Messages retrieved: ['2024-01-01 09:00:00 - user: I love Paris']"
        );

        let out = executor
            .dispatch_value(json!({"name": "clear_memory", "args": {"type": "recall"}}))
            .await;
        assert_eq!(out, "Recall memory cleared.");
        assert!(executor.family().read(|s| s.recall.is_empty()).await);

        let out = executor
            .dispatch_value(json!({"name": "clear_memory", "args": {}}))
            .await;
        assert_eq!(out, "All memory cleared.");
    }

    async fn populated_executor() -> FunctionExecutor {
        let executor = executor_with(geography());
        let family = executor.family();
        family.ensure_module("persona", 50, "Helpful bot").await.unwrap();
        family.add_archival("Paris is in France").await.unwrap();
        family.record_message(Message::new("user", "hello")).await;
        executor
    }

    async fn sizes(executor: &FunctionExecutor) -> (usize, usize, usize) {
        executor
            .family()
            .read(|s| (s.core.len(), s.archival.len(), s.recall.len()))
            .await
    }

    #[tokio::test]
    async fn test_clear_archival_keeps_core_and_recall() {
        let executor = populated_executor().await;
        let out = executor
            .dispatch_value(json!({"name": "clear_memory", "args": {"type": "archival"}}))
            .await;
        assert_eq!(out, "Archival memory cleared.");
        assert_eq!(sizes(&executor).await, (1, 0, 1));
    }

    #[tokio::test]
    async fn test_clear_with_unrecognized_type_clears_everything() {
        for memory_type in ["bogus", "Core"] {
            let executor = populated_executor().await;
            let out = executor
                .dispatch_value(json!({"name": "clear_memory", "args": {"type": memory_type}}))
                .await;
            assert_eq!(out, "All memory cleared.");
            assert_eq!(sizes(&executor).await, (0, 0, 0));
        }
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_calls() {
        let executor = executor_with(geography());
        assert_eq!(
            executor
                .dispatch_value(json!({"name": "fly_to_moon", "args": {}}))
                .await,
            UNKNOWN_FUNCTION
        );
        let out = executor
            .dispatch_value(json!({"name": "add_memory", "args": {"content": 42}}))
            .await;
        assert!(out.starts_with("Invalid arguments for 'add_memory': "));
        assert!(
            executor
                .dispatch_json("not json")
                .await
                .starts_with("Invalid function call JSON")
        );
    }
}
