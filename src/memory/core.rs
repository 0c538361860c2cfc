//! 核心记忆：若干有容量上限的命名文本块
//!
//! 每个 [`MemoryModule`] 的内容长度（按字符计）在任何一次成功修改后都不超过 `limit`；
//! 会越界的修改被拒绝，内容保持原样。

use crate::error::MemoryError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// 单个核心记忆模块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryModule {
    pub name: String,
    /// 字符数上限
    pub limit: usize,
    pub content: String,
}

impl MemoryModule {
    pub fn new(name: impl Into<String>, limit: usize, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit,
            content: content.into(),
        }
    }

    /// 当前内容的字符数
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// 剩余可写字符数
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.len())
    }

    /// 追加内容，越界则拒绝
    pub fn append(&mut self, text: &str) -> Result<(), MemoryError> {
        let attempted = self.len() + text.chars().count();
        if attempted > self.limit {
            return Err(self.capacity_error(attempted));
        }
        self.content.push_str(text);
        Ok(())
    }

    /// 把所有 `old` 替换为 `new`；要么整体成功，要么内容不变
    pub fn replace(&mut self, old: &str, new: &str) -> Result<(), MemoryError> {
        if old.is_empty() || !self.content.contains(old) {
            return Err(MemoryError::ContentNotFound {
                module: self.name.clone(),
                content: old.to_string(),
            });
        }
        let replaced = self.content.replace(old, new);
        let attempted = replaced.chars().count();
        if attempted > self.limit {
            return Err(self.capacity_error(attempted));
        }
        self.content = replaced;
        Ok(())
    }

    fn capacity_error(&self, attempted: usize) -> MemoryError {
        MemoryError::CapacityExceeded {
            module: self.name.clone(),
            limit: self.limit,
            attempted,
        }
    }
}

/// 核心记忆：模块名 → 模块
///
/// 序列化为 `{name: {name, limit, content}}`；反序列化时以外层键为准。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CoreMemory {
    modules: BTreeMap<String, MemoryModule>,
}

impl CoreMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增模块；同名模块已存在或初始内容超限时失败
    pub fn add_module(
        &mut self,
        name: impl Into<String>,
        limit: usize,
        content: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(MemoryError::DuplicateModule(name));
        }
        let module = MemoryModule::new(name.clone(), limit, content);
        if module.len() > limit {
            return Err(module.capacity_error(module.len()));
        }
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Result<&MemoryModule, MemoryError> {
        self.modules
            .get(name)
            .ok_or_else(|| MemoryError::ModuleNotFound(name.to_string()))
    }

    pub fn get_module_mut(&mut self, name: &str) -> Result<&mut MemoryModule, MemoryError> {
        self.modules
            .get_mut(name)
            .ok_or_else(|| MemoryError::ModuleNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn append(&mut self, name: &str, text: &str) -> Result<(), MemoryError> {
        self.get_module_mut(name)?.append(text)
    }

    pub fn replace(&mut self, name: &str, old: &str, new: &str) -> Result<(), MemoryError> {
        self.get_module_mut(name)?.replace(old, new)
    }

    pub fn modules(&self) -> impl Iterator<Item = &MemoryModule> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn clear(&mut self) {
        self.modules.clear();
    }

    /// 渲染为可直接放入提示词的文本块
    pub fn render(&self) -> String {
        self.modules
            .values()
            .map(|m| format!("<{}>\n{}\n</{}>", m.name, m.content, m.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Deserialize)]
struct ModuleRecord {
    limit: usize,
    #[serde(default)]
    content: String,
}

impl<'de> Deserialize<'de> for CoreMemory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, ModuleRecord>::deserialize(deserializer)?;
        let modules = raw
            .into_iter()
            .map(|(name, r)| {
                let module = MemoryModule::new(name.clone(), r.limit, r.content);
                (name, module)
            })
            .collect();
        Ok(Self { modules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> CoreMemory {
        let mut core = CoreMemory::new();
        core.add_module("persona", 20, "Helpful bot").unwrap();
        core
    }

    #[test]
    fn test_append_then_reject_over_limit() {
        let mut core = persona();
        core.append("persona", " v2").unwrap();
        assert_eq!(core.get_module("persona").unwrap().content, "Helpful bot v2");
        assert_eq!(core.get_module("persona").unwrap().len(), 14);

        let err = core.append("persona", "0123456789").unwrap_err();
        assert_eq!(
            err,
            MemoryError::CapacityExceeded {
                module: "persona".to_string(),
                limit: 20,
                attempted: 24,
            }
        );
        assert_eq!(core.get_module("persona").unwrap().content, "Helpful bot v2");
    }

    #[test]
    fn test_append_exactly_to_limit() {
        let mut module = MemoryModule::new("m", 5, "abc");
        module.append("de").unwrap();
        assert_eq!(module.remaining(), 0);
        assert!(module.append("f").is_err());
    }

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        let mut module = MemoryModule::new("m", 4, "");
        module.append("记忆系统").unwrap();
        assert_eq!(module.len(), 4);
        assert!(module.append("!").is_err());
    }

    #[test]
    fn test_replace_all_occurrences() {
        let mut module = MemoryModule::new("m", 100, "cat and cat");
        module.replace("cat", "dog").unwrap();
        assert_eq!(module.content, "dog and dog");
    }

    #[test]
    fn test_replace_missing_content() {
        let mut core = persona();
        let err = core.replace("persona", "evil", "good").unwrap_err();
        assert!(matches!(err, MemoryError::ContentNotFound { .. }));
        assert!(matches!(
            core.replace("persona", "", "x").unwrap_err(),
            MemoryError::ContentNotFound { .. }
        ));
    }

    #[test]
    fn test_replace_over_limit_leaves_content_unchanged() {
        let mut core = persona();
        let err = core
            .replace("persona", "bot", "assistant for everyone")
            .unwrap_err();
        assert!(matches!(err, MemoryError::CapacityExceeded { .. }));
        assert_eq!(core.get_module("persona").unwrap().content, "Helpful bot");
    }

    #[test]
    fn test_duplicate_and_missing_modules() {
        let mut core = persona();
        assert_eq!(
            core.add_module("persona", 10, "").unwrap_err(),
            MemoryError::DuplicateModule("persona".to_string())
        );
        assert_eq!(
            core.append("human", "hi").unwrap_err(),
            MemoryError::ModuleNotFound("human".to_string())
        );
        assert!(core.add_module("tiny", 2, "too long").is_err());
        assert!(!core.contains("tiny"));
    }

    #[test]
    fn test_capacity_invariant_over_mixed_sequence() {
        let mut module = MemoryModule::new("m", 12, "");
        let ops: [(&str, &str); 7] = [
            ("append", "hello"),
            ("append", " world"),
            ("append", "!!"),
            ("replace", "world"),
            ("append", "?"),
            ("replace", "o"),
            ("append", "0123456789"),
        ];
        for (op, arg) in ops {
            let before = module.content.clone();
            let result = match op {
                "append" => module.append(arg),
                _ => module.replace(arg, "WORLDWIDE"),
            };
            if result.is_err() {
                assert_eq!(module.content, before);
            }
            assert!(module.len() <= module.limit);
        }
    }

    #[test]
    fn test_serde_round_trip_uses_outer_key() {
        let mut core = persona();
        core.add_module("human", 50, "Name: Ada").unwrap();
        let json = serde_json::to_value(&core).unwrap();
        assert_eq!(json["persona"]["limit"], 20);
        assert_eq!(json["human"]["content"], "Name: Ada");
        let back: CoreMemory = serde_json::from_value(json).unwrap();
        assert_eq!(back, core);

        let renamed: CoreMemory = serde_json::from_str(
            r#"{"persona": {"name": "stale", "limit": 5, "content": "hi"}}"#,
        )
        .unwrap();
        assert_eq!(renamed.get_module("persona").unwrap().name, "persona");
    }

    #[test]
    fn test_render_lists_modules_by_name() {
        let mut core = persona();
        core.add_module("human", 50, "Name: Ada").unwrap();
        let rendered = core.render();
        assert!(rendered.starts_with("<human>\nName: Ada\n</human>"));
        assert!(rendered.contains("<persona>\nHelpful bot\n</persona>"));
    }
}
