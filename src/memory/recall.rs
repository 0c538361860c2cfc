//! 回忆记忆：按时间顺序追加的对话日志

use super::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 一条对话消息，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self::at(role, content, Utc::now())
    }

    pub fn at(role: impl Into<String>, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            created_at,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.role,
            self.content
        )
    }
}

/// 只追加的消息序列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecallMemory {
    messages: Vec<Message>,
}

impl RecallMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// 内容包含 `query`（不区分大小写）的消息，保持原顺序
    pub fn search_by_text(&self, query: &str) -> Vec<&Message> {
        let query = query.to_lowercase();
        self.messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&query))
            .collect()
    }

    /// `start <= created_at <= end` 的消息
    pub fn search_by_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| start <= m.created_at && m.created_at <= end)
            .collect()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl fmt::Display for RecallMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.messages.iter().map(|m| m.to_string()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}
