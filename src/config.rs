//! 引擎配置
//!
//! 两种加载方式：
//!
//! - [`EngineConfig::load`]：读取 YAML 文件，缺省字段取默认值
//! - [`EngineConfig::from_env`]：读取环境变量（会先加载 `.env`）
//!
//! ```text
//! MEMORY_DATA_DIR=./data
//! MEMORY_SIMILARITY_THRESHOLD=0.5
//! MEMORY_DEFAULT_TOP_K=5
//! MEMORY_STRICT_LOAD=false
//! MEMORY_EMBEDDING_MODEL=text-embedding-ada-002
//! MEMORY_EMBEDDING_BASEURL=https://api.openai.com/v1/embeddings
//! MEMORY_EMBEDDING_APIKEY=sk-...
//! MEMORY_EMBEDDING_TIMEOUT_MS=30000
//! MEMORY_EMBEDDING_MAX_RETRIES=3
//! MEMORY_EMBEDDING_RETRY_DELAY_MS=200
//! MEMORY_PRETTY=true
//! ```

use crate::error::{ConfigError, EngineError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ENV_PREFIX: &str = "MEMORY_";

/// 核心记忆模块的初始容量与内容
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModuleSeed {
    pub limit: usize,
    #[serde(default)]
    pub content: String,
}

impl ModuleSeed {
    pub fn new(limit: usize, content: impl Into<String>) -> Self {
        Self {
            limit,
            content: content.into(),
        }
    }
}

/// 快照读写策略
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// 为 true 时，非"文件缺失/内容损坏"类的 IO 错误直接返回，不再冷启动
    pub strict_load: bool,
    /// 快照是否格式化输出
    pub pretty: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            strict_load: false,
            pretty: true,
        }
    }
}

/// Embedding 服务连接配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Embeddings 接口完整 URL
    pub baseurl: String,
    pub apikey: Option<String>,
    /// 单次请求超时（毫秒）
    pub timeout_ms: u64,
    /// 可重试错误的最大重试次数
    pub max_retries: u32,
    /// 首次重试等待（毫秒），之后指数翻倍
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-ada-002".to_string(),
            baseurl: "https://api.openai.com/v1/embeddings".to_string(),
            apikey: None,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 200,
        }
    }
}

/// 引擎全局配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 各记忆族快照文件所在目录
    pub data_dir: PathBuf,
    /// 向量检索的相似度阈值（严格大于才算命中）
    pub similarity_threshold: f32,
    /// `search_memory` 未指定 top_k 时的默认值
    pub default_top_k: usize,
    pub persona: ModuleSeed,
    pub human: ModuleSeed,
    pub persistence: PersistenceConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            similarity_threshold: 0.5,
            default_top_k: 5,
            persona: ModuleSeed::new(2000, ""),
            human: ModuleSeed::new(2000, ""),
            persistence: PersistenceConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 从 YAML 文件加载
    pub fn load(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: EngineConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量加载，未设置的字段使用默认值
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// 从任意键值对加载（`from_env` 的实现，便于测试）
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = EngineConfig::default();
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match suffix {
                "DATA_DIR" => config.data_dir = PathBuf::from(value),
                "SIMILARITY_THRESHOLD" => {
                    config.similarity_threshold = parse_field(&key, &value)?
                }
                "DEFAULT_TOP_K" => config.default_top_k = parse_field(&key, &value)?,
                "STRICT_LOAD" => config.persistence.strict_load = parse_field(&key, &value)?,
                "PRETTY" => config.persistence.pretty = parse_field(&key, &value)?,
                "PERSONA" => config.persona.content = value,
                "HUMAN" => config.human.content = value,
                "PERSONA_LIMIT" => config.persona.limit = parse_field(&key, &value)?,
                "HUMAN_LIMIT" => config.human.limit = parse_field(&key, &value)?,
                "EMBEDDING_MODEL" => config.embedding.model = value,
                "EMBEDDING_BASEURL" => config.embedding.baseurl = value,
                "EMBEDDING_APIKEY" => config.embedding.apikey = Some(value),
                "EMBEDDING_TIMEOUT_MS" => {
                    config.embedding.timeout_ms = parse_field(&key, &value)?
                }
                "EMBEDDING_MAX_RETRIES" => {
                    config.embedding.max_retries = parse_field(&key, &value)?
                }
                "EMBEDDING_RETRY_DELAY_MS" => {
                    config.embedding.retry_delay_ms = parse_field(&key, &value)?
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(invalid(
                "similarity_threshold",
                format!("{} is outside [-1, 1]", self.similarity_threshold),
            ));
        }
        if self.default_top_k == 0 {
            return Err(invalid("default_top_k", "must be at least 1"));
        }
        for (field, seed) in [("persona", &self.persona), ("human", &self.human)] {
            if seed.content.chars().count() > seed.limit {
                return Err(invalid(
                    field,
                    format!("content is longer than its limit of {}", seed.limit),
                ));
            }
        }
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, e.to_string()))
}

fn invalid(field: &str, message: impl Into<String>) -> EngineError {
    EngineError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    })
}
