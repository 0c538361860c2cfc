use std::fmt;
use std::path::PathBuf;

/// 记忆引擎的统一错误类型
#[derive(Debug)]
pub enum EngineError {
    /// 核心记忆 / MemoryStore 的结构性错误
    Memory(MemoryError),
    /// 快照加载失败（仅在严格加载模式下向上传播）
    Load(LoadFailure),
    /// Embedding 服务错误
    Embedding(EmbeddingError),
    /// 函数分发错误
    Dispatch(DispatchError),
    /// 配置错误
    Config(ConfigError),
    /// 附加了上下文的错误
    Context {
        context: String,
        source: Box<EngineError>,
    },
    /// IO 错误
    Io(std::io::Error),
    /// 序列化/反序列化错误
    Serialization(String),
    /// 其他错误
    Other(String),
}

/// 记忆结构上的约束违例
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryError {
    /// 写入后内容长度会超过模块上限
    CapacityExceeded {
        module: String,
        limit: usize,
        attempted: usize,
    },
    /// 模块不存在
    ModuleNotFound(String),
    /// 模块已存在
    DuplicateModule(String),
    /// 待替换的内容不在模块中
    ContentNotFound { module: String, content: String },
    /// 计算向量期间记录被其他写入改动，多次重试仍未成功
    ConcurrentModification(String),
}

/// 快照文件加载失败的三种情况
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFailure {
    /// 文件不存在（冷启动）
    Missing(PathBuf),
    /// 文件内容不是合法快照
    Malformed { path: PathBuf, message: String },
    /// 其他 IO 错误
    Io { path: PathBuf, message: String },
}

/// Embedding 服务错误
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    /// 请求超时
    Timeout { after_ms: u64 },
    /// 触发限流
    RateLimit { retry_after_secs: Option<u64> },
    /// 服务暂不可用（5xx）
    ServiceUnavailable(String),
    /// API 返回错误状态码
    Api { status: u16, message: String },
    /// 响应格式无效
    InvalidResponse(String),
    /// 网络请求失败
    Network(String),
    /// 输入为空
    EmptyInput,
    /// 向量维度与预期不符
    DimensionMismatch { expected: usize, actual: usize },
    /// 重试耗尽
    RetriesExhausted {
        attempts: u32,
        last: Box<EmbeddingError>,
    },
}

/// 函数调用分发错误
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// 未知函数名
    UnknownFunction(String),
    /// 参数无法解析
    InvalidArguments { name: String, message: String },
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 缺少必需的配置项
    MissingField(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl EngineError {
    /// 为错误附加一层上下文说明
    pub fn context(self, context: impl Into<String>) -> Self {
        EngineError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl EmbeddingError {
    /// 是否值得重试（超时、限流、服务暂不可用、网络抖动）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Timeout { .. }
                | EmbeddingError::RateLimit { .. }
                | EmbeddingError::ServiceUnavailable(_)
                | EmbeddingError::Network(_)
        )
    }
}

// 实现 Display trait
impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Memory(e) => write!(f, "{}", e),
            EngineError::Load(e) => write!(f, "Load error: {}", e),
            EngineError::Embedding(e) => write!(f, "Embedding error: {}", e),
            EngineError::Dispatch(e) => write!(f, "{}", e),
            EngineError::Config(e) => write!(f, "Config error: {}", e),
            EngineError::Context { context, source } => write!(f, "{}: {}", context, source),
            EngineError::Io(e) => write!(f, "IO error: {}", e),
            EngineError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            EngineError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::CapacityExceeded {
                module,
                limit,
                attempted,
            } => write!(
                f,
                "Content of memory module '{}' would grow to {} characters, exceeding the memory limit of {} characters.",
                module, attempted, limit
            ),
            MemoryError::ModuleNotFound(name) => write!(f, "Memory module '{}' not found.", name),
            MemoryError::DuplicateModule(name) => {
                write!(f, "Memory module '{}' already exists.", name)
            }
            MemoryError::ContentNotFound { module, content } => write!(
                f,
                "Content to replace ('{}') not found in memory module '{}'.",
                content, module
            ),
            MemoryError::ConcurrentModification(name) => write!(
                f,
                "Memory module '{}' was modified concurrently, please retry.",
                name
            ),
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::Missing(path) => write!(f, "memory file not found: {}", path.display()),
            LoadFailure::Malformed { path, message } => {
                write!(f, "malformed memory file {}: {}", path.display(), message)
            }
            LoadFailure::Io { path, message } => {
                write!(f, "failed to read memory file {}: {}", path.display(), message)
            }
        }
    }
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::Timeout { after_ms } => {
                write!(f, "request timed out after {}ms", after_ms)
            }
            EmbeddingError::RateLimit { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "rate limit exceeded, retry after {}s", secs),
                None => write!(f, "rate limit exceeded"),
            },
            EmbeddingError::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
            EmbeddingError::Api { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            EmbeddingError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            EmbeddingError::Network(msg) => write!(f, "network error: {}", msg),
            EmbeddingError::EmptyInput => write!(f, "empty input"),
            EmbeddingError::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: expected {}, got {}",
                expected, actual
            ),
            EmbeddingError::RetriesExhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownFunction(name) => write!(f, "Unknown function '{}'", name),
            DispatchError::InvalidArguments { name, message } => {
                write!(f, "Invalid arguments for '{}': {}", name, message)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::MissingField(field) => write!(f, "Missing config field: {}", field),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

// 实现 std::error::Error trait
impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl std::error::Error for MemoryError {}
impl std::error::Error for LoadFailure {}
impl std::error::Error for EmbeddingError {}
impl std::error::Error for DispatchError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbeddingError::Timeout { after_ms: 0 }
        } else if err.is_connect() {
            EmbeddingError::Network(format!("Connection failed: {}", err))
        } else {
            EmbeddingError::Network(err.to_string())
        }
    }
}

impl From<MemoryError> for EngineError {
    fn from(err: MemoryError) -> Self {
        EngineError::Memory(err)
    }
}

impl From<LoadFailure> for EngineError {
    fn from(err: LoadFailure) -> Self {
        EngineError::Load(err)
    }
}

impl From<EmbeddingError> for EngineError {
    fn from(err: EmbeddingError) -> Self {
        EngineError::Embedding(err)
    }
}

impl From<DispatchError> for EngineError {
    fn from(err: DispatchError) -> Self {
        EngineError::Dispatch(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, EngineError>;
