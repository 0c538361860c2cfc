//! Mock embedding provider，用于在不发起真实 HTTP 请求的情况下测试依赖
//! [`EmbeddingProvider`] 的组件。
//!
//! # 示例
//!
//! ```rust
//! use echo_memory::testing::MockEmbeddingProvider;
//! use echo_memory::embedding::EmbeddingProvider;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockEmbeddingProvider::new()
//!     .with_vector("Paris is in France", vec![1.0, 0.0])
//!     .with_vector("capital of France", vec![0.8, 0.6]);
//!
//! let v = mock.embed("Paris is in France").await.unwrap();
//! assert_eq!(v, vec![1.0, 0.0]);
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::embedding::EmbeddingProvider;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 可脚本化的 Mock embedding provider。
///
/// - 预设的失败按顺序先于正常结果返回
/// - 已登记文本返回登记的向量；未登记文本返回 fallback 向量（若有），
///   否则返回 `InvalidResponse` 错误
pub struct MockEmbeddingProvider {
    vectors: Arc<Mutex<HashMap<String, Vec<f32>>>>,
    fallback: Option<Vec<f32>>,
    failures: Arc<Mutex<VecDeque<EmbeddingError>>>,
    delay: Option<Duration>,
    /// 每次调用收到的文本，按顺序记录
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            vectors: Arc::new(Mutex::new(HashMap::new())),
            fallback: None,
            failures: Arc::new(Mutex::new(VecDeque::new())),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 为某段文本登记固定向量
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.lock().unwrap().insert(text.into(), vector);
        self
    }

    /// 未登记文本使用的向量
    pub fn with_fallback(mut self, vector: Vec<f32>) -> Self {
        self.fallback = Some(vector);
        self
    }

    /// 追加一次失败（用于测试重试和错误路径）
    pub fn with_failure(self, err: EmbeddingError) -> Self {
        self.failures.lock().unwrap().push_back(err);
        self
    }

    /// 每次调用前等待，用于触发超时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 运行中登记向量
    pub fn register(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.into(), vector);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.lock().unwrap().push(text.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let known = self.vectors.lock().unwrap().get(text).cloned();
        known.or_else(|| self.fallback.clone()).ok_or_else(|| {
            EmbeddingError::InvalidResponse(format!("no scripted vector for '{}'", text))
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
