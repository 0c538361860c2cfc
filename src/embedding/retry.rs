use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 超时 + 指数退避重试的 provider 包装
///
/// 超时、限流、服务不可用、网络错误会被重试；重试耗尽后返回
/// [`EmbeddingError::RetriesExhausted`]，调用方据此让整个写入失败，
/// 而不是落下一条没有向量的记录。
pub struct RetryingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    /// 单次调用超时（毫秒）。0 = 不限制
    timeout_ms: u64,
    max_retries: u32,
    /// 首次重试前等待（毫秒），每次翻倍
    retry_delay_ms: u64,
}

impl RetryingProvider {
    pub fn new(
        inner: Arc<dyn EmbeddingProvider>,
        timeout_ms: u64,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            inner,
            timeout_ms,
            max_retries,
            retry_delay_ms,
        }
    }

    async fn attempt(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.timeout_ms == 0 {
            return self.inner.embed(text).await;
        }
        match tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            self.inner.embed(text),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(EmbeddingError::Timeout {
                after_ms: self.timeout_ms,
            }),
        }
    }
}

/// 第 `attempt` 次重试前的等待，指数最多翻 5 次
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.min(5))
}

#[async_trait]
impl EmbeddingProvider for RetryingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(text).await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_retries => {
                    return Err(EmbeddingError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let mut delay_ms = backoff_ms(self.retry_delay_ms, attempt);
                    if let EmbeddingError::RateLimit {
                        retry_after_secs: Some(secs),
                    } = &e
                    {
                        delay_ms = delay_ms.max(secs.saturating_mul(1000));
                    }
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        delay_ms,
                        error = %e,
                        "🔁 embedding 失败，准备重试"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        self.inner.similarity(a, b)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
