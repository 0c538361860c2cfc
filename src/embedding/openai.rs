use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, EmbeddingError, EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI 兼容的 Embeddings 接口
///
/// 超时与重试交给外层的 [`RetryingProvider`](super::RetryingProvider)。
pub struct OpenAiEmbeddingProvider {
    client: Arc<Client>,
    model: String,
    baseurl: String,
    headers: HeaderMap,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        client: Arc<Client>,
        model: impl Into<String>,
        baseurl: impl Into<String>,
        apikey: &str,
    ) -> Result<Self> {
        Ok(Self {
            client,
            model: model.into(),
            baseurl: baseurl.into(),
            headers: assemble_req_header(apikey)?,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let apikey = config
            .apikey
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("embedding.apikey".to_string()))?;
        Self::new(
            Arc::new(Client::new()),
            config.model.clone(),
            config.baseurl.clone(),
            apikey,
        )
    }
}

fn assemble_req_header(apikey: &str) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    header_map.insert(
        "Authorization",
        format!("Bearer {}", apikey)
            .parse()
            .map_err(|e| EngineError::Other(format!("Invalid Authorization header: {}", e)))?,
    );
    header_map.insert(
        "Content-Type",
        "application/json"
            .parse()
            .map_err(|e| EngineError::Other(format!("Invalid Content-Type header: {}", e)))?,
    );
    Ok(header_map)
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let request_body = EmbeddingRequest {
            input: text,
            model: &self.model,
        };
        let response = self
            .client
            .post(&self.baseurl)
            .headers(self.headers.clone())
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => EmbeddingError::RateLimit { retry_after_secs },
                s if s.is_server_error() => EmbeddingError::ServiceUnavailable(message),
                s => EmbeddingError::Api {
                    status: s.as_u16(),
                    message,
                },
            });
        }

        let body = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| EmbeddingError::InvalidResponse("响应中没有向量".to_string()))?;

        debug!(model = %self.model, dims = embedding.len(), "🧮 embedding 完成");
        Ok(embedding)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = EmbeddingRequest {
            input: "Paris is in France",
            model: "text-embedding-ada-002",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["input"], "Paris is in France");
        assert_eq!(json["model"], "text-embedding-ada-002");
    }

    #[test]
    fn test_response_parsing_takes_first_vector() {
        let raw = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"m","usage":{"prompt_tokens":3,"total_tokens":3}}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_request() {
        let provider = OpenAiEmbeddingProvider::new(
            Arc::new(Client::new()),
            "text-embedding-ada-002",
            "http://127.0.0.1:9/embeddings",
            "sk-test",
        )
        .unwrap();
        assert_eq!(
            provider.embed("   ").await.unwrap_err(),
            EmbeddingError::EmptyInput
        );
    }
}
