use async_trait::async_trait;
use std::time::Duration;

use engine::{Embedder, InferenceError};

/// Text embedding client for the ML service `/embeddings/text` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
        Ok(HttpEmbedder {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Reads the `embedding` array. Non-numeric entries make the response malformed.
pub fn parse_embedding(body: &serde_json::Value) -> Result<Vec<f32>, InferenceError> {
    let values = body
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| InferenceError::Malformed("Invalid response format from ML service".to_string()))?;

    let embedding: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<_>>()
        .ok_or_else(|| InferenceError::Malformed("non-numeric embedding value".to_string()))?;
    if embedding.is_empty() {
        return Err(InferenceError::Malformed("empty embedding".to_string()));
    }
    Ok(embedding)
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        let response = self
            .client
            .post(format!("{}/embeddings/text", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    InferenceError::Unavailable(e.to_string())
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(InferenceError::Unavailable(format!(
                "ML service returned error: {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;
        parse_embedding(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_embedding() {
        let ok = serde_json::json!({ "embedding": [0.5, -1, 2.25] });
        assert_eq!(parse_embedding(&ok).unwrap(), vec![0.5, -1.0, 2.25]);

        let bad = serde_json::json!({ "embedding": [0.5, "x"] });
        assert!(parse_embedding(&bad).is_err());
        assert!(parse_embedding(&serde_json::json!({ "vector": [1.0] })).is_err());
        assert!(parse_embedding(&serde_json::json!({ "embedding": [] })).is_err());
    }

    #[tokio::test]
    async fn test_embed_posts_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings/text"))
            .and(body_json(serde_json::json!({ "text": "rising tension" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embedding": [0.0, 1.0] })),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert_eq!(embedder.embed("rising tension").await.unwrap(), vec![0.0, 1.0]);
    }
}
