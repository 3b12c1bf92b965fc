use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use engine::extract::{ChunkAnchors, ChunkRequest};
use engine::{InferenceError, TextEngine};

/// Client for an OpenAI-compatible chat server (llama-server and friends)
/// that supports `json_schema` constrained generation.
pub struct ChatTextEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl ChatTextEngine {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
        Ok(ChatTextEngine {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }
}

pub fn build_prompt(request: &ChunkRequest) -> String {
    format!(
        "Below is a block of film subtitles between {:.1}s and {:.1}s. \
         Identify three structural timestamps in seconds, within that range: \
         begin_t (the story's setup), escalation_t (where tension starts rising) \
         and climax_t (the peak of the conflict). \
         Respond with a JSON object with keys begin_t, escalation_t, climax_t.\n\n{}",
        request.span_start_s, request.span_end_s, request.transcript
    )
}

/// Pulls the anchors out of a chat completion. Anything but a single
/// schema-conformant object is `Malformed`.
pub fn parse_completion(body: &serde_json::Value) -> Result<ChunkAnchors, InferenceError> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| InferenceError::Malformed("missing choices[0].message.content".to_string()))?;

    serde_json::from_str::<ChunkAnchors>(content.trim())
        .map_err(|e| InferenceError::Malformed(format!("{}: {:?}", e, content)))
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout(timeout.as_secs_f64())
    } else if e.is_connect() {
        InferenceError::Unavailable(e.to_string())
    } else {
        InferenceError::Transport(e.to_string())
    }
}

#[async_trait]
impl TextEngine for ChatTextEngine {
    async fn locate_anchors(&self, request: &ChunkRequest) -> Result<ChunkAnchors, InferenceError> {
        let payload = serde_json::json!({
            "model": self.model,
            "temperature": 0.1,
            "max_tokens": 256,
            "json_schema": request.schema,
            "messages": [{
                "role": "user",
                "content": build_prompt(request),
            }],
        });

        debug!("[LLM] chunk {} -> {}/v1/chat/completions", request.index, self.base_url);
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Unavailable(format!(
                "text engine returned error: {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::extract::anchors_schema;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    fn request() -> ChunkRequest {
        ChunkRequest {
            index: 0,
            span_start_s: 0.0,
            span_end_s: 120.0,
            transcript: "[0.0s] Hello".to_string(),
            schema: anchors_schema(),
        }
    }

    #[test]
    fn test_parse_completion() {
        let anchors =
            parse_completion(&completion(r#" {"begin_t": 3.5, "escalation_t": 40, "climax_t": 90} "#)).unwrap();
        assert_eq!(anchors.begin_t, 3.5);
        assert_eq!(anchors.climax_t, 90.0);
    }

    #[test]
    fn test_parse_completion_rejects_other_shapes() {
        let extra = completion(r#"{"begin_t": 1, "escalation_t": 2, "climax_t": 3, "note": "x"}"#);
        assert!(matches!(parse_completion(&extra), Err(InferenceError::Malformed(_))));

        let missing = completion(r#"{"begin_t": 1, "escalation_t": 2}"#);
        assert!(matches!(parse_completion(&missing), Err(InferenceError::Malformed(_))));

        let prose = completion("The climax is at 90 seconds.");
        assert!(matches!(parse_completion(&prose), Err(InferenceError::Malformed(_))));

        let empty = serde_json::json!({ "choices": [] });
        assert!(matches!(parse_completion(&empty), Err(InferenceError::Malformed(_))));
    }

    #[test]
    fn test_prompt_carries_span_and_transcript() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("between 0.0s and 120.0s"));
        assert!(prompt.ends_with("[0.0s] Hello"));
    }

    #[tokio::test]
    async fn test_locate_anchors_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"begin_t": 5, "escalation_t": 50, "climax_t": 100}"#,
            )))
            .mount(&server)
            .await;

        let engine = ChatTextEngine::new(&server.uri(), "local", Duration::from_secs(5)).unwrap();
        let anchors = engine.locate_anchors(&request()).await.unwrap();
        assert_eq!(anchors.escalation_t, 50.0);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let engine = ChatTextEngine::new(&server.uri(), "local", Duration::from_secs(5)).unwrap();
        let err = engine.locate_anchors(&request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
    }
}
