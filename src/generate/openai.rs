//! OpenAI-compatible structured generation over HTTP.
//!
//! Speaks the chat-completions protocol with a `json_schema` response format,
//! which most compatible servers (OpenAI, many local gateways) accept. The
//! returned content is parsed and shallow-validated against the schema's
//! required keys; a validation miss is retried once before surfacing
//! `InvalidOutput`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ChatMessage, GenerateError, GenerateOptions, Generation, StructuredGenerator, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Attempts per call: the initial request plus one retry on validation failure.
const MAX_VALIDATION_ATTEMPTS: u32 = 2;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Build from environment: `BRAID_API_KEY` (required), `BRAID_BASE_URL`
    /// and `BRAID_MODEL` (optional). Returns `None` when no key is set, and
    /// summarization then runs in its degraded no-provider mode.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(
            std::env::var("BRAID_BASE_URL").ok(),
            std::env::var("BRAID_API_KEY").ok(),
            std::env::var("BRAID_MODEL").ok(),
        )
    }

    pub fn from_vars(
        base_url: Option<String>,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Option<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty())?;
        Some(Self::new(
            base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            &api_key,
            model.as_deref().unwrap_or(DEFAULT_MODEL),
        ))
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        schema: &Value,
        options: &GenerateOptions,
    ) -> Value {
        json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "temperature": options.temperature,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "strict": true,
                    "schema": schema,
                }
            }
        })
    }

    async fn attempt(
        &self,
        body: &Value,
    ) -> Result<(Value, Option<Usage>), GenerateError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Transport(format!("malformed response: {}", e)))?;

        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| GenerateError::Transport("response carried no content".to_string()))?;

        let data: Value = serde_json::from_str(content).map_err(|e| GenerateError::InvalidOutput {
            attempts: 1,
            reason: format!("content is not valid JSON: {}", e),
        })?;

        let usage = completion.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok((data, usage))
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiGenerator {
    async fn generate_structured(
        &self,
        messages: &[ChatMessage],
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerateError> {
        let body = self.request_body(messages, schema, options);

        let mut last_reason = String::new();
        for attempt in 1..=MAX_VALIDATION_ATTEMPTS {
            let (data, usage) = match self.attempt(&body).await {
                Ok(ok) => ok,
                Err(GenerateError::InvalidOutput { reason, .. }) => {
                    last_reason = reason;
                    continue;
                }
                Err(other) => return Err(other),
            };
            match validate_required(&data, schema) {
                Ok(()) => return Ok(Generation { data, usage }),
                Err(reason) => {
                    tracing::debug!(attempt, %reason, "generated output failed validation");
                    last_reason = reason;
                }
            }
        }

        Err(GenerateError::InvalidOutput {
            attempts: MAX_VALIDATION_ATTEMPTS,
            reason: last_reason,
        })
    }
}

/// Shallow schema check: the output must be an object carrying every key the
/// schema marks required, with array-typed properties actually arrays.
fn validate_required(data: &Value, schema: &Value) -> Result<(), String> {
    let obj = data
        .as_object()
        .ok_or_else(|| "output is not a JSON object".to_string())?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(format!("missing required key '{}'", key));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in props {
            let Some(value) = obj.get(key) else { continue };
            if prop.get("type").and_then(Value::as_str) == Some("array") && !value.is_array() {
                return Err(format!("key '{}' should be an array", key));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "key_decisions": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["summary", "key_decisions"],
        })
    }

    #[test]
    fn test_from_vars_requires_api_key() {
        assert!(OpenAiGenerator::from_vars(None, None, None).is_none());
        assert!(OpenAiGenerator::from_vars(None, Some("  ".into()), None).is_none());

        let g = OpenAiGenerator::from_vars(None, Some("sk-test".into()), None).unwrap();
        assert_eq!(g.base_url, DEFAULT_BASE_URL);
        assert_eq!(g.model, DEFAULT_MODEL);

        let g = OpenAiGenerator::from_vars(
            Some("http://localhost:11434/v1/".into()),
            Some("sk-test".into()),
            Some("llama3".into()),
        )
        .unwrap();
        assert_eq!(g.base_url, "http://localhost:11434/v1");
        assert_eq!(g.model, "llama3");
    }

    #[test]
    fn test_request_body_shape() {
        let g = OpenAiGenerator::new("http://x", "k", "m1");
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let body = g.request_body(&messages, &schema(), &GenerateOptions::default());

        assert_eq!(body["model"], "m1");
        assert_eq!(body["messages"][1]["content"], "u");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["required"][0],
            "summary"
        );

        let opts = GenerateOptions {
            temperature: 0.7,
            model: Some("override".into()),
        };
        let body = g.request_body(&messages, &schema(), &opts);
        assert_eq!(body["model"], "override");
    }

    #[test]
    fn test_validate_required_accepts_shaped_output() {
        let data = json!({"summary": "ok", "key_decisions": ["a"]});
        assert!(validate_required(&data, &schema()).is_ok());
    }

    #[test]
    fn test_validate_required_rejects_missing_key() {
        let data = json!({"summary": "ok"});
        let err = validate_required(&data, &schema()).unwrap_err();
        assert!(err.contains("key_decisions"));
    }

    #[test]
    fn test_validate_required_rejects_wrong_shape() {
        assert!(validate_required(&json!("just a string"), &schema()).is_err());
        let data = json!({"summary": "ok", "key_decisions": "not-an-array"});
        let err = validate_required(&data, &schema()).unwrap_err();
        assert!(err.contains("array"));
    }
}
