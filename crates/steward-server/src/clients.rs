//! HTTP implementations of the engine's outbound boundaries.
//!
//! Every client carries its own request timeout from configuration; the
//! engine adds its own bound on top where it needs one.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use steward_core::{Button, ClassifierConfig, DomainConfig, TextFormat};
use steward_engine::{
    CompletionClient, CompletionError, DomainError, DomainService, EntityRef, Prompt, ReplyError,
    ReplySink,
};

fn http_client(timeout_ms: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()?)
}

// =============================================================================
// Completion
// =============================================================================

/// OpenAI-compatible chat completion client.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl HttpCompletionClient {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "Completion API key not set; requests go out unauthenticated"
            );
        }
        Ok(Self {
            client: http_client(config.timeout_ms)?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": &self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": &prompt.system},
                {"role": "user", "content": &prompt.user}
            ]
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompletionError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CompletionError::Status {
                status: response.status().as_u16(),
            });
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CompletionError::Malformed("no choices in response".into()))
    }
}

// =============================================================================
// Domain service
// =============================================================================

/// Domain backend reached over JSON/HTTP.
///
/// * `POST {base}/entities/{kind}` creates an entity and answers `{id, url?}`
/// * `POST {base}/actions/{action}` runs an action and answers any JSON
pub struct HttpDomainService {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpDomainService {
    pub fn new(config: &DomainConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_ms)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, DomainError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => DomainError::NotFound(text),
                s if s.is_client_error() => DomainError::Rejected(text),
                s => DomainError::Unavailable(format!("status {}: {}", s, text)),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::Unavailable(format!("malformed response: {}", e)))
    }

    fn transport_error(&self, e: reqwest::Error) -> DomainError {
        if e.is_timeout() {
            DomainError::Timeout {
                ms: self.timeout_ms,
            }
        } else {
            DomainError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl DomainService for HttpDomainService {
    async fn create_entity(&self, kind: &str, payload: &Value) -> Result<EntityRef, DomainError> {
        #[derive(Deserialize)]
        struct Created {
            id: Value,
            #[serde(default)]
            url: Option<String>,
        }

        let body = self.post(&format!("entities/{}", kind), payload).await?;
        let created: Created = serde_json::from_value(body)
            .map_err(|e| DomainError::Unavailable(format!("malformed response: {}", e)))?;
        let id = match created.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(EntityRef {
            kind: kind.to_string(),
            id,
            url: created.url,
        })
    }

    async fn invoke(&self, action: &str, params: &Map<String, Value>) -> Result<Value, DomainError> {
        self.post(&format!("actions/{}", action), &Value::Object(params.clone()))
            .await
    }
}

// =============================================================================
// Reply delivery
// =============================================================================

/// Posts replies to a chat API (`sendMessage`, `editMessageText`,
/// `sendDocument`).
pub struct HttpReplySink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReplySink {
    pub fn new(base_url: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_ms)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<(), ReplyError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ReplyError::Delivery(format!("status {}: {}", status, text)))
        }
    }
}

fn delivery_error(e: reqwest::Error) -> ReplyError {
    if e.is_timeout() {
        ReplyError::Timeout
    } else {
        ReplyError::Delivery(e.to_string())
    }
}

#[async_trait]
impl ReplySink for HttpReplySink {
    async fn send(
        &self,
        chat_id: &str,
        text: &str,
        buttons: &[Button],
        format: TextFormat,
    ) -> Result<(), ReplyError> {
        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "buttons": buttons,
                "format": format,
            }))
            .send()
            .await
            .map_err(delivery_error)?;
        Self::check(response).await
    }

    async fn edit(&self, chat_id: &str, message_id: &str, text: &str) -> Result<(), ReplyError> {
        let response = self
            .client
            .post(format!("{}/editMessageText", self.base_url))
            .json(&json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(delivery_error)?;
        Self::check(response).await
    }

    async fn send_document(
        &self,
        chat_id: &str,
        bytes: &[u8],
        filename: &str,
        caption: Option<&str>,
    ) -> Result<(), ReplyError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(format!("{}/sendDocument", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(delivery_error)?;
        Self::check(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_base_url_is_normalised() {
        let service = HttpDomainService::new(&DomainConfig {
            base_url: "http://shop.local/api/".into(),
            timeout_ms: 500,
        })
        .unwrap();
        assert_eq!(service.base_url, "http://shop.local/api");
    }

    #[test]
    fn test_completion_client_reads_key_from_env() {
        // SAFETY: test-only variable, not read elsewhere
        unsafe {
            std::env::set_var("STEWARD_TEST_COMPLETION_KEY", "sk-test");
        }
        let client = HttpCompletionClient::new(&ClassifierConfig {
            api_key_env: "STEWARD_TEST_COMPLETION_KEY".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.api_key.as_deref(), Some("sk-test"));
    }
}
