// ADSMITH LLM Bridge - Chat Completions With Structured Output
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Speaks the OpenAI-compatible chat completions dialect. Structured calls
// demand a single JSON object back; malformed output is retried up to
// twice with tightened instructions before surfacing an error.

use crate::error::{ErrorKind, ProviderError};
use crate::providers::{mock::ScriptedLlm, retry, LLM_TIMEOUT};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Malformed-JSON re-asks, on top of the first attempt.
const SCHEMA_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct LlmTuning {
    pub temperature: f32,
    pub max_tokens: u32,
}

pub struct HttpLlm {
    role: String,
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    tuning: LlmTuning,
}

impl HttpLlm {
    async fn chat(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.tuning.temperature,
            "max_tokens": self.tuning.max_tokens,
        });

        let endpoint = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        let mut req = self.client.post(&endpoint).json(&payload).timeout(LLM_TIMEOUT);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            ProviderError::new(&self.role, retry::classify_transport(&e), e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                &self.role,
                ProviderError::kind_for_status(status.as_u16()),
                format!("API error {}", status),
            )
            .with_code(status.as_u16()));
        }

        let body: Value = resp.json().await.map_err(|e| {
            ProviderError::new(&self.role, ErrorKind::Retryable, e.to_string())
        })?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProviderError::new(&self.role, ErrorKind::Retryable, "empty completion")
            })
    }
}

/// Closed provider variant: a real HTTP endpoint or a deterministic script.
pub enum LlmClient {
    Http(HttpLlm),
    Scripted(ScriptedLlm),
}

impl LlmClient {
    pub fn http(
        role: &str,
        api_url: &str,
        api_key: Option<&str>,
        model: &str,
        tuning: LlmTuning,
    ) -> Self {
        LlmClient::Http(HttpLlm {
            role: role.to_string(),
            client: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
            tuning,
        })
    }

    pub fn scripted(inner: ScriptedLlm) -> Self {
        LlmClient::Scripted(inner)
    }

    pub fn role(&self) -> &str {
        match self {
            LlmClient::Http(h) => &h.role,
            LlmClient::Scripted(s) => s.role(),
        }
    }

    /// Free-text completion with transport retries.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        match self {
            LlmClient::Http(h) => {
                retry::with_retries(&format!("llm:{}", h.role), || h.chat(system, prompt)).await
            }
            LlmClient::Scripted(s) => s.complete(system, prompt),
        }
    }

    /// Structured completion: returns the parsed JSON object described by
    /// `schema_hint` (a prose schema the prompt embeds). Malformed output is
    /// re-asked with tightened instructions.
    pub async fn generate_json(
        &self,
        system: &str,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<Value, ProviderError> {
        let mut ask = format!(
            "{}\n\nRespond with a single JSON object matching this shape, no prose, no code fences:\n{}",
            prompt, schema_hint
        );

        for attempt in 0..=SCHEMA_RETRIES {
            let raw = self.generate(system, &ask).await?;
            match extract_json_object(&raw) {
                Some(value) => {
                    info!("[LLM] {} structured output ok (attempt {})", self.role(), attempt + 1);
                    return Ok(value);
                }
                None if attempt < SCHEMA_RETRIES => {
                    warn!(
                        "[LLM] {} returned malformed JSON, tightening instructions (attempt {})",
                        self.role(),
                        attempt + 1
                    );
                    ask = format!(
                        "Your previous reply was not valid JSON. Output ONLY the JSON object, \
                         starting with '{{' and ending with '}}'. Shape:\n{}\n\nOriginal request:\n{}",
                        schema_hint, prompt
                    );
                }
                None => {
                    return Err(ProviderError::new(
                        self.role(),
                        ErrorKind::Permanent,
                        "structured output malformed after retries",
                    ));
                }
            }
        }
        unreachable!("schema retry loop always returns");
    }
}

/// Pull the first top-level JSON object out of a completion. Tolerates
/// code fences and leading prose.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_object() {
        let v = extract_json_object("{\"a\": 1}").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_extract_fenced_object() {
        let raw = "Sure! Here is the plan:\n```json\n{\"mood\": \"bold\"}\n```\nEnjoy.";
        let v = extract_json_object(raw).unwrap();
        assert_eq!(v["mood"], "bold");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none(), "arrays are not objects");
    }
}
