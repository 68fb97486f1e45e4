// ADSMITH Image Critic - Deterministic Quality Rubric
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// A vision-capable LLM scores each candidate 1..10 against a fixed rubric.
// Memoisation by image fingerprint happens in the Critique Cache, not here.

use crate::error::{ErrorKind, ProviderError};
use crate::providers::{mock::MockCritic, retry, LLM_TIMEOUT};
use crate::store::CritiqueVerdict;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::json;

/// The rubric is part of the contract: identical bytes under identical
/// brief context must judge the same.
const RUBRIC: &str = "Score this commercial still 1-10 against four axes, equally weighted: \
cinematic quality (lighting, composition, depth), prompt adherence, \
character consistency with the described primary subject, technical fidelity \
(artifacts, anatomy, text). Respond as JSON: \
{\"score\": <1-10 integer>, \"rationale\": \"<one sentence>\"}.";

pub struct HttpCritic {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpCritic {
    async fn critique_once(
        &self,
        image_bytes: &[u8],
        brief_context: &str,
    ) -> Result<CritiqueVerdict, ProviderError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": RUBRIC },
                { "role": "user", "content": [
                    { "type": "text", "text": brief_context },
                    { "type": "image", "image_b64": B64.encode(image_bytes) }
                ]}
            ],
            "temperature": 0.0,
        });

        let endpoint = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        let mut http = self.client.post(&endpoint).json(&payload).timeout(LLM_TIMEOUT);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            ProviderError::new("critic", retry::classify_transport(&e), e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                "critic",
                ProviderError::kind_for_status(status.as_u16()),
                format!("API error {}", status),
            )
            .with_code(status.as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("critic", ErrorKind::Retryable, e.to_string()))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::new("critic", ErrorKind::Retryable, "empty verdict"))?;

        parse_verdict(content)
            .ok_or_else(|| ProviderError::new("critic", ErrorKind::Retryable, "malformed verdict"))
    }
}

pub fn parse_verdict(content: &str) -> Option<CritiqueVerdict> {
    let value = crate::providers::llm::extract_json_object(content)?;
    let score = value["score"].as_u64()?.clamp(1, 10) as u8;
    let rationale = value["rationale"].as_str().unwrap_or("").to_string();
    Some(CritiqueVerdict {
        score,
        rationale,
        // The stage applies its own adaptive threshold; this is the
        // provider's baseline acceptance.
        accept: score >= 7,
    })
}

pub enum ImageCritic {
    Http(HttpCritic),
    Mock(MockCritic),
}

impl ImageCritic {
    pub fn from_env(llm_base: &str, llm_key: Option<&str>) -> Self {
        let api_url =
            std::env::var("ADSMITH_CRITIC_URL").unwrap_or_else(|_| llm_base.to_string());
        ImageCritic::Http(HttpCritic {
            client: reqwest::Client::new(),
            api_url,
            api_key: std::env::var("ADSMITH_CRITIC_KEY")
                .ok()
                .or_else(|| llm_key.map(|s| s.to_string())),
            model: std::env::var("ADSMITH_CRITIC_MODEL")
                .unwrap_or_else(|_| "critic-vision".to_string()),
        })
    }

    pub async fn critique(
        &self,
        image_bytes: &[u8],
        brief_context: &str,
    ) -> Result<CritiqueVerdict, ProviderError> {
        match self {
            ImageCritic::Http(h) => {
                retry::with_retries("critic:critique", || {
                    h.critique_once(image_bytes, brief_context)
                })
                .await
            }
            ImageCritic::Mock(m) => m.critique(image_bytes, brief_context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict("{\"score\": 8, \"rationale\": \"sharp\"}").unwrap();
        assert_eq!(v.score, 8);
        assert!(v.accept);
        let v = parse_verdict("{\"score\": 4, \"rationale\": \"mushy\"}").unwrap();
        assert!(!v.accept);
    }

    #[test]
    fn test_parse_verdict_clamps_score() {
        let v = parse_verdict("{\"score\": 14, \"rationale\": \"\"}").unwrap();
        assert_eq!(v.score, 10);
    }
}
