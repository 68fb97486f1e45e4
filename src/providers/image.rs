// ADSMITH Image Model Adapter
// Copyright (c) 2026 AdSmith Collective | ADSMITH

use crate::error::{ErrorKind, ProviderError};
use crate::providers::{
    mock::MockImageModel, retry, ImageRequest, IMAGE_TIMEOUT, MAX_IMAGE_PROMPT_CHARS,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::json;
use tracing::info;

pub struct HttpImageModel {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpImageModel {
    async fn generate_once(&self, req: &ImageRequest) -> Result<Vec<u8>, ProviderError> {
        let prompt = crate::providers::truncate_prompt(&req.prompt, MAX_IMAGE_PROMPT_CHARS);
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "aspect_ratio": req.aspect.as_str(),
            "resolution": req.resolution.as_str(),
            "seed": req.seed,
            "reference_images": req.references,
        });

        let endpoint = format!("{}/images/generate", self.api_url.trim_end_matches('/'));
        let mut http = self.client.post(&endpoint).json(&payload).timeout(IMAGE_TIMEOUT);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            ProviderError::new("image", retry::classify_transport(&e), e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                "image",
                ProviderError::kind_for_status(status.as_u16()),
                format!("API error {}", status),
            )
            .with_code(status.as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("image", ErrorKind::Retryable, e.to_string()))?;
        let b64 = body["image_b64"]
            .as_str()
            .ok_or_else(|| ProviderError::new("image", ErrorKind::Retryable, "missing image_b64"))?;
        B64.decode(b64)
            .map_err(|e| ProviderError::new("image", ErrorKind::Retryable, e.to_string()))
    }
}

pub enum ImageModel {
    Http(HttpImageModel),
    Mock(MockImageModel),
}

impl ImageModel {
    pub fn from_env() -> Self {
        let api_url = std::env::var("ADSMITH_IMAGE_URL")
            .unwrap_or_else(|_| "http://localhost:7801".to_string());
        ImageModel::Http(HttpImageModel {
            client: reqwest::Client::new(),
            api_url,
            api_key: std::env::var("ADSMITH_IMAGE_KEY").ok(),
            model: std::env::var("ADSMITH_IMAGE_MODEL")
                .unwrap_or_else(|_| "still-forge-xl".to_string()),
        })
    }

    /// Generate one candidate still. The returned bytes are validated as a
    /// decodable image before the stage accepts them.
    pub async fn generate(&self, req: &ImageRequest) -> Result<Vec<u8>, ProviderError> {
        let bytes = match self {
            ImageModel::Http(h) => {
                retry::with_retries("image:generate", || h.generate_once(req)).await?
            }
            ImageModel::Mock(m) => m.generate(req)?,
        };

        // Reject undecodable payloads before they reach the store.
        image::load_from_memory(&bytes).map_err(|e| {
            ProviderError::new("image", ErrorKind::Retryable, format!("undecodable image: {}", e))
        })?;
        info!("[IMAGE] Candidate generated ({} bytes, seed {})", bytes.len(), req.seed);
        Ok(bytes)
    }
}
