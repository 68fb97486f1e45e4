// ADSMITH Motion Provider Adapter - Submit/Poll Over A Fallback Chain
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Motion APIs are asynchronous: `submit` returns a task handle, `poll`
// drives it to pending | ready | failed. Providers are interchangeable
// behind one interface and tried in a fixed fallback order per scene.

use crate::config::{AspectRatio, Resolution};
use crate::error::{ErrorKind, ProviderError};
use crate::executor::Polled;
use crate::providers::{
    mock::{MockMotionBehavior, MockMotionModel},
    retry, MotionRequest, TaskHandle, MOTION_SUBMIT_TIMEOUT,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::json;
use tracing::info;

/// Clip lengths the hosted motion models accept, in whole seconds.
pub const ALLOWED_DURATIONS: std::ops::RangeInclusive<u32> = 4..=10;

pub struct HttpMotionModel {
    name: String,
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpMotionModel {
    async fn submit_once(&self, req: &MotionRequest) -> Result<TaskHandle, ProviderError> {
        let image_bytes = tokio::fs::read(&req.image_path).await.map_err(|e| {
            ProviderError::new(&self.name, ErrorKind::InvalidInput, format!("still unreadable: {}", e))
        })?;
        let first_frame_b64 = match &req.first_frame_path {
            Some(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    ProviderError::new(
                        &self.name,
                        ErrorKind::InvalidInput,
                        format!("bridge frame unreadable: {}", e),
                    )
                })?;
                Some(B64.encode(bytes))
            }
            None => None,
        };

        let payload = json!({
            "image_b64": B64.encode(&image_bytes),
            "motion_prompt": req.motion_prompt,
            "duration_seconds": req.duration_seconds,
            "aspect_ratio": req.aspect.as_str(),
            "negative_prompt": req.negative_prompt,
            "first_frame_b64": first_frame_b64,
            "seed": req.seed,
        });

        let endpoint = format!("{}/generations", self.api_url.trim_end_matches('/'));
        let mut http = self
            .client
            .post(&endpoint)
            .json(&payload)
            .timeout(MOTION_SUBMIT_TIMEOUT);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            ProviderError::new(&self.name, retry::classify_transport(&e), e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                &self.name,
                ProviderError::kind_for_status(status.as_u16()),
                format!("submit rejected: {}", status),
            )
            .with_code(status.as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(&self.name, ErrorKind::Retryable, e.to_string()))?;
        let task_id = body["task_id"]
            .as_str()
            .ok_or_else(|| ProviderError::new(&self.name, ErrorKind::Retryable, "missing task_id"))?;
        Ok(TaskHandle {
            provider: self.name.clone(),
            task_id: task_id.to_string(),
        })
    }

    async fn poll_once(&self, handle: &TaskHandle) -> Result<Polled<Vec<u8>>, ProviderError> {
        let endpoint = format!(
            "{}/generations/{}",
            self.api_url.trim_end_matches('/'),
            handle.task_id
        );
        let mut http = self.client.get(&endpoint).timeout(MOTION_SUBMIT_TIMEOUT);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            ProviderError::new(&self.name, retry::classify_transport(&e), e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                &self.name,
                ProviderError::kind_for_status(status.as_u16()),
                format!("poll failed: {}", status),
            )
            .with_code(status.as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(&self.name, ErrorKind::Retryable, e.to_string()))?;
        match body["status"].as_str() {
            Some("pending") | Some("running") => Ok(Polled::Pending),
            Some("succeeded") => {
                let b64 = body["clip_b64"].as_str().ok_or_else(|| {
                    ProviderError::new(&self.name, ErrorKind::Retryable, "missing clip_b64")
                })?;
                let bytes = B64.decode(b64).map_err(|e| {
                    ProviderError::new(&self.name, ErrorKind::Retryable, e.to_string())
                })?;
                Ok(Polled::Ready(bytes))
            }
            Some("failed") => Ok(Polled::Failed(
                body["reason"].as_str().unwrap_or("unspecified").to_string(),
            )),
            other => Err(ProviderError::new(
                &self.name,
                ErrorKind::Retryable,
                format!("unknown task status {:?}", other),
            )),
        }
    }
}

pub enum MotionBackend {
    Http(HttpMotionModel),
    Mock(MockMotionModel),
}

pub struct MotionModel {
    name: String,
    backend: MotionBackend,
}

impl MotionModel {
    pub fn http(name: &str, api_url: &str, api_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            backend: MotionBackend::Http(HttpMotionModel {
                name: name.to_string(),
                client: reqwest::Client::new(),
                api_url: api_url.to_string(),
                api_key: api_key.map(|s| s.to_string()),
            }),
        }
    }

    pub fn mock(name: &str, seed: u64, behavior: MockMotionBehavior) -> Self {
        Self {
            name: name.to_string(),
            backend: MotionBackend::Mock(MockMotionModel::new(name, seed, behavior)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this model can animate the requested frame geometry.
    pub fn supports(&self, aspect: AspectRatio, resolution: Resolution) -> bool {
        match &self.backend {
            // Hosted models accept every aspect but top out at 1080p.
            MotionBackend::Http(_) => matches!(resolution, Resolution::Hd720 | Resolution::Hd1080),
            MotionBackend::Mock(m) => m.supports(aspect, resolution),
        }
    }

    /// Submit one animation task. Errors here decide fallback: quota and
    /// invalid-input advance the chain to the next provider.
    pub async fn submit(&self, req: &MotionRequest) -> Result<TaskHandle, ProviderError> {
        if !ALLOWED_DURATIONS.contains(&req.duration_seconds) {
            return Err(ProviderError::new(
                &self.name,
                ErrorKind::InvalidInput,
                format!(
                    "duration {}s outside allowed {}..={}s",
                    req.duration_seconds,
                    ALLOWED_DURATIONS.start(),
                    ALLOWED_DURATIONS.end()
                ),
            ));
        }
        info!(
            "[MOTION] {} submit: {}s, aspect {}",
            self.name,
            req.duration_seconds,
            req.aspect.as_str()
        );
        match &self.backend {
            MotionBackend::Http(h) => {
                retry::with_retries(&format!("motion:{}:submit", self.name), || {
                    h.submit_once(req)
                })
                .await
            }
            MotionBackend::Mock(m) => m.submit(req),
        }
    }

    /// One poll step; the executor's poll group owns the backoff schedule.
    pub async fn poll(&self, handle: &TaskHandle) -> Result<Polled<Vec<u8>>, ProviderError> {
        match &self.backend {
            MotionBackend::Http(h) => h.poll_once(handle).await,
            MotionBackend::Mock(m) => m.poll(handle),
        }
    }
}

/// Fixed fallback order from the environment: primary, then fallbacks.
pub fn motion_chain_from_env() -> Vec<MotionModel> {
    let specs = [
        ("motion-primary", "ADSMITH_MOTION_PRIMARY_URL", "ADSMITH_MOTION_PRIMARY_KEY"),
        ("motion-fallback-1", "ADSMITH_MOTION_FALLBACK1_URL", "ADSMITH_MOTION_FALLBACK1_KEY"),
        ("motion-fallback-2", "ADSMITH_MOTION_FALLBACK2_URL", "ADSMITH_MOTION_FALLBACK2_KEY"),
    ];
    specs
        .iter()
        .filter_map(|(name, url_var, key_var)| {
            std::env::var(url_var)
                .ok()
                .map(|url| MotionModel::http(name, &url, std::env::var(key_var).ok().as_deref()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_duration_outside_allowed_set_is_invalid_input() {
        let model = MotionModel::mock("m", 1, MockMotionBehavior::Succeed);
        let req = MotionRequest {
            image_path: PathBuf::from("missing.png"),
            motion_prompt: "pan".into(),
            duration_seconds: 2,
            aspect: AspectRatio::Widescreen,
            resolution: Resolution::Hd1080,
            negative_prompt: None,
            first_frame_path: None,
            seed: 1,
        };
        let err = model.submit(&req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
