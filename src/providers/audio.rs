// ADSMITH Voice / SFX / Music Adapter
// Copyright (c) 2026 AdSmith Collective | ADSMITH

use crate::error::{ErrorKind, ProviderError};
use crate::providers::{
    mock::MockVoice, retry, FxRequest, TtsRequest, VoiceFilter, VoiceInfo, AUDIO_TIMEOUT,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::json;
use tracing::info;

pub struct HttpVoiceModel {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpVoiceModel {
    async fn post_audio(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<Vec<u8>, ProviderError> {
        let endpoint = format!("{}{}", self.api_url.trim_end_matches('/'), path);
        let mut http = self.client.post(&endpoint).json(&payload).timeout(AUDIO_TIMEOUT);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            ProviderError::new("voice", retry::classify_transport(&e), e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                "voice",
                ProviderError::kind_for_status(status.as_u16()),
                format!("API error {}", status),
            )
            .with_code(status.as_u16()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("voice", ErrorKind::Retryable, e.to_string()))?;
        let b64 = body["audio_b64"]
            .as_str()
            .ok_or_else(|| ProviderError::new("voice", ErrorKind::Retryable, "missing audio_b64"))?;
        B64.decode(b64)
            .map_err(|e| ProviderError::new("voice", ErrorKind::Retryable, e.to_string()))
    }
}

pub enum VoiceModel {
    Http(HttpVoiceModel),
    Mock(MockVoice),
}

impl VoiceModel {
    pub fn from_env() -> Self {
        VoiceModel::Http(HttpVoiceModel {
            client: reqwest::Client::new(),
            api_url: std::env::var("ADSMITH_VOICE_URL")
                .unwrap_or_else(|_| "http://localhost:7802".to_string()),
            api_key: std::env::var("ADSMITH_VOICE_KEY").ok(),
        })
    }

    /// Text-to-speech. The duration target is advisory; the provider
    /// returns natural length.
    pub async fn synthesize_speech(&self, req: &TtsRequest) -> Result<Vec<u8>, ProviderError> {
        info!("[AUDIO] TTS \"{}\" (voice {})", req.text, req.voice_id);
        match self {
            VoiceModel::Http(h) => {
                retry::with_retries("voice:tts", || {
                    h.post_audio(
                        "/tts",
                        json!({
                            "text": req.text,
                            "voice_id": req.voice_id,
                            "duration_target_s": req.duration_target_s,
                        }),
                    )
                })
                .await
            }
            VoiceModel::Mock(m) => m.synthesize_speech(req),
        }
    }

    /// Sound effects and music beds share one synthesis surface; only the
    /// prompt and duration differ.
    pub async fn synthesize_fx(&self, req: &FxRequest) -> Result<Vec<u8>, ProviderError> {
        info!("[AUDIO] FX \"{}\" ({}s)", req.prompt, req.duration_s);
        match self {
            VoiceModel::Http(h) => {
                retry::with_retries("voice:fx", || {
                    h.post_audio(
                        "/sfx",
                        json!({
                            "prompt": req.prompt,
                            "duration_s": req.duration_s,
                        }),
                    )
                })
                .await
            }
            VoiceModel::Mock(m) => m.synthesize_fx(req),
        }
    }

    /// Voice library search backing auto-cast.
    pub async fn list_voices(&self, filter: &VoiceFilter) -> Result<Vec<VoiceInfo>, ProviderError> {
        match self {
            VoiceModel::Http(h) => {
                let payload = json!({
                    "gender": filter.gender,
                    "accent": filter.accent,
                    "search": filter.search_hint,
                });
                let endpoint = format!("{}/voices/search", h.api_url.trim_end_matches('/'));
                let mut http = h.client.post(&endpoint).json(&payload).timeout(AUDIO_TIMEOUT);
                if let Some(key) = &h.api_key {
                    http = http.bearer_auth(key);
                }
                let resp = http.send().await.map_err(|e| {
                    ProviderError::new("voice", retry::classify_transport(&e), e.to_string())
                })?;
                let body: serde_json::Value = resp.json().await.map_err(|e| {
                    ProviderError::new("voice", ErrorKind::Retryable, e.to_string())
                })?;
                let voices = body["voices"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| {
                                Some(VoiceInfo {
                                    voice_id: v["voice_id"].as_str()?.to_string(),
                                    name: v["name"].as_str().unwrap_or("").to_string(),
                                    gender: v["gender"].as_str().unwrap_or("").to_string(),
                                    accent: v["accent"].as_str().unwrap_or("").to_string(),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(voices)
            }
            VoiceModel::Mock(m) => Ok(m.list_voices(filter)),
        }
    }
}
