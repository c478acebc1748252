//! Text-to-speech synthesis adapter (ElevenLabs-shaped live variant).
//! Byte-level codec correctness is out of scope; the core only needs a
//! `Vec<u8>` artifact to upload via [`super::Storage`].

use async_trait::async_trait;

use super::{ProviderError, Tts};

#[derive(Default)]
pub struct MockTts;

#[async_trait]
impl Tts for MockTts {
    async fn synthesize(&self, _voice_id: Option<&str>, text: &str) -> Result<Vec<u8>, ProviderError> {
        if text.is_empty() {
            return Err(ProviderError::new("tts", "empty text"));
        }
        // Deterministic placeholder "audio": a RIFF/WAV header followed by
        // the UTF-8 text, enough to exercise storage upload and size
        // accounting without a real codec.
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(text.as_bytes());
        Ok(out)
    }
}

pub struct LiveTts {
    client: reqwest::Client,
    api_key: String,
}

impl LiveTts {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl Tts for LiveTts {
    async fn synthesize(&self, voice_id: Option<&str>, text: &str) -> Result<Vec<u8>, ProviderError> {
        let voice = voice_id.unwrap_or("21m00Tcm4TlvDq8ikWAM");
        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");
        let resp = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ProviderError::new("tts", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("tts", format!("HTTP {}", resp.status())));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ProviderError::new("tts", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_rejects_empty_text() {
        let mock = MockTts;
        assert!(mock.synthesize(None, "").await.is_err());
    }

    #[tokio::test]
    async fn mock_synthesizes_nonempty_bytes() {
        let mock = MockTts;
        let bytes = mock.synthesize(None, "hello").await.unwrap();
        assert!(!bytes.is_empty());
    }
}
