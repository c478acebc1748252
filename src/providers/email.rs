//! Email adapter: Resend-shaped live client, deterministic mock.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{DispatchReceipt, EmailProvider, ProviderError};

const EMAIL_COST: f64 = 0.0003;

#[derive(Default)]
pub struct MockEmail {
    next_id: AtomicU64,
}

#[async_trait]
impl EmailProvider for MockEmail {
    async fn send(
        &self,
        _from: &str,
        to: &str,
        subject: &str,
        _body: &str,
        _html: Option<&str>,
    ) -> Result<DispatchReceipt, ProviderError> {
        if subject.is_empty() {
            return Err(ProviderError::new("email", "subject required"));
        }
        if to.is_empty() {
            return Err(ProviderError::new("email", "missing recipient"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchReceipt {
            external_id: format!("email-{n:08x}"),
            provider_status: "sent".to_owned(),
            cost: EMAIL_COST,
        })
    }

    fn verify_signature(&self, _payload: &[u8], _signature: &str) -> bool {
        true
    }
}

/// Resend-shaped live adapter.
pub struct LiveEmail {
    client: reqwest::Client,
    api_key: String,
    webhook_signing_secret: String,
}

impl LiveEmail {
    pub fn new(api_key: String, webhook_signing_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            webhook_signing_secret,
        }
    }
}

#[async_trait]
impl EmailProvider for LiveEmail {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
        html: Option<&str>,
    ) -> Result<DispatchReceipt, ProviderError> {
        if subject.is_empty() {
            return Err(ProviderError::new("email", "subject required"));
        }
        let payload = serde_json::json!({
            "from": from,
            "to": [to],
            "subject": subject,
            "text": body,
            "html": html,
        });
        let resp = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::new("email", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("email", format!("HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("email", e.to_string()))?;
        Ok(DispatchReceipt {
            external_id: body["id"].as_str().unwrap_or_default().to_owned(),
            provider_status: "sent".to_owned(),
            cost: EMAIL_COST,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        let mut mac = match Hmac::<Sha256>::new_from_slice(self.webhook_signing_secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        use subtle::ConstantTimeEq;
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_rejects_empty_subject() {
        let mock = MockEmail::default();
        let err = mock
            .send("agent@example.com", "to@example.com", "", "body", None)
            .await
            .unwrap_err();
        assert!(err.detail.contains("subject"));
    }

    #[tokio::test]
    async fn mock_accepts_valid_send() {
        let mock = MockEmail::default();
        let ok = mock
            .send("agent@example.com", "to@example.com", "Hi", "body", None)
            .await
            .unwrap();
        assert_eq!(ok.provider_status, "sent");
    }
}
