//! WhatsApp adapter: templated + freeform send, mirroring the teacher's
//! sidecar HTTP client (`src/whatsapp/client.rs`) but against the Twilio
//! WhatsApp Business API's message endpoint rather than a local bridge.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{DispatchReceipt, ProviderError, SendMessageRequest, WhatsappProvider};

const WHATSAPP_COST: f64 = 0.005;

#[derive(Default)]
pub struct MockWhatsapp {
    next_id: AtomicU64,
}

#[async_trait]
impl WhatsappProvider for MockWhatsapp {
    async fn send(&self, req: &SendMessageRequest) -> Result<DispatchReceipt, ProviderError> {
        if req.body.is_none() && req.template_id.is_none() {
            return Err(ProviderError::new("whatsapp", "body or templateId required"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchReceipt {
            external_id: format!("wa-{n:08x}"),
            provider_status: "sent".to_owned(),
            cost: WHATSAPP_COST,
        })
    }
}

pub struct LiveWhatsapp {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
}

impl LiveWhatsapp {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
        }
    }
}

#[async_trait]
impl WhatsappProvider for LiveWhatsapp {
    async fn send(&self, req: &SendMessageRequest) -> Result<DispatchReceipt, ProviderError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let from = format!("whatsapp:{}", req.from);
        let to = format!("whatsapp:{}", req.to);
        let mut form = vec![("From", from), ("To", to)];
        if let Some(body) = &req.body {
            form.push(("Body", body.clone()));
        }
        if let Some(media) = &req.media_url {
            form.push(("MediaUrl", media.clone()));
        }
        let resp = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::new("whatsapp", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("whatsapp", format!("HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("whatsapp", e.to_string()))?;
        Ok(DispatchReceipt {
            external_id: body["sid"].as_str().unwrap_or_default().to_owned(),
            provider_status: body["status"].as_str().unwrap_or("queued").to_owned(),
            cost: WHATSAPP_COST,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_requires_body_or_template() {
        let mock = MockWhatsapp::default();
        let req = SendMessageRequest {
            from: "+15551230000".to_owned(),
            to: "+15551239999".to_owned(),
            ..Default::default()
        };
        assert!(mock.send(&req).await.is_err());
    }
}
