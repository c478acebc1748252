//! Telephony adapter: mock variant for demo mode, live Twilio-shaped
//! variant for production. The live client mirrors the teacher's sidecar
//! client pattern (`src/whatsapp/client.rs`): one `reqwest::Client` built
//! once with explicit timeouts, thin wrapper methods, errors mapped to a
//! single typed enum at the boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tokio::sync::Mutex;

use super::{CallReceipt, DispatchReceipt, ProviderError, PurchasedNumber, SendMessageRequest, Telephony};

const CONNECT_TIMEOUT_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const SMS_COST: f64 = 0.0075;

/// In-memory telephony mock. Deterministic, never touches the network.
/// Kept as a real `Telephony` implementation (not a `#[cfg(test)]` stub)
/// so both demo mode and integration tests exercise the same trait object
/// the live adapter implements.
#[derive(Default)]
pub struct MockTelephony {
    next_sid: AtomicU64,
    fail_buy_number: std::sync::atomic::AtomicBool,
}

impl MockTelephony {
    fn sid(&self, prefix: &str) -> String {
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}{n:08x}")
    }

    /// Test hook (spec scenario S4): make the next `buy_number` call fail
    /// after a successful search, to exercise provisioning rollback.
    pub fn set_fail_buy_number(&self, fail: bool) {
        self.fail_buy_number.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Telephony for MockTelephony {
    async fn send_sms(&self, req: &SendMessageRequest) -> Result<DispatchReceipt, ProviderError> {
        if req.to.is_empty() {
            return Err(ProviderError::new("telephony", "missing destination"));
        }
        Ok(DispatchReceipt {
            external_id: self.sid("SM"),
            provider_status: "queued".to_owned(),
            cost: SMS_COST,
        })
    }

    async fn make_call(
        &self,
        _from: &str,
        _to: &str,
        _twiml_or_webhook: &str,
    ) -> Result<CallReceipt, ProviderError> {
        Ok(CallReceipt {
            call_sid: self.sid("CA"),
            status: "ringing".to_owned(),
        })
    }

    async fn buy_number(
        &self,
        country: &str,
        _needs_voice: bool,
    ) -> Result<PurchasedNumber, ProviderError> {
        if self.fail_buy_number.load(Ordering::SeqCst) {
            return Err(ProviderError::new("telephony", "buyNumber failed"));
        }
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst);
        Ok(PurchasedNumber {
            phone_number: format!("+1555{n:07}"),
            provider_sid: format!("PN{country}{n:08x}"),
        })
    }

    async fn release_number(&self, _phone_number: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn configure_webhooks(&self, _phone_number: &str, _base_url: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn verify_webhook_signature(&self, _url: &str, _params: &[(String, String)], _signature: &str) -> bool {
        true
    }

    async fn transfer_call(&self, _call_sid: &str, _to: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Twilio-shaped live adapter.
pub struct LiveTelephony {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    webhook_base_url: String,
    number_search_lock: Mutex<()>,
}

impl LiveTelephony {
    pub fn new(account_sid: String, auth_token: String, webhook_base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            account_sid,
            auth_token,
            webhook_base_url,
            number_search_lock: Mutex::new(()),
        }
    }

    fn base(&self) -> String {
        format!("https://api.twilio.com/2010-04-01/Accounts/{}", self.account_sid)
    }
}

#[async_trait]
impl Telephony for LiveTelephony {
    async fn send_sms(&self, req: &SendMessageRequest) -> Result<DispatchReceipt, ProviderError> {
        let url = format!("{}/Messages.json", self.base());
        let mut form = vec![("From", req.from.clone()), ("To", req.to.clone())];
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
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("telephony", format!("HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        Ok(DispatchReceipt {
            external_id: body["sid"].as_str().unwrap_or_default().to_owned(),
            provider_status: body["status"].as_str().unwrap_or("queued").to_owned(),
            cost: SMS_COST,
        })
    }

    async fn make_call(
        &self,
        from: &str,
        to: &str,
        twiml_or_webhook: &str,
    ) -> Result<CallReceipt, ProviderError> {
        let url = format!("{}/Calls.json", self.base());
        let form = [("From", from), ("To", to), ("Url", twiml_or_webhook)];
        let resp = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("telephony", format!("HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        Ok(CallReceipt {
            call_sid: body["sid"].as_str().unwrap_or_default().to_owned(),
            status: body["status"].as_str().unwrap_or("queued").to_owned(),
        })
    }

    async fn buy_number(&self, country: &str, needs_voice: bool) -> Result<PurchasedNumber, ProviderError> {
        let _guard = self.number_search_lock.lock().await;
        let search_url = format!(
            "{}/AvailablePhoneNumbers/{}/Local.json?VoiceEnabled={}",
            self.base(),
            country,
            needs_voice
        );
        let resp = self
            .client
            .get(search_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        let candidate = body["available_phone_numbers"]
            .get(0)
            .and_then(|n| n["phone_number"].as_str())
            .ok_or_else(|| ProviderError::new("telephony", "no numbers available"))?
            .to_owned();

        let buy_url = format!("{}/IncomingPhoneNumbers.json", self.base());
        let resp = self
            .client
            .post(buy_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("PhoneNumber", candidate.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::new("telephony", format!("HTTP {}", resp.status())));
        }
        let bought: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        Ok(PurchasedNumber {
            phone_number: candidate,
            provider_sid: bought["sid"].as_str().unwrap_or_default().to_owned(),
        })
    }

    async fn release_number(&self, phone_number: &str) -> Result<(), ProviderError> {
        let url = format!("{}/IncomingPhoneNumbers/{}.json", self.base(), phone_number);
        self.client
            .delete(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        Ok(())
    }

    async fn configure_webhooks(&self, phone_number: &str, base_url: &str) -> Result<(), ProviderError> {
        let url = format!("{}/IncomingPhoneNumbers/{}.json", self.base(), phone_number);
        let sms_url = format!("{base_url}/webhooks/sms");
        let voice_url = format!("{base_url}/webhooks/voice");
        self.client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("SmsUrl", sms_url.as_str()), ("VoiceUrl", voice_url.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        Ok(())
    }

    fn verify_webhook_signature(&self, url: &str, params: &[(String, String)], signature: &str) -> bool {
        let mut sorted = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut data = url.to_owned();
        for (k, v) in &sorted {
            data.push_str(k);
            data.push_str(v);
        }
        let mut mac = match Hmac::<Sha1>::new_from_slice(self.auth_token.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(data.as_bytes());
        let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    async fn transfer_call(&self, call_sid: &str, to: &str) -> Result<(), ProviderError> {
        let url = format!("{}/Calls/{}.json", self.base(), call_sid);
        let twiml = format!("<Response><Dial>{to}</Dial></Response>");
        self.client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", twiml.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::new("telephony", e.to_string()))?;
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_send_sms_assigns_incrementing_sids() {
        let mock = MockTelephony::default();
        let req = SendMessageRequest {
            from: "+15551230000".to_owned(),
            to: "+15551239999".to_owned(),
            body: Some("hi".to_owned()),
            ..Default::default()
        };
        let a = mock.send_sms(&req).await.unwrap();
        let b = mock.send_sms(&req).await.unwrap();
        assert_ne!(a.external_id, b.external_id);
    }

    #[tokio::test]
    async fn mock_buy_number_can_be_forced_to_fail() {
        let mock = MockTelephony::default();
        mock.set_fail_buy_number(true);
        assert!(mock.buy_number("US", true).await.is_err());
    }
}
