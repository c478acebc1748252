//! Provider adapters: one trait per transport with uniform verbs, each
//! with a mock variant used in demo mode and a thin live HTTP variant.
//! Adapters are constructed once at startup and injected into the
//! dispatcher — no global registry, mirroring how the teacher crate
//! constructs its `WhatsAppClient`/LLM `providers::router` once and
//! threads it through rather than reaching for ambient state.

pub mod email;
pub mod storage;
pub mod telephony;
pub mod tts;
pub mod whatsapp;

use async_trait::async_trait;

/// A provider-boundary failure. The `provider` name is surfaced to callers
/// (masked of any credential detail); the underlying cause is logged only.
#[derive(Debug, thiserror::Error)]
#[error("{provider} provider error: {detail}")]
pub struct ProviderError {
    pub provider: String,
    pub detail: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            detail: detail.into(),
        }
    }
}

/// Outcome of a successful provider send, common to SMS/WhatsApp/email.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub external_id: String,
    pub provider_status: String,
    pub cost: f64,
}

/// `telephony.sendSms` / `whatsapp.send` input.
#[derive(Debug, Clone, Default)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub template_id: Option<String>,
    pub template_vars: Option<serde_json::Value>,
    pub media_url: Option<String>,
}

/// Call-initiation outcome.
#[derive(Debug, Clone)]
pub struct CallReceipt {
    pub call_sid: String,
    pub status: String,
}

/// `telephony.buyNumber` outcome.
#[derive(Debug, Clone)]
pub struct PurchasedNumber {
    pub phone_number: String,
    pub provider_sid: String,
}

/// Telephony verbs (spec §2 item 2, §4.5 step 7, §4.7 step 1).
#[async_trait]
pub trait Telephony: Send + Sync {
    async fn send_sms(&self, req: &SendMessageRequest) -> Result<DispatchReceipt, ProviderError>;

    async fn make_call(
        &self,
        from: &str,
        to: &str,
        twiml_or_webhook: &str,
    ) -> Result<CallReceipt, ProviderError>;

    async fn buy_number(
        &self,
        country: &str,
        needs_voice: bool,
    ) -> Result<PurchasedNumber, ProviderError>;

    async fn release_number(&self, phone_number: &str) -> Result<(), ProviderError>;

    async fn configure_webhooks(&self, phone_number: &str, base_url: &str) -> Result<(), ProviderError>;

    /// Twilio: HMAC-SHA1 over URL + sorted form params, base64 comparison.
    fn verify_webhook_signature(&self, url: &str, params: &[(String, String)], signature: &str) -> bool;

    async fn transfer_call(&self, call_sid: &str, to: &str) -> Result<(), ProviderError>;
}

/// Email verbs.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
        html: Option<&str>,
    ) -> Result<DispatchReceipt, ProviderError>;

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;
}

/// WhatsApp verbs: templated + freeform send.
#[async_trait]
pub trait WhatsappProvider: Send + Sync {
    async fn send(&self, req: &SendMessageRequest) -> Result<DispatchReceipt, ProviderError>;
}

/// Text-to-speech synthesis.
#[async_trait]
pub trait Tts: Send + Sync {
    async fn synthesize(&self, voice_id: Option<&str>, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Blob storage: put bytes, get back a servable URL.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ProviderError>;
}

/// The full set of adapters the dispatcher depends on, constructed once at
/// startup (mock or live per `DEMO_MODE`) and shared behind `Arc`.
pub struct ProviderSet {
    pub telephony: Box<dyn Telephony>,
    pub email: Box<dyn EmailProvider>,
    pub whatsapp: Box<dyn WhatsappProvider>,
    pub tts: Box<dyn Tts>,
    pub storage: Box<dyn Storage>,
}

impl ProviderSet {
    /// Build the mock variant of every adapter, used in demo mode.
    pub fn mock() -> Self {
        Self {
            telephony: Box::new(telephony::MockTelephony::default()),
            email: Box::new(email::MockEmail::default()),
            whatsapp: Box::new(whatsapp::MockWhatsapp::default()),
            tts: Box::new(tts::MockTts::default()),
            storage: Box::new(storage::MockStorage::default()),
        }
    }
}
