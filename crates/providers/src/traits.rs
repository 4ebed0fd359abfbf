use std::pin::Pin;

use cw_domain::error::Result;
use cw_domain::message::Message;

use crate::credentials::CredentialMaterial;
use crate::raw::RawProviderEvent;

/// A boxed async stream, used for provider event streams.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool definition as exposed to the model.
///
/// `input_schema` is the JSON-schema serialization of the dispatcher's
/// validator capability.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// One model-stream invocation.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// Provider-specific knobs, merged by the `prepare_step` hook.
    pub provider_options: serde_json::Value,
}

/// Which wire dialect a provider speaks. Decides the reasoning mode
/// used during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Other,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every provider adapter implements.
///
/// The concrete HTTP transport is the adapter's business; the runtime
/// only sees the raw-event stream and normalizes it.
#[async_trait::async_trait]
pub trait ProviderStream: Send + Sync {
    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;

    /// The wire dialect, used to pick the reasoning mode.
    fn family(&self) -> ProviderFamily;

    /// Open one model stream for a step.
    async fn stream(
        &self,
        req: StreamRequest,
        credentials: &CredentialMaterial,
    ) -> Result<BoxStream<'static, Result<RawProviderEvent>>>;
}
