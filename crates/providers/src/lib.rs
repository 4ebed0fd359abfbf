//! Provider access for the coworker runtime.
//!
//! A provider is a black box producing a typed raw-event stream; this
//! crate defines that contract ([`ProviderStream`]), the normalization
//! of raw events into the canonical `StreamPart` vocabulary, credential
//! resolution (API keys and refreshable OAuth tokens), and telemetry
//! redaction.

pub mod catalog;
pub mod credentials;
pub mod normalize;
pub mod openai;
pub mod raw;
pub mod redact;
pub mod sse;
pub mod traits;

pub use credentials::{CredentialMaterial, CredentialResolver, CredentialStore};
pub use normalize::{Normalizer, StepOutcome, StreamFailure};
pub use raw::RawProviderEvent;
pub use traits::{BoxStream, ProviderFamily, ProviderStream, StreamRequest, ToolSpec};
