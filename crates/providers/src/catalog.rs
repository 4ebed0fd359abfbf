//! Static catalog of known providers and their auth methods.

use cw_domain::wire::{AuthMethod, ProviderInfo};

use crate::traits::ProviderFamily;

/// Providers the server knows how to talk to.
pub fn provider_catalog() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            id: "openai".into(),
            label: "OpenAI".into(),
            auth_methods: vec![AuthMethod::ApiKey, AuthMethod::Oauth],
        },
        ProviderInfo {
            id: "anthropic".into(),
            label: "Anthropic".into(),
            auth_methods: vec![AuthMethod::ApiKey],
        },
        ProviderInfo {
            id: "google".into(),
            label: "Google Gemini".into(),
            auth_methods: vec![AuthMethod::ApiKey],
        },
    ]
}

/// Auth methods a given provider supports.
pub fn auth_methods(provider: &str) -> Vec<AuthMethod> {
    provider_catalog()
        .into_iter()
        .find(|p| p.id == provider)
        .map(|p| p.auth_methods)
        .unwrap_or_default()
}

/// Wire dialect for a provider id. Unknown providers are `Other`.
pub fn family_of(provider: &str) -> ProviderFamily {
    match provider {
        "openai" => ProviderFamily::OpenAi,
        "anthropic" => ProviderFamily::Anthropic,
        _ => ProviderFamily::Other,
    }
}
