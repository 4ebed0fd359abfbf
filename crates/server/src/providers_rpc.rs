//! Provider catalog / auth / status RPCs.

use cw_domain::error::{Error, Result};
use cw_domain::wire::{AuthMethod, ProviderStatusEntry, ServerEvent};
use cw_providers::catalog;
use cw_providers::credentials::{needs_refresh, CredentialDocument, CredentialResolver};

pub fn catalog_event() -> ServerEvent {
    ServerEvent::ProviderCatalog { providers: catalog::provider_catalog() }
}

pub fn auth_methods_event(provider: &str) -> ServerEvent {
    ServerEvent::ProviderAuthMethods {
        provider: provider.to_owned(),
        methods: catalog::auth_methods(provider),
    }
}

/// Report, per catalog provider, whether stored credentials would
/// resolve right now. Never triggers a refresh.
pub fn status_event(resolver: &CredentialResolver) -> ServerEvent {
    let now = chrono::Utc::now().timestamp_millis();
    let statuses = catalog::provider_catalog()
        .into_iter()
        .map(|info| {
            let doc = resolver.store().load(&info.id).ok().flatten();
            let connected = doc.as_ref().is_some_and(|d| {
                !needs_refresh(d, now) || d.tokens.refresh_token.is_some()
            });
            let account = doc.and_then(|d| d.account);
            ProviderStatusEntry {
                provider: info.id,
                connected,
                account_email: account.as_ref().and_then(|a| a.email.clone()),
                plan: account.as_ref().and_then(|a| a.plan_type.clone()),
            }
        })
        .collect();
    ServerEvent::ProviderStatus { statuses }
}

/// Handle `connect_provider`.
///
/// An API key is stored immediately. The OAuth flow needs a browser
/// round-trip the message transport cannot host, so it is directed to
/// the CLI login path.
pub fn connect_provider(
    resolver: &CredentialResolver,
    provider: &str,
    api_key: Option<String>,
    auth_flow: Option<AuthMethod>,
) -> Result<ServerEvent> {
    let methods = catalog::auth_methods(provider);
    if methods.is_empty() {
        return Err(Error::Validation(format!("unknown provider: {provider}")));
    }

    match (api_key, auth_flow) {
        (Some(key), _) => {
            if !methods.contains(&AuthMethod::ApiKey) {
                return Err(Error::Validation(format!(
                    "{provider} does not accept API keys"
                )));
            }
            resolver.store().save(provider, &CredentialDocument::api_key(key))?;
            Ok(status_event(resolver))
        }
        (None, Some(AuthMethod::Oauth)) => Err(Error::Validation(format!(
            "OAuth connect for {provider} runs out-of-band; authenticate with the CLI login flow"
        ))),
        _ => Err(Error::Validation("connect_provider requires api_key or auth_flow".into())),
    }
}
