//! Credential resolution for provider access.
//!
//! Each provider has one JSON credential document on disk. API-key
//! providers store the key directly; OAuth providers store a refreshable
//! token set. Refresh is single-flight per `(provider, account)`:
//! concurrent turns that hit an expiring token coalesce onto one network
//! refresh and share the result.
//!
//! Files are owner-only (`0o600`, directory `0o700`) and written
//! atomically (temp + rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use cw_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Refresh when less than this remains before expiry.
pub const REFRESH_SKEW_MS: i64 = 60_000;

/// Network timeout for a token refresh call.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// On-disk document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Chatgpt,
    ApiKey,
}

/// Stored token set. `Debug` is manually implemented to redact secrets.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Unix milliseconds when the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
}

/// The per-provider credential document (`<dir>/<provider>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDocument {
    pub version: u32,
    pub auth_mode: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub tokens: StoredTokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountInfo>,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<String>,
}

impl CredentialDocument {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            version: 1,
            auth_mode: AuthMode::ApiKey,
            issuer: None,
            client_id: None,
            tokens: StoredTokens {
                access_token: key.into(),
                refresh_token: None,
                id_token: None,
                expires_at: None,
            },
            account: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
            last_refresh: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolved material
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a provider adapter needs to authenticate a request.
#[derive(Clone)]
pub struct CredentialMaterial {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub extra_headers: HashMap<String, String>,
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at_ms", &self.expires_at_ms)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed store of per-provider credential documents.
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, provider: &str) -> PathBuf {
        self.dir.join(format!("{provider}.json"))
    }

    pub fn load(&self, provider: &str) -> Result<Option<CredentialDocument>> {
        let path = self.path(provider);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let doc = serde_json::from_str(&raw)
            .map_err(|e| Error::Credentials(format!("corrupt credential file for {provider}: {e}")))?;
        Ok(Some(doc))
    }

    /// Atomic write: temp file in the same directory, then rename.
    pub fn save(&self, provider: &str, doc: &CredentialDocument) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        restrict_dir(&self.dir)?;

        let json = serde_json::to_string_pretty(doc)?;
        let path = self.path(provider);
        let tmp = self.dir.join(format!(".{provider}.json.tmp"));

        write_owner_only(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn delete(&self, provider: &str) -> Result<bool> {
        let path = self.path(provider);
        if path.exists() {
            std::fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Refresh transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tokens returned by a refresh call.
#[derive(Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Seconds until the new access token expires.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// The network side of a token refresh, injected so tests can count calls.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        issuer: &str,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<RefreshedTokens>;
}

/// Real refresher: `POST {issuer}/oauth/token` with a 30s timeout.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
}

impl HttpTokenRefresher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REFRESH_TIMEOUT)
            .build()
            .map_err(|e| Error::Credentials(format!("creating HTTP client for refresh: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        issuer: &str,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<RefreshedTokens> {
        let url = format!("{issuer}/oauth/token");
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
            ])
            .send()
            .await
            .map_err(|e| Error::Credentials(format!("token refresh request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Credentials(format!("reading refresh response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Credentials(format!(
                "token refresh returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Credentials(format!("parsing refresh response: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolves `(provider) → CredentialMaterial` valid for use now,
/// refreshing expiring OAuth tokens under a single-flight guard.
pub struct CredentialResolver {
    store: CredentialStore,
    refresher: Arc<dyn TokenRefresher>,
    /// One gate per `(provider, account_id)`; concurrent refreshers
    /// serialize here and the losers find a fresh token on re-read.
    refresh_gates: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialResolver {
    pub fn new(store: CredentialStore, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_gates: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Resolve credentials for a provider, refreshing if within skew.
    ///
    /// An in-flight refresh is never cancelled by a turn abort: other
    /// callers share its outcome, so the caller observes the abort only
    /// after the refresh settles.
    pub async fn resolve(&self, provider: &str) -> Result<CredentialMaterial> {
        let doc = self.store.load(provider)?.ok_or_else(|| missing(provider))?;

        match doc.auth_mode {
            AuthMode::ApiKey => Ok(material_from(&doc)),
            AuthMode::Chatgpt => {
                let now = chrono::Utc::now().timestamp_millis();
                if !needs_refresh(&doc, now) {
                    return Ok(material_from(&doc));
                }
                self.refresh_single_flight(provider, &doc).await
            }
        }
    }

    async fn refresh_single_flight(
        &self,
        provider: &str,
        doc: &CredentialDocument,
    ) -> Result<CredentialMaterial> {
        if doc.tokens.refresh_token.is_none() {
            return Err(missing(provider));
        }

        let account = doc
            .account
            .as_ref()
            .and_then(|a| a.account_id.clone())
            .unwrap_or_else(|| "default".into());
        let gate = {
            let mut gates = self.refresh_gates.lock();
            gates
                .entry(format!("{provider}/{account}"))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // A coalesced refresh may have landed while we waited.
        let doc = self.store.load(provider)?.ok_or_else(|| missing(provider))?;
        let now = chrono::Utc::now().timestamp_millis();
        if !needs_refresh(&doc, now) {
            return Ok(material_from(&doc));
        }

        let refresh_token = doc.tokens.refresh_token.clone().ok_or_else(|| missing(provider))?;
        let issuer = doc.issuer.clone().ok_or_else(|| {
            Error::Credentials(format!("no issuer recorded for {provider}; reconnect the provider"))
        })?;
        let client_id = doc.client_id.clone().unwrap_or_default();

        tracing::info!(provider, "access token near expiry, refreshing");
        let refreshed = self.refresher.refresh(&issuer, &client_id, &refresh_token).await?;

        let now = chrono::Utc::now();
        let expires_at = refreshed
            .expires_in
            .map(|secs| now.timestamp_millis() + (secs.min(86_400 * 365) * 1000) as i64);

        let claim_token = refreshed.id_token.as_deref().unwrap_or(&refreshed.access_token);
        let account = decode_claims(claim_token).or(doc.account.clone());

        let updated = CredentialDocument {
            version: doc.version,
            auth_mode: doc.auth_mode,
            issuer: doc.issuer.clone(),
            client_id: doc.client_id.clone(),
            tokens: StoredTokens {
                access_token: refreshed.access_token.clone(),
                refresh_token: refreshed.refresh_token.clone().or(Some(refresh_token)),
                id_token: refreshed.id_token.clone().or(doc.tokens.id_token.clone()),
                expires_at,
            },
            account,
            updated_at: now.to_rfc3339(),
            last_refresh: Some(now.to_rfc3339()),
        };

        if let Err(e) = self.store.save(provider, &updated) {
            tracing::warn!(error = %e, "failed to persist refreshed token — using in-memory token");
        }

        Ok(material_from(&updated))
    }
}

fn missing(provider: &str) -> Error {
    Error::Credentials(format!(
        "no usable credentials for {provider} — connect the provider to authenticate"
    ))
}

/// True when the token expires within the skew window (or already has).
pub fn needs_refresh(doc: &CredentialDocument, now_ms: i64) -> bool {
    match doc.tokens.expires_at {
        Some(expires_at) => expires_at - now_ms <= REFRESH_SKEW_MS,
        None => false,
    }
}

fn material_from(doc: &CredentialDocument) -> CredentialMaterial {
    let mut extra_headers = HashMap::new();
    if doc.auth_mode == AuthMode::Chatgpt {
        if let Some(id) = doc.account.as_ref().and_then(|a| a.account_id.as_deref()) {
            extra_headers.insert("chatgpt-account-id".into(), id.to_owned());
        }
    }
    CredentialMaterial {
        access_token: doc.tokens.access_token.clone(),
        refresh_token: doc.tokens.refresh_token.clone(),
        expires_at_ms: doc.tokens.expires_at,
        extra_headers,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Claims
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Best-effort decode of account claims from a JWT payload.
///
/// Decoding failure is non-fatal: the unknown fields stay `None`.
pub fn decode_claims(token: &str) -> Option<AccountInfo> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    let auth = claims.get("https://api.openai.com/auth");
    let account_id = auth
        .and_then(|a| a.get("chatgpt_account_id"))
        .or_else(|| claims.get("account_id"))
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let plan_type = auth
        .and_then(|a| a.get("chatgpt_plan_type"))
        .or_else(|| claims.get("plan_type"))
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let email = claims.get("email").and_then(|v| v.as_str()).map(str::to_owned);

    if account_id.is_none() && plan_type.is_none() && email.is_none() {
        return None;
    }
    Some(AccountInfo { account_id, email, plan_type })
}
