//! OAuth state machine: PKCE authorization-code grant, refresh grant, and
//! the long-lived-token variant, all against Anthropic's Claude Max OAuth
//! endpoints.
//!
//! The token endpoint takes a JSON body, not form-urlencoded, and the
//! authorize URL carries a non-standard `code=true` parameter with
//! `state` set equal to the PKCE verifier.

use crate::storage::{PkceRecord, TokenRecord, TokenStore, TokenType};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

pub mod endpoints {
    pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
    pub const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
    pub const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
    pub const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
    pub const SCOPES_BROAD: &str = "org:create_api_key user:profile user:inference";
    pub const SCOPES_LONG_LIVED: &str = "user:inference";
}

const ONE_YEAR_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeProfile {
    /// The ordinary, broadly-scoped profile used for everyday ephemeral
    /// tokens.
    Broad,
    /// `user:profile`/`org:create_api_key` don't permit a custom expiry, so
    /// minting a long-lived token requires this minimal single-scope
    /// profile instead.
    LongLived,
}

impl ScopeProfile {
    fn scope(self) -> &'static str {
        match self {
            ScopeProfile::Broad => endpoints::SCOPES_BROAD,
            ScopeProfile::LongLived => endpoints::SCOPES_LONG_LIVED,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated; run login first")]
    Unauthenticated,
    #[error("long-lived token has expired; generate a new one")]
    ReauthenticationRequired,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("no pending login to exchange a code against")]
    NoPendingLogin,
}

fn generate_pkce() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::Fill::fill(&mut bytes, &mut rand::rng()).expect("rng fill");
    let verifier = URL_SAFE_NO_PAD.encode(bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

/// Split a `<code>#<state>` callback value. A plain code with no `#` is
/// accepted too, with no state component.
fn split_code_and_state(input: &str) -> (&str, Option<&str>) {
    match input.split_once('#') {
        Some((code, state)) => (code, Some(state)),
        None => (input, None),
    }
}

#[derive(Serialize)]
struct TokenExchangeBody<'a> {
    code: &'a str,
    state: &'a str,
    grant_type: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<i64>,
}

#[derive(Serialize)]
struct TokenRefreshBody<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

pub struct OAuthManager {
    client: reqwest::Client,
    store: TokenStore,
    /// Held by whichever caller is actually performing a refresh; other
    /// callers block on it and then observe the refreshed token via the
    /// double-check in `obtain_valid_token`, rather than issuing their own
    /// request. This is the single-flight guarantee.
    refresh_lock: Mutex<()>,
    token_url: String,
    authorize_url: String,
}

impl OAuthManager {
    pub fn new(store: TokenStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
            refresh_lock: Mutex::new(()),
            token_url: endpoints::TOKEN_URL.to_string(),
            authorize_url: endpoints::AUTHORIZE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_urls(store: TokenStore, authorize_url: String, token_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            store,
            refresh_lock: Mutex::new(()),
            token_url,
            authorize_url,
        }
    }

    pub fn build_authorize_url(&self, profile: ScopeProfile) -> anyhow::Result<String> {
        let (verifier, challenge) = generate_pkce();
        crate::storage::save_pkce(&PkceRecord {
            verifier: verifier.clone(),
            state: verifier.clone(),
        })?;

        let url = format!(
            "{}?code=true&client_id={}&response_type=code&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
            self.authorize_url,
            endpoints::CLIENT_ID,
            urlencoding::encode(endpoints::REDIRECT_URI),
            urlencoding::encode(profile.scope()),
            challenge,
            verifier,
        );
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        input: &str,
        profile: ScopeProfile,
    ) -> Result<TokenRecord, AuthError> {
        let pkce = crate::storage::load_pkce().map_err(|_| AuthError::NoPendingLogin)?;
        let (code, state_from_input) = split_code_and_state(input);
        let state = state_from_input.unwrap_or(&pkce.state);

        let expires_in = match profile {
            ScopeProfile::LongLived => Some(ONE_YEAR_SECS),
            ScopeProfile::Broad => None,
        };

        let body = TokenExchangeBody {
            code,
            state,
            grant_type: "authorization_code",
            client_id: endpoints::CLIENT_ID,
            redirect_uri: endpoints::REDIRECT_URI,
            code_verifier: &pkce.verifier,
            expires_in,
        };

        let resp = self
            .client
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::ExchangeFailed(text));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        crate::storage::clear_pkce();

        let record = match profile {
            ScopeProfile::LongLived => TokenRecord {
                access_token: parsed.access_token,
                refresh_token: None,
                expires_at_ms: chrono::Utc::now().timestamp_millis()
                    + parsed.expires_in * 1000,
                token_type: TokenType::LongLived,
            },
            ScopeProfile::Broad => TokenRecord {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token,
                expires_at_ms: chrono::Utc::now().timestamp_millis()
                    + parsed.expires_in * 1000,
                token_type: TokenType::Ephemeral,
            },
        };

        self.store
            .replace(record.clone())
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        Ok(record)
    }

    /// Unconditionally attempt a refresh using the currently stored refresh
    /// token. Long-lived tokens have none and cannot be refreshed.
    pub async fn refresh(&self) -> Result<TokenRecord, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.do_refresh().await
    }

    async fn do_refresh(&self) -> Result<TokenRecord, AuthError> {
        let current = self.store.current().await.ok_or(AuthError::Unauthenticated)?;
        if current.token_type == TokenType::LongLived {
            return Err(AuthError::ReauthenticationRequired);
        }
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(AuthError::Unauthenticated)?;

        let body = TokenRefreshBody {
            grant_type: "refresh_token",
            refresh_token,
            client_id: endpoints::CLIENT_ID,
        };

        let resp = self
            .client
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed(text));
        }

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let record = TokenRecord {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.or(current.refresh_token),
            expires_at_ms: chrono::Utc::now().timestamp_millis() + parsed.expires_in * 1000,
            token_type: TokenType::Ephemeral,
        };

        self.store
            .replace(record.clone())
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        Ok(record)
    }

    /// Returns a currently-valid access token, refreshing at most once even
    /// under concurrent callers, and failing closed for an expired
    /// long-lived token rather than attempting a refresh it cannot do.
    pub async fn obtain_valid_token(&self) -> Result<String, AuthError> {
        let current = self.store.current().await.ok_or(AuthError::Unauthenticated)?;

        if !current.is_expired() {
            return Ok(current.access_token);
        }

        if current.token_type == TokenType::LongLived {
            return Err(AuthError::ReauthenticationRequired);
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have refreshed while we waited for the lock.
        if let Some(rec) = self.store.current().await {
            if !rec.is_expired() {
                return Ok(rec.access_token);
            }
        }
        Ok(self.do_refresh().await?.access_token)
    }

    pub async fn status(&self) -> AuthStatus {
        match self.store.current().await {
            None => AuthStatus {
                authenticated: false,
                token_type: None,
                expires_at_ms: None,
                expired: None,
            },
            Some(rec) => AuthStatus {
                authenticated: true,
                token_type: Some(rec.token_type),
                expires_at_ms: Some(rec.expires_at_ms),
                expired: Some(rec.is_expired()),
            },
        }
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        self.store.clear().await
    }
}

/// What `/auth/status` reveals: presence, expiry, and type. Never the token
/// itself.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub token_type: Option<TokenType>,
    pub expires_at_ms: Option<i64>,
    pub expired: Option<bool>,
}
