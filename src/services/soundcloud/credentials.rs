use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use color_eyre::eyre::{OptionExt, Result, WrapErr, eyre};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::ports::credentials::CredentialProvider;
use crate::soundcloud_rs::auth::{
    ExchangeTokenError, exchange_code_for_token, initiate_oauth, parse_callback,
    refresh_access_token,
};
use crate::soundcloud_rs::types::{OAuthSession, SoundCloudAuthResponse, SoundCloudTokenResponse};

/// Tokens are treated as expired this long before the server would reject them.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_base: String,
}

/// Token set persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredTokens {
    fn from_response(
        response: SoundCloudTokenResponse,
        previous_refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh_token),
            expires_at: response
                .expires_in
                .map(|secs| now + Duration::seconds(secs as i64)),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) <= now)
    }
}

/// OAuth 2.1 + PKCE credential store backed by a JSON file.
pub struct OAuthCredentials {
    settings: OAuthSettings,
    token_path: PathBuf,
    tokens: Mutex<Option<StoredTokens>>,
    login_required: AtomicBool,
}

impl OAuthCredentials {
    /// Load any previously stored tokens. A missing file just means nobody logged in yet.
    pub async fn load(settings: OAuthSettings, token_path: impl Into<PathBuf>) -> Result<Self> {
        let token_path = token_path.into();
        let tokens = read_tokens(&token_path).await?;
        let login_required = tokens.is_none();

        Ok(Self {
            settings,
            token_path,
            tokens: Mutex::new(tokens),
            login_required: AtomicBool::new(login_required),
        })
    }

    pub fn begin_login(&self) -> (SoundCloudAuthResponse, OAuthSession) {
        initiate_oauth(
            &self.settings.auth_base,
            &self.settings.client_id,
            &self.settings.redirect_uri,
        )
    }

    /// Finish the login from the URL the browser was redirected to.
    #[instrument(skip_all)]
    pub async fn complete_login(&self, redirect_url: &str, session: &OAuthSession) -> Result<()> {
        let code = parse_callback(redirect_url, session)?;
        let response = exchange_code_for_token(
            &self.settings.auth_base,
            &self.settings.client_id,
            &self.settings.client_secret,
            &code,
            &self.settings.redirect_uri,
            &session.code_verifier,
        )
        .await
        .wrap_err("Failed to exchange authorization code")?;

        let tokens = StoredTokens::from_response(response, None, Utc::now());
        let mut guard = self.tokens.lock().await;
        self.persist(&tokens).await?;
        *guard = Some(tokens);
        self.login_required.store(false, Ordering::SeqCst);

        tracing::info!(path = %self.token_path.display(), "Stored SoundCloud tokens");
        Ok(())
    }

    async fn persist(&self, tokens: &StoredTokens) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(tokens)?;
        tokio::fs::write(&self.token_path, json)
            .await
            .wrap_err_with(|| format!("Failed to write {}", self.token_path.display()))
    }

    /// Refresh while holding the token lock. `Ok(false)` means the user has to log in again.
    async fn refresh_locked(&self, slot: &mut Option<StoredTokens>) -> Result<bool> {
        let Some(refresh_token) = slot.as_ref().and_then(|t| t.refresh_token.clone()) else {
            self.mark_login_required();
            return Ok(false);
        };

        let response = match refresh_access_token(
            &self.settings.auth_base,
            &self.settings.client_id,
            &self.settings.client_secret,
            &refresh_token,
        )
        .await
        {
            Ok(response) => response,
            Err(ExchangeTokenError::Rejected { reason }) => {
                tracing::warn!(reason = %reason, "Refresh token rejected");
                self.mark_login_required();
                return Ok(false);
            }
            Err(e) => return Err(e).wrap_err("Failed to refresh access token"),
        };

        let tokens = StoredTokens::from_response(response, Some(refresh_token), Utc::now());
        self.persist(&tokens).await?;
        *slot = Some(tokens);
        self.login_required.store(false, Ordering::SeqCst);
        tracing::debug!("Refreshed SoundCloud access token");
        Ok(true)
    }
}

async fn read_tokens(path: &Path) -> Result<Option<StoredTokens>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    let tokens = serde_json::from_str(&contents)
        .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(tokens))
}

#[async_trait::async_trait]
impl CredentialProvider for OAuthCredentials {
    async fn current_access_token(&self) -> Result<String> {
        let mut guard = self.tokens.lock().await;

        if guard.as_ref().is_some_and(|t| t.is_expired(Utc::now()))
            && !self.refresh_locked(&mut guard).await?
        {
            return Err(eyre!("SoundCloud session expired, run `playlist-mirror login`"));
        }

        guard
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_eyre("Not logged in to SoundCloud, run `playlist-mirror login`")
    }

    async fn refresh(&self) -> Result<bool> {
        let mut guard = self.tokens.lock().await;
        self.refresh_locked(&mut guard).await
    }

    fn mark_login_required(&self) {
        if !self.login_required.swap(true, Ordering::SeqCst) {
            tracing::warn!("SoundCloud login required");
        }
    }

    fn login_required(&self) -> bool {
        self.login_required.load(Ordering::SeqCst)
    }
}
