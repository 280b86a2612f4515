use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use crate::soundcloud_rs::types::{OAuthSession, SoundCloudAuthResponse, SoundCloudTokenResponse};

pub const SOUNDCLOUD_AUTH_BASE: &str = "https://secure.soundcloud.com";

/// Generate a cryptographically secure random string for PKCE
fn generate_random_string(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

fn generate_code_verifier() -> String {
    generate_random_string(64)
}

/// PKCE code challenge, S256 method
fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

fn generate_state() -> String {
    generate_random_string(16)
}

/// Build the authorize URL and the PKCE session needed to finish the flow.
pub fn initiate_oauth(
    auth_base: &str,
    client_id: &str,
    redirect_uri: &str,
) -> (SoundCloudAuthResponse, OAuthSession) {
    let code_verifier = generate_code_verifier();
    let code_challenge = generate_code_challenge(&code_verifier);
    let state = generate_state();

    let auth_url = format!(
        "{}/authorize?client_id={}&redirect_uri={}&response_type=code&code_challenge={}&code_challenge_method=S256&state={}",
        auth_base.trim_end_matches('/'),
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&code_challenge),
        urlencoding::encode(&state),
    );

    let session = OAuthSession {
        code_verifier,
        state: state.clone(),
        created_at: chrono::Utc::now().timestamp(),
    };

    (SoundCloudAuthResponse { auth_url, state }, session)
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Invalid redirect url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Redirect url has no `{0}` parameter")]
    MissingParameter(&'static str),
    #[error("OAuth state mismatch")]
    StateMismatch,
}

/// Pull the authorization code out of the redirect URL, checking `state` against the session.
pub fn parse_callback(redirect_url: &str, session: &OAuthSession) -> Result<String, CallbackError> {
    let url = Url::parse(redirect_url.trim())?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.to_string())
    };

    let state = param("state").ok_or(CallbackError::MissingParameter("state"))?;
    if state != session.state {
        return Err(CallbackError::StateMismatch);
    }
    param("code").ok_or(CallbackError::MissingParameter("code"))
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeTokenError {
    #[error("Token endpoint rejected the request: {reason}")]
    Rejected { reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(reqwest::Error),
}

async fn post_token_form(
    auth_base: &str,
    params: &[(&str, &str)],
) -> Result<SoundCloudTokenResponse, ExchangeTokenError> {
    let response = reqwest::Client::new()
        .post(format!("{}/oauth/token", auth_base.trim_end_matches('/')))
        // serializes to x-www-form-urlencoded and sets the content type
        .form(params)
        .header("Accept", "application/json; charset=utf-8")
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(ExchangeTokenError::FailedToSendRequest)?;

    if !response.status().is_success() {
        return Err(ExchangeTokenError::Rejected {
            reason: response
                .text()
                .await
                .unwrap_or("Failed to get error text".to_string()),
        });
    }

    response
        .json()
        .await
        .map_err(ExchangeTokenError::FailedToParseResponse)
}

/// Exchange authorization code for access token
pub async fn exchange_code_for_token(
    auth_base: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<SoundCloudTokenResponse, ExchangeTokenError> {
    post_token_form(
        auth_base,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("code", code),
            ("code_verifier", code_verifier),
        ],
    )
    .await
}

/// Refresh an access token using a refresh token
pub async fn refresh_access_token(
    auth_base: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<SoundCloudTokenResponse, ExchangeTokenError> {
    post_token_form(
        auth_base,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
        ],
    )
    .await
}
