/*
    spotify-curator | Rust CLI tool to review playlists and prune unwanted tracks.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::models::Credential;
use crate::pkce::{self, PkceError, VERIFIER_LENGTH};
use crate::store::{SessionStore, StoreError};
use async_trait::async_trait;
use log::{debug, info, warn};
use rspotify::{Credentials, OAuth};
use serde::Deserialize;
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

const VERIFIER_KEY: &str = "code_verifier";
const STATE_KEY: &str = "auth_state";
const TOKEN_KEY: &str = "access_token";
const OBTAINED_AT_KEY: &str = "token_obtained_at";
const EXPIRES_IN_KEY: &str = "token_expires_in";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid client configuration: {0}")]
    ClientConfig(String),
    #[error("No login in progress for this callback; start the login again")]
    NoPendingAuth,
    #[error("Token exchange failed (HTTP {status}): {payload}")]
    AuthExchangeFailed { status: u16, payload: String },
    #[error("Authorization was denied by the provider: {0}")]
    AuthorizationDenied(String),
    #[error("Callback carries an implicit-flow token; only the PKCE code flow is supported")]
    ImplicitFlowUnsupported,
    #[error("Not a valid callback URL: {0}")]
    InvalidCallback(String),
    #[error("Network error during token exchange: {0}")]
    Network(String),
    #[error(transparent)]
    Pkce(#[from] PkceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Client identity and endpoints for the authorization handshake.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
}

impl AuthConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: default_scopes(),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Reads `RSPOTIFY_CLIENT_ID` and `RSPOTIFY_REDIRECT_URI` from the environment.
    ///
    /// No client secret is needed: the PKCE verifier takes its place.
    pub fn from_env() -> Result<Self, AuthError> {
        let creds = Credentials::from_env()
            .ok_or_else(|| AuthError::ClientConfig("Missing RSPOTIFY_CLIENT_ID".to_string()))?;

        let oauth = OAuth::from_env(default_scopes().into_iter().collect()).ok_or_else(|| {
            AuthError::ClientConfig("Missing RSPOTIFY_REDIRECT_URI".to_string())
        })?;

        Ok(Self::new(creds.id, oauth.redirect_uri))
    }
}

// Reading and removing tracks from playlists (public and private) and Liked Songs.
fn default_scopes() -> Vec<String> {
    [
        "playlist-read-private",
        "playlist-modify-private",
        "playlist-modify-public",
        "user-library-read",
        "user-library-modify",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Values needed to finish an in-flight authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuth {
    pub verifier: String,
    pub state: String,
}

/// Form body sent to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub client_id: String,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

impl TokenRequest {
    pub fn form(&self) -> [(&str, &str); 5] {
        [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", self.code.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", self.code_verifier.as_str()),
        ]
    }
}

/// Raw reply of the token endpoint, interpreted by `parse_token_response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Transport-level failures only; HTTP error statuses come back as a `TokenResponse`.
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, AuthError>;
}

/// Token endpoint reached over HTTPS with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, AuthError> {
        // `form` sets the x-www-form-urlencoded content type.
        let response = self
            .client
            .post(&self.url)
            .form(&request.form())
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        Ok(TokenResponse { status, body })
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// A 2xx reply with an `access_token` field yields a credential; anything else
/// is `AuthExchangeFailed` carrying the provider's payload.
pub fn parse_token_response(response: &TokenResponse) -> Result<Credential, AuthError> {
    let failed = || AuthError::AuthExchangeFailed {
        status: response.status,
        payload: response.body.clone(),
    };

    if !(200..300).contains(&response.status) {
        return Err(failed());
    }

    let payload: TokenPayload = serde_json::from_str(&response.body).map_err(|_| failed())?;
    match payload.access_token {
        Some(token) if !token.is_empty() => Ok(Credential::new(token, payload.expires_in)),
        _ => Err(failed()),
    }
}

/// Parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Code { code: String, state: Option<String> },
    Denied { error: String, state: Option<String> },
    /// Legacy implicit-grant reply (`#access_token=...`).
    Implicit { state: Option<String> },
    Empty,
}

impl Callback {
    pub fn parse(url: &Url) -> Self {
        let mut code = None;
        let mut state = None;
        let mut error = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Callback::Denied { error, state };
        }
        if let Some(code) = code {
            return Callback::Code { code, state };
        }

        if let Some(fragment) = url.fragment() {
            let mut has_token = false;
            let mut fragment_state = None;
            for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
                match key.as_ref() {
                    "access_token" => has_token = true,
                    "state" => fragment_state = Some(value.into_owned()),
                    _ => {}
                }
            }
            if has_token {
                return Callback::Implicit {
                    state: fragment_state,
                };
            }
        }

        Callback::Empty
    }
}

/// The callback URL with its transient query and fragment removed.
pub fn scrub_callback_url(url: &Url) -> Url {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    clean
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingRedirect,
    Authenticated(Credential),
    Failed,
}

/// Drives the PKCE authorization-code flow and owns the resulting credential.
pub struct AuthCoordinator<S, T> {
    config: AuthConfig,
    store: S,
    endpoint: T,
    state: AuthState,
}

impl<S: SessionStore, T: TokenEndpoint> AuthCoordinator<S, T> {
    /// A store that still holds a pending attempt (e.g. written by a previous
    /// process) puts the coordinator straight into `AwaitingRedirect`.
    pub fn new(config: AuthConfig, store: S, endpoint: T) -> Result<Self, AuthError> {
        let mut coordinator = Self {
            config,
            store,
            endpoint,
            state: AuthState::Unauthenticated,
        };
        if coordinator.pending()?.is_some() {
            coordinator.state = AuthState::AwaitingRedirect;
        }
        Ok(coordinator)
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn current_credential(&self) -> Option<&Credential> {
        match &self.state {
            AuthState::Authenticated(credential) => Some(credential),
            _ => None,
        }
    }

    /// Starts a new attempt, replacing any previous pending one, and returns
    /// the authorization URL the user has to open.
    pub fn begin_login(&mut self) -> Result<Url, AuthError> {
        let verifier = pkce::generate_verifier(VERIFIER_LENGTH)?;
        let challenge = pkce::derive_challenge(&verifier);
        let state = pkce::generate_state();

        self.store.set(VERIFIER_KEY, &verifier)?;
        self.store.set(STATE_KEY, &state)?;

        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("scope", scope.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", challenge.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| AuthError::ClientConfig(format!("authorize URL: {}", e)))?;

        info!("Login started, waiting for the authorization redirect");
        self.state = AuthState::AwaitingRedirect;
        Ok(url)
    }

    /// Exchanges an authorization code for a credential.
    ///
    /// The pending attempt is consumed before the exchange, so a failed
    /// exchange can never be retried with the same verifier.
    pub async fn complete_login(
        &mut self,
        code: &str,
        returned_state: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let pending = self.pending()?.ok_or(AuthError::NoPendingAuth)?;

        if let Some(returned) = returned_state {
            if returned != pending.state {
                warn!("Callback state does not match the pending login, ignoring it");
                return Err(AuthError::NoPendingAuth);
            }
        }

        self.clear_pending()?;

        let request = TokenRequest {
            client_id: self.config.client_id.clone(),
            code: code.to_string(),
            redirect_uri: self.config.redirect_uri.clone(),
            code_verifier: pending.verifier,
        };

        let result = match self.endpoint.exchange(&request).await {
            Ok(response) => parse_token_response(&response),
            Err(e) => Err(e),
        };

        match result {
            Ok(credential) => {
                info!("Login complete");
                self.state = AuthState::Authenticated(credential.clone());
                // The cache only spares a login on the next run.
                if let Err(e) = self.cache_credential(&credential) {
                    warn!("Could not cache the credential: {}", e);
                }
                Ok(credential)
            }
            Err(e) => {
                warn!("Token exchange failed: {}", e);
                self.state = AuthState::Failed;
                Err(e)
            }
        }
    }

    /// Handles the URL the provider redirected to. `Ok(None)` means the URL
    /// carried no authorization parameters at all.
    pub async fn handle_callback(&mut self, url: &Url) -> Result<Option<Credential>, AuthError> {
        debug!("Handling callback at {}", scrub_callback_url(url));

        match Callback::parse(url) {
            Callback::Code { code, state } => self
                .complete_login(&code, state.as_deref())
                .await
                .map(Some),
            Callback::Denied { error, state } => {
                let pending = self.pending()?.ok_or(AuthError::NoPendingAuth)?;
                if state.is_some_and(|s| s != pending.state) {
                    warn!("Error callback state does not match the pending login, ignoring it");
                    return Err(AuthError::NoPendingAuth);
                }
                self.clear_pending()?;
                self.state = AuthState::Failed;
                Err(AuthError::AuthorizationDenied(error))
            }
            Callback::Implicit { .. } => Err(AuthError::ImplicitFlowUnsupported),
            Callback::Empty => Ok(None),
        }
    }

    /// Loads a credential cached by an earlier successful login. Expired
    /// credentials are discarded.
    pub fn restore_cached(&mut self) -> Result<Option<Credential>, AuthError> {
        let Some(access_token) = self.store.get(TOKEN_KEY)? else {
            return Ok(None);
        };

        let obtained_at = self
            .store
            .get(OBTAINED_AT_KEY)?
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));

        let Some(obtained_at) = obtained_at else {
            warn!("Cached credential has no timestamp, discarding it");
            self.clear_cached_credential()?;
            return Ok(None);
        };

        let credential = Credential {
            access_token,
            obtained_at,
            expires_in: self
                .store
                .get(EXPIRES_IN_KEY)?
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs),
        };

        if credential.is_expired() {
            info!("Cached credential has expired");
            self.clear_cached_credential()?;
            return Ok(None);
        }

        self.state = AuthState::Authenticated(credential.clone());
        Ok(Some(credential))
    }

    /// Forgets the credential and any pending attempt.
    pub fn logout(&mut self) -> Result<(), AuthError> {
        self.clear_pending()?;
        self.clear_cached_credential()?;
        self.state = AuthState::Unauthenticated;
        Ok(())
    }

    fn pending(&self) -> Result<Option<PendingAuth>, AuthError> {
        let verifier = self.store.get(VERIFIER_KEY)?;
        let state = self.store.get(STATE_KEY)?;
        Ok(match (verifier, state) {
            (Some(verifier), Some(state)) => Some(PendingAuth { verifier, state }),
            _ => None,
        })
    }

    fn clear_pending(&mut self) -> Result<(), AuthError> {
        self.store.remove(VERIFIER_KEY)?;
        self.store.remove(STATE_KEY)?;
        Ok(())
    }

    fn cache_credential(&mut self, credential: &Credential) -> Result<(), AuthError> {
        let obtained_at = credential
            .obtained_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.store.set(TOKEN_KEY, &credential.access_token)?;
        self.store.set(OBTAINED_AT_KEY, &obtained_at.to_string())?;
        match credential.expires_in {
            Some(lifetime) => self
                .store
                .set(EXPIRES_IN_KEY, &lifetime.as_secs().to_string())?,
            None => self.store.remove(EXPIRES_IN_KEY)?,
        }
        Ok(())
    }

    fn clear_cached_credential(&mut self) -> Result<(), AuthError> {
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(OBTAINED_AT_KEY)?;
        self.store.remove(EXPIRES_IN_KEY)?;
        Ok(())
    }
}
