/*
    spotify-features-rs | Rust tools to enrich listening history with Spotify audio features.
    Copyright (C) 2026  spotify-features-rs developers

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

use crate::provider::{AccessToken, TokenProvider};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use urlencoding::encode;

const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// Scopes requested when SPOTIFY_SCOPES is not set. Library and playlist
/// read access covers everything the feature pipeline touches.
const DEFAULT_SCOPES: &str =
    "user-library-read user-read-recently-played playlist-read-private playlist-read-collaborative";

/// Tokens within this window of expiry are treated as already expired, so a
/// batch never starts with a token about to lapse mid-request.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("failed to write token cache {path}: {source}")]
    Cache {
        path: String,
        source: std::io::Error,
    },
    #[error("token cache is not valid JSON: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

/// OAuth application settings, normally read from the environment.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: String,
}

impl OAuthConfig {
    /// Reads the client configuration from the environment:
    ///
    /// 1. `SPOTIFY_CLIENT_ID` and `SPOTIFY_CLIENT_SECRET` are required.
    /// 2. `SPOTIFY_REDIRECT_URI` falls back to the locally registered
    ///    `http://localhost:8888/callback`.
    /// 3. `SPOTIFY_SCOPES` falls back to the library-read scope set.
    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = env::var("SPOTIFY_CLIENT_ID")
            .map_err(|_| AuthError::MissingConfig("SPOTIFY_CLIENT_ID"))?;
        let client_secret = env::var("SPOTIFY_CLIENT_SECRET")
            .map_err(|_| AuthError::MissingConfig("SPOTIFY_CLIENT_SECRET"))?;
        let redirect_uri = env::var("SPOTIFY_REDIRECT_URI")
            .unwrap_or_else(|_| "http://localhost:8888/callback".to_string());
        let scopes = env::var("SPOTIFY_SCOPES").unwrap_or_else(|_| DEFAULT_SCOPES.to_string());

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

/// Token state held by the session and mirrored to the cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    /// Absolute expiry as unix seconds; the buffer is applied at read time.
    expires_at: u64,
}

impl TokenState {
    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        // A refresh response does not always echo the refresh token back;
        // keep the one we already hold in that case.
        let refresh_token = response.refresh_token.or(previous_refresh);
        Self {
            access_token: response.access_token,
            refresh_token,
            expires_at: unix_now() + response.expires_in,
        }
    }

    fn is_expiring_soon(&self) -> bool {
        unix_now() + EXPIRY_BUFFER.as_secs() >= self.expires_at
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Owns the access token and talks to the accounts service.
///
/// The engine reads the token before each batch through [`TokenProvider`] and
/// triggers a refresh when the API rejects it; the state is never global.
pub struct SpotifySession {
    http: reqwest::Client,
    config: OAuthConfig,
    cache_path: Option<PathBuf>,
    state: Mutex<Option<TokenState>>,
}

impl SpotifySession {
    pub fn new(config: OAuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http,
            config,
            cache_path: None,
            state: Mutex::new(None),
        })
    }

    /// Persists token state to `path` and restores it from there if the file
    /// already exists, so a completed consent flow survives restarts.
    pub fn with_token_cache(mut self, path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| AuthError::Cache {
                path: path.display().to_string(),
                source,
            })?;
            let state: TokenState = serde_json::from_str(&raw)?;
            info!("restored token cache from {}", path.display());
            *self.state.get_mut() = Some(state);
        }
        self.cache_path = Some(path);
        Ok(self)
    }

    /// Builds the user-consent URL for the authorization-code flow.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}",
            ACCOUNTS_BASE,
            encode(&self.config.client_id),
            encode(&self.config.redirect_uri),
            encode(&self.config.scopes),
        )
    }

    /// Extracts the `code` query parameter from the URL the user was
    /// redirected to after granting consent.
    pub fn parse_redirect_code(redirected_url: &str) -> Option<String> {
        let (_, query) = redirected_url.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("code="))
            .filter(|code| !code.is_empty())
            .map(|code| code.to_string())
    }

    /// Exchanges an authorization code for tokens and stores them.
    pub async fn exchange_code(&self, code: &str) -> Result<(), AuthError> {
        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.config.redirect_uri),
            ])
            .await?;

        let state = TokenState::from_response(response, None);
        self.persist(&state)?;
        *self.state.lock().await = Some(state);
        info!("authorization code exchanged, session is ready");
        Ok(())
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(format!("{}/api/token", ACCOUNTS_BASE))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    fn persist(&self, state: &TokenState) -> Result<(), AuthError> {
        if let Some(path) = &self.cache_path {
            let raw = serde_json::to_string_pretty(state)?;
            fs::write(path, raw).map_err(|source| AuthError::Cache {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Returns a usable token, fetching a new one when forced or when the
    /// held one is absent or about to expire. Holding the lock across the
    /// token request keeps acquisition single-flight.
    async fn ensure_token(&self, force: bool) -> Result<AccessToken, AuthError> {
        let mut guard = self.state.lock().await;

        if !force {
            if let Some(state) = guard.as_ref() {
                if !state.is_expiring_soon() {
                    return Ok(AccessToken::new(state.access_token.clone()));
                }
            }
        }

        let previous_refresh = guard.as_ref().and_then(|s| s.refresh_token.clone());
        let response = match &previous_refresh {
            Some(refresh_token) => {
                info!("refreshing access token");
                self.token_request(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ])
                .await?
            }
            None => {
                // Headless fallback: without a consent flow the audio-features
                // endpoint is still reachable with an app-only token.
                info!("requesting client-credentials token");
                self.token_request(&[("grant_type", "client_credentials")])
                    .await?
            }
        };

        let state = TokenState::from_response(response, previous_refresh);
        let token = AccessToken::new(state.access_token.clone());
        self.persist(&state)?;
        *guard = Some(state);
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for SpotifySession {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        self.ensure_token(false).await
    }

    async fn refresh(&self) -> Result<AccessToken, AuthError> {
        self.ensure_token(true).await
    }
}
