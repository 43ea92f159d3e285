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

use crate::auth::AuthError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Short-lived bearer credential authorizing remote API calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

/// How a single remote fetch failed, as far as the retry policy cares.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The access token was rejected as invalid or expired.
    #[error("access token rejected: {0}")]
    Unauthorized(String),
    /// The caller exceeded the request quota; `retry_after` is the wait the
    /// server suggested, if it sent one.
    #[error("rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },
    /// Network error, server error, or a response that could not be decoded.
    #[error("transient API failure: {0}")]
    Transient(String),
}

/// Obtains and refreshes the access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token expected to be currently valid, obtaining one if
    /// none is held yet.
    async fn access_token(&self) -> Result<AccessToken, AuthError>;

    /// Forces a new token, replacing whatever is held. Called when the
    /// remote rejects the current token mid-run.
    async fn refresh(&self) -> Result<AccessToken, AuthError>;
}

/// Fetches raw audio-feature records for one batch of track IDs.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Returns one raw record per requested ID, in request order, with
    /// `None` for IDs the remote does not know.
    async fn fetch_batch(
        &self,
        token: &AccessToken,
        ids: &[String],
    ) -> Result<Vec<Option<Value>>, ProviderError>;
}
