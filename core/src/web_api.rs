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

use crate::provider::{AccessToken, FeatureSource, ProviderError};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const API_BASE: &str = "https://api.spotify.com/v1";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire shape of `GET /v1/audio-features?ids=...`; unknown IDs come back as
/// nulls in the array.
#[derive(Debug, Deserialize)]
struct FeaturesEnvelope {
    audio_features: Vec<Option<Value>>,
}

/// Speaks the documented audio-features REST endpoint.
pub struct SpotifyWebApi {
    http: reqwest::Client,
    base_url: String,
}

impl SpotifyWebApi {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: API_BASE.to_string(),
        })
    }

    /// Points the client at a different API root. Used by tests and proxies.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl FeatureSource for SpotifyWebApi {
    async fn fetch_batch(
        &self,
        token: &AccessToken,
        ids: &[String],
    ) -> Result<Vec<Option<Value>>, ProviderError> {
        debug!("fetching audio features for {} tracks", ids.len());

        let response = self
            .http
            .get(format!("{}/audio-features", self.base_url))
            .query(&[("ids", ids.join(","))])
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Unauthorized(body))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            }),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Transient(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )))
            }
            _ => {
                let envelope: FeaturesEnvelope = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Transient(e.to_string()))?;
                Ok(envelope.audio_features)
            }
        }
    }
}
