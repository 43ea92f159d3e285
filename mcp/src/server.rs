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

//! MCP surface: exposes the batched audio-feature fetch as the
//! `get_audio_features` tool over stdio.

use features_core::{normalize_track_id, FeatureFetcher, FeatureSource, TokenProvider};
use log::error;
use rmcp::{
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, serve_server, tool, tool_handler, tool_router,
    transport::io::stdio,
    ErrorData, ServerHandler,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SERVER_INSTRUCTIONS: &str = r#"features-mcp exposes Spotify audio-feature lookup.

Call `get_audio_features` with `{ "track_ids": [...] }` where each entry is a
bare track ID or a spotify:track:... URI. The result is a JSON list with one
feature record or null per requested ID, in request order. Rate limits and
expired tokens are handled internally; a failed fetch comes back as an
error-flagged tool result, never as a broken session."#;

/// Parameters for the audio-feature lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GetAudioFeaturesParams {
    /// Track IDs or spotify:track:... URIs; must be non-empty.
    pub track_ids: Vec<String>,
}

/// MCP server wrapper around the feature fetcher.
pub struct FeaturesMcp<S, T> {
    tool_router: ToolRouter<Self>,
    fetcher: Arc<FeatureFetcher<S, T>>,
}

impl<S, T> Clone for FeaturesMcp<S, T> {
    fn clone(&self) -> Self {
        Self {
            tool_router: self.tool_router.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<S: FeatureSource + 'static, T: TokenProvider + 'static> FeaturesMcp<S, T> {
    pub fn new(fetcher: FeatureFetcher<S, T>) -> Self {
        Self::with_fetcher(Arc::new(fetcher))
    }

    pub fn with_fetcher(fetcher: Arc<FeatureFetcher<S, T>>) -> Self {
        Self {
            tool_router: Self::tool_router_features(),
            fetcher,
        }
    }
}

#[tool_router(router = tool_router_features, vis = "pub")]
impl<S: FeatureSource + 'static, T: TokenProvider + 'static> FeaturesMcp<S, T> {
    #[tool(
        description = "Fetch audio features for a list of Spotify track IDs or URIs. Returns one record or null per ID, in request order."
    )]
    async fn get_audio_features(
        &self,
        Parameters(params): Parameters<GetAudioFeaturesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        if params.track_ids.is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "track_ids must be a non-empty list of track IDs or URIs",
            )]));
        }

        let ids: Vec<String> = params
            .track_ids
            .iter()
            .map(|id| normalize_track_id(id))
            .collect();

        match self.fetcher.fetch_features(&ids).await {
            Ok(records) => Ok(CallToolResult::success(vec![Content::json(records)?])),
            Err(failure) => {
                error!("get_audio_features failed: {}", failure);
                Ok(CallToolResult::error(vec![Content::text(
                    failure.to_string(),
                )]))
            }
        }
    }
}

#[tool_handler]
impl<S: FeatureSource + 'static, T: TokenProvider + 'static> ServerHandler for FeaturesMcp<S, T> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Serves the tool server over stdio until the client disconnects.
pub async fn serve_over_stdio<S, T>(
    fetcher: Arc<FeatureFetcher<S, T>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: FeatureSource + 'static,
    T: TokenProvider + 'static,
{
    let service = FeaturesMcp::with_fetcher(fetcher);
    let (stdin, stdout) = stdio();
    let running = serve_server(service, (stdin, stdout)).await?;
    let _ = running.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use features_core::{AccessToken, AuthError, ProviderError};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct StaticSource {
        responses: Mutex<Vec<Result<Vec<Option<Value>>, ProviderError>>>,
    }

    #[async_trait]
    impl FeatureSource for StaticSource {
        async fn fetch_batch(
            &self,
            _token: &AccessToken,
            _ids: &[String],
        ) -> Result<Vec<Option<Value>>, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .remove(0)
        }
    }

    struct StaticTokens;

    #[async_trait]
    impl TokenProvider for StaticTokens {
        async fn access_token(&self) -> Result<AccessToken, AuthError> {
            Ok(AccessToken::new("token"))
        }

        async fn refresh(&self) -> Result<AccessToken, AuthError> {
            Ok(AccessToken::new("token"))
        }
    }

    fn server_with(
        responses: Vec<Result<Vec<Option<Value>>, ProviderError>>,
    ) -> FeaturesMcp<StaticSource, StaticTokens> {
        let source = StaticSource {
            responses: Mutex::new(responses),
        };
        FeaturesMcp::new(FeatureFetcher::new(source, StaticTokens))
    }

    fn full_record() -> Value {
        json!({
            "danceability": 0.5,
            "energy": 0.6,
            "key": 7,
            "loudness": -6.5,
            "mode": 1,
            "speechiness": 0.04,
            "acousticness": 0.1,
            "instrumentalness": 0.0,
            "liveness": 0.12,
            "valence": 0.3,
            "tempo": 120.0,
            "duration_ms": 200000
        })
    }

    #[tokio::test]
    async fn test_empty_track_ids_is_error_flagged_not_a_fault() {
        let server = server_with(vec![]);
        let result = server
            .get_audio_features(Parameters(GetAudioFeaturesParams { track_ids: vec![] }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_uris_are_normalized_and_records_returned() {
        let server = server_with(vec![Ok(vec![Some(full_record()), None])]);
        let result = server
            .get_audio_features(Parameters(GetAudioFeaturesParams {
                track_ids: vec!["spotify:track:abc".to_string(), "xyz".to_string()],
            }))
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_fatal_fetch_error_is_error_flagged() {
        let server = server_with(vec![
            Err(ProviderError::Unauthorized("expired".to_string())),
            Err(ProviderError::Unauthorized("still expired".to_string())),
        ]);
        let result = server
            .get_audio_features(Parameters(GetAudioFeaturesParams {
                track_ids: vec!["abc".to_string()],
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
    }
}
