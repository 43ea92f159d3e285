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

mod server;

use features_core::{FeatureFetcher, OAuthConfig, SpotifySession, SpotifyWebApi};
use std::sync::Arc;

const TOKEN_CACHE_FILE: &str = ".spotify_token_cache.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let _ = dotenvy::dotenv();

    let config = OAuthConfig::from_env()?;
    let session = SpotifySession::new(config)?.with_token_cache(TOKEN_CACHE_FILE)?;
    let api = SpotifyWebApi::new()?;
    let fetcher = Arc::new(FeatureFetcher::new(api, session));

    server::serve_over_stdio(fetcher).await?;
    Ok(())
}
