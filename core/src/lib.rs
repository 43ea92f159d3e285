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

pub mod auth;
pub mod fetch;
pub mod models;
pub mod provider;
pub mod track;
pub mod web_api;

// Re-export key items for convenience
pub use auth::{AuthError, OAuthConfig, SpotifySession};
pub use fetch::{FeatureFetcher, FetchConfig, FetchError, FetchFailure};
pub use models::{validate_record, AudioFeatures, RecordValidation, REQUIRED_FIELDS};
pub use provider::{AccessToken, FeatureSource, ProviderError, TokenProvider};
pub use track::normalize_track_id;
pub use web_api::SpotifyWebApi;
