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

/// Maps a track identifier to its bare ID form.
///
/// A URI of the form `scheme:type:id` (e.g. `spotify:track:4uLU6hMCjMI75M1A2tKUQC`)
/// yields `id`; anything else passes through unchanged, so the function is
/// idempotent and never fails.
pub fn normalize_track_id(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() == 3 && parts.iter().all(|part| !part.is_empty()) {
        parts[2].to_string()
    } else {
        raw.to_string()
    }
}
