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

//! CSV adapter: reads listening-history exports, extracts track identifiers,
//! and writes the rows back with the audio-feature columns appended.

use anyhow::{bail, Context, Result};
use csv::StringRecord;
use features_core::{normalize_track_id, AudioFeatures, REQUIRED_FIELDS};
use std::path::{Path, PathBuf};

/// Column holding the track URI (or bare ID) in history exports.
pub const TRACK_URI_COLUMN: &str = "spotify_track_uri";

/// Name of the combined output produced by `merge_processed`.
pub const COMBINED_FILE: &str = "spotify_history_combined.csv";

/// A loaded history CSV with the track-URI column located.
#[derive(Debug)]
pub struct HistoryFile {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    uri_index: usize,
}

impl HistoryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open '{}'", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("failed to read headers of '{}'", path.display()))?
            .clone();

        let uri_index = headers
            .iter()
            .position(|name| name == TRACK_URI_COLUMN)
            .with_context(|| {
                format!(
                    "'{}' column is missing in '{}'; cannot add audio features",
                    TRACK_URI_COLUMN,
                    path.display()
                )
            })?;

        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to read rows of '{}'", path.display()))?;

        Ok(Self {
            headers,
            rows,
            uri_index,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Per-row normalized track IDs; rows with an empty or absent URI cell
    /// yield `None` and are skipped by the fetch.
    pub fn track_ids(&self) -> Vec<Option<String>> {
        self.rows
            .iter()
            .map(|row| {
                row.get(self.uri_index)
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .map(normalize_track_id)
            })
            .collect()
    }

    /// Writes the input columns plus the feature columns to `path`.
    /// `features` must hold one entry per row; rows without a record get
    /// empty feature cells.
    pub fn write_enriched(
        &self,
        features: &[Option<AudioFeatures>],
        path: &Path,
    ) -> Result<()> {
        if features.len() != self.rows.len() {
            bail!(
                "feature list length {} does not match row count {}",
                features.len(),
                self.rows.len()
            );
        }

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create '{}'", path.display()))?;

        let mut headers = self.headers.clone();
        for field in REQUIRED_FIELDS {
            headers.push_field(field);
        }
        writer.write_record(&headers)?;

        for (row, record) in self.rows.iter().zip(features) {
            let mut out = row.clone();
            match record {
                Some(features) => {
                    for value in features.column_values() {
                        out.push_field(&value);
                    }
                }
                None => {
                    for _ in REQUIRED_FIELDS {
                        out.push_field("");
                    }
                }
            }
            writer.write_record(&out)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Scatters records fetched for the rows that had an identifier back onto
/// the full row list.
pub fn align_features(
    row_ids: &[Option<String>],
    fetched: Vec<Option<AudioFeatures>>,
) -> Vec<Option<AudioFeatures>> {
    let mut fetched = fetched.into_iter();
    row_ids
        .iter()
        .map(|id| match id {
            Some(_) => fetched.next().flatten(),
            None => None,
        })
        .collect()
}

/// Output path for an enriched file: `<out_dir>/<stem>_processed.csv`.
pub fn processed_path(input: &Path, out_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "history".to_string());
    out_dir.join(format!("{}_processed.csv", stem))
}

/// Concatenates previously processed files into one combined CSV. All inputs
/// must share the same header row.
pub fn merge_processed(paths: &[PathBuf], output: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create '{}'", output.display()))?;
    let mut expected: Option<StringRecord> = None;

    for path in paths {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open '{}'", path.display()))?;
        let headers = reader.headers()?.clone();

        match &expected {
            None => {
                writer.write_record(&headers)?;
                expected = Some(headers);
            }
            Some(expected) if *expected != headers => {
                bail!("column mismatch in '{}', cannot merge", path.display());
            }
            _ => {}
        }

        for row in reader.records() {
            writer.write_record(&row?)?;
        }
    }

    writer.flush()?;
    Ok(())
}
