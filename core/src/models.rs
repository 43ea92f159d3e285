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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Attribute names that must be present and non-null for a feature record
/// to be considered valid.
pub const REQUIRED_FIELDS: [&str; 12] = [
    "danceability",
    "energy",
    "key",
    "loudness",
    "mode",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo",
    "duration_ms",
];

/// Audio-feature record for a single track.
///
/// The twelve required attributes are first-class fields; everything else the
/// API sends (`id`, `uri`, `analysis_url`, `time_signature`, ...) is kept in
/// the `extra` map so it survives serialization unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
    pub key: i64,
    pub loudness: f64,
    pub mode: i64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl AudioFeatures {
    /// Returns the required attribute values formatted for tabular output,
    /// in `REQUIRED_FIELDS` order.
    pub fn column_values(&self) -> Vec<String> {
        vec![
            self.danceability.to_string(),
            self.energy.to_string(),
            self.key.to_string(),
            self.loudness.to_string(),
            self.mode.to_string(),
            self.speechiness.to_string(),
            self.acousticness.to_string(),
            self.instrumentalness.to_string(),
            self.liveness.to_string(),
            self.valence.to_string(),
            self.tempo.to_string(),
            self.duration_ms.to_string(),
        ]
    }
}

/// Outcome of validating a raw feature record from the API.
#[derive(Debug)]
pub enum RecordValidation {
    Valid(AudioFeatures),
    /// One or more required fields are absent or null.
    Invalid { missing: Vec<String> },
    /// The record is not an object, or a required field has the wrong type.
    Malformed(String),
}

/// Checks a raw API record against the required-field set.
///
/// A record missing any required field, or carrying null for one, downgrades
/// to `Invalid` rather than raising; callers replace it with a null marker.
pub fn validate_record(raw: Value) -> RecordValidation {
    let obj = match raw.as_object() {
        Some(obj) => obj,
        None => return RecordValidation::Malformed("record is not a JSON object".to_string()),
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| obj.get(**field).map_or(true, Value::is_null))
        .map(|field| (*field).to_string())
        .collect();

    if !missing.is_empty() {
        return RecordValidation::Invalid { missing };
    }

    match serde_json::from_value::<AudioFeatures>(raw) {
        Ok(features) => RecordValidation::Valid(features),
        Err(e) => RecordValidation::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_record() -> Value {
        json!({
            "danceability": 0.585,
            "energy": 0.842,
            "key": 5,
            "loudness": -5.883,
            "mode": 0,
            "speechiness": 0.0556,
            "acousticness": 0.00242,
            "instrumentalness": 0.00686,
            "liveness": 0.0866,
            "valence": 0.428,
            "tempo": 118.211,
            "duration_ms": 237040,
            "id": "11dFghVXANMlKmJXsNCbNl",
            "time_signature": 4
        })
    }

    #[test]
    fn test_full_record_is_valid_and_keeps_extras() {
        let features = match validate_record(full_record()) {
            RecordValidation::Valid(features) => features,
            other => panic!("expected valid record, got {:?}", other),
        };

        assert_eq!(features.key, 5);
        assert_eq!(features.duration_ms, 237040);
        assert_eq!(features.extra["id"], json!("11dFghVXANMlKmJXsNCbNl"));
        assert_eq!(features.extra["time_signature"], json!(4));
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let mut record = full_record();
        record.as_object_mut().unwrap().remove("tempo");

        match validate_record(record) {
            RecordValidation::Invalid { missing } => {
                assert_eq!(missing, vec!["tempo".to_string()]);
            }
            other => panic!("expected invalid record, got {:?}", other),
        }
    }

    #[test]
    fn test_null_required_field_is_invalid() {
        let mut record = full_record();
        record["valence"] = Value::Null;

        match validate_record(record) {
            RecordValidation::Invalid { missing } => {
                assert_eq!(missing, vec!["valence".to_string()]);
            }
            other => panic!("expected invalid record, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_record_is_malformed() {
        match validate_record(json!("not a record")) {
            RecordValidation::Malformed(_) => {}
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_column_values_follow_required_field_order() {
        let features = match validate_record(full_record()) {
            RecordValidation::Valid(features) => features,
            other => panic!("expected valid record, got {:?}", other),
        };

        let columns = features.column_values();
        assert_eq!(columns.len(), REQUIRED_FIELDS.len());
        assert_eq!(columns[0], "0.585");
        assert_eq!(columns[11], "237040");
    }

    #[test]
    fn test_record_serializes_back_with_extras() {
        let features = match validate_record(full_record()) {
            RecordValidation::Valid(features) => features,
            other => panic!("expected valid record, got {:?}", other),
        };

        let round = serde_json::to_value(&features).unwrap();
        assert_eq!(round["tempo"], json!(118.211));
        assert_eq!(round["id"], json!("11dFghVXANMlKmJXsNCbNl"));
    }
}
