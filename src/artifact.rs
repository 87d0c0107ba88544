//! JSON artifact envelopes.
//!
//! Every artifact this pipeline consumes or produces is an object of the
//! shape `{metadata: {...}, items: [...]}`. Metadata carries the artifact
//! type, versions, the build timestamp, and `source_file_hash`, which must
//! propagate unchanged end-to-end so all derived artifacts can be verified
//! as built from one consistent input snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Schema version stamped on all produced artifacts.
pub const SCHEMA_VERSION: &str = "0.1.0";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("missing required file: {path}")]
    Missing { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} missing envelope metadata/items")]
    Shape { path: PathBuf },

    #[error("{path} items do not match the expected record shape: {source}")]
    Items {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Envelope metadata. Fixed fields first; per-artifact diagnostic
/// counters flatten into the same object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    #[serde(default)]
    pub artifact_type: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub pipeline_version: String,
    #[serde(default)]
    pub build_timestamp: String,
    #[serde(default)]
    pub source_file_hash: String,
    #[serde(default)]
    pub record_count: usize,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A typed artifact envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub metadata: EnvelopeMetadata,
    pub items: Vec<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(
        artifact_type: &str,
        pipeline_version: &str,
        build_timestamp: &str,
        source_file_hash: &str,
        items: Vec<T>,
        extra: Map<String, Value>,
    ) -> Self {
        Self {
            metadata: EnvelopeMetadata {
                artifact_type: artifact_type.to_string(),
                schema_version: SCHEMA_VERSION.to_string(),
                pipeline_version: pipeline_version.to_string(),
                build_timestamp: build_timestamp.to_string(),
                source_file_hash: source_file_hash.to_string(),
                record_count: items.len(),
                extra,
            },
            items,
        }
    }

    /// Write the envelope as pretty-printed JSON with a trailing newline.
    /// `indent == 0` writes compact JSON.
    pub fn write_to(&self, path: &Path, indent: usize) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let mut bytes = if indent == 0 {
            serde_json::to_vec(self).map_err(|source| ArtifactError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            let indent_bytes = vec![b' '; indent];
            let mut out = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent_bytes);
            let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
            self.serialize(&mut ser).map_err(|source| ArtifactError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            out
        };
        bytes.push(b'\n');
        fs::write(path, bytes).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Load and shape-check an envelope. A missing file, non-object
    /// payload, or missing metadata/items is a fatal input-contract
    /// violation for the calling build step.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.is_file() {
            return Err(ArtifactError::Missing {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let obj = value.as_object().ok_or_else(|| ArtifactError::Shape {
            path: path.to_path_buf(),
        })?;
        let metadata_value = obj.get("metadata").cloned();
        let items_value = obj.get("items").cloned();
        let (Some(metadata_value), Some(items_value)) = (metadata_value, items_value) else {
            return Err(ArtifactError::Shape {
                path: path.to_path_buf(),
            });
        };
        if !metadata_value.is_object() || !items_value.is_array() {
            return Err(ArtifactError::Shape {
                path: path.to_path_buf(),
            });
        }
        let metadata: EnvelopeMetadata =
            serde_json::from_value(metadata_value).map_err(|source| ArtifactError::Items {
                path: path.to_path_buf(),
                source,
            })?;
        let items: Vec<T> =
            serde_json::from_value(items_value).map_err(|source| ArtifactError::Items {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { metadata, items })
    }
}

/// UTC build timestamp at seconds precision, RFC3339 with a Z suffix.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Hex sha256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fallback source hash when upstream metadata carries none: sha256 over
/// the concatenated upstream artifact bytes in documented input order.
pub fn hash_files(paths: &[&Path]) -> Result<String, ArtifactError> {
    let mut hasher = Sha256::new();
    for path in paths {
        let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Pick the first non-empty source hash from upstream metadata, falling
/// back to hashing the named files.
pub fn propagate_source_hash(
    candidates: &[&str],
    fallback_paths: &[&Path],
) -> Result<String, ArtifactError> {
    for candidate in candidates {
        if !candidate.is_empty() {
            return Ok(candidate.to_string());
        }
    }
    hash_files(fallback_paths)
}

/// Zero-padded sequential artifact id, e.g. `sequential_id("evt", 6, 123)`
/// gives `evt_000123`.
pub fn sequential_id(prefix: &str, width: usize, n: usize) -> String {
    format!("{prefix}_{n:0width$}")
}

/// Round to 3 decimal places (confidence fields).
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_id_padding() {
        assert_eq!(sequential_id("evt", 6, 123), "evt_000123");
        assert_eq!(sequential_id("kg", 5, 7), "kg_00007");
        assert_eq!(sequential_id("te", 6, 1_000_000), "te_1000000");
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.76543), 0.765);
        assert_eq!(round3(0.9995), 1.0);
    }

    #[test]
    fn test_envelope_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");

        let envelope = Envelope::new(
            "test_rows",
            "test-v0.1.0",
            "2024-01-01T00:00:00Z",
            "abc123",
            vec![serde_json::json!({"id": 1}), serde_json::json!({"id": 2})],
            Map::new(),
        );
        envelope.write_to(&path, 2).unwrap();

        let loaded: Envelope<Value> = Envelope::load(&path).unwrap();
        assert_eq!(loaded.metadata.artifact_type, "test_rows");
        assert_eq!(loaded.metadata.record_count, 2);
        assert_eq!(loaded.metadata.source_file_hash, "abc123");
        assert_eq!(loaded.items.len(), 2);
    }

    #[test]
    fn test_envelope_shape_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = Envelope::<Value>::load(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Shape { .. }));

        std::fs::write(&path, "{\"metadata\": {}}").unwrap();
        let err = Envelope::<Value>::load(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Shape { .. }));

        let missing = dir.path().join("nope.json");
        let err = Envelope::<Value>::load(&missing).unwrap_err();
        assert!(matches!(err, ArtifactError::Missing { .. }));
    }

    #[test]
    fn test_write_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");

        let envelope = Envelope::new(
            "t",
            "v",
            "2024-01-01T00:00:00Z",
            "h",
            vec![serde_json::json!({"k": "v"})],
            Map::new(),
        );
        envelope.write_to(&a, 2).unwrap();
        envelope.write_to(&b, 2).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }
}
