//! Compressed snapshots of datasets, policy sets and graphs.
//!
//! A snapshot is a gzip stream holding one JSON envelope:
//! `{"format": "fortios-xutils", "version": 1, "kind": "...", "payload": ...}`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FORMAT: &str = "fortios-xutils";
pub const SNAPSHOT_VERSION: u32 = 1;

/// What a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Dataset,
    Policies,
    Graph,
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SnapshotKind::Dataset => "dataset",
            SnapshotKind::Policies => "policies",
            SnapshotKind::Graph => "graph",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot i/o on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("snapshot payload is not valid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot stream error: {0}")]
    Stream(#[from] std::io::Error),
    #[error("not a fortios-xutils snapshot (format `{0}`)")]
    Foreign(String),
    #[error("unsupported snapshot version {found}")]
    UnsupportedVersion { found: u32 },
    #[error("snapshot holds a {found}, expected a {expected}")]
    WrongKind {
        expected: SnapshotKind,
        found: SnapshotKind,
    },
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    format: &'a str,
    version: u32,
    kind: SnapshotKind,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    kind: SnapshotKind,
    payload: serde_json::Value,
}

/// Encode `value` into compressed snapshot bytes.
pub fn encode<T: Serialize>(kind: SnapshotKind, value: &T) -> Result<Vec<u8>, SnapshotError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    write_envelope(&mut encoder, kind, value)?;
    Ok(encoder.finish()?)
}

/// Decode snapshot bytes produced by [`encode`] with the same `kind`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], kind: SnapshotKind) -> Result<T, SnapshotError> {
    read_envelope(GzDecoder::new(bytes), kind)
}

pub fn save<T: Serialize>(path: &Path, kind: SnapshotKind, value: &T) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    write_envelope(&mut encoder, kind, value)?;
    encoder.finish()?.flush().map_err(io_err)?;
    tracing::debug!(path = %path.display(), %kind, "saved snapshot");
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path, kind: SnapshotKind) -> Result<T, SnapshotError> {
    let file = File::open(path).map_err(|source| SnapshotError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_envelope(GzDecoder::new(BufReader::new(file)), kind)
}

fn write_envelope<W: Write, T: Serialize>(
    writer: &mut W,
    kind: SnapshotKind,
    value: &T,
) -> Result<(), SnapshotError> {
    let envelope = EnvelopeRef {
        format: FORMAT,
        version: SNAPSHOT_VERSION,
        kind,
        payload: value,
    };
    serde_json::to_writer(writer, &envelope)?;
    Ok(())
}

fn read_envelope<R: Read, T: DeserializeOwned>(
    mut reader: R,
    kind: SnapshotKind,
) -> Result<T, SnapshotError> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let envelope: Envelope = serde_json::from_slice(&raw)?;
    if envelope.format != FORMAT {
        return Err(SnapshotError::Foreign(envelope.format));
    }
    if envelope.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: envelope.version,
        });
    }
    if envelope.kind != kind {
        return Err(SnapshotError::WrongKind {
            expected: kind,
            found: envelope.kind,
        });
    }
    Ok(serde_json::from_value(envelope.payload)?)
}
