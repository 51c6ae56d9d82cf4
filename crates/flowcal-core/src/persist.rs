//! Cost-offset persistence.
//!
//! # File layout
//!
//! ```text
//! {"schema_version":"1.0.0","bin_size_s":3600,"day_length_s":86400,"entities":2,"written_at":"…"}
//! {"entity":"stop1","bins":[[6,0.015625]]}
//! {"entity":"stop2","bins":[[6,-0.03125],[7,0.01]]}
//! ```
//!
//! One JSON header line, then one line per entity with at least one non-zero
//! bin. Bins that are absent read back as zero, so a restored table equals
//! the persisted one cell for cell.

use crate::series::{TimeBinnedSeries, TimeGrid};
use chrono::{DateTime, Utc};
use flowcal_common::schema::is_compatible;
use flowcal_common::{EntityKey, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from writing or reading persisted calibration state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode offsets: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("incompatible schema version {found} (expected {expected})")]
    IncompatibleSchema { found: String, expected: String },

    #[error("persisted grid {found:?} does not match the run grid {expected:?}")]
    GridMismatch { found: TimeGrid, expected: TimeGrid },
}

impl PersistenceError {
    /// Whether the run may continue without this write or read.
    ///
    /// Storage failures are; encoding failures and malformed or incompatible
    /// content are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PersistenceError::Io(_))
    }

    fn malformed(line: usize, reason: impl Into<String>) -> Self {
        PersistenceError::Malformed {
            line,
            reason: reason.into(),
        }
    }
}

impl From<PersistenceError> for flowcal_common::Error {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Io(e) => flowcal_common::Error::Io(e),
            PersistenceError::Encode(e) => flowcal_common::Error::Json(e),
            other => flowcal_common::Error::StateCorrupted(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OffsetsHeader {
    schema_version: String,
    bin_size_s: u32,
    day_length_s: u32,
    entities: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    written_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OffsetsRecord {
    entity: String,
    bins: Vec<(usize, f64)>,
}

/// Write an offset table.
pub fn write_offsets<K: EntityKey, W: Write>(
    offsets: &TimeBinnedSeries<K>,
    mut writer: W,
) -> Result<(), PersistenceError> {
    let records: Vec<OffsetsRecord> = offsets
        .rows()
        .filter_map(|(entity, row)| {
            let bins: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0.0)
                .filter_map(|(bin, v)| {
                    if v.is_finite() {
                        Some((bin, *v))
                    } else {
                        warn!(entity = %entity, bin, "non-finite offset written as zero");
                        None
                    }
                })
                .collect();
            (!bins.is_empty()).then(|| OffsetsRecord {
                entity: entity.to_string(),
                bins,
            })
        })
        .collect();

    let grid = offsets.grid();
    let header = OffsetsHeader {
        schema_version: SCHEMA_VERSION.to_string(),
        bin_size_s: grid.bin_size_s(),
        day_length_s: grid.day_length_s(),
        entities: records.len(),
        written_at: Some(Utc::now()),
    };
    writeln!(writer, "{}", to_line(&header)?)?;
    for record in &records {
        writeln!(writer, "{}", to_line(record)?)?;
    }
    writer.flush()?;
    Ok(())
}

fn to_line<T: Serialize>(value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(PersistenceError::Encode)
}

/// Read an offset table written by [`write_offsets`].
pub fn read_offsets<K: EntityKey, R: BufRead>(reader: R) -> Result<TimeBinnedSeries<K>, PersistenceError> {
    let mut lines = reader.lines().enumerate();

    let header: OffsetsHeader = loop {
        match lines.next() {
            Some((idx, line)) => {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                break serde_json::from_str(&line)
                    .map_err(|e| PersistenceError::malformed(idx + 1, format!("bad header: {e}")))?;
            }
            None => return Err(PersistenceError::malformed(0, "missing header")),
        }
    };
    if !is_compatible(&header.schema_version) {
        return Err(PersistenceError::IncompatibleSchema {
            found: header.schema_version,
            expected: SCHEMA_VERSION.to_string(),
        });
    }
    let grid = TimeGrid::new(header.bin_size_s, header.day_length_s)
        .map_err(|e| PersistenceError::malformed(1, e.to_string()))?;

    let mut offsets = TimeBinnedSeries::new(grid);
    let mut seen = BTreeSet::new();
    for (idx, line) in lines {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: OffsetsRecord = serde_json::from_str(&line)
            .map_err(|e| PersistenceError::malformed(line_no, e.to_string()))?;
        let entity: K = record.entity.parse().map_err(|_| {
            PersistenceError::malformed(line_no, format!("unparseable entity id '{}'", record.entity))
        })?;
        if !seen.insert(record.entity.clone()) {
            return Err(PersistenceError::malformed(
                line_no,
                format!("duplicate entity '{}'", record.entity),
            ));
        }
        for (bin, value) in record.bins {
            if !value.is_finite() {
                return Err(PersistenceError::malformed(
                    line_no,
                    format!("non-finite offset for bin {bin}"),
                ));
            }
            offsets
                .set(&entity, bin, value)
                .map_err(|e| PersistenceError::malformed(line_no, e.to_string()))?;
        }
    }
    if seen.len() != header.entities {
        warn!(
            declared = header.entities,
            found = seen.len(),
            "offset file entity count differs from header"
        );
    }
    Ok(offsets)
}

/// Read an offset table and require it to match the run's grid.
pub fn read_offsets_for_grid<K: EntityKey, R: BufRead>(
    reader: R,
    expected: TimeGrid,
) -> Result<TimeBinnedSeries<K>, PersistenceError> {
    let offsets = read_offsets(reader)?;
    if offsets.grid() != expected {
        return Err(PersistenceError::GridMismatch {
            found: offsets.grid(),
            expected,
        });
    }
    Ok(offsets)
}

/// Save offsets to a file, replacing it atomically.
pub fn save_to_file<K: EntityKey>(offsets: &TimeBinnedSeries<K>, path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let file = fs::File::create(&tmp)?;
        write_offsets(offsets, BufWriter::new(file))?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), entities = offsets.len(), "offsets saved");
    Ok(())
}

/// Load offsets from a file.
pub fn load_from_file<K: EntityKey>(path: &Path) -> Result<TimeBinnedSeries<K>, PersistenceError> {
    let file = fs::File::open(path)?;
    let offsets = read_offsets(BufReader::new(file))?;
    debug!(path = %path.display(), entities = offsets.len(), "offsets loaded");
    Ok(offsets)
}
