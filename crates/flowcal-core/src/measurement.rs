//! Measured counts per entity and time bin.
//!
//! Measurements are sparse: an entity may have any number of measured bins,
//! and a bin without a measurement simply has no correction target. The
//! store is built once at start-up and is read-only afterwards.
//!
//! # Text format
//!
//! ```text
//! # entity <TAB> bin <TAB> value
//! stop1	6	4
//! stop2	6	1.0
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::series::{SeriesError, TimeBinnedSeries, TimeGrid};
use flowcal_common::EntityKey;
use flowcal_config::MeasurementType;
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors while building or loading measurements.
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("measurement for {entity} bin {bin} must be finite and non-negative, got {value}")]
    InvalidValue {
        entity: String,
        bin: usize,
        value: f64,
    },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

impl From<MeasurementError> for flowcal_common::Error {
    fn from(err: MeasurementError) -> Self {
        match err {
            MeasurementError::Io(e) => flowcal_common::Error::Io(e),
            other => flowcal_common::Error::InvalidMeasurement(other.to_string()),
        }
    }
}

/// Immutable measured counts.
#[derive(Debug, Clone)]
pub struct MeasurementStore<K: EntityKey> {
    kind: MeasurementType,
    values: TimeBinnedSeries<K>,
    measured: BTreeMap<K, BTreeSet<usize>>,
}

impl<K: EntityKey> MeasurementStore<K> {
    pub fn builder(grid: TimeGrid, kind: MeasurementType) -> MeasurementStoreBuilder<K> {
        MeasurementStoreBuilder {
            store: MeasurementStore {
                kind,
                values: TimeBinnedSeries::new(grid),
                measured: BTreeMap::new(),
            },
        }
    }

    /// Build a store from `(entity, bin, value)` tuples.
    pub fn from_records<I>(
        grid: TimeGrid,
        kind: MeasurementType,
        records: I,
    ) -> Result<Self, MeasurementError>
    where
        I: IntoIterator<Item = (K, usize, f64)>,
    {
        let mut builder = Self::builder(grid, kind);
        for (entity, bin, value) in records {
            builder.insert(entity, bin, value)?;
        }
        Ok(builder.build())
    }

    /// Parse the tab-separated text format.
    pub fn read_tsv<R: BufRead>(
        grid: TimeGrid,
        kind: MeasurementType,
        reader: R,
    ) -> Result<Self, MeasurementError> {
        let mut builder = Self::builder(grid, kind);
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split('\t').map(str::trim).collect();
            if fields.len() != 3 {
                return Err(MeasurementError::Malformed {
                    line: line_no,
                    reason: format!("expected 3 tab-separated fields, found {}", fields.len()),
                });
            }
            let entity = fields[0].parse::<K>().map_err(|_| MeasurementError::Malformed {
                line: line_no,
                reason: format!("unparseable entity id '{}'", fields[0]),
            })?;
            let bin = fields[1]
                .parse::<usize>()
                .map_err(|e| MeasurementError::Malformed {
                    line: line_no,
                    reason: format!("bad bin '{}': {e}", fields[1]),
                })?;
            let value = fields[2]
                .parse::<f64>()
                .map_err(|e| MeasurementError::Malformed {
                    line: line_no,
                    reason: format!("bad value '{}': {e}", fields[2]),
                })?;
            builder.insert(entity, bin, value)?;
        }
        let store = builder.build();
        debug!(
            entities = store.entity_count(),
            cells = store.len(),
            "measurements loaded"
        );
        Ok(store)
    }

    pub fn kind(&self) -> MeasurementType {
        self.kind
    }

    pub fn grid(&self) -> TimeGrid {
        self.values.grid()
    }

    /// Measured value of one cell, or `None` when the bin was not measured.
    pub fn get(&self, entity: &K, bin: usize) -> Option<f64> {
        let bins = self.measured.get(entity)?;
        if !bins.contains(&bin) {
            return None;
        }
        self.values.get(entity, bin).ok()
    }

    pub fn is_measured(&self, entity: &K, bin: usize) -> bool {
        self.measured.get(entity).is_some_and(|bins| bins.contains(&bin))
    }

    /// Every measured cell as `(entity, bin, value)`, in key then bin order.
    pub fn iter_measured(&self) -> impl Iterator<Item = (&K, usize, f64)> + '_ {
        self.measured.iter().flat_map(move |(entity, bins)| {
            let row = self.values.row(entity);
            bins.iter()
                .map(move |bin| (entity, *bin, row.map_or(0.0, |r| r[*bin])))
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &K> {
        self.measured.keys()
    }

    pub fn entity_count(&self) -> usize {
        self.measured.len()
    }

    /// Number of measured cells.
    pub fn len(&self) -> usize {
        self.measured.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.measured.is_empty()
    }

    /// Measured values as a dense series (unmeasured cells read zero).
    pub fn values(&self) -> &TimeBinnedSeries<K> {
        &self.values
    }
}

/// Incremental construction of a [`MeasurementStore`].
#[derive(Debug)]
pub struct MeasurementStoreBuilder<K: EntityKey> {
    store: MeasurementStore<K>,
}

impl<K: EntityKey> MeasurementStoreBuilder<K> {
    /// Add one measured cell. A repeated cell keeps the latest value.
    pub fn insert(&mut self, entity: K, bin: usize, value: f64) -> Result<(), MeasurementError> {
        if !value.is_finite() || value < 0.0 {
            return Err(MeasurementError::InvalidValue {
                entity: entity.to_string(),
                bin,
                value,
            });
        }
        self.store.values.set(&entity, bin, value)?;
        let fresh = self
            .store
            .measured
            .entry(entity.clone())
            .or_default()
            .insert(bin);
        if !fresh {
            warn!(entity = %entity, bin, value, "duplicate measurement, keeping latest value");
        }
        Ok(())
    }

    pub fn build(self) -> MeasurementStore<K> {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcal_common::EntityId;

    fn hourly() -> TimeGrid {
        TimeGrid::new(3600, 86_400).unwrap()
    }

    #[test]
    fn sparse_lookup() {
        let store = MeasurementStore::from_records(
            hourly(),
            MeasurementType::FlowVehH,
            [(EntityId::from("stop1"), 6, 4.0), (EntityId::from("stop1"), 7, 0.0)],
        )
        .unwrap();
        let stop1 = EntityId::from("stop1");
        assert_eq!(store.get(&stop1, 6), Some(4.0));
        assert_eq!(store.get(&stop1, 7), Some(0.0));
        assert_eq!(store.get(&stop1, 8), None);
        assert_eq!(store.get(&"stop2".into(), 6), None);
        assert_eq!(store.len(), 2);
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn measured_zero_differs_from_unmeasured() {
        let store = MeasurementStore::from_records(
            hourly(),
            MeasurementType::CountVeh,
            [(EntityId::from("a"), 3, 0.0)],
        )
        .unwrap();
        assert!(store.is_measured(&"a".into(), 3));
        assert!(!store.is_measured(&"a".into(), 4));
    }

    #[test]
    fn rejects_negative_and_nan() {
        let mut builder = MeasurementStore::<EntityId>::builder(hourly(), MeasurementType::FlowVehH);
        assert!(matches!(
            builder.insert("a".into(), 1, -1.0),
            Err(MeasurementError::InvalidValue { .. })
        ));
        assert!(builder.insert("a".into(), 1, f64::NAN).is_err());
        assert!(builder.build().is_empty());
    }

    #[test]
    fn rejects_bin_outside_grid() {
        let mut builder = MeasurementStore::<EntityId>::builder(hourly(), MeasurementType::FlowVehH);
        assert!(matches!(
            builder.insert("a".into(), 24, 1.0),
            Err(MeasurementError::Series(SeriesError::BinOutOfRange { .. }))
        ));
    }

    #[test]
    fn reads_tsv_with_comments() {
        let text = "# entity\tbin\tvalue\n\nstop1\t6\t4\nstop2\t6\t1.0\nstop10\t6\t5\n";
        let store =
            MeasurementStore::<EntityId>::read_tsv(hourly(), MeasurementType::FlowVehH, text.as_bytes())
                .unwrap();
        assert_eq!(store.len(), 3);
        let cells: Vec<_> = store.iter_measured().map(|(e, b, v)| (e.to_string(), b, v)).collect();
        assert_eq!(
            cells,
            vec![
                ("stop1".to_string(), 6, 4.0),
                ("stop10".to_string(), 6, 5.0),
                ("stop2".to_string(), 6, 1.0),
            ]
        );
    }

    #[test]
    fn malformed_tsv_reports_line() {
        let text = "stop1\t6\t4\nstop2\tsix\t1\n";
        let err =
            MeasurementStore::<EntityId>::read_tsv(hourly(), MeasurementType::FlowVehH, text.as_bytes())
                .unwrap_err();
        assert!(matches!(err, MeasurementError::Malformed { line: 2, .. }));
    }

    #[test]
    fn duplicate_keeps_latest() {
        let store = MeasurementStore::from_records(
            hourly(),
            MeasurementType::FlowVehH,
            [(EntityId::from("a"), 1, 2.0), (EntityId::from("a"), 1, 3.0)],
        )
        .unwrap();
        assert_eq!(store.get(&"a".into(), 1), Some(3.0));
        assert_eq!(store.len(), 1);
    }
}
