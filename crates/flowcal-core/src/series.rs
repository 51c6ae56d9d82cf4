//! Time-binned series keyed by entity.
//!
//! The storage primitive shared by demand counts, cost offsets, and
//! measurements: each key maps to a fixed-length row of `f64`, one value per
//! time bin of the simulated day.
//!
//! # Bin lookup
//!
//! ```text
//! bin = floor(time_s / bin_size_s)       strict:  error outside [0, bin_count)
//!                                         clamped: <0 → 0, ≥bin_count → last
//! ```

use flowcal_common::EntityKey;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from grid construction and bin access.
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("invalid time grid: {0}")]
    InvalidGrid(String),

    #[error("bin {bin} out of range (series has {bin_count} bins)")]
    BinOutOfRange { bin: usize, bin_count: usize },

    #[error("time {time_s}s is outside the simulated day [0, {day_length_s})")]
    TimeOutOfRange { time_s: f64, day_length_s: u32 },

    #[error("series grids differ: {left:?} vs {right:?}")]
    GridMismatch { left: TimeGrid, right: TimeGrid },
}

impl From<SeriesError> for flowcal_common::Error {
    fn from(err: SeriesError) -> Self {
        match err {
            SeriesError::InvalidGrid(msg) => flowcal_common::Error::InvalidGrid(msg),
            other => flowcal_common::Error::Calibration(other.to_string()),
        }
    }
}

/// Discretization of one simulated day into equal-width bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeGrid {
    bin_size_s: u32,
    day_length_s: u32,
    bin_count: usize,
}

impl TimeGrid {
    /// Build a grid; the bin size must be positive and divide the day length.
    pub fn new(bin_size_s: u32, day_length_s: u32) -> Result<Self, SeriesError> {
        if bin_size_s == 0 || day_length_s == 0 {
            return Err(SeriesError::InvalidGrid(format!(
                "bin size {bin_size_s}s and day length {day_length_s}s must be positive"
            )));
        }
        if day_length_s % bin_size_s != 0 {
            return Err(SeriesError::InvalidGrid(format!(
                "bin size {bin_size_s}s does not divide day length {day_length_s}s"
            )));
        }
        Ok(Self {
            bin_size_s,
            day_length_s,
            bin_count: day_length_s.div_ceil(bin_size_s) as usize,
        })
    }

    /// Grid described by a validated calibration config.
    pub fn from_config(config: &flowcal_config::CalibrationConfig) -> Result<Self, SeriesError> {
        Self::new(config.time_bin_size, config.day_length)
    }

    pub fn bin_size_s(&self) -> u32 {
        self.bin_size_s
    }

    pub fn day_length_s(&self) -> u32 {
        self.day_length_s
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Strict bin lookup.
    pub fn bin_index(&self, time_s: f64) -> Result<usize, SeriesError> {
        if !time_s.is_finite() || time_s < 0.0 {
            return Err(SeriesError::TimeOutOfRange {
                time_s,
                day_length_s: self.day_length_s,
            });
        }
        let bin = (time_s / f64::from(self.bin_size_s)).floor() as usize;
        if bin >= self.bin_count {
            return Err(SeriesError::TimeOutOfRange {
                time_s,
                day_length_s: self.day_length_s,
            });
        }
        Ok(bin)
    }

    /// Bin lookup that clamps into the grid; `None` only for non-finite times.
    pub fn clamped_bin_index(&self, time_s: f64) -> Option<usize> {
        if !time_s.is_finite() {
            return None;
        }
        if time_s <= 0.0 {
            return Some(0);
        }
        let bin = (time_s / f64::from(self.bin_size_s)).floor();
        Some((bin as usize).min(self.bin_count - 1))
    }

    fn check_bin(&self, bin: usize) -> Result<(), SeriesError> {
        if bin >= self.bin_count {
            return Err(SeriesError::BinOutOfRange {
                bin,
                bin_count: self.bin_count,
            });
        }
        Ok(())
    }
}

/// Entity key → one value per time bin.
///
/// Keys without a row read as zero in every bin.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBinnedSeries<K: EntityKey> {
    grid: TimeGrid,
    rows: BTreeMap<K, Vec<f64>>,
}

impl<K: EntityKey> TimeBinnedSeries<K> {
    pub fn new(grid: TimeGrid) -> Self {
        Self {
            grid,
            rows: BTreeMap::new(),
        }
    }

    pub fn grid(&self) -> TimeGrid {
        self.grid
    }

    /// Value of one cell; zero for keys without a row.
    pub fn get(&self, key: &K, bin: usize) -> Result<f64, SeriesError> {
        self.grid.check_bin(bin)?;
        Ok(self.rows.get(key).map_or(0.0, |row| row[bin]))
    }

    /// Value of a cell whose bin comes from [`TimeGrid::clamped_bin_index`].
    pub fn get_clamped(&self, key: &K, time_s: f64) -> f64 {
        match self.grid.clamped_bin_index(time_s) {
            Some(bin) => self.rows.get(key).map_or(0.0, |row| row[bin]),
            None => 0.0,
        }
    }

    pub fn set(&mut self, key: &K, bin: usize, value: f64) -> Result<(), SeriesError> {
        self.grid.check_bin(bin)?;
        self.row_mut(key)[bin] = value;
        Ok(())
    }

    pub fn add(&mut self, key: &K, bin: usize, delta: f64) -> Result<(), SeriesError> {
        self.grid.check_bin(bin)?;
        self.row_mut(key)[bin] += delta;
        Ok(())
    }

    /// Replace a whole row; the row length must equal the bin count.
    pub fn insert_row(&mut self, key: K, row: Vec<f64>) -> Result<(), SeriesError> {
        if row.len() != self.grid.bin_count {
            return Err(SeriesError::BinOutOfRange {
                bin: row.len(),
                bin_count: self.grid.bin_count,
            });
        }
        self.rows.insert(key, row);
        Ok(())
    }

    pub fn row(&self, key: &K) -> Option<&[f64]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    fn row_mut(&mut self, key: &K) -> &mut Vec<f64> {
        let bins = self.grid.bin_count;
        self.rows
            .entry(key.clone())
            .or_insert_with(|| vec![0.0; bins])
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.rows.keys()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&K, &[f64])> {
        self.rows.iter().map(|(k, row)| (k, row.as_slice()))
    }

    /// Every stored cell as `(key, bin, value)`, in key then bin order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (&K, usize, f64)> {
        self.rows
            .iter()
            .flat_map(|(k, row)| row.iter().enumerate().map(move |(bin, v)| (k, bin, *v)))
    }

    /// Stored cells with a non-zero value.
    pub fn nonzero_cells(&self) -> impl Iterator<Item = (&K, usize, f64)> {
        self.iter_cells().filter(|(_, _, v)| *v != 0.0)
    }

    /// Number of keys with a row.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum of every stored cell.
    pub fn total(&self) -> f64 {
        self.rows.values().flat_map(|row| row.iter()).sum()
    }

    /// Error unless both series share a grid.
    pub fn ensure_same_grid(&self, other: TimeGrid) -> Result<(), SeriesError> {
        if self.grid != other {
            return Err(SeriesError::GridMismatch {
                left: self.grid,
                right: other,
            });
        }
        Ok(())
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
    fn grid_rejects_non_divisor() {
        assert!(matches!(
            TimeGrid::new(7000, 86_400),
            Err(SeriesError::InvalidGrid(_))
        ));
        assert!(TimeGrid::new(0, 86_400).is_err());
    }

    #[test]
    fn grid_bin_count() {
        assert_eq!(hourly().bin_count(), 24);
        assert_eq!(TimeGrid::new(900, 86_400).unwrap().bin_count(), 96);
    }

    #[test]
    fn hour_six_second_one_is_bin_six() {
        let grid = hourly();
        assert_eq!(grid.bin_index(21_601.0).unwrap(), 6);
        assert_eq!(grid.clamped_bin_index(21_601.0), Some(6));
        assert_eq!(grid.bin_index(21_600.0).unwrap(), 6);
        assert_eq!(grid.bin_index(21_599.999).unwrap(), 5);
    }

    #[test]
    fn strict_lookup_rejects_outside_day() {
        let grid = hourly();
        assert!(grid.bin_index(86_400.0).is_err());
        assert!(grid.bin_index(-1.0).is_err());
        assert!(grid.bin_index(f64::NAN).is_err());
    }

    #[test]
    fn clamped_lookup_saturates() {
        let grid = hourly();
        assert_eq!(grid.clamped_bin_index(90_000.0), Some(23));
        assert_eq!(grid.clamped_bin_index(-5.0), Some(0));
        assert_eq!(grid.clamped_bin_index(f64::INFINITY), None);
    }

    #[test]
    fn missing_key_reads_zero() {
        let series: TimeBinnedSeries<EntityId> = TimeBinnedSeries::new(hourly());
        assert_eq!(series.get(&"x".into(), 3).unwrap(), 0.0);
    }

    #[test]
    fn out_of_range_bin_is_error() {
        let mut series: TimeBinnedSeries<EntityId> = TimeBinnedSeries::new(hourly());
        let key = EntityId::from("stop1");
        assert_eq!(
            series.set(&key, 24, 1.0),
            Err(SeriesError::BinOutOfRange {
                bin: 24,
                bin_count: 24
            })
        );
        assert!(series.get(&key, 24).is_err());
        assert!(series.is_empty());
    }

    #[test]
    fn add_and_iterate_cells() {
        let mut series: TimeBinnedSeries<EntityId> = TimeBinnedSeries::new(hourly());
        let a = EntityId::from("a");
        let b = EntityId::from("b");
        series.add(&b, 2, 1.0).unwrap();
        series.add(&a, 6, 2.0).unwrap();
        series.add(&a, 6, 0.5).unwrap();

        let cells: Vec<_> = series.nonzero_cells().collect();
        assert_eq!(cells, vec![(&a, 6, 2.5), (&b, 2, 1.0)]);
        assert_eq!(series.len(), 2);
        assert!((series.total() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn insert_row_checks_length() {
        let mut series: TimeBinnedSeries<EntityId> = TimeBinnedSeries::new(hourly());
        assert!(series.insert_row("a".into(), vec![0.0; 23]).is_err());
        assert!(series.insert_row("a".into(), vec![1.0; 24]).is_ok());
        assert_eq!(series.row(&"a".into()).unwrap().len(), 24);
    }

    #[test]
    fn grid_mismatch_detected() {
        let series: TimeBinnedSeries<EntityId> = TimeBinnedSeries::new(hourly());
        let half_hour = TimeGrid::new(1800, 86_400).unwrap();
        assert!(series.ensure_same_grid(hourly()).is_ok());
        assert!(matches!(
            series.ensure_same_grid(half_hour),
            Err(SeriesError::GridMismatch { .. })
        ));
    }
}
