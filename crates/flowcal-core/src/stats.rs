//! Per-iteration calibration statistics.
//!
//! [`StatisticsReporter`] turns one iteration's demand, the measurements and
//! the current offsets into a [`CalibrationStatistics`] row; [`StatisticsLog`]
//! keeps the rows of a run and renders them as a tab-separated table.
//!
//! # Table
//!
//! ```text
//! iteration  count_ll  count_ll_pred_err  link_lambda_{avg,max,min,stddev}
//! p2p_ll  plan_lambda_{avg,max,min,stddev}  total_ll
//! ```
//!
//! Undefined values are written as `--`.

use crate::calibrate::{calibrated_cells, variance_model, CalibrationError};
use crate::demand::DemandSnapshot;
use crate::measurement::MeasurementStore;
use crate::persist::PersistenceError;
use crate::series::TimeBinnedSeries;
use flowcal_common::EntityKey;
use flowcal_config::CalibrationConfig;
use flowcal_math::SummaryStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

/// Marker for an undefined value in the table.
pub const UNDEFINED: &str = "--";

/// Column names of the statistics table, in order.
pub const TABLE_COLUMNS: [&str; 13] = [
    "iteration",
    "count_ll",
    "count_ll_pred_err",
    "link_lambda_avg",
    "link_lambda_max",
    "link_lambda_min",
    "link_lambda_stddev",
    "p2p_ll",
    "plan_lambda_avg",
    "plan_lambda_max",
    "plan_lambda_min",
    "plan_lambda_stddev",
    "total_ll",
];

/// Statistics of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatistics {
    pub iteration: u32,
    /// Log-likelihood of the simulated counts given the measurements.
    pub count_ll: f64,
    /// Error of the first-order prediction of `count_ll` from the previous iteration.
    pub count_ll_pred_err: Option<f64>,
    pub link_lambda_avg: Option<f64>,
    pub link_lambda_max: Option<f64>,
    pub link_lambda_min: Option<f64>,
    pub link_lambda_stddev: Option<f64>,
    /// Point-to-point likelihood; not modeled.
    pub p2p_ll: Option<f64>,
    pub plan_lambda_avg: Option<f64>,
    pub plan_lambda_max: Option<f64>,
    pub plan_lambda_min: Option<f64>,
    pub plan_lambda_stddev: Option<f64>,
    pub total_ll: f64,
}

impl CalibrationStatistics {
    fn new(iteration: u32, count_ll: f64, pred_err: Option<f64>, link: SummaryStats, plan: SummaryStats) -> Self {
        let p2p_ll: Option<f64> = None;
        Self {
            iteration,
            count_ll,
            count_ll_pred_err: pred_err,
            link_lambda_avg: link.avg,
            link_lambda_max: link.max,
            link_lambda_min: link.min,
            link_lambda_stddev: link.stddev,
            p2p_ll,
            plan_lambda_avg: plan.avg,
            plan_lambda_max: plan.max,
            plan_lambda_min: plan.min,
            plan_lambda_stddev: plan.stddev,
            total_ll: count_ll + p2p_ll.unwrap_or(0.0),
        }
    }

    fn table_row(&self) -> String {
        let fields = [
            self.iteration.to_string(),
            fmt_value(self.count_ll),
            fmt_optional(self.count_ll_pred_err),
            fmt_optional(self.link_lambda_avg),
            fmt_optional(self.link_lambda_max),
            fmt_optional(self.link_lambda_min),
            fmt_optional(self.link_lambda_stddev),
            fmt_optional(self.p2p_ll),
            fmt_optional(self.plan_lambda_avg),
            fmt_optional(self.plan_lambda_max),
            fmt_optional(self.plan_lambda_min),
            fmt_optional(self.plan_lambda_stddev),
            fmt_value(self.total_ll),
        ];
        fields.join("\t")
    }

    fn parse_row(line_no: usize, line: &str) -> Result<Self, PersistenceError> {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != TABLE_COLUMNS.len() {
            return Err(PersistenceError::Malformed {
                line: line_no,
                reason: format!(
                    "expected {} columns, found {}",
                    TABLE_COLUMNS.len(),
                    fields.len()
                ),
            });
        }
        let bad = |column: usize, raw: &str| PersistenceError::Malformed {
            line: line_no,
            reason: format!("bad {} value '{raw}'", TABLE_COLUMNS[column]),
        };
        let required = |column: usize| -> Result<f64, PersistenceError> {
            fields[column]
                .parse::<f64>()
                .map_err(|_| bad(column, fields[column]))
        };
        let optional = |column: usize| -> Result<Option<f64>, PersistenceError> {
            match fields[column] {
                UNDEFINED => Ok(None),
                raw => raw.parse::<f64>().map(Some).map_err(|_| bad(column, raw)),
            }
        };

        Ok(Self {
            iteration: fields[0].parse().map_err(|_| bad(0, fields[0]))?,
            count_ll: required(1)?,
            count_ll_pred_err: optional(2)?,
            link_lambda_avg: optional(3)?,
            link_lambda_max: optional(4)?,
            link_lambda_min: optional(5)?,
            link_lambda_stddev: optional(6)?,
            p2p_ll: optional(7)?,
            plan_lambda_avg: optional(8)?,
            plan_lambda_max: optional(9)?,
            plan_lambda_min: optional(10)?,
            plan_lambda_stddev: optional(11)?,
            total_ll: required(12)?,
        })
    }
}

fn fmt_value(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        UNDEFINED.to_string()
    }
}

fn fmt_optional(value: Option<f64>) -> String {
    value.map_or_else(|| UNDEFINED.to_string(), fmt_value)
}

// ── Reporter ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PreviousIteration<K: EntityKey> {
    count_ll: f64,
    simulated: BTreeMap<(K, usize), f64>,
}

/// Computes statistics, remembering what it needs from the previous iteration.
#[derive(Debug)]
pub struct StatisticsReporter<K: EntityKey> {
    config: CalibrationConfig,
    previous: Option<PreviousIteration<K>>,
}

impl<K: EntityKey> StatisticsReporter<K> {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    /// Statistics for one iteration. `offsets` are the offsets in force after
    /// the iteration's update.
    pub fn record(
        &mut self,
        iteration: u32,
        demand: &DemandSnapshot<K>,
        measurements: &MeasurementStore<K>,
        offsets: &TimeBinnedSeries<K>,
    ) -> CalibrationStatistics {
        let model = variance_model(&self.config, measurements.kind());
        let scale = self.config.sim_scale(measurements.kind(), demand.grid().bin_size_s());

        let mut count_ll = 0.0;
        let mut predicted = self.previous.as_ref().map(|p| p.count_ll);
        let mut simulated = BTreeMap::new();
        let mut link_lambdas = Vec::new();

        for (entity, bin, measured) in calibrated_cells(&self.config, measurements) {
            let sim = demand.counts.get(entity, bin).unwrap_or(0.0) * scale;
            count_ll += model.log_likelihood(sim, measured);

            let key = (entity.clone(), bin);
            if let (Some(pred), Some(prev)) = (predicted.as_mut(), self.previous.as_ref()) {
                let prev_sim = prev.simulated.get(&key).copied().unwrap_or(0.0);
                *pred += model.gradient(prev_sim, measured) * (sim - prev_sim);
            }
            link_lambdas.push(offsets.get(entity, bin).unwrap_or(0.0));
            simulated.insert(key, sim);
        }

        let pred_err = predicted.map(|pred| (count_ll - pred).abs());
        self.previous = Some(PreviousIteration { count_ll, simulated });

        CalibrationStatistics::new(
            iteration,
            count_ll,
            pred_err,
            SummaryStats::from_values(link_lambdas),
            SummaryStats::from_values(demand.plan_corrections.iter().copied()),
        )
    }
}

// ── Log ─────────────────────────────────────────────────────────────────

/// Append-only statistics of a run, keyed by iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsLog {
    rows: BTreeMap<u32, CalibrationStatistics>,
}

impl StatisticsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, stats: CalibrationStatistics) -> Result<(), CalibrationError> {
        if self.rows.contains_key(&stats.iteration) {
            return Err(CalibrationError::DuplicateIteration(stats.iteration));
        }
        self.rows.insert(stats.iteration, stats);
        Ok(())
    }

    pub fn contains(&self, iteration: u32) -> bool {
        self.rows.contains_key(&iteration)
    }

    pub fn get(&self, iteration: u32) -> Option<&CalibrationStatistics> {
        self.rows.get(&iteration)
    }

    pub fn latest_iteration(&self) -> Option<u32> {
        self.rows.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibrationStatistics> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the log as a tab-separated table with a header row.
    pub fn write_table<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "{}", TABLE_COLUMNS.join("\t"))?;
        for stats in self.rows.values() {
            writeln!(writer, "{}", stats.table_row())?;
        }
        writer.flush()
    }

    pub fn to_table_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_table(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Parse a table written by [`StatisticsLog::write_table`].
    pub fn read_table<R: BufRead>(reader: R) -> Result<Self, PersistenceError> {
        let mut log = Self::new();
        let mut header_seen = false;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            if !header_seen {
                let columns: Vec<&str> = line.split('\t').map(str::trim).collect();
                if columns != TABLE_COLUMNS {
                    return Err(PersistenceError::Malformed {
                        line: line_no,
                        reason: "unexpected statistics header".to_string(),
                    });
                }
                header_seen = true;
                continue;
            }
            let stats = CalibrationStatistics::parse_row(line_no, &line)?;
            let iteration = stats.iteration;
            log.append(stats).map_err(|_| PersistenceError::Malformed {
                line: line_no,
                reason: format!("duplicate iteration {iteration}"),
            })?;
        }
        Ok(log)
    }
}
