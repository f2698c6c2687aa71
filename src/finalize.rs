//! Post-capture derivation and time alignment.
//!
//! Runs once over the frozen measurement log:
//!
//! 1. `p = v * i` for every row,
//! 2. `t` re-based so the first row sits at zero,
//! 3. `t` shifted again so the puff onset (the first row whose power exceeds half
//!    the session peak) sits at zero.
//!
//! Integer timestamps stay integers through both shifts. Power is an integer
//! only when both factors are integers and the product fits.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use tracing::debug;

use crate::codec::Value;
use crate::error::{AppResult, DaqError};
use crate::record::Record;

/// Device timestamp key.
pub const TIME_KEY: &str = "t";
/// Voltage key.
pub const VOLTAGE_KEY: &str = "v";
/// Current key.
pub const CURRENT_KEY: &str = "i";
/// Derived power key.
pub const POWER_KEY: &str = "p";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_field(record: &Record, row: usize, key: &'static str) -> AppResult<Self> {
        let value = record
            .get(key)
            .ok_or(DaqError::MissingField { row, key })?;
        match value {
            Value::Int(n) => Ok(Number::Int(*n)),
            Value::UInt(n) if i64::try_from(*n).is_ok() => Ok(Number::Int(*n as i64)),
            Value::Bool(b) => Ok(Number::Int(i64::from(*b))),
            other => other
                .as_f64()
                .map(Number::Float)
                .ok_or(DaqError::NonNumericField { row, key }),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map_or(Number::Float(a as f64 * b as f64), Number::Int),
            (a, b) => Number::Float(a.as_f64() * b.as_f64()),
        }
    }

    fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_sub(b)
                .map_or(Number::Float(a as f64 - b as f64), Number::Int),
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        match value {
            Number::Int(n) => Value::Int(n),
            Number::Float(x) => Value::Float(x),
        }
    }
}

/// The exportable result of a capture session.
///
/// Row order is the capture order. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedTable {
    columns: Vec<String>,
    rows: Vec<Record>,
    onset: Option<usize>,
    peak_power: f64,
}

impl FinalizedTable {
    /// Column names: record keys in order of first appearance, then `p`.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in capture order.
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Number of rows (never zero).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false; an empty log cannot be finalized.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the row used as time zero, if any row crossed half the peak power.
    pub fn onset_index(&self) -> Option<usize> {
        self.onset
    }

    /// Highest power in the session.
    pub fn peak_power(&self) -> f64 {
        self.peak_power
    }

    /// Value of `key` in `row`.
    pub fn get(&self, row: usize, key: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(key))
    }
}

impl Serialize for FinalizedTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(row)?;
        }
        seq.end()
    }
}

/// Derive power and align time for a frozen measurement log.
///
/// # Errors
///
/// - [`DaqError::EmptySession`] when `log` is empty
/// - [`DaqError::MissingField`] / [`DaqError::NonNumericField`] when a row lacks a
///   usable `t`, `v` or `i`
pub fn finalize(log: &[Record]) -> AppResult<FinalizedTable> {
    if log.is_empty() {
        return Err(DaqError::EmptySession);
    }

    let mut times = Vec::with_capacity(log.len());
    let mut power = Vec::with_capacity(log.len());
    for (row, record) in log.iter().enumerate() {
        let t = Number::from_field(record, row, TIME_KEY)?;
        let v = Number::from_field(record, row, VOLTAGE_KEY)?;
        let i = Number::from_field(record, row, CURRENT_KEY)?;
        times.push(t);
        power.push(v.mul(i));
    }

    let t0 = times[0];
    let rebased: Vec<Number> = times.iter().map(|t| t.sub(t0)).collect();

    let peak_power = power
        .iter()
        .map(|p| p.as_f64())
        .fold(f64::NEG_INFINITY, f64::max);
    let threshold = peak_power / 2.0;
    let onset = power.iter().position(|p| p.as_f64() > threshold);
    let offset = onset.map_or(rebased[0], |k| rebased[k]);

    debug!(
        rows = log.len(),
        peak_power,
        onset = ?onset,
        "Finalizing measurement log"
    );

    let mut columns: Vec<String> = Vec::new();
    for record in log {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.to_string());
            }
        }
    }
    if !columns.iter().any(|c| c == POWER_KEY) {
        columns.push(POWER_KEY.to_string());
    }

    let rows = log
        .iter()
        .zip(rebased)
        .zip(power)
        .map(|((record, t), p)| {
            let mut row = record.clone();
            row.insert(TIME_KEY, t.sub(offset));
            row.insert(POWER_KEY, p);
            row
        })
        .collect();

    Ok(FinalizedTable {
        columns,
        rows,
        onset,
        peak_power,
    })
}
