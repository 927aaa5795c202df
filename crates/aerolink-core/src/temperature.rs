//! Setpoint and sensor temperature conversion
//!
//! The wire carries temperatures as an integer Celsius setpoint (`SetTem`)
//! plus a fractional bit (`TemRec`) that records whether a Fahrenheit input
//! rounded up. The pair losslessly round-trips every Fahrenheit degree the
//! firmware accepts.

use crate::error::{Error, Result};

/// Valid Celsius setpoint range accepted by the firmware
pub const SETPOINT_MIN_C: i64 = 8;
pub const SETPOINT_MAX_C: i64 = 30;

/// Fahrenheit span covered by the conversion table
pub const TABLE_MIN_F: i64 = -76;
pub const TABLE_MAX_F: i64 = 140;

/// Celsius span covered by the conversion table
pub const TABLE_MIN_C: i64 = -60;
pub const TABLE_MAX_C: i64 = 60;

/// Offset v3 firmware applies to the raw temperature sensor reading
pub const SENSOR_OFFSET: i64 = 40;

/// One Fahrenheit degree expressed as the wire setpoint pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TempRecord {
    pub fahrenheit: i64,
    /// Integer Celsius setpoint (`SetTem`)
    pub set: i64,
    /// 1 when the exact Celsius value exceeds the rounded setpoint (`TemRec`)
    pub bit: i64,
}

fn record(fahrenheit: i64) -> TempRecord {
    let celsius = (fahrenheit - 32) as f64 * 5.0 / 9.0;
    let set = celsius.round() as i64;
    TempRecord {
        fahrenheit,
        set,
        bit: i64::from(celsius - set as f64 > 0.0),
    }
}

/// All table entries, coldest first
pub fn records() -> impl Iterator<Item = TempRecord> {
    (TABLE_MIN_F..=TABLE_MAX_F).map(record)
}

/// Wire pair for a Fahrenheit setpoint
pub fn fahrenheit_to_record(fahrenheit: i64) -> Result<TempRecord> {
    if !(TABLE_MIN_F..=TABLE_MAX_F).contains(&fahrenheit) {
        return Err(Error::OutOfRange(format!("{fahrenheit} degF")));
    }
    Ok(record(fahrenheit))
}

/// Fahrenheit reading for a wire pair
///
/// Units occasionally report a `TemRec` that never occurs with the given
/// setpoint; the first entry with a matching setpoint wins in that case.
pub fn fahrenheit_from_celsius(set: i64, bit: i64) -> Option<i64> {
    let mut fallback = None;
    for entry in records() {
        if entry.set != set {
            continue;
        }
        if entry.bit == bit {
            return Some(entry.fahrenheit);
        }
        fallback.get_or_insert(entry.fahrenheit);
    }
    fallback
}

/// Clamp a Celsius reading into the span the table can express
pub fn clamp_table_celsius(celsius: i64) -> i64 {
    celsius.clamp(TABLE_MIN_C, TABLE_MAX_C)
}

/// Validate a Celsius setpoint against the firmware's accepted range
pub fn check_setpoint(celsius: i64) -> Result<()> {
    if !(SETPOINT_MIN_C..=SETPOINT_MAX_C).contains(&celsius) {
        return Err(Error::OutOfRange(format!("{celsius} degC")));
    }
    Ok(())
}
