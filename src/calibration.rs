//! Per-channel, per-gain linear calibration of raw current counts.
//!
//! Each measurement channel has four amplification settings (KU = 1, 10, 100,
//! 1000). The frame decoder reports which setting was active via a gain code
//! in 0..=3, and the physical current is reconstructed as
//! `I = a[gain] * raw + b[gain]`. Coefficients default to identity (a=1, b=0)
//! until a device config is loaded.

use crate::errors::{DecodeError, DriverError, Result};

/// Number of discrete gain settings per channel.
pub const GAIN_LEVELS: usize = 4;

/// Amplification factor for each gain code, used in config section names.
pub const GAIN_FACTORS: [u32; GAIN_LEVELS] = [1, 10, 100, 1000];

/// One linear coefficient pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEntry {
    pub a: f64,
    pub b: f64,
}

impl Default for CalibrationEntry {
    /// Identity transform: raw counts pass through unscaled.
    fn default() -> Self {
        Self { a: 1.0, b: 0.0 }
    }
}

impl CalibrationEntry {
    /// Convert a raw signed reading to amperes.
    pub fn apply(&self, raw: i16) -> f64 {
        self.a * raw as f64 + self.b
    }
}

/// Calibration coefficients for every channel and gain setting.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    entries: Vec<[CalibrationEntry; GAIN_LEVELS]>,
}

impl CalibrationTable {
    /// Identity table for `channel_num` channels.
    pub fn new(channel_num: usize) -> Self {
        Self {
            entries: vec![[CalibrationEntry::default(); GAIN_LEVELS]; channel_num],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.entries.len()
    }

    /// Look up the coefficient pair for a raw gain byte taken from a frame.
    ///
    /// An out-of-range gain code is a decode error, never a panic: the frame
    /// that carried it is treated as malformed and skipped by the caller.
    pub fn lookup(&self, channel: usize, gain_code: u8) -> std::result::Result<CalibrationEntry, DecodeError> {
        if (gain_code as usize) >= GAIN_LEVELS {
            return Err(DecodeError::CalibrationIndexOutOfRange {
                channel,
                gain: gain_code,
            });
        }
        self.entries
            .get(channel)
            .map(|gains| gains[gain_code as usize])
            .ok_or(DecodeError::CalibrationIndexOutOfRange {
                channel,
                gain: gain_code,
            })
    }

    pub fn set(&mut self, channel: usize, gain_code: u8, a: f64, b: f64) -> Result<()> {
        if (gain_code as usize) >= GAIN_LEVELS {
            return Err(DriverError::Config(format!(
                "gain code {gain_code} out of range (valid 0-3)"
            )));
        }
        let channel_num = self.entries.len();
        let gains = self
            .entries
            .get_mut(channel)
            .ok_or(DriverError::InvalidChannel {
                channel,
                channel_num,
            })?;
        gains[gain_code as usize] = CalibrationEntry { a, b };
        Ok(())
    }

    /// Render the table as config text, one section per channel and gain:
    ///
    /// ```text
    /// [Channel 0: current calibration KU = 10]
    /// a = 2E0
    /// b = 1E0
    /// ```
    ///
    /// Exponent formatting round-trips exactly through [`apply_config_string`]
    /// (Rust float formatting is shortest-roundtrip).
    ///
    /// [`apply_config_string`]: CalibrationTable::apply_config_string
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        for (channel, gains) in self.entries.iter().enumerate() {
            for (gain, entry) in gains.iter().enumerate() {
                out.push_str(&format!(
                    "[Channel {}: current calibration KU = {}]\n",
                    channel, GAIN_FACTORS[gain]
                ));
                out.push_str(&format!("a = {:E}\n", entry.a));
                out.push_str(&format!("b = {:E}\n", entry.b));
            }
        }
        out
    }

    /// Apply coefficients parsed from config text produced by
    /// [`to_config_string`] (or edited by hand).
    ///
    /// Unknown sections are ignored and missing sections keep their prior
    /// values, so a partial file only overrides what it names. A value that
    /// fails to parse as a float is a config error.
    ///
    /// [`to_config_string`]: CalibrationTable::to_config_string
    pub fn apply_config_string(&mut self, text: &str) -> Result<()> {
        let mut target: Option<(usize, usize)> = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                target = parse_section_header(header)
                    .filter(|(channel, _)| *channel < self.entries.len());
                continue;
            }
            let Some((channel, gain)) = target else {
                continue;
            };
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value: f64 = value.trim().parse().map_err(|_| {
                DriverError::Config(format!("bad calibration value {:?} in {line:?}", value.trim()))
            })?;
            match key.trim() {
                "a" => self.entries[channel][gain].a = value,
                "b" => self.entries[channel][gain].b = value,
                _ => {}
            }
        }
        Ok(())
    }
}

/// Parse `Channel {n}: current calibration KU = {factor}` into (channel, gain).
fn parse_section_header(header: &str) -> Option<(usize, usize)> {
    let rest = header.strip_prefix("Channel ")?;
    let (channel, rest) = rest.split_once(':')?;
    let channel: usize = channel.trim().parse().ok()?;
    let factor: u32 = rest.trim().strip_prefix("current calibration KU =")?.trim().parse().ok()?;
    let gain = GAIN_FACTORS.iter().position(|&f| f == factor)?;
    Some((channel, gain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity() {
        let table = CalibrationTable::new(2);
        let entry = table.lookup(1, 3).unwrap();
        assert_eq!(entry, CalibrationEntry { a: 1.0, b: 0.0 });
        assert_eq!(entry.apply(-123), -123.0);
    }

    #[test]
    fn linear_transform_matches_stored_coefficients() {
        let mut table = CalibrationTable::new(2);
        table.set(0, 0, 2.0, 1.0).unwrap();
        let entry = table.lookup(0, 0).unwrap();
        assert_eq!(entry.apply(100), 201.0);
    }

    #[test]
    fn out_of_range_gain_is_a_decode_error() {
        let table = CalibrationTable::new(2);
        let err = table.lookup(0, 4).unwrap_err();
        assert_eq!(
            err,
            DecodeError::CalibrationIndexOutOfRange {
                channel: 0,
                gain: 4
            }
        );
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        assert!(CalibrationTable::new(2).lookup(5, 0).is_err());
        assert!(CalibrationTable::new(2).set(5, 0, 1.0, 0.0).is_err());
    }

    #[test]
    fn config_text_round_trips_exactly() {
        let mut table = CalibrationTable::new(3);
        table.set(0, 0, 2.5e-9, -1.0e-12).unwrap();
        table.set(1, 2, 0.3333333333333333, 7.125).unwrap();
        table.set(2, 3, -4.0e6, 1.0e-300).unwrap();

        let mut restored = CalibrationTable::new(3);
        restored.apply_config_string(&table.to_config_string()).unwrap();
        assert_eq!(restored, table);
    }

    #[test]
    fn partial_config_keeps_prior_values() {
        let mut table = CalibrationTable::new(2);
        table.set(1, 1, 9.0, 9.0).unwrap();
        table
            .apply_config_string("[Channel 0: current calibration KU = 1]\na = 5E0\n")
            .unwrap();
        assert_eq!(table.lookup(0, 0).unwrap().a, 5.0);
        assert_eq!(table.lookup(1, 1).unwrap(), CalibrationEntry { a: 9.0, b: 9.0 });
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let mut table = CalibrationTable::new(1);
        table
            .apply_config_string("[General parameters]\nfabrication number = 17\naddress = 1\n")
            .unwrap();
        assert_eq!(table, CalibrationTable::new(1));
    }

    #[test]
    fn bad_float_is_a_config_error() {
        let mut table = CalibrationTable::new(1);
        let res =
            table.apply_config_string("[Channel 0: current calibration KU = 1]\na = banana\n");
        assert!(res.is_err());
    }
}
