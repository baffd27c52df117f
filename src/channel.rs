//! Per-channel measurement state.
//!
//! Each physical channel keeps its latest decoded reading (overwritten in
//! place on every 0x03 frame), bounded histories of the plotted fields, and a
//! dirty flag that tells a display layer whether a redraw is worthwhile.
//! Only the acquisition loop mutates a `ChannelState`; consumers get
//! copy-on-read snapshots through the device.

use crate::history::History;

/// Display labels for the seven semantic channel fields, in reading order.
pub const CHANNEL_FIELD_LABELS: [&str; 7] = [
    "Time, s",
    "I, A",
    "T, °C",
    "Current, lsb",
    "Signal, lsb",
    "Zero, lsb",
    "Gain",
];

/// Latest decoded values for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelReading {
    /// Host clock at decode time, seconds since the device object was built.
    pub timestamp_s: f64,
    /// Calibrated current, `a[gain] * current_raw + b[gain]`.
    pub current_a: f64,
    pub temperature_c: i8,
    pub current_raw: i16,
    pub signal_raw: i16,
    pub zero_raw: i16,
    pub gain_code: u8,
}

impl ChannelReading {
    /// Field values in [`CHANNEL_FIELD_LABELS`] order, for tables and logs.
    pub fn values(&self) -> [f64; 7] {
        [
            self.timestamp_s,
            self.current_a,
            self.temperature_c as f64,
            self.current_raw as f64,
            self.signal_raw as f64,
            self.zero_raw as f64,
            self.gain_code as f64,
        ]
    }
}

/// Plot series that consumers may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphField {
    Time,
    Current,
}

/// A labelled, bounded snapshot of one plot series.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSeries {
    pub label: String,
    pub values: Vec<f64>,
}

#[derive(Debug)]
pub(crate) struct ChannelState {
    reading: ChannelReading,
    time_history: History,
    current_history: History,
    dirty: bool,
}

impl ChannelState {
    pub(crate) fn new(graph_capacity: usize) -> Self {
        Self {
            reading: ChannelReading::default(),
            time_history: History::new(graph_capacity),
            current_history: History::new(graph_capacity),
            dirty: false,
        }
    }

    /// Install a fresh reading: overwrite the latest values, extend the plot
    /// histories and mark the channel dirty. Decoder-only call path.
    pub(crate) fn record(&mut self, reading: ChannelReading) {
        self.reading = reading;
        self.time_history.push(reading.timestamp_s);
        self.current_history.push(reading.current_a);
        self.dirty = true;
    }

    pub(crate) fn reading(&self) -> ChannelReading {
        self.reading
    }

    /// Test-and-clear: true exactly once per successful decode since the
    /// last call.
    pub(crate) fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Clear the plot histories; the latest reading is untouched.
    pub(crate) fn reset_history(&mut self) {
        self.time_history.clear();
        self.current_history.clear();
    }

    pub(crate) fn series(&self, field: GraphField) -> GraphSeries {
        match field {
            GraphField::Time => GraphSeries {
                label: CHANNEL_FIELD_LABELS[0].to_string(),
                values: self.time_history.snapshot(),
            },
            GraphField::Current => GraphSeries {
                label: CHANNEL_FIELD_LABELS[1].to_string(),
                values: self.current_history.snapshot(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(t: f64, i: f64) -> ChannelReading {
        ChannelReading {
            timestamp_s: t,
            current_a: i,
            ..ChannelReading::default()
        }
    }

    #[test]
    fn record_overwrites_reading_and_extends_history() {
        let mut ch = ChannelState::new(10);
        ch.record(reading(1.0, 0.5));
        ch.record(reading(2.0, 0.7));
        assert_eq!(ch.reading().current_a, 0.7);
        assert_eq!(ch.series(GraphField::Time).values, vec![1.0, 2.0]);
        assert_eq!(ch.series(GraphField::Current).values, vec![0.5, 0.7]);
    }

    #[test]
    fn redraw_flag_is_test_and_clear() {
        let mut ch = ChannelState::new(10);
        assert!(!ch.take_redraw());
        ch.record(reading(1.0, 0.0));
        assert!(ch.take_redraw());
        assert!(!ch.take_redraw());
        ch.record(reading(2.0, 0.0));
        ch.record(reading(3.0, 0.0));
        assert!(ch.take_redraw());
        assert!(!ch.take_redraw());
    }

    #[test]
    fn reset_history_preserves_latest_reading() {
        let mut ch = ChannelState::new(10);
        ch.record(reading(5.0, 1.25));
        ch.reset_history();
        assert!(ch.series(GraphField::Current).values.is_empty());
        assert_eq!(ch.reading().current_a, 1.25);
        assert_eq!(ch.reading().timestamp_s, 5.0);
    }

    #[test]
    fn histories_stay_bounded() {
        let mut ch = ChannelState::new(3);
        for n in 0..7 {
            ch.record(reading(n as f64, 0.0));
        }
        assert_eq!(ch.series(GraphField::Time).values, vec![4.0, 5.0, 6.0]);
    }
}
