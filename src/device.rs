//! ITB device object: owned state, command submission and consumer snapshots.
//!
//! The device aggregates one channel-state record per measurement channel plus
//! device-level readings and parameters. All of it sits behind one mutex that
//! is written only by the acquisition loop; every accessor here copies data
//! out under a short lock so consumers (GUI tables, loggers) never hold a
//! reference into memory the loop is about to mutate.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;

use crate::acquisition::Acquisition;
use crate::calibration::CalibrationTable;
use crate::channel::{ChannelReading, ChannelState, GraphField, GraphSeries, CHANNEL_FIELD_LABELS};
use crate::errors::{DriverError, Result};
use crate::history::{History, DEFAULT_GRAPH_CAPACITY};
use crate::transport::{AnswerQueue, RequestKind, RequestPort};

/// Hardware limit on measurement channels.
pub const MAX_CHANNELS: usize = 4;

/// Number of raw ADC lines reported by a 0x01 snapshot frame.
pub const ADC_LINES: usize = 16;

/// Display labels for the five device-level readings.
pub const DEVICE_FIELD_LABELS: [&str; 5] = [
    "Time, s",
    "Voltage, V",
    "Consumption, mA",
    "MCU temperature, °C",
    "Substrate voltage, V",
];

/// Recognized construction options. Every field has a stated default;
/// `Default` gives a complete working configuration.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// USB serial numbers accepted when the transport probes for ports.
    /// Empty means any. Default: empty.
    pub serial_numbers: Vec<String>,
    /// Explicit port path override for the transport. Default: none (probe).
    pub port: Option<String>,
    /// Serial link speed handed to the transport. Default: 9600.
    pub baudrate: u32,
    /// Transport read timeout. Default: 1 s.
    pub timeout: Duration,
    /// Verbose transport tracing. Default: false.
    pub debug: bool,
    /// Whether the transport validates answer CRCs. Default: true.
    pub crc_check: bool,
    /// Measurement channels fitted, 1..=4. Out-of-range values are clamped.
    /// Default: 2.
    pub channel_num: usize,
    /// Samples retained per plot series. Default: 1000.
    pub graph_capacity: usize,
    /// Acquisition loop tick. Default: 10 ms.
    pub poll_interval: Duration,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            serial_numbers: Vec::new(),
            port: None,
            baudrate: 9600,
            timeout: Duration::from_secs(1),
            debug: false,
            crc_check: true,
            channel_num: 2,
            graph_capacity: DEFAULT_GRAPH_CAPACITY,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Measurement parameters mirrored from the instrument (0x06 answers) or
/// staged by [`Device::set_parameters`] before a parameter write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceParameters {
    pub measurement_time_s: f64,
    pub dead_time_ms: u32,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            measurement_time_s: 1.0,
            dead_time_ms: 100,
        }
    }
}

/// Device-level readings in [`DEVICE_FIELD_LABELS`] order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceReadings {
    pub time_s: f64,
    pub voltage_v: f64,
    pub consumption_ma: f64,
    pub mcu_temperature_c: f64,
    pub substrate_voltage_v: f64,
}

impl DeviceReadings {
    pub fn values(&self) -> [f64; 5] {
        [
            self.time_s,
            self.voltage_v,
            self.consumption_ma,
            self.mcu_temperature_c,
            self.substrate_voltage_v,
        ]
    }
}

/// Device-level plot series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceGraphField {
    Time,
    Voltage,
    Consumption,
}

/// Identity persisted alongside calibration in the device config.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralParameters {
    pub fabrication_number: String,
    pub address: u8,
}

impl Default for GeneralParameters {
    fn default() -> Self {
        Self {
            fabrication_number: "0".to_string(),
            address: 1,
        }
    }
}

/// State shared between the acquisition loop (sole writer) and consumers.
#[derive(Debug)]
pub(crate) struct DeviceShared {
    pub(crate) channels: Vec<ChannelState>,
    pub(crate) calibration: CalibrationTable,
    pub(crate) adc_snapshot: [u16; ADC_LINES],
    pub(crate) params: DeviceParameters,
    pub(crate) readings: DeviceReadings,
    pub(crate) time_history: History,
    pub(crate) voltage_history: History,
    pub(crate) consumption_history: History,
    pub(crate) decode_errors: u64,
    pub(crate) general: GeneralParameters,
}

impl DeviceShared {
    pub(crate) fn new(channel_num: usize, graph_capacity: usize) -> Self {
        Self {
            channels: (0..channel_num)
                .map(|_| ChannelState::new(graph_capacity))
                .collect(),
            calibration: CalibrationTable::new(channel_num),
            adc_snapshot: [0; ADC_LINES],
            params: DeviceParameters::default(),
            readings: DeviceReadings::default(),
            time_history: History::new(graph_capacity),
            voltage_history: History::new(graph_capacity),
            consumption_history: History::new(graph_capacity),
            decode_errors: 0,
            general: GeneralParameters::default(),
        }
    }
}

/// Driver object for one ITB unit.
///
/// Construction spawns the acquisition loop; it runs until [`Device::close`]
/// (or drop). Stopped is terminal: build a new `Device` for a new run.
///
/// # Example
/// ```ignore
/// let queue = AnswerQueue::new();
/// let device = Device::new(DeviceOptions::default(), Arc::clone(&queue), port);
/// device.cmd_start_measure(MeasureMode::Cycle)?;
/// // transport pushes answers into `queue`; poll snapshots at your own pace
/// if device.take_redraw() {
///     let series = device.channel_graph_data();
/// }
/// ```
pub struct Device {
    options: DeviceOptions,
    shared: Arc<Mutex<DeviceShared>>,
    queue: Arc<AnswerQueue>,
    port: Arc<dyn RequestPort>,
    acquisition: Acquisition,
    started: Instant,
}

/// Measurement trigger modes for [`Device::cmd_start_measure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureMode {
    Stop = 0x00,
    Cycle = 0x01,
    Single = 0x02,
}

impl Device {
    /// Build the device state and start the acquisition loop on `queue`.
    pub fn new(
        mut options: DeviceOptions,
        queue: Arc<AnswerQueue>,
        port: Arc<dyn RequestPort>,
    ) -> Self {
        options.channel_num = options.channel_num.clamp(1, MAX_CHANNELS);
        let shared = Arc::new(Mutex::new(DeviceShared::new(
            options.channel_num,
            options.graph_capacity,
        )));
        let started = Instant::now();
        let acquisition = Acquisition::spawn(
            Arc::clone(&queue),
            Arc::clone(&shared),
            started,
            options.poll_interval,
        );
        debug!(
            "device up: {} channels, graph capacity {}, tick {:?}",
            options.channel_num, options.graph_capacity, options.poll_interval
        );
        Self {
            options,
            shared,
            queue,
            port,
            acquisition,
            started,
        }
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn channel_num(&self) -> usize {
        self.options.channel_num
    }

    /// Seconds since this device object was constructed; the timestamp base
    /// used for every decoded reading.
    pub fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Queue handle for transports and tests that feed answers in directly.
    pub fn answer_queue(&self) -> Arc<AnswerQueue> {
        Arc::clone(&self.queue)
    }

    fn lock(&self) -> MutexGuard<'_, DeviceShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Command submission (fire and forget)
    // ------------------------------------------------------------------

    /// Request a raw ADC snapshot (answered by a 0x01 frame).
    pub fn cmd_get_adc_data(&self) -> Result<()> {
        self.port.submit(RequestKind::GetAdc, &[])
    }

    /// Select the measurement trigger mode.
    pub fn cmd_start_measure(&self, mode: MeasureMode) -> Result<()> {
        self.port.submit(RequestKind::MeasureMode, &[mode as u8])
    }

    /// Request per-channel measurement data (answered by a 0x03 frame).
    pub fn cmd_read_channel_data(&self) -> Result<()> {
        self.port.submit(RequestKind::GetChannelData, &[])
    }

    /// Program both DAC outputs, volts in, millivolts on the wire
    /// (two big-endian u16 fields).
    pub fn cmd_dac_set(&self, dac_ch1_v: f64, dac_ch2_v: f64) -> Result<()> {
        let ch1 = volts_to_mv(dac_ch1_v);
        let ch2 = volts_to_mv(dac_ch2_v);
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&ch1.to_be_bytes());
        data.extend_from_slice(&ch2.to_be_bytes());
        self.port.submit(RequestKind::DacSet, &data)
    }

    /// Write the currently staged measurement parameters to the instrument:
    /// measurement time and dead time, both as big-endian u32 milliseconds.
    pub fn cmd_param_write(&self) -> Result<()> {
        let params = self.parameters();
        let meas_ms = (params.measurement_time_s * 1000.0).round().max(0.0) as u32;
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&meas_ms.to_be_bytes());
        data.extend_from_slice(&params.dead_time_ms.to_be_bytes());
        self.port.submit(RequestKind::ParamWrite, &data)
    }

    /// Request the instrument's measurement parameters (answered by 0x06).
    pub fn cmd_param_read(&self) -> Result<()> {
        self.port.submit(RequestKind::ParamRead, &[])
    }

    /// Start a debug acquisition on one channel with a forced gain and zero.
    pub fn cmd_debug_start(&self, channel: u8, gain: u8, zero: u8) -> Result<()> {
        self.port
            .submit(RequestKind::DebugStart, &[channel, gain, zero])
    }

    // ------------------------------------------------------------------
    // Parameters and calibration
    // ------------------------------------------------------------------

    /// Stage measurement parameters; `cmd_param_write` sends them.
    pub fn set_parameters(&self, measurement_time_s: f64, dead_time_ms: u32) {
        let mut state = self.lock();
        state.params = DeviceParameters {
            measurement_time_s,
            dead_time_ms,
        };
    }

    pub fn parameters(&self) -> DeviceParameters {
        self.lock().params
    }

    pub fn set_calibration(&self, channel: usize, gain_code: u8, a: f64, b: f64) -> Result<()> {
        self.lock().calibration.set(channel, gain_code, a, b)
    }

    /// Copy of the full calibration table.
    pub fn calibration(&self) -> CalibrationTable {
        self.lock().calibration.clone()
    }

    pub fn general_parameters(&self) -> GeneralParameters {
        self.lock().general.clone()
    }

    pub fn set_general_parameters(&self, general: GeneralParameters) {
        self.lock().general = general;
    }

    /// Render device config text: calibration sections followed by the
    /// general-parameters section. File I/O is the caller's concern.
    pub fn export_config(&self) -> String {
        let state = self.lock();
        let mut out = state.calibration.to_config_string();
        out.push_str("[General parameters]\n");
        out.push_str(&format!(
            "fabrication number = {}\n",
            state.general.fabrication_number
        ));
        out.push_str(&format!("address = {}\n", state.general.address));
        out
    }

    /// Apply config text produced by [`Device::export_config`]. Sections that
    /// are absent keep their current values.
    pub fn import_config(&self, text: &str) -> Result<()> {
        let mut state = self.lock();
        state.calibration.apply_config_string(text)?;

        let mut in_general = false;
        for line in text.lines() {
            let line = line.trim();
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_general = header == "General parameters";
                continue;
            }
            if !in_general {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "fabrication number" => state.general.fabrication_number = value.to_string(),
                "address" => {
                    state.general.address = value.parse().map_err(|_| {
                        DriverError::Config(format!("bad device address {value:?}"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consumer snapshots
    // ------------------------------------------------------------------

    /// Latest reading of one channel.
    pub fn channel_reading(&self, channel: usize) -> Result<ChannelReading> {
        let state = self.lock();
        state
            .channels
            .get(channel)
            .map(|ch| ch.reading())
            .ok_or(DriverError::InvalidChannel {
                channel,
                channel_num: state.channels.len(),
            })
    }

    pub fn device_readings(&self) -> DeviceReadings {
        self.lock().readings
    }

    pub fn adc_snapshot(&self) -> [u16; ADC_LINES] {
        self.lock().adc_snapshot
    }

    /// Count of malformed-frame decode failures since construction.
    /// Unknown frame types are ignored, not counted.
    pub fn decode_error_count(&self) -> u64 {
        self.lock().decode_errors
    }

    /// One plot series of one channel, label prefixed with `K{n}:`.
    pub fn channel_series(&self, channel: usize, field: GraphField) -> Result<GraphSeries> {
        let state = self.lock();
        let ch = state
            .channels
            .get(channel)
            .ok_or(DriverError::InvalidChannel {
                channel,
                channel_num: state.channels.len(),
            })?;
        let mut series = ch.series(field);
        series.label = format!("K{channel}: {}", series.label);
        Ok(series)
    }

    /// (time, current) series pairs for every channel, ready for plotting.
    pub fn channel_graph_data(&self) -> Vec<(GraphSeries, GraphSeries)> {
        let state = self.lock();
        state
            .channels
            .iter()
            .enumerate()
            .map(|(num, ch)| {
                let time = ch.series(GraphField::Time);
                let mut current = ch.series(GraphField::Current);
                current.label = format!("K{num}: {}", current.label);
                (time, current)
            })
            .collect()
    }

    /// One device-level plot series.
    pub fn device_series(&self, field: DeviceGraphField) -> GraphSeries {
        let state = self.lock();
        let (label, history) = match field {
            DeviceGraphField::Time => (DEVICE_FIELD_LABELS[0], &state.time_history),
            DeviceGraphField::Voltage => (DEVICE_FIELD_LABELS[1], &state.voltage_history),
            DeviceGraphField::Consumption => (DEVICE_FIELD_LABELS[2], &state.consumption_history),
        };
        GraphSeries {
            label: label.to_string(),
            values: history.snapshot(),
        }
    }

    /// Redraw check across all channels, test-and-clear. True when any
    /// channel decoded fresh data since the last call; clears every flag.
    pub fn take_redraw(&self) -> bool {
        let mut state = self.lock();
        let mut redraw = false;
        for ch in state.channels.iter_mut() {
            if ch.take_redraw() {
                redraw = true;
            }
        }
        redraw
    }

    /// Per-channel redraw flag, test-and-clear.
    pub fn channel_redraw(&self, channel: usize) -> Result<bool> {
        let mut state = self.lock();
        let channel_num = state.channels.len();
        state
            .channels
            .get_mut(channel)
            .map(|ch| ch.take_redraw())
            .ok_or(DriverError::InvalidChannel {
                channel,
                channel_num,
            })
    }

    /// Clear every plot history, channel and device level. Latest readings
    /// survive ("reset graphs" action).
    pub fn reset_graph_data(&self) {
        let mut state = self.lock();
        for ch in state.channels.iter_mut() {
            ch.reset_history();
        }
        state.time_history.clear();
        state.voltage_history.clear();
        state.consumption_history.clear();
    }

    // ------------------------------------------------------------------
    // Log formatting
    // ------------------------------------------------------------------

    /// Semicolon-joined column titles for a CSV-ish log file: device fields
    /// first, then every channel's fields with a `K{n}:` prefix.
    pub fn log_header(&self) -> String {
        let mut out = DEVICE_FIELD_LABELS.join(";");
        out.push(';');
        for num in 0..self.channel_num() {
            for label in CHANNEL_FIELD_LABELS {
                out.push_str(&format!("K{num}: {label};"));
            }
        }
        out
    }

    /// One log row matching [`Device::log_header`].
    pub fn log_line(&self) -> String {
        let state = self.lock();
        let mut out = String::new();
        for value in state.readings.values() {
            out.push_str(&fmt_value(value));
            out.push(';');
        }
        for ch in state.channels.iter() {
            for value in ch.reading().values() {
                out.push_str(&fmt_value(value));
                out.push(';');
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Whether the acquisition loop is still in its Running state.
    pub fn is_running(&self) -> bool {
        self.acquisition.is_running()
    }

    /// Cancel the acquisition loop and join its thread. Idempotent; also runs
    /// on drop. The loop cannot be restarted afterwards.
    pub fn close(&mut self) {
        self.acquisition.stop();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}

fn volts_to_mv(volts: f64) -> u16 {
    (volts * 1000.0).round().clamp(0.0, u16::MAX as f64) as u16
}

/// Roughly three significant digits, switching to exponent notation outside
/// a comfortable fixed-point range.
fn fmt_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && (magnitude < 1e-3 || magnitude >= 1e4) {
        format!("{value:.3e}")
    } else {
        format!("{value:.3}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingPort;
    use crate::transport::RawFrame;

    fn device_with_port(channel_num: usize) -> (Device, Arc<RecordingPort>) {
        let port = Arc::new(RecordingPort::default());
        let options = DeviceOptions {
            channel_num,
            poll_interval: Duration::from_millis(1),
            ..DeviceOptions::default()
        };
        let device = Device::new(options, AnswerQueue::new(), port.clone());
        (device, port)
    }

    fn submissions(port: &RecordingPort) -> Vec<(RequestKind, Vec<u8>)> {
        port.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[test]
    fn channel_num_is_clamped_to_hardware_limit() {
        let (device, _) = device_with_port(9);
        assert_eq!(device.channel_num(), MAX_CHANNELS);
    }

    #[test]
    fn measure_mode_bytes_match_protocol() {
        let (device, port) = device_with_port(2);
        device.cmd_start_measure(MeasureMode::Stop).unwrap();
        device.cmd_start_measure(MeasureMode::Cycle).unwrap();
        device.cmd_start_measure(MeasureMode::Single).unwrap();
        let sent = submissions(&port);
        assert_eq!(sent[0], (RequestKind::MeasureMode, vec![0x00]));
        assert_eq!(sent[1], (RequestKind::MeasureMode, vec![0x01]));
        assert_eq!(sent[2], (RequestKind::MeasureMode, vec![0x02]));
    }

    #[test]
    fn dac_set_encodes_millivolts_big_endian() {
        let (device, port) = device_with_port(2);
        device.cmd_dac_set(1.0, 0.25).unwrap();
        let sent = submissions(&port);
        assert_eq!(sent[0], (RequestKind::DacSet, vec![0x03, 0xE8, 0x00, 0xFA]));
    }

    #[test]
    fn param_write_encodes_milliseconds_big_endian() {
        let (device, port) = device_with_port(2);
        device.set_parameters(2.0, 50);
        device.cmd_param_write().unwrap();
        let sent = submissions(&port);
        assert_eq!(
            sent[0],
            (
                RequestKind::ParamWrite,
                vec![0x00, 0x00, 0x07, 0xD0, 0x00, 0x00, 0x00, 0x32]
            )
        );
    }

    #[test]
    fn debug_start_passes_raw_bytes() {
        let (device, port) = device_with_port(2);
        device.cmd_debug_start(1, 3, 7).unwrap();
        assert_eq!(
            submissions(&port)[0],
            (RequestKind::DebugStart, vec![1, 3, 7])
        );
    }

    #[test]
    fn log_header_and_line_are_aligned() {
        let (device, _) = device_with_port(2);
        let columns = device.log_header().split(';').count();
        let values = device.log_line().split(';').count();
        assert_eq!(columns, values);
        // 5 device fields + 7 per channel, plus the empty tail after the
        // final separator.
        assert_eq!(columns, 5 + 2 * 7 + 1);
        assert!(device.log_header().contains("K1: I, A"));
    }

    #[test]
    fn config_round_trips_calibration_and_general_parameters() {
        let (device, _) = device_with_port(2);
        device.set_calibration(0, 0, 2.0, 1.0).unwrap();
        device.set_calibration(1, 3, -3.5e-9, 1.25e-11).unwrap();
        device.set_general_parameters(GeneralParameters {
            fabrication_number: "207733835048".to_string(),
            address: 7,
        });
        let text = device.export_config();

        let (other, _) = device_with_port(2);
        other.import_config(&text).unwrap();
        assert_eq!(other.calibration(), device.calibration());
        assert_eq!(other.general_parameters(), device.general_parameters());
    }

    #[test]
    fn graph_series_labels_carry_channel_prefix() {
        let (device, _) = device_with_port(2);
        let series = device.channel_series(1, GraphField::Current).unwrap();
        assert_eq!(series.label, "K1: I, A");
        assert!(series.values.is_empty());
        assert!(device.channel_series(2, GraphField::Time).is_err());
    }

    #[test]
    fn redraw_after_decoded_frame_clears_once() {
        let (device, _) = device_with_port(1);
        let queue = device.answer_queue();
        // One channel record: gain 0, temp 5, current 100, signal 0, zero 0.
        queue.push(RawFrame::new(
            0x03,
            vec![0x00, 0x05, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00],
        ));
        wait_until(|| device.channel_reading(0).unwrap().current_raw == 100);
        assert!(device.take_redraw());
        assert!(!device.take_redraw());
    }

    #[test]
    fn reset_graph_data_clears_series_but_keeps_reading() {
        let (device, _) = device_with_port(1);
        let queue = device.answer_queue();
        queue.push(RawFrame::new(
            0x03,
            vec![0x01, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00],
        ));
        wait_until(|| device.channel_reading(0).unwrap().current_raw == 10);
        device.reset_graph_data();
        assert!(device
            .channel_series(0, GraphField::Current)
            .unwrap()
            .values
            .is_empty());
        assert_eq!(device.channel_reading(0).unwrap().current_raw, 10);
    }

    /// Spin until `cond` holds, or panic after a generous deadline.
    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            if Instant::now() > deadline {
                panic!("condition not reached within deadline");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
