//! Acquisition core for the ITB multi-channel current measurement unit.
//!
//! The ITB streams binary answer frames over a serial link: raw ADC
//! snapshots, per-channel current measurements and measurement parameters.
//! This crate owns everything between the de-framed byte records and the
//! consumer-facing telemetry:
//!
//! - a background acquisition loop that drains the transport's answer queue
//!   on a fixed tick and decodes each frame in arrival order,
//! - the [`decode`] step mapping frame payloads onto typed device and
//!   channel state,
//! - per-channel, per-gain linear [`calibration`] of raw current counts,
//! - bounded FIFO [`history`] buffers feeding plots and logs, with
//!   per-channel dirty flags so a display layer can skip redundant redraws.
//!
//! The byte-level transport (framing, CRC, reconnect) and any GUI are
//! external collaborators: the transport pushes `(frame_type, payload)`
//! records into a shared [`AnswerQueue`] and accepts fire-and-forget command
//! submissions through [`RequestPort`]; consumers poll copy-on-read
//! snapshots at their own pace.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use itb_rs::{AnswerQueue, Device, DeviceOptions, NullPort, RawFrame};
//!
//! let queue = AnswerQueue::new();
//! let device = Device::new(DeviceOptions::default(), Arc::clone(&queue), Arc::new(NullPort));
//!
//! // The transport would push de-framed answers as they arrive:
//! queue.push(RawFrame::new(0x03, vec![0, 5, 0, 100, 0, 0, 0, 0]));
//!
//! // Consumers poll snapshots and the redraw flag on their own schedule.
//! let _ = device.take_redraw();
//! ```

mod acquisition;
pub mod calibration;
pub mod channel;
pub mod decode;
pub mod device;
pub mod errors;
pub mod history;
pub mod logging;
pub mod transport;

pub use calibration::{CalibrationEntry, CalibrationTable, GAIN_FACTORS, GAIN_LEVELS};
pub use channel::{ChannelReading, GraphField, GraphSeries, CHANNEL_FIELD_LABELS};
pub use decode::{FRAME_ADC_SNAPSHOT, FRAME_CHANNEL_DATA, FRAME_DEVICE_PARAMS};
pub use device::{
    Device, DeviceGraphField, DeviceOptions, DeviceParameters, DeviceReadings, GeneralParameters,
    MeasureMode, ADC_LINES, DEVICE_FIELD_LABELS, MAX_CHANNELS,
};
pub use errors::{DecodeError, DriverError, Result};
pub use history::{History, DEFAULT_GRAPH_CAPACITY};
pub use logging::init_logging;
pub use transport::{AnswerQueue, NullPort, RawFrame, RequestKind, RequestPort};
