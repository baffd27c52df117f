use std::io;
use thiserror::Error;

/// Per-frame decode failures. One bad frame never aborts a drain batch;
/// the acquisition loop recovers locally and moves on to the next record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame 0x{frame_type:02X}: payload too short ({actual} bytes, need {needed})")]
    Malformed {
        frame_type: u8,
        needed: usize,
        actual: usize,
    },
    #[error("unknown frame type 0x{0:02X}")]
    UnknownFrameType(u8),
    #[error("channel {channel}: gain code {gain} out of range (valid 0-3)")]
    CalibrationIndexOutOfRange { channel: usize, gain: u8 },
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("config error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid channel {channel} (device has {channel_num} channels)")]
    InvalidChannel { channel: usize, channel_num: usize },
}

pub type Result<T> = std::result::Result<T, DriverError>;
