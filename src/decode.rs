//! Answer-frame decoder.
//!
//! Pure state transition: `(frame_type, payload)` plus a decode-time clock
//! reading in, mutations of the shared device state out. Payloads shorter than a
//! full frame truncate to the complete records they can supply and never
//! index past the available bytes; unknown frame types are reported but
//! treated as ignorable for forward compatibility.

use crate::channel::ChannelReading;
use crate::device::{DeviceShared, ADC_LINES};
use crate::errors::DecodeError;
use crate::transport::RawFrame;

/// Raw ADC snapshot: big-endian u16 per line.
pub const FRAME_ADC_SNAPSHOT: u8 = 0x01;
/// Per-channel measurement data: fixed 8-byte records in channel order.
pub const FRAME_CHANNEL_DATA: u8 = 0x03;
/// Measurement parameters: two big-endian u32 millisecond fields.
pub const FRAME_DEVICE_PARAMS: u8 = 0x06;

const CHANNEL_RECORD_LEN: usize = 8;
const PARAMS_LEN: usize = 8;

/// Apply one answer frame to the device state.
///
/// `timestamp_s` is the host clock read for this decode, in seconds since
/// device construction. Errors leave the rest of the batch unaffected; for
/// channel data a bad gain code skips only that channel's reading while the
/// remaining channels still decode.
pub(crate) fn apply(
    state: &mut DeviceShared,
    frame: &RawFrame,
    timestamp_s: f64,
) -> Result<(), DecodeError> {
    match frame.frame_type {
        FRAME_ADC_SNAPSHOT => apply_adc_snapshot(state, &frame.payload, timestamp_s),
        FRAME_CHANNEL_DATA => apply_channel_data(state, &frame.payload, timestamp_s),
        FRAME_DEVICE_PARAMS => apply_parameters(state, &frame.payload),
        other => Err(DecodeError::UnknownFrameType(other)),
    }
}

fn apply_adc_snapshot(
    state: &mut DeviceShared,
    payload: &[u8],
    timestamp_s: f64,
) -> Result<(), DecodeError> {
    // Oversized payloads are truncated to the available slots, short ones
    // fill what they can. Both are non-fatal.
    let lines = (payload.len() / 2).min(ADC_LINES);
    for i in 0..lines {
        state.adc_snapshot[i] = u16::from_be_bytes([payload[2 * i], payload[2 * i + 1]]);
    }
    // TODO: map ADC lines onto voltage/consumption/temperature readings once
    // the line assignment is settled in the firmware docs.
    state.readings.time_s = timestamp_s;
    state.time_history.push(state.readings.time_s);
    state.voltage_history.push(state.readings.voltage_v);
    state.consumption_history.push(state.readings.consumption_ma);
    Ok(())
}

fn apply_channel_data(
    state: &mut DeviceShared,
    payload: &[u8],
    timestamp_s: f64,
) -> Result<(), DecodeError> {
    let records = (payload.len() / CHANNEL_RECORD_LEN).min(state.channels.len());
    if records == 0 {
        return Err(DecodeError::Malformed {
            frame_type: FRAME_CHANNEL_DATA,
            needed: CHANNEL_RECORD_LEN,
            actual: payload.len(),
        });
    }

    let mut first_err = None;
    for num in 0..records {
        let rec = &payload[num * CHANNEL_RECORD_LEN..(num + 1) * CHANNEL_RECORD_LEN];
        let gain_code = rec[0];
        let entry = match state.calibration.lookup(num, gain_code) {
            Ok(entry) => entry,
            Err(e) => {
                // Skip this channel's reading, keep decoding the others.
                first_err.get_or_insert(e);
                continue;
            }
        };
        let current_raw = i16::from_be_bytes([rec[2], rec[3]]);
        let reading = ChannelReading {
            timestamp_s,
            current_a: entry.apply(current_raw),
            temperature_c: rec[1] as i8,
            current_raw,
            signal_raw: i16::from_be_bytes([rec[4], rec[5]]),
            zero_raw: i16::from_be_bytes([rec[6], rec[7]]),
            gain_code,
        };
        state.channels[num].record(reading);
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn apply_parameters(state: &mut DeviceShared, payload: &[u8]) -> Result<(), DecodeError> {
    if payload.len() < PARAMS_LEN {
        return Err(DecodeError::Malformed {
            frame_type: FRAME_DEVICE_PARAMS,
            needed: PARAMS_LEN,
            actual: payload.len(),
        });
    }
    let meas_ms = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let dead_ms = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    state.params.measurement_time_s = meas_ms as f64 / 1000.0;
    state.params.dead_time_ms = dead_ms;
    Ok(())
}
