//! Interface to the serial transport collaborator.
//!
//! The byte-level link (framing, CRC, reconnect) lives outside this crate.
//! What the core sees is already de-framed: the transport validates incoming
//! bytes and appends `(frame_type, payload)` records to a shared
//! [`AnswerQueue`], and accepts fire-and-forget command submissions through
//! [`RequestPort`]. The queue is the only object touched by both the
//! transport's receive path and the acquisition loop, so one lock guards it
//! and a drain is a single atomic take-and-clear.

use std::mem;
use std::sync::{Arc, Mutex};

use crate::errors::Result;

/// One de-framed, CRC-validated answer received from the instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub frame_type: u8,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(frame_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }
}

/// Shared inbound queue: the transport is the sole writer, the acquisition
/// loop the sole drainer.
#[derive(Debug, Default)]
pub struct AnswerQueue {
    inner: Mutex<Vec<RawFrame>>,
}

impl AnswerQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append one answer. Called from the transport's receive thread.
    pub fn push(&self, frame: RawFrame) {
        self.lock().push(frame);
    }

    /// Take every queued answer and leave the queue empty, as one indivisible
    /// step relative to concurrent pushes. No record is lost or read twice.
    pub fn drain(&self) -> Vec<RawFrame> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RawFrame>> {
        // A poisoned queue only means a pusher panicked mid-append; the
        // records already stored are still well-formed.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Request types the instrument understands, named after the protocol
/// operations. Byte encoding of the arguments is the device's job
/// (see `Device::cmd_*`); wire framing is the transport's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    GetAdc,
    MeasureMode,
    GetChannelData,
    DacSet,
    ParamWrite,
    ParamRead,
    DebugStart,
}

/// Command-submission half of the transport. Submission is fire and forget:
/// the matching answer, if any, arrives later on the [`AnswerQueue`].
pub trait RequestPort: Send + Sync {
    fn submit(&self, kind: RequestKind, data: &[u8]) -> Result<()>;
}

/// A port that drops every request. Useful when only the inbound path is
/// exercised (log replay, decoding tests).
#[derive(Debug, Default)]
pub struct NullPort;

impl RequestPort for NullPort {
    fn submit(&self, _kind: RequestKind, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every submission for assertion in tests.
    #[derive(Debug, Default)]
    pub struct RecordingPort {
        pub submitted: Mutex<Vec<(RequestKind, Vec<u8>)>>,
    }

    impl RequestPort for RecordingPort {
        fn submit(&self, kind: RequestKind, data: &[u8]) -> Result<()> {
            self.submitted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((kind, data.to_vec()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drain_takes_everything_and_clears() {
        let queue = AnswerQueue::new();
        queue.push(RawFrame::new(0x01, vec![0, 1]));
        queue.push(RawFrame::new(0x03, vec![2, 3]));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].frame_type, 0x01);
        assert_eq!(drained[1].frame_type, 0x03);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn concurrent_drains_observe_each_record_exactly_once_in_order() {
        const N: u16 = 2000;
        let queue = AnswerQueue::new();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..N {
                    queue.push(RawFrame::new(0x03, n.to_be_bytes().to_vec()));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < N as usize {
            for frame in queue.drain() {
                seen.push(u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
            }
            thread::yield_now();
        }
        producer.join().unwrap();

        assert!(queue.is_empty());
        assert_eq!(seen, (0..N).collect::<Vec<_>>());
    }
}
