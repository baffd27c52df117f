//! Background acquisition loop.
//!
//! One long-lived thread drains the transport's answer queue on a fixed tick
//! and feeds every drained frame to the decoder in arrival order. Decode
//! failures are isolated per record: the offending frame is counted and
//! logged, the batch continues, and nothing ever propagates out of the loop.
//! Cancellation is cooperative through a shared flag checked once per tick,
//! so stop latency is bounded by one tick interval. Stopped is terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::decode;
use crate::device::DeviceShared;
use crate::errors::DecodeError;
use crate::transport::AnswerQueue;

pub(crate) struct Acquisition {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acquisition {
    /// Spawn the loop thread in the Running state.
    pub(crate) fn spawn(
        queue: Arc<AnswerQueue>,
        shared: Arc<Mutex<DeviceShared>>,
        started: Instant,
        tick: Duration,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("itb-acq".to_string())
            .spawn(move || run_loop(queue, shared, started, tick, flag));
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!("failed to spawn acquisition thread: {e}");
                None
            }
        };
        Self { cancel, handle }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Request cancellation and join the thread. Idempotent; the loop exits
    /// within one tick of the flag being set.
    pub(crate) fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("acquisition thread panicked before join");
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    queue: Arc<AnswerQueue>,
    shared: Arc<Mutex<DeviceShared>>,
    started: Instant,
    tick: Duration,
    cancel: Arc<AtomicBool>,
) {
    debug!("acquisition loop running, tick {tick:?}");
    loop {
        thread::sleep(tick);

        // Atomic drain: the transport keeps appending to the emptied queue
        // while this batch is decoded.
        let batch = queue.drain();
        if !batch.is_empty() {
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            for frame in &batch {
                let now = started.elapsed().as_secs_f64();
                match decode::apply(&mut state, frame, now) {
                    Ok(()) => {}
                    Err(DecodeError::UnknownFrameType(t)) => {
                        debug!("ignoring unknown frame type 0x{t:02X}");
                    }
                    Err(e) => {
                        state.decode_errors += 1;
                        warn!("dropped frame: {e}");
                    }
                }
            }
        }

        if cancel.load(Ordering::Relaxed) {
            debug!("acquisition loop stopped");
            return;
        }
    }
}
