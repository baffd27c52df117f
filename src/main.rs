use std::process::exit;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use itb_rs::{
    AnswerQueue, Device, DeviceOptions, MeasureMode, RawFrame, RequestKind, RequestPort,
    FRAME_ADC_SNAPSHOT, FRAME_CHANNEL_DATA, FRAME_DEVICE_PARAMS,
};

#[derive(Parser, Debug)]
#[command(name = "itb-demo", about = "Run the ITB acquisition core against a simulated instrument")]
struct Args {
    /// Number of measurement channels (1-4)
    #[arg(long, default_value_t = 2)]
    channels: usize,
    /// Number of read cycles to run
    #[arg(long, default_value_t = 10)]
    reads: usize,
    /// Pause between read cycles, milliseconds
    #[arg(long, default_value_t = 200)]
    period_ms: u64,
}

/// In-process stand-in for the serial transport: every submitted request is
/// answered immediately with a synthetic frame on the answer queue.
struct SimulatedInstrument {
    queue: Arc<AnswerQueue>,
    channels: usize,
    state: Mutex<SimState>,
}

struct SimState {
    tick: u32,
    meas_time_ms: u32,
    dead_time_ms: u32,
}

impl SimulatedInstrument {
    fn new(queue: Arc<AnswerQueue>, channels: usize) -> Self {
        Self {
            queue,
            channels,
            state: Mutex::new(SimState {
                tick: 0,
                meas_time_ms: 1000,
                dead_time_ms: 100,
            }),
        }
    }
}

impl RequestPort for SimulatedInstrument {
    fn submit(&self, kind: RequestKind, data: &[u8]) -> itb_rs::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            RequestKind::GetChannelData => {
                state.tick += 1;
                let mut payload = Vec::with_capacity(self.channels * 8);
                for ch in 0..self.channels as u32 {
                    let gain = (state.tick / 4 % 4) as u8;
                    let current = (100 + 10 * state.tick + 1000 * ch) as i16;
                    payload.push(gain);
                    payload.push(20 + ch as u8); // board temperature, °C
                    payload.extend_from_slice(&current.to_be_bytes());
                    payload.extend_from_slice(&(current + 5).to_be_bytes());
                    payload.extend_from_slice(&5i16.to_be_bytes());
                }
                self.queue.push(RawFrame::new(FRAME_CHANNEL_DATA, payload));
            }
            RequestKind::GetAdc => {
                let payload: Vec<u8> = (0..16u16)
                    .flat_map(|line| (line * 64 + state.tick as u16).to_be_bytes())
                    .collect();
                self.queue.push(RawFrame::new(FRAME_ADC_SNAPSHOT, payload));
            }
            RequestKind::ParamRead => {
                let mut payload = state.meas_time_ms.to_be_bytes().to_vec();
                payload.extend_from_slice(&state.dead_time_ms.to_be_bytes());
                self.queue.push(RawFrame::new(FRAME_DEVICE_PARAMS, payload));
            }
            RequestKind::ParamWrite => {
                if data.len() >= 8 {
                    state.meas_time_ms = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                    state.dead_time_ms = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                }
            }
            RequestKind::MeasureMode | RequestKind::DacSet | RequestKind::DebugStart => {
                info!("simulated instrument acknowledged {kind:?} ({} bytes)", data.len());
            }
        }
        Ok(())
    }
}

fn main() {
    itb_rs::init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let queue = AnswerQueue::new();
    let port = Arc::new(SimulatedInstrument::new(Arc::clone(&queue), args.channels.clamp(1, 4)));
    let options = DeviceOptions {
        channel_num: args.channels,
        ..DeviceOptions::default()
    };
    let device = Device::new(options, queue, port);

    // A realistic-looking calibration for the demo: nanoamp scale on KU=1.
    for ch in 0..device.channel_num() {
        for gain in 0..4u8 {
            let a = 1.0e-9 / 10f64.powi(gain as i32);
            device.set_calibration(ch, gain, a, 0.0)?;
        }
    }

    println!("{}", device.log_header());

    device.cmd_param_read()?;
    device.cmd_start_measure(MeasureMode::Cycle)?;

    for _ in 0..args.reads {
        device.cmd_read_channel_data()?;
        device.cmd_get_adc_data()?;
        thread::sleep(Duration::from_millis(args.period_ms));
        if device.take_redraw() {
            println!("{}", device.log_line());
        }
    }

    device.cmd_start_measure(MeasureMode::Stop)?;

    let params = device.parameters();
    println!(
        "parameters: measurement time {:.3} s, dead time {} ms",
        params.measurement_time_s, params.dead_time_ms
    );
    println!("decode errors: {}", device.decode_error_count());
    for (time, current) in device.channel_graph_data() {
        println!("{}: {} samples ({})", current.label, current.values.len(), time.label);
    }
    Ok(())
}
