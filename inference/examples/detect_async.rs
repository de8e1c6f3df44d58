/// Asynchronous SSD detection demo with live mode switching
///
/// Streams synthetic frames through the scheduler:
/// - PRIMARY mode keeps several frames in flight for throughput
/// - LOW-LATENCY mode keeps a single frame in flight
/// - Results are always rendered in capture order
///
/// Controls (with --interactive): type `t` + Enter to switch modes, `q` + Enter to quit.
///
/// Usage:
///   cargo run --release --example detect_async -- --frames 300
///   cargo run --release --example detect_async -- --interactive --primary-slots 6
///   cargo run --release --example detect_async -- --toggle-every-ms 2000 --report run.json
///   cargo run --release --example detect_async -- --config scheduler.json --raw --frames 20
///   cargo run --release --example detect_async -- --frames 120 --loop-input --interactive
use clap::Parser;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, TryRecvError};
use frame_scheduler::simulated::{spawn_capture, Frame, SimulatedSsd, SimulatedSsdConfig, SyntheticSource};
use frame_scheduler::{
    Delivery, DeliveryContext, Dispatcher, FrameConsumer, Labels, Mode, PendingResult,
    SchedulerConfig, SsdDecoder, StreamExecutor,
};
use ndarray::Array2;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "detect_async", about = "Asynchronous SSD detection with live mode switching")]
struct Args {
    /// Number of frames to capture (runs until `q` when omitted)
    #[arg(short = 'n', long = "frames", value_name = "COUNT")]
    frames: Option<u64>,

    /// Frame width
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    width: u32,

    /// Frame height
    #[arg(long = "height", value_name = "PX", default_value_t = 360)]
    height: u32,

    /// Capture rate
    #[arg(long = "fps", value_name = "FPS", default_value_t = 30.0)]
    fps: f64,

    /// Replay the clip from its first frame when --frames runs out
    #[arg(long = "loop-input", action = clap::ArgAction::SetTrue)]
    loop_input: bool,

    /// JSON scheduler configuration; pool flags below override it
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Slots of the primary pool
    #[arg(long = "primary-slots", value_name = "N")]
    primary_slots: Option<usize>,

    /// Executor streams of the primary pool
    #[arg(long = "primary-streams", value_name = "N")]
    primary_streams: Option<usize>,

    /// Slots of the low-latency pool
    #[arg(long = "low-latency-slots", value_name = "N")]
    low_latency_slots: Option<usize>,

    /// Start in low-latency mode
    #[arg(long = "low-latency", action = clap::ArgAction::SetTrue)]
    low_latency: bool,

    /// Mean simulated inference time
    #[arg(long = "latency-ms", value_name = "MS", default_value_t = 40)]
    latency_ms: u64,

    /// Spread of simulated inference time
    #[arg(long = "jitter-ms", value_name = "MS", default_value_t = 15)]
    jitter_ms: u64,

    /// Fail inference on this frame (error path demo)
    #[arg(long = "fail-at", value_name = "FRAME")]
    fail_at: Option<u64>,

    /// Confidence threshold for rendered detections
    #[arg(short = 't', long = "threshold", value_name = "PROB", default_value_t = 0.5)]
    threshold: f32,

    /// Whitespace separated class labels
    #[arg(long = "labels", value_name = "PATH")]
    labels: Option<PathBuf>,

    /// Print every raw proposal
    #[arg(long = "raw", action = clap::ArgAction::SetTrue)]
    raw: bool,

    /// Switch modes periodically
    #[arg(long = "toggle-every-ms", value_name = "MS")]
    toggle_every_ms: Option<u64>,

    /// Read `t` / `q` commands from stdin
    #[arg(long = "interactive", action = clap::ArgAction::SetTrue)]
    interactive: bool,

    /// Write the run summary as JSON
    #[arg(long = "report", value_name = "PATH")]
    report: Option<PathBuf>,
}

impl Args {
    fn scheduler_config(&self) -> frame_scheduler::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_json_file(path)?,
            None => SchedulerConfig::default(),
        };
        if let Some(slots) = self.primary_slots {
            config.primary.slots = slots;
        }
        if let Some(streams) = self.primary_streams {
            config.primary.streams = Some(streams);
        }
        if let Some(slots) = self.low_latency_slots {
            config.low_latency.slots = slots;
        }
        if self.low_latency {
            config.initial_mode = Mode::LowLatency;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Toggle,
    Quit,
}

/// Reads `t` / `q` lines from stdin until EOF
fn spawn_stdin_commands() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "t" | "tab" => Command::Toggle,
                "q" | "esc" => Command::Quit,
                "" => continue,
                other => {
                    eprintln!("Unknown command '{}': use t (toggle) or q (quit)", other);
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
    rx
}

/// Decodes each frame's detections and logs the overlay text
struct ReportingConsumer {
    decoder: SsdDecoder,
    labels: Labels,
    raw: bool,
    commands: Option<Receiver<Command>>,
}

impl ReportingConsumer {
    fn next_command(&mut self) -> Option<Command> {
        let commands = self.commands.as_ref()?;
        match commands.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.commands = None;
                None
            }
        }
    }
}

impl FrameConsumer<Frame, Array2<f32>> for ReportingConsumer {
    fn accept(
        &mut self,
        result: PendingResult<Frame, Array2<f32>>,
        ctx: &DeliveryContext,
    ) -> frame_scheduler::Result<Delivery> {
        let proposals = self.decoder.proposals(&result.raw_output)?;

        if self.raw {
            for detection in &proposals {
                println!(
                    "[{},{}] element, prob = {:.4}    ({:.0},{:.0})-({:.0},{:.0}) batch id : 0{}",
                    detection.index,
                    detection.label,
                    detection.confidence,
                    detection.bbox.xmin,
                    detection.bbox.ymin,
                    detection.bbox.xmax,
                    detection.bbox.ymax,
                    if self.decoder.is_rendered(detection) {
                        " WILL BE RENDERED!"
                    } else {
                        ""
                    }
                );
            }
        }

        let rendered: Vec<String> = proposals
            .iter()
            .filter(|detection| self.decoder.is_rendered(detection))
            .map(|detection| format!("{}:{:.3}", self.labels.name(detection.label), detection.confidence))
            .collect();

        log::info!(
            "frame {:>5} | {:<11} | {:>6.1} FPS | {:>6.1} ms latency | wallclock {} | buffered {} | {} detection(s){}",
            result.payload.payload.frame_id,
            ctx.mode.label(),
            ctx.fps(),
            ctx.latency.as_secs_f64() * 1e3,
            ctx.wallclock_ms()
                .map_or_else(|| "n/a".to_string(), |ms| format!("{:.1} ms", ms)),
            ctx.buffered,
            rendered.len(),
            if rendered.is_empty() {
                String::new()
            } else {
                format!(" [{}]", rendered.join(", "))
            }
        );

        Ok(match self.next_command() {
            Some(Command::Toggle) => Delivery::ToggleMode,
            Some(Command::Quit) => Delivery::Stop,
            None => Delivery::Continue,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    frame_scheduler::init()?;

    let args = Args::parse();
    let config = args.scheduler_config()?;
    log::info!(
        "Pools: primary {} slot(s) / {} stream(s), low-latency {} slot(s) / {} stream(s)",
        config.primary.slots,
        config.primary.streams(),
        config.low_latency.slots,
        config.low_latency.streams()
    );

    let model_config = SimulatedSsdConfig {
        latency: Duration::from_millis(args.latency_ms),
        jitter: Duration::from_millis(args.jitter_ms),
        fail_at_frame: args.fail_at,
        ..SimulatedSsdConfig::default()
    };
    let num_classes = model_config.num_classes;
    let model = Arc::new(SimulatedSsd::new(model_config)?);

    let labels = match &args.labels {
        Some(path) => Labels::load(path)?.aligned_to(num_classes),
        None => Labels::default(),
    };

    let primary = StreamExecutor::new(Arc::clone(&model), config.primary.streams(), "primary")?;
    let low_latency =
        StreamExecutor::new(model, config.low_latency.streams(), "low-latency")?;
    let mut dispatcher = Dispatcher::new(Arc::new(primary), Arc::new(low_latency), &config)?;

    // Periodic toggling; the ticker ends when `ticker_stop` is dropped
    let (ticker_stop, ticker_rx) = unbounded::<()>();
    if let Some(interval_ms) = args.toggle_every_ms {
        let switch = dispatcher.mode_switch();
        let monitor = dispatcher.monitor();
        let interval = Duration::from_millis(interval_ms.max(1));
        thread::spawn(move || loop {
            match ticker_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let snapshot = monitor.snapshot();
                    let active = snapshot.active();
                    log::info!(
                        "Toggling away from {}: {} in flight, {} buffered, {} of {} admitted delivered",
                        snapshot.active_mode,
                        active.busy_slots,
                        active.buffered,
                        active.metrics.frames_completed,
                        active.metrics.frames_admitted
                    );
                    switch.request_toggle();
                }
                _ => break,
            }
        });
    }

    let mut consumer = ReportingConsumer {
        decoder: SsdDecoder::new(args.threshold, (args.width, args.height)),
        labels,
        raw: args.raw,
        commands: args.interactive.then(spawn_stdin_commands),
    };
    if args.interactive {
        eprintln!("Type t + Enter to switch modes, q + Enter to quit");
    }

    if args.loop_input && args.frames.is_none() {
        log::warn!("--loop-input has no effect without --frames");
    }
    let camera =
        SyntheticSource::new(args.width, args.height, args.frames).with_looping(args.loop_input);
    let (mut frames, capture) = spawn_capture(camera, args.fps)?;

    let outcome = dispatcher.run(&mut frames, &mut consumer);
    drop(ticker_stop);
    // Unblocks the capture thread if the run ended before the source did
    drop(frames);
    match capture.join() {
        Ok(Ok(produced)) => log::info!("Capture thread produced {} frame(s)", produced),
        Ok(Err(e)) => log::error!("Capture thread failed: {}", e),
        Err(_) => log::error!("Capture thread panicked"),
    }

    let summary = outcome?;
    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        log::info!("Report written to {}", path.display());
    }

    Ok(())
}
