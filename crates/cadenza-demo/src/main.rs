//! # Cadenza demo
//!
//! Plays a sine tone through the render adapter in start/stop cycles, or
//! runs the playback engine through its command set.

mod cli;

use anyhow::{Context, Result};
use cadenza_audio::engine::{PlayerEngine, Tone};
use cadenza_audio::output::{CpalHost, RenderAdapter, SampleFormat};
use cadenza_core::{EngineConfig, PlayerState};
use clap::Parser;
use cli::Options;
use std::f64::consts::TAU;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pause between tone cycles.
const CYCLE_GAP: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    let options = match Options::try_parse() {
        Ok(options) => options.normalized(),
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadenza_demo=info,cadenza_audio=info".into()),
        )
        .init();

    info!("Starting Cadenza demo v{}", env!("CARGO_PKG_VERSION"));

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(options: &Options) -> Result<()> {
    let config = match &options.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let stress = options.stress.then(StressLoad::start);
    let result = if options.engine_smoke {
        engine_smoke(options, config)
    } else {
        tone_cycles(options, &config)
    };
    if let Some(stress) = stress {
        stress.stop();
    }
    result
}

/// Start/stop the render adapter `repeat` times with a sine callback.
fn tone_cycles(options: &Options, config: &EngineConfig) -> Result<()> {
    let mut output = RenderAdapter::new(Box::new(CpalHost::new()), config.output.clone());
    output
        .init()
        .context("Failed to initialize the output device")?;

    info!(
        "Mix format: {} Hz, {} ch, {}, device: {}",
        output.sample_rate(),
        output.channels(),
        format_name(output.sample_format()),
        output.device_name()
    );
    if output.sample_format() == SampleFormat::Unsupported {
        warn!("Mix format unsupported; rendering silence");
    }

    let increment = TAU * options.frequency / f64::from(output.sample_rate());
    let mut phase = 0.0f64;
    output.set_fill_callback(Box::new(move |out: &mut [f32], channels: usize| {
        for frame in out.chunks_exact_mut(channels.max(1)) {
            frame.fill(phase.sin() as f32 * 0.2);
            phase = (phase + increment) % TAU;
        }
        true
    }))?;

    let cycle = Duration::from_secs_f64(options.seconds);
    for i in 0..options.repeat {
        if let Err(e) = output.start() {
            error!("Failed to start audio: {e}");
            break;
        }
        info!("Cycle {}/{}", i + 1, options.repeat);
        std::thread::sleep(cycle);
        output.stop();
        std::thread::sleep(CYCLE_GAP);
    }

    info!(
        "Rendered {} frames, {} underrun wakes",
        output.rendered_frames(),
        output.underrun_wake_count()
    );
    output.shutdown();
    Ok(())
}

/// Drive the engine through every command and report its status.
fn engine_smoke(options: &Options, config: EngineConfig) -> Result<()> {
    let step = Duration::from_secs_f64(options.seconds);
    let tone = Tone::new(options.frequency, 0.2, None);
    let engine = PlayerEngine::new(Box::new(CpalHost::new()), Box::new(tone), config)?;

    let steps: [(&str, fn(&PlayerEngine) -> cadenza_core::Result<()>); 6] = [
        ("play", PlayerEngine::play),
        ("pause", PlayerEngine::pause),
        ("resume", PlayerEngine::resume),
        ("seek", |e| e.seek(10.0)),
        ("replay", PlayerEngine::replay),
        ("stop", PlayerEngine::stop),
    ];

    for (name, command) in steps {
        command(&engine)?;
        std::thread::sleep(step);
        let status = engine.status();
        info!("{name}: {}", serde_json::to_string(&status)?);
        if status.state == PlayerState::Error {
            let message = status.last_error.unwrap_or_default();
            engine.quit()?;
            anyhow::bail!("Engine failed after {name}: {message}");
        }
    }

    engine.quit()?;
    info!("Engine smoke test passed");
    Ok(())
}

fn format_name(format: SampleFormat) -> &'static str {
    match format {
        SampleFormat::Float32 => "float32",
        SampleFormat::Pcm16 => "pcm16",
        SampleFormat::Unsupported => "unsupported",
    }
}

/// Busy threads on every core.
struct StressLoad {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl StressLoad {
    fn start() -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let count = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        info!("Starting {count} stress threads");
        let threads = (0..count)
            .map(|_| {
                let running = Arc::clone(&running);
                std::thread::spawn(move || {
                    let mut value = 0.0f64;
                    while running.load(Ordering::Relaxed) {
                        value = std::hint::black_box(value + 0.000_001);
                        if value > 1000.0 {
                            value = 0.0;
                        }
                    }
                })
            })
            .collect();
        Self { running, threads }
    }

    fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}
