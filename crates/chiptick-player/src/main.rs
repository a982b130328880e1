mod audio;
mod config;
mod input;
mod status;
mod wav;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chiptick_core::apu::DEFAULT_SAMPLE_RATE;
use chiptick_core::audio_queue::{SampleProducer, sample_queue};
use chiptick_core::machine::lock;
use chiptick_core::{GbsFile, Machine, MachineConfig, SharedMachine};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{info, warn};

use crate::config::PlayerConfig;

const DEFAULT_WAV_SECONDS: f32 = 120.0;
const STATUS_INTERVAL: Duration = Duration::from_millis(100);
const RENDER_POLL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(version, about = "Play Game Boy Sound (GBS) files")]
struct Args {
    /// Path to the GBS file
    file: PathBuf,

    /// Zero-based track index (defaults to the file's start track)
    track: Option<usize>,

    /// Master volume in percent (overrides the saved setting)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: Option<u8>,

    /// Playback speed in percent, 10-200
    #[arg(long, default_value_t = 100)]
    speed: u32,

    /// Output sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Render to a WAV file instead of the audio device
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Seconds to render with --wav, or to play before exiting
    #[arg(long)]
    seconds: Option<f32>,

    /// Don't print the status line
    #[arg(long)]
    quiet: bool,

    /// Enable trace logging of driver register writes
    #[arg(long)]
    debug: bool,

    /// Neither read nor write the config file
    #[arg(long)]
    no_config: bool,
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Trace);
    }
    builder.init();
}

fn build_machine(
    file: GbsFile,
    args: &Args,
    cfg: &PlayerConfig,
    sample_rate: u32,
) -> Result<Machine> {
    let config = MachineConfig {
        sample_rate,
        volume: cfg.volume as f32 / 100.0,
        speed: args.speed.clamp(10, 200) as f32 / 100.0,
        ..MachineConfig::default()
    };
    let mut machine = Machine::new(file, config)?;
    if let Some(track) = args.track {
        machine
            .select_track(track)
            .context("cannot start requested track")?;
    }
    Ok(machine)
}

/// Render ticks into `producer` whenever the queue drops below `target`
/// frames and a whole tick fits.
fn spawn_renderer(
    machine: SharedMachine,
    producer: SampleProducer,
    demand: Receiver<()>,
    running: Arc<AtomicBool>,
    target: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("render".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                if producer.len() < target {
                    let mut m = lock(&machine);
                    if producer.free_frames() >= m.frames_per_tick()
                        && let Some(block) = m.produce_tick()
                    {
                        producer.push_interleaved(block);
                        continue;
                    }
                }
                let _ = demand.recv_timeout(RENDER_POLL);
            }
        })
}

fn play_live(file: GbsFile, args: &Args, cfg: &mut PlayerConfig) -> Result<()> {
    let device = audio::OutputDevice::open(args.sample_rate)?;
    let rate = device.sample_rate();
    let machine = build_machine(file, args, cfg, rate)?.into_shared();

    // Room for the slowest possible tick; rendering stops at ~100ms ahead.
    let (producer, consumer) = sample_queue(rate as usize * 2);
    let (demand_tx, demand_rx) = crossbeam_channel::bounded(1);
    let _stream = device.start(consumer, demand_tx)?;

    let running = Arc::new(AtomicBool::new(true));
    let renderer = spawn_renderer(
        Arc::clone(&machine),
        producer,
        demand_rx,
        Arc::clone(&running),
        rate as usize / 10,
    )
    .context("failed to start render thread")?;

    let (cmd_tx, mut commands) = crossbeam_channel::unbounded();
    input::spawn_stdin_reader(cmd_tx).context("failed to start input thread")?;
    if !args.quiet {
        println!("Commands: 1-4 mute, t N track, n/b next/prev, p pause, v N volume, +/-/= speed, r restart, q quit");
    }

    let deadline = args
        .seconds
        .map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)));
    let mut stdout = std::io::stdout();
    loop {
        match commands.recv_timeout(STATUS_INTERVAL) {
            Ok(cmd) => {
                if !cmd.apply(&mut lock(&machine)) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => commands = crossbeam_channel::never(),
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if !args.quiet {
            let line = status::status_line(&lock(&machine));
            let _ = write!(stdout, "\r{line}\x1b[K");
            let _ = stdout.flush();
        }
    }
    if !args.quiet {
        println!();
    }

    running.store(false, Ordering::Relaxed);
    if renderer.join().is_err() {
        warn!("Render thread panicked");
    }
    cfg.volume = (lock(&machine).volume() * 100.0).round() as u8;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config_path = config::default_config_path();
    let mut cfg = if args.no_config {
        PlayerConfig::default()
    } else {
        config::load_from_file(&config_path)
    };
    if let Some(volume) = args.volume {
        cfg.volume = volume;
    }

    let file = GbsFile::from_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    if !args.quiet {
        let h = &file.header;
        println!("{}", h.title);
        println!("{}", h.author);
        println!("{}", h.copyright);
        println!("{} tracks", h.song_count);
    }

    match &args.wav {
        Some(path) => {
            let mut machine = build_machine(file, &args, &cfg, args.sample_rate)?;
            let seconds = args.seconds.unwrap_or(DEFAULT_WAV_SECONDS);
            wav::export(&mut machine, path, seconds)?;
        }
        None => play_live(file, &args, &mut cfg)?,
    }

    if !args.no_config {
        match config::save_to_file(&config_path, &cfg) {
            Ok(()) => info!("Saved config to {}", config_path.display()),
            Err(e) => warn!("Failed to save config {}: {e}", config_path.display()),
        }
    }
    Ok(())
}
