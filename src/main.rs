//! Headless demo host for framepace
//!
//! Drives a simulated particle field through the adaptive scheduler on a
//! 60 Hz timer, then prints the derived config and the render analysis.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framepace::{
    config::Settings,
    device::{ConnectionType, DeviceClassification},
    logging::init_logging,
    scheduler::FrameControl,
    system::PerformanceSystem,
    tick_source::IntervalTickSource,
};

/// Display refresh the demo timer emulates
const TICK_RATE_HZ: u32 = 60;

/// Particles simulated at full quality
const FULL_PARTICLE_COUNT: usize = 4_000;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    write_config: Option<PathBuf>,
    seconds: Option<u64>,
    frames: Option<u64>,
    cores: Option<u32>,
    memory_gb: Option<f64>,
    pixel_ratio: Option<f64>,
    connection: Option<ConnectionType>,
    capability: Option<DeviceClassification>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(a) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("missing value for {}", a))
        };
        match a.as_str() {
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--write-config" => args.write_config = Some(PathBuf::from(value()?)),
            "--seconds" => args.seconds = Some(value()?.parse().context("invalid --seconds")?),
            "--frames" => args.frames = Some(value()?.parse().context("invalid --frames")?),
            "--cores" => args.cores = Some(value()?.parse().context("invalid --cores")?),
            "--memory" => args.memory_gb = Some(value()?.parse().context("invalid --memory")?),
            "--dpr" => args.pixel_ratio = Some(value()?.parse().context("invalid --dpr")?),
            "--connection" => {
                args.connection = Some(value()?.parse().map_err(anyhow::Error::msg)?)
            }
            "--override" => {
                args.capability = Some(value()?.parse().map_err(anyhow::Error::msg)?)
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load().unwrap_or_default(),
    };
    init_logging(settings.logging.level);

    // Command-line signals win over the settings file
    let cli_device = &mut settings.device;
    cli_device.logical_cores = args.cores.or(cli_device.logical_cores);
    cli_device.device_memory_gb = args.memory_gb.or(cli_device.device_memory_gb);
    cli_device.device_pixel_ratio = args.pixel_ratio.or(cli_device.device_pixel_ratio);
    cli_device.connection_type = args.connection.or(cli_device.connection_type);
    cli_device.manual_override = args.capability.or(cli_device.manual_override);

    if let Some(path) = &args.write_config {
        settings.save_to(path)?;
        println!("Wrote settings to {}", path.display());
        return Ok(());
    }

    let system = PerformanceSystem::init(settings)?;
    println!("Device class: {}", system.classification());
    print_config(&system);

    let ticks = Arc::new(IntervalTickSource::with_rate(TICK_RATE_HZ)?);
    let frames = Arc::new(AtomicU64::new(0));
    let handle = {
        let collector = Arc::clone(system.collector());
        let store = Arc::clone(system.config_store());
        let frames = Arc::clone(&frames);
        let frame_limit = args.frames;
        system.start(
            move |_delta_ms| {
                let config = store.get_snapshot();
                let count = (FULL_PARTICLE_COUNT as f64 * config.particle_scale) as usize;
                collector.measure("ParticleField", || simulate_particles(count));
                collector.measure("Hud", || simulate_particles(16));
                if !config.disable_shadows {
                    collector.measure("ShadowPass", || simulate_particles(count / 4));
                }

                let done = frames.fetch_add(1, Ordering::Relaxed) + 1;
                match frame_limit {
                    Some(limit) if done >= limit => Ok(FrameControl::Finish),
                    _ => Ok(FrameControl::Continue),
                }
            },
            ticks.clone(),
        )
    };

    let deadline = Instant::now() + Duration::from_secs(args.seconds.unwrap_or(3));
    while handle.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(250));
        if let Some(fps) = handle.measured_fps().filter(|fps| *fps > 0.0) {
            println!("measured {:.1} fps", fps);
        }
    }
    handle.stop();
    drop(handle);
    drop(ticks);

    println!("Frames executed: {}", frames.load(Ordering::Relaxed));
    print_config(&system);
    println!("{}", system.analyzer().report());

    system.shutdown();
    Ok(())
}

fn print_config(system: &PerformanceSystem) {
    let config = system.get_current_config();
    println!(
        "Config: quality={} fps={} particles={:.2} blur={} shadows={} animation={:?}",
        config.quality_level,
        config.target_fps,
        config.particle_scale,
        !config.disable_blur,
        !config.disable_shadows,
        config.animation_complexity,
    );
}

/// Stand-in for real render work: a few integration steps per particle
fn simulate_particles(count: usize) -> f64 {
    let mut energy = 0.0;
    for i in 0..count {
        let mut x = i as f64 * 0.37;
        let mut v = 1.0;
        for _ in 0..32 {
            v -= x * 0.01;
            x += v * 0.01;
        }
        energy += x * x + v * v;
    }
    std::hint::black_box(energy)
}
