//! Runs a capture -> luma statistics -> log renderer session.
//!
//! Without `--camera` the frames come from a moving test pattern; with it
//! (macOS only) they come from the default camera.

use std::convert::Infallible;
use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use frame_handoff::platform::feed::{FeedDevice, TestPattern};
use frame_handoff::{
    CameraDevice, CameraStream, FrameContract, Processed, Processor, Ratio, Renderer, Session,
    SessionConfig, Size,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "capture", about = "Frame hand-off pipeline demo")]
struct Cli {
    /// Session settings as TOML; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Stop after this many processed frames
    #[arg(long, default_value_t = 90)]
    frames: u64,

    /// Capture from the default camera instead of the test pattern
    #[cfg(target_os = "macos")]
    #[arg(long)]
    camera: bool,
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => SessionConfig::default(),
        };
        if let Some(width) = self.width {
            config.size.width = width;
        }
        if let Some(height) = self.height {
            config.size.height = height;
        }
        if let Some(fps) = self.fps {
            config.frame_rate = Ratio {
                numerator: fps,
                denominator: 1,
            };
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Default)]
struct LumaStats {
    mean: f64,
    min: u8,
    max: u8,
}

/// Mean and range of the luma plane, sampled every fourth pixel.
struct LumaProcessor;

impl Processor for LumaProcessor {
    type State = LumaStats;
    type Error = Infallible;

    fn initialize(&mut self, size: Size) -> Result<LumaStats, Infallible> {
        info!(%size, "luma processor ready");
        Ok(LumaStats::default())
    }

    fn process(&mut self, frame: &FrameContract<'_>, state: &mut LumaStats) {
        let (mut sum, mut count) = (0u64, 0u64);
        let (mut min, mut max) = (u8::MAX, u8::MIN);
        for y in (0..frame.height).step_by(4) {
            for x in (0..frame.width).step_by(4) {
                let Some(v) = frame.luma(x, y) else {
                    continue;
                };
                sum += u64::from(v);
                count += 1;
                min = min.min(v);
                max = max.max(v);
            }
        }
        if count > 0 {
            *state = LumaStats {
                mean: sum as f64 / count as f64,
                min,
                max,
            };
        }
    }
}

struct LogRenderer {
    last_report: Instant,
}

impl Renderer<LumaStats> for LogRenderer {
    type Error = Infallible;

    fn initialize_surface(&mut self) -> Result<(), Infallible> {
        info!("log surface ready");
        Ok(())
    }

    fn draw(&mut self, state: &Processed<LumaStats>) {
        if self.last_report.elapsed() >= Duration::from_secs(1) {
            self.last_report = Instant::now();
            info!(
                generation = state.generation(),
                mean = format_args!("{:.1}", state.mean),
                min = state.min,
                max = state.max,
                "frame drawn"
            );
        }
    }

    fn release_surface(&mut self) {
        info!("log surface released");
    }
}

/// How long to wait for `frames` frames at `rate` before giving up: four
/// frame intervals each, and never less than two seconds.
fn wait_budget(rate: Ratio, frames: u64) -> Duration {
    let frames = u32::try_from(frames).unwrap_or(u32::MAX);
    rate.frame_interval()
        .saturating_mul(frames)
        .saturating_mul(4)
        .max(Duration::from_secs(2))
}

fn run<D>(
    config: &SessionConfig,
    device: D,
    frames: u64,
    feed: Option<TestPattern>,
) -> Result<(), Box<dyn Error>>
where
    D: CameraDevice,
    D::Error: Into<frame_handoff::Error>,
    <D::Stream as CameraStream>::Error: Into<frame_handoff::Error>,
{
    let renderer = LogRenderer {
        last_report: Instant::now(),
    };
    let mut session = Session::start(config, device, LumaProcessor, renderer)?;

    let deadline = Instant::now() + wait_budget(config.frame_rate, frames);
    while session.stats().frames_processed < frames {
        if Instant::now() > deadline {
            warn!("timed out waiting for frames");
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    if let Some(pattern) = feed {
        pattern.stop();
    }
    session.stop()?;
    println!("{}", session.stats());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli.session_config()?;
    info!(size = %config.size, fps = config.frame_rate.as_f64(), "session config");

    #[cfg(target_os = "macos")]
    if cli.camera {
        use frame_handoff::CameraManager;
        use frame_handoff::platform::macos::device::MacosCameraManager;

        let device = MacosCameraManager
            .default_device()?
            .ok_or("no camera found")?;
        info!(camera = device.name(), "using camera");
        return run(&config, device, cli.frames, None);
    }

    let device = FeedDevice::new("pattern0", "Test pattern", config.size);
    let pattern = TestPattern::spawn(device.feeder(), config.size, config.frame_rate, None);
    run(&config, device, cli.frames, Some(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fps(n: u32) -> Ratio {
        Ratio {
            numerator: n,
            denominator: 1,
        }
    }

    #[test]
    fn wait_budget_scales_with_frames() {
        assert_eq!(wait_budget(fps(10), 100), Duration::from_secs(40));
    }

    #[test]
    fn wait_budget_has_a_floor_and_never_overflows() {
        assert_eq!(wait_budget(fps(0), 90), Duration::from_secs(2));
        assert_eq!(wait_budget(fps(1000), 1), Duration::from_secs(2));
        assert_eq!(
            wait_budget(fps(1), u64::MAX),
            Duration::from_secs(u64::from(u32::MAX) * 4)
        );
    }
}
