//! yuyv-capture binary: inspect a camera, stream from it, or grab a snapshot.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use yuyv_capture::config::Config;
use yuyv_capture::{
    convert_yuyv_to_rgba, run_capture_loop, smallest_resolution, CameraDevice, CaptureSession,
    FramePacer, FrameReadiness, LoopControl, Resolution, RgbaFrame, V4L2Device,
};

/// How long `snapshot` polls before giving up on the device.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);
/// Poll interval while waiting for a snapshot frame.
const SNAPSHOT_POLL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "yuyv-capture", version)]
#[command(about = "Capture YUYV frames from a V4L2 camera and convert them to RGBA")]
struct Cli {
    /// Path to config file (default: ~/.config/yuyv-capture/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print device capabilities and supported formats
    Info {
        /// Device node (e.g. /dev/video0)
        #[arg(short, long)]
        device: Option<PathBuf>,
    },
    /// Capture and convert frames at a fixed rate, then print pacing statistics
    Stream {
        /// Device node (e.g. /dev/video0)
        #[arg(short, long)]
        device: Option<PathBuf>,
        /// Target frames per second
        #[arg(long)]
        fps: Option<f64>,
        /// Stop after this many frames (default: run until interrupted)
        #[arg(short = 'n', long)]
        frames: Option<u64>,
        /// Capture resolution as WIDTHxHEIGHT (default: smallest supported)
        #[arg(short, long, value_parser = parse_resolution)]
        resolution: Option<Resolution>,
    },
    /// Capture a single frame and save it as a PNG
    Snapshot {
        /// Device node (e.g. /dev/video0)
        #[arg(short, long)]
        device: Option<PathBuf>,
        /// Capture resolution as WIDTHxHEIGHT (default: smallest supported)
        #[arg(short, long, value_parser = parse_resolution)]
        resolution: Option<Resolution>,
        /// Output PNG file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid dimension '{value}': {err}"))
    };
    let resolution = Resolution::new(parse(width)?, parse(height)?);
    if resolution.is_empty() {
        return Err(format!("resolution '{s}' has a zero dimension"));
    }
    Ok(resolution)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("yuyv_capture=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Info { device } => {
            let path = device.unwrap_or_else(|| config.camera.device.clone());
            print_info(&path)
        }
        Command::Stream {
            device,
            fps,
            frames,
            resolution,
        } => {
            let path = device.unwrap_or_else(|| config.camera.device.clone());
            let mut pacer = match fps {
                Some(fps) => FramePacer::from_fps(fps)
                    .with_context(|| format!("invalid frame rate {fps}"))?,
                None => FramePacer::new(config.frame_interval()),
            };
            let mut session = open_configured(&path, resolution, &config)?;
            stream(&mut session, &mut pacer, frames)
        }
        Command::Snapshot {
            device,
            resolution,
            output,
        } => {
            let path = device.unwrap_or_else(|| config.camera.device.clone());
            let mut session = open_configured(&path, resolution, &config)?;
            snapshot(&mut session, &output)
        }
    }
}

fn print_info(path: &Path) -> Result<()> {
    let device =
        V4L2Device::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let caps = device.capabilities();

    print!("{caps}");
    if !caps.is_supported() {
        println!("  (not usable for capture: needs single-planar capture and streaming I/O)");
    }

    println!("Supported formats:");
    for report in device.formats()? {
        print!("{report}");
    }
    Ok(())
}

/// Open `path`, pick a resolution and start streaming.
fn open_configured(
    path: &Path,
    requested: Option<Resolution>,
    config: &Config,
) -> Result<CaptureSession> {
    let mut session =
        CaptureSession::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let resolution = match requested.or_else(|| config.resolution()) {
        Some(resolution) => resolution,
        None => {
            let resolutions = session.enumerate_resolutions(config.camera.max_resolutions)?;
            smallest_resolution(&resolutions)
                .context("device reports no discrete YUYV resolutions")?
        }
    };
    info!(%resolution, device = %path.display(), "Configuring capture");

    session
        .configure(resolution.width, resolution.height)
        .with_context(|| format!("failed to configure {resolution}"))?;
    Ok(session)
}

fn stream(session: &mut CaptureSession, pacer: &mut FramePacer, frames: Option<u64>) -> Result<()> {
    let format = session
        .negotiated_format()
        .cloned()
        .context("session is not configured")?;
    let width = format.width as usize;
    let height = format.height as usize;

    // Stands in for the display surface.
    let mut rgba = vec![0u8; width * height * 4];
    let mut delivered = 0u64;

    let stats = run_capture_loop(
        session,
        pacer,
        || false,
        |frame| {
            convert_yuyv_to_rgba(
                frame.data,
                &mut rgba,
                width,
                height,
                format.stride as usize,
                width * 4,
            )?;
            delivered += 1;
            debug!(sequence = frame.metadata.sequence, "Converted frame");

            let done = frames.is_some_and(|limit| delivered >= limit);
            Ok::<_, anyhow::Error>(if done {
                LoopControl::Stop
            } else {
                LoopControl::Continue
            })
        },
    )?;

    println!("{stats}");
    Ok(())
}

fn snapshot(session: &mut CaptureSession, output: &Path) -> Result<()> {
    let format = session
        .negotiated_format()
        .cloned()
        .context("session is not configured")?;

    session.begin_loading_next_frame()?;
    let deadline = Instant::now() + SNAPSHOT_TIMEOUT;
    let rgba = loop {
        match session.frame_buffer()? {
            FrameReadiness::Ready(frame) => {
                info!(sequence = frame.metadata.sequence, "Captured frame");
                break RgbaFrame::from_yuyv(
                    frame.data,
                    format.width,
                    format.height,
                    format.stride as usize,
                )?;
            }
            FrameReadiness::NotReady => {
                if Instant::now() >= deadline {
                    bail!("no frame arrived within {SNAPSHOT_TIMEOUT:?}");
                }
                thread::sleep(SNAPSHOT_POLL);
            }
        }
    };

    let (width, height) = (rgba.width(), rgba.height());
    let image = image::RgbaImage::from_raw(width, height, rgba.into_bytes())
        .context("converted frame does not match its dimensions")?;
    image
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Saved {width}x{height} snapshot to {}", output.display());
    Ok(())
}
