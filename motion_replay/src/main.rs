// THEORY:
// `motion_replay` is the offline twin of the live server. It feeds recorded footage
// through the same `MotionDetector` and `AlertThrottle` the capture worker uses, but
// as fast as the disk allows, and drives the throttle with a simulated clock derived
// from the frame rate. That makes threshold and cooldown tuning reproducible: the
// same footage always yields the same alerts.
//
// Output:
// 1.  One annotated PNG per frame with motion (or per frame, with `--all-frames`).
// 2.  `alerts.json` listing the frames that would have raised an alert.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use watchpost::core_modules::alert_throttle::AlertThrottle;
use watchpost::core_modules::frame_source::{FrameSource, ImageSequenceSource};
use watchpost::core_modules::motion_detector::MotionDetector;
use watchpost::{CaptureConfig, DetectorConfig, Threshold};

/// Reads past the end of the footage fail; a few in a row mean we are done.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Parser, Debug)]
#[command(version, about = "Replay recorded footage through the motion detector")]
struct Args {
    /// Folder of still frames (png, jpeg, bmp), or a video file when built with `camera`.
    input: PathBuf,

    /// Folder that receives the annotated frames and `alerts.json`.
    output: PathBuf,

    /// Frame rate of the footage, used to simulate the alert cooldown clock.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Alert threshold, 0 to 100.
    #[arg(long, default_value_t = 10)]
    threshold: i64,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Write every frame, not only the ones with motion.
    #[arg(long)]
    all_frames: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct ReplayAlert {
    frame: u64,
    seconds: f64,
    score: u8,
}

#[derive(Debug, Default, Serialize)]
struct ReplaySummary {
    frames: u64,
    frames_with_motion: u64,
    frames_written: u64,
    alerts: Vec<ReplayAlert>,
}

struct ReplayOptions {
    fps: f64,
    threshold: Threshold,
    max_frames: Option<u64>,
    all_frames: bool,
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::new(path).with_looping(false)));
    }
    open_video(path)
}

#[cfg(feature = "camera")]
fn open_video(path: &Path) -> anyhow::Result<Box<dyn FrameSource>> {
    use watchpost::core_modules::frame_source::{CameraSource, CameraTarget};
    Ok(Box::new(CameraSource::new(CameraTarget::File(path.to_path_buf()))))
}

#[cfg(not(feature = "camera"))]
fn open_video(path: &Path) -> anyhow::Result<Box<dyn FrameSource>> {
    bail!(
        "{} is not a directory; video files need the `camera` feature",
        path.display()
    )
}

fn replay(
    source: &mut dyn FrameSource,
    output: &Path,
    options: &ReplayOptions,
) -> anyhow::Result<ReplaySummary> {
    if options.fps.is_nan() || options.fps <= 0.0 {
        bail!("fps must be positive, got {}", options.fps);
    }
    std::fs::create_dir_all(output)
        .with_context(|| format!("creating output folder {}", output.display()))?;
    source.open()?;
    let scanned = scan(source, output, options);
    source.release();
    let summary = scanned?;

    let alerts_path = output.join("alerts.json");
    std::fs::write(&alerts_path, serde_json::to_string_pretty(&summary.alerts)?)
        .with_context(|| format!("writing {}", alerts_path.display()))?;
    Ok(summary)
}

/// Runs the opened source through the detector. The caller owns open and release.
fn scan(
    source: &mut dyn FrameSource,
    output: &Path,
    options: &ReplayOptions,
) -> anyhow::Result<ReplaySummary> {
    let mut detector = MotionDetector::new(DetectorConfig::default());
    let mut throttle = AlertThrottle::new(CaptureConfig::default().alert_cooldown);
    let clock_start = Instant::now();
    let mut summary = ReplaySummary::default();
    let mut failures = 0;

    while options.max_frames.is_none_or(|max| summary.frames < max) {
        let frame = match source.read() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    debug!("end of input: {e}");
                    break;
                }
                warn!("{e}");
                continue;
            }
        };
        let index = summary.frames;
        summary.frames += 1;
        let seconds = index as f64 / options.fps;

        let Some(event) = detector.process(&frame) else {
            if options.all_frames {
                write_frame(output, index, &frame.image)?;
                summary.frames_written += 1;
            }
            continue;
        };
        if event.detected {
            summary.frames_with_motion += 1;
        }
        if event.detected || options.all_frames {
            write_frame(output, index, &event.annotated_frame.image)?;
            summary.frames_written += 1;
        }

        let now = clock_start + Duration::from_secs_f64(seconds);
        if let Some(trigger) = throttle.evaluate(&event, options.threshold.get(), now) {
            info!(frame = index, seconds, score = trigger.score, "alert");
            summary.alerts.push(ReplayAlert {
                frame: index,
                seconds,
                score: trigger.score,
            });
        }
    }
    Ok(summary)
}

fn write_frame(output: &Path, index: u64, image: &image::RgbImage) -> anyhow::Result<()> {
    let path = output.join(format!("frame_{index:06}.png"));
    image
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let options = ReplayOptions {
        fps: args.fps,
        threshold: Threshold::new(args.threshold)?,
        max_frames: args.max_frames,
        all_frames: args.all_frames,
    };
    let mut source = open_input(&args.input)?;
    let summary = replay(source.as_mut(), &args.output, &options)?;

    info!(
        frames = summary.frames,
        with_motion = summary.frames_with_motion,
        written = summary.frames_written,
        alerts = summary.alerts.len(),
        "replay complete, output in {}",
        args.output.display()
    );
    Ok(())
}
