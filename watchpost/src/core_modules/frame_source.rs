// THEORY:
// A `FrameSource` is anything that can hand the capture loop one RGB frame at a
// time. The loop only relies on a three-step contract:
//
// 1.  `open` acquires the device. Failure here is fatal for the session.
// 2.  `read` may block and may fail transiently; the loop backs off and retries.
// 3.  `release` gives the device back. It is always called on loop exit, and must
//     tolerate being called on a source that never opened.
//
// The worker receives a `SourceFactory` instead of a source, so every monitoring
// session starts from a fresh, unopened device handle. Which concrete source the
// factory builds is chosen at startup from a short textual `SourceSpec`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::core_modules::frame::Frame;
use crate::error::{ConfigError, DeviceError};

/// Roughly 30 frames per second for sources that have no natural pace.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), DeviceError>;
    fn read(&mut self) -> Result<Frame, DeviceError>;
    fn release(&mut self);
    /// Human readable name of the underlying device, for logs and errors.
    fn describe(&self) -> String;
}

/// Builds a fresh, unopened source for each monitoring session.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Replays a directory of still images, sorted by file name.
pub struct ImageSequenceSource {
    dir: PathBuf,
    frames: Vec<PathBuf>,
    position: usize,
    looping: bool,
    frame_interval: Option<Duration>,
    next_sequence: u64,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Vec::new(),
            position: 0,
            looping: true,
            frame_interval: None,
            next_sequence: 0,
        }
    }

    /// Sleeps this long inside every `read`, mimicking a camera's frame rate.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// When disabled, reads past the last image fail instead of starting over.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Number of images found by `open`.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        frames.sort();
        Ok(frames)
    }
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self) -> Result<(), DeviceError> {
        let frames = Self::list_images(&self.dir).map_err(|e| DeviceError::Open {
            device: self.describe(),
            reason: e.to_string(),
        })?;
        if frames.is_empty() {
            return Err(DeviceError::Open {
                device: self.describe(),
                reason: "directory contains no png, jpeg or bmp images".to_string(),
            });
        }
        debug!(dir = %self.dir.display(), frames = frames.len(), "image sequence opened");
        self.frames = frames;
        self.position = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, DeviceError> {
        if self.frames.is_empty() {
            return Err(DeviceError::ReadFailed("image sequence is not open".to_string()));
        }
        if self.position >= self.frames.len() {
            if !self.looping {
                return Err(DeviceError::ReadFailed("end of image sequence".to_string()));
            }
            self.position = 0;
        }
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        let path = &self.frames[self.position];
        self.position += 1;
        let image = image::open(path)
            .map_err(|e| DeviceError::ReadFailed(format!("{}: {e}", path.display())))?
            .to_rgb8();

        let frame = Frame::new(self.next_sequence, image);
        self.next_sequence += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.frames.clear();
        self.position = 0;
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.dir.display())
    }
}

/// A synthetic scene: a white square sliding across a dark background.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    next_sequence: u64,
    opened: bool,
}

impl TestPatternSource {
    const SQUARE_STEP: u32 = 8;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_interval: None,
            next_sequence: 0,
            opened: false,
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    fn render(&self, sequence: u64) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([24, 24, 32]));
        let side = (self.width.min(self.height) / 4).max(1);
        let travel = (self.width - side.min(self.width)).max(1) as u64;
        let x0 = ((sequence * Self::SQUARE_STEP as u64) % travel) as u32;
        let y0 = (self.height - side.min(self.height)) / 2;
        for y in y0..(y0 + side).min(self.height) {
            for x in x0..(x0 + side).min(self.width) {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        image
    }
}

impl FrameSource for TestPatternSource {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.opened = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, DeviceError> {
        if !self.opened {
            return Err(DeviceError::ReadFailed("test pattern is not open".to_string()));
        }
        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }
        let frame = Frame::new(self.next_sequence, self.render(self.next_sequence));
        self.next_sequence += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.opened = false;
    }

    fn describe(&self) -> String {
        format!("pattern:{}x{}", self.width, self.height)
    }
}

/// Stands in for a device this build cannot drive. Opening always fails.
pub struct UnavailableSource {
    device: String,
    reason: String,
}

impl UnavailableSource {
    pub fn new(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

impl FrameSource for UnavailableSource {
    fn open(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Open {
            device: self.device.clone(),
            reason: self.reason.clone(),
        })
    }

    fn read(&mut self) -> Result<Frame, DeviceError> {
        Err(DeviceError::ReadFailed(format!("{} is unavailable", self.device)))
    }

    fn release(&mut self) {}

    fn describe(&self) -> String {
        self.device.clone()
    }
}

#[cfg(feature = "camera")]
pub use camera::{CameraSource, CameraTarget};

#[cfg(feature = "camera")]
mod camera {
    use std::path::PathBuf;

    use image::RgbImage;
    use opencv::core::Mat;
    use opencv::imgproc;
    use opencv::prelude::*;
    use opencv::videoio::{self, VideoCapture};
    use tracing::warn;

    use super::FrameSource;
    use crate::core_modules::frame::Frame;
    use crate::error::DeviceError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CameraTarget {
        Device(i32),
        File(PathBuf),
    }

    /// A webcam or video file read through OpenCV's `videoio`.
    pub struct CameraSource {
        target: CameraTarget,
        capture: Option<VideoCapture>,
        next_sequence: u64,
    }

    impl CameraSource {
        pub fn new(target: CameraTarget) -> Self {
            Self {
                target,
                capture: None,
                next_sequence: 0,
            }
        }

        fn open_error(&self, reason: impl ToString) -> DeviceError {
            DeviceError::Open {
                device: self.describe(),
                reason: reason.to_string(),
            }
        }
    }

    impl FrameSource for CameraSource {
        fn open(&mut self) -> Result<(), DeviceError> {
            let capture = match &self.target {
                CameraTarget::Device(index) => VideoCapture::new(*index, videoio::CAP_ANY),
                CameraTarget::File(path) => {
                    VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
                }
            }
            .map_err(|e| self.open_error(e))?;

            if !capture.is_opened().map_err(|e| self.open_error(e))? {
                return Err(self.open_error("device did not open"));
            }
            self.capture = Some(capture);
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, DeviceError> {
            let capture = self
                .capture
                .as_mut()
                .ok_or_else(|| DeviceError::ReadFailed("capture is not open".to_string()))?;

            let mut bgr = Mat::default();
            let grabbed = capture
                .read(&mut bgr)
                .map_err(|e| DeviceError::ReadFailed(e.to_string()))?;
            if !grabbed || bgr.empty() {
                return Err(DeviceError::ReadFailed("no frame available".to_string()));
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
                .map_err(|e| DeviceError::ReadFailed(e.to_string()))?;
            let size = rgb.size().map_err(|e| DeviceError::ReadFailed(e.to_string()))?;
            let data = rgb
                .data_bytes()
                .map_err(|e| DeviceError::ReadFailed(e.to_string()))?
                .to_vec();
            let image = RgbImage::from_raw(size.width as u32, size.height as u32, data)
                .ok_or_else(|| DeviceError::ReadFailed("unexpected frame layout".to_string()))?;

            let frame = Frame::new(self.next_sequence, image);
            self.next_sequence += 1;
            Ok(frame)
        }

        fn release(&mut self) {
            if let Some(mut capture) = self.capture.take() {
                if let Err(e) = capture.release() {
                    warn!(device = %self.describe(), "failed to release capture: {e}");
                }
            }
        }

        fn describe(&self) -> String {
            match &self.target {
                CameraTarget::Device(index) => format!("camera:{index}"),
                CameraTarget::File(path) => format!("file:{}", path.display()),
            }
        }
    }
}

/// A textual frame source selector: `camera:0`, `file:clip.mp4`, `dir:frames/`
/// or `pattern:640x480`. A bare integer is shorthand for `camera:<n>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Camera(i32),
    File(PathBuf),
    Directory(PathBuf),
    Pattern { width: u32, height: u32 },
}

impl SourceSpec {
    /// Builds the factory handed to the capture worker.
    pub fn factory(&self) -> SourceFactory {
        let spec = self.clone();
        Arc::new(move || spec.build())
    }

    fn build(&self) -> Box<dyn FrameSource> {
        match self {
            SourceSpec::Directory(dir) => {
                Box::new(ImageSequenceSource::new(dir).with_frame_interval(DEFAULT_FRAME_INTERVAL))
            }
            SourceSpec::Pattern { width, height } => Box::new(
                TestPatternSource::new(*width, *height).with_frame_interval(DEFAULT_FRAME_INTERVAL),
            ),
            #[cfg(feature = "camera")]
            SourceSpec::Camera(index) => Box::new(CameraSource::new(CameraTarget::Device(*index))),
            #[cfg(feature = "camera")]
            SourceSpec::File(path) => Box::new(CameraSource::new(CameraTarget::File(path.clone()))),
            #[cfg(not(feature = "camera"))]
            SourceSpec::Camera(_) | SourceSpec::File(_) => Box::new(UnavailableSource::new(
                self.to_string(),
                "built without the `camera` feature",
            )),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera(index) => write!(f, "camera:{index}"),
            SourceSpec::File(path) => write!(f, "file:{}", path.display()),
            SourceSpec::Directory(path) => write!(f, "dir:{}", path.display()),
            SourceSpec::Pattern { width, height } => write!(f, "pattern:{width}x{height}"),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSource {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let s = s.trim();
        if let Ok(index) = s.parse::<i32>() {
            return Ok(SourceSpec::Camera(index));
        }
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected `<kind>:<value>`"))?;
        if rest.is_empty() {
            return Err(invalid("missing value after `:`"));
        }

        match kind {
            "camera" => rest
                .parse()
                .map(SourceSpec::Camera)
                .map_err(|_| invalid("camera index must be an integer")),
            "file" => Ok(SourceSpec::File(PathBuf::from(rest))),
            "dir" => Ok(SourceSpec::Directory(PathBuf::from(rest))),
            "pattern" => {
                let (w, h) = rest
                    .split_once('x')
                    .ok_or_else(|| invalid("pattern size must look like 640x480"))?;
                let width: u32 = w.parse().map_err(|_| invalid("pattern width must be a number"))?;
                let height: u32 = h.parse().map_err(|_| invalid("pattern height must be a number"))?;
                if width == 0 || height == 0 {
                    return Err(invalid("pattern size must be non-zero"));
                }
                Ok(SourceSpec::Pattern { width, height })
            }
            other => Err(invalid(&format!("unknown source kind `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sequence(dir: &Path, count: u8) {
        for i in 0..count {
            let image = RgbImage::from_pixel(16, 12, Rgb([i * 40, 0, 0]));
            image.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn parses_every_source_kind() {
        assert_eq!("camera:0".parse::<SourceSpec>().unwrap(), SourceSpec::Camera(0));
        assert_eq!("2".parse::<SourceSpec>().unwrap(), SourceSpec::Camera(2));
        assert_eq!(
            "file:clip.mp4".parse::<SourceSpec>().unwrap(),
            SourceSpec::File(PathBuf::from("clip.mp4"))
        );
        assert_eq!(
            "dir:frames".parse::<SourceSpec>().unwrap(),
            SourceSpec::Directory(PathBuf::from("frames"))
        );
        assert_eq!(
            "pattern:320x240".parse::<SourceSpec>().unwrap(),
            SourceSpec::Pattern { width: 320, height: 240 }
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        for bad in ["", "webcam", "camera:", "camera:front", "pattern:640", "pattern:0x10", "ftp:x"] {
            assert!(
                matches!(bad.parse::<SourceSpec>(), Err(ConfigError::InvalidSource { .. })),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let spec = SourceSpec::Pattern { width: 64, height: 48 };
        assert_eq!(spec.to_string().parse::<SourceSpec>().unwrap(), spec);
    }

    #[test]
    fn image_sequence_replays_in_name_order_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 3);

        let mut source = ImageSequenceSource::new(dir.path());
        source.open().unwrap();
        assert_eq!(source.len(), 3);

        let reds: Vec<u8> = (0..4).map(|_| source.read().unwrap().image.get_pixel(0, 0).0[0]).collect();
        assert_eq!(reds, vec![0, 40, 80, 0]);
    }

    #[test]
    fn image_sequence_sequence_numbers_keep_growing() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 2);
        let mut source = ImageSequenceSource::new(dir.path());
        source.open().unwrap();
        let seqs: Vec<u64> = (0..3).map(|_| source.read().unwrap().sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn non_looping_sequence_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path(), 1);
        let mut source = ImageSequenceSource::new(dir.path()).with_looping(false);
        source.open().unwrap();
        assert!(source.read().is_ok());
        assert!(matches!(source.read(), Err(DeviceError::ReadFailed(_))));
    }

    #[test]
    fn empty_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ImageSequenceSource::new(dir.path());
        let err = source.open().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn reading_before_open_is_transient() {
        let mut source = TestPatternSource::new(32, 24);
        assert!(matches!(source.read(), Err(DeviceError::ReadFailed(_))));
    }

    #[test]
    fn test_pattern_moves_between_frames() {
        let mut source = TestPatternSource::new(64, 48);
        source.open().unwrap();
        let a = source.read().unwrap();
        let b = source.read().unwrap();
        assert_eq!(a.image.dimensions(), (64, 48));
        assert_ne!(a.image, b.image);
        assert_eq!(b.sequence, a.sequence + 1);
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn camera_without_feature_fails_to_open() {
        let factory = SourceSpec::Camera(0).factory();
        let mut source = factory();
        assert!(source.open().unwrap_err().is_fatal());
        assert_eq!(source.describe(), "camera:0");
    }
}
