// THEORY:
// A `Frame` is the unit of data that flows through the whole engine. It is captured
// once by a `FrameSource` and never mutated afterwards: the streaming side and the
// motion detector both read from it, and the detector draws its annotations on a
// copy. Because of that, frames are shared between threads behind an `Arc` instead
// of being copied pixel-by-pixel for every consumer.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::error::EncodeError;

/// JPEG quality used for both the live stream and alert snapshots.
pub const JPEG_QUALITY: u8 = 95;

/// A captured RGB image plus its position in the capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonically increasing per monitoring session.
    pub sequence: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self { sequence, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.image.as_raw().len() / 8);
        let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
        self.image.write_with_encoder(encoder)?;
        Ok(out)
    }

    /// Encodes the frame as an inline `data:image/jpeg;base64,...` URL.
    pub fn to_jpeg_data_url(&self) -> Result<String, EncodeError> {
        let jpeg = self.encode_jpeg()?;
        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
    }
}
