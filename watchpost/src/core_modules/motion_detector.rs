// THEORY:
// The `MotionDetector` is a cheap motion-energy estimator. It holds exactly one piece
// of memory, the blurred grayscale image of the previous cycle (the "reference"),
// and compares every new frame against it.
//
// Per cycle:
// 1.  Grayscale + 21x21 Gaussian blur to suppress sensor noise.
// 2.  No reference yet: store this frame as the reference and report nothing. This
//     calibration cycle happens after every start, pause and resolution change.
// 3.  Difference against the reference, binarize, dilate, extract external contours.
// 4.  Contours below the noise floor are ignored; every surviving one is boxed on a
//     copy of the colour frame and the largest area becomes the raw motion score.
// 5.  The current frame always becomes the next reference.
// 6.  The raw score is scaled linearly so the configured ceiling maps to 100.

use image::{GrayImage, Rgb};

use crate::config::DetectorConfig;
use crate::core_modules::contours::find_external_contours;
use crate::core_modules::frame::Frame;
use crate::core_modules::image_ops;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// The result of comparing one frame against the reference.
#[derive(Debug, Clone)]
pub struct MotionEvent {
    /// Largest qualifying contour area scaled to `0..=100`.
    pub normalized_score: u8,
    /// True when at least one contour passed the noise floor.
    pub detected: bool,
    /// Largest qualifying contour area in px².
    pub max_contour_area: f64,
    /// The captured frame with a box drawn around every qualifying contour.
    pub annotated_frame: Frame,
}

pub struct MotionDetector {
    config: DetectorConfig,
    reference: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            reference: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Forgets the reference so the next frame only re-acquires a baseline.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Runs one detection cycle. Returns `None` on a calibration cycle.
    pub fn process(&mut self, frame: &Frame) -> Option<MotionEvent> {
        let gray = image_ops::gaussian_blur(
            &image_ops::to_grayscale(&frame.image),
            self.config.blur_kernel_size,
        );

        let reference = match self.reference.take() {
            Some(reference) if reference.dimensions() == gray.dimensions() => reference,
            _ => {
                self.reference = Some(gray);
                return None;
            }
        };

        let mask = image_ops::abs_diff_threshold(&reference, &gray, self.config.diff_threshold);
        let mask = image_ops::dilate(&mask, self.config.dilate_iterations);

        let mut annotated_frame = frame.clone();
        let mut max_contour_area = 0.0f64;
        let mut detected = false;

        for contour in find_external_contours(&mask) {
            let area = contour.area();
            if area < self.config.min_contour_area {
                continue;
            }
            detected = true;
            image_ops::draw_rectangle(
                &mut annotated_frame.image,
                contour.bounding_box.top_left(),
                contour.bounding_box.bottom_right(),
                BOX_COLOR,
                BOX_THICKNESS,
            );
            max_contour_area = max_contour_area.max(area);
        }

        self.reference = Some(gray);

        Some(MotionEvent {
            normalized_score: normalize_score(max_contour_area, self.config.score_ceiling),
            detected,
            max_contour_area,
            annotated_frame,
        })
    }
}

/// Scales a contour area to `0..=100`, rounding half to even.
pub fn normalize_score(area: f64, ceiling: f64) -> u8 {
    if area <= 0.0 || ceiling <= 0.0 {
        return 0;
    }
    (area / ceiling * 100.0).round_ties_even().min(100.0) as u8
}
