use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use tracing::{debug, warn};

use super::engine::{RecognizeOptions, TextRecognizer};
use crate::config::PreprocessSettings;

/// A region of interest in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A cleanup stage that did not apply; the previous stage's output was kept.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    /// Dark-pixel bounding box was smaller than the minimum ROI size
    RoiTooSmall { width: i64, height: i64 },
    /// Deskew was requested but no orientation recognizer was supplied
    DeskewUnavailable,
    /// The orientation pass failed
    DeskewFailed(String),
}

/// An OCR-ready raster plus what happened while producing it.
#[derive(Debug, Clone)]
pub struct ProcessedRaster {
    pub image: GrayImage,
    /// Crop applied, in coordinates of the (downscaled) input
    pub roi: Option<Roi>,
    /// Rotation applied to the crop, counter-clockwise in degrees
    pub rotated_degrees: Option<f32>,
    pub degradations: Vec<Degradation>,
}

/// Luma of an RGB pixel: 0.3R + 0.59G + 0.11B.
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.3 * r as f32 + 0.59 * g as f32 + 0.11 * b as f32
}

/// Converts to grayscale and stretches luma linearly to 0..=255.
///
/// A flat image (max == min) is left at its own luma rather than collapsed
/// to black.
pub fn grayscale_stretch(img: &RgbaImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let lumas: Vec<f32> = img.pixels().map(|p| luma(p[0], p[1], p[2])).collect();

    let min = lumas.iter().copied().fold(f32::INFINITY, f32::min);
    let max = lumas.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let (offset, scale) = if max > min {
        (min, 255.0 / (max - min))
    } else {
        (0.0, 1.0)
    };

    let data = lumas
        .iter()
        .map(|&l| ((l - offset) * scale).clamp(0.0, 255.0).round() as u8)
        .collect();

    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Bounding box of pixels darker than `threshold`, sampled every `stride`
/// pixels in both axes.
///
/// Boxes narrower or shorter than `min_size` (including "no dark pixel at
/// all") are reported as [`Degradation::RoiTooSmall`].
pub fn detect_roi(gray: &GrayImage, threshold: u8, stride: u32, min_size: u32) -> Result<Roi, Degradation> {
    let (width, height) = gray.dimensions();
    let stride = stride.max(1) as usize;

    let mut left = width as i64;
    let mut right = 0i64;
    let mut top = height as i64;
    let mut bottom = 0i64;

    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            if gray.get_pixel(x, y)[0] < threshold {
                left = left.min(x as i64);
                right = right.max(x as i64);
                top = top.min(y as i64);
                bottom = bottom.max(y as i64);
            }
        }
    }

    let roi_width = right - left;
    let roi_height = bottom - top;
    if roi_width < min_size as i64 || roi_height < min_size as i64 {
        return Err(Degradation::RoiTooSmall {
            width: roi_width,
            height: roi_height,
        });
    }

    Ok(Roi {
        left: left as u32,
        top: top as u32,
        width: roi_width as u32,
        height: roi_height as u32,
    })
}

/// Crops `roi` and magnifies it by `factor`.
pub fn crop_and_upscale(gray: &GrayImage, roi: Roi, factor: u32) -> GrayImage {
    let cropped = imageops::crop_imm(gray, roi.left, roi.top, roi.width, roi.height).to_image();
    let factor = factor.max(1);
    if factor == 1 {
        return cropped;
    }
    imageops::resize(
        &cropped,
        roi.width * factor,
        roi.height * factor,
        FilterType::Triangle,
    )
}

/// Rotates counter-clockwise by `degrees` about the center, keeping the
/// canvas size and filling uncovered corners with white.
pub fn rotate_counter_clockwise(gray: &GrayImage, degrees: f32) -> GrayImage {
    // rotate_about_center turns clockwise for positive angles
    rotate_about_center(gray, -degrees.to_radians(), Interpolation::Bilinear, Luma([255u8]))
}

/// Scales `image` down to fit within `max_dimension` on both sides.
pub fn downscale_to_fit(image: &DynamicImage, max_dimension: u32) -> Option<DynamicImage> {
    let (width, height) = image.dimensions();
    if max_dimension == 0 || (width <= max_dimension && height <= max_dimension) {
        return None;
    }
    Some(image.resize(max_dimension, max_dimension, FilterType::Triangle))
}

/// Turns a label photo into a raster suited to OCR.
///
/// Never fails: each stage that cannot apply is recorded as a
/// [`Degradation`] and the previous stage's output is passed on.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    settings: PreprocessSettings,
    orientation_options: RecognizeOptions,
}

impl Preprocessor {
    pub fn new(settings: PreprocessSettings, orientation_options: RecognizeOptions) -> Self {
        Self {
            settings,
            orientation_options,
        }
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// Runs grayscale + stretch, ROI crop + upscale and optional deskew.
    ///
    /// `orientation` is consulted only for the deskew pass.
    pub fn preprocess(&self, image: &DynamicImage, orientation: Option<&dyn TextRecognizer>) -> ProcessedRaster {
        let downscaled = self
            .settings
            .max_input_dimension
            .and_then(|max| downscale_to_fit(image, max));
        let source = downscaled.as_ref().unwrap_or(image);

        let gray = grayscale_stretch(&source.to_rgba8());
        let mut degradations = Vec::new();

        let roi = match detect_roi(
            &gray,
            self.settings.dark_threshold,
            self.settings.scan_stride,
            self.settings.min_roi_size,
        ) {
            Ok(roi) => roi,
            Err(degradation) => {
                debug!("ROI detection degenerate ({:?}), using whole image", degradation);
                degradations.push(degradation);
                return ProcessedRaster {
                    image: gray,
                    roi: None,
                    rotated_degrees: None,
                    degradations,
                };
            }
        };

        debug!(
            "ROI {}x{} at ({}, {}), upscaling x{}",
            roi.width, roi.height, roi.left, roi.top, self.settings.upscale_factor
        );
        let cropped = crop_and_upscale(&gray, roi, self.settings.upscale_factor);

        let mut rotated_degrees = None;
        let image = if !self.settings.deskew {
            cropped
        } else {
            match orientation {
                None => {
                    degradations.push(Degradation::DeskewUnavailable);
                    cropped
                }
                Some(recognizer) => match recognizer.recognize(&cropped, &self.orientation_options) {
                    Ok(result) => match result.orientation_degrees {
                        Some(angle) if angle.abs() > self.settings.deskew_min_degrees => {
                            debug!("Deskewing by {:.1} degrees", angle);
                            rotated_degrees = Some(angle);
                            rotate_counter_clockwise(&cropped, angle)
                        }
                        _ => cropped,
                    },
                    Err(e) => {
                        warn!("Deskew failed, using scaled cropped image: {}", e);
                        degradations.push(Degradation::DeskewFailed(e.to_string()));
                        cropped
                    }
                },
            }
        };

        ProcessedRaster {
            image,
            roi: Some(roi),
            rotated_degrees,
            degradations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrSettings;
    use crate::error::OcrError;
    use crate::ocr::engine::Recognition;
    use image::Rgba;

    struct FixedOrientation(Result<f32, ()>);

    impl TextRecognizer for FixedOrientation {
        fn recognize(&self, _raster: &GrayImage, options: &RecognizeOptions) -> Result<Recognition, OcrError> {
            assert!(options.is_orientation_pass());
            match self.0 {
                Ok(degrees) => Ok(Recognition {
                    orientation_degrees: Some(degrees),
                    ..Recognition::default()
                }),
                Err(()) => Err(OcrError::EngineFailed("osd.traineddata missing".to_string())),
            }
        }
    }

    fn preprocessor(settings: PreprocessSettings) -> Preprocessor {
        Preprocessor::new(settings, RecognizeOptions::orientation(&OcrSettings::default()))
    }

    /// 100x100 white image with a black box covering x 20..80, y 30..70.
    fn label_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(100, 100, |x, y| {
            if (20..80).contains(&x) && (30..70).contains(&y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        }))
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(0, 0, 0), 0.0);
        assert!((luma(255, 255, 255) - 255.0).abs() < 0.01);
        assert!((luma(100, 0, 0) - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_grayscale_stretch_expands_range() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([50, 50, 50, 255]));
        img.put_pixel(1, 0, Rgba([150, 150, 150, 255]));

        let gray = grayscale_stretch(&img);
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_grayscale_stretch_flat_image() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let gray = grayscale_stretch(&img);
        assert!(gray.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_detect_roi_box() {
        let gray = grayscale_stretch(&label_image().to_rgba8());
        let roi = detect_roi(&gray, 100, 2, 20).unwrap();
        // Sampled on even coordinates: x 20..=78, y 30..=68
        assert_eq!(roi, Roi { left: 20, top: 30, width: 58, height: 38 });
    }

    #[test]
    fn test_detect_roi_blank_image_degenerates() {
        let gray = GrayImage::from_pixel(100, 100, Luma([255]));
        assert!(matches!(detect_roi(&gray, 100, 2, 20), Err(Degradation::RoiTooSmall { .. })));
    }

    #[test]
    fn test_detect_roi_small_speck_degenerates() {
        let mut gray = GrayImage::from_pixel(100, 100, Luma([255]));
        for y in 40..50 {
            for x in 40..50 {
                gray.put_pixel(x, y, Luma([0]));
            }
        }
        assert!(detect_roi(&gray, 100, 2, 20).is_err());
    }

    #[test]
    fn test_blank_image_returned_uncropped() {
        let blank = DynamicImage::ImageRgba8(RgbaImage::from_pixel(120, 90, Rgba([255, 255, 255, 255])));
        let result = preprocessor(PreprocessSettings::default()).preprocess(&blank, None);

        assert_eq!(result.image.dimensions(), (120, 90));
        assert_eq!(result.roi, None);
        assert!(matches!(result.degradations[..], [Degradation::RoiTooSmall { .. }]));
        assert!(result.image.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_crop_and_upscale() {
        let settings = PreprocessSettings {
            deskew: false,
            ..PreprocessSettings::default()
        };
        let result = preprocessor(settings).preprocess(&label_image(), None);

        assert_eq!(result.image.dimensions(), (174, 114));
        assert_eq!(result.roi, Some(Roi { left: 20, top: 30, width: 58, height: 38 }));
        assert!(result.degradations.is_empty());
        assert!(result.image.get_pixel(87, 57)[0] < 100);
    }

    #[test]
    fn test_deskew_rotates_when_angle_reported() {
        let recognizer = FixedOrientation(Ok(90.0));
        let result = preprocessor(PreprocessSettings::default()).preprocess(&label_image(), Some(&recognizer as &dyn TextRecognizer));

        assert_eq!(result.rotated_degrees, Some(90.0));
        assert_eq!(result.image.dimensions(), (174, 114));
        assert!(result.degradations.is_empty());
    }

    #[test]
    fn test_deskew_ignores_small_angles() {
        let recognizer = FixedOrientation(Ok(0.5));
        let result = preprocessor(PreprocessSettings::default()).preprocess(&label_image(), Some(&recognizer as &dyn TextRecognizer));
        assert_eq!(result.rotated_degrees, None);
    }

    #[test]
    fn test_deskew_failure_falls_back_to_crop() {
        let recognizer = FixedOrientation(Err(()));
        let result = preprocessor(PreprocessSettings::default()).preprocess(&label_image(), Some(&recognizer as &dyn TextRecognizer));

        assert_eq!(result.image.dimensions(), (174, 114));
        assert_eq!(result.rotated_degrees, None);
        assert!(matches!(result.degradations[..], [Degradation::DeskewFailed(_)]));
    }

    #[test]
    fn test_deskew_without_recognizer_is_recorded() {
        let result = preprocessor(PreprocessSettings::default()).preprocess(&label_image(), None);

        assert_eq!(result.image.dimensions(), (174, 114));
        assert_eq!(result.rotated_degrees, None);
        assert!(matches!(result.degradations[..], [Degradation::DeskewUnavailable]));
    }

    #[test]
    fn test_orientation_pass_with_custom_psm() {
        let ocr = OcrSettings {
            orientation_psm: 1,
            ..OcrSettings::default()
        };
        let recognizer = FixedOrientation(Ok(90.0));
        let result = Preprocessor::new(PreprocessSettings::default(), RecognizeOptions::orientation(&ocr))
            .preprocess(&label_image(), Some(&recognizer as &dyn TextRecognizer));

        assert_eq!(result.rotated_degrees, Some(90.0));
    }

    #[test]
    fn test_downscale_to_fit() {
        let wide = DynamicImage::ImageRgba8(RgbaImage::new(1600, 400));
        let scaled = downscale_to_fit(&wide, 800).unwrap();
        assert_eq!(scaled.dimensions(), (800, 200));

        let small = DynamicImage::ImageRgba8(RgbaImage::new(640, 480));
        assert!(downscale_to_fit(&small, 800).is_none());
    }

    #[test]
    fn test_rotate_keeps_canvas_size() {
        let gray = GrayImage::from_pixel(30, 10, Luma([0]));
        let rotated = rotate_counter_clockwise(&gray, 15.0);
        assert_eq!(rotated.dimensions(), (30, 10));
    }
}
