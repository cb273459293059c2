use image::GrayImage;
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::debug;

use super::setup::{find_tessdata_dir, find_tesseract_executable};
use crate::config::OcrSettings;
use crate::error::OcrError;

/// What a recognition pass is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Recognized text, read from TSV output
    Content,
    /// Page rotation, read from the orientation and script detection report
    Orientation,
}

/// Options for one recognition pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeOptions {
    pub kind: PassKind,
    pub language: String,
    /// Characters the engine may emit (None = unrestricted)
    pub whitelist: Option<String>,
    /// OCR engine mode
    pub oem: u8,
    /// Page segmentation mode
    pub psm: u8,
}

impl RecognizeOptions {
    /// Full-block text recognition.
    pub fn content(settings: &OcrSettings) -> Self {
        Self {
            kind: PassKind::Content,
            language: settings.language.clone(),
            whitelist: Some(settings.whitelist.clone()).filter(|w| !w.is_empty()),
            oem: settings.oem,
            psm: settings.content_psm,
        }
    }

    /// Orientation detection only.
    pub fn orientation(settings: &OcrSettings) -> Self {
        Self {
            kind: PassKind::Orientation,
            psm: settings.orientation_psm,
            ..Self::content(settings)
        }
    }

    /// True if this pass asks for orientation and script detection output.
    pub fn is_orientation_pass(&self) -> bool {
        self.kind == PassKind::Orientation
    }
}

/// Output of one recognition pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Page rotation reported by orientation detection
    pub orientation_degrees: Option<f32>,
    /// Mean word confidence (0-100), when the engine reports one
    pub confidence: Option<f32>,
}

/// Any OCR backend that turns a grayscale raster into text.
///
/// Implementations do not need to be reentrant: the pipeline never runs two
/// recognitions on the same recognizer at once.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, raster: &GrayImage, options: &RecognizeOptions) -> Result<Recognition, OcrError>;
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
}

/// Represents a single word from OCR with confidence score
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// Runs the `tesseract` executable once per pass.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    tessdata: Option<PathBuf>,
}

impl TesseractRecognizer {
    pub fn new(executable: PathBuf, tessdata: Option<PathBuf>) -> Self {
        Self { executable, tessdata }
    }

    /// Locates the executable and tessdata from settings and the environment.
    pub fn from_settings(settings: &OcrSettings) -> Result<Self, OcrError> {
        let executable = find_tesseract_executable(settings.tesseract_path.as_deref())?;
        let tessdata = find_tessdata_dir(settings.tessdata_dir.as_deref(), &settings.language);
        Ok(Self::new(executable, tessdata))
    }

    fn run(&self, raster: &GrayImage, options: &RecognizeOptions) -> Result<String, OcrError> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        raster.save(temp_input.path())?;

        let mut command = Command::new(&self.executable);
        command.arg(temp_input.path()).arg("stdout");
        if let Some(tessdata) = &self.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        command
            .arg("-l")
            .arg(&options.language)
            .arg("--oem")
            .arg(options.oem.to_string())
            .arg("--psm")
            .arg(options.psm.to_string());
        if let Some(whitelist) = &options.whitelist {
            command.arg("-c").arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        if !options.is_orientation_pass() {
            command.arg("tsv");
        }

        let output = command.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Failed loading language") || stderr.contains("Error opening data file") {
                return Err(OcrError::TessdataNotFound(options.language.clone()));
            }
            return Err(OcrError::EngineFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, raster: &GrayImage, options: &RecognizeOptions) -> Result<Recognition, OcrError> {
        if raster.width() == 0 || raster.height() == 0 {
            return Err(OcrError::EmptyImage);
        }

        debug!(
            "Running Tesseract {:?} pass ({}x{}, lang={}, oem={}, psm={})",
            options.kind,
            raster.width(),
            raster.height(),
            options.language,
            options.oem,
            options.psm
        );

        let stdout = self.run(raster, options)?;

        if options.is_orientation_pass() {
            let degrees = parse_orientation(&stdout);
            if degrees.is_none() {
                return Err(OcrError::EngineFailed("no orientation reported".to_string()));
            }
            return Ok(Recognition {
                text: String::new(),
                orientation_degrees: degrees,
                confidence: None,
            });
        }

        let lines = parse_tsv_output(&stdout);
        Ok(recognition_from_lines(&lines))
    }
}

/// Joins parsed lines into text and averages word confidence.
fn recognition_from_lines(lines: &[OcrLine]) -> Recognition {
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let words: Vec<f32> = lines
        .iter()
        .flat_map(|l| l.words.iter().map(|w| w.confidence))
        .collect();
    let confidence = if words.is_empty() {
        None
    } else {
        Some(words.iter().sum::<f32>() / words.len() as f32)
    };

    Recognition {
        text,
        orientation_degrees: None,
        confidence,
    }
}

/// Reads `Orientation in degrees: N` from Tesseract's OSD report.
fn parse_orientation(osd: &str) -> Option<f32> {
    osd.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Orientation in degrees:")
            .and_then(|value| value.trim().parse::<f32>().ok())
    })
}

/// Parses Tesseract TSV output into structured OcrLine data.
///
/// Words are grouped by (block, paragraph, line) since Tesseract restarts
/// line numbering inside every paragraph.
fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    fn flush(lines: &mut Vec<OcrLine>, words: &mut Vec<OcrWord>) {
        if words.is_empty() {
            return;
        }
        let words = std::mem::take(words);
        let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(OcrLine { text, words, confidence });
    }

    for line in tsv.lines().skip(1) {
        // Skip header
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        let text = fields[11].trim();

        // Level 5 = word
        if level != 5 || text.is_empty() || conf < 0.0 {
            continue;
        }

        if current_key != Some(key) {
            flush(&mut lines, &mut current_words);
            current_key = Some(key);
        }

        current_words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
        });
    }

    flush(&mut lines, &mut current_words);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t600\t400\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t80\t20\t96.5\tSupplement
5\t1\t1\t1\t1\t2\t95\t10\t50\t20\t93.5\tFacts
4\t1\t1\t2\t1\t0\t10\t40\t300\t20\t-1\t
5\t1\t1\t2\t1\t1\t10\t40\t90\t20\t88.0\tCaffeine
5\t1\t1\t2\t1\t2\t105\t40\t60\t20\t82.0\t200mg
5\t1\t1\t2\t1\t3\t170\t40\t5\t20\t-1\t
5\t1\t2\t1\t1\t1\t10\t80\t90\t20\t90.0\tGuarana";

    #[test]
    fn test_parse_tsv_groups_by_paragraph_line() {
        let lines = parse_tsv_output(TSV);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Supplement Facts", "Caffeine 200mg", "Guarana"]);
        assert_eq!(lines[0].confidence, 95.0);
        assert_eq!(lines[1].words.len(), 2);
    }

    #[test]
    fn test_recognition_from_lines() {
        let recognition = recognition_from_lines(&parse_tsv_output(TSV));
        assert_eq!(recognition.text, "Supplement Facts\nCaffeine 200mg\nGuarana");
        assert_eq!(recognition.confidence, Some(90.0));
        assert_eq!(recognition.orientation_degrees, None);
    }

    #[test]
    fn test_parse_empty_tsv() {
        let recognition = recognition_from_lines(&parse_tsv_output(""));
        assert_eq!(recognition.text, "");
        assert_eq!(recognition.confidence, None);
    }

    #[test]
    fn test_parse_orientation() {
        let osd = "Page number: 0\nOrientation in degrees: 270\nRotate: 90\nOrientation confidence: 5.42\nScript: Latin\n";
        assert_eq!(parse_orientation(osd), Some(270.0));
        assert_eq!(parse_orientation("Estimating resolution as 300"), None);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = OcrSettings::default();
        let content = RecognizeOptions::content(&settings);
        let orientation = RecognizeOptions::orientation(&settings);

        assert_eq!(content.psm, 6);
        assert!(!content.is_orientation_pass());
        assert_eq!(orientation.psm, 0);
        assert!(orientation.is_orientation_pass());
        assert_eq!(orientation.whitelist, content.whitelist);
    }

    #[test]
    fn test_pass_kind_independent_of_psm() {
        let settings = OcrSettings {
            content_psm: 0,
            orientation_psm: 1,
            ..OcrSettings::default()
        };
        let content = RecognizeOptions::content(&settings);
        let orientation = RecognizeOptions::orientation(&settings);

        assert_eq!(content.kind, PassKind::Content);
        assert!(!content.is_orientation_pass());
        assert_eq!(orientation.kind, PassKind::Orientation);
        assert!(orientation.is_orientation_pass());
        assert_eq!(orientation.psm, 1);
    }

    #[test]
    fn test_empty_raster_rejected() {
        let recognizer = TesseractRecognizer::new(PathBuf::from("tesseract"), None);
        let empty = GrayImage::new(0, 0);
        let result = recognizer.recognize(&empty, &RecognizeOptions::content(&OcrSettings::default()));
        assert!(matches!(result, Err(OcrError::EmptyImage)));
    }
}
