//! One label photo through the whole pipeline.
//!
//! upload checks -> decode -> preprocess -> OCR (cached per image) ->
//! registry fetch -> match -> annotate

use image::ImageFormat;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{image_key, ScanCache};
use super::upload::{decode_upload, validate_upload, ImageUpload};
use crate::config::AppConfig;
use crate::error::{InputRejection, OcrError, PipelineError};
use crate::ocr::{Degradation, Preprocessor, RecognizeOptions, TextRecognizer};
use crate::registry::RegistrySource;
use crate::substance::{annotate, MatchSummary, SubstanceMatcher, SubstanceRecord};

/// What OCR produced for an image.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizedText {
    Text(String),
    /// Recognition failed or produced only whitespace
    NoTextDetected,
}

impl RecognizedText {
    fn from_raw(raw: String) -> Self {
        if raw.trim().is_empty() {
            RecognizedText::NoTextDetected
        } else {
            RecognizedText::Text(raw)
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RecognizedText::Text(text) => Some(text.as_str()),
            RecognizedText::NoTextDetected => None,
        }
    }
}

/// Cached result of preprocessing plus recognition.
#[derive(Debug, Clone)]
struct Recognized {
    text: RecognizedText,
    confidence: Option<f32>,
    degradations: Vec<Degradation>,
}

enum RecognizeFailure {
    Rejected(InputRejection),
    Engine(OcrError),
}

/// Everything known about one scanned label.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub name: String,
    /// Content address of the uploaded bytes
    pub image_key: String,
    pub text: RecognizedText,
    /// Mean OCR word confidence (0-100)
    pub confidence: Option<f32>,
    /// Preprocessing stages that were skipped
    pub degradations: Vec<Degradation>,
    /// Why recognition produced nothing, if it failed outright
    pub recognition_error: Option<String>,
    /// Matched substances in registry order
    pub matches: Vec<MatchSummary>,
    /// Recognized text with matched names wrapped in markup
    pub annotated: Option<String>,
}

impl ScanReport {
    pub fn matched_records(&self) -> Vec<SubstanceRecord> {
        self.matches.iter().map(|m| m.record.clone()).collect()
    }

    pub fn recognition_failed(&self) -> bool {
        self.recognition_error.is_some()
    }
}

/// Owns the collaborators and the recognition cache for a session.
///
/// Independent pipelines share nothing.
pub struct ScanPipeline {
    config: AppConfig,
    preprocessor: Preprocessor,
    content_options: RecognizeOptions,
    recognizer: Arc<dyn TextRecognizer>,
    registry: Arc<dyn RegistrySource>,
    cache: ScanCache<Recognized>,
}

impl ScanPipeline {
    pub fn new(config: AppConfig, recognizer: Arc<dyn TextRecognizer>, registry: Arc<dyn RegistrySource>) -> Self {
        let preprocessor = Preprocessor::new(
            config.preprocess.clone(),
            RecognizeOptions::orientation(&config.ocr),
        );
        let content_options = RecognizeOptions::content(&config.ocr);
        let cache = ScanCache::new(config.cache.capacity);

        Self {
            config,
            preprocessor,
            content_options,
            recognizer,
            registry,
            cache,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Scans one upload.
    ///
    /// Fails only when the upload is rejected or the registry is
    /// unreachable; a failed recognition is reported as
    /// [`RecognizedText::NoTextDetected`].
    pub fn scan(&self, upload: &ImageUpload) -> Result<ScanReport, PipelineError> {
        let format = validate_upload(upload, &self.config.upload)?;
        let key = image_key(&upload.bytes);

        let (recognized, recognition_error) = match self
            .cache
            .get_or_compute(&key, || self.recognize(upload, format))
        {
            Ok(recognized) => (recognized, None),
            Err(RecognizeFailure::Rejected(rejection)) => return Err(rejection.into()),
            Err(RecognizeFailure::Engine(e)) => {
                warn!("OCR failed for {}: {}", upload.name, e);
                let recognized = Recognized {
                    text: RecognizedText::NoTextDetected,
                    confidence: None,
                    degradations: Vec::new(),
                };
                (recognized, Some(e.to_string()))
            }
        };

        let mut report = ScanReport {
            name: upload.name.clone(),
            image_key: key,
            text: recognized.text,
            confidence: recognized.confidence,
            degradations: recognized.degradations,
            recognition_error,
            matches: Vec::new(),
            annotated: None,
        };

        let Some(text) = report.text.as_str() else {
            info!("{}: no text detected", report.name);
            return Ok(report);
        };

        let registry = self.registry.fetch()?;
        let matches = SubstanceMatcher::new(&registry).summarize(text);
        let records: Vec<SubstanceRecord> = matches.iter().map(|m| m.record.clone()).collect();
        let annotated = annotate(text, &records);

        info!("{}: {} substance(s) matched", report.name, matches.len());
        report.annotated = Some(annotated);
        report.matches = matches;
        Ok(report)
    }

    /// Checks already-recognized text against the registry.
    pub fn check_text(&self, text: &str) -> Result<Vec<SubstanceRecord>, PipelineError> {
        let registry = self.registry.fetch()?;
        Ok(SubstanceMatcher::new(&registry).find_matches(text))
    }

    fn recognize(&self, upload: &ImageUpload, format: ImageFormat) -> Result<Recognized, RecognizeFailure> {
        let image = decode_upload(upload, format).map_err(RecognizeFailure::Rejected)?;

        let orientation = if self.preprocessor.settings().deskew {
            Some(self.recognizer.as_ref())
        } else {
            None
        };
        let raster = self.preprocessor.preprocess(&image, orientation);

        let recognition = self
            .recognizer
            .recognize(&raster.image, &self.content_options)
            .map_err(RecognizeFailure::Engine)?;

        debug!(
            "Recognized {} characters from {} (psm={})",
            recognition.text.len(),
            upload.name,
            self.content_options.psm
        );

        Ok(Recognized {
            text: RecognizedText::from_raw(recognition.text),
            confidence: recognition.confidence,
            degradations: raster.degradations,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::ocr::Recognition;
    use crate::pipeline::upload::tests::png_bytes;
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns scripted content text, one entry per content pass.
    pub(crate) struct ScriptedRecognizer {
        pub(crate) script: Mutex<Vec<Result<String, String>>>,
        pub(crate) content_calls: AtomicUsize,
    }

    impl ScriptedRecognizer {
        pub(crate) fn new(script: Vec<Result<&str, &str>>) -> Self {
            let script = script
                .into_iter()
                .rev()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            Self {
                script: Mutex::new(script),
                content_calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, _raster: &GrayImage, options: &RecognizeOptions) -> Result<Recognition, OcrError> {
            if options.is_orientation_pass() {
                return Ok(Recognition {
                    orientation_degrees: Some(0.0),
                    ..Recognition::default()
                });
            }
            self.content_calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(Recognition {
                    text,
                    confidence: Some(91.0),
                    ..Recognition::default()
                }),
                Some(Err(message)) => Err(OcrError::EngineFailed(message)),
                None => Err(OcrError::EngineFailed("script exhausted".to_string())),
            }
        }
    }

    struct DownRegistry;

    impl RegistrySource for DownRegistry {
        fn fetch(&self) -> Result<Vec<SubstanceRecord>, RegistryError> {
            Err(RegistryError::Status(503))
        }
    }

    pub(crate) fn registry() -> Vec<SubstanceRecord> {
        vec![
            SubstanceRecord::new("rec1", "Caffeine", &["1,3,7-Trimethylxanthine"]).with_ban_type("Prohibited"),
            SubstanceRecord::new("rec2", "Synephrine", &["Bitter Orange Extract"])
                .with_ban_type("Limited to Out of Competition"),
        ]
    }

    pub(crate) fn upload(name: &str, width: u32) -> ImageUpload {
        ImageUpload::new(name, Some("image/png".to_string()), png_bytes(width, 40))
    }

    fn pipeline(recognizer: Arc<ScriptedRecognizer>, registry: Arc<dyn RegistrySource>) -> ScanPipeline {
        ScanPipeline::new(AppConfig::default(), recognizer, registry)
    }

    #[test]
    fn test_scan_matches_and_annotates() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("Contains Caffeine 200mg")]));
        let pipeline = pipeline(recognizer, Arc::new(registry()));

        let report = pipeline.scan(&upload("label.png", 60)).unwrap();
        assert_eq!(report.text, RecognizedText::Text("Contains Caffeine 200mg".to_string()));
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].record.id, "rec1");
        assert!(!report.recognition_failed());
        let annotated = report.annotated.as_deref().unwrap();
        assert!(annotated.contains(">Caffeine</mark> 200mg"));
    }

    #[test]
    fn test_repeat_scan_uses_cache() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("bitter orange extract 30mg")]));
        let pipeline = pipeline(Arc::clone(&recognizer), Arc::new(registry()));

        let first = pipeline.scan(&upload("a.png", 60)).unwrap();
        let second = pipeline.scan(&upload("again.png", 60)).unwrap();

        assert_eq!(recognizer.content_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.image_key, second.image_key);
        assert_eq!(second.matches[0].record.id, "rec2");
    }

    #[test]
    fn test_ocr_failure_is_no_text_and_not_cached() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Err("tesseract crashed"), Ok("Caffeine")]));
        let pipeline = pipeline(Arc::clone(&recognizer), Arc::new(registry()));

        let failed = pipeline.scan(&upload("a.png", 60)).unwrap();
        assert_eq!(failed.text, RecognizedText::NoTextDetected);
        assert!(failed.recognition_failed());
        assert!(failed.matches.is_empty());

        let retried = pipeline.scan(&upload("a.png", 60)).unwrap();
        assert_eq!(retried.matches.len(), 1);
        assert_eq!(recognizer.content_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_blank_text_is_no_text_detected() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("  \n ")]));
        let report = pipeline(recognizer, Arc::new(DownRegistry)).scan(&upload("a.png", 60)).unwrap();
        assert_eq!(report.text, RecognizedText::NoTextDetected);
        assert!(!report.recognition_failed());
    }

    #[test]
    fn test_registry_outage_is_distinct_error() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("Caffeine")]));
        let result = pipeline(recognizer, Arc::new(DownRegistry)).scan(&upload("a.png", 60));
        assert!(matches!(
            result,
            Err(PipelineError::RegistryUnavailable(RegistryError::Status(503)))
        ));
    }

    #[test]
    fn test_rejected_upload_never_reaches_ocr() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Ok("Caffeine")]));
        let pipeline = pipeline(Arc::clone(&recognizer), Arc::new(registry()));
        let bad = ImageUpload::new("doc.txt", Some("text/plain".to_string()), b"Caffeine".to_vec());

        let err = pipeline.scan(&bad).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(recognizer.content_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_check_text() {
        let recognizer = Arc::new(ScriptedRecognizer::new(Vec::new()));
        let pipeline = pipeline(recognizer, Arc::new(registry()));
        let matches = pipeline.check_text("bitter orange extract, caffeine").unwrap();
        let ids: Vec<&str> = matches.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rec1", "rec2"]);
    }
}
