//! Configuration types for the label checker.
//!
//! Loads settings from config.json at startup. Provides OCR engine options,
//! preprocessing thresholds, upload limits and registry location.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Characters Tesseract may emit when reading nutrition labels.
pub const DEFAULT_WHITELIST: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789.,%()-: ";

/// Tesseract invocation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract language code
    pub language: String,
    /// Character whitelist passed as `tessedit_char_whitelist`
    pub whitelist: String,
    /// OCR engine mode (1 = LSTM only)
    pub oem: u8,
    /// Page segmentation mode for the content pass (6 = single uniform block)
    pub content_psm: u8,
    /// Page segmentation mode for the orientation pass (0 = OSD only)
    pub orientation_psm: u8,
    /// Explicit path to the tesseract executable
    pub tesseract_path: Option<PathBuf>,
    /// Explicit tessdata directory
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            whitelist: DEFAULT_WHITELIST.to_string(),
            oem: 1,
            content_psm: 6,
            orientation_psm: 0,
            tesseract_path: None,
            tessdata_dir: None,
        }
    }
}

/// Image cleanup parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Photos larger than this on either side are scaled down first (None = never)
    pub max_input_dimension: Option<u32>,
    /// Luma below this counts as text-bearing ink for ROI detection
    pub dark_threshold: u8,
    /// Sampling stride (pixels) of the ROI scan in both axes
    pub scan_stride: u32,
    /// ROI boxes narrower or shorter than this are ignored
    pub min_roi_size: u32,
    /// Magnification applied to the cropped ROI
    pub upscale_factor: u32,
    /// Run the orientation pass and rotate skewed crops
    pub deskew: bool,
    /// Reported rotations at or below this magnitude (degrees) are ignored
    pub deskew_min_degrees: f32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            max_input_dimension: Some(800),
            dark_threshold: 100,
            scan_stride: 2,
            min_roi_size: 20,
            upscale_factor: 3,
            deskew: true,
            deskew_min_degrees: 1.0,
        }
    }
}

/// Limits enforced before an upload enters the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Maximum accepted file size in bytes
    pub max_bytes: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Text matching limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Largest match request text accepted, in bytes
    pub max_text_bytes: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_text_bytes: 100 * 1024,
        }
    }
}

/// Where substance records come from.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// List endpoint of the hosted table (Airtable-style)
    pub url: Option<String>,
    /// Local JSON export used instead of `url` when set
    pub file: Option<PathBuf>,
    /// View name passed as the `view` query parameter
    pub view: Option<String>,
    /// Environment variable holding the bearer token
    pub token_env: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            view: Some("Grid view".to_string()),
            token_env: "SUPPLEMENT_CHECK_REGISTRY_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RegistrySettings {
    /// Reads the bearer token from the configured environment variable.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

/// Recognition cache sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of completed entries kept per cache
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ocr: OcrSettings,
    pub preprocess: PreprocessSettings,
    pub upload: UploadSettings,
    pub matching: MatchSettings,
    pub registry: RegistrySettings,
    pub cache: CacheSettings,
}

/// Returns the default config location: config.json next to the executable.
pub fn default_config_path() -> PathBuf {
    crate::paths::get_exe_dir().join("config.json")
}

/// Loads configuration from `path` (or the default location) or returns defaults.
///
/// A missing or unreadable file is not an error: the checker runs with
/// built-in settings and logs why.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    info!("Looking for config at: {}", config_path.display());

    if !config_path.exists() {
        info!("{} not found. Using default config.", config_path.display());
        return AppConfig::default();
    }

    match fs::read_to_string(&config_path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => {
                info!("Config loaded from {}", config_path.display());
                config
            }
            Err(e) => {
                warn!("Failed to parse {}: {}. Using defaults.", config_path.display(), e);
                AppConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}. Using defaults.", config_path.display(), e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{ "ocr": { "content_psm": 4 }, "upload": { "max_bytes": 1024 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.ocr.content_psm, 4);
        assert_eq!(config.ocr.orientation_psm, 0);
        assert_eq!(config.ocr.language, "eng");
        assert_eq!(config.upload.max_bytes, 1024);
        assert_eq!(config.preprocess.upscale_factor, 3);
        assert_eq!(config.preprocess.dark_threshold, 100);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.json")));
        assert_eq!(config.upload.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.cache.capacity, 64);
    }

    #[test]
    fn test_load_config_malformed_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.ocr.content_psm, 6);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "registry": { "file": "substances.json" } }"#).unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.registry.file, Some(PathBuf::from("substances.json")));
        assert_eq!(config.registry.view.as_deref(), Some("Grid view"));
    }
}
