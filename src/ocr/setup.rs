use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::OcrError;
use crate::paths::get_tessdata_dir;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

/// Trained data needed for orientation detection.
pub const OSD_LANGUAGE: &str = "osd";

const COMMON_EXECUTABLE_PATHS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

const SYSTEM_TESSDATA_PATHS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

fn traineddata_file(language: &str) -> String {
    format!("{}.traineddata", language)
}

fn has_traineddata(dir: &Path, language: &str) -> bool {
    dir.join(traineddata_file(language)).exists()
}

/// Finds the Tesseract executable: configured path, then PATH, then common
/// install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf, OcrError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        debug!("Configured tesseract_path {} does not exist", path.display());
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    COMMON_EXECUTABLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or(OcrError::ExecutableNotFound)
}

/// Directories searched for trained data, most specific first.
fn tessdata_candidates(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    candidates.push(get_tessdata_dir());

    // Check TESSDATA_PREFIX environment variable
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        candidates.push(prefix.join("tessdata"));
        candidates.push(prefix);
    }
    candidates.extend(SYSTEM_TESSDATA_PATHS.iter().map(PathBuf::from));
    candidates
}

/// Finds a tessdata directory holding `<language>.traineddata`.
///
/// A directory that also holds the orientation data is preferred, since a
/// single `--tessdata-dir` serves both passes. Returns None when nothing is
/// found, leaving Tesseract to use its compiled-in default.
pub fn find_tessdata_dir(configured: Option<&Path>, language: &str) -> Option<PathBuf> {
    pick_tessdata_dir(tessdata_candidates(configured), language)
}

fn pick_tessdata_dir(candidates: Vec<PathBuf>, language: &str) -> Option<PathBuf> {
    if let Some(dir) = candidates
        .iter()
        .find(|dir| has_traineddata(dir, language) && has_traineddata(dir, OSD_LANGUAGE))
    {
        return Some(dir.clone());
    }

    let dir = candidates.into_iter().find(|dir| has_traineddata(dir, language))?;
    debug!(
        "{} not found next to {} in {}, deskew will be unavailable",
        traineddata_file(OSD_LANGUAGE),
        traineddata_file(language),
        dir.display()
    );
    Some(dir)
}

/// Ensures trained data for `language` and orientation detection exist in
/// one tessdata directory, copying from other known locations or
/// downloading what is missing.
///
/// The configured directory is used when set, otherwise the per-user one.
pub fn ensure_tessdata(configured: Option<&Path>, language: &str) -> Result<PathBuf> {
    let tessdata_dir = configured.map(Path::to_path_buf).unwrap_or_else(get_tessdata_dir);
    fs::create_dir_all(&tessdata_dir).context("Failed to create tessdata directory")?;

    let sources: Vec<PathBuf> = tessdata_candidates(configured)
        .into_iter()
        .filter(|dir| dir != &tessdata_dir)
        .collect();

    for lang in [language, OSD_LANGUAGE] {
        if !copy_traineddata(&tessdata_dir, &sources, lang)? {
            download_traineddata(&tessdata_dir, lang)?;
        }
    }

    Ok(tessdata_dir)
}

/// Makes `<lang>.traineddata` present in `target`, copying it from the first
/// source that has it. Returns false when no source does.
fn copy_traineddata(target: &Path, sources: &[PathBuf], lang: &str) -> Result<bool> {
    if has_traineddata(target, lang) {
        info!("{} found at: {}", traineddata_file(lang), target.display());
        return Ok(true);
    }

    let Some(source) = sources.iter().find(|dir| has_traineddata(dir, lang)) else {
        return Ok(false);
    };

    info!("Copying {} from: {}", traineddata_file(lang), source.display());
    fs::copy(source.join(traineddata_file(lang)), target.join(traineddata_file(lang)))
        .with_context(|| format!("Failed to copy {}", traineddata_file(lang)))?;
    Ok(true)
}

/// Downloads `<language>.traineddata` from the tessdata repository.
fn download_traineddata(tessdata_dir: &Path, language: &str) -> Result<()> {
    let url = format!("{}/{}", TESSDATA_REPO, traineddata_file(language));
    let path = tessdata_dir.join(traineddata_file(language));

    info!("Downloading {}...", traineddata_file(language));

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "supplement-check")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}: HTTP {}",
            traineddata_file(language),
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&path)?;
    file.write_all(&bytes)?;

    info!("Downloaded {} ({} bytes)", traineddata_file(language), bytes.len());

    Ok(())
}
