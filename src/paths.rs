use std::path::PathBuf;
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the per-user data directory: `<local data>/supplement-check/`
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("supplement-check")
}

/// Returns the logs directory: `<data dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Returns the local tessdata directory: `<data dir>/tessdata/`
pub fn get_tessdata_dir() -> PathBuf {
    get_data_dir().join("tessdata")
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    std::fs::create_dir_all(get_tessdata_dir())?;
    Ok(())
}
