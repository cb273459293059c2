//! Supplement label checker
//!
//! Command-line front end: scans label photos, checks text and searches the
//! banned-substance registry.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use supplement_check::api::{handle_match_request, handle_search_request, MatchRequest, RecordsResponse, SearchRequest};
use supplement_check::config::{load_config, AppConfig};
use supplement_check::error::PipelineError;
use supplement_check::logging::init_logging;
use supplement_check::ocr::setup::find_tesseract_executable;
use supplement_check::ocr::{ensure_tessdata, TesseractRecognizer};
use supplement_check::paths;
use supplement_check::pipeline::report::{append_slot, init_csv};
use supplement_check::pipeline::{run_batch, BatchSlot, CancellationFlag, ImageUpload, RecognizedText, ScanPipeline};
use supplement_check::registry::{self, RegistrySource};
use supplement_check::substance::{BanType, BanTypeFilter};

#[derive(Parser, Debug)]
#[command(name = "supplement-check", version, about = "Check supplement labels for banned substances")]
struct Cli {
    /// Path to config.json (default: next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read substances from a local JSON export instead of the configured URL
    #[arg(long, global = true)]
    registry_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR label photos and report matched substances
    Scan {
        /// Image files, scanned in order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Only show matches with this ban type (e.g. "Prohibited")
        #[arg(long)]
        ban_type: Option<String>,

        /// Append results to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the recognized text with matches marked up
        #[arg(long)]
        annotate: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check text (e.g. already-recognized label text) against the registry
    Check {
        /// Text to check
        #[arg(long, conflicts_with = "text_file")]
        text: Option<String>,

        /// File holding the text to check
        #[arg(long)]
        text_file: Option<PathBuf>,
    },
    /// Search the registry by name, synonym or banning organization
    Search {
        query: String,
    },
    /// Locate Tesseract and download missing trained data
    Setup,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match paths::ensure_directories() {
        Ok(()) => Some(paths::get_logs_dir()),
        Err(e) => {
            eprintln!("Warning: could not create data directories: {}", e);
            None
        }
    };
    init_logging(cli.verbose, log_dir.as_deref());

    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        error!("[PANIC]{} {}", location, msg);
    }));

    let mut config = load_config(cli.config.as_deref());
    if let Some(file) = cli.registry_file {
        config.registry.file = Some(file);
    }

    match cli.command {
        Command::Scan {
            images,
            ban_type,
            csv,
            annotate,
            json,
        } => run_scan(config, &images, ban_type.as_deref(), csv.as_deref(), annotate, json),
        Command::Check { text, text_file } => run_check(&config, text, text_file.as_deref()),
        Command::Search { query } => run_search(&config, query),
        Command::Setup => run_setup(&config),
    }
}

fn open_registry(config: &AppConfig) -> Result<Box<dyn RegistrySource>> {
    registry::from_settings(&config.registry)?
        .ok_or_else(|| anyhow!("No registry configured. Set registry.url or registry.file in config.json, or pass --registry-file"))
}

fn run_scan(
    config: AppConfig,
    images: &[PathBuf],
    ban_type: Option<&str>,
    csv: Option<&Path>,
    annotate: bool,
    as_json: bool,
) -> Result<()> {
    let registry: Arc<dyn RegistrySource> = Arc::from(open_registry(&config)?);
    let recognizer = TesseractRecognizer::from_settings(&config.ocr).context("OCR engine unavailable")?;

    let mut filter = BanTypeFilter::new();
    if let Some(label) = ban_type {
        let selected = BanType::from_label(label);
        if selected == BanType::None && !label.trim().eq_ignore_ascii_case("none") {
            let known: Vec<&str> = BanType::ALL.iter().map(|b| b.label()).collect();
            bail!("Unknown ban type {:?}. Expected one of: {}", label, known.join(", "));
        }
        filter.toggle(selected);
    }

    let mut uploads = Vec::with_capacity(images.len());
    for path in images {
        let upload = ImageUpload::from_path(path, &config.upload).with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(upload);
    }
    let names: Vec<String> = uploads.iter().map(|u| u.name.clone()).collect();

    if let Some(csv_path) = csv {
        init_csv(csv_path)?;
    }

    info!("Scanning {} image(s)", uploads.len());
    let pipeline = Arc::new(ScanPipeline::new(config, Arc::new(recognizer), registry));
    let cancel = CancellationFlag::new();

    let slots = run_batch(pipeline, uploads, &cancel, |index, slot| {
        if let BatchSlot::Failed(PipelineError::RegistryUnavailable(e)) = slot {
            error!("Registry unavailable, skipping remaining images: {}", e);
            cancel.cancel();
        }
        if let Some(csv_path) = csv {
            if let Err(e) = append_slot(csv_path, index, &names[index], slot) {
                warn!("Failed to write CSV row for {}: {}", names[index], e);
            }
        }
    });

    if as_json {
        let results: Vec<_> = slots
            .iter()
            .zip(&names)
            .map(|(slot, name)| slot_json(name, slot, &filter))
            .collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for (slot, name) in slots.iter().zip(&names) {
            print_slot(name, slot, &filter, annotate);
        }
    }

    if slots.iter().any(|s| matches!(s, BatchSlot::Failed(_))) {
        bail!("Some images could not be checked");
    }
    Ok(())
}

fn slot_json(name: &str, slot: &BatchSlot, filter: &BanTypeFilter) -> serde_json::Value {
    match slot {
        BatchSlot::Completed(report) => {
            let shown = filter.apply(&report.matched_records());
            let status = if report.text == RecognizedText::NoTextDetected { "no_text" } else { "ok" };
            json!({
                "image": name,
                "status": status,
                "text": report.text.as_str(),
                "annotated": report.annotated,
                "records": RecordsResponse::from_records(&shown).records,
            })
        }
        BatchSlot::Failed(e) => json!({ "image": name, "status": "error", "error": e.to_string() }),
        BatchSlot::Cancelled => json!({ "image": name, "status": "cancelled" }),
    }
}

fn print_slot(name: &str, slot: &BatchSlot, filter: &BanTypeFilter, annotate: bool) {
    println!("== {}", name);
    let report = match slot {
        BatchSlot::Completed(report) => report,
        BatchSlot::Failed(e) => {
            println!("   error: {}", e);
            return;
        }
        BatchSlot::Cancelled => {
            println!("   cancelled");
            return;
        }
    };

    let Some(text) = report.text.as_str() else {
        println!("   no text detected");
        return;
    };

    let shown = filter.apply(&report.matched_records());
    if shown.is_empty() {
        println!("   no listed substances found");
    }
    for summary in report.matches.iter().filter(|m| shown.iter().any(|r| r.id == m.record.id)) {
        let record = &summary.record;
        let ban = if record.ban_type_label.is_empty() {
            record.ban_type.label()
        } else {
            record.ban_type_label.as_str()
        };
        println!("   {} [{}] matched \"{}\"", record.substance_name, ban, summary.matched_name);
        if !record.banned_by.is_empty() {
            println!("      banned by: {}", record.banned_by);
        }
        if !record.dosage_limit.is_empty() {
            println!("      dosage limit: {}", record.dosage_limit);
        }
        println!("      ...{}...", summary.snippet);
    }

    if annotate {
        println!("{}", report.annotated.as_deref().unwrap_or(text));
    }
}

fn run_check(config: &AppConfig, text: Option<String>, text_file: Option<&Path>) -> Result<()> {
    let text = match (text, text_file) {
        (Some(text), _) => Some(text),
        (None, Some(path)) => {
            Some(fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?)
        }
        (None, None) => None,
    };

    let registry = open_registry(config)?;
    let response = handle_match_request(&MatchRequest { text }, registry.as_ref(), &config.matching)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_search(config: &AppConfig, query: String) -> Result<()> {
    let registry = open_registry(config)?;
    let response = handle_search_request(&SearchRequest { query: Some(query) }, registry.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_setup(config: &AppConfig) -> Result<()> {
    match find_tesseract_executable(config.ocr.tesseract_path.as_deref()) {
        Ok(path) => info!("Tesseract executable: {}", path.display()),
        Err(e) => warn!("{}", e),
    }

    let tessdata = ensure_tessdata(config.ocr.tessdata_dir.as_deref(), &config.ocr.language)?;
    info!("tessdata ready at {}", tessdata.display());
    Ok(())
}
