//! CSV writer for batch scan results.
//!
//! Rows are appended one image at a time so a long batch keeps everything
//! finished so far even if the process dies. One row per matched substance,
//! or a single row describing why an image has none.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use super::scan::RecognizedText;
use super::worker::BatchSlot;

/// CSV header row.
const CSV_HEADER: &str = "index,timestamp,image,status,substance,ban_type,banned_by,matched_name,snippet";

/// Initializes CSV file with header if it doesn't exist or is empty.
///
/// If the file exists and has content, this does nothing (preserves existing data).
pub fn init_csv(path: &Path) -> Result<()> {
    if path.exists() {
        let file = File::open(path).context("Failed to open existing CSV")?;
        let reader = BufReader::new(file);
        if reader.lines().next().is_some() {
            return Ok(());
        }
    }

    let mut file = File::create(path).context("Failed to create CSV file")?;
    writeln!(file, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    Ok(())
}

/// Quotes a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn row(fields: &[&str]) -> String {
    fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",")
}

fn status_row(index: &str, timestamp: &str, image: &str, status: &str, rest: [&str; 5]) -> String {
    let mut fields = vec![index, timestamp, image, status];
    fields.extend(rest);
    row(&fields)
}

/// Formats the rows for one batch slot.
pub fn slot_rows(index: usize, image: &str, slot: &BatchSlot) -> Vec<String> {
    let index = (index + 1).to_string();
    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let line = |status: &str, rest: [&str; 5]| status_row(&index, &timestamp, image, status, rest);

    match slot {
        BatchSlot::Cancelled => vec![line("cancelled", ["", "", "", "", ""])],
        BatchSlot::Failed(e) => vec![line("error", ["", "", "", "", e.to_string().as_str()])],
        BatchSlot::Completed(report) => {
            if report.text == RecognizedText::NoTextDetected {
                let detail = report.recognition_error.as_deref().unwrap_or("");
                return vec![line("no_text", ["", "", "", "", detail])];
            }
            if report.matches.is_empty() {
                return vec![line("clear", ["", "", "", "", ""])];
            }
            report
                .matches
                .iter()
                .map(|m| {
                    line(
                        "match",
                        [
                            m.record.substance_name.as_str(),
                            m.record.ban_type_label.as_str(),
                            m.record.banned_by.as_str(),
                            m.matched_name.as_str(),
                            m.snippet.as_str(),
                        ],
                    )
                })
                .collect()
        }
    }
}

/// Appends the rows for one batch slot to the CSV file.
///
/// Opens the file in append mode for each write.
pub fn append_slot(path: &Path, index: usize, image: &str, slot: &BatchSlot) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open CSV for append")?;

    for line in slot_rows(index, image, slot) {
        writeln!(file, "{}", line).context("Failed to write CSV row")?;
    }
    Ok(())
}
