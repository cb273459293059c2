//! Substance registry sources.
//!
//! The registry lives in a hosted table. It is fetched on every check and
//! never modified here. Two payload shapes are accepted, from the network or
//! from a local export:
//!
//! - a list envelope `{ "records": [{ "id", "fields": {..} }], "offset" }`
//! - a bare array of records, each either `{ "id", "fields" }` or a flat field map

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RegistrySettings;
use crate::error::RegistryError;
use crate::substance::SubstanceRecord;

/// Upper bound on followed pagination offsets.
const MAX_PAGES: usize = 200;

/// Anything that can produce the current substance list.
pub trait RegistrySource: Send + Sync {
    fn fetch(&self) -> Result<Vec<SubstanceRecord>, RegistryError>;
}

/// A fixed in-memory list.
impl RegistrySource for Vec<SubstanceRecord> {
    fn fetch(&self) -> Result<Vec<SubstanceRecord>, RegistryError> {
        Ok(self.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Page {
        records: Vec<Map<String, Value>>,
        #[serde(default)]
        offset: Option<String>,
    },
    Rows(Vec<Map<String, Value>>),
}

/// Converts raw rows; rows lacking an id get a positional one.
fn rows_to_records(rows: &[Map<String, Value>], first_index: usize) -> Vec<SubstanceRecord> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("row-{}", first_index + i));

            match row.get("fields").and_then(Value::as_object) {
                Some(fields) => SubstanceRecord::from_fields(id, fields),
                None => SubstanceRecord::from_fields(id, row),
            }
        })
        .collect()
}

/// Parses one payload into records plus the next-page offset.
pub fn parse_payload(body: &str, first_index: usize) -> Result<(Vec<SubstanceRecord>, Option<String>), RegistryError> {
    match serde_json::from_str::<Payload>(body)? {
        Payload::Page { records, offset } => Ok((rows_to_records(&records, first_index), offset)),
        Payload::Rows(rows) => Ok((rows_to_records(&rows, first_index), None)),
    }
}

/// Registry read from a JSON export on disk.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegistrySource for FileRegistry {
    fn fetch(&self) -> Result<Vec<SubstanceRecord>, RegistryError> {
        let body = fs::read_to_string(&self.path)?;
        let (records, _) = parse_payload(&body, 0)?;
        info!("Loaded {} substances from {}", records.len(), self.path.display());
        Ok(records)
    }
}

/// Registry served by a hosted table's list endpoint.
pub struct HttpRegistry {
    client: reqwest::blocking::Client,
    url: String,
    view: Option<String>,
    token: Option<String>,
}

impl HttpRegistry {
    pub fn new(url: impl Into<String>, view: Option<String>, token: Option<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            view,
            token,
        })
    }

    fn fetch_page(&self, offset: Option<&str>) -> Result<String, RegistryError> {
        let mut request = self
            .client
            .get(&self.url)
            .header("User-Agent", "supplement-check");

        if let Some(view) = &self.view {
            request = request.query(&[("view", view.as_str())]);
        }
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status().as_u16()));
        }

        Ok(response.text()?)
    }
}

impl RegistrySource for HttpRegistry {
    fn fetch(&self) -> Result<Vec<SubstanceRecord>, RegistryError> {
        let records = collect_pages(MAX_PAGES, |offset| self.fetch_page(offset))?;
        info!("Fetched {} substances from registry", records.len());
        Ok(records)
    }
}

/// Follows pagination offsets until a page comes back without one.
///
/// A registry that still has an offset pending after `max_pages` is an
/// error rather than a partial list.
fn collect_pages<F>(max_pages: usize, mut fetch_page: F) -> Result<Vec<SubstanceRecord>, RegistryError>
where
    F: FnMut(Option<&str>) -> Result<String, RegistryError>,
{
    let mut records = Vec::new();
    let mut offset: Option<String> = None;

    for page in 0..max_pages {
        let body = fetch_page(offset.as_deref())?;
        let (mut batch, next) = parse_payload(&body, records.len())?;
        debug!("Registry page {}: {} records", page + 1, batch.len());
        records.append(&mut batch);

        match next {
            Some(next) if !next.is_empty() => offset = Some(next),
            _ => return Ok(records),
        }
    }

    warn!("Registry still paginating after {} pages, giving up", max_pages);
    Err(RegistryError::TooManyPages(max_pages))
}

/// Builds the configured source: a local file wins over a URL.
///
/// Returns None when neither is configured.
pub fn from_settings(settings: &RegistrySettings) -> Result<Option<Box<dyn RegistrySource>>, RegistryError> {
    if let Some(path) = &settings.file {
        return Ok(Some(Box::new(FileRegistry::new(path.clone()))));
    }
    if let Some(url) = &settings.url {
        let registry = HttpRegistry::new(
            url.clone(),
            settings.view.clone(),
            settings.token(),
            Duration::from_secs(settings.timeout_secs),
        )?;
        return Ok(Some(Box::new(registry)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substance::BanType;
    use tempfile::tempdir;

    #[test]
    fn test_parse_list_envelope() {
        let body = r#"{
            "records": [
                { "id": "recA", "createdTime": "2024-01-01T00:00:00.000Z",
                  "fields": { "Substance Name": "Caffeine", "Synonyms": "Guaranine, Theine", "Ban Type": "Limited to Out of Competition" } },
                { "id": "recB", "fields": {} }
            ],
            "offset": "itrNext/recB"
        }"#;

        let (records, offset) = parse_payload(body, 0).unwrap();
        assert_eq!(offset.as_deref(), Some("itrNext/recB"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "recA");
        assert_eq!(records[0].synonyms, vec!["Guaranine", "Theine"]);
        assert_eq!(records[0].ban_type, BanType::LimitedOutOfCompetition);
        assert_eq!(records[1].substance_name, "");
    }

    #[test]
    fn test_parse_bare_array_of_flat_rows() {
        let body = r#"[
            { "Substance Name": "DMAA", "Ban Type": "Prohibited" },
            { "Substance Name": "Ostarine", "Synonyms": ["Enobosarm"] }
        ]"#;

        let (records, offset) = parse_payload(body, 10).unwrap();
        assert_eq!(offset, None);
        assert_eq!(records[0].id, "row-10");
        assert_eq!(records[1].id, "row-11");
        assert_eq!(records[1].synonyms, vec!["Enobosarm"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_payload("\"nope\"", 0), Err(RegistryError::Parse(_))));
    }

    fn page(id: &str, offset: Option<&str>) -> String {
        let offset = offset.map(|o| format!(r#", "offset": "{}""#, o)).unwrap_or_default();
        format!(r#"{{ "records": [{{ "id": "{}", "fields": {{ "Substance Name": "{}" }} }}]{} }}"#, id, id, offset)
    }

    #[test]
    fn test_collect_pages_follows_offsets() {
        let mut requested = Vec::new();
        let records = collect_pages(5, |offset| {
            requested.push(offset.map(str::to_string));
            Ok(match offset {
                None => page("recA", Some("p2")),
                Some(_) => page("recB", None),
            })
        })
        .unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["recA", "recB"]);
        assert_eq!(requested, vec![None, Some("p2".to_string())]);
    }

    #[test]
    fn test_collect_pages_limit_is_an_error() {
        let mut calls = 0;
        let result = collect_pages(3, |_| {
            calls += 1;
            Ok(page("recA", Some("again")))
        });

        assert!(matches!(result, Err(RegistryError::TooManyPages(3))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_file_registry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("substances.json");
        fs::write(&path, r#"[{ "id": "r1", "fields": { "Substance Name": "Higenamine" } }]"#).unwrap();

        let records = FileRegistry::new(&path).fetch().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].substance_name, "Higenamine");
    }

    #[test]
    fn test_file_registry_missing_file() {
        let registry = FileRegistry::new("/definitely/not/here.json");
        assert!(matches!(registry.fetch(), Err(RegistryError::Io(_))));
    }

    #[test]
    fn test_from_settings_prefers_file() {
        let settings = RegistrySettings {
            url: Some("https://example.invalid/v0/base/table".to_string()),
            file: Some(PathBuf::from("export.json")),
            ..RegistrySettings::default()
        };
        assert!(from_settings(&settings).unwrap().is_some());
        assert!(from_settings(&RegistrySettings::default()).unwrap().is_none());
    }
}
