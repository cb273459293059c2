//! Substance records and their ingestion from the hosted table.
//!
//! The table is a loosely typed field bag. Rows are converted into
//! [`SubstanceRecord`] at the boundary; fields this crate does not know are
//! dropped and absent fields become empty strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const FIELD_SUBSTANCE_NAME: &str = "Substance Name";
pub const FIELD_SYNONYMS: &str = "Synonyms";
pub const FIELD_BANNED_BY: &str = "Banned By";
pub const FIELD_BAN_TYPE: &str = "Ban Type";
pub const FIELD_DOSAGE_LIMIT: &str = "Dosage Limit";
pub const FIELD_NOTES: &str = "Notes";
pub const FIELD_SOURCE: &str = "Source / Citation";

/// Severity category of a substance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BanType {
    Prohibited,
    LimitedOutOfCompetition,
    ParticularSports,
    /// Missing or unrecognised ban type
    #[default]
    None,
}

impl BanType {
    /// Every category, in legend order.
    pub const ALL: [BanType; 4] = [
        BanType::Prohibited,
        BanType::LimitedOutOfCompetition,
        BanType::ParticularSports,
        BanType::None,
    ];

    /// Parses a table label. Unknown or blank labels map to `None`.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "prohibited" => BanType::Prohibited,
            "limited to out of competition" | "limited out of competition" | "out of competition" => {
                BanType::LimitedOutOfCompetition
            }
            "particular sports" => BanType::ParticularSports,
            _ => BanType::None,
        }
    }

    /// Display label as shown in the legend.
    pub fn label(self) -> &'static str {
        match self {
            BanType::Prohibited => "Prohibited",
            BanType::LimitedOutOfCompetition => "Limited to Out of Competition",
            BanType::ParticularSports => "Particular Sports",
            BanType::None => "None",
        }
    }

    /// Highlight color for this severity.
    pub fn color(self) -> &'static str {
        match self {
            BanType::Prohibited => "#d62828",
            BanType::LimitedOutOfCompetition => "#f77f00",
            BanType::ParticularSports => "#003049",
            BanType::None => "#d62828",
        }
    }

    /// Short machine slug, used in markup attributes.
    pub fn slug(self) -> &'static str {
        match self {
            BanType::Prohibited => "prohibited",
            BanType::LimitedOutOfCompetition => "limited-out-of-competition",
            BanType::ParticularSports => "particular-sports",
            BanType::None => "none",
        }
    }
}

impl fmt::Display for BanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One substance from the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubstanceRecord {
    pub id: String,
    pub substance_name: String,
    pub synonyms: Vec<String>,
    pub ban_type: BanType,
    /// Ban type text exactly as the table had it (may be empty)
    pub ban_type_label: String,
    pub banned_by: String,
    pub dosage_limit: String,
    pub notes: String,
    pub source_citation: String,
}

impl SubstanceRecord {
    /// Builds a record with only a name and synonyms; metadata left empty.
    pub fn new(id: impl Into<String>, substance_name: impl Into<String>, synonyms: &[&str]) -> Self {
        Self {
            id: id.into(),
            substance_name: substance_name.into(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            ban_type: BanType::None,
            ban_type_label: String::new(),
            banned_by: String::new(),
            dosage_limit: String::new(),
            notes: String::new(),
            source_citation: String::new(),
        }
    }

    /// Sets the ban type from a table label.
    pub fn with_ban_type(mut self, label: &str) -> Self {
        self.ban_type = BanType::from_label(label);
        self.ban_type_label = label.trim().to_string();
        self
    }

    /// Converts a table row's field bag into a record.
    ///
    /// `Synonyms` may be a comma-separated string or a list; entries are
    /// trimmed and blanks dropped.
    pub fn from_fields(id: impl Into<String>, fields: &Map<String, Value>) -> Self {
        let ban_type_label = field_text(fields, FIELD_BAN_TYPE).trim().to_string();

        Self {
            id: id.into(),
            substance_name: field_text(fields, FIELD_SUBSTANCE_NAME).trim().to_string(),
            synonyms: split_synonyms(fields.get(FIELD_SYNONYMS)),
            ban_type: BanType::from_label(&ban_type_label),
            ban_type_label,
            banned_by: field_text(fields, FIELD_BANNED_BY),
            dosage_limit: field_text(fields, FIELD_DOSAGE_LIMIT),
            notes: field_text(fields, FIELD_NOTES),
            source_citation: field_text(fields, FIELD_SOURCE),
        }
    }

    /// Renders the record back into the table's field schema.
    pub fn to_fields(&self) -> RecordFields {
        RecordFields {
            substance_name: self.substance_name.clone(),
            synonyms: self.synonyms.join(", "),
            banned_by: self.banned_by.clone(),
            ban_type: self.ban_type_label.clone(),
            dosage_limit: self.dosage_limit.clone(),
            notes: self.notes.clone(),
            source_citation: self.source_citation.clone(),
        }
    }
}

/// Registry field schema as it appears on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(rename = "Substance Name")]
    pub substance_name: String,
    #[serde(rename = "Synonyms")]
    pub synonyms: String,
    #[serde(rename = "Banned By")]
    pub banned_by: String,
    #[serde(rename = "Ban Type")]
    pub ban_type: String,
    #[serde(rename = "Dosage Limit")]
    pub dosage_limit: String,
    #[serde(rename = "Notes")]
    pub notes: String,
    #[serde(rename = "Source / Citation")]
    pub source_citation: String,
}

/// Reads a field as text; missing and null are empty, scalars are stringified
/// and lists are joined with ", ".
fn field_text(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => value_text(other).unwrap_or_default(),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn split_synonyms(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
        Some(other) => value_text(other).into_iter().collect(),
        None => Vec::new(),
    };

    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
