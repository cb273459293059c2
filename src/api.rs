//! Request/response contract for text checks and registry search.
//!
//! Requests and responses are plain serde types so any transport can carry
//! them; the binary reads them from files and stdout.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MatchSettings;
use crate::error::{InputRejection, PipelineError};
use crate::registry::RegistrySource;
use crate::substance::{search_registry, RecordFields, SubstanceMatcher, SubstanceRecord};

/// `{ "text": "..." }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRequest {
    #[serde(default, alias = "ocrText")]
    pub text: Option<String>,
}

/// `{ "query": "..." }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
}

/// A record on the wire: `{ "id", "fields": {..} }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub id: String,
    pub fields: RecordFields,
}

impl From<&SubstanceRecord> for RecordEnvelope {
    fn from(record: &SubstanceRecord) -> Self {
        Self {
            id: record.id.clone(),
            fields: record.to_fields(),
        }
    }
}

/// `{ "records": [..] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub records: Vec<RecordEnvelope>,
}

impl RecordsResponse {
    pub fn from_records(records: &[SubstanceRecord]) -> Self {
        Self {
            records: records.iter().map(RecordEnvelope::from).collect(),
        }
    }
}

/// Matches request text against a freshly fetched registry.
///
/// Input is checked before the registry is contacted.
pub fn handle_match_request(
    request: &MatchRequest,
    registry: &dyn RegistrySource,
    settings: &MatchSettings,
) -> Result<RecordsResponse, PipelineError> {
    let text = request.text.as_deref().ok_or(InputRejection::MissingText)?;
    if text.len() > settings.max_text_bytes {
        return Err(InputRejection::TextTooLarge {
            len: text.len(),
            max: settings.max_text_bytes,
        }
        .into());
    }

    let records = registry.fetch()?;
    let matches = SubstanceMatcher::new(&records).find_matches(text);
    info!("Match request: {} of {} substances found", matches.len(), records.len());

    Ok(RecordsResponse::from_records(&matches))
}

/// Searches the registry by name, synonym or banning organization.
pub fn handle_search_request(request: &SearchRequest, registry: &dyn RegistrySource) -> Result<RecordsResponse, PipelineError> {
    let query = request.query.as_deref().unwrap_or("");
    if query.trim().is_empty() {
        return Err(InputRejection::EmptyQuery.into());
    }

    let records = registry.fetch()?;
    let found = search_registry(query, &records)?;
    Ok(RecordsResponse::from_records(&found))
}
