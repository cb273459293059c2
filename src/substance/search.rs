//! Free-text lookup over the registry.
//!
//! Unlike label matching this is a plain containment search: typing "orange"
//! should find "Bitter Orange Extract".

use super::record::SubstanceRecord;
use crate::error::InputRejection;

/// Records whose name, synonyms or banned-by text contain `query`, ignoring case.
pub fn search_registry(query: &str, registry: &[SubstanceRecord]) -> Result<Vec<SubstanceRecord>, InputRejection> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Err(InputRejection::EmptyQuery);
    }

    Ok(registry
        .iter()
        .filter(|record| {
            record.substance_name.to_lowercase().contains(&query)
                || record.synonyms.iter().any(|s| s.to_lowercase().contains(&query))
                || record.banned_by.to_lowercase().contains(&query)
        })
        .cloned()
        .collect())
}
