//! Ban-type filtering of matched substances.

use super::record::{BanType, SubstanceRecord};

/// Keeps matches of the selected ban type; `None` keeps everything.
///
/// Records without a recognised ban type count as [`BanType::None`].
pub fn filter_by_ban_type(matches: &[SubstanceRecord], selected: Option<BanType>) -> Vec<SubstanceRecord> {
    match selected {
        None => matches.to_vec(),
        Some(ban_type) => matches
            .iter()
            .filter(|record| record.ban_type == ban_type)
            .cloned()
            .collect(),
    }
}

/// Legend-style selection: choosing the active type again clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BanTypeFilter {
    active: Option<BanType>,
}

impl BanTypeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<BanType> {
        self.active
    }

    /// Selects `ban_type`, or deselects it if it is already active.
    pub fn toggle(&mut self, ban_type: BanType) {
        self.active = if self.active == Some(ban_type) {
            None
        } else {
            Some(ban_type)
        };
    }

    pub fn apply(&self, matches: &[SubstanceRecord]) -> Vec<SubstanceRecord> {
        filter_by_ban_type(matches, self.active)
    }
}
