pub mod filter;
pub mod highlight;
pub mod matcher;
pub mod record;
pub mod search;

pub use filter::{filter_by_ban_type, BanTypeFilter};
pub use highlight::{annotate, highlight_spans, render, strip_annotations, HighlightSpan};
pub use matcher::{is_matchable_name, match_substances, name_set, normalize_text, MatchSummary, SubstanceMatcher};
pub use record::{BanType, RecordFields, SubstanceRecord};
pub use search::search_registry;
