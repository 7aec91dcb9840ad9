//! Validation events recorded when building the dataset fails partway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AreaId;

pub const CONTEXT_WIKI_IMPORT: &str = "WikiImport";
pub const AGGREGATE_FETCH_ARTICLE: &str = "FetchArticleError";
pub const CITY_FETCH_ERROR: &str = "CityFetchError";
pub const DISTRICT_FETCH_ERROR: &str = "DistrictFetchError";

/// A named, timestamped record of a non-fatal failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEvent {
    /// Area the event is attached to, if it exists yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_area: Option<AreaId>,

    /// Where the event happened (e.g. "WikiImport")
    pub context: String,

    /// High-level error category
    pub aggregate: String,

    /// Specific error subcategory
    pub specialized_aggregate: String,

    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl ValidationEvent {
    /// Event for a markup fetch that failed during import
    pub fn fetch_failure(parent_area: Option<AreaId>, is_root: bool, description: String) -> Self {
        Self {
            parent_area,
            context: CONTEXT_WIKI_IMPORT.to_string(),
            aggregate: AGGREGATE_FETCH_ARTICLE.to_string(),
            specialized_aggregate: if is_root {
                CITY_FETCH_ERROR.to_string()
            } else {
                DISTRICT_FETCH_ERROR.to_string()
            },
            description,
            created_at: Utc::now(),
        }
    }
}
