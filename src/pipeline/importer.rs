//! Fetch, parse and persist a city and its districts.

use hashbrown::HashSet;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::models::{Area, AreaId, Poi, ValidationEvent};
use crate::store::{Store, StoreError};
use crate::wikivoyage::{Listing, ListingParser, MarkupSource, ParsedPage};

/// One area-import unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRequest {
    /// Guide page to fetch
    pub page: String,
    /// Name of the root city the page belongs to
    pub root_name: String,
    pub depth: u32,
    pub max_depth: u32,
    /// Persisted parent area, `None` for the root city
    pub parent_id: Option<AreaId>,
}

impl ImportRequest {
    pub fn root(name: &str, max_depth: u32) -> Self {
        Self {
            page: name.to_string(),
            root_name: name.to_string(),
            depth: 0,
            max_depth,
            parent_id: None,
        }
    }

    /// Request for a sub-area page found on the page imported as `parent`
    pub fn child(&self, page: &str, parent: AreaId) -> Self {
        Self {
            page: page.to_string(),
            root_name: self.root_name.clone(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            parent_id: Some(parent),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportResult {
    Success {
        page: String,
        area_id: AreaId,
        root_id: AreaId,
        pois: usize,
        /// Sub-area pages still to import (empty at the depth limit)
        sub_areas: Vec<String>,
    },
    Error {
        page: String,
        error: String,
    },
}

impl ImportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ImportResult::Success { .. })
    }

    pub fn page(&self) -> &str {
        match self {
            ImportResult::Success { page, .. } | ImportResult::Error { page, .. } => page,
        }
    }

    pub fn pois(&self) -> usize {
        match self {
            ImportResult::Success { pois, .. } => *pois,
            ImportResult::Error { .. } => 0,
        }
    }

    fn error(page: &str, error: impl ToString) -> Self {
        ImportResult::Error {
            page: page.to_string(),
            error: error.to_string(),
        }
    }
}

/// Outcome of importing a whole tree
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub root: ImportResult,
    pub districts: Vec<ImportResult>,
    pub total_pois: usize,
    pub failures: usize,
}

impl ImportSummary {
    fn new(root: ImportResult) -> Self {
        Self {
            total_pois: root.pois(),
            failures: usize::from(!root.is_success()),
            root,
            districts: Vec::new(),
        }
    }

    fn push(&mut self, result: ImportResult) {
        self.total_pois += result.pois();
        if !result.is_success() {
            self.failures += 1;
        }
        self.districts.push(result);
    }
}

/// Display name of a district page: nested page paths keep what follows
/// the first '/'.
pub fn district_name(page: &str) -> &str {
    match page.split_once('/') {
        Some((_, rest)) if !rest.trim().is_empty() => rest.trim(),
        _ => page.trim(),
    }
}

fn poi_from_listing(listing: Listing) -> Poi {
    Poi {
        id: 0,
        root_id: 0,
        district_id: None,
        name: listing.name,
        category: listing.category,
        sub_category: listing.sub_category,
        description: listing.description,
        coordinates: listing.coordinates,
        address: listing.address,
        phone: listing.phone,
        website: listing.website,
        hours: listing.hours,
        image: listing.image,
        rank: listing.rank,
        osm_id: None,
        updated_at: chrono::Utc::now(),
    }
}

/// Area a fetch failure is attached to: the root city once it exists
fn validation_parent(store: &Store, request: &ImportRequest) -> Option<AreaId> {
    match store.find_root(&request.root_name) {
        Ok(root) => root.map(|a| a.id),
        Err(e) => {
            warn!("Could not look up {} for validation: {}", request.root_name, e);
            None
        }
    }
}

/// Upsert the area and swap in its new POI set
fn persist(store: &Store, request: &ImportRequest, page: ParsedPage) -> Result<(Area, usize), StoreError> {
    let area = match request.parent_id {
        None => store.get_or_create_root(&request.root_name)?,
        Some(parent) => {
            let root = store
                .find_root(&request.root_name)?
                .ok_or(StoreError::AreaNotFound(parent))?;
            store.get_or_create_district(district_name(&request.page), root.id, parent)?
        }
    };

    let area = match page.summary {
        Some(summary) => store.set_area_summary(area.id, Some(summary))?,
        None => area,
    };

    let pois: Vec<Poi> = page.listings.into_iter().map(poi_from_listing).collect();
    let stored = store.replace_area_pois(&area, pois)?;
    Ok((area, stored.len()))
}

/// Run one unit: FETCH, then PERSIST, then report the sub-areas to enqueue.
///
/// A fetch failure is recorded as a validation event and returned as an
/// error result; nothing here panics or propagates.
pub async fn import_unit<S: MarkupSource>(
    store: &Store,
    source: &S,
    parser: &ListingParser,
    request: &ImportRequest,
) -> ImportResult {
    info!(
        "Importing {} (part of {}, depth {}/{})",
        request.page, request.root_name, request.depth, request.max_depth
    );

    let markup = match source.fetch_markup(&request.page).await {
        Ok(markup) => markup,
        Err(e) => {
            error!("Non fatal fetch error for {}: {}", request.page, e);
            let event = ValidationEvent::fetch_failure(
                validation_parent(store, request),
                request.depth == 0,
                e.to_string(),
            );
            if let Err(store_err) = store.record_validation(&event) {
                warn!("Failed to record validation for {}: {}", request.page, store_err);
            }
            return ImportResult::error(&request.page, e);
        }
    };

    let page = parser.parse(&markup);
    let sub_areas = if request.depth < request.max_depth {
        page.sub_areas.clone()
    } else {
        Vec::new()
    };

    match persist(store, request, page) {
        Ok((area, pois)) => {
            info!(
                "Stored {} POIs for {} (area {}), {} sub-areas to follow",
                pois,
                request.page,
                area.id,
                sub_areas.len()
            );
            ImportResult::Success {
                page: request.page.clone(),
                area_id: area.id,
                root_id: area.root_id,
                pois,
                sub_areas,
            }
        }
        Err(e) => {
            error!("Failed to store {}: {}", request.page, e);
            ImportResult::error(&request.page, e)
        }
    }
}

/// Imports a city and walks its district tree
pub struct Importer<S> {
    store: Store,
    source: Arc<S>,
    parser: Arc<ListingParser>,
    max_concurrent: usize,
}

impl<S: MarkupSource + 'static> Importer<S> {
    pub fn new(store: Store, source: S, parser: ListingParser, max_concurrent: usize) -> Self {
        Self {
            store,
            source: Arc::new(source),
            parser: Arc::new(parser),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn import_area(&self, request: &ImportRequest) -> ImportResult {
        import_unit(&self.store, self.source.as_ref(), &self.parser, request).await
    }

    /// Import the root, then every reachable district up to `max_depth`.
    ///
    /// The root unit finishes (POIs replaced) before any district starts.
    /// Districts run as independent tasks, at most `max_concurrent` at a
    /// time, in no particular order; a page is imported once per tree.
    pub async fn import_tree(&self, name: &str, max_depth: u32) -> ImportSummary {
        let root_request = ImportRequest::root(name, max_depth);
        let root = self.import_area(&root_request).await;
        let mut summary = ImportSummary::new(root.clone());

        let ImportResult::Success {
            area_id, sub_areas, ..
        } = root
        else {
            return summary;
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(name.to_string());

        for page in &sub_areas {
            if visited.insert(page.clone()) {
                self.spawn_unit(&mut tasks, &semaphore, root_request.child(page, area_id));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (request, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Import task failed: {}", e);
                    summary.failures += 1;
                    continue;
                }
            };

            if let ImportResult::Success {
                area_id, sub_areas, ..
            } = &result
            {
                for page in sub_areas {
                    if visited.insert(page.clone()) {
                        self.spawn_unit(&mut tasks, &semaphore, request.child(page, *area_id));
                    }
                }
            }
            summary.push(result);
        }

        info!(
            "Imported {}: {} districts, {} POIs, {} failures",
            name,
            summary.districts.len(),
            summary.total_pois,
            summary.failures
        );
        summary
    }

    fn spawn_unit(
        &self,
        tasks: &mut JoinSet<(ImportRequest, ImportResult)>,
        semaphore: &Arc<Semaphore>,
        request: ImportRequest,
    ) {
        let store = self.store.clone();
        let source = Arc::clone(&self.source);
        let parser = Arc::clone(&self.parser);
        let semaphore = Arc::clone(semaphore);

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                let result = ImportResult::error(&request.page, "import queue closed");
                return (request, result);
            };
            let result = import_unit(&store, source.as_ref(), &parser, &request).await;
            (request, result)
        });
    }
}
