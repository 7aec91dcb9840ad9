//! Best-value merge of duplicate POIs.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use super::similarity::{find_duplicates, DedupScope, DuplicateDetector, DuplicatePair};
use crate::models::{AreaId, Category, GeoPoint, OsmId, Poi, PoiId};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("cannot merge POI {0} into itself")]
    SameRecord(PoiId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fields a merge can override on the kept record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiField {
    Name,
    Category,
    SubCategory,
    Description,
    /// Latitude and longitude, always replaced together
    Coordinates,
    Address,
    Phone,
    Website,
    Hours,
    Image,
    Rank,
    District,
    OsmId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Category(Category),
    Coordinates(GeoPoint),
    Rank(u32),
    Area(AreaId),
    Osm(OsmId),
}

/// Outcome of resolving a duplicate pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergePlan {
    pub keep_id: PoiId,
    pub discard_id: PoiId,
    /// Values taken from the discarded record
    pub overrides: BTreeMap<PoiField, FieldValue>,
}

impl MergePlan {
    /// The kept record with every override applied
    pub fn apply_to(&self, keep: &Poi) -> Poi {
        let mut merged = keep.clone();
        for (field, value) in &self.overrides {
            match (field, value) {
                (PoiField::Name, FieldValue::Text(v)) => merged.name = v.clone(),
                (PoiField::Category, FieldValue::Category(v)) => merged.category = *v,
                (PoiField::SubCategory, FieldValue::Text(v)) => merged.sub_category = Some(v.clone()),
                (PoiField::Description, FieldValue::Text(v)) => merged.description = v.clone(),
                (PoiField::Coordinates, FieldValue::Coordinates(v)) => merged.coordinates = Some(*v),
                (PoiField::Address, FieldValue::Text(v)) => merged.address = Some(v.clone()),
                (PoiField::Phone, FieldValue::Text(v)) => merged.phone = Some(v.clone()),
                (PoiField::Website, FieldValue::Text(v)) => merged.website = Some(v.clone()),
                (PoiField::Hours, FieldValue::Text(v)) => merged.hours = Some(v.clone()),
                (PoiField::Image, FieldValue::Text(v)) => merged.image = Some(v.clone()),
                (PoiField::Rank, FieldValue::Rank(v)) => merged.rank = *v,
                (PoiField::District, FieldValue::Area(v)) => merged.district_id = Some(*v),
                (PoiField::OsmId, FieldValue::Osm(v)) => merged.osm_id = Some(*v),
                (field, value) => warn!("Ignoring mismatched override {:?} = {:?}", field, value),
            }
        }
        merged
    }
}

fn present_text(value: &str) -> Option<&str> {
    Some(value).filter(|s| !s.trim().is_empty())
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().and_then(present_text)
}

/// Non-null beats null; otherwise keep's value stays
fn prefer_present(keep: &Option<String>, discard: &Option<String>) -> Option<FieldValue> {
    match (present(keep), present(discard)) {
        (None, Some(d)) => Some(FieldValue::Text(d.to_string())),
        _ => None,
    }
}

/// Non-null beats null; if both are present the longer one wins
fn prefer_longer(keep: Option<&str>, discard: Option<&str>) -> Option<FieldValue> {
    match (keep, discard) {
        (None, Some(d)) => Some(FieldValue::Text(d.to_string())),
        (Some(k), Some(d)) if d.chars().count() > k.chars().count() => {
            Some(FieldValue::Text(d.to_string()))
        }
        _ => None,
    }
}

fn filled_fields(p: &Poi) -> usize {
    [
        !p.description.trim().is_empty(),
        p.coordinates.is_some(),
        present(&p.sub_category).is_some(),
        present(&p.address).is_some(),
        present(&p.phone).is_some(),
        present(&p.website).is_some(),
        present(&p.hours).is_some(),
        present(&p.image).is_some(),
        p.osm_id.is_some(),
    ]
    .iter()
    .filter(|f| **f)
    .count()
}

/// Order a detected pair for [`auto_merge`]: the more complete record is
/// kept, then the better-ranked one, then the older id.
pub fn choose_keep<'a>(a: &'a Poi, b: &'a Poi) -> (&'a Poi, &'a Poi) {
    let key = |p: &Poi| (std::cmp::Reverse(filled_fields(p)), p.rank, p.id);
    if key(b) < key(a) {
        (b, a)
    } else {
        (a, b)
    }
}

/// Resolve a pair keeping `a`; fields without a merge rule keep `a`'s value
pub fn resolve(a: &Poi, b: &Poi) -> MergePlan {
    plan_with_keep(a, b)
}

/// Field overrides for merging `discard` into `keep`
pub fn plan_with_keep(keep: &Poi, discard: &Poi) -> MergePlan {
    let mut overrides = BTreeMap::new();
    let mut set = |field: PoiField, value: Option<FieldValue>| {
        if let Some(value) = value {
            overrides.insert(field, value);
        }
    };

    if keep.name.trim().is_empty() && !discard.name.trim().is_empty() {
        set(PoiField::Name, Some(FieldValue::Text(discard.name.clone())));
    }

    set(
        PoiField::SubCategory,
        prefer_present(&keep.sub_category, &discard.sub_category),
    );

    set(
        PoiField::Description,
        prefer_longer(present_text(&keep.description), present_text(&discard.description)),
    );

    if keep.coordinates.is_none() {
        set(
            PoiField::Coordinates,
            discard.coordinates.map(FieldValue::Coordinates),
        );
    }

    set(
        PoiField::Address,
        prefer_longer(present(&keep.address), present(&discard.address)),
    );
    set(PoiField::Phone, prefer_present(&keep.phone, &discard.phone));
    set(PoiField::Website, prefer_present(&keep.website, &discard.website));
    set(
        PoiField::Hours,
        prefer_longer(present(&keep.hours), present(&discard.hours)),
    );
    set(PoiField::Image, prefer_present(&keep.image, &discard.image));

    if discard.rank < keep.rank {
        set(PoiField::Rank, Some(FieldValue::Rank(discard.rank)));
    }

    if keep.district_id.is_none() {
        set(PoiField::District, discard.district_id.map(FieldValue::Area));
    }

    if keep.osm_id.is_none() {
        set(PoiField::OsmId, discard.osm_id.map(FieldValue::Osm));
    }

    MergePlan {
        keep_id: keep.id,
        discard_id: discard.id,
        overrides,
    }
}

/// Merge `discard_id` into `keep_id` in one transaction and return the
/// updated kept record together with the plan that was applied.
pub fn merge_pair(
    store: &Store,
    keep_id: PoiId,
    discard_id: PoiId,
) -> Result<(Poi, MergePlan), MergeError> {
    if keep_id == discard_id {
        return Err(MergeError::SameRecord(keep_id));
    }

    let (merged, plan) = store.apply_merge(keep_id, discard_id, |keep, discard| {
        let plan = plan_with_keep(keep, discard);
        (plan.apply_to(keep), plan)
    })?;

    info!(
        "Merged POI {} into {} ({} fields updated)",
        discard_id,
        keep_id,
        plan.overrides.len()
    );
    Ok((merged, plan))
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeFailure {
    pub keep_id: PoiId,
    pub discard_id: PoiId,
    pub error: String,
}

/// Aggregate result of [`auto_merge`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub total_pairs: usize,
    pub merged_count: usize,
    pub errors: Vec<MergeFailure>,
}

/// Merge every duplicate pair of a tree in sequence.
///
/// Pairs are detected over `scopes` unless supplied. A failed pair (for
/// instance one whose record was already merged away earlier in the batch)
/// is recorded in the report and the batch continues.
pub fn auto_merge(
    store: &Store,
    root: AreaId,
    pairs: Option<Vec<DuplicatePair>>,
    detector: &DuplicateDetector,
    scopes: &[DedupScope],
) -> Result<MergeReport, StoreError> {
    let pairs = match pairs {
        Some(pairs) => pairs,
        None => find_duplicates(store, root, scopes, detector)?,
    };

    let mut report = MergeReport {
        total_pairs: pairs.len(),
        ..MergeReport::default()
    };

    for pair in &pairs {
        let (keep, discard) = choose_keep(&pair.first, &pair.second);
        match merge_pair(store, keep.id, discard.id) {
            Ok(_) => report.merged_count += 1,
            Err(e) => {
                warn!(
                    "Failed to merge {} into {}: {}",
                    discard.id, keep.id, e
                );
                report.errors.push(MergeFailure {
                    keep_id: keep.id,
                    discard_id: discard.id,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "Auto-merge finished: {}/{} pairs merged, {} errors",
        report.merged_count,
        report.total_pairs,
        report.errors.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OsmType;
    use chrono::Utc;

    fn poi(id: PoiId, name: &str) -> Poi {
        Poi {
            id,
            root_id: 1,
            district_id: None,
            name: name.to_string(),
            category: Category::Eat,
            sub_category: None,
            description: String::new(),
            coordinates: None,
            address: None,
            phone: None,
            website: None,
            hours: None,
            image: None,
            rank: 1,
            osm_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_lower_rank_wins() {
        let mut keep = poi(1, "Bistro");
        keep.rank = 5;
        let mut discard = poi(2, "Bistro");
        discard.rank = 2;

        let plan = plan_with_keep(&keep, &discard);
        assert_eq!(plan.overrides.get(&PoiField::Rank), Some(&FieldValue::Rank(2)));
        assert_eq!(plan.apply_to(&keep).rank, 2);
    }

    #[test]
    fn test_longer_description_wins() {
        let mut keep = poi(1, "Bistro");
        keep.description = "Short".to_string();
        let mut discard = poi(2, "Bistro");
        discard.description = "A longer description text".to_string();

        let plan = plan_with_keep(&keep, &discard);
        assert_eq!(
            plan.overrides.get(&PoiField::Description),
            Some(&FieldValue::Text("A longer description text".to_string()))
        );

        let reverse = plan_with_keep(&discard, &keep);
        assert!(!reverse.overrides.contains_key(&PoiField::Description));
    }

    #[test]
    fn test_present_beats_absent_and_keep_wins_ties() {
        let mut keep = poi(1, "Bistro");
        keep.phone = Some("+33 1".to_string());
        keep.website = None;
        let mut discard = poi(2, "Bistro Two");
        discard.phone = Some("+33 2".to_string());
        discard.website = Some("https://bistro.example".to_string());
        discard.category = Category::Drink;

        let plan = plan_with_keep(&keep, &discard);
        assert!(!plan.overrides.contains_key(&PoiField::Phone));
        assert!(!plan.overrides.contains_key(&PoiField::Name));
        assert!(!plan.overrides.contains_key(&PoiField::Category));
        assert_eq!(
            plan.overrides.get(&PoiField::Website),
            Some(&FieldValue::Text("https://bistro.example".to_string()))
        );
    }

    #[test]
    fn test_no_override_when_both_absent() {
        let plan = plan_with_keep(&poi(1, "A"), &poi(2, "A"));
        assert!(plan.overrides.is_empty());
    }

    #[test]
    fn test_coordinates_are_adopted_as_a_pair() {
        let keep = poi(1, "A");
        let mut discard = poi(2, "A");
        discard.coordinates = Some(GeoPoint::new(48.85, 2.29));

        let merged = plan_with_keep(&keep, &discard).apply_to(&keep);
        assert_eq!(merged.coordinates, Some(GeoPoint::new(48.85, 2.29)));

        let mut keep_located = poi(3, "A");
        keep_located.coordinates = Some(GeoPoint::new(1.0, 1.0));
        let plan = plan_with_keep(&keep_located, &discard);
        assert!(!plan.overrides.contains_key(&PoiField::Coordinates));
    }

    #[test]
    fn test_district_rule() {
        let mut keep = poi(1, "A");
        let mut discard = poi(2, "A");
        discard.district_id = Some(7);
        assert_eq!(
            plan_with_keep(&keep, &discard).overrides.get(&PoiField::District),
            Some(&FieldValue::Area(7))
        );

        keep.district_id = Some(9);
        assert!(!plan_with_keep(&keep, &discard)
            .overrides
            .contains_key(&PoiField::District));
    }

    #[test]
    fn test_choose_keep_prefers_complete_record() {
        let bare = poi(1, "A");
        let mut rich = poi(2, "A");
        rich.address = Some("1 Rue".to_string());
        rich.osm_id = Some(OsmId::new(OsmType::Node, 1));

        let (keep, discard) = choose_keep(&bare, &rich);
        assert_eq!((keep.id, discard.id), (2, 1));

        let (a, b) = (poi(4, "B"), poi(3, "B"));
        assert_eq!(choose_keep(&a, &b).0.id, 3);
    }

    #[test]
    fn test_resolve_keeps_first_argument() {
        let mut a = poi(1, "Bistro");
        a.phone = Some("+33 1".to_string());
        let mut b = poi(2, "Bistro Deux");
        b.phone = Some("+33 2".to_string());
        b.address = Some("1 Rue".to_string());
        b.category = Category::Drink;

        let plan = resolve(&a, &b);
        assert_eq!(plan.keep_id, 1);
        assert_eq!(plan.discard_id, 2);

        let merged = plan.apply_to(&a);
        assert_eq!(merged.phone.as_deref(), Some("+33 1"));
        assert_eq!(merged.name, "Bistro");
        assert_eq!(merged.category, Category::Eat);
        assert_eq!(merged.address.as_deref(), Some("1 Rue"));
    }

    fn located(name: &str, lat: f64) -> Poi {
        let mut p = poi(0, name);
        p.coordinates = Some(GeoPoint::new(lat, 2.0));
        p
    }

    #[test]
    fn test_merge_pair_applies_and_deletes() {
        let store = Store::temporary().unwrap();
        let root = store.get_or_create_root("Paris").unwrap();
        let mut first = located("Bistro", 48.0);
        first.rank = 3;
        let mut second = poi(0, "Bistro");
        second.rank = 1;
        second.hours = Some("9-17".to_string());
        let saved = store.replace_area_pois(&root, vec![first, second]).unwrap();

        let (merged, plan) = merge_pair(&store, saved[0].id, saved[1].id).unwrap();
        assert_eq!(merged.id, saved[0].id);
        assert_eq!(merged.rank, 1);
        assert_eq!(merged.hours.as_deref(), Some("9-17"));
        assert_eq!(plan.discard_id, saved[1].id);
        assert!(store.poi(saved[1].id).is_err());
        assert_eq!(store.pois_for_area(root.id).unwrap().len(), 1);

        assert!(matches!(
            merge_pair(&store, saved[0].id, saved[0].id),
            Err(MergeError::SameRecord(_))
        ));
        assert!(matches!(
            merge_pair(&store, saved[0].id, saved[1].id),
            Err(MergeError::Store(StoreError::PoiNotFound(_)))
        ));
    }

    #[test]
    fn test_auto_merge_continues_past_failures() {
        let store = Store::temporary().unwrap();
        let root = store.get_or_create_root("Paris").unwrap();
        store
            .replace_area_pois(
                &root,
                vec![
                    located("Tower", 48.0),
                    located("Tower", 48.0001),
                    located("Tower", 48.0002),
                    located("Arch", 40.0),
                ],
            )
            .unwrap();

        let report = auto_merge(
            &store,
            root.id,
            None,
            &DuplicateDetector::default(),
            &[DedupScope::WholeTree],
        )
        .unwrap();

        // Three Tower pairs: the first two merges succeed into the same record,
        // the last refers to a record that is already gone
        assert_eq!(report.total_pairs, 3);
        assert_eq!(report.merged_count, 2);
        assert_eq!(report.errors.len(), 1);

        let names: Vec<_> = store
            .pois_for_root(root.id)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Arch".to_string()));
    }
}
