//! Pairwise duplicate detection over persisted POIs.

use hashbrown::HashSet;
use serde::Deserialize;
use tracing::{debug, info};

use crate::fuzzy;
use crate::models::{AreaId, Poi, PoiId};
use crate::store::{Store, StoreError};

/// Thresholds and rule selection for duplicate detection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub rule: RuleKind,
    /// Names are similar when their ratio is strictly above this
    pub name_threshold: f64,
    /// Addresses are similar when their ratio is strictly above this
    pub address_threshold: f64,
    /// Half-width in degrees of the box two POIs must share to be close
    pub coordinate_delta: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            rule: RuleKind::NameGated,
            name_threshold: 0.85,
            address_threshold: 0.85,
            coordinate_delta: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Similar names and (nearby coordinates or similar addresses)
    #[default]
    NameGated,
    /// Similar names, or same category and (nearby coordinates or similar addresses)
    CategoryOrName,
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name_gated" => Ok(RuleKind::NameGated),
            "category_or_name" => Ok(RuleKind::CategoryOrName),
            other => Err(format!("unknown duplicate rule: {}", other)),
        }
    }
}

/// Individual similarity signals between two POIs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signals {
    pub name_ratio: Option<f64>,
    pub address_ratio: Option<f64>,
    pub name_similar: bool,
    pub same_category: bool,
    pub close: bool,
    pub address_similar: bool,
}

impl Signals {
    pub fn compare(a: &Poi, b: &Poi, config: &DedupConfig) -> Self {
        let name_ratio = match (a.name.trim(), b.name.trim()) {
            ("", _) | (_, "") => None,
            (x, y) => Some(fuzzy::ratio(x, y)),
        };

        let address_ratio = match (non_empty(&a.address), non_empty(&b.address)) {
            (Some(x), Some(y)) => Some(fuzzy::ratio(x, y)),
            _ => None,
        };

        let close = match (a.coordinates, b.coordinates) {
            (Some(p), Some(q)) => {
                (p.lat - q.lat).abs() < config.coordinate_delta
                    && (p.lon - q.lon).abs() < config.coordinate_delta
            }
            _ => false,
        };

        Self {
            name_similar: name_ratio.is_some_and(|r| r > config.name_threshold),
            address_similar: address_ratio.is_some_and(|r| r > config.address_threshold),
            same_category: a.category == b.category,
            close,
            name_ratio,
            address_ratio,
        }
    }

    /// Human-readable description of every signal that fired
    pub fn reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.name_similar {
            reasons.push(format!(
                "similar names ({:.2})",
                self.name_ratio.unwrap_or_default()
            ));
        }
        if self.same_category {
            reasons.push("same category".to_string());
        }
        if self.close {
            reasons.push("nearby coordinates".to_string());
        }
        if self.address_similar {
            reasons.push(format!(
                "similar addresses ({:.2})",
                self.address_ratio.unwrap_or_default()
            ));
        }
        reasons
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Decision over a pair's signals
pub trait DuplicateRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_duplicate(&self, signals: &Signals) -> bool;
}

pub struct NameGatedRule;

impl DuplicateRule for NameGatedRule {
    fn name(&self) -> &'static str {
        "name_gated"
    }

    fn is_duplicate(&self, s: &Signals) -> bool {
        s.name_similar && (s.close || s.address_similar)
    }
}

pub struct CategoryOrNameRule;

impl DuplicateRule for CategoryOrNameRule {
    fn name(&self) -> &'static str {
        "category_or_name"
    }

    fn is_duplicate(&self, s: &Signals) -> bool {
        s.name_similar || (s.same_category && (s.close || s.address_similar))
    }
}

/// Signals plus a swappable decision rule
pub struct DuplicateDetector {
    config: DedupConfig,
    rule: Box<dyn DuplicateRule>,
}

impl DuplicateDetector {
    pub fn new(config: DedupConfig) -> Self {
        let rule: Box<dyn DuplicateRule> = match config.rule {
            RuleKind::NameGated => Box::new(NameGatedRule),
            RuleKind::CategoryOrName => Box::new(CategoryOrNameRule),
        };
        Self { config, rule }
    }

    pub fn with_rule(config: DedupConfig, rule: Box<dyn DuplicateRule>) -> Self {
        Self { config, rule }
    }

    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }

    /// Decision and the reasons behind it
    pub fn is_duplicate(&self, a: &Poi, b: &Poi) -> (bool, Vec<String>) {
        let signals = Signals::compare(a, b, &self.config);
        (self.rule.is_duplicate(&signals), signals.reasons())
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

/// Candidate duplicate produced by a scan
#[derive(Debug, Clone)]
pub struct DuplicatePair {
    pub first: Poi,
    pub second: Poi,
    pub reasons: Vec<String>,
}

/// Unordered-pair scan that evaluates each pair of ids at most once, across
/// any number of calls to `scan`
#[derive(Debug, Default)]
pub struct PairScanner {
    seen: HashSet<(PoiId, PoiId)>,
}

impl PairScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct pairs evaluated so far
    pub fn evaluated(&self) -> usize {
        self.seen.len()
    }

    pub fn scan(&mut self, pois: &[Poi], detector: &DuplicateDetector) -> Vec<DuplicatePair> {
        let mut pairs = Vec::new();

        for (i, a) in pois.iter().enumerate() {
            for b in &pois[i + 1..] {
                if a.id == b.id {
                    continue;
                }
                let key = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
                if !self.seen.insert(key) {
                    continue;
                }

                let (duplicate, reasons) = detector.is_duplicate(a, b);
                if duplicate {
                    debug!("Duplicate candidate {} / {}: {:?}", a.name, b.name, reasons);
                    pairs.push(DuplicatePair {
                        first: a.clone(),
                        second: b.clone(),
                        reasons,
                    });
                }
            }
        }

        pairs
    }
}

/// Which POIs of a tree a detection pass looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupScope {
    /// POIs owned directly by the root area
    MainArea,
    /// Every POI anywhere under the root
    WholeTree,
}

/// POIs in scope, ordered by rank then id
pub fn scope_pois(store: &Store, root: AreaId, scope: DedupScope) -> Result<Vec<Poi>, StoreError> {
    let mut pois = match scope {
        DedupScope::MainArea => store.pois_for_area(root)?,
        DedupScope::WholeTree => store.pois_for_root(root)?,
    };
    pois.sort_by_key(|p| (p.rank, p.id));
    Ok(pois)
}

/// Detect duplicate pairs across one or more scopes of a tree. Pairs that
/// show up in several scopes are reported once.
pub fn find_duplicates(
    store: &Store,
    root: AreaId,
    scopes: &[DedupScope],
    detector: &DuplicateDetector,
) -> Result<Vec<DuplicatePair>, StoreError> {
    let mut scanner = PairScanner::new();
    let mut pairs = Vec::new();

    for scope in scopes {
        let pois = scope_pois(store, root, *scope)?;
        pairs.extend(scanner.scan(&pois, detector));
    }

    info!(
        "Evaluated {} pairs with rule {}, found {} duplicate candidates",
        scanner.evaluated(),
        detector.rule_name(),
        pairs.len()
    );
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, GeoPoint};
    use chrono::Utc;

    fn poi(id: PoiId, name: &str) -> Poi {
        Poi {
            id,
            root_id: 1,
            district_id: None,
            name: name.to_string(),
            category: Category::See,
            sub_category: None,
            description: String::new(),
            coordinates: None,
            address: None,
            phone: None,
            website: None,
            hours: None,
            image: None,
            rank: id as u32,
            osm_id: None,
            updated_at: Utc::now(),
        }
    }

    fn at(mut p: Poi, lat: f64, lon: f64) -> Poi {
        p.coordinates = Some(GeoPoint::new(lat, lon));
        p
    }

    fn with_address(mut p: Poi, address: &str) -> Poi {
        p.address = Some(address.to_string());
        p
    }

    fn legacy() -> DuplicateDetector {
        DuplicateDetector::new(DedupConfig {
            rule: RuleKind::CategoryOrName,
            ..DedupConfig::default()
        })
    }

    #[test]
    fn test_similar_names_and_nearby_coordinates() {
        let detector = DuplicateDetector::default();
        let a = at(poi(1, "Eiffel Tower"), 48.8584, 2.2945);
        let b = at(poi(2, "Eiffel tower."), 48.8585, 2.2946);

        let (duplicate, reasons) = detector.is_duplicate(&a, &b);
        assert!(duplicate);
        assert!(reasons.iter().any(|r| r.starts_with("similar names")));
        assert!(reasons.contains(&"nearby coordinates".to_string()));
    }

    #[test]
    fn test_similar_names_without_location_evidence() {
        let detector = DuplicateDetector::default();
        let a = poi(1, "Eiffel Tower");
        let b = poi(2, "Eiffel Tower");
        assert!(!detector.is_duplicate(&a, &b).0);
    }

    #[test]
    fn test_coordinate_box_is_exclusive() {
        let detector = DuplicateDetector::default();
        let a = at(poi(1, "Tower"), 48.0, 2.0);
        let b = at(poi(2, "Tower"), 48.002, 2.0);
        assert!(!detector.is_duplicate(&a, &b).0);

        let c = at(poi(3, "Tower"), 48.0005, 2.0005);
        assert!(detector.is_duplicate(&a, &c).0);
    }

    #[test]
    fn test_empty_names_are_never_similar() {
        let config = DedupConfig::default();
        let a = at(poi(1, ""), 48.0, 2.0);
        let b = at(poi(2, ""), 48.0, 2.0);
        let signals = Signals::compare(&a, &b, &config);
        assert!(!signals.name_similar);
        assert!(signals.close);
    }

    #[test]
    fn test_address_match_without_name_match_is_not_a_duplicate() {
        let a = with_address(poi(1, "Blue Door Cafe"), "10 Main St");
        let b = with_address(poi(2, "Harbour Museum"), "10 Main Street");

        assert!(!DuplicateDetector::default().is_duplicate(&a, &b).0);

        // identical address strings clear the threshold under either rule
        let c = with_address(poi(3, "Harbour Museum"), "10 Main St");
        assert!(!DuplicateDetector::default().is_duplicate(&a, &c).0);
        assert!(legacy().is_duplicate(&a, &c).0);
    }

    #[test]
    fn test_rules_differ_on_name_only_match() {
        let a = poi(1, "Notre-Dame Cathedral");
        let mut b = poi(2, "Notre Dame Cathedral");
        b.category = Category::Play;

        assert!(!DuplicateDetector::default().is_duplicate(&a, &b).0);
        assert!(legacy().is_duplicate(&a, &b).0);
    }

    #[test]
    fn test_decision_is_symmetric() {
        let detector = DuplicateDetector::default();
        let pois = [
            at(poi(1, "Musee d'Orsay"), 48.86, 2.3265),
            at(poi(2, "Musée d'Orsay"), 48.8601, 2.3266),
            with_address(poi(3, "Orsay Museum"), "1 Rue de la Legion d'Honneur"),
            with_address(poi(4, "Musee d'Orsay"), "1 Rue de la Légion d'Honneur"),
        ];
        for a in &pois {
            for b in &pois {
                assert_eq!(detector.is_duplicate(a, b).0, detector.is_duplicate(b, a).0);
            }
        }
    }

    #[test]
    fn test_scanner_evaluates_each_pair_once() {
        let detector = DuplicateDetector::default();
        let pois = vec![
            at(poi(1, "Tower"), 48.0, 2.0),
            at(poi(2, "Tower"), 48.0, 2.0),
            at(poi(3, "Arch"), 48.0, 2.0),
        ];

        let mut scanner = PairScanner::new();
        let first = scanner.scan(&pois, &detector);
        assert_eq!(first.len(), 1);
        assert_eq!(scanner.evaluated(), 3);

        // Same set again, reversed, plus a repeated id: nothing new to evaluate
        let mut again: Vec<Poi> = pois.iter().rev().cloned().collect();
        again.push(pois[0].clone());
        assert!(scanner.scan(&again, &detector).is_empty());
        assert_eq!(scanner.evaluated(), 3);
    }

    #[test]
    fn test_find_duplicates_across_overlapping_scopes() {
        let store = Store::temporary().unwrap();
        let root = store.get_or_create_root("Paris").unwrap();
        let district = store.get_or_create_district("Le Marais", root.id, root.id).unwrap();

        store
            .replace_area_pois(
                &root,
                vec![at(poi(0, "Tower"), 48.0, 2.0), at(poi(0, "Tower "), 48.0, 2.0)],
            )
            .unwrap();
        store
            .replace_area_pois(&district, vec![at(poi(0, "Tower"), 48.0003, 2.0)])
            .unwrap();

        let detector = DuplicateDetector::default();
        let main = find_duplicates(&store, root.id, &[DedupScope::MainArea], &detector).unwrap();
        assert_eq!(main.len(), 1);

        let both = find_duplicates(
            &store,
            root.id,
            &[DedupScope::MainArea, DedupScope::WholeTree],
            &detector,
        )
        .unwrap();
        assert_eq!(both.len(), 3);
    }
}
