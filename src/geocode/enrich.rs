//! Enrichment passes filling in coordinates and addresses.
//!
//! Each pass is failure-isolated per record: a geocoder error is logged and
//! counted, and the pass moves on. Only store reads propagate.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Geocoder;
use crate::models::{Area, AreaId};
use crate::store::{Store, StoreError};

/// Counts from an enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
}

async fn pause(delay: Duration, first: &mut bool) {
    if !*first && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    *first = false;
}

fn area_query(area: &Area, root: &Area) -> String {
    if area.is_root() {
        area.name.clone()
    } else {
        format!("{}, {}", area.name, root.name)
    }
}

/// Look up coordinates for the root and every district that has none.
///
/// Districts are searched as "<district>, <city>" near the root's position.
pub async fn geocode_area_coordinates<G: Geocoder>(
    store: &Store,
    geocoder: &G,
    root_id: AreaId,
    delay: Duration,
) -> Result<EnrichReport, StoreError> {
    let mut report = EnrichReport::default();
    let mut first = true;
    let mut root = store.area(root_id)?;

    for area in store.descendants(root_id)? {
        if area.coordinates.is_some() {
            continue;
        }
        report.processed += 1;
        pause(delay, &mut first).await;

        let query = area_query(&area, &root);
        let proximity = if area.is_root() { None } else { root.coordinates };
        match geocoder.forward_geocode(&query, proximity).await {
            Ok(Some(point)) => {
                let updated = store.set_area_coordinates(area.id, point)?;
                if updated.is_root() {
                    root = updated;
                }
                debug!("{} -> ({}, {})", query, point.lat, point.lon);
                report.updated += 1;
            }
            Ok(None) => debug!("No coordinates found for {}", query),
            Err(e) => {
                warn!("Geocoding area {} ({}) failed: {}", area.id, query, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Area coordinates: {} processed, {} updated, {} failed",
        report.processed, report.updated, report.failed
    );
    Ok(report)
}

/// Reverse-geocode an address for every POI with coordinates but no address
pub async fn fill_missing_addresses<G: Geocoder>(
    store: &Store,
    geocoder: &G,
    root_id: AreaId,
    delay: Duration,
) -> Result<EnrichReport, StoreError> {
    let mut report = EnrichReport::default();
    let mut first = true;

    for mut poi in store.pois_for_root(root_id)? {
        let Some(point) = poi.coordinates else {
            continue;
        };
        if poi.address.as_deref().is_some_and(|a| !a.trim().is_empty()) {
            continue;
        }
        report.processed += 1;
        pause(delay, &mut first).await;

        match geocoder.reverse_geocode(point.lon, point.lat).await {
            Ok(Some(address)) => {
                poi.address = Some(address);
                match store.update_poi(&poi) {
                    Ok(()) => report.updated += 1,
                    Err(e) => {
                        warn!("Failed to save address for POI {}: {}", poi.id, e);
                        report.failed += 1;
                    }
                }
            }
            Ok(None) => debug!("No address for POI {} ({})", poi.id, poi.name),
            Err(e) => {
                warn!("Reverse geocoding POI {} ({}) failed: {}", poi.id, poi.name, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Missing addresses: {} processed, {} updated, {} failed",
        report.processed, report.updated, report.failed
    );
    Ok(report)
}

/// Forward-geocode coordinates for every POI with an address but no position
pub async fn fill_missing_coordinates<G: Geocoder>(
    store: &Store,
    geocoder: &G,
    root_id: AreaId,
    delay: Duration,
) -> Result<EnrichReport, StoreError> {
    let mut report = EnrichReport::default();
    let mut first = true;
    let root = store.area(root_id)?;

    for mut poi in store.pois_for_root(root_id)? {
        if poi.coordinates.is_some() {
            continue;
        }
        let Some(address) = poi.address.clone().filter(|a| !a.trim().is_empty()) else {
            continue;
        };
        report.processed += 1;
        pause(delay, &mut first).await;

        let query = format!("{}, {}", address, root.name);
        match geocoder.forward_geocode(&query, root.coordinates).await {
            Ok(Some(point)) if point.is_valid() => {
                poi.coordinates = Some(point);
                match store.update_poi(&poi) {
                    Ok(()) => report.updated += 1,
                    Err(e) => {
                        warn!("Failed to save coordinates for POI {}: {}", poi.id, e);
                        report.failed += 1;
                    }
                }
            }
            Ok(_) => debug!("No coordinates for POI {} ({})", poi.id, query),
            Err(e) => {
                warn!("Geocoding POI {} ({}) failed: {}", poi.id, query, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Missing coordinates: {} processed, {} updated, {} failed",
        report.processed, report.updated, report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::GeocodeError;
    use crate::models::{Category, GeoPoint, Poi};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGeocoder {
        places: HashMap<String, GeoPoint>,
        addresses: HashMap<String, String>,
        failing: Vec<String>,
        queries: Mutex<Vec<(String, Option<GeoPoint>)>>,
    }

    fn key(lon: f64, lat: f64) -> String {
        format!("{},{}", lon, lat)
    }

    impl Geocoder for FakeGeocoder {
        async fn forward_geocode(
            &self,
            query: &str,
            proximity: Option<GeoPoint>,
        ) -> Result<Option<GeoPoint>, GeocodeError> {
            self.queries.lock().unwrap().push((query.to_string(), proximity));
            if self.failing.iter().any(|f| f == query) {
                return Err(GeocodeError::Malformed("boom".to_string()));
            }
            Ok(self.places.get(query).copied())
        }

        async fn reverse_geocode(&self, lon: f64, lat: f64) -> Result<Option<String>, GeocodeError> {
            let k = key(lon, lat);
            if self.failing.contains(&k) {
                return Err(GeocodeError::Malformed("boom".to_string()));
            }
            Ok(self.addresses.get(&k).cloned())
        }
    }

    fn poi(name: &str, coordinates: Option<GeoPoint>, address: Option<&str>) -> Poi {
        Poi {
            id: 0,
            root_id: 0,
            district_id: None,
            name: name.to_string(),
            category: Category::See,
            sub_category: None,
            description: String::new(),
            coordinates,
            address: address.map(str::to_string),
            phone: None,
            website: None,
            hours: None,
            image: None,
            rank: 1,
            osm_id: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_area_coordinates_use_root_proximity() {
        let store = Store::temporary().unwrap();
        let root = store.get_or_create_root("Paris").unwrap();
        let marais = store.get_or_create_district("Le Marais", root.id, root.id).unwrap();
        let _ = store.get_or_create_district("Nowhere", root.id, root.id).unwrap();

        let paris = GeoPoint::new(48.8566, 2.3522);
        let geocoder = FakeGeocoder {
            places: HashMap::from([
                ("Paris".to_string(), paris),
                ("Le Marais, Paris".to_string(), GeoPoint::new(48.859, 2.362)),
            ]),
            ..FakeGeocoder::default()
        };

        let report = geocode_area_coordinates(&store, &geocoder, root.id, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report, EnrichReport { processed: 3, updated: 2, failed: 0 });
        assert_eq!(store.area(root.id).unwrap().coordinates, Some(paris));
        assert!(store.area(marais.id).unwrap().coordinates.is_some());

        let queries = geocoder.queries.lock().unwrap();
        assert_eq!(queries[0], ("Paris".to_string(), None));
        assert!(queries[1..].iter().all(|(_, proximity)| *proximity == Some(paris)));

        drop(queries);
        // areas that already have coordinates are skipped
        let again = geocode_area_coordinates(&store, &geocoder, root.id, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(again.processed, 1);
    }

    #[tokio::test]
    async fn test_fill_missing_addresses() {
        let store = Store::temporary().unwrap();
        let root = store.get_or_create_root("Paris").unwrap();
        let stored = store
            .replace_area_pois(
                &root,
                vec![
                    poi("Tower", Some(GeoPoint::new(48.5, 2.5)), None),
                    poi("Cafe", Some(GeoPoint::new(48.25, 2.25)), None),
                    poi("Known", Some(GeoPoint::new(48.0, 2.0)), Some("1 Known St")),
                    poi("Lost", None, None),
                ],
            )
            .unwrap();

        let geocoder = FakeGeocoder {
            addresses: HashMap::from([(key(2.5, 48.5), "5 Avenue Anatole France".to_string())]),
            failing: vec![key(2.25, 48.25)],
            ..FakeGeocoder::default()
        };

        let report = fill_missing_addresses(&store, &geocoder, root.id, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report, EnrichReport { processed: 2, updated: 1, failed: 1 });
        assert_eq!(
            store.poi(stored[0].id).unwrap().address.as_deref(),
            Some("5 Avenue Anatole France")
        );
        assert_eq!(store.poi(stored[1].id).unwrap().address, None);
    }

    #[tokio::test]
    async fn test_fill_missing_coordinates() {
        let store = Store::temporary().unwrap();
        let root = store.get_or_create_root("Paris").unwrap();
        let stored = store
            .replace_area_pois(
                &root,
                vec![
                    poi("Louvre", None, Some("Rue de Rivoli")),
                    poi("Unknown", None, Some("Nowhere Lane")),
                    poi("Placed", Some(GeoPoint::new(48.0, 2.0)), Some("1 Placed St")),
                ],
            )
            .unwrap();

        let louvre = GeoPoint::new(48.8606, 2.3376);
        let geocoder = FakeGeocoder {
            places: HashMap::from([("Rue de Rivoli, Paris".to_string(), louvre)]),
            ..FakeGeocoder::default()
        };

        let report = fill_missing_coordinates(&store, &geocoder, root.id, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(report, EnrichReport { processed: 2, updated: 1, failed: 0 });
        assert_eq!(store.poi(stored[0].id).unwrap().coordinates, Some(louvre));
        assert_eq!(store.poi(stored[1].id).unwrap().coordinates, None);
    }
}
