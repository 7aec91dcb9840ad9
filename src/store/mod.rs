//! Embedded persistence for areas, POIs and validation events.
//!
//! Everything lives in one sled database. Records are JSON values keyed by
//! big-endian ids from `Db::generate_id`; the `area_pois` tree holds the list
//! of POI ids directly owned by each area so an area's POI set can be
//! cleared and rebuilt inside a single transaction.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::models::{Area, AreaId, GeoPoint, OsmId, Poi, PoiId, ValidationEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt {0} record")]
    Corrupt(String),

    #[error("area {0} not found")]
    AreaNotFound(AreaId),

    #[error("POI {0} not found")]
    PoiNotFound(PoiId),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Db(e),
        }
    }
}

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

fn abort<T>(err: impl Into<StoreError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

const ROOT_PREFIX: &[u8] = b"root\0";
const CHILD_PREFIX: &[u8] = b"area\0";

fn root_key(name: &str) -> Vec<u8> {
    let mut key = ROOT_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

fn children_prefix(parent: AreaId) -> Vec<u8> {
    let mut key = CHILD_PREFIX.to_vec();
    key.extend_from_slice(&parent.to_be_bytes());
    key
}

fn child_key(parent: AreaId, name: &str) -> Vec<u8> {
    let mut key = children_prefix(parent);
    key.extend_from_slice(name.as_bytes());
    key
}

fn id_from_bytes(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn tx_decode<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_read_ids(tree: &TransactionalTree, area: AreaId) -> TxResult<Vec<PoiId>> {
    match tree.get(area.to_be_bytes())? {
        Some(bytes) => tx_decode(&bytes),
        None => Ok(Vec::new()),
    }
}

fn tx_write_ids(tree: &TransactionalTree, area: AreaId, ids: &[PoiId]) -> TxResult<()> {
    let bytes = tx_encode(&ids)?;
    tree.insert(&area.to_be_bytes()[..], bytes)?;
    Ok(())
}

/// Handle to the city guide database
#[derive(Clone)]
pub struct Store {
    db: Db,
    areas: Tree,
    area_names: Tree,
    pois: Tree,
    area_pois: Tree,
    validations: Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            areas: db.open_tree("areas")?,
            area_names: db.open_tree("area_names")?,
            pois: db.open_tree("pois")?,
            area_pois: db.open_tree("area_pois")?,
            validations: db.open_tree("validations")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ----- areas -----

    pub fn area(&self, id: AreaId) -> Result<Area, StoreError> {
        match self.areas.get(id.to_be_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::AreaNotFound(id)),
        }
    }

    pub fn find_root(&self, name: &str) -> Result<Option<Area>, StoreError> {
        match self.area_names.get(root_key(name))? {
            Some(bytes) => match id_from_bytes(&bytes) {
                Some(id) => Ok(Some(self.area(id)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// All root areas, ordered by name
    pub fn roots(&self) -> Result<Vec<Area>, StoreError> {
        self.areas_under_prefix(ROOT_PREFIX)
    }

    /// Direct children of an area, ordered by name
    pub fn children(&self, parent: AreaId) -> Result<Vec<Area>, StoreError> {
        self.areas_under_prefix(&children_prefix(parent))
    }

    fn areas_under_prefix(&self, prefix: &[u8]) -> Result<Vec<Area>, StoreError> {
        let mut areas = Vec::new();
        for entry in self.area_names.scan_prefix(prefix) {
            let (_, value) = entry?;
            if let Some(id) = id_from_bytes(&value) {
                areas.push(self.area(id)?);
            }
        }
        Ok(areas)
    }

    /// Every area of a tree, root first, breadth-first
    pub fn descendants(&self, root: AreaId) -> Result<Vec<Area>, StoreError> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([self.area(root)?]);
        while let Some(area) = queue.pop_front() {
            queue.extend(self.children(area.id)?);
            out.push(area);
        }
        Ok(out)
    }

    pub fn get_or_create_root(&self, name: &str) -> Result<Area, StoreError> {
        let key = root_key(name);
        let candidate_id = self.db.generate_id()?;
        self.get_or_create_area(&key, || Area::new_root(candidate_id, name))
    }

    /// District named `name` under `parent`, unique among its siblings
    pub fn get_or_create_district(
        &self,
        name: &str,
        root_id: AreaId,
        parent: AreaId,
    ) -> Result<Area, StoreError> {
        let key = child_key(parent, name);
        let candidate_id = self.db.generate_id()?;
        self.get_or_create_area(&key, || {
            Area::new_district(candidate_id, name, root_id, parent)
        })
    }

    fn get_or_create_area<F>(&self, name_key: &[u8], build: F) -> Result<Area, StoreError>
    where
        F: Fn() -> Area,
    {
        let created = (&self.area_names, &self.areas).transaction(|(names, areas)| {
            if let Some(existing) = names.get(name_key)? {
                let Some(id) = id_from_bytes(&existing) else {
                    return abort(StoreError::Corrupt("area id".to_string()));
                };
                return match areas.get(id.to_be_bytes())? {
                    Some(bytes) => tx_decode(&bytes),
                    None => abort(StoreError::AreaNotFound(id)),
                };
            }

            let area = build();
            names.insert(name_key, &area.id.to_be_bytes()[..])?;
            areas.insert(&area.id.to_be_bytes()[..], tx_encode(&area)?)?;
            Ok(area)
        })?;
        Ok(created)
    }

    fn update_area<F>(&self, id: AreaId, update: F) -> Result<Area, StoreError>
    where
        F: FnOnce(&mut Area),
    {
        let mut area = self.area(id)?;
        update(&mut area);
        area.updated_at = Utc::now();
        self.areas.insert(id.to_be_bytes(), encode(&area)?)?;
        Ok(area)
    }

    pub fn set_area_summary(&self, id: AreaId, summary: Option<String>) -> Result<Area, StoreError> {
        self.update_area(id, |area| area.summary = summary)
    }

    pub fn set_area_coordinates(&self, id: AreaId, point: GeoPoint) -> Result<Area, StoreError> {
        self.update_area(id, |area| area.coordinates = Some(point))
    }

    // ----- POIs -----

    pub fn poi(&self, id: PoiId) -> Result<Poi, StoreError> {
        match self.pois.get(id.to_be_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::PoiNotFound(id)),
        }
    }

    /// POIs directly owned by an area, in insertion order
    pub fn pois_for_area(&self, area: AreaId) -> Result<Vec<Poi>, StoreError> {
        let ids: Vec<PoiId> = match self.area_pois.get(area.to_be_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(Vec::new()),
        };
        ids.into_iter().map(|id| self.poi(id)).collect()
    }

    /// Every POI anywhere in a root's tree
    pub fn pois_for_root(&self, root: AreaId) -> Result<Vec<Poi>, StoreError> {
        let mut pois = Vec::new();
        for area in self.descendants(root)? {
            pois.extend(self.pois_for_area(area.id)?);
        }
        Ok(pois)
    }

    /// Clear every POI directly owned by `area` and insert `pois` in its place.
    ///
    /// Ids are assigned here; the area's previous POIs and the new set are
    /// swapped in one transaction, so readers see either the old or the new set.
    pub fn replace_area_pois(&self, area: &Area, mut pois: Vec<Poi>) -> Result<Vec<Poi>, StoreError> {
        let district_id = if area.is_root() { None } else { Some(area.id) };
        for poi in &mut pois {
            poi.id = self.db.generate_id()?;
            poi.root_id = area.root_id;
            poi.district_id = district_id;
        }

        let encoded = pois
            .iter()
            .map(|p| Ok((p.id.to_be_bytes(), encode(p)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let new_ids: Vec<PoiId> = pois.iter().map(|p| p.id).collect();

        let removed = (&self.pois, &self.area_pois).transaction(|(tx_pois, tx_index)| {
            let old_ids = tx_read_ids(tx_index, area.id)?;
            for id in &old_ids {
                tx_pois.remove(&id.to_be_bytes()[..])?;
            }
            for (key, value) in &encoded {
                tx_pois.insert(&key[..], value.as_slice())?;
            }
            tx_write_ids(tx_index, area.id, &new_ids)?;
            Ok(old_ids.len())
        })?;

        debug!(
            "Replaced {} POIs of area {} with {}",
            removed,
            area.id,
            pois.len()
        );
        Ok(pois)
    }

    /// Overwrite an existing POI's fields. Ownership (root and district) is
    /// not re-indexed here; use `apply_merge` for changes that move a POI.
    pub fn update_poi(&self, poi: &Poi) -> Result<(), StoreError> {
        let key = poi.id.to_be_bytes();
        if !self.pois.contains_key(key)? {
            return Err(StoreError::PoiNotFound(poi.id));
        }
        let mut poi = poi.clone();
        poi.updated_at = Utc::now();
        self.pois.insert(key, encode(&poi)?)?;
        Ok(())
    }

    pub fn set_osm_id(&self, id: PoiId, osm_id: OsmId) -> Result<(), StoreError> {
        let mut poi = self.poi(id)?;
        poi.osm_id = Some(osm_id);
        self.update_poi(&poi)
    }

    /// Merge `discard` into `keep` atomically.
    ///
    /// Both records are re-read inside the transaction and handed to
    /// `resolve`, whose returned record replaces `keep` (its id is forced to
    /// `keep_id`). `discard` is deleted and the ownership index updated in
    /// the same transaction. Fails with `PoiNotFound` if either side is gone.
    pub fn apply_merge<T, F>(
        &self,
        keep_id: PoiId,
        discard_id: PoiId,
        resolve: F,
    ) -> Result<(Poi, T), StoreError>
    where
        F: Fn(&Poi, &Poi) -> (Poi, T),
    {
        let result = (&self.pois, &self.area_pois).transaction(|(tx_pois, tx_index)| {
            let keep: Poi = match tx_pois.get(keep_id.to_be_bytes())? {
                Some(bytes) => tx_decode(&bytes)?,
                None => return abort(StoreError::PoiNotFound(keep_id)),
            };
            let discard: Poi = match tx_pois.get(discard_id.to_be_bytes())? {
                Some(bytes) => tx_decode(&bytes)?,
                None => return abort(StoreError::PoiNotFound(discard_id)),
            };

            let (mut merged, extra) = resolve(&keep, &discard);
            merged.id = keep_id;
            merged.updated_at = Utc::now();

            tx_pois.insert(&keep_id.to_be_bytes()[..], tx_encode(&merged)?)?;
            tx_pois.remove(&discard_id.to_be_bytes()[..])?;

            let discard_area = discard.area_id();
            let mut ids = tx_read_ids(tx_index, discard_area)?;
            ids.retain(|id| *id != discard_id);
            tx_write_ids(tx_index, discard_area, &ids)?;

            if merged.area_id() != keep.area_id() {
                let mut old = tx_read_ids(tx_index, keep.area_id())?;
                old.retain(|id| *id != keep_id);
                tx_write_ids(tx_index, keep.area_id(), &old)?;

                let mut new = tx_read_ids(tx_index, merged.area_id())?;
                new.push(keep_id);
                tx_write_ids(tx_index, merged.area_id(), &new)?;
            }

            Ok((merged, extra))
        })?;
        Ok(result)
    }

    // ----- validations -----

    pub fn record_validation(&self, event: &ValidationEvent) -> Result<u64, StoreError> {
        let id = self.db.generate_id()?;
        self.validations.insert(id.to_be_bytes(), encode(event)?)?;
        Ok(id)
    }

    /// All recorded events, oldest first
    pub fn validations(&self) -> Result<Vec<ValidationEvent>, StoreError> {
        self.validations
            .iter()
            .map(|entry| {
                let (_, value) = entry?;
                decode(&value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, OsmType};

    fn sample_poi(name: &str) -> Poi {
        Poi {
            id: 0,
            root_id: 0,
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
            rank: 1,
            osm_id: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = Store::temporary().unwrap();
        let paris = store.get_or_create_root("Paris").unwrap();
        let again = store.get_or_create_root("Paris").unwrap();
        assert_eq!(paris.id, again.id);
        assert!(paris.is_root());
        assert_eq!(paris.root_id, paris.id);

        let marais = store
            .get_or_create_district("Le Marais", paris.id, paris.id)
            .unwrap();
        let marais_again = store
            .get_or_create_district("Le Marais", paris.id, paris.id)
            .unwrap();
        assert_eq!(marais.id, marais_again.id);
        assert_eq!(marais.parent_id, Some(paris.id));

        assert_eq!(store.find_root("Paris").unwrap().map(|a| a.id), Some(paris.id));
        assert!(store.find_root("Le Marais").unwrap().is_none());
        assert_eq!(store.children(paris.id).unwrap().len(), 1);
    }

    #[test]
    fn test_same_district_name_under_different_parents() {
        let store = Store::temporary().unwrap();
        let paris = store.get_or_create_root("Paris").unwrap();
        let lyon = store.get_or_create_root("Lyon").unwrap();
        let a = store.get_or_create_district("Centre", paris.id, paris.id).unwrap();
        let b = store.get_or_create_district("Centre", lyon.id, lyon.id).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_replace_area_pois_only_touches_that_area() {
        let store = Store::temporary().unwrap();
        let paris = store.get_or_create_root("Paris").unwrap();
        let marais = store
            .get_or_create_district("Le Marais", paris.id, paris.id)
            .unwrap();

        store
            .replace_area_pois(&paris, vec![sample_poi("Tower"), sample_poi("Arch")])
            .unwrap();
        store
            .replace_area_pois(&marais, vec![sample_poi("Square")])
            .unwrap();
        assert_eq!(store.pois_for_root(paris.id).unwrap().len(), 3);

        let replaced = store
            .replace_area_pois(&paris, vec![sample_poi("Louvre")])
            .unwrap();
        assert_eq!(replaced[0].district_id, None);
        assert_eq!(replaced[0].root_id, paris.id);

        let direct: Vec<_> = store
            .pois_for_area(paris.id)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(direct, vec!["Louvre"]);

        let district = store.pois_for_area(marais.id).unwrap();
        assert_eq!(district.len(), 1);
        assert_eq!(district[0].district_id, Some(marais.id));
        assert_eq!(store.pois_for_root(paris.id).unwrap().len(), 2);
    }

    #[test]
    fn test_apply_merge_deletes_discard() {
        let store = Store::temporary().unwrap();
        let paris = store.get_or_create_root("Paris").unwrap();
        let marais = store
            .get_or_create_district("Le Marais", paris.id, paris.id)
            .unwrap();
        let root_pois = store
            .replace_area_pois(&paris, vec![sample_poi("Tower")])
            .unwrap();
        let district_pois = store
            .replace_area_pois(&marais, vec![sample_poi("Tower ")])
            .unwrap();
        let keep = root_pois[0].id;
        let discard = district_pois[0].id;

        let (merged, ()) = store
            .apply_merge(keep, discard, |k, d| {
                let mut m = k.clone();
                m.district_id = d.district_id;
                (m, ())
            })
            .unwrap();

        assert_eq!(merged.id, keep);
        assert!(matches!(store.poi(discard), Err(StoreError::PoiNotFound(_))));
        assert!(store.pois_for_area(paris.id).unwrap().is_empty());
        let moved = store.pois_for_area(marais.id).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, keep);

        let err = store.apply_merge(keep, discard, |k, _| (k.clone(), ()));
        assert!(matches!(err, Err(StoreError::PoiNotFound(id)) if id == discard));
        assert!(store.poi(keep).is_ok());
    }

    #[test]
    fn test_set_osm_id_and_summary() {
        let store = Store::temporary().unwrap();
        let paris = store.get_or_create_root("Paris").unwrap();
        let pois = store.replace_area_pois(&paris, vec![sample_poi("Tower")]).unwrap();

        store
            .set_osm_id(pois[0].id, OsmId::new(OsmType::Way, 5013364))
            .unwrap();
        assert_eq!(
            store.poi(pois[0].id).unwrap().osm_id.map(|o| o.to_string()),
            Some("way/5013364".to_string())
        );

        store
            .set_area_summary(paris.id, Some("Capital".to_string()))
            .unwrap();
        assert_eq!(store.area(paris.id).unwrap().summary.as_deref(), Some("Capital"));
    }

    #[test]
    fn test_validations_round_trip() {
        let store = Store::temporary().unwrap();
        store
            .record_validation(&ValidationEvent::fetch_failure(None, true, "boom".to_string()))
            .unwrap();
        let events = store.validations().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].specialized_aggregate, "CityFetchError");
        assert_eq!(events[0].parent_area, None);
    }
}
