//! Spatial index over projected candidate shapes.

use geo::Coord;
use rstar::{RTree, RTreeObject, AABB};
use tracing::info;

use super::geometry::Shape;

/// R-tree entry pointing back into the extract's feature list
#[derive(Debug, Clone)]
pub struct IndexedCandidate {
    pub index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedCandidate {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// A candidate within the search radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearby {
    pub index: usize,
    pub distance_m: f64,
}

pub struct CandidateIndex {
    tree: RTree<IndexedCandidate>,
}

impl CandidateIndex {
    /// Index projected shapes by their position in `shapes`
    pub fn build(shapes: &[Shape]) -> Self {
        let entries: Vec<IndexedCandidate> = shapes
            .iter()
            .enumerate()
            .filter_map(|(index, shape)| {
                let rect = shape.bounds()?;
                Some(IndexedCandidate {
                    index,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        let tree = RTree::bulk_load(entries);
        info!("Candidate index built with {} entries", tree.size());
        Self { tree }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Candidates whose exact planar distance to `point` is at most
    /// `radius`, nearest first (ties by index)
    pub fn within(&self, shapes: &[Shape], point: Coord<f64>, radius: f64) -> Vec<Nearby> {
        let query = AABB::from_corners(
            [point.x - radius, point.y - radius],
            [point.x + radius, point.y + radius],
        );

        let mut found: Vec<Nearby> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter_map(|entry| {
                let distance_m = shapes.get(entry.index)?.distance_to(point);
                (distance_m <= radius).then_some(Nearby {
                    index: entry.index,
                    distance_m,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then(a.index.cmp(&b.index))
        });
        found
    }
}
