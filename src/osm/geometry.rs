//! Feature shapes and planar distance.

use geo::{
    BoundingRect, Centroid, Contains, Coord, Distance, Euclidean, LineString, MapCoords, MultiPolygon,
    Point, Polygon, Rect,
};

/// Geometry of a candidate feature. Coordinates are lon/lat before
/// projection and meters after.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coord<f64>),
    Line(LineString<f64>),
    Area(MultiPolygon<f64>),
}

impl Shape {
    /// Shape for an ordered list of way coordinates: closed rings become
    /// areas, anything else with two or more points a line.
    pub fn from_way(coords: Vec<Coord<f64>>) -> Option<Self> {
        if coords.len() >= 4 && coords.first() == coords.last() {
            return Some(Shape::Area(MultiPolygon::new(vec![Polygon::new(
                LineString::new(coords),
                vec![],
            )])));
        }
        if coords.len() >= 2 {
            return Some(Shape::Line(LineString::new(coords)));
        }
        coords.first().map(|c| Shape::Point(*c))
    }

    pub fn map_coords<F>(&self, f: F) -> Self
    where
        F: Fn(Coord<f64>) -> Coord<f64> + Copy,
    {
        match self {
            Shape::Point(c) => Shape::Point(f(*c)),
            Shape::Line(line) => Shape::Line(line.map_coords(f)),
            Shape::Area(area) => Shape::Area(area.map_coords(f)),
        }
    }

    /// A point representing the shape (its centroid)
    pub fn representative(&self) -> Option<Coord<f64>> {
        match self {
            Shape::Point(c) => Some(*c),
            Shape::Line(line) => line.centroid().map(|p| p.0),
            Shape::Area(area) => area.centroid().map(|p| p.0),
        }
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        match self {
            Shape::Point(c) => Some(Rect::new(*c, *c)),
            Shape::Line(line) => line.bounding_rect(),
            Shape::Area(area) => area.bounding_rect(),
        }
    }

    /// Planar distance from `p`; zero inside an area
    pub fn distance_to(&self, p: Coord<f64>) -> f64 {
        match self {
            Shape::Point(c) => (c.x - p.x).hypot(c.y - p.y),
            Shape::Line(line) => line_distance(line, p),
            Shape::Area(area) => {
                if area.contains(&Point::from(p)) {
                    return 0.0;
                }
                area.iter()
                    .flat_map(|poly| std::iter::once(poly.exterior()).chain(poly.interiors()))
                    .map(|ring| line_distance(ring, p))
                    .fold(f64::INFINITY, f64::min)
            }
        }
    }
}

fn line_distance(line: &LineString<f64>, p: Coord<f64>) -> f64 {
    match line.0.as_slice() {
        [] => f64::INFINITY,
        [only] => (only.x - p.x).hypot(only.y - p.y),
        _ => Euclidean.distance(&Point::from(p), line),
    }
}

/// Where a segment attaches to the ring being grown
struct Attachment {
    index: usize,
    reversed: bool,
    append: bool,
}

fn find_attachment(ring: &[Coord<f64>], open: &[Vec<Coord<f64>>]) -> Option<Attachment> {
    let (start, end) = (*ring.first()?, *ring.last()?);
    open.iter().enumerate().find_map(|(index, seg)| {
        let (a, b) = (*seg.first()?, *seg.last()?);
        let (reversed, append) = if end == a {
            (false, true)
        } else if end == b {
            (true, true)
        } else if start == b {
            (false, false)
        } else if start == a {
            (true, false)
        } else {
            return None;
        };
        Some(Attachment {
            index,
            reversed,
            append,
        })
    })
}

/// Join member way segments end-to-end into closed polygons.
///
/// Chains that cannot be closed by other segments are closed directly when
/// they have at least three points; shorter leftovers are dropped.
pub fn assemble_rings(mut open: Vec<Vec<Coord<f64>>>) -> Vec<Polygon<f64>> {
    open.retain(|seg| !seg.is_empty());
    let mut polygons = Vec::new();

    while let Some(mut ring) = open.pop() {
        while ring.first() != ring.last() {
            let Some(at) = find_attachment(&ring, &open) else {
                break;
            };
            let mut seg = open.swap_remove(at.index);
            if at.reversed {
                seg.reverse();
            }
            if at.append {
                ring.extend(seg.into_iter().skip(1));
            } else {
                seg.pop();
                seg.extend(ring);
                ring = seg;
            }
        }

        if ring.len() >= 3 && ring.first() != ring.last() {
            ring.push(ring[0]);
        }
        if ring.len() >= 4 {
            polygons.push(Polygon::new(LineString::new(ring), vec![]));
        }
    }

    polygons
}
