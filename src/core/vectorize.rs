//! Raster-to-polygon vectorization
//!
//! Water pixels are grouped into 4-connected regions in row-major scan order.
//! Each region's boundary is walked on the pixel-corner lattice, where vertex
//! (col, row) is the top-left corner of pixel (row, col), and only the
//! vertices where the walk changes direction are kept. Rings are then mapped
//! through the raster's affine transform.
//!
//! A walk that passes the same vertex twice is split there. The loop pinched
//! off between the two visits encloses background that touches the rest of
//! the boundary at a single corner, and becomes a hole.
//!
//! Boundary edges run with the region on their right in pixel space (y down),
//! so for a north-up raster exteriors come out clockwise and holes
//! counter-clockwise in map coordinates.

use crate::config::DEFAULT_WATER_CLASS;
use crate::types::{
    ClassMask, CoastResult, CoastlineError, GeoTransform, PolygonCollection, PolygonGeometry, PolygonRecord,
};
use geo_types::{Coord, LineString, Polygon};
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Lattice vertex as (row, col)
type Vertex = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    East,
    South,
    West,
    North,
}

impl Direction {
    fn turn_right(self) -> Self {
        match self {
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
            Direction::North => Direction::East,
        }
    }

    fn turn_left(self) -> Self {
        match self {
            Direction::East => Direction::North,
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
        }
    }

    fn step(self, (row, col): Vertex) -> Vertex {
        match self {
            Direction::East => (row, col + 1),
            Direction::South => (row + 1, col),
            Direction::West => (row, col - 1),
            Direction::North => (row - 1, col),
        }
    }
}

/// Unvisited boundary edges of one region, keyed by start vertex in row-major order
struct BoundaryEdges {
    outgoing: BTreeMap<Vertex, Vec<Direction>>,
}

impl BoundaryEdges {
    fn for_region(labels: &Array2<u32>, region: u32, pixels: &[(usize, usize)]) -> Self {
        let (height, width) = labels.dim();
        let inside = |row: usize, col: usize| row < height && col < width && labels[[row, col]] == region;

        let mut outgoing: BTreeMap<Vertex, Vec<Direction>> = BTreeMap::new();
        let mut add = |vertex: Vertex, direction: Direction| outgoing.entry(vertex).or_default().push(direction);

        for &(row, col) in pixels {
            if row == 0 || !inside(row - 1, col) {
                add((row, col), Direction::East);
            }
            if !inside(row, col + 1) {
                add((row, col + 1), Direction::South);
            }
            if !inside(row + 1, col) {
                add((row + 1, col + 1), Direction::West);
            }
            if col == 0 || !inside(row, col - 1) {
                add((row + 1, col), Direction::North);
            }
        }

        Self { outgoing }
    }

    fn first(&self) -> Option<(Vertex, Direction)> {
        self.outgoing
            .iter()
            .next()
            .and_then(|(&vertex, directions)| directions.first().map(|&d| (vertex, d)))
    }

    /// Next edge out of `vertex` when arriving with `heading`.
    ///
    /// Right turns win, so at a corner shared by two diagonal pixels the walk
    /// stays on its own pixel and diagonal contacts never merge.
    fn choose(&self, vertex: Vertex, heading: Direction) -> Option<Direction> {
        let available = self.outgoing.get(&vertex)?;
        [heading.turn_right(), heading, heading.turn_left()]
            .into_iter()
            .find(|candidate| available.contains(candidate))
    }

    fn take(&mut self, vertex: Vertex, direction: Direction) {
        if let Some(directions) = self.outgoing.get_mut(&vertex) {
            directions.retain(|&d| d != direction);
            if directions.is_empty() {
                self.outgoing.remove(&vertex);
            }
        }
    }

    /// Walk one closed boundary starting with the given edge, returning every
    /// vertex passed without repeating `start` at the end
    fn trace_ring(&mut self, start: Vertex, first: Direction) -> Vec<Vertex> {
        let mut walk = vec![start];
        let mut heading = first;
        let mut current = first.step(start);

        loop {
            let next = match self.choose(current, heading) {
                Some(direction) => direction,
                None => {
                    log::warn!("Open boundary at lattice vertex {:?}, closing ring early", current);
                    break;
                }
            };
            if current == start && next == first {
                break;
            }

            self.take(current, next);
            walk.push(current);
            heading = next;
            current = next.step(current);
        }

        self.take(start, first);
        walk
    }
}

/// Split a boundary walk at every vertex it passes twice.
///
/// The first ring is what is left of the walk around `walk[0]`, the pinched
/// loops follow in the order they closed.
fn split_pinches(walk: Vec<Vertex>) -> Vec<Vec<Vertex>> {
    let mut stack: Vec<Vertex> = Vec::with_capacity(walk.len());
    let mut position: HashMap<Vertex, usize> = HashMap::new();
    let mut pinched = Vec::new();

    for vertex in walk {
        if let Some(&index) = position.get(&vertex) {
            log::debug!("Boundary pinches at lattice vertex {:?}, splitting off a ring", vertex);
            let ring: Vec<Vertex> = stack.drain(index..).collect();
            for passed in &ring[1..] {
                position.remove(passed);
            }
            pinched.push(ring);
        }
        position.insert(vertex, stack.len());
        stack.push(vertex);
    }

    let mut rings = vec![stack];
    rings.extend(pinched);
    rings
}

/// Drop the vertices of a closed lattice ring where the walk goes straight on
fn corners(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    if n < 3 {
        return ring.to_vec();
    }

    let delta = |from: Vertex, to: Vertex| (to.0 as isize - from.0 as isize, to.1 as isize - from.1 as isize);
    (0..n)
        .filter(|&i| {
            let previous = ring[(i + n - 1) % n];
            let next = ring[(i + 1) % n];
            delta(previous, ring[i]) != delta(ring[i], next)
        })
        .map(|i| ring[i])
        .collect()
}

/// Converts class masks into georeferenced polygons
pub struct Vectorizer {
    water_class: u8,
}

impl Vectorizer {
    pub fn new() -> Self {
        Self {
            water_class: DEFAULT_WATER_CLASS,
        }
    }

    pub fn with_water_class(water_class: u8) -> Self {
        Self { water_class }
    }

    /// Trace every 4-connected region of the water class into a polygon
    pub fn polygonize(&self, mask: &ClassMask, transform: &GeoTransform, crs: &str) -> CoastResult<PolygonCollection> {
        let (height, width) = mask.dim();
        if height == 0 || width == 0 {
            return Err(CoastlineError::InvalidShape(format!(
                "cannot polygonize a {}x{} mask",
                height, width
            )));
        }

        log::info!("Polygonizing {}x{} mask (class {})", height, width, self.water_class);

        let (labels, regions) = label_regions(mask, self.water_class);
        log::debug!("Found {} connected region(s)", regions.len());

        let trace = |(index, pixels): (usize, &Vec<(usize, usize)>)| {
            let polygon = trace_region(&labels, index as u32 + 1, pixels, transform);
            PolygonRecord {
                geometry: PolygonGeometry::Single(polygon),
                class_id: self.water_class,
            }
        };

        #[cfg(feature = "parallel")]
        let records: Vec<PolygonRecord> = {
            use rayon::prelude::*;
            regions.par_iter().enumerate().map(trace).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let records: Vec<PolygonRecord> = regions.iter().enumerate().map(trace).collect();

        if records.is_empty() {
            log::debug!("No pixels of class {} found, polygon collection is empty", self.water_class);
        } else {
            log::info!("Polygonization produced {} polygon(s)", records.len());
        }

        Ok(PolygonCollection {
            records,
            crs: crs.to_string(),
        })
    }
}

impl Default for Vectorizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Polygonize the default water class
pub fn polygonize(mask: &ClassMask, transform: &GeoTransform, crs: &str) -> CoastResult<PolygonCollection> {
    Vectorizer::new().polygonize(mask, transform, crs)
}

/// Label 4-connected regions of `class`, numbering them from 1 in row-major order
fn label_regions(mask: &ClassMask, class: u8) -> (Array2<u32>, Vec<Vec<(usize, usize)>>) {
    let (height, width) = mask.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();

    for row in 0..height {
        for col in 0..width {
            if mask[[row, col]] != class || labels[[row, col]] != 0 {
                continue;
            }

            let region = regions.len() as u32 + 1;
            let mut pixels = Vec::new();
            labels[[row, col]] = region;
            queue.push_back((row, col));

            while let Some((r, c)) = queue.pop_front() {
                pixels.push((r, c));

                let mut visit = |nr: usize, nc: usize| {
                    if mask[[nr, nc]] == class && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = region;
                        queue.push_back((nr, nc));
                    }
                };
                if r > 0 {
                    visit(r - 1, c);
                }
                if r + 1 < height {
                    visit(r + 1, c);
                }
                if c > 0 {
                    visit(r, c - 1);
                }
                if c + 1 < width {
                    visit(r, c + 1);
                }
            }

            regions.push(pixels);
        }
    }

    (labels, regions)
}

/// Exterior ring first, holes after, all in map coordinates
fn trace_region(labels: &Array2<u32>, region: u32, pixels: &[(usize, usize)], transform: &GeoTransform) -> Polygon<f64> {
    let mut edges = BoundaryEdges::for_region(labels, region, pixels);
    let mut rings = Vec::new();

    // The smallest remaining vertex always lies on the outer boundary first
    while let Some((start, direction)) = edges.first() {
        let walk = edges.trace_ring(start, direction);
        for ring in split_pinches(walk) {
            rings.push(to_line_string(&corners(&ring), transform));
        }
    }

    let mut rings = rings.into_iter();
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Polygon::new(exterior, rings.collect())
}

fn to_line_string(ring: &[Vertex], transform: &GeoTransform) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = ring
        .iter()
        .map(|&(row, col)| {
            let (x, y) = transform.apply(col as f64, row as f64);
            Coord { x, y }
        })
        .collect();

    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    LineString::new(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn coords(line: &LineString<f64>) -> Vec<(f64, f64)> {
        line.coords().map(|c| (c.x, c.y)).collect()
    }

    fn single(record: &PolygonRecord) -> &Polygon<f64> {
        match &record.geometry {
            PolygonGeometry::Single(polygon) => polygon,
            other => panic!("expected a single polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_rectangle_has_four_corners() {
        let mut mask = ClassMask::zeros((8, 10));
        mask.slice_mut(s![2..5, 3..7]).fill(1);

        let polygons = polygonize(&mask, &GeoTransform::identity(), "EPSG:32748").unwrap();

        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons.crs, "EPSG:32748");
        assert_eq!(polygons.records[0].class_id, 1);

        let polygon = single(&polygons.records[0]);
        assert_eq!(
            coords(polygon.exterior()),
            vec![(3.0, 2.0), (7.0, 2.0), (7.0, 5.0), (3.0, 5.0), (3.0, 2.0)]
        );
        assert!(polygon.interiors().is_empty());
    }

    #[test]
    fn test_vertices_follow_geotransform() {
        let mut mask = ClassMask::zeros((4, 4));
        mask[[1, 2]] = 1;
        let transform = GeoTransform::from_gdal([500_000.0, 10.0, 0.0, 9_000_000.0, 0.0, -10.0]);

        let polygons = polygonize(&mask, &transform, "EPSG:32748").unwrap();
        let polygon = single(&polygons.records[0]);

        assert_eq!(
            coords(polygon.exterior()),
            vec![
                (500_020.0, 8_999_990.0),
                (500_030.0, 8_999_990.0),
                (500_030.0, 8_999_980.0),
                (500_020.0, 8_999_980.0),
                (500_020.0, 8_999_990.0),
            ]
        );
    }

    #[test]
    fn test_empty_mask_yields_no_polygons() {
        let mask = ClassMask::zeros((16, 16));
        let polygons = polygonize(&mask, &GeoTransform::identity(), "EPSG:4326").unwrap();
        assert!(polygons.is_empty());
        assert_eq!(polygons.crs, "EPSG:4326");
    }

    #[test]
    fn test_background_class_is_not_emitted() {
        let mut mask = ClassMask::zeros((6, 6));
        mask.slice_mut(s![0..3, ..]).fill(1);
        mask.slice_mut(s![4..6, 0..2]).fill(2);

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();

        assert_eq!(polygons.len(), 1);
        assert!(polygons.records.iter().all(|r| r.class_id == 1));
    }

    #[test]
    fn test_diagonal_pixels_are_separate_regions() {
        let mut mask = ClassMask::zeros((4, 4));
        mask[[1, 1]] = 1;
        mask[[2, 2]] = 1;

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();

        assert_eq!(polygons.len(), 2);
        assert_eq!(coords(single(&polygons.records[0]).exterior())[0], (1.0, 1.0));
        assert_eq!(coords(single(&polygons.records[1]).exterior())[0], (2.0, 2.0));
    }

    #[test]
    fn test_emission_order_is_row_major() {
        let mut mask = ClassMask::zeros((10, 10));
        mask.slice_mut(s![6..8, 0..2]).fill(1);
        mask.slice_mut(s![1..3, 7..9]).fill(1);
        mask.slice_mut(s![1..2, 2..4]).fill(1);

        let first = polygonize(&mask, &GeoTransform::identity(), "").unwrap();
        let second = polygonize(&mask, &GeoTransform::identity(), "").unwrap();

        let starts: Vec<(f64, f64)> = first
            .records
            .iter()
            .map(|r| coords(single(r).exterior())[0])
            .collect();
        assert_eq!(starts, vec![(2.0, 1.0), (7.0, 1.0), (0.0, 6.0)]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_region_with_hole() {
        let mut mask = ClassMask::zeros((7, 7));
        mask.slice_mut(s![1..6, 1..6]).fill(1);
        mask[[3, 3]] = 0;

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();
        let polygon = single(&polygons.records[0]);

        assert_eq!(polygon.exterior().0.len(), 5);
        assert_eq!(polygon.interiors().len(), 1);
        assert_eq!(
            coords(&polygon.interiors()[0]),
            vec![(3.0, 3.0), (3.0, 4.0), (4.0, 4.0), (4.0, 3.0), (3.0, 3.0)]
        );
    }

    #[test]
    fn test_l_shape_keeps_only_corners() {
        let mut mask = ClassMask::zeros((6, 6));
        mask.slice_mut(s![1..5, 1..3]).fill(1);
        mask.slice_mut(s![3..5, 3..5]).fill(1);

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();
        let exterior = coords(single(&polygons.records[0]).exterior());

        assert_eq!(
            exterior,
            vec![(1.0, 1.0), (3.0, 1.0), (3.0, 3.0), (5.0, 3.0), (5.0, 5.0), (1.0, 5.0), (1.0, 1.0)]
        );
    }

    fn assert_simple(ring: &[(f64, f64)]) {
        let open = &ring[..ring.len() - 1];
        for (i, point) in open.iter().enumerate() {
            assert!(!open[i + 1..].contains(point), "ring passes {:?} twice: {:?}", point, ring);
        }
    }

    #[test]
    fn test_diagonal_pocket_becomes_hole() {
        // Background at (2, 2) meets the outside only at the corner shared with (3, 3)
        let mut mask = ClassMask::zeros((5, 5));
        mask.slice_mut(s![1..4, 1..4]).fill(1);
        mask[[2, 2]] = 0;
        mask[[3, 3]] = 0;

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();
        assert_eq!(polygons.len(), 1);

        let polygon = single(&polygons.records[0]);
        let exterior = coords(polygon.exterior());
        assert_simple(&exterior);
        assert_eq!(
            exterior,
            vec![(1.0, 1.0), (4.0, 1.0), (4.0, 3.0), (3.0, 3.0), (3.0, 4.0), (1.0, 4.0), (1.0, 1.0)]
        );

        assert_eq!(polygon.interiors().len(), 1);
        assert_eq!(
            coords(&polygon.interiors()[0]),
            vec![(3.0, 3.0), (3.0, 2.0), (2.0, 2.0), (2.0, 3.0), (3.0, 3.0)]
        );
    }

    #[test]
    fn test_frame_with_open_corner_keeps_lagoon_as_hole() {
        // Water frame around a 3x3 lagoon whose corner meets the gap at (1, 5)
        let mut mask = ClassMask::zeros((7, 7));
        mask.slice_mut(s![1..6, 1..6]).fill(1);
        mask.slice_mut(s![2..5, 2..5]).fill(0);
        mask[[1, 5]] = 0;

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();
        let polygon = single(&polygons.records[0]);

        let exterior = coords(polygon.exterior());
        assert_simple(&exterior);
        assert_eq!(
            exterior,
            vec![(1.0, 1.0), (5.0, 1.0), (5.0, 2.0), (6.0, 2.0), (6.0, 6.0), (1.0, 6.0), (1.0, 1.0)]
        );

        assert_eq!(polygon.interiors().len(), 1);
        assert_eq!(
            coords(&polygon.interiors()[0]),
            vec![(5.0, 2.0), (2.0, 2.0), (2.0, 5.0), (5.0, 5.0), (5.0, 2.0)]
        );
    }

    #[test]
    fn test_diagonal_holes_are_separate() {
        let mut mask = ClassMask::zeros((7, 7));
        mask.slice_mut(s![1..6, 1..6]).fill(1);
        mask[[2, 2]] = 0;
        mask[[3, 3]] = 0;

        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();
        let polygon = single(&polygons.records[0]);

        assert_eq!(polygon.exterior().0.len(), 5);
        let holes: Vec<Vec<(f64, f64)>> = polygon.interiors().iter().map(coords).collect();
        assert_eq!(
            holes,
            vec![
                vec![(2.0, 2.0), (2.0, 3.0), (3.0, 3.0), (3.0, 2.0), (2.0, 2.0)],
                vec![(3.0, 3.0), (3.0, 4.0), (4.0, 4.0), (4.0, 3.0), (3.0, 3.0)],
            ]
        );
    }

    #[test]
    fn test_split_pinches_returns_outer_walk_first() {
        let walk = vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 2), (2, 1), (1, 1), (1, 0)];
        let rings = split_pinches(walk);

        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0], vec![(0, 0), (0, 1), (1, 1), (1, 0)]);
        assert_eq!(rings[1], vec![(1, 1), (1, 2), (2, 2), (2, 1)]);
    }

    #[test]
    fn test_touching_image_border() {
        let mask = ClassMask::from_elem((3, 4), 1);
        let polygons = polygonize(&mask, &GeoTransform::identity(), "").unwrap();

        assert_eq!(
            coords(single(&polygons.records[0]).exterior()),
            vec![(0.0, 0.0), (4.0, 0.0), (4.0, 3.0), (0.0, 3.0), (0.0, 0.0)]
        );
    }

    #[test]
    fn test_custom_water_class() {
        let mut mask = ClassMask::zeros((4, 4));
        mask[[0, 0]] = 1;
        mask[[3, 3]] = 2;

        let polygons = Vectorizer::with_water_class(2)
            .polygonize(&mask, &GeoTransform::identity(), "")
            .unwrap();

        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons.records[0].class_id, 2);
    }
}
