use crate::config::DEFAULT_WATER_CLASS;
use crate::types::{CoastlineCollection, CoastlineRecord, PolygonCollection, PolygonRecord};
use geo_types::LineString;

/// Turns water polygons into open coastline lines.
///
/// Each exterior ring becomes one line with the same vertices in the same
/// order, minus the duplicated closing vertex. Interior rings are not
/// coastline.
pub struct CoastlineExtractor {
    water_class: u8,
}

impl CoastlineExtractor {
    pub fn new() -> Self {
        Self {
            water_class: DEFAULT_WATER_CLASS,
        }
    }

    pub fn with_water_class(water_class: u8) -> Self {
        Self { water_class }
    }

    pub fn extract(&self, polygons: &PolygonCollection) -> CoastlineCollection {
        let water: Vec<&PolygonRecord> = polygons
            .records
            .iter()
            .filter(|record| record.class_id == self.water_class)
            .collect();
        let parts: usize = water.iter().map(|record| record.geometry.part_count()).sum();
        log::debug!(
            "{} of {} polygon(s) are class {}, {} part(s) in total",
            water.len(),
            polygons.len(),
            self.water_class,
            parts
        );

        let mut records = Vec::with_capacity(parts);
        records.extend(
            water
                .iter()
                .flat_map(|record| record.geometry.exteriors())
                .map(|ring| CoastlineRecord {
                    geometry: open_ring(ring),
                }),
        );

        log::info!(
            "Extracted {} coastline line(s) from {} polygon(s)",
            records.len(),
            polygons.len()
        );

        CoastlineCollection {
            records,
            crs: polygons.crs.clone(),
        }
    }
}

impl Default for CoastlineExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Coastline lines for every polygon labelled `water_class_id`
pub fn extract_lines(polygons: &PolygonCollection, water_class_id: u8) -> CoastlineCollection {
    CoastlineExtractor::with_water_class(water_class_id).extract(polygons)
}

fn open_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut coords = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    LineString::new(coords)
}
