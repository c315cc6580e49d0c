use crate::types::{CoastResult, CoastlineCollection, PolygonCollection, PolygonGeometry};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, Geometry, LayerAccess, ToGdal};
use gdal::{Dataset, DriverManager, LayerOptions};
use gdal_sys::{OGRFieldType, OGRwkbGeometryType};
use std::path::Path;

/// Attribute carrying the polygon class label
pub const CLASS_FIELD: &str = "class_id";

const SHAPEFILE_SIDECARS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

/// ESRI Shapefile writer for polygon and coastline collections
pub struct VectorIo;

impl VectorIo {
    /// Write polygons with their `class_id` attribute
    pub fn write_polygons<P: AsRef<Path>>(polygons: &PolygonCollection, path: P) -> CoastResult<()> {
        log::info!(
            "Saving {} polygon(s) as Shapefile: {}",
            polygons.len(),
            path.as_ref().display()
        );

        let mut dataset = create_shapefile(path.as_ref())?;
        let srs = spatial_ref(&polygons.crs)?;
        let layer_name = layer_name(path.as_ref());
        let mut layer = dataset.create_layer(LayerOptions {
            name: &layer_name,
            srs: srs.as_ref(),
            ty: OGRwkbGeometryType::wkbPolygon,
            ..Default::default()
        })?;
        layer.create_defn_fields(&[(CLASS_FIELD, OGRFieldType::OFTInteger)])?;

        for record in &polygons.records {
            let geometry: Geometry = match &record.geometry {
                PolygonGeometry::Single(polygon) => polygon.to_gdal()?,
                PolygonGeometry::Multi(multi) => multi.to_gdal()?,
            };
            layer.create_feature_fields(
                geometry,
                &[CLASS_FIELD],
                &[FieldValue::IntegerValue(i32::from(record.class_id))],
            )?;
        }

        Ok(())
    }

    /// Write coastline lines, one feature per line
    pub fn write_coastline<P: AsRef<Path>>(coastline: &CoastlineCollection, path: P) -> CoastResult<()> {
        log::info!(
            "Saving {} coastline line(s) as Shapefile: {}",
            coastline.len(),
            path.as_ref().display()
        );

        let mut dataset = create_shapefile(path.as_ref())?;
        let srs = spatial_ref(&coastline.crs)?;
        let layer_name = layer_name(path.as_ref());
        let mut layer = dataset.create_layer(LayerOptions {
            name: &layer_name,
            srs: srs.as_ref(),
            ty: OGRwkbGeometryType::wkbLineString,
            ..Default::default()
        })?;

        for record in &coastline.records {
            layer.create_feature(record.geometry.to_gdal()?)?;
        }

        Ok(())
    }
}

pub fn write_polygons<P: AsRef<Path>>(polygons: &PolygonCollection, path: P) -> CoastResult<()> {
    VectorIo::write_polygons(polygons, path)
}

pub fn write_coastline<P: AsRef<Path>>(coastline: &CoastlineCollection, path: P) -> CoastResult<()> {
    VectorIo::write_coastline(coastline, path)
}

/// The Shapefile driver refuses to overwrite, so stale sidecar files go first
fn create_shapefile(path: &Path) -> CoastResult<Dataset> {
    for extension in SHAPEFILE_SIDECARS {
        let sidecar = path.with_extension(extension);
        if sidecar.exists() {
            log::debug!("Removing existing {}", sidecar.display());
            std::fs::remove_file(&sidecar)?;
        }
    }

    let driver = DriverManager::get_driver_by_name("ESRI Shapefile")?;
    Ok(driver.create_vector_only(path)?)
}

fn spatial_ref(crs: &str) -> CoastResult<Option<SpatialRef>> {
    if crs.is_empty() {
        log::warn!("No CRS on collection, writing layer without a spatial reference");
        return Ok(None);
    }
    Ok(Some(SpatialRef::from_definition(crs)?))
}

fn layer_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "layer".to_string())
}
