use crate::types::{ClassMask, CoastResult, CoastlineError, GeoTransform, RasterBuffer};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array3;
use std::path::Path;

/// GDAL-backed raster reader and mask writer
pub struct RasterIo;

impl RasterIo {
    /// Read every band as f32 together with the geotransform and CRS
    pub fn read<P: AsRef<Path>>(path: P) -> CoastResult<RasterBuffer> {
        log::info!("Reading raster from: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count() as usize;
        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let crs = dataset.projection();

        log::debug!("Raster size: {}x{}, {} band(s)", width, height, band_count);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let mut data = Vec::with_capacity(band_count * width * height);
        for index in 1..=band_count {
            let rasterband = dataset.rasterband(index as isize)?;
            let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            data.extend(band_data.data);
        }

        let data = Array3::from_shape_vec((band_count, height, width), data)
            .map_err(|e| CoastlineError::InvalidShape(format!("Failed to reshape raster data: {}", e)))?;

        RasterBuffer::new(data, geo_transform, crs)
    }

    /// Write a class mask as a single-band u8 GeoTIFF with LZW compression
    pub fn write_mask<P: AsRef<Path>>(
        mask: &ClassMask,
        geo_transform: &GeoTransform,
        crs: &str,
        path: P,
    ) -> CoastResult<()> {
        log::info!("Saving segmentation mask as GeoTIFF: {}", path.as_ref().display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = mask.dim();

        let options = [RasterCreationOption {
            key: "COMPRESS",
            value: "LZW",
        }];
        let mut dataset = driver.create_with_band_type_with_options::<u8, _>(
            path.as_ref(),
            width as isize,
            height as isize,
            1,
            &options,
        )?;

        dataset.set_geo_transform(&geo_transform.to_gdal())?;
        if !crs.is_empty() {
            dataset.set_spatial_ref(&SpatialRef::from_definition(crs)?)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<u8> = mask.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        log::debug!("Mask written: {}x{}", width, height);
        Ok(())
    }
}

/// Open a raster file as a `RasterBuffer`
pub fn read_raster<P: AsRef<Path>>(path: P) -> CoastResult<RasterBuffer> {
    RasterIo::read(path)
}

/// Export a class mask with the source georeferencing
pub fn write_mask<P: AsRef<Path>>(mask: &ClassMask, geo_transform: &GeoTransform, crs: &str, path: P) -> CoastResult<()> {
    RasterIo::write_mask(mask, geo_transform, crs, path)
}

/// Write a raster as a multi-band f32 GeoTIFF with its georeferencing,
/// one band per leading-axis slice
pub fn write_raster<P: AsRef<Path>>(raster: &RasterBuffer, path: P) -> CoastResult<()> {
    log::info!("Saving raster as GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (width, height) = (raster.width(), raster.height());

    let mut dataset = driver.create_with_band_type::<f32, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        raster.band_count() as isize,
    )?;
    dataset.set_geo_transform(&raster.geo_transform().to_gdal())?;
    if !raster.crs().is_empty() {
        dataset.set_spatial_ref(&SpatialRef::from_definition(raster.crs())?)?;
    }

    for (index, band) in raster.data().outer_iter().enumerate() {
        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        let buffer = Buffer::new((width, height), band.iter().copied().collect::<Vec<f32>>());
        rasterband.write((0, 0), (width, height), &buffer)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::s;
    use tempfile::tempdir;

    fn utm_transform() -> GeoTransform {
        GeoTransform::from_gdal([399_960.0, 10.0, 0.0, 9_200_020.0, 0.0, -10.0])
    }

    #[test]
    fn test_mask_roundtrip_keeps_labels_and_georeferencing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.tif");

        let mut mask = ClassMask::zeros((20, 30));
        mask.slice_mut(s![5..15, 10..25]).fill(1);

        write_mask(&mask, &utm_transform(), "EPSG:32748", &path).unwrap();

        let read = read_raster(&path).unwrap();
        assert_eq!(read.band_count(), 1);
        assert_eq!((read.height(), read.width()), (20, 30));
        assert_eq!(read.geo_transform(), &utm_transform());
        assert!(read.crs().contains("32748") || read.crs().contains("UTM"));

        let band = read.band(0).unwrap();
        assert_eq!(band.iter().filter(|&&v| v == 1.0).count(), 150);
        assert_eq!(band[[5, 10]], 1.0);
        assert_eq!(band[[4, 10]], 0.0);
    }

    #[test]
    fn test_multiband_read_preserves_band_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.tif");

        let data = Array3::from_shape_fn((3, 8, 6), |(b, r, c)| (b * 100 + r * 10 + c) as f32 + 0.25);
        let raster = RasterBuffer::new(data.clone(), utm_transform(), "").unwrap();
        write_raster(&raster, &path).unwrap();

        let read = read_raster(&path).unwrap();
        assert_eq!(read.band_count(), 3);
        assert_relative_eq!(read.data()[[2, 7, 5]], 275.25);
        assert_relative_eq!(read.data()[[1, 0, 3]], 103.25);
        assert_eq!(read.data(), &data);
    }

    #[test]
    fn test_write_raster_keeps_georeferencing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scene.tif");

        let raster = RasterBuffer::new(Array3::from_elem((2, 5, 4), -1.5_f32), utm_transform(), "EPSG:32748").unwrap();
        write_raster(&raster, &path).unwrap();

        let read = read_raster(&path).unwrap();
        assert_eq!((read.band_count(), read.height(), read.width()), (2, 5, 4));
        assert_eq!(read.geo_transform(), &utm_transform());
        assert!(read.crs().contains("32748") || read.crs().contains("UTM"));
        assert!(read.data().iter().all(|&v| v == -1.5));
    }

    #[test]
    fn test_missing_file_is_gdal_error() {
        let dir = tempdir().unwrap();
        let result = read_raster(dir.path().join("absent.tif"));
        assert!(matches!(result, Err(CoastlineError::Gdal(_))));
    }
}
