//! GDAL adapters for rasters and vector layers

pub mod raster;
pub mod vector;

pub use raster::{RasterIo, read_raster, write_mask, write_raster};
pub use vector::{VectorIo, write_polygons, write_coastline};
