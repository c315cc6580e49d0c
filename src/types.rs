use geo_types::{LineString, MultiPolygon, Polygon};
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Per-pixel class labels (0 = land/background, 1 = water)
pub type ClassMask = Array2<u8>;

/// Normalized pixel data in (row, col, channel) order, values in [0, 1]
pub type NormalizedImage = Array3<f32>;

/// Affine transformation parameters in GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build from the 6 coefficients GDAL reports for a dataset
    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Pixel-space identity: (col, row) maps to (x, y) unchanged
    pub fn identity() -> Self {
        Self::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// Map a pixel-lattice coordinate (col, row) to (x, y)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Immutable multi-band raster with its georeferencing.
///
/// Pixel data is stored band-major, (band, row, col). The CRS is kept as the
/// string the reader reported (usually WKT) and is never interpreted.
#[derive(Debug, Clone)]
pub struct RasterBuffer {
    data: Array3<f32>,
    geo_transform: GeoTransform,
    crs: String,
}

impl RasterBuffer {
    pub fn new(data: Array3<f32>, geo_transform: GeoTransform, crs: impl Into<String>) -> CoastResult<Self> {
        let (bands, height, width) = data.dim();
        if bands == 0 {
            return Err(CoastlineError::InvalidShape(
                "raster must have at least one band".to_string(),
            ));
        }
        if height == 0 || width == 0 {
            return Err(CoastlineError::InvalidShape(format!(
                "raster dimensions must be positive, got {}x{}",
                height, width
            )));
        }

        Ok(Self {
            data,
            geo_transform,
            crs: crs.into(),
        })
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Zero-based band view
    pub fn band(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        if index < self.band_count() {
            Some(self.data.index_axis(ndarray::Axis(0), index))
        } else {
            None
        }
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.geo_transform
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }
}

/// Geometry of a polygon record
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonGeometry {
    Single(Polygon<f64>),
    Multi(MultiPolygon<f64>),
}

impl PolygonGeometry {
    /// Exterior rings of every part, in part order
    pub fn exteriors(&self) -> Vec<&LineString<f64>> {
        match self {
            PolygonGeometry::Single(polygon) => vec![polygon.exterior()],
            PolygonGeometry::Multi(multi) => multi.0.iter().map(|p| p.exterior()).collect(),
        }
    }

    pub fn part_count(&self) -> usize {
        match self {
            PolygonGeometry::Single(_) => 1,
            PolygonGeometry::Multi(multi) => multi.0.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
    pub geometry: PolygonGeometry,
    pub class_id: u8,
}

/// Polygon records sharing one CRS
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonCollection {
    pub records: Vec<PolygonRecord>,
    pub crs: String,
}

impl PolygonCollection {
    pub fn empty(crs: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            crs: crs.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One open coastline line, derived from exactly one exterior ring
#[derive(Debug, Clone, PartialEq)]
pub struct CoastlineRecord {
    pub geometry: LineString<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoastlineCollection {
    pub records: Vec<CoastlineRecord>,
    pub crs: String,
}

impl CoastlineCollection {
    pub fn empty(crs: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            crs: crs.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Spectral role a normalization variant needs from the source raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandRole {
    Red,
    Green,
    Blue,
    NearInfrared,
}

impl fmt::Display for BandRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandRole::Red => write!(f, "red"),
            BandRole::Green => write!(f, "green"),
            BandRole::Blue => write!(f, "blue"),
            BandRole::NearInfrared => write!(f, "near-infrared"),
        }
    }
}

/// Why a tile failed during inference
#[derive(Debug, thiserror::Error)]
pub enum InferenceFailure {
    #[error("classifier failed: {0:#}")]
    Classifier(anyhow::Error),

    #[error("classifier returned labels of shape {actual:?}, expected {expected:?}")]
    MalformedOutput {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("inference exceeded its {limit:?} deadline after {elapsed:?}")]
    TimedOut { elapsed: Duration, limit: Duration },

    #[error("inference was cancelled")]
    Cancelled,
}

/// Error types for coastline extraction
#[derive(Debug, thiserror::Error)]
pub enum CoastlineError {
    #[error("Missing {role} band: source has {available} band(s), needs band {required}")]
    MissingBand {
        role: BandRole,
        available: usize,
        required: usize,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Inference failed on tile at row {row_offset}, col {col_offset}: {failure}")]
    Inference {
        row_offset: usize,
        col_offset: usize,
        #[source]
        failure: InferenceFailure,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for coastline operations
pub type CoastResult<T> = Result<T, CoastlineError>;

/// Valid terminal states where nothing was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyResultWarning {
    NoPolygons,
    NoCoastline,
}

impl fmt::Display for EmptyResultWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyResultWarning::NoPolygons => write!(f, "no water polygons detected"),
            EmptyResultWarning::NoCoastline => write!(f, "no coastline detected"),
        }
    }
}

/// A pipeline failure together with artifacts already written to disk
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PipelineFailure {
    #[source]
    pub error: CoastlineError,
    pub mask_path: Option<PathBuf>,
}

impl From<CoastlineError> for PipelineFailure {
    fn from(error: CoastlineError) -> Self {
        Self {
            error,
            mask_path: None,
        }
    }
}
