use crate::types::{BandRole, CoastResult, CoastlineError, NormalizedImage, RasterBuffer};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Guard added to the stretch denominator so constant bands stay finite
const STRETCH_EPSILON: f32 = 1e-6;

/// Replacement for a zero NDWI denominator
const NDWI_EPSILON: f32 = 1e-8;

/// ITU-R BT.601 luma weights
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Number of bands in the canonical Sentinel-2 layout
pub const CANONICAL_BAND_COUNT: usize = 13;

/// Canonical Sentinel-2 band order: B1..B8, B8A, B9..B12
pub const SENTINEL2_BANDS: [&str; CANONICAL_BAND_COUNT] = [
    "B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B9", "B10", "B11", "B12",
];

/// Canonical index of the green band (B3)
pub const GREEN_BAND_INDEX: usize = 2;

/// Canonical index of the near-infrared band (B8)
pub const NIR_BAND_INDEX: usize = 7;

/// True-color stretch parameters for optical (UAV) imagery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalParams {
    pub gamma: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl Default for OpticalParams {
    fn default() -> Self {
        Self {
            gamma: 1.0,        // identity
            brightness: 0.0,   // no offset
            contrast: 0.0,     // no change around the mean
            saturation: 1.68,
        }
    }
}

/// Water index parameters for multispectral imagery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterIndexParams {
    /// Normalized index values below this are floored to 0.0
    pub threshold: f32,
}

impl Default for WaterIndexParams {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl WaterIndexParams {
    pub fn validate(&self) -> CoastResult<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CoastlineError::InvalidConfig(format!(
                "water index threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Radiometric normalization variants
#[derive(Debug, Clone)]
pub enum Normalization {
    Optical(OpticalParams),
    WaterIndex(WaterIndexParams),
}

impl Normalization {
    /// Pick the variant from the band count of the source image.
    ///
    /// 3 or 4 bands are treated as true-color optical imagery, anything wider
    /// as multispectral.
    pub fn for_band_count(
        band_count: usize,
        optical: &OpticalParams,
        water_index: &WaterIndexParams,
    ) -> CoastResult<Self> {
        match band_count {
            3 | 4 => Ok(Normalization::Optical(optical.clone())),
            n if n > 4 => Ok(Normalization::WaterIndex(water_index.clone())),
            n => {
                let missing = OPTICAL_ROLES[n.min(OPTICAL_ROLES.len() - 1)];
                Err(CoastlineError::MissingBand {
                    role: missing,
                    available: n,
                    required: n + 1,
                })
            }
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Normalization::Optical(_) => 3,
            Normalization::WaterIndex(_) => 1,
        }
    }

    /// Normalize a raster into a (row, col, channel) array ready for tiling
    pub fn normalize(&self, raster: &RasterBuffer) -> CoastResult<NormalizedImage> {
        match self {
            Normalization::Optical(params) => true_color_stretch(raster, params),
            Normalization::WaterIndex(params) => {
                let index = water_index(raster, params)?;
                Ok(index.insert_axis(Axis(2)))
            }
        }
    }
}

const OPTICAL_ROLES: [BandRole; 3] = [BandRole::Red, BandRole::Green, BandRole::Blue];

/// Stretch bands 1-3 to [0, 1] and boost saturation
pub fn true_color_stretch(raster: &RasterBuffer, params: &OpticalParams) -> CoastResult<NormalizedImage> {
    log::info!("Applying true-color stretch");
    log::debug!("Optical parameters: {:?}", params);

    let (height, width) = (raster.height(), raster.width());
    let mut image = Array3::<f32>::zeros((height, width, 3));

    for (channel, role) in OPTICAL_ROLES.iter().enumerate() {
        let band = raster.band(channel).ok_or(CoastlineError::MissingBand {
            role: *role,
            available: raster.band_count(),
            required: channel + 1,
        })?;

        let (min, max) = band_extrema(&band);
        let range = max - min + STRETCH_EPSILON;
        log::debug!("Band {} ({}) range: [{}, {}]", channel + 1, role, min, max);

        Zip::from(image.index_axis_mut(Axis(2), channel))
            .and(&band)
            .for_each(|out, &value| {
                let stretched = ((value - min) / range).clamp(0.0, 1.0);
                *out = stretched.powf(params.gamma);
            });
    }

    image.mapv_inplace(|v| (v + params.brightness).clamp(0.0, 1.0));

    // Contrast around the per-channel image mean
    for mut channel in image.axis_iter_mut(Axis(2)) {
        let mean = channel.mean().unwrap_or(0.0);
        channel.mapv_inplace(|v| ((v - mean) * (1.0 + params.contrast) + mean).clamp(0.0, 1.0));
    }

    for mut pixel in image.lanes_mut(Axis(2)) {
        let luma = pixel[0] * LUMA_WEIGHTS[0] + pixel[1] * LUMA_WEIGHTS[1] + pixel[2] * LUMA_WEIGHTS[2];
        pixel.mapv_inplace(|v| (luma + (v - luma) * params.saturation).clamp(0.0, 1.0));
    }

    Ok(image)
}

/// Min and max over the finite values of a band; (0, 0) if none are finite
fn band_extrema(band: &ArrayView2<f32>) -> (f32, f32) {
    let (min, max) = band
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

/// View of a raster in the fixed 13-band Sentinel-2 layout.
///
/// Source band `i` fills canonical slot `i`; slots beyond the source band
/// count read as zero and bands past the 13th are ignored.
pub struct CanonicalBands<'a> {
    slots: Vec<Option<ArrayView2<'a, f32>>>,
    available: usize,
}

impl<'a> CanonicalBands<'a> {
    pub fn from_raster(raster: &'a RasterBuffer) -> Self {
        let slots = (0..CANONICAL_BAND_COUNT).map(|i| raster.band(i)).collect();
        if raster.band_count() > CANONICAL_BAND_COUNT {
            log::debug!(
                "Ignoring {} band(s) beyond the canonical {}",
                raster.band_count() - CANONICAL_BAND_COUNT,
                CANONICAL_BAND_COUNT
            );
        }
        Self {
            slots,
            available: raster.band_count(),
        }
    }

    /// Whether canonical slot `index` holds real data rather than zero fill
    pub fn is_present(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Band for a role that must not be zero-filled
    pub fn required(&self, index: usize, role: BandRole) -> CoastResult<ArrayView2<'a, f32>> {
        match self.slots.get(index) {
            Some(Some(view)) => Ok(view.clone()),
            _ => Err(CoastlineError::MissingBand {
                role,
                available: self.available,
                required: index + 1,
            }),
        }
    }
}

/// Normalized difference water index of a multispectral raster, in [0, 1]
pub fn water_index(raster: &RasterBuffer, params: &WaterIndexParams) -> CoastResult<Array2<f32>> {
    log::info!("Computing water index (threshold {})", params.threshold);

    let bands = CanonicalBands::from_raster(raster);
    let zero_filled: Vec<&str> = (0..CANONICAL_BAND_COUNT)
        .filter(|&i| !bands.is_present(i))
        .map(|i| SENTINEL2_BANDS[i])
        .collect();
    if !zero_filled.is_empty() {
        log::debug!("Zero-filled canonical bands: {:?}", zero_filled);
    }
    log::debug!(
        "Using {} as green and {} as near-infrared",
        SENTINEL2_BANDS[GREEN_BAND_INDEX],
        SENTINEL2_BANDS[NIR_BAND_INDEX]
    );

    let green = bands.required(GREEN_BAND_INDEX, BandRole::Green)?;
    let nir = bands.required(NIR_BAND_INDEX, BandRole::NearInfrared)?;

    Ok(compute_ndwi(&green, &nir, params.threshold))
}

/// NDWI rescaled to [0, 1] with a soft pre-threshold.
///
/// Values below `threshold` become 0.0; the rest keep their magnitude.
pub fn compute_ndwi(green: &ArrayView2<f32>, nir: &ArrayView2<f32>, threshold: f32) -> Array2<f32> {
    Zip::from(green).and(nir).map_collect(|&g, &n| {
        let denominator = g + n;
        let denominator = if denominator == 0.0 { NDWI_EPSILON } else { denominator };

        let index = (g - n) / denominator;
        let index = if index.is_nan() {
            0.0
        } else if index == f32::INFINITY {
            1.0
        } else if index == f32::NEG_INFINITY {
            -1.0
        } else {
            index
        };

        let normalized = (index + 1.0) / 2.0;
        if normalized < threshold {
            0.0
        } else {
            normalized
        }
    })
}
