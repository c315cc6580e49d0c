//! End-to-end coastline extraction
//!
//! normalize -> tiled inference -> smoothing -> polygonize -> coastline.
//! `run` works on in-memory rasters; `run_to_dir` adds GDAL input and the
//! mask/shapefile exports.

use crate::config::PipelineConfig;
use crate::core::coastline::CoastlineExtractor;
use crate::core::morphology::{MaskRefiner, MaskStats};
use crate::core::normalize::Normalization;
use crate::core::tiling::{CancellationToken, Classifier, InferenceReport, TiledInferenceRunner};
use crate::core::vectorize::Vectorizer;
use crate::io::{raster, vector};
use crate::types::{
    ClassMask, CoastResult, CoastlineCollection, CoastlineError, EmptyResultWarning, PipelineFailure, PolygonCollection, RasterBuffer,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Wall-clock time spent in each stage
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    pub normalize: Duration,
    pub inference: Duration,
    pub refine: Duration,
    pub vectorize: Duration,
    pub extract: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.normalize + self.inference + self.refine + self.vectorize + self.extract
    }
}

/// Everything a pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub raw_mask: ClassMask,
    pub refined_mask: ClassMask,
    pub polygons: PolygonCollection,
    pub coastline: CoastlineCollection,
    /// Empty-result conditions; not errors
    pub warnings: Vec<EmptyResultWarning>,
    pub inference: InferenceReport,
    pub timings: StageTimings,
}

/// Files written by `run_to_dir`
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub mask_path: PathBuf,
    pub polygons_path: PathBuf,
    pub coastline_path: PathBuf,
    pub output: PipelineOutput,
}

/// Output of the raster stages, before vectorization
struct Segmentation {
    raw_mask: ClassMask,
    refined_mask: ClassMask,
    inference: InferenceReport,
    timings: StageTimings,
}

/// Coastline extraction pipeline
pub struct CoastlinePipeline {
    config: PipelineConfig,
    cancellation: CancellationToken,
}

impl CoastlinePipeline {
    /// Create a pipeline with default configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Cancelling `token` aborts inference at the next tile boundary, or inside
    /// a classifier call that polls its `InferenceContext`
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage on an in-memory raster
    pub fn run<C: Classifier + ?Sized>(&self, raster: &RasterBuffer, classifier: &C) -> CoastResult<PipelineOutput> {
        let segmentation = self.segment(raster, classifier)?;
        self.vectorize(raster, segmentation)
    }

    /// Read `input`, run the pipeline and write the mask and shapefiles into `output_dir`.
    ///
    /// The mask is exported before vectorization; if a later stage fails the
    /// returned `PipelineFailure` still points at it.
    pub fn run_to_dir<C, P, Q>(&self, input: P, output_dir: Q, classifier: &C) -> Result<RunArtifacts, PipelineFailure>
    where
        C: Classifier + ?Sized,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let input = input.as_ref();
        let output_dir = output_dir.as_ref();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());

        log::info!("Processing {} into {}", input.display(), output_dir.display());

        let raster = raster::read_raster(input)?;
        let segmentation = self.segment(&raster, classifier)?;

        std::fs::create_dir_all(output_dir).map_err(CoastlineError::from)?;
        let mask_path = output_dir.join(format!("{}_segmentation.tif", stem));
        raster::write_mask(
            &segmentation.refined_mask,
            raster.geo_transform(),
            raster.crs(),
            &mask_path,
        )?;

        let with_mask = |error: CoastlineError| PipelineFailure {
            error,
            mask_path: Some(mask_path.clone()),
        };

        let output = self.vectorize(&raster, segmentation).map_err(with_mask)?;

        let polygons_path = output_dir.join(format!("{}_polygons.shp", stem));
        let coastline_path = output_dir.join(format!("{}_coastline.shp", stem));
        vector::write_polygons(&output.polygons, &polygons_path).map_err(with_mask)?;
        vector::write_coastline(&output.coastline, &coastline_path).map_err(with_mask)?;

        log::info!("Outputs written to {}", output_dir.display());

        Ok(RunArtifacts {
            mask_path,
            polygons_path,
            coastline_path,
            output,
        })
    }

    fn segment<C: Classifier + ?Sized>(&self, raster: &RasterBuffer, classifier: &C) -> CoastResult<Segmentation> {
        self.config.validate()?;
        let mut timings = StageTimings::default();

        log::info!(
            "Starting coastline extraction on {}x{} raster with {} band(s)",
            raster.height(),
            raster.width(),
            raster.band_count()
        );

        let started = Instant::now();
        let normalization =
            Normalization::for_band_count(raster.band_count(), &self.config.optical, &self.config.water_index)?;
        log::debug!("Normalization: {:?} ({} channel(s))", normalization, normalization.channels());
        let normalized = normalization.normalize(raster)?;
        timings.normalize = started.elapsed();

        let started = Instant::now();
        let runner = TiledInferenceRunner::with_params(self.config.tiling.clone())
            .with_cancellation(self.cancellation.clone());
        let (raw_mask, inference) = runner.run_with_report(classifier, normalized.view())?;
        timings.inference = started.elapsed();
        log_mask_stats("raw", &raw_mask, self.config.water_class_id);

        let started = Instant::now();
        let refined_mask = MaskRefiner::with_params(self.config.morphology.clone()).smooth(&raw_mask)?;
        timings.refine = started.elapsed();
        log_mask_stats("refined", &refined_mask, self.config.water_class_id);

        Ok(Segmentation {
            raw_mask,
            refined_mask,
            inference,
            timings,
        })
    }

    fn vectorize(&self, raster: &RasterBuffer, segmentation: Segmentation) -> CoastResult<PipelineOutput> {
        let Segmentation {
            raw_mask,
            refined_mask,
            inference,
            mut timings,
        } = segmentation;
        let water_class = self.config.water_class_id;

        let started = Instant::now();
        let polygons =
            Vectorizer::with_water_class(water_class).polygonize(&refined_mask, raster.geo_transform(), raster.crs())?;
        timings.vectorize = started.elapsed();

        let started = Instant::now();
        let coastline = CoastlineExtractor::with_water_class(water_class).extract(&polygons);
        timings.extract = started.elapsed();

        let mut warnings = Vec::new();
        if polygons.is_empty() {
            warnings.push(EmptyResultWarning::NoPolygons);
        }
        if coastline.is_empty() {
            warnings.push(EmptyResultWarning::NoCoastline);
        }
        for warning in &warnings {
            log::warn!("{}", warning);
        }

        log::info!(
            "Coastline extraction finished in {:?}: {} polygon(s), {} line(s)",
            timings.total(),
            polygons.len(),
            coastline.len()
        );

        Ok(PipelineOutput {
            raw_mask,
            refined_mask,
            polygons,
            coastline,
            warnings,
            inference,
            timings,
        })
    }
}

impl Default for CoastlinePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the default pipeline from a raster file into `output_dir`
pub fn run_to_dir<C, P, Q>(input: P, output_dir: Q, classifier: &C) -> Result<RunArtifacts, PipelineFailure>
where
    C: Classifier + ?Sized,
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    CoastlinePipeline::new().run_to_dir(input, output_dir, classifier)
}

fn log_mask_stats(label: &str, mask: &ClassMask, water_class: u8) {
    let stats = MaskStats::from_mask(mask, water_class);
    log::info!(
        "{} mask: {} of {} pixels water ({:.2}%)",
        label,
        stats.water_pixels,
        stats.total_pixels,
        stats.water_fraction * 100.0
    );
    log::debug!("{} mask class counts: {:?}", label, stats.class_counts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tiling::TilingParams;
    use crate::types::{GeoTransform, InferenceFailure};
    use ndarray::{Array2, Array3, ArrayView3};

    /// Water wherever the first channel is bright
    fn brightness_classifier(tile: ArrayView3<'_, f32>) -> anyhow::Result<Array2<u8>> {
        Ok(tile.index_axis(ndarray::Axis(2), 0).mapv(|v| u8::from(v > 0.5)))
    }

    fn failing_classifier(_tile: ArrayView3<'_, f32>) -> anyhow::Result<Array2<u8>> {
        anyhow::bail!("model unavailable")
    }

    fn square_scene(size: usize, start: usize, end: usize) -> RasterBuffer {
        let data = Array3::from_shape_fn((3, size, size), |(_, r, c)| {
            if (start..end).contains(&r) && (start..end).contains(&c) {
                200.0
            } else {
                10.0
            }
        });
        RasterBuffer::new(data, GeoTransform::identity(), "EPSG:32748").unwrap()
    }

    #[test]
    fn test_square_scene_yields_one_coastline() {
        let raster = square_scene(64, 20, 40);
        let output = CoastlinePipeline::new().run(&raster, &brightness_classifier).unwrap();

        assert_eq!(output.raw_mask.iter().filter(|&&v| v == 1).count(), 400);
        assert_eq!(output.refined_mask, output.raw_mask);
        assert_eq!(output.polygons.len(), 1);
        assert_eq!(output.coastline.len(), 1);
        assert_eq!(output.coastline.records[0].geometry.0.len(), 4);
        assert_eq!(output.coastline.crs, "EPSG:32748");
        assert!(output.warnings.is_empty());
        assert_eq!(output.inference.tile_count, 1);
    }

    #[test]
    fn test_all_land_reports_warnings() {
        let raster = square_scene(32, 0, 0);
        let output = CoastlinePipeline::new().run(&raster, &brightness_classifier).unwrap();

        assert!(output.polygons.is_empty());
        assert!(output.coastline.is_empty());
        assert_eq!(
            output.warnings,
            vec![EmptyResultWarning::NoPolygons, EmptyResultWarning::NoCoastline]
        );
    }

    #[test]
    fn test_too_few_bands_fails_before_inference() {
        let raster = RasterBuffer::new(Array3::zeros((2, 8, 8)), GeoTransform::identity(), "").unwrap();
        let result = CoastlinePipeline::new().run(&raster, &failing_classifier);
        assert!(matches!(result, Err(CoastlineError::MissingBand { .. })));
    }

    #[test]
    fn test_classifier_failure_propagates() {
        let raster = square_scene(16, 4, 8);
        let result = CoastlinePipeline::new().run(&raster, &failing_classifier);

        match result {
            Err(CoastlineError::Inference {
                row_offset: 0,
                col_offset: 0,
                failure: InferenceFailure::Classifier(e),
            }) => assert!(e.to_string().contains("model unavailable")),
            other => panic!("unexpected result: {:?}", other.map(|o| o.polygons.len())),
        }
    }

    #[test]
    fn test_cancelled_run() {
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = CoastlinePipeline::new().with_cancellation(token);

        let result = pipeline.run(&square_scene(16, 4, 8), &brightness_classifier);
        assert!(matches!(
            result,
            Err(CoastlineError::Inference {
                failure: InferenceFailure::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.tiling = TilingParams {
            tile_size: 0,
            timeout_secs: None,
        };
        let result = CoastlinePipeline::with_config(config).run(&square_scene(8, 2, 4), &brightness_classifier);
        assert!(matches!(result, Err(CoastlineError::InvalidConfig(_))));
    }
}
