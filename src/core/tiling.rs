use crate::types::{ClassMask, CoastResult, CoastlineError, InferenceFailure};
use ndarray::{s, Array2, Array3, ArrayView3, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-pixel classifier invoked once per tile.
///
/// Tiles are `tile_size x tile_size x channels`; the classifier must return a
/// `tile_size x tile_size` label array. Implementations are shared across
/// worker threads, hence `Sync`.
pub trait Classifier: Sync {
    fn classify(&self, tile: ArrayView3<'_, f32>) -> anyhow::Result<Array2<u8>>;

    /// Classify with the run's cancellation token and deadline in reach.
    ///
    /// Models that can stop part way through should override this and poll
    /// `context`. The default ignores it and calls `classify`.
    fn classify_with(&self, tile: ArrayView3<'_, f32>, context: &InferenceContext<'_>) -> anyhow::Result<Array2<u8>> {
        let _ = context;
        self.classify(tile)
    }
}

impl<F> Classifier for F
where
    F: Fn(ArrayView3<'_, f32>) -> anyhow::Result<Array2<u8>> + Sync,
{
    fn classify(&self, tile: ArrayView3<'_, f32>) -> anyhow::Result<Array2<u8>> {
        self(tile)
    }
}

/// Cooperative cancellation flag shared between a caller and a running inference
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation token and deadline handed to every classifier call
#[derive(Debug, Clone, Copy)]
pub struct InferenceContext<'a> {
    token: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl<'a> InferenceContext<'a> {
    pub fn new(token: &'a CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when the run has no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True once the run is cancelled or past its deadline
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }

    /// `Err` once the classifier should give up, for use with `?`
    pub fn check(&self) -> anyhow::Result<()> {
        if self.should_stop() {
            anyhow::bail!("inference interrupted");
        }
        Ok(())
    }
}

/// Tiled inference parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingParams {
    /// Edge length of the square tiles handed to the classifier
    pub tile_size: usize,
    /// Wall-clock budget for the whole run, in seconds
    pub timeout_secs: Option<f64>,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self {
            tile_size: 256,
            timeout_secs: None,
        }
    }
}

impl TilingParams {
    pub fn validate(&self) -> CoastResult<()> {
        if self.tile_size == 0 {
            return Err(CoastlineError::InvalidConfig(
                "tile size must be a positive integer".to_string(),
            ));
        }
        if let Some(secs) = self.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(CoastlineError::InvalidConfig(format!(
                    "timeout must be a positive number of seconds, got {}",
                    secs
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }
}

/// Summary of a finished inference run
#[derive(Debug, Clone)]
pub struct InferenceReport {
    pub tile_size: usize,
    pub tile_count: usize,
    pub elapsed: Duration,
}

/// Runs a classifier over a raster tile by tile and stitches the labels back together
pub struct TiledInferenceRunner {
    params: TilingParams,
    cancellation: CancellationToken,
}

impl TiledInferenceRunner {
    /// Create a runner with default parameters
    pub fn new() -> Self {
        Self {
            params: TilingParams::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_params(params: TilingParams) -> Self {
        Self {
            params,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach a caller-owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn params(&self) -> &TilingParams {
        &self.params
    }

    /// Classify `pixels` (row, col, channel) into a full-resolution mask
    pub fn run<C: Classifier + ?Sized>(&self, classifier: &C, pixels: ArrayView3<'_, f32>) -> CoastResult<ClassMask> {
        self.run_with_report(classifier, pixels).map(|(mask, _)| mask)
    }

    pub fn run_with_report<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        pixels: ArrayView3<'_, f32>,
    ) -> CoastResult<(ClassMask, InferenceReport)> {
        self.params.validate()?;

        let tile_size = self.params.tile_size;
        let (height, width, channels) = pixels.dim();
        if height == 0 || width == 0 || channels == 0 {
            return Err(CoastlineError::InvalidShape(format!(
                "cannot tile an array of shape {}x{}x{}",
                height, width, channels
            )));
        }

        let started = Instant::now();
        let mut mask = ClassMask::zeros((height, width));
        let tiles = split_into_tiles(mask.view_mut(), tile_size);
        let tile_count = tiles.len();

        log::info!(
            "Running tiled inference: {}x{}x{} in {} tile(s) of {}x{}",
            height, width, channels, tile_count, tile_size, tile_size
        );

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            tiles
                .into_par_iter()
                .try_for_each(|(row, col, out)| self.infer_tile(classifier, &pixels, row, col, out, started))?;
        }

        #[cfg(not(feature = "parallel"))]
        {
            for (row, col, out) in tiles {
                self.infer_tile(classifier, &pixels, row, col, out, started)?;
            }
        }

        let report = InferenceReport {
            tile_size,
            tile_count,
            elapsed: started.elapsed(),
        };
        log::info!("Tiled inference completed in {:?}", report.elapsed);

        Ok((mask, report))
    }

    /// Classify one tile and write its cropped labels into `out`
    fn infer_tile<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        pixels: &ArrayView3<'_, f32>,
        row: usize,
        col: usize,
        mut out: ArrayViewMut2<'_, u8>,
        started: Instant,
    ) -> CoastResult<()> {
        let fail = |failure: InferenceFailure| CoastlineError::Inference {
            row_offset: row,
            col_offset: col,
            failure,
        };

        self.check_budget(started).map_err(fail)?;

        let tile_size = self.params.tile_size;
        let (patch_h, patch_w) = out.dim();
        let channels = pixels.dim().2;

        // Zero padding only ever covers positions past the real patch
        let mut padded = Array3::<f32>::zeros((tile_size, tile_size, channels));
        padded
            .slice_mut(s![..patch_h, ..patch_w, ..])
            .assign(&pixels.slice(s![row..row + patch_h, col..col + patch_w, ..]));

        log::debug!("Classifying tile at ({}, {}), patch {}x{}", row, col, patch_h, patch_w);

        let deadline = self.params.timeout().map(|limit| started + limit);
        let context = InferenceContext::new(&self.cancellation, deadline);
        let result = classifier.classify_with(padded.view(), &context);

        // A stop requested during the call outranks what the classifier returned
        self.check_budget(started).map_err(fail)?;

        let labels = result.map_err(|e| fail(InferenceFailure::Classifier(e)))?;
        if labels.dim() != (tile_size, tile_size) {
            return Err(fail(InferenceFailure::MalformedOutput {
                expected: (tile_size, tile_size),
                actual: labels.dim(),
            }));
        }

        out.assign(&labels.slice(s![..patch_h, ..patch_w]));
        Ok(())
    }

    fn check_budget(&self, started: Instant) -> Result<(), InferenceFailure> {
        if self.cancellation.is_cancelled() {
            return Err(InferenceFailure::Cancelled);
        }
        if let Some(limit) = self.params.timeout() {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                return Err(InferenceFailure::TimedOut { elapsed, limit });
            }
        }
        Ok(())
    }
}

impl Default for TiledInferenceRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a classifier over `pixels` with the given tile size
pub fn run_tiled_inference<C: Classifier + ?Sized>(
    classifier: &C,
    pixels: ArrayView3<'_, f32>,
    tile_size: usize,
) -> CoastResult<ClassMask> {
    let params = TilingParams {
        tile_size,
        ..TilingParams::default()
    };
    TiledInferenceRunner::with_params(params).run(classifier, pixels)
}

/// Split the output mask into disjoint, exclusively owned tile views in row-major order
fn split_into_tiles(mask: ArrayViewMut2<'_, u8>, tile_size: usize) -> Vec<(usize, usize, ArrayViewMut2<'_, u8>)> {
    let mut tiles = Vec::new();
    let mut remaining_rows = mask;
    let mut row = 0;

    while remaining_rows.nrows() > 0 {
        let take = tile_size.min(remaining_rows.nrows());
        let (band, rest) = remaining_rows.split_at(Axis(0), take);
        remaining_rows = rest;

        let mut remaining_cols = band;
        let mut col = 0;
        while remaining_cols.ncols() > 0 {
            let take = tile_size.min(remaining_cols.ncols());
            let (tile, rest) = remaining_cols.split_at(Axis(1), take);
            remaining_cols = rest;
            tiles.push((row, col, tile));
            col += take;
        }

        row += take;
    }

    tiles
}
