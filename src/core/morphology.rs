use crate::types::{ClassMask, CoastResult, CoastlineError};
use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis};
use num_traits::Bounded;
use serde::{Deserialize, Serialize};

/// Morphological smoothing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphologyParams {
    /// Side of the square structuring element (must be odd)
    pub kernel_size: usize,
    /// Repeats of each erosion/dilation within opening and closing
    pub iterations: usize,
}

impl Default for MorphologyParams {
    fn default() -> Self {
        Self {
            kernel_size: 7,  // 7x7 square
            iterations: 1,
        }
    }
}

impl MorphologyParams {
    pub fn validate(&self) -> CoastResult<()> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(CoastlineError::InvalidConfig(format!(
                "kernel size must be a positive odd integer, got {}",
                self.kernel_size
            )));
        }
        if self.iterations == 0 {
            return Err(CoastlineError::InvalidConfig(
                "iteration count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which extremum a morphological pass keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Min,
    Max,
}

/// Mask cleanup by opening followed by closing
pub struct MaskRefiner {
    params: MorphologyParams,
}

impl MaskRefiner {
    /// Create a refiner with default parameters
    pub fn new() -> Self {
        Self {
            params: MorphologyParams::default(),
        }
    }

    pub fn with_params(params: MorphologyParams) -> Self {
        Self { params }
    }

    /// Opening removes speckle and thin protrusions, closing then fills small
    /// holes and bridges narrow gaps
    pub fn smooth(&self, mask: &ClassMask) -> CoastResult<ClassMask> {
        self.params.validate()?;

        let (height, width) = mask.dim();
        log::info!(
            "Smoothing {}x{} mask with {}x{} kernel, {} iteration(s)",
            height, width, self.params.kernel_size, self.params.kernel_size, self.params.iterations
        );

        let opened = self.opening(mask);
        let closed = self.closing(&opened);

        log::debug!(
            "Smoothing changed {} pixel(s)",
            mask.iter().zip(closed.iter()).filter(|(a, b)| a != b).count()
        );
        Ok(closed)
    }

    /// Erosion then dilation, each repeated `iterations` times
    pub fn opening<T>(&self, mask: &Array2<T>) -> Array2<T>
    where
        T: Copy + Ord + Bounded,
    {
        let eroded = self.repeat(mask, Extremum::Min);
        self.repeat(&eroded, Extremum::Max)
    }

    /// Dilation then erosion, each repeated `iterations` times
    pub fn closing<T>(&self, mask: &Array2<T>) -> Array2<T>
    where
        T: Copy + Ord + Bounded,
    {
        let dilated = self.repeat(mask, Extremum::Max);
        self.repeat(&dilated, Extremum::Min)
    }

    fn repeat<T>(&self, mask: &Array2<T>, extremum: Extremum) -> Array2<T>
    where
        T: Copy + Ord + Bounded,
    {
        let mut result = mask.clone();
        for _ in 0..self.params.iterations {
            result = rank_filter(&result, self.params.kernel_size, extremum);
        }
        result
    }
}

impl Default for MaskRefiner {
    fn default() -> Self {
        Self::new()
    }
}

/// Opening then closing with a `kernel_size` square, `iterations` repeats each
pub fn smooth(mask: &ClassMask, kernel_size: usize, iterations: usize) -> CoastResult<ClassMask> {
    MaskRefiner::with_params(MorphologyParams { kernel_size, iterations }).smooth(mask)
}

/// Grey-level erosion: window minimum, window clipped at the border
pub fn erode<T>(mask: &Array2<T>, kernel_size: usize) -> Array2<T>
where
    T: Copy + Ord + Bounded,
{
    rank_filter(mask, kernel_size, Extremum::Min)
}

/// Grey-level dilation: window maximum, window clipped at the border
pub fn dilate<T>(mask: &Array2<T>, kernel_size: usize) -> Array2<T>
where
    T: Copy + Ord + Bounded,
{
    rank_filter(mask, kernel_size, Extremum::Max)
}

/// Square min/max filter, applied as a row pass then a column pass
fn rank_filter<T>(mask: &Array2<T>, kernel_size: usize, extremum: Extremum) -> Array2<T>
where
    T: Copy + Ord + Bounded,
{
    let half_window = kernel_size / 2;
    if half_window == 0 {
        return mask.clone();
    }

    let mut horizontal = mask.clone();
    for (src, dst) in mask.axis_iter(Axis(0)).zip(horizontal.axis_iter_mut(Axis(0))) {
        filter_line(src, dst, half_window, extremum);
    }

    let mut result = horizontal.clone();
    for (src, dst) in horizontal.axis_iter(Axis(1)).zip(result.axis_iter_mut(Axis(1))) {
        filter_line(src, dst, half_window, extremum);
    }

    result
}

fn filter_line<T>(src: ArrayView1<T>, mut dst: ArrayViewMut1<T>, half_window: usize, extremum: Extremum)
where
    T: Copy + Ord + Bounded,
{
    let len = src.len();
    for i in 0..len {
        let start = i.saturating_sub(half_window);
        let end = (i + half_window + 1).min(len);
        let window = src.slice(ndarray::s![start..end]);

        dst[i] = match extremum {
            Extremum::Min => window.iter().fold(T::max_value(), |acc, &v| acc.min(v)),
            Extremum::Max => window.iter().fold(T::min_value(), |acc, &v| acc.max(v)),
        };
    }
}

/// Per-class pixel counts of a mask
#[derive(Debug, Clone, PartialEq)]
pub struct MaskStats {
    pub total_pixels: usize,
    pub water_pixels: usize,
    pub water_fraction: f64,
    /// (label, count) for every label present, ascending by label
    pub class_counts: Vec<(u8, usize)>,
}

impl MaskStats {
    pub fn from_mask(mask: &ClassMask, water_class: u8) -> Self {
        let mut counts = [0usize; 256];
        for &label in mask.iter() {
            counts[label as usize] += 1;
        }

        let total_pixels = mask.len();
        let water_pixels = counts[water_class as usize];
        let water_fraction = if total_pixels > 0 {
            water_pixels as f64 / total_pixels as f64
        } else {
            0.0
        };

        let class_counts = counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(label, &count)| (label as u8, count))
            .collect();

        Self {
            total_pixels,
            water_pixels,
            water_fraction,
            class_counts,
        }
    }
}
