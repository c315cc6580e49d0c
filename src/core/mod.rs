//! Processing stages

pub mod normalize;
pub mod tiling;
pub mod morphology;
pub mod vectorize;
pub mod coastline;
pub mod pipeline;

// Re-export main types
pub use normalize::{Normalization, OpticalParams, WaterIndexParams, CanonicalBands};
pub use tiling::{TiledInferenceRunner, TilingParams, Classifier, CancellationToken, InferenceContext, InferenceReport, run_tiled_inference};
pub use morphology::{MaskRefiner, MorphologyParams, MaskStats};
pub use vectorize::{Vectorizer, polygonize};
pub use coastline::{CoastlineExtractor, extract_lines};
pub use pipeline::{CoastlinePipeline, PipelineOutput, RunArtifacts, StageTimings, run_to_dir};
