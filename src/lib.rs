//! coastline: water segmentation to coastline vectors
//!
//! Turns a georeferenced multi-band image into a class mask with an injected
//! per-tile classifier, cleans the mask morphologically, traces water regions
//! into polygons and emits their exterior rings as open coastline lines.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    ClassMask, NormalizedImage, GeoTransform, RasterBuffer, PolygonGeometry, PolygonRecord,
    PolygonCollection, CoastlineRecord, CoastlineCollection, BandRole, CoastlineError,
    CoastResult, InferenceFailure, EmptyResultWarning, PipelineFailure,
};

pub use config::PipelineConfig;

pub use crate::core::{
    CancellationToken, Classifier, CoastlineExtractor, CoastlinePipeline, InferenceContext, MaskRefiner, Normalization,
    PipelineOutput, RunArtifacts, TiledInferenceRunner, Vectorizer,
};

pub use io::{RasterIo, VectorIo};
