//! Pipeline configuration
//!
//! Every stage owns its parameter struct; `PipelineConfig` gathers them so a
//! whole run can be described by one JSON document. Missing fields fall back
//! to their defaults.

use crate::core::morphology::MorphologyParams;
use crate::core::normalize::{OpticalParams, WaterIndexParams};
use crate::core::tiling::TilingParams;
use crate::types::{CoastResult, CoastlineError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Label the classifier assigns to water pixels
pub const DEFAULT_WATER_CLASS: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tiling: TilingParams,
    pub optical: OpticalParams,
    pub water_index: WaterIndexParams,
    pub morphology: MorphologyParams,
    pub water_class_id: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiling: TilingParams::default(),
            optical: OpticalParams::default(),
            water_index: WaterIndexParams::default(),
            morphology: MorphologyParams::default(),
            water_class_id: DEFAULT_WATER_CLASS,
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> CoastResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CoastResult<Self> {
        log::info!("Loading pipeline configuration from: {}", path.as_ref().display());
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Reject values the stages cannot work with
    pub fn validate(&self) -> CoastResult<()> {
        self.tiling.validate()?;
        self.morphology.validate()?;
        self.water_index.validate()?;

        if !self.optical.saturation.is_finite() || !self.optical.gamma.is_finite() || self.optical.gamma <= 0.0 {
            return Err(CoastlineError::InvalidConfig(format!(
                "optical gamma must be positive and saturation finite, got gamma={} saturation={}",
                self.optical.gamma, self.optical.saturation
            )));
        }

        Ok(())
    }
}
