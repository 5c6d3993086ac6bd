use serde::{Deserialize, Serialize};

use crate::types::{EviError, EviResult, Observation, TimeWindow, ValidObservation};

/// Quality masking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMaskParams {
    /// Highest (worst) quality code still accepted, inclusive
    pub max_allowed_quality: u8,
    /// Worst code the quality scale can express
    pub worst_quality_code: u8,
    /// Multiplier from integer encoding to physical units
    pub scale_factor: f64,
}

impl Default for QualityMaskParams {
    fn default() -> Self {
        Self {
            max_allowed_quality: 1,  // MOD13Q1 SummaryQA: good + marginal
            worst_quality_code: 3,   // 3 = cloudy
            scale_factor: 0.0001,
        }
    }
}

impl QualityMaskParams {
    pub fn validate(&self) -> EviResult<()> {
        if self.max_allowed_quality > self.worst_quality_code {
            return Err(EviError::InvalidConfiguration(format!(
                "quality threshold {} outside 0..={}",
                self.max_allowed_quality, self.worst_quality_code
            )));
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(EviError::InvalidConfiguration(format!(
                "scale factor must be finite and positive, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Filters a pixel's observations by quality flag and rescales the survivors
#[derive(Debug, Clone)]
pub struct QualityMasker {
    params: QualityMaskParams,
}

impl QualityMasker {
    /// Create a quality masker, rejecting an out-of-range threshold or scale
    pub fn new(params: QualityMaskParams) -> EviResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Create masker with the MOD13Q1 defaults (QA < 2, scale 0.0001)
    pub fn standard() -> Self {
        Self { params: QualityMaskParams::default() }
    }

    /// Get current parameters
    pub fn params(&self) -> &QualityMaskParams {
        &self.params
    }

    pub fn accepts(&self, obs: &Observation) -> bool {
        obs.quality <= self.params.max_allowed_quality
    }

    /// Subsequence of observations passing the quality threshold, in input order
    pub fn filter(&self, observations: &[Observation]) -> Vec<Observation> {
        observations.iter().filter(|o| self.accepts(o)).copied().collect()
    }

    /// Filter and convert raw values to physical units
    pub fn apply(&self, observations: &[Observation]) -> Vec<ValidObservation> {
        observations
            .iter()
            .filter(|o| self.accepts(o))
            .map(|o| self.scale(o))
            .collect()
    }

    /// Like [`apply`](Self::apply), additionally dropping observations outside `window`
    pub fn apply_window(&self, observations: &[Observation], window: Option<&TimeWindow>) -> Vec<ValidObservation> {
        observations
            .iter()
            .filter(|o| window.map_or(true, |w| w.contains(&o.timestamp)))
            .filter(|o| self.accepts(o))
            .map(|o| self.scale(o))
            .collect()
    }

    fn scale(&self, obs: &Observation) -> ValidObservation {
        ValidObservation {
            timestamp: obs.timestamp,
            value: obs.raw_value as f64 * self.params.scale_factor,
        }
    }
}
