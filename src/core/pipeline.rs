//! End-to-end batch pipeline over a materialised observation stack.
//!
//! Trend branch: time window, quality mask, per-pixel fit, land-cover filter.
//! Uncertainty branch: time window, quality mask, yearly means, distribution
//! summary, seeded sampling. Each stage is a pure function of its inputs, so
//! running the same configuration twice yields identical outputs.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::batch::{CancelFlag, StageStats};
use super::distribution::{DistributionParams, DistributionSummarizer};
use super::interpolation::{InterpolationGrid, InterpolationParams, SpatialInterpolator};
use super::landcover::{LandCoverFilter, LandCoverParams};
use super::quality_mask::{QualityMaskParams, QualityMasker};
use super::sampler::{SampleSet, SamplingParams, SpatialSampler, TrendLayer};
use super::trend::{TrendEstimator, TrendParams};
use super::yearly::{YearlyAggregator, YearlyParams, YearlyRaster};
use crate::io::manifest::ColorScale;
use crate::types::{
    DistributionRaster, EviError, EviResult, LandCoverMap, TimeSeriesStack, TimeWindow, TrendRaster,
};

/// Complete pipeline configuration. Every section has the defaults of the
/// reference analysis, so `{}` is a valid configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub time_window: Option<TimeWindow>,
    pub quality: QualityMaskParams,
    pub trend: TrendParams,
    pub land_cover: LandCoverParams,
    pub yearly: YearlyParams,
    pub distribution: DistributionParams,
    pub sampling: SamplingParams,
    pub interpolation: InterpolationParams,
    /// Render colour scales keyed by layer name
    pub color_scales: BTreeMap<String, ColorScale>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            time_window: None,
            quality: QualityMaskParams::default(),
            trend: TrendParams::default(),
            land_cover: LandCoverParams::default(),
            yearly: YearlyParams::default(),
            distribution: DistributionParams::default(),
            sampling: SamplingParams::default(),
            interpolation: InterpolationParams::default(),
            color_scales: ColorScale::defaults(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> EviResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EviResult<Self> {
        log::info!("Loading pipeline configuration from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> EviResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Check every section; the first problem found is reported
    pub fn validate(&self) -> EviResult<()> {
        if let Some(w) = &self.time_window {
            TimeWindow::new(w.start, w.end)?;
        }
        self.quality.validate()?;
        if self.trend.cadence.factor() <= 0.0 || !self.trend.cadence.factor().is_finite() {
            return Err(EviError::InvalidConfiguration(format!(
                "reporting cadence must be a positive number of years, got {}",
                self.trend.cadence.factor()
            )));
        }
        LandCoverFilter::new(self.land_cover.clone())?;
        YearlyAggregator::new(self.yearly.clone())?;
        DistributionSummarizer::new(self.distribution.clone())?;
        self.sampling.validate()?;
        self.interpolation.validate()?;
        for (name, scale) in &self.color_scales {
            scale.validate().map_err(|e| match e {
                EviError::InvalidConfiguration(msg) => {
                    EviError::InvalidConfiguration(format!("color scale '{}': {}", name, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Absorbed-failure counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub observations: usize,
    pub trend: StageStats,
    /// Trend pixels removed by the land-cover filter
    pub land_cover_excluded: usize,
    pub distribution: StageStats,
    pub samples: usize,
    pub trend_samples: usize,
}

/// Every artifact of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Trend over all land
    pub trend: TrendRaster,
    /// Trend restricted to the allowed land-cover classes
    pub cropland_trend: TrendRaster,
    pub allow_mask: Array2<bool>,
    pub yearly: YearlyRaster,
    pub distribution: DistributionRaster,
    /// Samples of the distribution raster
    pub samples: SampleSet,
    /// Samples of the land-cover filtered trend raster
    pub trend_samples: SampleSet,
    pub stats: PipelineStats,
}

/// Configured processors for one pipeline
#[derive(Debug, Clone)]
pub struct EviPipeline {
    config: PipelineConfig,
    masker: QualityMasker,
    trend: TrendEstimator,
    land_cover: LandCoverFilter,
    yearly: YearlyAggregator,
    distribution: DistributionSummarizer,
    sampler: SpatialSampler,
}

impl EviPipeline {
    /// Validate the configuration and build every stage processor
    pub fn new(config: PipelineConfig) -> EviResult<Self> {
        config.validate()?;
        Ok(Self {
            masker: QualityMasker::new(config.quality.clone())?,
            trend: TrendEstimator::new(config.trend.clone()),
            land_cover: LandCoverFilter::new(config.land_cover.clone())?,
            yearly: YearlyAggregator::new(config.yearly.clone())?,
            distribution: DistributionSummarizer::new(config.distribution.clone())?,
            sampler: SpatialSampler::new(config.sampling.clone())?,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, stack: &TimeSeriesStack, land_cover: &LandCoverMap) -> EviResult<PipelineOutput> {
        self.run_with_cancel(stack, land_cover, &CancelFlag::new())
    }

    /// Run both branches. Cancellation abandons the run with
    /// `EviError::Cancelled` and no partial output.
    pub fn run_with_cancel(
        &self,
        stack: &TimeSeriesStack,
        land_cover: &LandCoverMap,
        cancel: &CancelFlag,
    ) -> EviResult<PipelineOutput> {
        if land_cover.shape() != stack.shape() {
            return Err(EviError::InvalidConfiguration(format!(
                "land-cover grid {:?} does not match observation grid {:?}",
                land_cover.shape(),
                stack.shape()
            )));
        }
        log::info!(
            "Starting EVI pipeline: {}x{} pixels, {} observations",
            stack.shape().0,
            stack.shape().1,
            stack.observation_count()
        );
        let window = self.config.time_window.as_ref();

        let (trend, trend_stats) = self.trend.estimate_stack(stack, &self.masker, window, cancel)?;
        let allow_mask = self.land_cover.allow_mask(land_cover);
        let cropland_trend = self.land_cover.apply(&trend, land_cover)?;
        let land_cover_excluded = trend.valid_count() - cropland_trend.valid_count();

        let yearly = self.yearly.aggregate_stack(stack, &self.masker, window, cancel)?;
        let (distribution, distribution_stats) = self.distribution.summarize_raster(&yearly, cancel)?;

        cancel.check()?;
        let samples = self.sampler.sample(&distribution)?;
        let trend_samples = self.sampler.sample(&TrendLayer {
            raster: &cropland_trend,
            cadence: self.config.trend.cadence,
        })?;

        let stats = PipelineStats {
            observations: stack.observation_count(),
            trend: trend_stats,
            land_cover_excluded,
            distribution: distribution_stats,
            samples: samples.len(),
            trend_samples: trend_samples.len(),
        };
        log::info!("Pipeline complete: {:?}", stats);

        Ok(PipelineOutput {
            trend,
            cropland_trend,
            allow_mask,
            yearly,
            distribution,
            samples,
            trend_samples,
            stats,
        })
    }

    /// Interpolate one column of a sample set onto the configured grid
    pub fn interpolate(&self, samples: &SampleSet, column: &str) -> EviResult<InterpolationGrid> {
        let points = samples.scatter_points(column)?;
        SpatialInterpolator::new(self.config.interpolation.clone())?.interpolate(&points)
    }
}
