//! Core EVI processing stages

mod maybe_rayon;

pub mod batch;
pub mod quality_mask;
pub mod trend;
pub mod landcover;
pub mod yearly;
pub mod distribution;
pub mod sampler;
pub mod interpolation;
pub mod pipeline;

// Re-export main types
pub use batch::{CancelFlag, StageStats};
pub use quality_mask::{QualityMasker, QualityMaskParams};
pub use trend::{TrendEstimator, TrendParams, LinearFit, fractional_years};
pub use landcover::{LandCoverFilter, LandCoverParams};
pub use yearly::{YearlyAggregator, YearlyParams, YearlyMean, YearlyRaster};
pub use distribution::{DistributionSummarizer, DistributionParams, StdDevEstimator, mean_and_std};
pub use sampler::{SpatialSampler, SamplingParams, Region, SampleSource, Sample, SampleSet, TrendLayer};
pub use interpolation::{
    SpatialInterpolator, InterpolationParams, InterpolationGrid, InterpolationMethod, ScatterPoint,
    convex_hull, contour_levels,
};
pub use pipeline::{EviPipeline, PipelineConfig, PipelineOutput, PipelineStats};
