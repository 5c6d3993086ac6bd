//! evitrend: per-pixel EVI trend and uncertainty analysis
//!
//! Quality-masks a composite vegetation-index time series, fits per-pixel
//! least-squares trends, restricts them to allowed land-cover classes,
//! summarises yearly means into a 95% prediction interval, draws seeded
//! samples and interpolates them onto dense grids for contouring.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    PixelId, Observation, ValidObservation, TimeSeriesStack, LandCoverMap, TrendResult,
    DistributionResult, PixelRaster, TrendRaster, DistributionRaster, GeoTransform, GeoPoint,
    BoundingBox, TimeWindow, ReportingCadence, EviError, EviResult,
};

pub use crate::core::{
    EviPipeline, PipelineConfig, PipelineOutput, CancelFlag, QualityMasker, TrendEstimator,
    LandCoverFilter, YearlyAggregator, DistributionSummarizer, SpatialSampler, SpatialInterpolator,
};
