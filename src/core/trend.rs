use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::batch::{CancelFlag, PixelOutcome, StageStats};
use super::maybe_rayon::*;
use super::quality_mask::QualityMasker;
use crate::types::{
    EviError, EviResult, PixelId, ReportingCadence, TimeSeriesStack, TimeWindow, TrendRaster,
    TrendResult, ValidObservation,
};

/// Mean Gregorian year in seconds
const SECONDS_PER_YEAR: f64 = 365.2425 * 86_400.0;

/// Elapsed time between `epoch` and `t` in fractional years
pub fn fractional_years(epoch: &DateTime<Utc>, t: &DateTime<Utc>) -> f64 {
    let elapsed = t.signed_duration_since(*epoch);
    let seconds = elapsed.num_seconds() as f64
        + elapsed.subsec_nanos() as f64 * 1e-9;
    seconds / SECONDS_PER_YEAR
}

/// Temporal trend parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    /// Time origin for the regression
    pub epoch: DateTime<Utc>,
    /// Unit used when reporting slopes
    pub cadence: ReportingCadence,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            epoch: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            cadence: ReportingCadence::PerDecade,
        }
    }
}

/// Ordinary least-squares line `value = slope * t + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub n: usize,
}

/// Per-pixel linear regression of value against time
#[derive(Debug, Clone)]
pub struct TrendEstimator {
    params: TrendParams,
}

impl TrendEstimator {
    /// Create a new trend estimator
    pub fn new(params: TrendParams) -> Self {
        Self { params }
    }

    /// Create estimator with standard parameters (epoch 2000-01-01, per decade)
    pub fn standard() -> Self {
        Self::new(TrendParams::default())
    }

    /// Get current parameters
    pub fn params(&self) -> &TrendParams {
        &self.params
    }

    /// Least-squares fit over `(t, value)` pairs.
    ///
    /// Uses centred sums in f64. Fewer than two points, or a zero spread in
    /// `t`, yields `InsufficientData`.
    pub fn fit(points: &[(f64, f64)]) -> EviResult<LinearFit> {
        let n = points.len();
        if n < 2 {
            return Err(EviError::InsufficientData { required: 2, available: n });
        }

        let nf = n as f64;
        let mean_t = points.iter().map(|p| p.0).sum::<f64>() / nf;
        let mean_v = points.iter().map(|p| p.1).sum::<f64>() / nf;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for &(t, v) in points {
            let dt = t - mean_t;
            sxx += dt * dt;
            sxy += dt * (v - mean_v);
        }

        let (t_min, t_max) = points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
        let spread_tol = f64::EPSILON * t_max.abs().max(t_min.abs()).max(1.0);
        if !(t_max - t_min > spread_tol) || sxx <= 0.0 || !sxx.is_finite() {
            // every t identical: the line is vertical
            return Err(EviError::InsufficientData { required: 2, available: 1 });
        }

        let slope = sxy / sxx;
        let intercept = mean_v - slope * mean_t;
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(EviError::UpstreamData(format!(
                "non-finite regression result (slope {}, intercept {})",
                slope, intercept
            )));
        }

        Ok(LinearFit { slope, intercept, n })
    }

    /// Fit one pixel's masked observations against elapsed years since the epoch
    pub fn estimate_pixel(&self, pixel: PixelId, observations: &[ValidObservation]) -> EviResult<TrendResult> {
        let points: Vec<(f64, f64)> = observations
            .iter()
            .map(|o| (fractional_years(&self.params.epoch, &o.timestamp), o.value))
            .collect();
        let fit = Self::fit(&points)?;
        Ok(TrendResult {
            pixel,
            slope: fit.slope,
            intercept: fit.intercept,
            n_obs: fit.n,
        })
    }

    /// Mask and fit every pixel of a stack.
    ///
    /// Pixels whose fit is undefined come back as `None`; they are counted
    /// in the returned stats and never abort the batch.
    pub fn estimate_stack(
        &self,
        stack: &TimeSeriesStack,
        masker: &QualityMasker,
        window: Option<&TimeWindow>,
        cancel: &CancelFlag,
    ) -> EviResult<(TrendRaster, StageStats)> {
        log::info!(
            "Estimating per-pixel trends for {}x{} stack ({} observations)",
            stack.shape().0,
            stack.shape().1,
            stack.observation_count()
        );
        log::debug!("Trend parameters: {:?}", self.params);

        let outcomes: Vec<PixelOutcome<TrendResult>> = (0..stack.pixel_count())
            .into_par_iter()
            .map(|idx| {
                cancel.check()?;
                let pixel = stack.pixel_at(idx);
                let valid = masker.apply_window(stack.observations(idx), window);
                PixelOutcome::classify(self.estimate_pixel(pixel, &valid), |e| {
                    log::warn!("Trend fit failed for pixel {}: {}", pixel, e)
                })
            })
            .collect::<EviResult<Vec<_>>>()?;

        let stats = StageStats::from_outcomes(&outcomes);
        if stats.insufficient > 0 {
            log::warn!(
                "{} of {} pixels had insufficient data for a trend",
                stats.insufficient,
                stats.pixels
            );
        }
        if stats.upstream_errors > 0 {
            log::warn!("{} pixels had unusable input for a trend", stats.upstream_errors);
        }

        let values = outcomes.into_iter().map(PixelOutcome::into_option).collect();
        let raster = TrendRaster::from_row_major(stack.shape(), stack.transform(), values)?;
        log::info!("Trend estimation complete: {} pixels with a slope", stats.computed);
        Ok((raster, stats))
    }
}
