use num_traits::Float;
use serde::{Deserialize, Serialize};

use super::batch::{CancelFlag, PixelOutcome, StageStats};
use super::maybe_rayon::*;
use super::yearly::YearlyRaster;
use crate::types::{DistributionRaster, DistributionResult, EviError, EviResult, PixelId};

/// Standard deviation estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdDevEstimator {
    /// Divide by n
    Population,
    /// Divide by n - 1 (Bessel-corrected)
    Sample,
}

/// Distributional summary parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionParams {
    pub estimator: StdDevEstimator,
    /// Half-width multiplier of the symmetric interval
    pub z_score: f64,
}

impl Default for DistributionParams {
    fn default() -> Self {
        Self {
            estimator: StdDevEstimator::Population,
            z_score: 1.96,  // two-sided 95% under a normal approximation
        }
    }
}

/// Mean and standard deviation of `values`; requires at least two values
pub fn mean_and_std<T: Float>(values: &[T], estimator: StdDevEstimator) -> EviResult<(T, T)> {
    let n = values.len();
    if n < 2 {
        return Err(EviError::InsufficientData { required: 2, available: n });
    }
    let nf = T::from(n).ok_or_else(|| EviError::UpstreamData("sample size overflow".to_string()))?;
    let mean = values.iter().fold(T::zero(), |acc, &v| acc + v) / nf;
    let ss = values.iter().fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean));
    let denom = match estimator {
        StdDevEstimator::Population => nf,
        StdDevEstimator::Sample => nf - T::one(),
    };
    let std = (ss / denom).sqrt().max(T::zero());
    Ok((mean, std))
}

/// Per-pixel mean / standard deviation and the derived prediction interval
#[derive(Debug, Clone)]
pub struct DistributionSummarizer {
    params: DistributionParams,
}

impl DistributionSummarizer {
    /// Create a summarizer; the interval multiplier must be positive
    pub fn new(params: DistributionParams) -> EviResult<Self> {
        if !params.z_score.is_finite() || params.z_score <= 0.0 {
            return Err(EviError::InvalidConfiguration(format!(
                "interval multiplier must be positive, got {}",
                params.z_score
            )));
        }
        Ok(Self { params })
    }

    /// Create summarizer with standard parameters (population std, 1.96)
    pub fn standard() -> Self {
        Self { params: DistributionParams::default() }
    }

    /// Get current parameters
    pub fn params(&self) -> &DistributionParams {
        &self.params
    }

    pub fn summarize(&self, pixel: PixelId, values: &[f64]) -> EviResult<DistributionResult> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(EviError::UpstreamData(format!("non-finite yearly value {} at {}", bad, pixel)));
        }
        let (mean, std_dev) = mean_and_std(values, self.params.estimator)?;
        let half_width = self.params.z_score * std_dev;
        Ok(DistributionResult {
            pixel,
            mean,
            std_dev,
            lower_95: mean - half_width,
            upper_95: mean + half_width,
        })
    }

    /// Summarise every pixel of a yearly-means raster. Pixels with fewer
    /// than two years are absent, never zero-width.
    pub fn summarize_raster(
        &self,
        yearly: &YearlyRaster,
        cancel: &CancelFlag,
    ) -> EviResult<(DistributionRaster, StageStats)> {
        let (rows, cols) = yearly.shape();
        log::info!("Summarising yearly distributions over {}x{} pixels", rows, cols);
        log::debug!("Distribution parameters: {:?}", self.params);

        let outcomes: Vec<PixelOutcome<DistributionResult>> = (0..rows * cols)
            .into_par_iter()
            .map(|idx| {
                cancel.check()?;
                let pixel = PixelId::new(idx / cols, idx % cols);
                let Some(series) = yearly.get(pixel) else {
                    return Ok(PixelOutcome::Insufficient);
                };
                let values: Vec<f64> = series.iter().map(|y| y.value).collect();
                PixelOutcome::classify(self.summarize(pixel, &values), |e| {
                    log::warn!("Distribution summary failed for pixel {}: {}", pixel, e)
                })
            })
            .collect::<EviResult<Vec<_>>>()?;

        let stats = StageStats::from_outcomes(&outcomes);
        if stats.insufficient > 0 {
            log::warn!(
                "{} of {} pixels had fewer than two yearly values",
                stats.insufficient,
                stats.pixels
            );
        }
        if stats.upstream_errors > 0 {
            log::warn!("{} pixels had non-finite yearly values", stats.upstream_errors);
        }
        let values = outcomes.into_iter().map(PixelOutcome::into_option).collect();
        let raster = DistributionRaster::from_row_major((rows, cols), yearly.transform, values)?;
        Ok((raster, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::yearly::YearlyMean;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_population_std_end_to_end_values() {
        let result = DistributionSummarizer::standard()
            .summarize(PixelId::new(0, 0), &[0.30, 0.35, 0.40])
            .unwrap();
        assert_abs_diff_eq!(result.mean, 0.35, epsilon = 1e-12);
        assert_abs_diff_eq!(result.std_dev, 0.040_824_8, epsilon = 1e-6);
        assert_abs_diff_eq!(result.lower_95, 0.270, epsilon = 1e-3);
        assert_abs_diff_eq!(result.upper_95, 0.430, epsilon = 1e-3);
    }

    #[test]
    fn test_sample_estimator_is_wider() {
        let values = [0.30, 0.35, 0.40];
        let (_, pop) = mean_and_std(&values, StdDevEstimator::Population).unwrap();
        let (_, samp) = mean_and_std(&values, StdDevEstimator::Sample).unwrap();
        assert_abs_diff_eq!(samp, 0.05, epsilon = 1e-12);
        assert!(samp > pop);
    }

    #[test]
    fn test_interval_invariants() {
        let summarizer = DistributionSummarizer::standard();
        let series = [
            vec![0.2, 0.2],
            vec![0.1, 0.9, 0.4, 0.33],
            vec![-0.05, 0.6, 0.61],
        ];
        for values in series.iter() {
            let r = summarizer.summarize(PixelId::new(0, 0), values).unwrap();
            assert!(r.lower_95 <= r.mean && r.mean <= r.upper_95);
            assert!(r.std_dev >= 0.0);
            assert_abs_diff_eq!(r.interval_width(), 2.0 * 1.96 * r.std_dev, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_year_is_insufficient() {
        let err = DistributionSummarizer::standard()
            .summarize(PixelId::new(0, 0), &[0.3])
            .unwrap_err();
        assert!(matches!(err, EviError::InsufficientData { required: 2, available: 1 }));
    }

    #[test]
    fn test_raster_marks_single_year_pixels_absent() {
        let year = |y: i32, v: f64| YearlyMean { year: y, value: v, n_obs: 1 };
        let yearly = YearlyRaster::from_row_major(
            (1, 3),
            GeoTransform::default(),
            vec![
                Some(vec![year(2010, 0.3), year(2011, 0.35), year(2012, 0.4)]),
                Some(vec![year(2010, 0.3)]),
                None,
            ],
        )
        .unwrap();
        let (raster, stats) = DistributionSummarizer::standard()
            .summarize_raster(&yearly, &CancelFlag::new())
            .unwrap();
        assert_eq!(stats.computed, 1);
        assert_eq!(stats.insufficient, 2);
        assert_eq!(stats.upstream_errors, 0);
        assert!(raster.get(PixelId::new(0, 1)).is_none());
        assert_abs_diff_eq!(raster.get(PixelId::new(0, 0)).unwrap().mean, 0.35, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_year_is_counted_apart_from_insufficient() {
        let year = |y: i32, v: f64| YearlyMean { year: y, value: v, n_obs: 1 };
        let yearly = YearlyRaster::from_row_major(
            (1, 3),
            GeoTransform::default(),
            vec![
                Some(vec![year(2010, 0.3), year(2011, f64::NAN)]),
                Some(vec![year(2010, 0.3)]),
                Some(vec![year(2010, 0.3), year(2011, 0.4)]),
            ],
        )
        .unwrap();
        let (raster, stats) = DistributionSummarizer::standard()
            .summarize_raster(&yearly, &CancelFlag::new())
            .unwrap();
        assert_eq!(stats.computed, 1);
        assert_eq!(stats.insufficient, 1);
        assert_eq!(stats.upstream_errors, 1);
        assert!(raster.get(PixelId::new(0, 0)).is_none());
    }

    #[test]
    fn test_generic_over_f32() {
        let (mean, std) = mean_and_std(&[1.0f32, 3.0], StdDevEstimator::Population).unwrap();
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
    }
}
