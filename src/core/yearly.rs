use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use super::batch::CancelFlag;
use super::maybe_rayon::*;
use super::quality_mask::QualityMasker;
use crate::types::{EviError, EviResult, PixelRaster, TimeSeriesStack, TimeWindow, ValidObservation};

/// Calendar-year range for yearly aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YearlyParams {
    pub first_year: i32,
    pub last_year: i32,
}

impl Default for YearlyParams {
    fn default() -> Self {
        Self { first_year: 2010, last_year: 2024 }
    }
}

/// Mean of one pixel's valid observations within a calendar year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearlyMean {
    pub year: i32,
    pub value: f64,
    pub n_obs: usize,
}

pub type YearlyRaster = PixelRaster<Vec<YearlyMean>>;

/// Collapses per-pixel observation series into one mean value per year
#[derive(Debug, Clone)]
pub struct YearlyAggregator {
    params: YearlyParams,
}

impl YearlyAggregator {
    /// Create a yearly aggregator for an inclusive year range
    pub fn new(params: YearlyParams) -> EviResult<Self> {
        if params.last_year < params.first_year {
            return Err(EviError::InvalidConfiguration(format!(
                "yearly range {}..={} is empty",
                params.first_year, params.last_year
            )));
        }
        Ok(Self { params })
    }

    /// Get current parameters
    pub fn params(&self) -> &YearlyParams {
        &self.params
    }

    /// Yearly means in ascending year order; years without data are skipped.
    /// Only years that occur in the series are accumulated, so the width of
    /// the configured range costs nothing.
    pub fn aggregate_pixel(&self, observations: &[ValidObservation]) -> Vec<YearlyMean> {
        let range = self.params.first_year..=self.params.last_year;
        let mut sums: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
        for obs in observations {
            let year = obs.timestamp.year();
            if !range.contains(&year) {
                continue;
            }
            let slot = sums.entry(year).or_insert((0.0, 0));
            slot.0 += obs.value;
            slot.1 += 1;
        }

        sums.into_iter()
            .map(|(year, (sum, n))| YearlyMean { year, value: sum / n as f64, n_obs: n })
            .collect()
    }

    /// Mask and aggregate every pixel of a stack. Pixels without any
    /// valid year are absent.
    pub fn aggregate_stack(
        &self,
        stack: &TimeSeriesStack,
        masker: &QualityMasker,
        window: Option<&TimeWindow>,
        cancel: &CancelFlag,
    ) -> EviResult<YearlyRaster> {
        log::info!(
            "Aggregating yearly means {}..={} over {} pixels",
            self.params.first_year,
            self.params.last_year,
            stack.pixel_count()
        );

        let outcomes: Vec<Option<Vec<YearlyMean>>> = (0..stack.pixel_count())
            .into_par_iter()
            .map(|idx| {
                cancel.check()?;
                let valid = masker.apply_window(stack.observations(idx), window);
                let yearly = self.aggregate_pixel(&valid);
                Ok(if yearly.is_empty() { None } else { Some(yearly) })
            })
            .collect::<EviResult<Vec<_>>>()?;

        YearlyRaster::from_row_major(stack.shape(), stack.transform(), outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn obs(y: i32, m: u32, value: f64) -> ValidObservation {
        ValidObservation { timestamp: Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).unwrap(), value }
    }

    #[test]
    fn test_yearly_means_skip_empty_years() {
        let agg = YearlyAggregator::new(YearlyParams { first_year: 2010, last_year: 2013 }).unwrap();
        let series = vec![
            obs(2009, 6, 9.0),
            obs(2010, 1, 0.2),
            obs(2010, 7, 0.4),
            obs(2012, 3, 0.5),
            obs(2014, 1, 9.0),
        ];
        let yearly = agg.aggregate_pixel(&series);
        assert_eq!(yearly.len(), 2);
        assert_eq!(yearly[0].year, 2010);
        assert!((yearly[0].value - 0.3).abs() < 1e-12);
        assert_eq!(yearly[0].n_obs, 2);
        assert_eq!(yearly[1].year, 2012);
    }

    #[test]
    fn test_full_i32_range_is_accepted() {
        let params = YearlyParams { first_year: i32::MIN, last_year: i32::MAX };
        let agg = YearlyAggregator::new(params).unwrap();
        let yearly = agg.aggregate_pixel(&[obs(2011, 5, 0.4), obs(2010, 2, 0.2)]);
        let years: Vec<i32> = yearly.iter().map(|y| y.year).collect();
        assert_eq!(years, vec![2010, 2011]);
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(YearlyAggregator::new(YearlyParams { first_year: 2020, last_year: 2010 }).is_err());
    }
}
