use std::collections::BTreeSet;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::types::{EviError, EviResult, LandCoverMap, PixelRaster};

/// Land-cover conditioning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandCoverParams {
    /// Class codes whose pixels are kept
    pub allowed_classes: BTreeSet<u8>,
    /// Reference year the classification describes
    pub reference_year: i32,
}

impl Default for LandCoverParams {
    fn default() -> Self {
        Self {
            // MCD12Q1 LC_Type1: 12 = croplands, 14 = cropland/natural vegetation mosaic
            allowed_classes: [12, 14].into_iter().collect(),
            reference_year: 2019,
        }
    }
}

/// Restricts per-pixel results to an allow-set of land-cover classes
#[derive(Debug, Clone)]
pub struct LandCoverFilter {
    params: LandCoverParams,
}

impl LandCoverFilter {
    /// Create a land-cover filter; an empty allow set is rejected
    pub fn new(params: LandCoverParams) -> EviResult<Self> {
        if params.allowed_classes.is_empty() {
            return Err(EviError::InvalidConfiguration(
                "land-cover allow-set is empty".to_string(),
            ));
        }
        Ok(Self { params })
    }

    pub fn cropland() -> Self {
        Self { params: LandCoverParams::default() }
    }

    /// Get current parameters
    pub fn params(&self) -> &LandCoverParams {
        &self.params
    }

    pub fn allows(&self, class: Option<u8>) -> bool {
        class.map_or(false, |c| self.params.allowed_classes.contains(&c))
    }

    /// Boolean raster, `true` where the pixel's class is allowed
    pub fn allow_mask(&self, land_cover: &LandCoverMap) -> Array2<bool> {
        land_cover.classes.map(|c| self.allows(*c))
    }

    /// Keep results only on allowed pixels; everything else becomes no data
    pub fn apply<T: Clone>(&self, raster: &PixelRaster<T>, land_cover: &LandCoverMap) -> EviResult<PixelRaster<T>> {
        if raster.shape() != land_cover.shape() {
            return Err(EviError::InvalidConfiguration(format!(
                "land-cover grid {:?} does not match result grid {:?}",
                land_cover.shape(),
                raster.shape()
            )));
        }

        log::info!(
            "Applying land-cover filter (classes {:?}, reference year {})",
            self.params.allowed_classes,
            self.params.reference_year
        );

        let data = Zip::from(&raster.data)
            .and(&land_cover.classes)
            .map_collect(|value, class| {
                if self.allows(*class) {
                    value.clone()
                } else {
                    None
                }
            });

        let filtered = PixelRaster { data, transform: raster.transform };
        log::info!(
            "Land-cover filter kept {} of {} valid pixels",
            filtered.valid_count(),
            raster.valid_count()
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, PixelId, TrendResult, TrendRaster};
    use ndarray::array;

    fn trend(row: usize, col: usize, slope: f64) -> Option<TrendResult> {
        Some(TrendResult { pixel: PixelId::new(row, col), slope, intercept: 0.2, n_obs: 10 })
    }

    #[test]
    fn test_disallowed_classes_never_survive() {
        let raster = TrendRaster::from_row_major(
            (2, 2),
            GeoTransform::default(),
            vec![trend(0, 0, 0.0), trend(0, 1, 0.03), trend(1, 0, 0.0), None],
        )
        .unwrap();
        let land_cover = LandCoverMap::new(array![[Some(12), Some(10)], [None, Some(14)]]);

        let out = LandCoverFilter::cropland().apply(&raster, &land_cover).unwrap();

        // zero slope on cropland is kept as a value, not treated as absent
        assert_eq!(out.get(PixelId::new(0, 0)).map(|t| t.slope), Some(0.0));
        assert!(out.get(PixelId::new(0, 1)).is_none());
        assert!(out.get(PixelId::new(1, 0)).is_none());
        // allowed class but no trend stays absent
        assert!(out.get(PixelId::new(1, 1)).is_none());
        assert_eq!(out.valid_count(), 1);
    }

    #[test]
    fn test_allow_mask() {
        let land_cover = LandCoverMap::new(array![[Some(12), Some(14), Some(1), None]]);
        let mask = LandCoverFilter::cropland().allow_mask(&land_cover);
        assert_eq!(mask, array![[true, true, false, false]]);
    }

    #[test]
    fn test_shape_mismatch_and_empty_allow_set() {
        let raster: TrendRaster = PixelRaster::empty((2, 2), GeoTransform::default());
        let land_cover = LandCoverMap::new(Array2::from_elem((3, 2), Some(12)));
        assert!(LandCoverFilter::cropland().apply(&raster, &land_cover).is_err());

        let params = LandCoverParams { allowed_classes: BTreeSet::new(), ..Default::default() };
        assert!(matches!(LandCoverFilter::new(params), Err(EviError::InvalidConfiguration(_))));
    }
}
