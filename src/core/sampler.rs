use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::interpolation::ScatterPoint;
use super::maybe_rayon::*;
use crate::types::{
    BoundingBox, DistributionRaster, EviError, EviResult, GeoPoint, GeoTransform, PixelId,
    ReportingCadence, TrendRaster,
};

/// Nominal length of one degree of latitude in metres
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// Area from which samples may be drawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Everywhere,
    Bounds(BoundingBox),
    /// Closed ring of (lon, lat) vertices; the closing vertex may be omitted
    Polygon(Vec<GeoPoint>),
}

impl Default for Region {
    fn default() -> Self {
        Region::Everywhere
    }
}

impl Region {
    pub fn validate(&self) -> EviResult<()> {
        match self {
            Region::Polygon(ring) if ring.len() < 3 => Err(EviError::InvalidConfiguration(format!(
                "region polygon needs at least 3 vertices, got {}",
                ring.len()
            ))),
            Region::Bounds(b) if !(b.min_lon <= b.max_lon && b.min_lat <= b.max_lat) => Err(
                EviError::InvalidConfiguration(format!("inverted region bounds {:?}", b)),
            ),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        match self {
            Region::Everywhere => true,
            Region::Bounds(b) => b.contains(p),
            Region::Polygon(ring) => point_in_ring(p, ring),
        }
    }
}

/// Even-odd ray casting test
fn point_in_ring(p: GeoPoint, ring: &[GeoPoint]) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.latitude > p.latitude) != (b.latitude > p.latitude) {
            let x_cross = a.longitude
                + (p.latitude - a.latitude) * (b.longitude - a.longitude) / (b.latitude - a.latitude);
            if p.longitude < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Random sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub region: Region,
    /// Sampling resolution in metres. Rasters are in degrees, so the pixel
    /// spacing is converted with `METRES_PER_DEGREE`; a scale at or below
    /// the pixel size samples every pixel.
    pub scale: f64,
    /// Upper bound on the number of samples
    pub count: usize,
    pub seed: u64,
    pub include_geometry: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            region: Region::Everywhere,
            scale: 250.0,
            count: 20_000,
            seed: 42,
            include_geometry: true,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> EviResult<()> {
        if self.count == 0 {
            return Err(EviError::InvalidConfiguration("sample count must be positive".to_string()));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(EviError::InvalidConfiguration(format!(
                "sampling scale must be positive, got {}",
                self.scale
            )));
        }
        self.region.validate()
    }
}

/// A raster that can be sampled into named scalar columns
pub trait SampleSource: Sync {
    fn columns(&self) -> Vec<String>;
    fn shape(&self) -> (usize, usize);
    fn transform(&self) -> GeoTransform;
    /// Column values for a pixel, `None` where the pixel has no data
    fn values_at(&self, pixel: PixelId) -> Option<Vec<f64>>;
}

impl SampleSource for DistributionRaster {
    fn columns(&self) -> Vec<String> {
        ["Mean", "StdDev", "Lower_95", "Upper_95", "PI_width"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn values_at(&self, pixel: PixelId) -> Option<Vec<f64>> {
        self.get(pixel)
            .map(|d| vec![d.mean, d.std_dev, d.lower_95, d.upper_95, d.interval_width()])
    }
}

/// Trend raster viewed with its slope in a chosen reporting unit
pub struct TrendLayer<'a> {
    pub raster: &'a TrendRaster,
    pub cadence: ReportingCadence,
}

impl SampleSource for TrendLayer<'_> {
    fn columns(&self) -> Vec<String> {
        vec![self.cadence.slope_column(), "intercept".to_string(), "n_obs".to_string()]
    }

    fn shape(&self) -> (usize, usize) {
        self.raster.data.dim()
    }

    fn transform(&self) -> GeoTransform {
        self.raster.transform
    }

    fn values_at(&self, pixel: PixelId) -> Option<Vec<f64>> {
        self.raster
            .get(pixel)
            .map(|t| vec![t.slope_at(self.cadence), t.intercept, t.n_obs as f64])
    }
}

/// One drawn pixel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub pixel: PixelId,
    pub location: Option<GeoPoint>,
    pub values: Vec<f64>,
}

/// Ordered samples with an explicit column schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSet {
    pub columns: Vec<String>,
    pub samples: Vec<Sample>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn column_index(&self, name: &str) -> EviResult<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EviError::InvalidConfiguration(format!("no sample column named '{}'", name)))
    }

    /// Scattered `(lon, lat, value)` points for one column; samples
    /// without geometry cannot be placed and are rejected.
    pub fn scatter_points(&self, column: &str) -> EviResult<Vec<ScatterPoint>> {
        let idx = self.column_index(column)?;
        self.samples
            .iter()
            .map(|s| {
                let loc = s.location.ok_or_else(|| {
                    EviError::InvalidConfiguration("samples were drawn without geometry".to_string())
                })?;
                Ok(ScatterPoint::new(loc.longitude, loc.latitude, s.values[idx]))
            })
            .collect()
    }
}

/// Seeded random pixel sampler
#[derive(Debug, Clone)]
pub struct SpatialSampler {
    params: SamplingParams,
}

impl SpatialSampler {
    /// Create a new sampler after validating its parameters
    pub fn new(params: SamplingParams) -> EviResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Get current parameters
    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Draw up to `count` valid pixels inside the region.
    ///
    /// Candidates are enumerated in row-major order on the sampling grid and
    /// a partial Fisher-Yates shuffle driven by a single seeded generator
    /// picks the subset, so the result depends only on the raster and seed.
    /// With fewer candidates than `count`, all of them are returned.
    pub fn sample<S: SampleSource + ?Sized>(&self, source: &S) -> EviResult<SampleSet> {
        let (rows, cols) = source.shape();
        let transform = source.transform();
        let stride = self.stride(&transform);

        log::info!(
            "Sampling up to {} pixels (seed {}, stride {}) from {}x{} raster",
            self.params.count,
            self.params.seed,
            stride,
            rows,
            cols
        );

        let grid: Vec<PixelId> = (0..rows)
            .step_by(stride)
            .flat_map(|r| (0..cols).step_by(stride).map(move |c| PixelId::new(r, c)))
            .collect();

        let region = &self.params.region;
        let mut candidates: Vec<(PixelId, GeoPoint, Vec<f64>)> = grid
            .into_par_iter()
            .map(|pixel| {
                let center = transform.pixel_center(pixel);
                if !region.contains(center) {
                    return None;
                }
                source.values_at(pixel).map(|v| (pixel, center, v))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        let take = self.params.count.min(candidates.len());
        if take < candidates.len() {
            let mut rng = StdRng::seed_from_u64(self.params.seed);
            for i in 0..take {
                let j = rng.gen_range(i..candidates.len());
                candidates.swap(i, j);
            }
            candidates.truncate(take);
        } else {
            log::debug!("Only {} valid candidates; returning all of them", candidates.len());
        }

        let samples = candidates
            .into_iter()
            .map(|(pixel, center, values)| Sample {
                pixel,
                location: self.params.include_geometry.then_some(center),
                values,
            })
            .collect::<Vec<_>>();

        log::info!("Sample size: {}", samples.len());
        Ok(SampleSet { columns: source.columns(), samples })
    }

    /// Candidate step in pixels: the sampling scale over the native pixel
    /// size, measured along the meridian so it does not depend on latitude.
    fn stride(&self, transform: &GeoTransform) -> usize {
        let degrees = if transform.pixel_height != 0.0 {
            transform.pixel_height.abs()
        } else {
            transform.pixel_width.abs()
        };
        let native_m = degrees * METRES_PER_DEGREE;
        if native_m > 0.0 && native_m.is_finite() {
            (self.params.scale / native_m).round().clamp(1.0, usize::MAX as f64) as usize
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DistributionResult;

    fn raster(rows: usize, cols: usize) -> DistributionRaster {
        let values = (0..rows * cols)
            .map(|i| {
                let pixel = PixelId::new(i / cols, i % cols);
                // every fifth pixel has no data
                (i % 5 != 0).then(|| DistributionResult {
                    pixel,
                    mean: i as f64,
                    std_dev: 1.0,
                    lower_95: i as f64 - 1.96,
                    upper_95: i as f64 + 1.96,
                })
            })
            .collect();
        DistributionRaster::from_row_major((rows, cols), GeoTransform::north_up(70.0, 30.0, 1.0, 1.0), values)
            .unwrap()
    }

    fn params(count: usize, seed: u64) -> SamplingParams {
        SamplingParams { scale: 1.0, count, seed, ..Default::default() }
    }

    #[test]
    fn test_same_seed_same_samples() {
        let source = raster(20, 20);
        let a = SpatialSampler::new(params(25, 42)).unwrap().sample(&source).unwrap();
        let b = SpatialSampler::new(params(25, 42)).unwrap().sample(&source).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 25);

        let c = SpatialSampler::new(params(25, 7)).unwrap().sample(&source).unwrap();
        assert_ne!(a.samples, c.samples);
    }

    #[test]
    fn test_fewer_valid_pixels_than_count_returns_all() {
        let source = raster(3, 3);
        let set = SpatialSampler::new(params(100, 1)).unwrap().sample(&source).unwrap();
        // indices 0 and 5 are no data
        assert_eq!(set.len(), 7);
        assert!(set.samples.iter().all(|s| s.values[0] as usize % 5 != 0));
    }

    #[test]
    fn test_region_and_geometry_flag() {
        let source = raster(10, 10);
        let region = Region::Bounds(BoundingBox { min_lon: 70.0, max_lon: 72.0, min_lat: 28.0, max_lat: 30.0 });
        let p = SamplingParams { region, include_geometry: false, ..params(50, 3) };
        let set = SpatialSampler::new(p).unwrap().sample(&source).unwrap();
        // rows 0-1, cols 0-1 are inside; indices 0 and 10 have no data
        assert_eq!(set.len(), 2);
        assert!(set.samples.iter().all(|s| s.location.is_none()));
        assert!(set.scatter_points("Mean").is_err());
    }

    #[test]
    fn test_polygon_region() {
        let ring = vec![
            GeoPoint::new(70.0, 30.0),
            GeoPoint::new(75.0, 30.0),
            GeoPoint::new(70.0, 25.0),
        ];
        assert!(point_in_ring(GeoPoint::new(71.0, 29.0), &ring));
        assert!(!point_in_ring(GeoPoint::new(74.5, 25.5), &ring));
    }

    #[test]
    fn test_coarser_scale_strides_the_grid() {
        let source = raster(10, 10);
        let p = SamplingParams { scale: 2.0 * METRES_PER_DEGREE, ..params(1000, 1) };
        let set = SpatialSampler::new(p).unwrap().sample(&source).unwrap();
        assert!(set.samples.iter().all(|s| s.pixel.row % 2 == 0 && s.pixel.col % 2 == 0));
    }

    #[test]
    fn test_default_scale_samples_every_pixel_of_a_degree_raster() {
        // 0.0025 degree pixels are about 278 m, finer than the 250 m default
        let (rows, cols) = (100, 100);
        let values = (0..rows * cols)
            .map(|i| {
                Some(DistributionResult {
                    pixel: PixelId::new(i / cols, i % cols),
                    mean: 0.3,
                    std_dev: 0.01,
                    lower_95: 0.28,
                    upper_95: 0.32,
                })
            })
            .collect();
        let source = DistributionRaster::from_row_major(
            (rows, cols),
            GeoTransform::north_up(75.0, 27.0, 0.0025, 0.0025),
            values,
        )
        .unwrap();

        let defaults = crate::core::pipeline::PipelineConfig::default().sampling;
        let sampler = SpatialSampler::new(defaults.clone()).unwrap();
        assert_eq!(sampler.stride(&source.transform), 1);
        let set = sampler.sample(&source).unwrap();
        assert_eq!(set.len(), defaults.count.min(rows * cols));

        let capped = SpatialSampler::new(SamplingParams { count: 500, ..defaults }).unwrap();
        assert_eq!(capped.sample(&source).unwrap().len(), 500);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(SpatialSampler::new(params(0, 1)).is_err());
        let p = SamplingParams { scale: -1.0, ..Default::default() };
        assert!(matches!(SpatialSampler::new(p), Err(EviError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_trend_layer_columns() {
        let raster = TrendRaster::empty((1, 1), GeoTransform::default());
        let layer = TrendLayer { raster: &raster, cadence: ReportingCadence::PerDecade };
        assert_eq!(layer.columns()[0], "slope_per_decade");
    }
}
