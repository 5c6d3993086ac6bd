use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Stable spatial key of a pixel (row, column in the source grid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelId {
    pub row: usize,
    pub col: usize,
}

impl PixelId {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for PixelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A raw composite observation as delivered by the upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    /// Integer-encoded value (e.g. MOD13Q1 EVI, scale 0.0001)
    pub raw_value: i32,
    /// Ordinal reliability code, lower is better
    pub quality: u8,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, raw_value: i32, quality: u8) -> Self {
        Self { timestamp, raw_value, quality }
    }
}

/// A quality-accepted observation converted to physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidObservation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Geographic point (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box enclosing all points, `None` for an empty iterator
    pub fn enclosing<I: IntoIterator<Item = GeoPoint>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self {
            min_lon: first.longitude,
            max_lon: first.longitude,
            min_lat: first.latitude,
            max_lat: first.latitude,
        };
        for p in iter {
            bbox.min_lon = bbox.min_lon.min(p.longitude);
            bbox.max_lon = bbox.max_lon.max(p.longitude);
            bbox.min_lat = bbox.min_lat.min(p.latitude);
            bbox.max_lat = bbox.max_lat.max(p.latitude);
        }
        Some(bbox)
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.longitude >= self.min_lon
            && p.longitude <= self.max_lon
            && p.latitude >= self.min_lat
            && p.latitude <= self.max_lat
    }
}

/// Geospatial transformation parameters (GDAL affine convention)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Geographic coordinate of the centre of a pixel
    pub fn pixel_center(&self, pixel: PixelId) -> GeoPoint {
        let col = pixel.col as f64 + 0.5;
        let row = pixel.row as f64 + 0.5;
        GeoPoint::new(
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0, 1.0)
    }
}

/// Inclusive date window applied before masking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> EviResult<Self> {
        if end < start {
            return Err(EviError::InvalidConfiguration(format!(
                "time window ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

/// Unit in which per-pixel slopes are reported
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingCadence {
    PerYear,
    PerDecade,
    /// Multiply the per-year slope by an arbitrary number of years
    Years(f64),
}

impl ReportingCadence {
    pub fn factor(&self) -> f64 {
        match self {
            ReportingCadence::PerYear => 1.0,
            ReportingCadence::PerDecade => 10.0,
            ReportingCadence::Years(n) => *n,
        }
    }

    /// Column/band name carrying the unit explicitly
    pub fn slope_column(&self) -> String {
        match self {
            ReportingCadence::PerYear => "slope_per_year".to_string(),
            ReportingCadence::PerDecade => "slope_per_decade".to_string(),
            ReportingCadence::Years(n) => format!("slope_per_{}_years", n),
        }
    }
}

/// Per-pixel least-squares trend; `slope` is always per year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub pixel: PixelId,
    pub slope: f64,
    pub intercept: f64,
    pub n_obs: usize,
}

impl TrendResult {
    pub fn slope_at(&self, cadence: ReportingCadence) -> f64 {
        self.slope * cadence.factor()
    }
}

/// Per-pixel mean / spread and the symmetric 95% prediction interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionResult {
    pub pixel: PixelId,
    pub mean: f64,
    pub std_dev: f64,
    pub lower_95: f64,
    pub upper_95: f64,
}

impl DistributionResult {
    pub fn interval_width(&self) -> f64 {
        self.upper_95 - self.lower_95
    }
}

/// A raster of optional per-pixel results. `None` means "no data",
/// which is distinct from any numeric value.
#[derive(Debug, Clone)]
pub struct PixelRaster<T> {
    pub data: Array2<Option<T>>,
    pub transform: GeoTransform,
}

impl<T: Clone> PixelRaster<T> {
    pub fn empty(shape: (usize, usize), transform: GeoTransform) -> Self {
        Self {
            data: Array2::from_elem(shape, None),
            transform,
        }
    }

    /// Build from values laid out in row-major pixel-index order
    pub fn from_row_major(
        shape: (usize, usize),
        transform: GeoTransform,
        values: Vec<Option<T>>,
    ) -> EviResult<Self> {
        let data = Array2::from_shape_vec(shape, values)
            .map_err(|e| EviError::UpstreamData(format!("raster shape mismatch: {}", e)))?;
        Ok(Self { data, transform })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn get(&self, pixel: PixelId) -> Option<&T> {
        self.data.get((pixel.row, pixel.col)).and_then(|v| v.as_ref())
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_some()).count()
    }
}

pub type TrendRaster = PixelRaster<TrendResult>;
pub type DistributionRaster = PixelRaster<DistributionResult>;

/// Materialised per-pixel time series, arena-indexed by row-major pixel index
#[derive(Debug, Clone)]
pub struct TimeSeriesStack {
    shape: (usize, usize),
    transform: GeoTransform,
    series: Vec<Vec<Observation>>,
}

impl TimeSeriesStack {
    pub fn new(shape: (usize, usize), transform: GeoTransform) -> Self {
        Self {
            shape,
            transform,
            series: vec![Vec::new(); shape.0 * shape.1],
        }
    }

    /// Build a stack from `(pixel, observation)` records in any order.
    ///
    /// Observations are sorted by time per pixel; a repeated timestamp for
    /// the same pixel is rejected.
    pub fn from_records<I>(shape: (usize, usize), transform: GeoTransform, records: I) -> EviResult<Self>
    where
        I: IntoIterator<Item = (PixelId, Observation)>,
    {
        let mut stack = Self::new(shape, transform);
        for (pixel, obs) in records {
            let idx = stack.index_of(pixel)?;
            stack.series[idx].push(obs);
        }
        for (idx, series) in stack.series.iter_mut().enumerate() {
            series.sort_by_key(|o| o.timestamp);
            if let Some(w) = series.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
                return Err(EviError::UpstreamData(format!(
                    "duplicate timestamp {} for pixel index {}",
                    w[0].timestamp, idx
                )));
            }
        }
        Ok(stack)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    pub fn pixel_count(&self) -> usize {
        self.series.len()
    }

    pub fn pixel_at(&self, index: usize) -> PixelId {
        PixelId::new(index / self.shape.1, index % self.shape.1)
    }

    pub fn index_of(&self, pixel: PixelId) -> EviResult<usize> {
        if pixel.row >= self.shape.0 || pixel.col >= self.shape.1 {
            return Err(EviError::UpstreamData(format!(
                "pixel {} outside {}x{} grid",
                pixel, self.shape.0, self.shape.1
            )));
        }
        Ok(pixel.row * self.shape.1 + pixel.col)
    }

    pub fn observations(&self, index: usize) -> &[Observation] {
        &self.series[index]
    }

    pub fn observation_count(&self) -> usize {
        self.series.iter().map(Vec::len).sum()
    }
}

/// Per-pixel categorical land-cover codes for a reference year
#[derive(Debug, Clone)]
pub struct LandCoverMap {
    pub classes: Array2<Option<u8>>,
}

impl LandCoverMap {
    pub fn new(classes: Array2<Option<u8>>) -> Self {
        Self { classes }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.classes.dim()
    }

    pub fn class_at(&self, pixel: PixelId) -> Option<u8> {
        self.classes.get((pixel.row, pixel.col)).copied().flatten()
    }
}

/// Error types for EVI trend processing
#[derive(Debug, thiserror::Error)]
pub enum EviError {
    #[error("Insufficient data: {required} required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Upstream data error: {0}")]
    UpstreamData(String),

    #[error("Batch cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for EVI operations
pub type EviResult<T> = Result<T, EviError>;
