//! Scattered-sample interpolation onto a dense longitude/latitude grid.
//!
//! Cells inside the convex hull of the samples get piecewise-linear values
//! from a Delaunay triangulation; all other cells take the value of the
//! nearest sample. With fewer than three non-collinear sample locations the
//! whole grid is filled by nearest-neighbour assignment.

mod delaunay;
mod hull;
mod kdtree;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::maybe_rayon::*;
use crate::types::{BoundingBox, EviError, EviResult, GeoPoint};

pub use delaunay::{barycentric, triangulate, Triangle};
pub use hull::{convex_hull, hull_contains, polygon_area};
pub use kdtree::KdTree;

/// A scattered sample: longitude, latitude and value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl ScatterPoint {
    pub fn new(lon: f64, lat: f64, value: f64) -> Self {
        Self { x: lon, y: lat, value }
    }

    #[inline]
    pub fn dist_sq(&self, x: f64, y: f64) -> f64 {
        let dx = self.x - x;
        let dy = self.y - y;
        dx * dx + dy * dy
    }
}

/// Interpolation grid parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationParams {
    /// Grid columns (longitude direction)
    pub numcols: usize,
    /// Grid rows (latitude direction)
    pub numrows: usize,
    /// Inflation of the sample extent around its centre
    pub zoom_out_factor: f64,
    /// Explicit grid extent, overriding the zoom-out extent
    pub bounds: Option<BoundingBox>,
    /// Smallest half-extent used when samples share a longitude or latitude
    pub min_half_span: f64,
    /// Upper bound on numcols * numrows
    pub max_cells: usize,
    /// Fail with `DegenerateGeometry` instead of falling back to nearest
    pub strict_geometry: bool,
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            numcols: 500,
            numrows: 500,
            zoom_out_factor: 5.0,
            bounds: None,
            min_half_span: 0.01,
            max_cells: 4_000_000,
            strict_geometry: false,
        }
    }
}

impl InterpolationParams {
    pub fn validate(&self) -> EviResult<()> {
        if self.numcols == 0 || self.numrows == 0 {
            return Err(EviError::InvalidConfiguration(format!(
                "grid resolution must be positive, got {}x{}",
                self.numcols, self.numrows
            )));
        }
        let cells = self.numcols.checked_mul(self.numrows).unwrap_or(usize::MAX);
        if cells > self.max_cells {
            return Err(EviError::InvalidConfiguration(format!(
                "grid of {} cells exceeds the cap of {}",
                cells, self.max_cells
            )));
        }
        if !self.zoom_out_factor.is_finite() || self.zoom_out_factor <= 0.0 {
            return Err(EviError::InvalidConfiguration(format!(
                "zoom-out factor must be positive, got {}",
                self.zoom_out_factor
            )));
        }
        if !self.min_half_span.is_finite() || self.min_half_span <= 0.0 {
            return Err(EviError::InvalidConfiguration(
                "minimum half span must be positive".to_string(),
            ));
        }
        if let Some(b) = &self.bounds {
            if !(b.min_lon < b.max_lon && b.min_lat < b.max_lat) {
                return Err(EviError::InvalidConfiguration(format!("empty grid bounds {:?}", b)));
            }
        }
        Ok(())
    }
}

/// How the grid values were produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InterpolationMethod {
    /// Linear inside the hull, nearest outside
    LinearWithNearest,
    /// Nearest everywhere because the samples span no area
    NearestOnly { reason: String },
}

/// Dense interpolated surface. Row 0 is the southern edge, column 0 the western edge.
#[derive(Debug, Clone)]
pub struct InterpolationGrid {
    pub bounds: BoundingBox,
    pub values: Array2<f64>,
    /// Cells whose value came from the triangulation
    pub linear_mask: Array2<bool>,
    pub method: InterpolationMethod,
}

impl InterpolationGrid {
    pub fn numrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn numcols(&self) -> usize {
        self.values.ncols()
    }

    pub fn lon_at(&self, col: usize) -> f64 {
        linspace_at(self.bounds.min_lon, self.bounds.max_lon, self.numcols(), col)
    }

    pub fn lat_at(&self, row: usize) -> f64 {
        linspace_at(self.bounds.min_lat, self.bounds.max_lat, self.numrows(), row)
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self.method, InterpolationMethod::NearestOnly { .. })
    }

    /// Minimum and maximum over all cells
    pub fn value_range(&self) -> (f64, f64) {
        self.values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }
}

fn linspace_at(start: f64, end: f64, n: usize, i: usize) -> f64 {
    if n <= 1 {
        start
    } else {
        start + (end - start) * i as f64 / (n - 1) as f64
    }
}

/// `count` evenly spaced levels from the minimum to the maximum of `values`
pub fn contour_levels(values: &[f64], count: usize) -> EviResult<Vec<f64>> {
    if count < 2 {
        return Err(EviError::InvalidConfiguration(format!(
            "need at least 2 contour levels, got {}",
            count
        )));
    }
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return Err(EviError::InsufficientData { required: 1, available: 0 });
    }
    Ok((0..count).map(|i| linspace_at(lo, hi, count, i)).collect())
}

/// Convex-hull linear interpolation with nearest-neighbour extrapolation
#[derive(Debug, Clone)]
pub struct SpatialInterpolator {
    params: InterpolationParams,
}

impl SpatialInterpolator {
    /// Create a new interpolator
    pub fn new(params: InterpolationParams) -> EviResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &InterpolationParams {
        &self.params
    }

    /// Grid extent: explicit bounds, or the sample extent inflated by
    /// `zoom_out_factor` about its centre
    pub fn grid_bounds(&self, points: &[ScatterPoint]) -> EviResult<BoundingBox> {
        if let Some(b) = self.params.bounds {
            return Ok(b);
        }
        let extent = BoundingBox::enclosing(points.iter().map(|p| GeoPoint::new(p.x, p.y)))
            .ok_or(EviError::InsufficientData { required: 1, available: 0 })?;
        let center = extent.center();
        let half_lon = ((extent.max_lon - extent.min_lon) * self.params.zoom_out_factor / 2.0)
            .max(self.params.min_half_span);
        let half_lat = ((extent.max_lat - extent.min_lat) * self.params.zoom_out_factor / 2.0)
            .max(self.params.min_half_span);
        Ok(BoundingBox {
            min_lon: center.longitude - half_lon,
            max_lon: center.longitude + half_lon,
            min_lat: center.latitude - half_lat,
            max_lat: center.latitude + half_lat,
        })
    }

    pub fn interpolate(&self, points: &[ScatterPoint]) -> EviResult<InterpolationGrid> {
        let finite: Vec<ScatterPoint> = points
            .iter()
            .filter(|p| p.x.is_finite() && p.y.is_finite() && p.value.is_finite())
            .copied()
            .collect();
        if finite.len() < points.len() {
            log::warn!("Ignoring {} samples with non-finite location or value", points.len() - finite.len());
        }
        if finite.is_empty() {
            return Err(EviError::InsufficientData { required: 1, available: 0 });
        }

        let samples = merge_coincident(finite);
        let bounds = self.grid_bounds(&samples)?;
        let (numrows, numcols) = (self.params.numrows, self.params.numcols);

        log::info!(
            "Interpolating {} samples onto {}x{} grid over lon [{:.4}, {:.4}] lat [{:.4}, {:.4}]",
            samples.len(),
            numcols,
            numrows,
            bounds.min_lon,
            bounds.max_lon,
            bounds.min_lat,
            bounds.max_lat
        );

        let lons: Vec<f64> = (0..numcols).map(|c| linspace_at(bounds.min_lon, bounds.max_lon, numcols, c)).collect();
        let lats: Vec<f64> = (0..numrows).map(|r| linspace_at(bounds.min_lat, bounds.max_lat, numrows, r)).collect();

        let nearest = nearest_surface(&samples, &lons, &lats);

        let degeneracy = self.check_geometry(&samples);
        let (linear, method) = match degeneracy {
            Some(reason) => {
                if self.params.strict_geometry {
                    return Err(EviError::DegenerateGeometry(reason));
                }
                log::warn!("Degenerate sample geometry ({}); using nearest-neighbour for the whole grid", reason);
                (Array2::from_elem((numrows, numcols), f64::NAN), InterpolationMethod::NearestOnly { reason })
            }
            None => {
                let triangles = triangulate(&samples);
                if triangles.is_empty() {
                    let reason = "triangulation produced no triangles".to_string();
                    if self.params.strict_geometry {
                        return Err(EviError::DegenerateGeometry(reason));
                    }
                    log::warn!("{}; using nearest-neighbour for the whole grid", reason);
                    (Array2::from_elem((numrows, numcols), f64::NAN), InterpolationMethod::NearestOnly { reason })
                } else {
                    log::debug!("Delaunay triangulation: {} triangles", triangles.len());
                    (linear_surface(&samples, &triangles, &lons, &lats), InterpolationMethod::LinearWithNearest)
                }
            }
        };

        let linear_mask = linear.map(|v| !v.is_nan());
        let mut values = linear;
        values.zip_mut_with(&nearest, |v, &n| {
            if v.is_nan() {
                *v = n;
            }
        });

        let linear_cells = linear_mask.iter().filter(|&&m| m).count();
        log::info!(
            "Interpolation complete: {} linear cells, {} extrapolated",
            linear_cells,
            numrows * numcols - linear_cells
        );

        Ok(InterpolationGrid { bounds, values, linear_mask, method })
    }

    /// Reason the samples cannot support a triangulation, if any
    fn check_geometry(&self, samples: &[ScatterPoint]) -> Option<String> {
        if samples.len() < 3 {
            return Some(format!("{} distinct sample location(s), need 3", samples.len()));
        }
        let hull = convex_hull(samples);
        if hull.len() < 3 {
            return Some("all sample locations are collinear".to_string());
        }
        let extent = BoundingBox::enclosing(samples.iter().map(|p| GeoPoint::new(p.x, p.y)))?;
        let span = (extent.max_lon - extent.min_lon).max(extent.max_lat - extent.min_lat);
        if polygon_area(&hull) <= 1e-10 * span * span {
            return Some("sample locations are nearly collinear".to_string());
        }
        None
    }
}

/// Average the values of samples sharing an identical location
fn merge_coincident(mut points: Vec<ScatterPoint>) -> Vec<ScatterPoint> {
    points.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    let mut merged: Vec<(ScatterPoint, usize)> = Vec::with_capacity(points.len());
    for p in points {
        match merged.last_mut() {
            Some((q, n)) if q.x == p.x && q.y == p.y => {
                q.value += p.value;
                *n += 1;
            }
            _ => merged.push((p, 1)),
        }
    }
    let before = merged.iter().map(|(_, n)| n).sum::<usize>();
    if before > merged.len() {
        log::debug!("Merged {} coincident samples", before - merged.len());
    }
    merged
        .into_iter()
        .map(|(mut p, n)| {
            p.value /= n as f64;
            p
        })
        .collect()
}

fn nearest_surface(samples: &[ScatterPoint], lons: &[f64], lats: &[f64]) -> Array2<f64> {
    let tree = KdTree::build(samples);
    let rows: Vec<Vec<f64>> = (0..lats.len())
        .into_par_iter()
        .map(|r| {
            lons.iter()
                .map(|&lon| tree.nearest(lon, lats[r]).map_or(f64::NAN, |i| samples[i].value))
                .collect()
        })
        .collect();
    Array2::from_shape_fn((lats.len(), lons.len()), |(r, c)| rows[r][c])
}

/// Rasterise each triangle over the grid cells inside its bounding box
fn linear_surface(samples: &[ScatterPoint], triangles: &[Triangle], lons: &[f64], lats: &[f64]) -> Array2<f64> {
    let mut grid = Array2::from_elem((lats.len(), lons.len()), f64::NAN);
    for tri in triangles {
        let (p, q, r) = (&samples[tri.a], &samples[tri.b], &samples[tri.c]);
        let min_x = p.x.min(q.x).min(r.x);
        let max_x = p.x.max(q.x).max(r.x);
        let min_y = p.y.min(q.y).min(r.y);
        let max_y = p.y.max(q.y).max(r.y);
        let tol = 1e-9 * (max_x - min_x).max(max_y - min_y);

        let cols = index_range(lons, min_x - tol, max_x + tol);
        let rows = index_range(lats, min_y - tol, max_y + tol);
        for row in rows {
            for col in cols.clone() {
                if !grid[[row, col]].is_nan() {
                    continue;
                }
                if let Some((u, v, w)) = barycentric(lons[col], lats[row], p, q, r) {
                    const EPS: f64 = -1e-9;
                    if u >= EPS && v >= EPS && w >= EPS {
                        grid[[row, col]] = u * p.value + v * q.value + w * r.value;
                    }
                }
            }
        }
    }
    grid
}

/// Indices of the ascending `axis` values that fall within [lo, hi]
fn index_range(axis: &[f64], lo: f64, hi: f64) -> std::ops::Range<usize> {
    let start = axis.partition_point(|&v| v < lo);
    let end = axis.partition_point(|&v| v <= hi);
    start..end.max(start)
}
