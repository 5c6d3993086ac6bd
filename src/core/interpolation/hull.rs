//! Convex hull of scattered sample locations (Andrew's monotone chain).

use super::ScatterPoint;

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Hull vertices in counter-clockwise order without repeating the first
/// vertex. Collinear boundary points are dropped, so a collinear input
/// yields at most two vertices.
pub fn convex_hull(points: &[ScatterPoint]) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
    pts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(pts.len() * 2);
    for &p in pts.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Shoelace area of a simple polygon
pub fn polygon_area(ring: &[(f64, f64)]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[(i + 1) % ring.len()]);
        twice += a.0 * b.1 - b.0 * a.1;
    }
    twice.abs() / 2.0
}

/// Whether (x, y) lies inside or on a counter-clockwise convex ring
pub fn hull_contains(hull: &[(f64, f64)], x: f64, y: f64, tolerance: f64) -> bool {
    if hull.len() < 3 {
        return false;
    }
    (0..hull.len()).all(|i| {
        let (a, b) = (hull[i], hull[(i + 1) % hull.len()]);
        let edge_len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
        cross(a, b, (x, y)) >= -tolerance * edge_len
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_with_interior_point() {
        let pts = vec![
            ScatterPoint::new(0.0, 0.0, 0.0),
            ScatterPoint::new(1.0, 0.0, 0.0),
            ScatterPoint::new(1.0, 1.0, 0.0),
            ScatterPoint::new(0.0, 1.0, 0.0),
            ScatterPoint::new(0.5, 0.5, 0.0),
            ScatterPoint::new(0.5, 0.0, 0.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!((polygon_area(&hull) - 1.0).abs() < 1e-12);
        assert!(hull_contains(&hull, 0.5, 0.5, 0.0));
        assert!(hull_contains(&hull, 1.0, 0.5, 1e-12));
        assert!(!hull_contains(&hull, 1.1, 0.5, 1e-12));
    }

    #[test]
    fn test_collinear_points_collapse() {
        let pts: Vec<ScatterPoint> = (0..5).map(|i| ScatterPoint::new(i as f64, 2.0 * i as f64, 1.0)).collect();
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 2);
        assert_eq!(polygon_area(&hull), 0.0);
    }
}
