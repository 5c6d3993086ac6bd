//! Delaunay triangulation by incremental Bowyer-Watson insertion.

use std::collections::{HashMap, HashSet};

use super::ScatterPoint;

/// Super-triangle size relative to the point spread
const SUPER_TRIANGLE_SCALE: f64 = 1000.0;

/// Triangle as indices into the input point slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub a: usize,
    pub b: usize,
    pub c: usize,
}

#[derive(Debug, Clone, Copy)]
struct Circumcircle {
    cx: f64,
    cy: f64,
    radius_sq: f64,
}

impl Circumcircle {
    fn of(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> Option<Self> {
        let d = 2.0 * (p.0 * (q.1 - r.1) + q.0 * (r.1 - p.1) + r.0 * (p.1 - q.1));
        if d.abs() < 1e-300 {
            return None;
        }
        let p2 = p.0 * p.0 + p.1 * p.1;
        let q2 = q.0 * q.0 + q.1 * q.1;
        let r2 = r.0 * r.0 + r.1 * r.1;
        let cx = (p2 * (q.1 - r.1) + q2 * (r.1 - p.1) + r2 * (p.1 - q.1)) / d;
        let cy = (p2 * (r.0 - q.0) + q2 * (p.0 - r.0) + r2 * (q.0 - p.0)) / d;
        let radius_sq = (p.0 - cx).powi(2) + (p.1 - cy).powi(2);
        Some(Self { cx, cy, radius_sq })
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        (x - self.cx).powi(2) + (y - self.cy).powi(2) <= self.radius_sq
    }
}

/// Triangulate distinct points. Returns an empty list for fewer than three
/// points or a collinear set.
pub fn triangulate(points: &[ScatterPoint]) -> Vec<Triangle> {
    if points.len() < 3 {
        return Vec::new();
    }

    // Work in coordinates centred on the data to keep circumcircle sums small
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let (mid_x, mid_y) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
    let delta = (max_x - min_x).max(max_y - min_y);
    if delta <= 0.0 {
        return Vec::new();
    }
    let m = SUPER_TRIANGLE_SCALE * delta;

    let n = points.len();
    let mut vertices: Vec<(f64, f64)> = points.iter().map(|p| (p.x - mid_x, p.y - mid_y)).collect();
    vertices.push((-m, -m));
    vertices.push((m, -m));
    vertices.push((0.0, m));

    let mut triangles: Vec<(Triangle, Option<Circumcircle>)> = Vec::new();
    let first = Triangle { a: n, b: n + 1, c: n + 2 };
    triangles.push((first, Circumcircle::of(vertices[n], vertices[n + 1], vertices[n + 2])));

    for i in 0..n {
        let (x, y) = vertices[i];

        // Triangles whose circumcircle holds the new point form the cavity
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        let mut cavity_edges: Vec<(usize, usize)> = Vec::new();
        triangles.retain(|(tri, circle)| {
            let bad = circle.map_or(false, |c| c.contains(x, y));
            if bad {
                for (u, v) in [(tri.a, tri.b), (tri.b, tri.c), (tri.c, tri.a)] {
                    let key = if u < v { (u, v) } else { (v, u) };
                    *edge_count.entry(key).or_insert(0) += 1;
                    cavity_edges.push((u, v));
                }
            }
            !bad
        });

        // Edges used once bound the cavity; fan them to the new vertex
        for (u, v) in cavity_edges {
            let key = if u < v { (u, v) } else { (v, u) };
            if edge_count.get(&key) == Some(&1) {
                let tri = Triangle { a: u, b: v, c: i };
                let circle = Circumcircle::of(vertices[u], vertices[v], vertices[i]);
                triangles.push((tri, circle));
            }
        }
    }

    let mut result: Vec<Triangle> = triangles
        .into_iter()
        .map(|(tri, _)| tri)
        .filter(|t| t.a < n && t.b < n && t.c < n)
        .filter_map(|t| {
            let area2 = cross(vertices[t.a], vertices[t.b], vertices[t.c]);
            if area2.abs() <= 1e-12 * delta * delta {
                None
            } else if area2 > 0.0 {
                Some(t)
            } else {
                Some(Triangle { a: t.a, b: t.c, c: t.b })
            }
        })
        .collect();
    fill_hull_gaps(&vertices[..n], &mut result, delta);
    result
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Close the outer boundary of a counter-clockwise triangulation to its
/// convex hull. A finite super triangle can leave thin gaps along nearly
/// straight stretches of the hull; each reflex boundary vertex is cut off
/// with a new triangle until none remain.
fn fill_hull_gaps(vertices: &[(f64, f64)], triangles: &mut Vec<Triangle>, delta: f64) {
    let directed: HashSet<(usize, usize)> = triangles
        .iter()
        .flat_map(|t| [(t.a, t.b), (t.b, t.c), (t.c, t.a)])
        .collect();
    let mut next: HashMap<usize, usize> = HashMap::new();
    for &(u, v) in directed.iter() {
        if !directed.contains(&(v, u)) && next.insert(u, v).is_some() {
            log::debug!("Triangulation boundary touches itself at vertex {}; leaving it open", u);
            return;
        }
    }
    let mut prev: HashMap<usize, usize> = next.iter().map(|(&u, &v)| (v, u)).collect();
    if prev.len() != next.len() {
        return;
    }

    let eps = 1e-12 * delta * delta;
    let mut added = 0usize;
    loop {
        let mut boundary: Vec<usize> = next.keys().copied().collect();
        boundary.sort_unstable();
        let mut changed = false;
        for b in boundary {
            let (Some(&a), Some(&c)) = (prev.get(&b), next.get(&b)) else {
                continue;
            };
            if a == c || cross(vertices[a], vertices[b], vertices[c]) >= -eps {
                continue;
            }
            let (pa, pb, pc) = (vertices[a], vertices[b], vertices[c]);
            let blocked = (0..vertices.len()).any(|i| {
                i != a
                    && i != b
                    && i != c
                    && cross(pa, pc, vertices[i]) > eps
                    && cross(pc, pb, vertices[i]) > eps
                    && cross(pb, pa, vertices[i]) > eps
            });
            if blocked {
                continue;
            }
            triangles.push(Triangle { a, b: c, c: b });
            next.remove(&b);
            prev.remove(&b);
            next.insert(a, c);
            prev.insert(c, a);
            added += 1;
            changed = true;
        }
        if !changed {
            break;
        }
    }
    if added > 0 {
        log::debug!("Closed {} gaps between triangulation and convex hull", added);
    }
}

/// Barycentric weights of (x, y) with respect to triangle (p, q, r).
/// `None` for a zero-area triangle.
pub fn barycentric(
    x: f64,
    y: f64,
    p: &ScatterPoint,
    q: &ScatterPoint,
    r: &ScatterPoint,
) -> Option<(f64, f64, f64)> {
    let det = (q.y - r.y) * (p.x - r.x) + (r.x - q.x) * (p.y - r.y);
    if det == 0.0 {
        return None;
    }
    let u = ((q.y - r.y) * (x - r.x) + (r.x - q.x) * (y - r.y)) / det;
    let v = ((r.y - p.y) * (x - r.x) + (p.x - r.x) * (y - r.y)) / det;
    Some((u, v, 1.0 - u - v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_area(points: &[ScatterPoint], tris: &[Triangle]) -> f64 {
        tris.iter()
            .map(|t| {
                let (p, q, r) = (&points[t.a], &points[t.b], &points[t.c]);
                ((q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)).abs() / 2.0
            })
            .sum()
    }

    #[test]
    fn test_square_gives_two_triangles() {
        let pts = vec![
            ScatterPoint::new(0.0, 0.0, 0.0),
            ScatterPoint::new(1.0, 0.0, 0.0),
            ScatterPoint::new(1.0, 1.0, 0.0),
            ScatterPoint::new(0.0, 1.0, 0.0),
        ];
        let tris = triangulate(&pts);
        assert_eq!(tris.len(), 2);
        assert!((total_area(&pts, &tris) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_triangles_tile_the_hull() {
        let mut pts = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                let jitter = ((i * 7 + j * 3) % 5) as f64 * 0.01;
                pts.push(ScatterPoint::new(i as f64 + jitter, j as f64 - jitter, 0.0));
            }
        }
        let tris = triangulate(&pts);
        let hull = super::super::hull::convex_hull(&pts);
        let hull_area = super::super::hull::polygon_area(&hull);
        assert!((total_area(&pts, &tris) - hull_area).abs() < 1e-6);
    }

    #[test]
    fn test_nearly_straight_hull_edge_is_covered() {
        let mut pts: Vec<ScatterPoint> = (0..=10)
            .map(|i| ScatterPoint::new(i as f64 / 10.0, if i % 2 == 1 { 1e-7 } else { 0.0 }, 0.0))
            .collect();
        pts.push(ScatterPoint::new(0.5, 1.0, 0.0));
        let tris = triangulate(&pts);
        let hull = super::super::hull::convex_hull(&pts);
        let hull_area = super::super::hull::polygon_area(&hull);
        assert!((total_area(&pts, &tris) - hull_area).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_has_no_triangles() {
        let pts: Vec<ScatterPoint> = (0..4).map(|i| ScatterPoint::new(i as f64, i as f64, 0.0)).collect();
        assert!(triangulate(&pts).is_empty());
    }

    #[test]
    fn test_barycentric_reproduces_plane() {
        let p = ScatterPoint::new(0.0, 0.0, 1.0);
        let q = ScatterPoint::new(4.0, 0.0, 5.0);
        let r = ScatterPoint::new(0.0, 2.0, 3.0);
        let (u, v, w) = barycentric(1.0, 1.0, &p, &q, &r).unwrap();
        let value = u * p.value + v * q.value + w * r.value;
        // plane z = 1 + x + y
        assert!((value - 3.0).abs() < 1e-12);
        assert!(u >= 0.0 && v >= 0.0 && w >= 0.0);
    }
}
