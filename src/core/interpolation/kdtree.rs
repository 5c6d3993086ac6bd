//! 2D k-d tree for nearest-sample lookups during extrapolation.

use std::cmp::Ordering;

use super::ScatterPoint;

#[derive(Debug)]
struct Node {
    point: usize,
    /// 0 splits on longitude, 1 on latitude
    axis: u8,
    left: Option<usize>,
    right: Option<usize>,
}

/// Nearest-neighbour index over scattered points
#[derive(Debug)]
pub struct KdTree<'a> {
    points: &'a [ScatterPoint],
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl<'a> KdTree<'a> {
    /// Median-split construction, O(n log² n)
    pub fn build(points: &'a [ScatterPoint]) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let root = build_subtree(points, &mut order, 0, &mut nodes);
        Self { points, nodes, root }
    }

    /// Index of the point closest to (x, y); `None` for an empty tree
    pub fn nearest(&self, x: f64, y: f64) -> Option<usize> {
        let root = self.root?;
        let mut best = (f64::INFINITY, self.nodes[root].point);
        self.search(root, x, y, &mut best);
        Some(best.1)
    }

    fn search(&self, node_idx: usize, x: f64, y: f64, best: &mut (f64, usize)) {
        let node = &self.nodes[node_idx];
        let p = &self.points[node.point];
        let d = p.dist_sq(x, y);
        // ties resolve to the lowest input index so results do not depend on tree shape
        if d < best.0 || (d == best.0 && node.point < best.1) {
            *best = (d, node.point);
        }

        let diff = if node.axis == 0 { x - p.x } else { y - p.y };
        let (near, far) = if diff < 0.0 { (node.left, node.right) } else { (node.right, node.left) };

        if let Some(child) = near {
            self.search(child, x, y, best);
        }
        if diff * diff <= best.0 {
            if let Some(child) = far {
                self.search(child, x, y, best);
            }
        }
    }
}

fn build_subtree(
    points: &[ScatterPoint],
    order: &mut [usize],
    depth: usize,
    nodes: &mut Vec<Node>,
) -> Option<usize> {
    if order.is_empty() {
        return None;
    }
    let axis = (depth % 2) as u8;
    let key = |i: usize| if axis == 0 { points[i].x } else { points[i].y };
    order.sort_by(|&a, &b| key(a).partial_cmp(&key(b)).unwrap_or(Ordering::Equal));

    let median = order.len() / 2;
    let idx = nodes.len();
    nodes.push(Node { point: order[median], axis, left: None, right: None });

    let (lower, rest) = order.split_at_mut(median);
    let left = build_subtree(points, lower, depth + 1, nodes);
    let right = build_subtree(points, &mut rest[1..], depth + 1, nodes);
    nodes[idx].left = left;
    nodes[idx].right = right;
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(points: &[ScatterPoint], x: f64, y: f64) -> usize {
        let mut best = (f64::INFINITY, 0);
        for (i, p) in points.iter().enumerate() {
            let d = p.dist_sq(x, y);
            if d < best.0 {
                best = (d, i);
            }
        }
        best.1
    }

    #[test]
    fn test_matches_brute_force() {
        let points: Vec<ScatterPoint> = (0..60)
            .map(|i| {
                let f = i as f64;
                ScatterPoint::new((f * 7.31).sin() * 10.0, (f * 3.17).cos() * 10.0, f)
            })
            .collect();
        let tree = KdTree::build(&points);
        for qi in 0..40 {
            let q = qi as f64 * 0.53 - 10.0;
            let (x, y) = (q, -q * 0.7 + 1.3);
            let got = tree.nearest(x, y).unwrap();
            let want = brute_force(&points, x, y);
            assert_eq!(points[got].dist_sq(x, y), points[want].dist_sq(x, y));
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::build(&[]);
        assert!(tree.nearest(0.0, 0.0).is_none());
    }
}
