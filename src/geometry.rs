//! Planar geometry kernel for detection post-processing: convex hull,
//! minimum-area rectangles, point-in-polygon and polygon offsetting.

use float_ord::FloatOrd;
use geo::Coord;

const EPSILON: f32 = 1e-4;

fn sub(a: Coord<f32>, b: Coord<f32>) -> Coord<f32> {
    Coord {
        x: a.x - b.x,
        y: a.y - b.y,
    }
}

fn dot(a: Coord<f32>, b: Coord<f32>) -> f32 {
    a.x * b.x + a.y * b.y
}

fn norm(a: Coord<f32>) -> f32 {
    dot(a, a).sqrt()
}

fn cross(o: Coord<f32>, a: Coord<f32>, b: Coord<f32>) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain. Collinear points are dropped and the first point
/// is not repeated at the end.
pub fn convex_hull(points: &[Coord<f32>]) -> Vec<Coord<f32>> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| (FloatOrd(p.x), FloatOrd(p.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<Coord<f32>> = Vec::with_capacity(sorted.len() * 2);
    for &p in sorted.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [Coord<f32>; 4],
    pub width: f32,
    pub height: f32,
}

impl RotatedRect {
    pub fn short_side(&self) -> f32 {
        self.width.min(self.height)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Smallest enclosing rectangle at any rotation, found by testing each hull
/// edge direction. `None` when the points do not span an area.
pub fn min_area_rect(points: &[Coord<f32>]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }

    let mut best: Option<(f32, [Coord<f32>; 4], f32, f32)> = None;
    for i in 0..hull.len() {
        let edge = sub(hull[(i + 1) % hull.len()], hull[i]);
        let length = norm(edge);
        if length < EPSILON {
            continue;
        }
        let u = Coord {
            x: edge.x / length,
            y: edge.y / length,
        };
        let v = Coord { x: -u.y, y: u.x };

        let (mut min_u, mut max_u) = (f32::INFINITY, f32::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f32::INFINITY, f32::NEG_INFINITY);
        for &p in &hull {
            let pu = dot(p, u);
            let pv = dot(p, v);
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;
        if best.as_ref().map_or(true, |(best_area, ..)| area < *best_area) {
            let corner = |a: f32, b: f32| Coord {
                x: a * u.x + b * v.x,
                y: a * u.y + b * v.y,
            };
            let corners = [
                corner(min_u, min_v),
                corner(max_u, min_v),
                corner(max_u, max_v),
                corner(min_u, max_v),
            ];
            best = Some((area, corners, width, height));
        }
    }

    let (_, corners, width, height) = best?;
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    Some(RotatedRect {
        corners: order_corners(corners),
        width,
        height,
    })
}

/// Sorts by x, then splits each x-sorted pair by y into top and bottom.
pub fn order_corners(mut points: [Coord<f32>; 4]) -> [Coord<f32>; 4] {
    points.sort_by_key(|p| FloatOrd(p.x));
    let (top_left, bottom_left) = if points[1].y > points[0].y {
        (points[0], points[1])
    } else {
        (points[1], points[0])
    };
    let (top_right, bottom_right) = if points[3].y > points[2].y {
        (points[2], points[3])
    } else {
        (points[3], points[2])
    };
    [top_left, top_right, bottom_right, bottom_left]
}

/// Shoelace area; positive for clockwise order in image coordinates.
pub fn signed_area(polygon: &[Coord<f32>]) -> f32 {
    let n = polygon.len();
    (0..n)
        .map(|i| {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum::<f32>()
        / 2.0
}

pub fn polygon_area(polygon: &[Coord<f32>]) -> f32 {
    signed_area(polygon).abs()
}

pub fn polygon_perimeter(polygon: &[Coord<f32>]) -> f32 {
    let n = polygon.len();
    (0..n)
        .map(|i| norm(sub(polygon[(i + 1) % n], polygon[i])))
        .sum()
}

fn on_segment(p: Coord<f32>, a: Coord<f32>, b: Coord<f32>) -> bool {
    let length = norm(sub(b, a));
    if length < EPSILON {
        return norm(sub(p, a)) < EPSILON;
    }
    cross(a, b, p).abs() / length < EPSILON
        && p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

pub(crate) fn on_boundary(p: Coord<f32>, polygon: &[Coord<f32>]) -> bool {
    let n = polygon.len();
    (0..n).any(|i| on_segment(p, polygon[i], polygon[(i + 1) % n]))
}

/// X positions where the horizontal line through `y` crosses polygon edges,
/// using the half-open rule of the even-odd ray test.
pub(crate) fn scanline_crossings(y: f32, polygon: &[Coord<f32>]) -> Vec<f32> {
    let n = polygon.len();
    let mut crossings = Vec::new();
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + n - 1) % n];
        if (a.y > y) != (b.y > y) {
            crossings.push((b.x - a.x) * (y - a.y) / (b.y - a.y) + a.x);
        }
    }
    crossings
}

/// Ray-casting test; points on an edge count as inside.
pub fn point_in_polygon(p: Coord<f32>, polygon: &[Coord<f32>]) -> bool {
    if on_boundary(p, polygon) {
        return true;
    }
    scanline_crossings(p.y, polygon)
        .into_iter()
        .filter(|&x| p.x < x)
        .count()
        % 2
        == 1
}

/// Moves every vertex outward along the bisector of its two edge normals by
/// `area * unclip_ratio / perimeter`. Vertices whose edges or bisector are
/// degenerate stay where they are.
pub fn unclip(polygon: &[Coord<f32>], unclip_ratio: f32) -> Vec<Coord<f32>> {
    let perimeter = polygon_perimeter(polygon);
    let area = signed_area(polygon);
    if perimeter < EPSILON || area.abs() < EPSILON {
        return polygon.to_vec();
    }
    let distance = area.abs() * unclip_ratio / perimeter;
    let orientation = area.signum();

    let outward_normal = |from: Coord<f32>, to: Coord<f32>| -> Option<Coord<f32>> {
        let edge = sub(to, from);
        let length = norm(edge);
        (length >= EPSILON).then(|| Coord {
            x: orientation * edge.y / length,
            y: -orientation * edge.x / length,
        })
    };

    let n = polygon.len();
    (0..n)
        .map(|i| {
            let prev = polygon[(i + n - 1) % n];
            let current = polygon[i];
            let next = polygon[(i + 1) % n];
            let (Some(n1), Some(n2)) = (outward_normal(prev, current), outward_normal(current, next))
            else {
                return current;
            };
            let bisector = Coord {
                x: n1.x + n2.x,
                y: n1.y + n2.y,
            };
            let length = norm(bisector);
            if length < EPSILON {
                return current;
            }
            Coord {
                x: current.x + bisector.x / length * distance,
                y: current.y + bisector.y / length * distance,
            }
        })
        .collect()
}
