//! Planar polygons used for overlap rebinning.
//!
//! Input cells are mapped into output space as [`Quadrilateral`]s and clipped
//! against axis-aligned output cells ([`Rect`]) with the Sutherland–Hodgman
//! algorithm. Areas use the shoelace formula and are orientation independent.

use std::ops::Index;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point in output coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct V2 {
    pub x: f64,
    pub y: f64,
}

impl V2 {
    /// Creates a point.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// True when both coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned rectangle `[x_min, x_max] × [y_min, y_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rect {
    /// Creates a rectangle.
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Area of the rectangle.
    pub fn area(&self) -> f64 {
        (self.x_max - self.x_min) * (self.y_max - self.y_min)
    }
}

/// Four vertices ordered lower-left, lower-right, upper-right, upper-left.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quadrilateral {
    vertices: [V2; 4],
}

impl Quadrilateral {
    /// Creates a quadrilateral from its corners.
    pub fn new(lower_left: V2, lower_right: V2, upper_right: V2, upper_left: V2) -> Self {
        Self {
            vertices: [lower_left, lower_right, upper_right, upper_left],
        }
    }

    /// Axis-aligned quadrilateral covering `rect`.
    pub fn from_rect(rect: Rect) -> Self {
        Self::new(
            V2::new(rect.x_min, rect.y_min),
            V2::new(rect.x_max, rect.y_min),
            V2::new(rect.x_max, rect.y_max),
            V2::new(rect.x_min, rect.y_max),
        )
    }

    /// The vertices in storage order.
    pub fn vertices(&self) -> &[V2; 4] {
        &self.vertices
    }

    /// True when every vertex is finite.
    pub fn is_finite(&self) -> bool {
        self.vertices.iter().all(V2::is_finite)
    }

    /// Enclosed area.
    pub fn area(&self) -> f64 {
        polygon_area(&self.vertices)
    }

    /// Smallest rectangle containing the quadrilateral.
    pub fn bounding_box(&self) -> Rect {
        let mut rect = Rect::new(
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
        );
        for v in &self.vertices {
            rect.x_min = rect.x_min.min(v.x);
            rect.x_max = rect.x_max.max(v.x);
            rect.y_min = rect.y_min.min(v.y);
            rect.y_max = rect.y_max.max(v.y);
        }
        rect
    }

    /// Moves every vertex one slot along, so the old upper-left corner
    /// becomes vertex 0.
    #[must_use]
    pub fn shift_vertices_clockwise(&self) -> Self {
        let [a, b, c, d] = self.vertices;
        Self {
            vertices: [d, a, b, c],
        }
    }

    /// Same polygon traversed in the opposite direction, starting at vertex 0.
    #[must_use]
    fn reversed(&self) -> Self {
        let [a, b, c, d] = self.vertices;
        Self {
            vertices: [a, d, c, b],
        }
    }

    /// True when vertex 0 is the lower-left corner:
    /// `v0.x <= v3.x && v0.y <= v1.y`.
    pub fn is_canonical(&self) -> bool {
        let v = &self.vertices;
        v[0].x <= v[3].x && v[0].y <= v[1].y
    }
}

impl Index<usize> for Quadrilateral {
    type Output = V2;

    fn index(&self, index: usize) -> &V2 {
        &self.vertices[index]
    }
}

/// Rotates the vertex order until vertex 0 is the lower-left corner.
///
/// At most four rotations are tried in each traversal direction. Shapes for
/// which neither direction satisfies [`Quadrilateral::is_canonical`] (and
/// non-finite shapes) are returned starting from their lowest-leftmost
/// vertex; the polygon itself is never altered, only its vertex order.
pub fn normalize_winding(quad: Quadrilateral) -> Quadrilateral {
    for candidate in [quad, quad.reversed()] {
        let mut current = candidate;
        for _ in 0..4 {
            if current.is_canonical() {
                return current;
            }
            current = current.shift_vertices_clockwise();
        }
    }

    let mut best = quad;
    let mut current = quad;
    for _ in 0..4 {
        current = current.shift_vertices_clockwise();
        let (c, b) = (current[0], best[0]);
        if c.x + c.y < b.x + b.y {
            best = current;
        }
    }
    best
}

/// Area enclosed by a simple polygon (shoelace formula).
pub fn polygon_area(vertices: &[V2]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    let mut prev = vertices[vertices.len() - 1];
    for &v in vertices {
        twice += prev.x * v.y - v.x * prev.y;
        prev = v;
    }
    0.5 * twice.abs()
}

/// Reusable buffers for [`overlap_area`].
#[derive(Debug, Default)]
pub struct ClipBuffers {
    a: Vec<V2>,
    b: Vec<V2>,
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Bottom(f64),
    Top(f64),
}

impl Edge {
    #[inline]
    fn inside(self, p: V2) -> bool {
        match self {
            Edge::Left(x) => p.x >= x,
            Edge::Right(x) => p.x <= x,
            Edge::Bottom(y) => p.y >= y,
            Edge::Top(y) => p.y <= y,
        }
    }

    #[inline]
    fn intersect(self, p: V2, q: V2) -> V2 {
        match self {
            Edge::Left(x) | Edge::Right(x) => {
                let t = (x - p.x) / (q.x - p.x);
                V2::new(x, p.y + t * (q.y - p.y))
            }
            Edge::Bottom(y) | Edge::Top(y) => {
                let t = (y - p.y) / (q.y - p.y);
                V2::new(p.x + t * (q.x - p.x), y)
            }
        }
    }
}

fn clip_edge(input: &[V2], edge: Edge, output: &mut Vec<V2>) {
    output.clear();
    let Some(&last) = input.last() else {
        return;
    };
    let mut prev = last;
    for &curr in input {
        match (edge.inside(prev), edge.inside(curr)) {
            (true, true) => output.push(curr),
            (true, false) => output.push(edge.intersect(prev, curr)),
            (false, true) => {
                output.push(edge.intersect(prev, curr));
                output.push(curr);
            }
            (false, false) => {}
        }
        prev = curr;
    }
}

/// Clips `polygon` against `rect`, leaving the result in `buffers`.
pub fn clip_to_rect<'a>(polygon: &[V2], rect: &Rect, buffers: &'a mut ClipBuffers) -> &'a [V2] {
    buffers.a.clear();
    buffers.a.extend_from_slice(polygon);
    for edge in [
        Edge::Left(rect.x_min),
        Edge::Right(rect.x_max),
        Edge::Bottom(rect.y_min),
        Edge::Top(rect.y_max),
    ] {
        clip_edge(&buffers.a, edge, &mut buffers.b);
        std::mem::swap(&mut buffers.a, &mut buffers.b);
        if buffers.a.is_empty() {
            break;
        }
    }
    &buffers.a
}

/// Area of the intersection between `quad` and `rect`.
pub fn overlap_area(quad: &Quadrilateral, rect: &Rect, buffers: &mut ClipBuffers) -> f64 {
    polygon_area(clip_to_rect(quad.vertices(), rect, buffers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit_square() -> Quadrilateral {
        Quadrilateral::from_rect(Rect::new(0.0, 1.0, 0.0, 1.0))
    }

    #[test]
    fn test_area_orientation_independent() {
        let quad = unit_square();
        assert_abs_diff_eq!(quad.area(), 1.0);
        let [a, b, c, d] = *quad.vertices();
        assert_abs_diff_eq!(polygon_area(&[a, d, c, b]), 1.0);
        assert_abs_diff_eq!(polygon_area(&[a, b]), 0.0);
    }

    #[test]
    fn test_overlap_partial() {
        let quad = unit_square();
        let mut buffers = ClipBuffers::default();
        let rect = Rect::new(0.5, 2.0, 0.25, 0.75);
        assert_abs_diff_eq!(overlap_area(&quad, &rect, &mut buffers), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_overlap_disjoint_and_contained() {
        let quad = unit_square();
        let mut buffers = ClipBuffers::default();
        let far = Rect::new(2.0, 3.0, 2.0, 3.0);
        assert_abs_diff_eq!(overlap_area(&quad, &far, &mut buffers), 0.0);
        let around = Rect::new(-1.0, 2.0, -1.0, 2.0);
        assert_abs_diff_eq!(overlap_area(&quad, &around, &mut buffers), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_overlap_diamond() {
        // Diamond of area 2 centred on the origin; each quadrant holds 1/4.
        let diamond = Quadrilateral::new(
            V2::new(0.0, -1.0),
            V2::new(1.0, 0.0),
            V2::new(0.0, 1.0),
            V2::new(-1.0, 0.0),
        );
        let mut buffers = ClipBuffers::default();
        let quadrant = Rect::new(0.0, 5.0, 0.0, 5.0);
        assert_abs_diff_eq!(diamond.area(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            overlap_area(&diamond, &quadrant, &mut buffers),
            0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_shift_vertices_clockwise() {
        let quad = unit_square();
        let shifted = quad.shift_vertices_clockwise();
        assert_eq!(shifted[0], quad[3]);
        assert_eq!(shifted[1], quad[0]);
        let back = (0..3).fold(shifted, |q, _| q.shift_vertices_clockwise());
        assert_eq!(back, quad);
    }

    #[test]
    fn test_normalize_winding_all_rotations() {
        let quad = Quadrilateral::new(
            V2::new(0.0, 0.0),
            V2::new(2.0, 0.1),
            V2::new(2.2, 1.0),
            V2::new(0.1, 1.2),
        );
        let mut rotated = quad;
        for _ in 0..4 {
            let normalized = normalize_winding(rotated);
            assert!(normalized.is_canonical());
            assert_eq!(normalized[0], V2::new(0.0, 0.0));
            assert_abs_diff_eq!(normalized.area(), quad.area(), epsilon = 1e-12);
            rotated = rotated.shift_vertices_clockwise();
        }
    }

    #[test]
    fn test_normalize_winding_reversed_order() {
        let [a, b, c, d] = *unit_square().vertices();
        let reversed = Quadrilateral::new(c, b, a, d);
        let normalized = normalize_winding(reversed);
        assert!(normalized.is_canonical());
        assert_abs_diff_eq!(normalized.area(), 1.0);
    }

    #[test]
    fn test_normalize_winding_terminates_on_nan() {
        let quad = Quadrilateral::new(
            V2::new(f64::NAN, 0.0),
            V2::new(1.0, f64::NAN),
            V2::new(1.0, 1.0),
            V2::new(0.0, 1.0),
        );
        let normalized = normalize_winding(quad);
        assert!(!normalized.is_finite());
    }

    #[test]
    fn test_bounding_box() {
        let quad = Quadrilateral::new(
            V2::new(0.0, -1.0),
            V2::new(1.0, 0.0),
            V2::new(0.0, 1.0),
            V2::new(-1.0, 0.0),
        );
        let bbox = quad.bounding_box();
        assert_eq!(bbox, Rect::new(-1.0, 1.0, -1.0, 1.0));
    }
}
