//! Geometric primitives: polylines over kurbo points.

use std::cell::Cell;

use kurbo::{Point, Rect};

/// An open polygonal chain with at least two points.
///
/// Edges of a planar map carry their geometry as polylines whose first point
/// is the start node's position and whose last point is the end node's
/// position. The bounding box and the signed partial area are derived
/// quantities and are cached after the first computation; any mutation
/// invalidates the caches.
#[derive(Clone)]
pub struct Polyline {
    points: Vec<Point>,
    bbox: Cell<Option<Rect>>,
    partial_area: Cell<Option<f64>>,
}

impl Polyline {
    /// Creates a polyline from its points.
    ///
    /// Most operations assume at least two points; this is only checked by a
    /// debug assertion.
    pub fn new(points: Vec<Point>) -> Self {
        debug_assert!(points.len() >= 2, "polyline needs at least two points");
        Self {
            points,
            bbox: Cell::new(None),
            partial_area: Cell::new(None),
        }
    }

    /// The number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Is the point list empty? (A well-formed polyline never is.)
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// All points, in order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// The first point.
    pub fn first(&self) -> Point {
        self.points[0]
    }

    /// The last point.
    pub fn last(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    pub(crate) fn set_first(&mut self, p: Point) {
        self.points[0] = p;
        self.invalidate();
    }

    pub(crate) fn set_last(&mut self, p: Point) {
        let n = self.points.len() - 1;
        self.points[n] = p;
        self.invalidate();
    }

    /// The axis-aligned bounding box of all points.
    pub fn bounding_box(&self) -> Rect {
        if let Some(bbox) = self.bbox.get() {
            return bbox;
        }
        let mut bbox = Rect::from_points(self.points[0], self.points[0]);
        for p in &self.points[1..] {
            bbox = bbox.union_pt(*p);
        }
        self.bbox.set(Some(bbox));
        bbox
    }

    /// The signed partial area: the sum of the trapezoid contributions
    /// ½ (xᵢ₊₁ − xᵢ)(yᵢ + yᵢ₊₁) over consecutive point pairs.
    ///
    /// Summed along a closed chain of darts this yields the signed area of
    /// the enclosed contour (positive for the orientation that face
    /// embedding assigns to finite faces); reversing the polyline negates
    /// it.
    pub fn partial_area(&self) -> f64 {
        if let Some(area) = self.partial_area.get() {
            return area;
        }
        let mut area = 0.0;
        for w in self.points.windows(2) {
            area += (w[1].x - w[0].x) * (w[0].y + w[1].y);
        }
        area *= 0.5;
        self.partial_area.set(Some(area));
        area
    }

    /// Reverses the point order in place.
    pub fn reverse(&mut self) {
        self.points.reverse();
        if let Some(area) = self.partial_area.get() {
            self.partial_area.set(Some(-area));
        }
        // bbox is unaffected
    }

    /// Appends `other`'s points.
    ///
    /// When `other` starts exactly where `self` ends (the usual case when
    /// concatenating edge geometry through a shared node) the junction point
    /// is kept only once.
    pub fn extend(&mut self, other: &Polyline) {
        let skip_first = other.points.first() == self.points.last();
        let start = usize::from(skip_first);
        self.points.extend_from_slice(&other.points[start..]);
        self.invalidate();
    }

    /// Even-odd containment test against the closed polygon formed by
    /// implicitly connecting the last point back to the first.
    pub fn contains(&self, p: Point) -> bool {
        let mut inside = false;
        let n = self.points.len();
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            if (a.y <= p.y) != (b.y <= p.y) {
                let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if x > p.x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn invalidate(&mut self) {
        self.bbox.set(None);
        self.partial_area.set(None);
    }
}

impl std::fmt::Debug for Polyline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for p in &self.points {
            list.entry(&(p.x, p.y));
        }
        list.finish()
    }
}

impl PartialEq for Polyline {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points
    }
}

impl From<Vec<Point>> for Polyline {
    fn from(points: Vec<Point>) -> Self {
        Self::new(points)
    }
}

impl FromIterator<Point> for Polyline {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl std::ops::Index<usize> for Polyline {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn poly(pts: &[(f64, f64)]) -> Polyline {
        Polyline::new(pts.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn partial_area_of_closed_square() {
        let p = poly(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]);
        assert_eq!(p.partial_area(), -1.0);
        let mut q = p.clone();
        q.reverse();
        assert_eq!(q.partial_area(), 1.0);
    }

    #[test]
    fn extend_keeps_junction_point_once() {
        let mut a = poly(&[(0.0, 0.0), (5.0, 0.0)]);
        let b = poly(&[(5.0, 0.0), (12.0, 0.0)]);
        a.extend(&b);
        assert_eq!(a.points().len(), 3);
        assert_eq!(a.last(), Point::new(12.0, 0.0));
    }

    #[test]
    fn extend_is_additive_on_partial_area() {
        let mut a = poly(&[(0.0, 0.0), (3.0, 1.0)]);
        let b = poly(&[(3.0, 1.0), (4.0, 4.0), (0.0, 5.0)]);
        let sum = a.partial_area() + b.partial_area();
        a.extend(&b);
        assert!((a.partial_area() - sum).abs() < 1e-12);
    }

    #[test]
    fn containment_square() {
        let p = poly(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert!(p.contains(Point::new(5.0, 5.0)));
        assert!(!p.contains(Point::new(15.0, 5.0)));
        assert!(!p.contains(Point::new(5.0, -1.0)));
    }

    proptest! {
        #[test]
        fn reverse_negates_partial_area(pts in prop::collection::vec((-100.0..100.0f64, -100.0..100.0f64), 2..20)) {
            let mut p = poly(&pts);
            let area = p.partial_area();
            p.reverse();
            prop_assert!((p.partial_area() + area).abs() < 1e-9);
        }

        #[test]
        fn bounding_box_contains_all_points(pts in prop::collection::vec((-100.0..100.0f64, -100.0..100.0f64), 2..20)) {
            let p = poly(&pts);
            let bbox = p.bounding_box();
            for q in p.points() {
                prop_assert!(bbox.x0 <= q.x && q.x <= bbox.x1);
                prop_assert!(bbox.y0 <= q.y && q.y <= bbox.y1);
            }
        }
    }
}
