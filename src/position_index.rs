//! An ordered index from 2D positions to payloads, with nearest lookup.

use std::collections::BTreeMap;

use kurbo::Point;
use ordered_float::OrderedFloat;

/// A multimap from positions to payloads, sorted by x coordinate.
///
/// The planar map keeps one of these over its node positions so that
/// `nearest_node` queries do not need to scan every node: the search starts
/// at the query's x coordinate and walks outward in both directions, pruning
/// as soon as the x distance alone exceeds the best squared distance found so
/// far.
#[derive(Clone, Debug, Default)]
pub struct PositionIndex<P> {
    entries: BTreeMap<(OrderedFloat<f64>, u64), (Point, P)>,
    next_seq: u64,
}

impl<P: Copy + PartialEq> PositionIndex<P> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the index empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts an entry. Duplicate positions are allowed.
    pub fn insert(&mut self, position: Point, payload: P) {
        let key = (OrderedFloat(position.x), self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, (position, payload));
    }

    /// Removes the entry with exactly this position and payload.
    ///
    /// Returns `false` if no such entry exists.
    pub fn remove(&mut self, position: Point, payload: P) -> bool {
        let x = OrderedFloat(position.x);
        let key = self
            .entries
            .range((x, 0)..=(x, u64::MAX))
            .find(|(_, (p, pl))| *p == position && *pl == payload)
            .map(|(k, _)| *k);
        match key {
            Some(k) => {
                self.entries.remove(&k);
                true
            }
            None => false,
        }
    }

    /// The entry closest to `position` with squared distance strictly less
    /// than `max_sq_dist`, or `None` if no entry qualifies.
    pub fn nearest(&self, position: Point, max_sq_dist: f64) -> Option<(Point, P)> {
        let mut best = None;
        let mut best_sq = max_sq_dist;
        let mid = (OrderedFloat(position.x), 0);

        for (_, (p, payload)) in self.entries.range(mid..) {
            let dx = p.x - position.x;
            if dx * dx > best_sq {
                break;
            }
            let sq = (*p - position).hypot2();
            if sq < best_sq {
                best = Some((*p, *payload));
                best_sq = sq;
            }
        }

        for (_, (p, payload)) in self.entries.range(..mid).rev() {
            let dx = position.x - p.x;
            if dx * dx > best_sq {
                break;
            }
            let sq = (*p - position).hypot2();
            if sq < best_sq {
                best = Some((*p, *payload));
                best_sq = sq;
            }
        }

        best
    }

    /// Iterates over all entries in x order.
    pub fn iter(&self) -> impl Iterator<Item = (Point, P)> + '_ {
        self.entries.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn insert_remove_roundtrip() {
        let mut index = PositionIndex::new();
        index.insert(Point::new(1.0, 2.0), 7u32);
        index.insert(Point::new(1.0, 3.0), 8);
        assert_eq!(index.len(), 2);

        assert!(index.remove(Point::new(1.0, 2.0), 7));
        assert!(!index.remove(Point::new(1.0, 2.0), 7));
        assert_eq!(index.len(), 1);
        assert_eq!(index.nearest(Point::new(1.0, 2.0), 100.0), Some((Point::new(1.0, 3.0), 8)));
    }

    #[test]
    fn nearest_respects_radius() {
        let mut index = PositionIndex::new();
        index.insert(Point::new(0.0, 0.0), 0u32);
        assert_eq!(index.nearest(Point::new(3.0, 4.0), 25.0), None);
        assert_eq!(
            index.nearest(Point::new(3.0, 4.0), 25.1),
            Some((Point::new(0.0, 0.0), 0))
        );
    }

    #[test]
    fn nearest_on_empty() {
        let index: PositionIndex<u32> = PositionIndex::new();
        assert_eq!(index.nearest(Point::new(0.0, 0.0), f64::MAX), None);
    }

    proptest! {
        // Compare against a brute-force scan: the pruned search must find an
        // entry at exactly the minimal squared distance whenever one
        // qualifies.
        #[test]
        fn nearest_matches_brute_force(
            points in prop::collection::vec((-50.0..50.0f64, -50.0..50.0f64), 1..1000),
            probes in prop::collection::vec((-60.0..60.0f64, -60.0..60.0f64), 1..100),
            max_sq in 0.1..500.0f64,
        ) {
            let mut index = PositionIndex::new();
            for (i, &(x, y)) in points.iter().enumerate() {
                index.insert(Point::new(x, y), i);
            }

            for &(px, py) in &probes {
                let probe = Point::new(px, py);
                let brute = points
                    .iter()
                    .map(|&(x, y)| (Point::new(x, y) - probe).hypot2())
                    .fold(f64::MAX, f64::min);

                match index.nearest(probe, max_sq) {
                    Some((p, _)) => {
                        let sq = (p - probe).hypot2();
                        prop_assert!(sq < max_sq);
                        prop_assert_eq!(sq, brute);
                    }
                    None => prop_assert!(brute >= max_sq),
                }
            }
        }
    }
}
