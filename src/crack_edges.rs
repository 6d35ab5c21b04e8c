//! Construction of a planar map from a crack-edge connectivity raster.
//!
//! The input marks, per pixel, which of its four crack neighbours it is
//! connected to, plus diagonal-crossing bits and node markers. Tracing
//! follows each connection from node to node, emitting one sample per crack
//! step at `(x − 0.5, y − 0.5)`, and feeds the resulting nodes and edge
//! polylines into the regular construction pipeline.

use kurbo::Point;

use crate::label_image::ImageSize;
use crate::map::{NodeIdx, PlanarMap};
use crate::Error;

/// Connection to the pixel on the right.
pub const CONN_RIGHT: u8 = 1;
/// Connection to the pixel above.
pub const CONN_UP: u8 = 2;
/// Connection to the pixel on the left.
pub const CONN_LEFT: u8 = 4;
/// Connection to the pixel below.
pub const CONN_DOWN: u8 = 8;
/// All four axis-aligned connection bits.
pub const CONN_ALL4: u8 = CONN_RIGHT | CONN_UP | CONN_LEFT | CONN_DOWN;
/// Two edges cross diagonally, connecting upper-left to lower-right.
pub const CONN_DIAG_UPLEFT: u8 = 16;
/// Two edges cross diagonally, connecting upper-right to lower-left.
pub const CONN_DIAG_UPRIGHT: u8 = 32;
/// Either diagonal bit.
pub const CONN_DIAG: u8 = CONN_DIAG_UPLEFT | CONN_DIAG_UPRIGHT;
/// This pixel is a definite node.
pub const CONN_NODE: u8 = 64;
/// This pixel may turn out to be a node; tracing can demote it.
pub const CONN_MAYBE_NODE: u8 = 128;

/// The four crack directions, counterclockwise from east.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dir {
    East = 0,
    North = 1,
    West = 2,
    South = 3,
}

impl Dir {
    const ALL: [Dir; 4] = [Dir::East, Dir::North, Dir::West, Dir::South];

    fn turn_left(self) -> Dir {
        Dir::ALL[(self as usize + 1) % 4]
    }

    fn turn_right(self) -> Dir {
        Dir::ALL[(self as usize + 3) % 4]
    }

    fn opposite(self) -> Dir {
        Dir::ALL[(self as usize + 2) % 4]
    }

    fn conn_bit(self) -> u8 {
        [CONN_RIGHT, CONN_UP, CONN_LEFT, CONN_DOWN][self as usize]
    }

    fn diff(self) -> (i32, i32) {
        [(1, 0), (0, -1), (-1, 0), (0, 1)][self as usize]
    }
}

/// A raster of crack connection bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrackConnections {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl CrackConnections {
    /// Creates an all-zero raster.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    /// The raster width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The raster height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The connection bits at `(x, y)`, 0 outside the raster.
    pub fn get(&self, x: i32, y: i32) -> u8 {
        if self.in_bounds(x, y) {
            self.data[y as usize * self.width + x as usize]
        } else {
            0
        }
    }

    /// Sets the connection bits at `(x, y)`; out-of-range positions are
    /// ignored.
    pub fn set(&mut self, x: i32, y: i32, bits: u8) {
        if self.in_bounds(x, y) {
            self.data[y as usize * self.width + x as usize] = bits;
        }
    }

    /// Ors `bits` into the value at `(x, y)`.
    pub fn or(&mut self, x: i32, y: i32, bits: u8) {
        if self.in_bounds(x, y) {
            self.data[y as usize * self.width + x as usize] |= bits;
        }
    }

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Mirrors one-sided connection bits onto the opposite neighbours:
    /// `RIGHT` implies the right neighbour's `LEFT`, `DOWN` implies the
    /// lower neighbour's `UP`.
    pub fn make_symmetric(&mut self) {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let bits = self.get(x, y);
                if bits & CONN_RIGHT != 0 {
                    self.or(x + 1, y, CONN_LEFT);
                }
                if bits & CONN_DOWN != 0 {
                    self.or(x, y + 1, CONN_UP);
                }
                if bits & CONN_LEFT != 0 {
                    self.or(x - 1, y, CONN_RIGHT);
                }
                if bits & CONN_UP != 0 {
                    self.or(x, y - 1, CONN_DOWN);
                }
            }
        }
    }

    /// Marks node pixels: 4-connectivity degree above 2 (counting a fully
    /// connected diagonal crossing as two passing edges) is a definite
    /// node; the right/down corner configuration and diagonal crossings are
    /// tentative nodes that tracing may demote.
    pub fn mark_nodes(&mut self) {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let bits = self.get(x, y);
                let four = bits & CONN_ALL4;
                let mut degree = four.count_ones();
                if degree == 4 && bits & CONN_DIAG != 0 {
                    degree = 2;
                }
                if degree > 2 {
                    self.set(x, y, bits | CONN_NODE);
                } else if four == (CONN_RIGHT | CONN_DOWN) || bits & CONN_DIAG != 0 {
                    self.set(x, y, bits | CONN_MAYBE_NODE);
                }
            }
        }
    }

    /// Follows one edge starting at `pos` in direction `dir`, consuming
    /// tentative node markers along the way. On return `pos`/`dir` identify
    /// the arrival: `dir` points back along the incoming connection.
    fn follow_edge(&mut self, pos: &mut (i32, i32), dir: &mut Dir) -> Vec<Point> {
        let start_pos = *pos;
        let mut vpos = Point::new(pos.0 as f64 - 0.5, pos.1 as f64 - 0.5);
        let mut points = vec![vpos];

        loop {
            let (dx, dy) = dir.diff();
            vpos += kurbo::Vec2::new(dx as f64, dy as f64);
            points.push(vpos);
            pos.0 += dx;
            pos.1 += dy;

            if *pos == start_pos {
                break;
            }

            let mut bits = self.get(pos.0, pos.1);
            if bits & CONN_DIAG != 0 {
                let turn_left = if bits & CONN_DIAG_UPLEFT != 0 {
                    matches!(dir, Dir::North | Dir::South)
                } else {
                    matches!(dir, Dir::East | Dir::West)
                };

                bits &= !dir.opposite().conn_bit();
                *dir = if turn_left {
                    dir.turn_left()
                } else {
                    dir.turn_right()
                };
                bits &= !dir.conn_bit();

                if bits & CONN_ALL4 == 0 {
                    bits &= !CONN_MAYBE_NODE;
                }
                self.set(pos.0, pos.1, bits);
                continue;
            } else if bits & CONN_NODE != 0 {
                break;
            }

            if bits & CONN_MAYBE_NODE != 0 {
                // passed through without branching; it will not start an edge
                self.set(pos.0, pos.1, bits & !CONN_MAYBE_NODE);
            }

            *dir = dir.turn_right();
            while bits & dir.conn_bit() == 0 {
                *dir = dir.turn_left();
            }
        }

        *dir = dir.opposite();
        points
    }

    /// Traces every unused connection leaving a pixel matching `mask`.
    ///
    /// `node_image` records, per pixel, `(node_label + 1) << 4` in the high
    /// bits and the already-traced outgoing connections in the low bits.
    fn follow_all_edges_starting_with(
        &mut self,
        mask: u8,
        map: &mut PlanarMap,
        node_image: &mut [i32],
    ) -> Result<(), Error> {
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                if self.get(x, y) & mask == 0 {
                    continue;
                }

                let pos = (x, y);
                let at = y as usize * self.width + x as usize;
                let mut start_info = node_image[at];
                let start_node = if start_info != 0 {
                    NodeIdx::new((start_info >> 4) as u32 - 1)
                } else {
                    let n = map.add_node(Point::new(x as f64 - 0.5, y as f64 - 0.5));
                    start_info = ((n.label() + 1) as i32) << 4;
                    node_image[at] = start_info;
                    n
                };

                for dir in Dir::ALL {
                    let start_conn = dir.conn_bit();
                    if self.get(x, y) & start_conn == 0 || start_info & start_conn as i32 != 0 {
                        continue;
                    }

                    let mut end_pos = pos;
                    let mut end_dir = dir;
                    let points = self.follow_edge(&mut end_pos, &mut end_dir);
                    let end_conn = end_dir.conn_bit();

                    let end_at = end_pos.1 as usize * self.width + end_pos.0 as usize;
                    let mut end_info = node_image[end_at];
                    let end_node = if end_info == 0 {
                        let n = map.add_node(Point::new(
                            end_pos.0 as f64 - 0.5,
                            end_pos.1 as f64 - 0.5,
                        ));
                        end_info = ((n.label() + 1) as i32) << 4;
                        n
                    } else {
                        NodeIdx::new((end_info >> 4) as u32 - 1)
                    };

                    let edge = map.add_edge(start_node, end_node, points)?;

                    start_info |= start_conn as i32;
                    if map.edge(edge).is_some_and(|e| e.is_loop()) {
                        start_info |= end_conn as i32;
                        node_image[at] = start_info;
                    } else {
                        node_image[at] = start_info;
                        node_image[end_at] = end_info | end_conn as i32;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builds a fully embedded planar map from a crack-edge connectivity raster.
///
/// Symmetrises the connection bits, marks node pixels, traces all edges
/// (from definite nodes first, then from the surviving tentative ones), and
/// runs σ-orbit sorting, contour initialization, and face embedding with a
/// label image of the raster's size.
pub fn crack_edge_map(mut connections: CrackConnections) -> Result<PlanarMap, Error> {
    let size = ImageSize::new(connections.width(), connections.height());
    connections.make_symmetric();
    connections.mark_nodes();

    let mut map = PlanarMap::new(size);
    let mut node_image = vec![0i32; size.width * size.height];
    connections.follow_all_edges_starting_with(CONN_NODE, &mut map, &mut node_image)?;
    connections.follow_all_edges_starting_with(CONN_MAYBE_NODE, &mut map, &mut node_image)?;
    tracing::debug!(
        nodes = map.node_count(),
        edges = map.edge_count(),
        "traced crack edges"
    );

    map.sort_edges_directly();
    map.init_contours()?;
    map.embed_faces(!size.is_empty())?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetrise_mirrors_connections() {
        let mut conns = CrackConnections::new(3, 3);
        conns.set(0, 0, CONN_RIGHT | CONN_DOWN);
        conns.make_symmetric();
        assert_eq!(conns.get(1, 0), CONN_LEFT);
        assert_eq!(conns.get(0, 1), CONN_UP);
    }

    #[test]
    fn mark_nodes_flags_corners_and_junctions() {
        let mut conns = CrackConnections::new(3, 3);
        conns.set(1, 1, CONN_RIGHT | CONN_DOWN);
        conns.set(2, 2, CONN_RIGHT | CONN_DOWN | CONN_LEFT);
        conns.mark_nodes();
        assert_ne!(conns.get(1, 1) & CONN_MAYBE_NODE, 0);
        assert_ne!(conns.get(2, 2) & CONN_NODE, 0);
    }

    #[test]
    fn traces_a_closed_square() {
        // One 1×1 crack square: a single node with a loop edge, bounding one
        // finite face inside the infinite one.
        let mut conns = CrackConnections::new(4, 4);
        conns.set(0, 0, CONN_RIGHT | CONN_DOWN);
        conns.set(1, 0, CONN_DOWN);
        conns.set(0, 1, CONN_RIGHT);

        let map = crack_edge_map(conns).unwrap();
        assert_eq!(map.node_count(), 1);
        assert_eq!(map.edge_count(), 1);
        assert_eq!(map.face_count(), 2);
        map.check_invariants().unwrap();

        let (_, edge) = map.edges().next().unwrap();
        assert!(edge.is_loop());
        assert_eq!(edge.polyline().len(), 5);
        assert_eq!(edge.polyline().first(), Point::new(-0.5, -0.5));
    }

    #[test]
    fn traces_a_theta_shape() {
        // A rectangle with a vertical crack in the middle: two degree-3
        // junction pixels, three edges between them, two finite faces.
        let mut conns = CrackConnections::new(5, 4);
        conns.set(0, 0, CONN_RIGHT | CONN_DOWN);
        conns.set(1, 0, CONN_RIGHT | CONN_DOWN);
        conns.set(2, 0, CONN_RIGHT);
        conns.set(3, 0, CONN_DOWN);
        conns.set(0, 1, CONN_RIGHT);
        conns.set(1, 1, CONN_RIGHT);
        conns.set(2, 1, CONN_RIGHT);

        let map = crack_edge_map(conns).unwrap();
        assert_eq!(map.node_count(), 2);
        assert_eq!(map.edge_count(), 3);
        assert_eq!(map.face_count(), 3);
        map.check_invariants().unwrap();

        // both junctions sit on the middle crack column
        let n1 = map.nearest_node(Point::new(0.5, -0.5), 0.01).unwrap();
        let n2 = map.nearest_node(Point::new(0.5, 0.5), 0.01).unwrap();
        assert_eq!(map.node(n1).unwrap().degree(), 3);
        assert_eq!(map.node(n2).unwrap().degree(), 3);
    }
}
