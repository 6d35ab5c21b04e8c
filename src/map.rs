//! The planar subdivision: cells, darts, construction, and derived queries.

use std::cell::Cell;
use std::cmp::Ordering;
use std::f64::consts::PI;

use kurbo::{Point, Rect, Vec2};
use ordered_float::OrderedFloat;

use crate::euler::Hooks;
use crate::label_image::{ImageSize, LabelImage, Pixel, Scanlines};
use crate::label_lut::LabelLut;
use crate::position_index::PositionIndex;
use crate::{Error, Polyline};

/// The label of a node.
///
/// Labels are dense and assigned on creation; label 0 is reserved-absent.
/// Like every label type in this crate, a `NodeIdx` is only meaningful
/// together with the [`PlanarMap`] it came from.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeIdx(u32);

/// The label of an edge. Label 0 is reserved-absent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeIdx(u32);

/// The label of a face. Label 0 is the infinite face.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FaceIdx(u32);

#[derive(Clone)]
pub(crate) struct NodeVec<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

#[derive(Clone)]
pub(crate) struct EdgeVec<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

#[derive(Clone)]
pub(crate) struct FaceVec<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl_cell_vec!(NodeVec, NodeIdx, "n");
impl_cell_vec!(EdgeVec, EdgeIdx, "e");
impl_cell_vec!(FaceVec, FaceIdx, "f");

/// An oriented half-edge.
///
/// A dart is a non-zero signed integer: its magnitude is an edge label and
/// its sign selects a direction (positive traverses the edge's polyline from
/// start to end). Darts are plain values; all navigation goes through the
/// map, and a dart whose edge has been uninitialized fails on access with
/// [`Error::InvalidDart`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dart(i32);

impl Dart {
    /// Builds a dart from a signed label; `None` for zero.
    pub fn from_label(label: i32) -> Option<Dart> {
        (label != 0).then_some(Dart(label))
    }

    /// The dart traversing `edge` from start to end.
    pub fn positive(edge: EdgeIdx) -> Dart {
        Dart(edge.label() as i32)
    }

    /// The dart traversing `edge` from end to start.
    pub fn negative(edge: EdgeIdx) -> Dart {
        Dart(-(edge.label() as i32))
    }

    /// The signed label.
    pub fn label(self) -> i32 {
        self.0
    }

    /// The label of the edge this dart lives on.
    pub fn edge(self) -> EdgeIdx {
        EdgeIdx(self.0.unsigned_abs())
    }

    /// Does this dart follow its edge's polyline order?
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// α: the opposite dart on the same edge.
    pub fn alpha(self) -> Dart {
        Dart(-self.0)
    }
}

impl std::fmt::Debug for Dart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{:+}", self.0)
    }
}

/// A zero-dimensional cell of the subdivision.
#[derive(Clone)]
pub struct Node {
    pub(crate) position: Point,
    /// Incident darts (those starting here), in counterclockwise angular
    /// order — the σ-orbit.
    pub(crate) darts: Vec<i32>,
}

impl Node {
    /// The node's position.
    pub fn position(&self) -> Point {
        self.position
    }

    /// The number of incident darts.
    pub fn degree(&self) -> usize {
        self.darts.len()
    }

    /// The first dart of the σ-orbit, if any.
    pub fn anchor(&self) -> Option<Dart> {
        self.darts.first().map(|&l| Dart(l))
    }

    /// The σ-orbit, in counterclockwise order.
    pub fn darts(&self) -> impl Iterator<Item = Dart> + '_ {
        self.darts.iter().map(|&l| Dart(l))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node({:?}, {:?} σ {:?})",
            (self.position.x, self.position.y),
            self.darts.len(),
            self.darts
        )
    }
}

/// A one-dimensional cell of the subdivision.
#[derive(Clone, Debug)]
pub struct Edge {
    pub(crate) start: NodeIdx,
    pub(crate) end: NodeIdx,
    pub(crate) poly: Polyline,
    pub(crate) left: Option<FaceIdx>,
    pub(crate) right: Option<FaceIdx>,
    pub(crate) protection: u32,
}

impl Edge {
    /// The node the polyline starts at.
    pub fn start_node(&self) -> NodeIdx {
        self.start
    }

    /// The node the polyline ends at.
    pub fn end_node(&self) -> NodeIdx {
        self.end
    }

    /// The edge geometry.
    pub fn polyline(&self) -> &Polyline {
        &self.poly
    }

    /// The face to the left of the positive dart (`None` before face
    /// embedding).
    pub fn left_face(&self) -> Option<FaceIdx> {
        self.left
    }

    /// The face to the right of the positive dart.
    pub fn right_face(&self) -> Option<FaceIdx> {
        self.right
    }

    /// Is this edge a bridge (same face on both sides)?
    pub fn is_bridge(&self) -> bool {
        self.left == self.right
    }

    /// Does this edge start and end at the same node?
    pub fn is_loop(&self) -> bool {
        self.start == self.end
    }

    /// The protection bitmask set by external policies.
    pub fn protection(&self) -> u32 {
        self.protection
    }

    /// Is any protection bit set?
    pub fn is_protected(&self) -> bool {
        self.protection != 0
    }
}

/// A two-dimensional cell of the subdivision.
#[derive(Clone)]
pub struct Face {
    /// One anchor dart per boundary component; for a finite face the outer
    /// contour comes first.
    pub(crate) anchors: Vec<Dart>,
    pub(crate) bbox: Cell<Option<Rect>>,
    pub(crate) area: Cell<Option<f64>>,
    pub(crate) pixel_area: i64,
}

impl Face {
    fn infinite() -> Face {
        Face {
            anchors: Vec::new(),
            bbox: Cell::new(None),
            area: Cell::new(None),
            pixel_area: 0,
        }
    }

    fn with_anchor(anchor: Dart) -> Face {
        Face {
            anchors: vec![anchor],
            bbox: Cell::new(None),
            area: Cell::new(None),
            pixel_area: 0,
        }
    }

    /// The contour anchors, one per boundary component.
    pub fn contours(&self) -> &[Dart] {
        &self.anchors
    }

    /// The anchor of contour `index`.
    pub fn contour(&self, index: usize) -> Dart {
        self.anchors[index]
    }

    /// The number of pixels currently associated with this face.
    pub fn pixel_area(&self) -> i64 {
        self.pixel_area
    }
}

impl std::fmt::Debug for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Face(anchors {:?}, px {})", self.anchors, self.pixel_area)
    }
}

/// A planar topological map.
///
/// Owns the node/edge/face arenas, a position index over the nodes, and an
/// optional label image with its face LUT. All cross-references between cells
/// are integer labels; see the crate docs for an overview.
///
/// `Clone` duplicates the whole subdivision *except* the registered hooks:
/// a clone starts with an empty hook collection.
#[derive(Debug)]
pub struct PlanarMap {
    pub(crate) nodes: NodeVec<Node>,
    pub(crate) edges: EdgeVec<Edge>,
    pub(crate) faces: FaceVec<Face>,
    pub(crate) node_index: PositionIndex<NodeIdx>,
    pub(crate) image_size: ImageSize,
    pub(crate) label_image: Option<LabelImage>,
    pub(crate) face_lut: LabelLut,
    pub(crate) hooks: Hooks,
    pub(crate) corrupt: bool,
}

impl Clone for PlanarMap {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            faces: self.faces.clone(),
            node_index: self.node_index.clone(),
            image_size: self.image_size,
            label_image: self.label_image.clone(),
            face_lut: self.face_lut.clone(),
            hooks: Hooks::default(),
            corrupt: self.corrupt,
        }
    }
}

impl PlanarMap {
    /// Creates an empty map (no cells, no faces yet).
    pub fn new(image_size: ImageSize) -> Self {
        Self {
            nodes: NodeVec::with_reserved_slot(),
            edges: EdgeVec::with_reserved_slot(),
            faces: FaceVec::new(),
            node_index: PositionIndex::new(),
            image_size,
            label_image: None,
            face_lut: LabelLut::new(),
            hooks: Hooks::default(),
            corrupt: false,
        }
    }

    /// Builds a fully embedded map from node positions and edge tuples.
    ///
    /// Index 0 of both input vectors is reserved and ignored; `None` entries
    /// leave the corresponding label absent. Every edge tuple is
    /// `(start, end, points)` with `points[0]` at the start node's position
    /// and the last point at the end node's position.
    ///
    /// Runs the whole construction pipeline: σ-orbit sorting by first-segment
    /// angle, preliminary contours, and face embedding (with a label image
    /// when `image_size` is non-empty).
    pub fn from_cells(
        node_positions: Vec<Option<Point>>,
        edge_tuples: Vec<Option<(NodeIdx, NodeIdx, Vec<Point>)>>,
        image_size: ImageSize,
    ) -> Result<Self, Error> {
        let mut map = Self::new(image_size);

        tracing::debug!(nodes = node_positions.len(), "initializing nodes");
        for entry in node_positions.into_iter().skip(1) {
            match entry {
                Some(p) => {
                    map.add_node(p);
                }
                None => {
                    map.nodes.push_absent();
                }
            }
        }

        tracing::debug!(edges = edge_tuples.len(), "initializing edges");
        for entry in edge_tuples.into_iter().skip(1) {
            match entry {
                Some((start, end, points)) => {
                    map.add_edge(start, end, points)?;
                }
                None => {
                    map.edges.push_absent();
                }
            }
        }

        map.sort_edges_directly();
        map.init_contours()?;
        tracing::debug!(contours = map.face_count(), "initializing faces");
        map.embed_faces(!map.image_size.is_empty())?;
        Ok(map)
    }

    /// The raster extent this map was built for.
    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    /// The number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The number of live faces.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// An upper bound on node labels (maximum label + 1), usable as LUT size.
    pub fn max_node_label(&self) -> usize {
        self.nodes.slot_count()
    }

    /// An upper bound on edge labels (maximum label + 1).
    pub fn max_edge_label(&self) -> usize {
        self.edges.slot_count()
    }

    /// An upper bound on face labels (maximum label + 1).
    pub fn max_face_label(&self) -> usize {
        self.faces.slot_count()
    }

    /// The node at `label`, if live.
    pub fn node(&self, label: NodeIdx) -> Option<&Node> {
        self.nodes.get(label)
    }

    /// The edge at `label`, if live.
    pub fn edge(&self, label: EdgeIdx) -> Option<&Edge> {
        self.edges.get(label)
    }

    /// The face at `label`, if live.
    pub fn face(&self, label: FaceIdx) -> Option<&Face> {
        self.faces.get(label)
    }

    /// Iterates over all live nodes in label order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIdx, &Node)> + '_ {
        self.nodes.iter()
    }

    /// Iterates over all live edges in label order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeIdx, &Edge)> + '_ {
        self.edges.iter()
    }

    /// Iterates over all live faces in label order.
    pub fn faces(&self) -> impl Iterator<Item = (FaceIdx, &Face)> + '_ {
        self.faces.iter()
    }

    /// The label image, if one was initialized during face embedding.
    pub fn label_image(&self) -> Option<&LabelImage> {
        self.label_image.as_ref()
    }

    /// The face label LUT resolving raw label-image values to live faces.
    pub fn face_lut(&self) -> &LabelLut {
        &self.face_lut
    }

    /// The hook collection; register handlers here.
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Builds a dart value from a signed label.
    ///
    /// # Panics
    ///
    /// Panics if `label` is zero.
    pub fn dart(&self, label: i32) -> Dart {
        Dart::from_label(label).expect("dart label must be non-zero")
    }

    /// Adds an isolated node and indexes its position.
    pub fn add_node(&mut self, position: Point) -> NodeIdx {
        let label = self.nodes.push(Node {
            position,
            darts: Vec::new(),
        });
        self.node_index.insert(position, label);
        label
    }

    /// Adds an edge between two existing nodes.
    ///
    /// Appends the new edge's darts to the endpoint σ-lists (in arrival
    /// order; call [`sort_edges_directly`](Self::sort_edges_directly) or
    /// [`sort_edges_eventually`](Self::sort_edges_eventually) before
    /// initializing contours).
    pub fn add_edge(
        &mut self,
        start: NodeIdx,
        end: NodeIdx,
        points: Vec<Point>,
    ) -> Result<EdgeIdx, Error> {
        if !self.nodes.contains(start) || !self.nodes.contains(end) {
            return Err(Error::InvalidNode);
        }
        let label = self.edges.push(Edge {
            start,
            end,
            poly: Polyline::new(points),
            left: None,
            right: None,
            protection: 0,
        });
        self.nodes[start].darts.push(label.label() as i32);
        self.nodes[end].darts.push(-(label.label() as i32));
        Ok(label)
    }

    /// Sets or clears protection bits on an edge.
    pub fn set_edge_protection(
        &mut self,
        edge: EdgeIdx,
        mask: u32,
        protect: bool,
    ) -> Result<(), Error> {
        let edge = self.edges.get_mut(edge).ok_or(Error::InvalidDart)?;
        if protect {
            edge.protection |= mask;
        } else {
            edge.protection &= !mask;
        }
        Ok(())
    }

    /// Moves a node, dragging the endpoints of its incident edge polylines
    /// along and re-indexing its position.
    pub fn set_node_position(&mut self, node: NodeIdx, position: Point) -> Result<(), Error> {
        let old = self.nodes.get(node).ok_or(Error::InvalidNode)?.position;
        self.node_index.remove(old, node);
        let labels = self.nodes[node].darts.clone();
        for label in labels {
            let d = Dart(label);
            let edge = self.edges.get_mut(d.edge()).ok_or(Error::Corrupt)?;
            if d.is_positive() {
                edge.poly.set_first(position);
            } else {
                edge.poly.set_last(position);
            }
        }
        self.nodes[node].position = position;
        self.node_index.insert(position, node);
        Ok(())
    }

    // --- dart navigation ------------------------------------------------

    /// The node a dart starts at.
    pub fn start_node(&self, d: Dart) -> Result<NodeIdx, Error> {
        let e = self.edges.get(d.edge()).ok_or(Error::InvalidDart)?;
        Ok(if d.is_positive() { e.start } else { e.end })
    }

    /// The node a dart ends at.
    pub fn end_node(&self, d: Dart) -> Result<NodeIdx, Error> {
        self.start_node(d.alpha())
    }

    /// The face to the left of a dart.
    pub fn left_face(&self, d: Dart) -> Result<FaceIdx, Error> {
        self.left_face_raw(d)?.ok_or(Error::InvalidDart)
    }

    /// The face to the right of a dart.
    pub fn right_face(&self, d: Dart) -> Result<FaceIdx, Error> {
        self.left_face(d.alpha())
    }

    pub(crate) fn left_face_raw(&self, d: Dart) -> Result<Option<FaceIdx>, Error> {
        let e = self.edges.get(d.edge()).ok_or(Error::InvalidDart)?;
        Ok(if d.is_positive() { e.left } else { e.right })
    }

    pub(crate) fn set_left_face(&mut self, d: Dart, face: Option<FaceIdx>) -> Result<(), Error> {
        let e = self.edges.get_mut(d.edge()).ok_or(Error::InvalidDart)?;
        if d.is_positive() {
            e.left = face;
        } else {
            e.right = face;
        }
        Ok(())
    }

    /// Is the dart's edge a bridge?
    pub fn is_bridge(&self, d: Dart) -> Result<bool, Error> {
        Ok(self.edges.get(d.edge()).ok_or(Error::InvalidDart)?.is_bridge())
    }

    /// σ: rotates `times` positions through the start node's dart list.
    pub fn sigma(&self, d: Dart, times: i32) -> Result<Dart, Error> {
        let n = self.start_node(d)?;
        let darts = &self.nodes[n].darts;
        let i = darts
            .iter()
            .position(|&l| l == d.label())
            .ok_or(Error::Corrupt)?;
        let j = (i as i32 + times).rem_euclid(darts.len() as i32);
        Ok(Dart(darts[j as usize]))
    }

    /// φ: one step forward along the boundary of the left face
    /// (α followed by σ⁻¹).
    pub fn next_phi(&self, d: Dart) -> Result<Dart, Error> {
        self.sigma(d.alpha(), -1)
    }

    /// φ⁻¹: one step backward along the boundary of the left face.
    pub fn prev_phi(&self, d: Dart) -> Result<Dart, Error> {
        Ok(self.sigma(d, 1)?.alpha())
    }

    /// Iterates over the φ-orbit of `d`, starting with `d` itself.
    pub fn phi_orbit(&self, d: Dart) -> PhiOrbit<'_> {
        PhiOrbit {
            map: self,
            start: d,
            next: Some(d),
        }
    }

    /// The dart's signed partial area contribution.
    pub fn partial_area(&self, d: Dart) -> Result<f64, Error> {
        let e = self.edges.get(d.edge()).ok_or(Error::InvalidDart)?;
        let area = e.poly.partial_area();
        Ok(if d.is_positive() { area } else { -area })
    }

    /// The points of the dart's polyline, in dart order.
    pub fn dart_points(&self, d: Dart) -> Result<impl Iterator<Item = Point> + '_, Error> {
        let e = self.edges.get(d.edge()).ok_or(Error::InvalidDart)?;
        let pts = e.poly.points();
        let iter: Box<dyn Iterator<Item = Point> + '_> = if d.is_positive() {
            Box::new(pts.iter().copied())
        } else {
            Box::new(pts.iter().rev().copied())
        };
        Ok(iter)
    }

    fn dart_point(&self, d: Dart, index: usize) -> Point {
        let poly = &self.edges[d.edge()].poly;
        if d.is_positive() {
            poly[index]
        } else {
            poly[poly.len() - 1 - index]
        }
    }

    fn dart_points_vec(&self, d: Dart) -> Vec<Point> {
        let pts = self.edges[d.edge()].poly.points();
        if d.is_positive() {
            pts.to_vec()
        } else {
            pts.iter().rev().copied().collect()
        }
    }

    // --- derived contour queries ----------------------------------------

    /// The signed area of the contour through `d`: the sum of the partial
    /// areas of all non-bridge darts in the φ-orbit.
    pub fn contour_area(&self, d: Dart) -> Result<f64, Error> {
        let mut area = 0.0;
        let mut x = d;
        loop {
            let e = self.edges.get(x.edge()).ok_or(Error::InvalidDart)?;
            if !e.is_bridge() {
                let partial = e.poly.partial_area();
                area += if x.is_positive() { partial } else { -partial };
            }
            x = self.next_phi(x)?;
            if x == d {
                break;
            }
        }
        Ok(area)
    }

    /// The closed polygon traced by the φ-orbit of `d`.
    pub fn contour_poly(&self, d: Dart) -> Result<Polyline, Error> {
        let mut points: Vec<Point> = Vec::new();
        let mut x = d;
        loop {
            let pts = self.dart_points_vec(x);
            if points.is_empty() {
                points.extend(pts);
            } else {
                points.extend(pts.into_iter().skip(1));
            }
            x = self.next_phi(x)?;
            if x == d {
                break;
            }
        }
        Ok(Polyline::new(points))
    }

    /// The signed area of a face: the sum of its contour areas. Lazily
    /// cached; the cache is maintained by the Euler operations.
    pub fn face_area(&self, face: FaceIdx) -> Result<f64, Error> {
        let f = &self.faces[face];
        if let Some(area) = f.area.get() {
            return Ok(area);
        }
        let mut area = 0.0;
        for &anchor in &f.anchors {
            area += self.contour_area(anchor)?;
        }
        f.area.set(Some(area));
        Ok(area)
    }

    /// The bounding box of a finite face's outer contour. Lazily cached.
    ///
    /// Fails with [`Error::InfiniteFaceNoBox`] for face 0.
    pub fn face_bounding_box(&self, face: FaceIdx) -> Result<Rect, Error> {
        if face.label() == 0 {
            return Err(Error::InfiniteFaceNoBox);
        }
        let f = &self.faces[face];
        if let Some(bbox) = f.bbox.get() {
            return Ok(bbox);
        }
        let anchor = *f.anchors.first().ok_or(Error::Corrupt)?;
        let mut bbox: Option<Rect> = None;
        let mut d = anchor;
        loop {
            let e = self.edges.get(d.edge()).ok_or(Error::InvalidDart)?;
            let eb = e.poly.bounding_box();
            bbox = Some(match bbox {
                Some(b) => b.union(eb),
                None => eb,
            });
            d = self.next_phi(d)?;
            if d == anchor {
                break;
            }
        }
        let bbox = bbox.ok_or(Error::Corrupt)?;
        f.bbox.set(Some(bbox));
        Ok(bbox)
    }

    /// Does the face contain `point`?
    ///
    /// Tries the label image first (O(1)), then falls back to geometry:
    /// inside the outer contour and outside every hole.
    pub fn face_contains(&self, face: FaceIdx, point: Point) -> Result<bool, Error> {
        if let Some(image) = &self.label_image {
            if let Some(v) = image.get(Pixel::nearest(point)) {
                if v > 0 && self.face_lut.get(v as u32) == face.label() {
                    return Ok(true);
                }
            }
        }
        let f = &self.faces[face];
        let mut holes_from = 0;
        if face.label() != 0 {
            let bbox = self.face_bounding_box(face)?;
            let inside_bbox = bbox.x0 <= point.x
                && point.x <= bbox.x1
                && bbox.y0 <= point.y
                && point.y <= bbox.y1;
            if !inside_bbox {
                return Ok(false);
            }
            if !self.contour_poly(f.anchors[0])?.contains(point) {
                return Ok(false);
            }
            holes_from = 1;
        }
        for &anchor in f.anchors.iter().skip(holes_from) {
            if self.contour_poly(anchor)?.contains(point) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The face geometrically containing `point`.
    pub fn face_at(&self, point: Point) -> Result<FaceIdx, Error> {
        if let Some(image) = &self.label_image {
            if let Some(v) = image.get(Pixel::nearest(point)) {
                if v > 0 {
                    return Ok(FaceIdx(self.face_lut.get(v as u32)));
                }
            }
        }
        for face in self.faces.indices() {
            if face.label() == 0 {
                continue;
            }
            if self.face_contains(face, point)? {
                return Ok(face);
            }
        }
        Ok(FaceIdx(0))
    }

    /// The node closest to `position` within the given squared distance.
    pub fn nearest_node(&self, position: Point, max_sq_dist: f64) -> Option<NodeIdx> {
        self.node_index.nearest(position, max_sq_dist).map(|(_, n)| n)
    }

    // --- σ-orbit sorting ------------------------------------------------

    /// Sorts every node's dart list by the angle of each dart's first
    /// polyline segment. Idempotent; ties between parallel first segments
    /// are left in arrival order (use
    /// [`sort_edges_eventually`](Self::sort_edges_eventually) to resolve
    /// them).
    pub fn sort_edges_directly(&mut self) {
        let node_ids: Vec<NodeIdx> = self.nodes.indices().collect();
        for n in node_ids {
            let mut angles: Vec<(OrderedFloat<f64>, i32)> = self.nodes[n]
                .darts
                .iter()
                .map(|&label| {
                    let d = Dart(label);
                    let p0 = self.dart_point(d, 0);
                    let p1 = self.dart_point(d, 1);
                    (OrderedFloat((-(p1.y - p0.y)).atan2(p1.x - p0.x)), label)
                })
                .collect();
            angles.sort();
            self.nodes[n].darts = angles.into_iter().map(|(_, label)| label).collect();
        }
    }

    /// Sorts every node's dart list by outgoing angle, resolving groups of
    /// near-parallel darts by walking them outward.
    ///
    /// Darts whose directions differ by less than `atan2(min_dist,
    /// step_dist)` form a tie group; the group members are advanced to the
    /// circle of radius `step_dist` around their common position and sorted
    /// recursively from there. Fails with [`Error::Corrupt`] if a tie group
    /// cannot be resolved before all its darts run out of points.
    pub fn sort_edges_eventually(&mut self, step_dist: f64, min_dist: f64) -> Result<(), Error> {
        let min_angle = min_dist.atan2(step_dist);
        let step_dist2 = step_dist * step_dist;

        let node_ids: Vec<NodeIdx> = self.nodes.indices().collect();
        for n in node_ids {
            let mut group: Vec<DartPositionAngle> = self.nodes[n]
                .darts
                .iter()
                .map(|&label| DartPositionAngle::new(label, self.dart_points_vec(Dart(label))))
                .collect();
            sort_edges_internal(
                self.nodes[n].position,
                0.0,
                &mut group,
                step_dist2,
                min_angle,
            )?;
            self.nodes[n].darts = group.iter().map(|g| g.dp.label).collect();
        }
        Ok(())
    }

    // --- contour initialization and face embedding ----------------------

    /// Creates the infinite face and one preliminary face per unembedded
    /// edge side, stamping each φ-orbit.
    ///
    /// # Panics
    ///
    /// Panics if contours are already present.
    pub fn init_contours(&mut self) -> Result<(), Error> {
        assert!(
            self.faces.slot_count() == 0,
            "init_contours() called when contours were already present"
        );
        self.faces.push(Face::infinite());

        let edge_ids: Vec<EdgeIdx> = self.edges.indices().collect();
        for e in edge_ids {
            if self.edges[e].left.is_none() {
                self.preliminary_face(Dart::positive(e))?;
            }
            if self.edges[e].right.is_none() {
                self.preliminary_face(Dart::negative(e))?;
            }
        }
        Ok(())
    }

    fn preliminary_face(&mut self, anchor: Dart) -> Result<FaceIdx, Error> {
        let label = self.faces.push(Face::with_anchor(anchor));
        let mut d = anchor;
        while self.left_face_raw(d)?.is_none() {
            self.set_left_face(d, Some(label))?;
            d = self.next_phi(d)?;
        }
        Ok(label)
    }

    /// Turns the preliminary contours into embedded faces.
    ///
    /// Contours are processed by descending absolute area (negative-area
    /// contour first on near-ties). Positive contours stay as finite faces;
    /// each other contour is a hole whose parent is found through the label
    /// image, through containment tests, or defaults to the infinite face.
    ///
    /// With `init_label_image` set, allocates the label image, scan-fills
    /// every finite face, and stamps contour pixels to −1.
    ///
    /// # Panics
    ///
    /// Panics if a label image was already initialized.
    pub fn embed_faces(&mut self, init_label_image: bool) -> Result<(), Error> {
        assert!(
            self.label_image.is_none(),
            "embed_faces() called with an already-initialized label image"
        );
        if init_label_image {
            self.label_image = Some(LabelImage::new(self.image_size));
            self.face_lut.init_identity(self.faces.slot_count() as u32);
        }

        let mut contours: Vec<(FaceIdx, f64)> = Vec::new();
        let labels: Vec<FaceIdx> = self.faces.indices().collect();
        for f in labels {
            if f.label() == 0 {
                continue;
            }
            let anchor = self.faces[f].anchors[0];
            contours.push((f, self.contour_area(anchor)?));
        }
        contours.sort_by(|(_, a1), (_, a2)| abs_area_order(*a1, *a2));
        tracing::debug!(contours = contours.len(), "embedding faces");

        for (label, area) in contours {
            let face = self.faces.release(label).ok_or(Error::Corrupt)?;
            let anchor = face.anchors[0];

            if area > 0.0 {
                face.area.set(Some(area));
                self.faces.restore(label, face);
                if self.label_image.is_some() {
                    let poly = self.contour_poly(anchor)?;
                    let fill = Scanlines::interior(&poly);
                    let draw = Scanlines::edge(&poly);
                    let mut pixel_area = 0;
                    if let Some(image) = self.label_image.as_mut() {
                        pixel_area = image.fill(&fill, label.label() as i32);
                        image.set(&draw, -1);
                    }
                    self.faces[label].pixel_area = pixel_area;
                }
            } else {
                let poly = self.contour_poly(anchor)?;
                let mut parent: Option<FaceIdx> = None;

                if let Some(image) = &self.label_image {
                    for &p in poly.points() {
                        if let Some(v) = image.get(Pixel::nearest(p)) {
                            if v >= 0 {
                                parent = Some(FaceIdx(v as u32));
                                break;
                            }
                        }
                    }
                }

                if parent.is_none() {
                    let candidates: Vec<FaceIdx> = self.faces.indices().collect();
                    'outer: for &p in poly.points() {
                        for &f in &candidates {
                            if self.face_contains(f, p)? {
                                parent = Some(f);
                                break 'outer;
                            }
                        }
                    }
                }

                let parent = parent.unwrap_or(FaceIdx(0));
                self.embed_contour(parent, anchor)?;

                // hole boundaries are edge pixels too; without this stamp a
                // later edge removal would hand unstamped pixels a bogus label
                if self.label_image.is_some() {
                    let draw = Scanlines::edge(&poly);
                    if let Some(image) = self.label_image.as_mut() {
                        image.set(&draw, -1);
                    }
                }
            }
        }
        Ok(())
    }

    fn embed_contour(&mut self, parent: FaceIdx, anchor: Dart) -> Result<(), Error> {
        self.faces[parent].anchors.push(anchor);
        let mut d = anchor;
        while self.left_face_raw(d)? != Some(parent) {
            self.set_left_face(d, Some(parent))?;
            d = self.next_phi(d)?;
        }
        debug_assert_eq!(d, anchor, "contour labeled partially");
        if let Some(area) = self.faces[parent].area.get() {
            let extra = self.contour_area(anchor)?;
            self.faces[parent].area.set(Some(area + extra));
        }
        Ok(())
    }

    // --- consistency ----------------------------------------------------

    /// A cheap structural scan: do all cross-references resolve to live
    /// cells?
    pub fn check_consistency(&self) -> bool {
        for (_, edge) in self.edges.iter() {
            if !self.nodes.contains(edge.start) || !self.nodes.contains(edge.end) {
                return false;
            }
            if let Some(f) = edge.left {
                if !self.faces.contains(f) {
                    return false;
                }
            }
            if let Some(f) = edge.right {
                if !self.faces.contains(f) {
                    return false;
                }
            }
        }
        for (_, node) in self.nodes.iter() {
            for d in node.darts() {
                if !self.edges.contains(d.edge()) {
                    return false;
                }
            }
        }
        for (_, face) in self.faces.iter() {
            for &a in &face.anchors {
                if !self.edges.contains(a.edge()) {
                    return false;
                }
            }
        }
        true
    }

    /// Verifies the full set of structural invariants, returning a
    /// description of the first violation found.
    ///
    /// Checks, on a map whose contours have been initialized:
    /// the Euler characteristic, dart/σ-list consistency, σ round trips,
    /// cyclic angular order, φ-orbit closure and face labeling, polyline
    /// endpoint agreement, and label-image value validity.
    pub fn check_invariants(&self) -> Result<(), String> {
        // Edges: each signed dart appears exactly once at its node, and
        // the polyline meets its endpoints.
        for (e, edge) in self.edges.iter() {
            let label = e.label() as i32;
            let start = self
                .nodes
                .get(edge.start)
                .ok_or_else(|| format!("{e:?}: start node {:?} missing", edge.start))?;
            let end = self
                .nodes
                .get(edge.end)
                .ok_or_else(|| format!("{e:?}: end node {:?} missing", edge.end))?;
            if start.darts.iter().filter(|&&l| l == label).count() != 1 {
                return Err(format!("{e:?}: +dart not exactly once at start node"));
            }
            if end.darts.iter().filter(|&&l| l == -label).count() != 1 {
                return Err(format!("{e:?}: -dart not exactly once at end node"));
            }
            if edge.poly.first() != start.position {
                return Err(format!("{e:?}: polyline does not start at start node"));
            }
            if edge.poly.last() != end.position {
                return Err(format!("{e:?}: polyline does not end at end node"));
            }
            if edge.left.is_none() || edge.right.is_none() {
                return Err(format!("{e:?}: unembedded side"));
            }
        }

        // Nodes: every listed dart starts here, σ round trips, and the
        // list is in cyclic angular order.
        for (n, node) in self.nodes.iter() {
            let mut thetas = Vec::with_capacity(node.darts.len());
            for &label in &node.darts {
                let d = Dart::from_label(label).ok_or_else(|| format!("{n:?}: zero dart"))?;
                let start = self
                    .start_node(d)
                    .map_err(|err| format!("{n:?}: dart {d:?}: {err}"))?;
                if start != n {
                    return Err(format!("{n:?}: dart {d:?} does not start here"));
                }
                let there = self
                    .sigma(d, 1)
                    .and_then(|x| self.sigma(x, -1))
                    .map_err(|err| format!("{n:?}: σ round trip on {d:?}: {err}"))?;
                if there != d {
                    return Err(format!("{n:?}: σ round trip broke on {d:?}"));
                }
                let p0 = self.dart_point(d, 0);
                let p1 = self.dart_point(d, 1);
                thetas.push((-(p1.y - p0.y)).atan2(p1.x - p0.x));
            }
            if thetas.len() > 1 {
                let descents = (0..thetas.len())
                    .filter(|&i| thetas[(i + 1) % thetas.len()] < thetas[i])
                    .count();
                if descents > 1 {
                    return Err(format!("{n:?}: σ-orbit not in cyclic angular order"));
                }
            }
        }

        // Faces: anchors' φ-orbits close and carry the face label.
        let orbit_cap = 2 * self.edges.slot_count() + 2;
        for (f, face) in self.faces.iter() {
            for &anchor in &face.anchors {
                let mut d = anchor;
                let mut steps = 0;
                loop {
                    let left = self
                        .left_face(d)
                        .map_err(|err| format!("{f:?}: orbit of {anchor:?}: {err}"))?;
                    if left != f {
                        return Err(format!(
                            "{f:?}: dart {d:?} in orbit of {anchor:?} has left face {left:?}"
                        ));
                    }
                    d = self
                        .next_phi(d)
                        .map_err(|err| format!("{f:?}: orbit of {anchor:?}: {err}"))?;
                    steps += 1;
                    if d == anchor {
                        break;
                    }
                    if steps > orbit_cap {
                        return Err(format!("{f:?}: φ-orbit of {anchor:?} does not close"));
                    }
                }
            }
        }

        // Euler characteristic.
        if !self.faces.contains(FaceIdx(0)) {
            return Err("no infinite face".to_owned());
        }
        let v = self.node_count() as i64;
        let e = self.edge_count() as i64;
        let f = self.face_count() as i64;
        let c = self.connected_components();
        if v - e + f - c != 1 {
            return Err(format!(
                "Euler characteristic broken: V={v} E={e} F={f} C={c}"
            ));
        }

        // Label image values resolve to live faces.
        if let Some(image) = &self.label_image {
            for (pixel, value) in image.pixels() {
                if value > 0 {
                    let resolved = FaceIdx(self.face_lut.get(value as u32));
                    if !self.faces.contains(resolved) {
                        return Err(format!(
                            "label image at {pixel:?}: {value} resolves to dead {resolved:?}"
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    fn connected_components(&self) -> i64 {
        let mut seen = vec![false; self.nodes.slot_count()];
        let mut components = 0;
        for n in self.nodes.indices() {
            if seen[n.label() as usize] {
                continue;
            }
            components += 1;
            let mut stack = vec![n];
            seen[n.label() as usize] = true;
            while let Some(m) = stack.pop() {
                for d in self.nodes[m].darts() {
                    let edge = &self.edges[d.edge()];
                    let other = if d.is_positive() { edge.end } else { edge.start };
                    if !seen[other.label() as usize] {
                        seen[other.label() as usize] = true;
                        stack.push(other);
                    }
                }
            }
        }
        components
    }
}

/// Iterator over a φ-orbit; see [`PlanarMap::phi_orbit`].
pub struct PhiOrbit<'a> {
    map: &'a PlanarMap,
    start: Dart,
    next: Option<Dart>,
}

impl Iterator for PhiOrbit<'_> {
    type Item = Result<Dart, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let d = self.next?;
        match self.map.next_phi(d) {
            Ok(n) => {
                self.next = (n != self.start).then_some(n);
                Some(Ok(d))
            }
            Err(err) => {
                self.next = None;
                Some(Err(err))
            }
        }
    }
}

fn abs_area_order(a1: f64, a2: f64) -> Ordering {
    let absdiff = a1.abs() - a2.abs();
    if absdiff.abs() < 1e-2 && (a1 < 0.0) != (a2 < 0.0) {
        // near-equal areas: put the exterior (negative) contour first
        if a1 < 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    } else if absdiff > 0.0 {
        Ordering::Less
    } else if absdiff < 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

fn norm_angle(mut diff: f64) -> f64 {
    if diff < -PI {
        diff += 2.0 * PI;
    }
    if diff >= PI {
        diff -= 2.0 * PI;
    }
    diff
}

/// Walks a dart's polyline outward from its start node, tracking the current
/// position for angular comparison against other darts of the same node.
struct DartPosition {
    label: i32,
    pts: Vec<Point>,
    seg: usize,
    p1: Point,
    p2: Point,
    pos: Point,
    hit_end: bool,
}

impl DartPosition {
    fn new(label: i32, pts: Vec<Point>) -> Self {
        debug_assert!(pts.len() >= 2, "cannot measure the angle of a short dart");
        Self {
            label,
            p1: pts[0],
            p2: pts[1],
            pos: pts[0],
            pts,
            seg: 0,
            hit_end: false,
        }
    }

    fn at_end(&self) -> bool {
        self.hit_end
    }

    fn next_segment(&mut self) -> bool {
        self.p1 = self.p2;
        self.seg += 1;
        if self.seg + 1 >= self.pts.len() {
            self.hit_end = true;
            return false;
        }
        self.p2 = self.pts[self.seg + 1];
        true
    }

    /// Advances to the intersection with the circle around `center` of
    /// squared radius `radius2` (or to the final point if the polyline ends
    /// inside the circle).
    fn intersect_circle(&mut self, center: Point, radius2: f64) {
        while (self.p2 - center).hypot2() < radius2 {
            if !self.next_segment() {
                self.pos = self.p2;
                return;
            }
        }
        let diff: Vec2 = self.p2 - self.p1;
        let dist2 = diff.hypot2();
        let det = self.p2.x * self.p1.y - self.p1.x * self.p2.y + center.x * diff.y
            - diff.x * center.y;
        let lambda = ((radius2 * dist2 - det * det).max(0.0).sqrt() - diff.dot(self.p1 - center))
            / dist2;
        self.pos = self.p1 + diff * lambda;
    }
}

struct DartPositionAngle {
    dp: DartPosition,
    abs_angle: f64,
    angle: f64,
}

impl DartPositionAngle {
    fn new(label: i32, pts: Vec<Point>) -> Self {
        Self {
            dp: DartPosition::new(label, pts),
            abs_angle: 0.0,
            angle: 0.0,
        }
    }
}

/// Sorts a group of darts around `current_pos`, recursing into subgroups
/// whose angles are within `min_angle` of each other.
fn sort_edges_internal(
    current_pos: Point,
    reference_angle: f64,
    group: &mut [DartPositionAngle],
    step_dist2: f64,
    min_angle: f64,
) -> Result<(), Error> {
    if group.len() < 2 {
        return Ok(());
    }

    let mut unsortable = true;
    for entry in group.iter_mut() {
        if !entry.dp.at_end() {
            unsortable = false;
            entry.dp.intersect_circle(current_pos, step_dist2);
        }
        entry.abs_angle =
            (-(entry.dp.pos.y - current_pos.y)).atan2(entry.dp.pos.x - current_pos.x);
        entry.angle = norm_angle(entry.abs_angle - reference_angle);
    }

    if unsortable {
        // every dart of the tie group ran out of points
        return Err(Error::Corrupt);
    }

    group.sort_by_key(|entry| OrderedFloat(entry.angle));

    // handle cyclicity: rotate so a group wrapping past ±π becomes contiguous
    let mut first_group_start = group.len() - 1;
    let mut need_rotation = false;
    loop {
        if group[first_group_start].angle + min_angle < group[0].angle {
            need_rotation = true;
            if first_group_start == 0 {
                need_rotation = false;
                break;
            }
        } else {
            break;
        }
        first_group_start -= 1;
    }
    if need_rotation {
        group.rotate_left(first_group_start);
    }

    // find runs of near-parallel darts and sort them recursively
    let mut group_start = 0;
    for group_end in 1..=group.len() {
        let group_last = group_end - 1;
        let group_over = group_end == group.len()
            || group[group_end].angle >= group[group_last].angle + min_angle;
        if group_over {
            if group_last != group_start {
                let mut mean = Vec2::ZERO;
                for entry in &group[group_start..group_end] {
                    mean += entry.dp.pos.to_vec2();
                }
                let mean = (mean / (group_end - group_start) as f64).to_point();
                let reference = norm_angle(
                    group[group_start].abs_angle
                        + norm_angle(group[group_last].abs_angle - group[group_start].abs_angle)
                            / 2.0,
                );
                sort_edges_internal(
                    mean,
                    reference,
                    &mut group[group_start..group_end],
                    step_dist2,
                    min_angle,
                )?;
            }
            group_start = group_end;
        }
    }

    Ok(())
}
