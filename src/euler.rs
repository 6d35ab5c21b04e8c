//! The Euler operator kernel: the four primitive local modifications and
//! their compositions.
//!
//! Every primitive runs through the same phases: precondition checks (no
//! mutation), pre hooks (any `false` cancels the whole operation), the
//! topological and geometric surgery, label-image maintenance,
//! uninitialization of obsolete cells, post hooks, and finally
//! `associate_pixels` notification when pixels changed their face.

use crate::label_image::{Pixel, Scanlines};
use crate::map::{Dart, EdgeIdx, FaceIdx, NodeIdx, PlanarMap};
use crate::Error;

/// Ordered collections of operation callbacks.
///
/// Each phase holds an ordered list of handlers. Pre handlers return whether
/// the operation may proceed; the first `false` cancels it with
/// [`Error::HookCancelled`] before any state change. Handlers receive the map
/// by shared reference, so they cannot re-enter mutating operations.
///
/// An empty collection (the default) lets every operation proceed.
#[derive(Default)]
pub struct Hooks {
    pub(crate) pre_remove_node: Vec<Box<dyn FnMut(&PlanarMap, NodeIdx) -> bool>>,
    pub(crate) post_remove_node: Vec<Box<dyn FnMut(&PlanarMap, NodeIdx)>>,
    pub(crate) pre_merge_edges: Vec<Box<dyn FnMut(&PlanarMap, Dart) -> bool>>,
    pub(crate) post_merge_edges: Vec<Box<dyn FnMut(&PlanarMap, EdgeIdx)>>,
    pub(crate) pre_remove_bridge: Vec<Box<dyn FnMut(&PlanarMap, Dart) -> bool>>,
    pub(crate) post_remove_bridge: Vec<Box<dyn FnMut(&PlanarMap, FaceIdx)>>,
    pub(crate) pre_merge_faces: Vec<Box<dyn FnMut(&PlanarMap, Dart) -> bool>>,
    pub(crate) post_merge_faces: Vec<Box<dyn FnMut(&PlanarMap, FaceIdx)>>,
    pub(crate) associate_pixels: Vec<Box<dyn FnMut(&PlanarMap, FaceIdx, &[Pixel])>>,
}

impl Hooks {
    /// Called before a node removal; returning `false` cancels the operation.
    pub fn on_pre_remove_node(&mut self, hook: impl FnMut(&PlanarMap, NodeIdx) -> bool + 'static) {
        self.pre_remove_node.push(Box::new(hook));
    }

    /// Called after a node has been removed.
    pub fn on_post_remove_node(&mut self, hook: impl FnMut(&PlanarMap, NodeIdx) + 'static) {
        self.post_remove_node.push(Box::new(hook));
    }

    /// Called before `merge_edges`, with the surviving edge's dart.
    pub fn on_pre_merge_edges(&mut self, hook: impl FnMut(&PlanarMap, Dart) -> bool + 'static) {
        self.pre_merge_edges.push(Box::new(hook));
    }

    /// Called after `merge_edges`, with the surviving edge.
    pub fn on_post_merge_edges(&mut self, hook: impl FnMut(&PlanarMap, EdgeIdx) + 'static) {
        self.post_merge_edges.push(Box::new(hook));
    }

    /// Called before `remove_bridge`, with the bridge dart.
    pub fn on_pre_remove_bridge(&mut self, hook: impl FnMut(&PlanarMap, Dart) -> bool + 'static) {
        self.pre_remove_bridge.push(Box::new(hook));
    }

    /// Called after `remove_bridge`, with the surviving face.
    pub fn on_post_remove_bridge(&mut self, hook: impl FnMut(&PlanarMap, FaceIdx) + 'static) {
        self.post_remove_bridge.push(Box::new(hook));
    }

    /// Called before `merge_faces`, with the given dart.
    pub fn on_pre_merge_faces(&mut self, hook: impl FnMut(&PlanarMap, Dart) -> bool + 'static) {
        self.pre_merge_faces.push(Box::new(hook));
    }

    /// Called after `merge_faces`, with the surviving face.
    pub fn on_post_merge_faces(&mut self, hook: impl FnMut(&PlanarMap, FaceIdx) + 'static) {
        self.post_merge_faces.push(Box::new(hook));
    }

    /// Called when pixels have been re-associated to a face.
    pub fn on_associate_pixels(
        &mut self,
        hook: impl FnMut(&PlanarMap, FaceIdx, &[Pixel]) + 'static,
    ) {
        self.associate_pixels.push(Box::new(hook));
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_remove_node", &self.pre_remove_node.len())
            .field("post_remove_node", &self.post_remove_node.len())
            .field("pre_merge_edges", &self.pre_merge_edges.len())
            .field("post_merge_edges", &self.post_merge_edges.len())
            .field("pre_remove_bridge", &self.pre_remove_bridge.len())
            .field("post_remove_bridge", &self.post_remove_bridge.len())
            .field("pre_merge_faces", &self.pre_merge_faces.len())
            .field("post_merge_faces", &self.post_merge_faces.len())
            .field("associate_pixels", &self.associate_pixels.len())
            .finish()
    }
}

impl PlanarMap {
    fn ensure_mutable(&self) -> Result<(), Error> {
        if self.corrupt {
            Err(Error::Corrupt)
        } else {
            Ok(())
        }
    }

    /// Removes a node of degree zero.
    ///
    /// Fails with [`Error::NotIsolated`] if the node still has incident
    /// edges.
    pub fn remove_isolated_node(&mut self, node: NodeIdx) -> Result<(), Error> {
        self.ensure_mutable()?;
        let result = self.remove_isolated_node_impl(node);
        if matches!(result, Err(Error::Corrupt)) {
            self.corrupt = true;
        }
        result
    }

    fn remove_isolated_node_impl(&mut self, node: NodeIdx) -> Result<(), Error> {
        let n = self.nodes.get(node).ok_or(Error::InvalidNode)?;
        if n.degree() != 0 {
            return Err(Error::NotIsolated);
        }

        let mut hooks = std::mem::take(&mut self.hooks);
        let proceed = hooks.pre_remove_node.iter_mut().all(|h| h(self, node));
        self.hooks = hooks;
        if !proceed {
            return Err(Error::HookCancelled);
        }

        self.uninitialize_node(node);

        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.post_remove_node.iter_mut() {
            h(self, node);
        }
        self.hooks = hooks;
        Ok(())
    }

    /// Node removal on behalf of another primitive: hooks are notified but
    /// cannot cancel halfway through an operation.
    pub(crate) fn remove_isolated_node_internal(&mut self, node: NodeIdx) {
        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.pre_remove_node.iter_mut() {
            let _ = h(self, node);
        }
        self.hooks = hooks;

        self.uninitialize_node(node);

        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.post_remove_node.iter_mut() {
            h(self, node);
        }
        self.hooks = hooks;
    }

    fn uninitialize_node(&mut self, node: NodeIdx) {
        if let Some(n) = self.nodes.release(node) {
            self.node_index.remove(n.position, node);
        }
    }

    fn remove_dart_label(&mut self, node: NodeIdx, label: i32) -> Result<(), Error> {
        let darts = &mut self.nodes[node].darts;
        match darts.iter().position(|&l| l == label) {
            Some(i) => {
                darts.remove(i);
                Ok(())
            }
            None => Err(Error::Corrupt),
        }
    }

    /// The index of the anchor whose contour contains `dart`.
    fn find_component_anchor(&self, face: FaceIdx, dart: Dart) -> Result<usize, Error> {
        let anchors = &self.faces[face].anchors;
        for (i, &a) in anchors.iter().enumerate() {
            if a == dart {
                return Ok(i);
            }
        }
        for (i, &a) in anchors.iter().enumerate() {
            let mut d = a;
            loop {
                d = self.next_phi(d)?;
                if d == a {
                    break;
                }
                if d == dart {
                    return Ok(i);
                }
            }
        }
        Err(Error::Corrupt)
    }

    fn associate_pixels_with(&mut self, face: FaceIdx, pixels: Vec<Pixel>) {
        if pixels.is_empty() {
            return;
        }
        self.faces[face].pixel_area += pixels.len() as i64;
        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.associate_pixels.iter_mut() {
            h(self, face, &pixels);
        }
        self.hooks = hooks;
    }

    /// Merges the two edges meeting at a degree-2 node, removing the node.
    ///
    /// `dart` must start at the node to be removed. The edge of `σ(dart)`
    /// survives; its polyline is extended through the removed node (whose
    /// point is kept once, interior) to the far end of `dart`'s edge.
    ///
    /// Fails with [`Error::DegreeNotTwo`] or [`Error::SelfLoopMerge`].
    pub fn merge_edges(&mut self, dart: Dart) -> Result<EdgeIdx, Error> {
        self.ensure_mutable()?;
        let result = self.merge_edges_impl(dart);
        if matches!(result, Err(Error::Corrupt)) {
            self.corrupt = true;
        }
        result
    }

    fn merge_edges_impl(&mut self, dart: Dart) -> Result<EdgeIdx, Error> {
        let n = self.start_node(dart)?;
        if self.nodes[n].degree() != 2 {
            return Err(Error::DegreeNotTwo);
        }
        let d1 = self.sigma(dart, 1)?;
        if d1.edge() == dart.edge() {
            return Err(Error::SelfLoopMerge);
        }
        debug_assert_eq!(self.sigma(d1, 1).ok(), Some(dart), "σ-orbit of degree-2 node broken");

        let survivor = d1.edge();
        let merged = dart.edge();

        let mut hooks = std::mem::take(&mut self.hooks);
        let mut proceed = hooks.pre_merge_edges.iter_mut().all(|h| h(self, d1));
        proceed = proceed && hooks.pre_remove_node.iter_mut().all(|h| h(self, n));
        self.hooks = hooks;
        if !proceed {
            return Err(Error::HookCancelled);
        }

        // Any anchor sitting on the merged edge advances one φ-step while
        // the old topology is still in place.
        let f_left = self.left_face(dart)?;
        let f_right = self.right_face(dart)?;
        for face in [f_left, f_right] {
            let hit = self.faces[face]
                .anchors
                .iter()
                .position(|a| a.edge() == merged);
            if let Some(i) = hit {
                let advanced = self.next_phi(self.faces[face].anchors[i])?;
                self.faces[face].anchors[i] = advanced;
            }
        }

        // The far node of the merged edge keeps its σ position, relabeled to
        // the surviving dart.
        let far_dart = dart.alpha();
        let changed_end_node = self.start_node(far_dart)?;
        let far_index = self.nodes[changed_end_node]
            .darts
            .iter()
            .position(|&l| l == far_dart.label())
            .ok_or(Error::Corrupt)?;

        if self.label_image.is_some() {
            let scan_merged = Scanlines::edge(&self.edges[merged].poly);
            let scan_survivor = Scanlines::edge(&self.edges[survivor].poly);
            if let Some(image) = self.label_image.as_mut() {
                image.add_edge_stamp(&scan_merged, -1);
                image.add_edge_stamp(&scan_survivor, -1);
            }
        }

        let merged_edge = self.edges.release(merged).ok_or(Error::Corrupt)?;
        let mut merged_poly = merged_edge.poly;
        if merged_edge.start != n {
            merged_poly.reverse();
        }
        let surv = &mut self.edges[survivor];
        if surv.start != n {
            surv.poly.extend(&merged_poly);
            surv.end = changed_end_node;
        } else {
            surv.poly.reverse();
            surv.poly.extend(&merged_poly);
            surv.poly.reverse();
            surv.start = changed_end_node;
        }

        self.nodes[changed_end_node].darts[far_index] = d1.label();

        if self.label_image.is_some() {
            let scan_new = Scanlines::edge(&self.edges[survivor].poly);
            if let Some(image) = self.label_image.as_mut() {
                image.add_edge_stamp(&scan_new, 1);
            }
        }

        self.uninitialize_node(n);

        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.post_merge_edges.iter_mut() {
            h(self, survivor);
        }
        self.hooks = hooks;

        Ok(survivor)
    }

    /// Removes a bridge, splitting (or shrinking) a contour of its face.
    ///
    /// Endpoints left isolated by the removal are removed as well, and their
    /// anchors dropped. Reclaimed edge pixels are substituted with the face
    /// label and reported to the `associate_pixels` hooks.
    ///
    /// Fails with [`Error::NotABridge`] if the edge has two distinct faces.
    pub fn remove_bridge(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        self.ensure_mutable()?;
        let result = self.remove_bridge_impl(dart);
        if matches!(result, Err(Error::Corrupt)) {
            self.corrupt = true;
        }
        result
    }

    fn remove_bridge_impl(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        let edge = dart.edge();
        let face = self.left_face(dart)?;
        if self.right_face(dart)? != face {
            return Err(Error::NotABridge);
        }
        let n1 = self.start_node(dart)?;
        let n2 = self.end_node(dart)?;
        if n1 == n2 {
            // a bridge that is also a self-loop cannot occur in a consistent map
            return Err(Error::Corrupt);
        }

        let mut hooks = std::mem::take(&mut self.hooks);
        let proceed = hooks.pre_remove_bridge.iter_mut().all(|h| h(self, dart));
        self.hooks = hooks;
        if !proceed {
            return Err(Error::HookCancelled);
        }

        // New component anchors, computed while the bridge is still attached.
        let mut a1 = self.sigma(dart, -1)?;
        let mut a2 = self.sigma(dart.alpha(), -1)?;
        let contour_index = self.find_component_anchor(face, dart)?;

        self.remove_dart_label(n1, dart.label())?;
        self.remove_dart_label(n2, -dart.label())?;

        if contour_index == 0 {
            // keep the geometrically outer contour as the first anchor
            let swap = if a1.edge() == edge {
                true
            } else if a2.edge() == edge {
                false
            } else {
                self.contour_area(a1)? < self.contour_area(a2)?
            };
            if swap {
                std::mem::swap(&mut a1, &mut a2);
            }
        }

        self.faces[face].anchors[contour_index] = a1;
        self.faces[face].anchors.push(a2);

        let mut pixels = Vec::new();
        if self.label_image.is_some() {
            let scan = Scanlines::edge(&self.edges[edge].poly);
            if let Some(image) = self.label_image.as_mut() {
                image.remove_edge(&scan, face.label() as i32, &mut pixels);
            }
        }

        // endpoints that became isolated go away with their anchor
        if a1.edge() == edge {
            let isolated = self.start_node(a1)?;
            self.remove_isolated_node_internal(isolated);
            self.faces[face].anchors.remove(contour_index);
        }
        if a2.edge() == edge {
            let isolated = self.start_node(a2)?;
            self.remove_isolated_node_internal(isolated);
            self.faces[face].anchors.pop();
        }

        self.edges.release(edge).ok_or(Error::Corrupt)?;

        // the contour set changed; derived quantities must not go stale
        self.faces[face].area.set(None);
        self.faces[face].bbox.set(None);

        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.post_remove_bridge.iter_mut() {
            h(self, face);
        }
        self.hooks = hooks;

        self.associate_pixels_with(face, pixels);
        Ok(face)
    }

    /// Merges the faces on both sides of a non-bridge edge.
    ///
    /// The larger face survives, except that the infinite face always
    /// survives when involved. Reclaimed edge pixels are substituted with the
    /// survivor's label and reported to the `associate_pixels` hooks;
    /// endpoints left isolated are removed.
    ///
    /// Fails with [`Error::IsBridge`] on a bridge.
    pub fn merge_faces(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        self.ensure_mutable()?;
        let result = self.merge_faces_impl(dart);
        if matches!(result, Err(Error::Corrupt)) {
            self.corrupt = true;
        }
        result
    }

    fn merge_faces_impl(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        let mut rd = dart;
        {
            let left_area = self.face_area(self.left_face(rd)?)?;
            let right_area = self.face_area(self.right_face(rd)?)?;
            if left_area < right_area {
                rd = rd.alpha();
            }
        }
        if self.right_face(rd)?.label() == 0 {
            // face 0 shall stay face 0
            rd = rd.alpha();
        }

        let edge = rd.edge();
        let survivor = self.left_face(rd)?;
        let merged = self.right_face(rd)?;
        if survivor == merged {
            return Err(Error::IsBridge);
        }
        let n1 = self.start_node(rd)?;
        let n2 = self.end_node(rd)?;

        let contour1 = self.find_component_anchor(survivor, rd)?;
        let contour2 = self.find_component_anchor(merged, rd.alpha())?;

        let mut hooks = std::mem::take(&mut self.hooks);
        let proceed = hooks.pre_merge_faces.iter_mut().all(|h| h(self, dart));
        self.hooks = hooks;
        if !proceed {
            return Err(Error::HookCancelled);
        }

        // Snapshots before surgery: the merged face's orbits are relabeled
        // below, after which its area can no longer be recomputed.
        let merged_area = self.face_area(merged)?;
        let merged_pixel_area = self.faces[merged].pixel_area;
        let merged_bbox = if self.faces[survivor].bbox.get().is_some() {
            Some(self.face_bounding_box(merged)?)
        } else {
            None
        };

        // All of the merged face's contours now belong to the survivor.
        let merged_anchors: Vec<Dart> = self.faces[merged].anchors.clone();
        for &anchor in &merged_anchors {
            let mut d = anchor;
            loop {
                d = self.next_phi(d)?;
                if self.left_face_raw(d)? == Some(survivor) {
                    break;
                }
                self.set_left_face(d, Some(survivor))?;
            }
        }

        // Re-anchor the shared contour away from the disappearing edge.
        let mut anchor = self.faces[survivor].anchors[contour1];
        if anchor.edge() == edge {
            anchor = self.next_phi(anchor)?;
            if anchor.edge() == edge {
                anchor = merged_anchors[contour2];
                if anchor.edge() == edge {
                    anchor = self.next_phi(anchor)?;
                }
            }
        }
        self.faces[survivor].anchors[contour1] = anchor;

        if self.faces[survivor].anchors[contour1].edge() == edge {
            // the faces shared only this edge: merging a self-loop
            if n1 != n2 {
                return Err(Error::Corrupt);
            }
            self.faces[survivor].anchors.remove(contour1);
        }

        for (i, &a) in merged_anchors.iter().enumerate() {
            if i != contour2 {
                self.faces[survivor].anchors.push(a);
            }
        }

        let mut pixels = Vec::new();
        if self.label_image.is_some() {
            self.face_lut.relabel(merged.label(), survivor.label());
            let scan = Scanlines::edge(&self.edges[edge].poly);
            if let Some(image) = self.label_image.as_mut() {
                image.remove_edge(&scan, survivor.label() as i32, &mut pixels);
            }
        }

        self.remove_dart_label(n1, rd.label())?;
        self.remove_dart_label(n2, -rd.label())?;

        let remove_n1 = self.nodes[n1].degree() == 0;
        if n2 != n1 && self.nodes[n2].degree() == 0 {
            self.remove_isolated_node_internal(n2);
        }
        if remove_n1 {
            self.remove_isolated_node_internal(n1);
        }

        let sf = &self.faces[survivor];
        if let Some(area) = sf.area.get() {
            sf.area.set(Some(area + merged_area));
        }
        if let (Some(bbox), Some(merged_bbox)) = (sf.bbox.get(), merged_bbox) {
            sf.bbox.set(Some(bbox.union(merged_bbox)));
        }
        self.faces[survivor].pixel_area += merged_pixel_area;

        self.edges.release(edge).ok_or(Error::Corrupt)?;
        self.faces.release(merged).ok_or(Error::Corrupt)?;

        let mut hooks = std::mem::take(&mut self.hooks);
        for h in hooks.post_merge_faces.iter_mut() {
            h(self, survivor);
        }
        self.hooks = hooks;

        self.associate_pixels_with(survivor, pixels);
        Ok(survivor)
    }

    /// Removes an edge: [`remove_bridge`](Self::remove_bridge) for bridges,
    /// [`merge_faces`](Self::merge_faces) otherwise.
    pub fn remove_edge(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        if self.is_bridge(dart)? {
            self.remove_bridge(dart)
        } else {
            self.merge_faces(dart)
        }
    }

    /// Removes an edge and any endpoint that is left isolated.
    pub fn remove_edge_with_ends(&mut self, dart: Dart) -> Result<FaceIdx, Error> {
        let n1 = self.start_node(dart)?;
        let n2 = self.end_node(dart)?;
        let face = self.remove_edge(dart)?;
        if self.nodes.get(n1).is_some_and(|n| n.degree() == 0) {
            self.remove_isolated_node_internal(n1);
        }
        if n2 != n1 && self.nodes.get(n2).is_some_and(|n| n.degree() == 0) {
            self.remove_isolated_node_internal(n2);
        }
        Ok(face)
    }
}
