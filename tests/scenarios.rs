//! End-to-end scenarios over small hand-built maps.

use planemap::{Dart, Error, FaceIdx, ImageSize, NodeIdx, Pixel, PlanarMap, Point};

fn pts(coords: &[(f64, f64)]) -> Vec<Point> {
    coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
}

fn n(label: u32) -> NodeIdx {
    NodeIdx::new(label)
}

fn assert_invariants(map: &PlanarMap) {
    if let Err(violation) = map.check_invariants() {
        panic!("invariant violated: {violation}");
    }
    assert!(map.check_consistency());
}

/// Two nodes joined by a single edge: the edge is a bridge of the infinite
/// face, and the only contour is a hole of face 0.
fn single_edge_map() -> PlanarMap {
    PlanarMap::from_cells(
        vec![None, Some(Point::new(0.0, 0.0)), Some(Point::new(10.0, 0.0))],
        vec![None, Some((n(1), n(2), pts(&[(0.0, 0.0), (10.0, 0.0)])))],
        ImageSize::new(20, 20),
    )
    .unwrap()
}

fn triangle_map() -> PlanarMap {
    PlanarMap::from_cells(
        vec![
            None,
            Some(Point::new(0.0, 0.0)),
            Some(Point::new(10.0, 0.0)),
            Some(Point::new(5.0, 9.0)),
        ],
        vec![
            None,
            Some((n(1), n(2), pts(&[(0.0, 0.0), (10.0, 0.0)]))),
            Some((n(2), n(3), pts(&[(10.0, 0.0), (5.0, 9.0)]))),
            Some((n(3), n(1), pts(&[(5.0, 9.0), (0.0, 0.0)]))),
        ],
        ImageSize::new(20, 20),
    )
    .unwrap()
}

/// A unit-ish square with a dangling edge from one corner into its center.
fn square_with_dangling_edge() -> PlanarMap {
    PlanarMap::from_cells(
        vec![
            None,
            Some(Point::new(0.0, 0.0)),
            Some(Point::new(10.0, 0.0)),
            Some(Point::new(10.0, 10.0)),
            Some(Point::new(0.0, 10.0)),
            Some(Point::new(5.0, 5.0)),
        ],
        vec![
            None,
            Some((n(1), n(2), pts(&[(0.0, 0.0), (10.0, 0.0)]))),
            Some((n(2), n(3), pts(&[(10.0, 0.0), (10.0, 10.0)]))),
            Some((n(3), n(4), pts(&[(10.0, 10.0), (0.0, 10.0)]))),
            Some((n(4), n(1), pts(&[(0.0, 10.0), (0.0, 0.0)]))),
            Some((n(1), n(5), pts(&[(0.0, 0.0), (5.0, 5.0)]))),
        ],
        ImageSize::new(20, 20),
    )
    .unwrap()
}

/// A three-node chain A - e1 - B - e2 - C, no label image.
fn chain_map() -> PlanarMap {
    PlanarMap::from_cells(
        vec![
            None,
            Some(Point::new(0.0, 0.0)),
            Some(Point::new(5.0, 0.0)),
            Some(Point::new(12.0, 0.0)),
        ],
        vec![
            None,
            Some((n(1), n(2), pts(&[(0.0, 0.0), (5.0, 0.0)]))),
            Some((n(2), n(3), pts(&[(5.0, 0.0), (12.0, 0.0)]))),
        ],
        ImageSize::EMPTY,
    )
    .unwrap()
}

#[test]
fn single_edge_is_a_bridge_of_the_infinite_face() {
    let mut map = single_edge_map();
    assert_eq!(map.node_count(), 2);
    assert_eq!(map.edge_count(), 1);
    assert_eq!(map.face_count(), 1);
    assert_invariants(&map);

    let edge = map.edge(planemap::EdgeIdx::new(1)).unwrap();
    assert!(edge.is_bridge());
    assert_eq!(edge.left_face(), Some(FaceIdx::new(0)));
    assert_eq!(edge.right_face(), Some(FaceIdx::new(0)));

    // both endpoints have degree 1, so merging the edges at either end fails
    assert_eq!(map.merge_edges(map.dart(1)), Err(Error::DegreeNotTwo));

    let survivor = map.remove_bridge(map.dart(1)).unwrap();
    assert_eq!(survivor, FaceIdx::new(0));
    // the endpoints became isolated and were removed along with the bridge
    assert_eq!(map.node_count(), 0);
    assert_eq!(map.edge_count(), 0);
    assert_eq!(map.face_count(), 1);
    assert_invariants(&map);
}

#[test]
fn triangle_has_one_finite_face_of_area_45() {
    let map = triangle_map();
    assert_eq!(map.node_count(), 3);
    assert_eq!(map.edge_count(), 3);
    assert_eq!(map.face_count(), 2);
    assert_invariants(&map);

    let triangle = map
        .faces()
        .map(|(f, _)| f)
        .find(|f| f.label() != 0)
        .unwrap();
    assert_eq!(map.face(triangle).unwrap().contours().len(), 1);
    assert!((map.face_area(triangle).unwrap().abs() - 45.0).abs() < 1e-9);

    // none of the triangle's edges is a bridge
    for (_, edge) in map.edges() {
        assert!(!edge.is_bridge());
    }
    // the label image knows the interior
    assert_eq!(map.face_at(Point::new(5.0, 3.0)).unwrap(), triangle);
    assert_eq!(map.face_at(Point::new(15.0, 15.0)).unwrap(), FaceIdx::new(0));
    assert_eq!(
        map.label_image().unwrap().get(Pixel { x: 5, y: 0 }),
        Some(-1)
    );
}

#[test]
fn merging_the_triangle_into_the_plane() {
    let mut map = triangle_map();
    let triangle = map
        .faces()
        .map(|(f, _)| f)
        .find(|f| f.label() != 0)
        .unwrap();

    let survivor = map.merge_faces(map.dart(1)).unwrap();
    assert_eq!(survivor, FaceIdx::new(0), "face 0 always survives");
    assert_eq!(map.face_count(), 1);
    assert!(map.face(triangle).is_none());
    assert_eq!(map.edge_count(), 2);
    assert_eq!(map.node_count(), 3);
    assert_invariants(&map);

    // the interior now resolves to the infinite face through the LUT
    assert_eq!(map.face_at(Point::new(5.0, 3.0)).unwrap(), FaceIdx::new(0));

    // darts of the removed edge are dead
    assert_eq!(map.left_face(map.dart(1)), Err(Error::InvalidDart));
    assert_eq!(map.contour_area(map.dart(-1)), Err(Error::InvalidDart));

    // the remaining chain can be smoothed with the label image in place
    let survivor = map.merge_edges(map.dart(3)).unwrap();
    assert_eq!(map.edge(survivor).unwrap().polyline().len(), 3);
    assert_eq!(map.edge_count(), 1);
    assert_eq!(map.node_count(), 2);
    assert_invariants(&map);
}

#[test]
fn merge_faces_rejects_bridges() {
    let mut chain = chain_map();
    assert_eq!(chain.merge_faces(chain.dart(1)), Err(Error::IsBridge));

    let mut triangle = triangle_map();
    assert_eq!(
        triangle.remove_bridge(triangle.dart(1)),
        Err(Error::NotABridge)
    );
}

#[test]
fn dangling_edge_is_a_bridge_and_removal_isolates_its_endpoint() {
    let mut map = square_with_dangling_edge();
    assert_eq!(map.face_count(), 2);
    assert_invariants(&map);

    let bridge = map.dart(5);
    assert!(map.is_bridge(bridge).unwrap());

    map.remove_bridge(bridge).unwrap();
    assert_eq!(map.face_count(), 2);
    assert_eq!(map.edge_count(), 4);
    // the interior endpoint became isolated and was removed
    assert_eq!(map.node_count(), 4);
    assert!(map.node(n(5)).is_none());
    assert_invariants(&map);
}

#[test]
fn degree_two_smoothing_keeps_the_interior_point() {
    let mut map = chain_map();
    // the dart of e1 starting at the degree-2 node B
    let survivor = map.merge_edges(map.dart(-1)).unwrap();
    assert_eq!(survivor, planemap::EdgeIdx::new(2));
    assert_eq!(map.node_count(), 2);
    assert_eq!(map.edge_count(), 1);
    assert_invariants(&map);

    let edge = map.edge(survivor).unwrap();
    assert_eq!(edge.start_node(), n(1));
    assert_eq!(edge.end_node(), n(3));
    assert_eq!(
        edge.polyline().points(),
        &[
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(12.0, 0.0)
        ]
    );
}

#[test]
fn merge_edges_rejects_self_loops() {
    let mut map = PlanarMap::from_cells(
        vec![None, Some(Point::new(0.0, 0.0))],
        vec![
            None,
            Some((
                n(1),
                n(1),
                pts(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]),
            )),
        ],
        ImageSize::EMPTY,
    )
    .unwrap();
    assert_eq!(map.node_count(), 1);
    assert_eq!(map.face_count(), 2);
    assert_invariants(&map);
    assert_eq!(map.merge_edges(map.dart(1)), Err(Error::SelfLoopMerge));
}

#[test]
fn remove_isolated_node_requires_isolation() {
    let mut map = PlanarMap::from_cells(
        vec![
            None,
            Some(Point::new(0.0, 0.0)),
            Some(Point::new(10.0, 0.0)),
            Some(Point::new(5.0, 9.0)),
            Some(Point::new(40.0, 40.0)), // isolated
        ],
        vec![
            None,
            Some((n(1), n(2), pts(&[(0.0, 0.0), (10.0, 0.0)]))),
            Some((n(2), n(3), pts(&[(10.0, 0.0), (5.0, 9.0)]))),
            Some((n(3), n(1), pts(&[(5.0, 9.0), (0.0, 0.0)]))),
        ],
        ImageSize::EMPTY,
    )
    .unwrap();
    assert_eq!(map.node_count(), 4);
    assert_invariants(&map);

    assert_eq!(map.remove_isolated_node(n(1)), Err(Error::NotIsolated));
    assert_eq!(map.remove_isolated_node(n(9)), Err(Error::InvalidNode));

    map.remove_isolated_node(n(4)).unwrap();
    assert_eq!(map.node_count(), 3);
    assert!(map.node(n(4)).is_none());
    assert_invariants(&map);
}

#[test]
fn remove_edge_dispatches_on_bridgeness() {
    // bridge case
    let mut chain = chain_map();
    chain.remove_edge(chain.dart(2)).unwrap();
    assert_eq!(chain.edge_count(), 1);
    // C became isolated and is gone; B keeps degree 1
    assert_eq!(chain.node_count(), 2);
    assert_invariants(&chain);

    // non-bridge case
    let mut triangle = triangle_map();
    triangle.remove_edge(triangle.dart(2)).unwrap();
    assert_eq!(triangle.face_count(), 1);
    assert_invariants(&triangle);
}

#[test]
fn remove_edge_with_ends_cleans_up_both_endpoints() {
    let mut map = single_edge_map();
    map.remove_edge_with_ends(map.dart(1)).unwrap();
    assert_eq!(map.node_count(), 0);
    assert_eq!(map.edge_count(), 0);
    assert_invariants(&map);
}

#[test]
fn infinite_face_has_no_bounding_box() {
    let map = triangle_map();
    assert_eq!(
        map.face_bounding_box(FaceIdx::new(0)),
        Err(Error::InfiniteFaceNoBox)
    );
    let triangle = map
        .faces()
        .map(|(f, _)| f)
        .find(|f| f.label() != 0)
        .unwrap();
    let bbox = map.face_bounding_box(triangle).unwrap();
    assert_eq!((bbox.x0, bbox.y0, bbox.x1, bbox.y1), (0.0, 0.0, 10.0, 9.0));
}

#[test]
fn sigma_and_phi_round_trips() {
    let map = square_with_dangling_edge();
    for (_, node) in map.nodes() {
        for d in node.darts() {
            assert_eq!(d.alpha().alpha(), d);
            let s = map.sigma(d, 1).unwrap();
            assert_eq!(map.sigma(s, -1).unwrap(), d);
            let p = map.next_phi(d).unwrap();
            assert_eq!(map.prev_phi(p).unwrap(), d);
        }
    }

    // every φ-orbit closes
    for (_, node) in map.nodes() {
        for d in node.darts() {
            let orbit: Result<Vec<Dart>, _> = map.phi_orbit(d).collect();
            let orbit = orbit.unwrap();
            assert!(orbit.len() <= 2 * map.edge_count());
            assert_eq!(orbit[0], d);
        }
    }
}

#[test]
fn sorting_edges_directly_is_idempotent() {
    let mut map = square_with_dangling_edge();
    let before: Vec<Vec<Dart>> = map.nodes().map(|(_, n)| n.darts().collect()).collect();
    map.sort_edges_directly();
    let after: Vec<Vec<Dart>> = map.nodes().map(|(_, n)| n.darts().collect()).collect();
    assert_eq!(before, after);
}

#[test]
fn tangent_sort_separates_edges_with_a_common_first_segment() {
    // two edges leaving the node along the same segment, diverging later
    let mut map = PlanarMap::new(ImageSize::EMPTY);
    let a = map.add_node(Point::new(0.0, 0.0));
    let up = map.add_node(Point::new(10.0, 5.0));
    let down = map.add_node(Point::new(10.0, -5.0));
    map.add_edge(a, up, pts(&[(0.0, 0.0), (5.0, 0.0), (10.0, 5.0)]))
        .unwrap();
    map.add_edge(a, down, pts(&[(0.0, 0.0), (5.0, 0.0), (10.0, -5.0)]))
        .unwrap();

    map.sort_edges_eventually(2.0, 1.0).unwrap();
    let order: Vec<Dart> = map.node(a).unwrap().darts().collect();
    // ascending θ = atan2(-Δy, Δx): the dart bending toward +y comes first
    assert_eq!(order, vec![map.dart(1), map.dart(2)]);

    map.init_contours().unwrap();
    map.embed_faces(false).unwrap();
    assert_invariants(&map);
}

#[test]
fn hooks_cancel_atomically() {
    let mut map = triangle_map();
    map.hooks_mut().on_pre_merge_faces(|_, _| false);

    assert_eq!(map.merge_faces(map.dart(1)), Err(Error::HookCancelled));
    assert_eq!(map.face_count(), 2);
    assert_eq!(map.edge_count(), 3);
    assert_invariants(&map);

    // bridge removal and node removal hooks cancel the same way
    let mut map = single_edge_map();
    map.hooks_mut().on_pre_remove_bridge(|_, _| false);
    assert_eq!(map.remove_bridge(map.dart(1)), Err(Error::HookCancelled));
    assert_eq!(map.edge_count(), 1);
    assert_invariants(&map);

    let mut map = chain_map();
    map.hooks_mut().on_pre_remove_node(|_, _| false);
    assert_eq!(map.merge_edges(map.dart(-1)), Err(Error::HookCancelled));
    assert_eq!(map.edge_count(), 2);
    assert_invariants(&map);
}

#[test]
fn merge_faces_reports_reclaimed_pixels() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut map = triangle_map();
    let seen: Rc<RefCell<Vec<(FaceIdx, usize)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    map.hooks_mut()
        .on_associate_pixels(move |_, face, pixels| sink.borrow_mut().push((face, pixels.len())));

    let survivor = map.merge_faces(map.dart(1)).unwrap();
    let reported = seen.borrow().clone();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, survivor);
    assert!(reported[0].1 > 0, "the merged edge must free some pixels");
    assert_invariants(&map);

    // a pixel in the middle of the removed base edge now carries the
    // survivor's label (face 0)
    assert_eq!(
        map.label_image().unwrap().get(Pixel { x: 5, y: 0 }),
        Some(0)
    );
}

#[test]
fn post_hooks_see_the_final_state() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut map = chain_map();
    let counts: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&counts);
    map.hooks_mut()
        .on_post_merge_edges(move |map, _| sink.borrow_mut().push(map.edge_count()));

    map.merge_edges(map.dart(-1)).unwrap();
    assert_eq!(counts.borrow().as_slice(), &[1]);
}

#[test]
fn nearest_node_uses_the_position_index() {
    let mut map = triangle_map();
    assert_eq!(map.nearest_node(Point::new(0.4, 0.1), 1.0), Some(n(1)));
    assert_eq!(map.nearest_node(Point::new(50.0, 50.0), 1.0), None);

    // removing cells keeps the index in sync
    map.merge_faces(map.dart(1)).unwrap();
    map.remove_edge_with_ends(map.dart(2)).unwrap();
    map.remove_edge_with_ends(map.dart(3)).unwrap();
    assert_eq!(map.node_count(), 0);
    assert_eq!(map.nearest_node(Point::new(0.0, 0.0), f64::MAX), None);
}

#[test]
fn moving_a_node_drags_its_polylines() {
    let mut map = chain_map();
    map.set_node_position(n(2), Point::new(6.0, 1.0)).unwrap();
    assert_eq!(map.node(n(2)).unwrap().position(), Point::new(6.0, 1.0));
    assert_eq!(
        map.edge(planemap::EdgeIdx::new(1)).unwrap().polyline().last(),
        Point::new(6.0, 1.0)
    );
    assert_eq!(
        map.edge(planemap::EdgeIdx::new(2)).unwrap().polyline().first(),
        Point::new(6.0, 1.0)
    );
    assert_eq!(map.nearest_node(Point::new(6.0, 1.0), 0.01), Some(n(2)));
    assert_invariants(&map);
}

#[test]
fn edge_protection_flags() {
    let mut map = chain_map();
    let e = planemap::EdgeIdx::new(1);
    assert!(!map.edge(e).unwrap().is_protected());
    map.set_edge_protection(e, 0b10, true).unwrap();
    assert!(map.edge(e).unwrap().is_protected());
    assert_eq!(map.edge(e).unwrap().protection(), 0b10);
    map.set_edge_protection(e, 0b10, false).unwrap();
    assert!(!map.edge(e).unwrap().is_protected());
}
