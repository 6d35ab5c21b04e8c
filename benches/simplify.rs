use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use planemap::{ImageSize, NodeIdx, PlanarMap, Point, Pyramid};

fn chain_of(count: u32) -> PlanarMap {
    let mut nodes = vec![None];
    let mut edges = vec![None];
    for i in 1..=count {
        nodes.push(Some(Point::new(2.0 * i as f64, 0.0)));
    }
    for i in 1..count {
        edges.push(Some((
            NodeIdx::new(i),
            NodeIdx::new(i + 1),
            vec![
                Point::new(2.0 * i as f64, 0.0),
                Point::new(2.0 * (i + 1) as f64, 0.0),
            ],
        )));
    }
    PlanarMap::from_cells(nodes, edges, ImageSize::EMPTY).unwrap()
}

fn construction(c: &mut Criterion) {
    c.bench_function("construct_chain_500", |b| b.iter(|| chain_of(500)));
}

fn smoothing(c: &mut Criterion) {
    let map = chain_of(500);
    c.bench_function("smooth_chain_500", |b| {
        b.iter_batched(
            || Pyramid::new(map.clone()),
            |mut pyramid| {
                loop {
                    let dart = pyramid.top_map().nodes().find_map(|(_, node)| {
                        (node.degree() == 2).then(|| node.anchor().expect("anchored"))
                    });
                    match dart {
                        Some(d) => {
                            pyramid.merge_edges(d).expect("chain smoothing");
                        }
                        None => break,
                    }
                }
                pyramid
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, construction, smoothing);
criterion_main!(benches);
