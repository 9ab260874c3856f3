//! Property tests: seeded refreshes over random trees behave like full ones.

mod common;

use common::builders::ProbeBuilder;
use common::probe_filters::ProbeControl;
use common::{assert_no_alias, caching_scheduler, uncached_scheduler};
use pointvis_rs::pipeline::{
    FilterBehavior, FilterId, FilterTree, PropagationMasks, PropertyValue, SharedStream,
    StreamTypeMask,
};
use proptest::prelude::*;

/// One generated filter: parent slot (modulo the filters before it), masks
/// as raw bits, and whether its size is known.
#[derive(Debug, Clone)]
struct NodeShape {
    parent: Option<usize>,
    emit: u32,
    block: u32,
    uses: u32,
    cacheable: bool,
}

fn node_shape() -> impl Strategy<Value = NodeShape> {
    (
        prop::option::weighted(0.85, 0usize..64),
        0u32..64,
        0u32..64,
        0u32..64,
        prop::bool::weighted(0.8),
    )
        .prop_map(|(parent, emit, block, uses, cacheable)| NodeShape {
            parent,
            emit,
            block,
            uses,
            cacheable,
        })
}

fn build(shapes: &[NodeShape]) -> (FilterTree, Vec<FilterId>, Vec<ProbeControl>) {
    let mut tree = FilterTree::new();
    let mut ids = Vec::with_capacity(shapes.len());
    let mut controls = Vec::with_capacity(shapes.len());
    for (i, shape) in shapes.iter().enumerate() {
        let parent = match shape.parent {
            Some(p) if i > 0 => Some(ids[p % i]),
            _ => None,
        };
        let (id, control) = ProbeBuilder::new(&format!("n{i}"))
            .emits(StreamTypeMask::from_bits_truncate(shape.emit))
            .blocks(StreamTypeMask::from_bits_truncate(shape.block))
            .uses(StreamTypeMask::from_bits_truncate(shape.uses))
            .estimate(shape.cacheable.then_some(32))
            .points(i + 1)
            .add(&mut tree, parent);
        ids.push(id);
        controls.push(control);
    }
    (tree, ids, controls)
}

fn summary(objects: &[SharedStream]) -> Vec<(FilterId, u8, usize)> {
    let mut v: Vec<_> = objects
        .iter()
        .map(|o| (o.owner(), o.stream_type() as u8, o.point_count()))
        .collect();
    v.sort();
    v
}

proptest! {
    #[test]
    fn test_seeded_refresh_matches_full(
        shapes in prop::collection::vec(node_shape(), 1..16),
        edit in 0usize..16,
    ) {
        let (mut tree, ids, _) = build(&shapes);
        let mut scheduler = caching_scheduler();
        scheduler.refresh(&mut tree).unwrap();
        prop_assert!(scheduler.last_stats().gc.is_balanced());

        let edited = ids[edit % ids.len()];
        tree.set_property(edited, "value", &PropertyValue::Int(1)).unwrap();
        let seeded = scheduler.refresh(&mut tree).unwrap();
        prop_assert!(seeded.stats.gc.is_balanced());
        assert_no_alias(&seeded.objects);

        let mut fresh = tree.clone_uncached();
        let full = uncached_scheduler().refresh(&mut fresh).unwrap();
        prop_assert_eq!(summary(&seeded.objects), summary(&full.objects));
    }

    #[test]
    fn test_second_refresh_skips_cacheable_filters(
        shapes in prop::collection::vec(node_shape(), 1..16),
    ) {
        let (mut tree, _, controls) = build(&shapes);
        let mut scheduler = caching_scheduler();
        scheduler.refresh(&mut tree).unwrap();
        scheduler.refresh(&mut tree).unwrap();

        // A filter with a known size never runs twice on an unchanged tree.
        for (shape, control) in shapes.iter().zip(&controls) {
            if shape.cacheable {
                prop_assert_eq!(control.calls(), 1);
            }
        }
    }

    #[test]
    fn test_accumulated_emit_comes_from_root_path(
        shapes in prop::collection::vec(node_shape(), 1..16),
    ) {
        let (tree, ids, _) = build(&shapes);
        let masks = PropagationMasks::compute(&tree);
        for &id in &ids {
            let mut on_path = tree.filter(id).unwrap().emit_mask();
            for ancestor in tree.ancestors(id) {
                on_path |= tree.filter(ancestor).unwrap().emit_mask();
            }
            let acc = masks.accumulated_emit(id);
            prop_assert!(on_path.contains(acc));
            // A filter always passes on what it emits itself.
            prop_assert!(acc.contains(tree.filter(id).unwrap().emit_mask()));
        }
    }
}
