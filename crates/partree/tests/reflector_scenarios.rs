#![forbid(unsafe_code)]

//! End-to-end scenarios: a [`Reflector`] driven by [`MemoryModel`]
//! notifications and viewport changes.
//!
//! Every reflector here validates the tree and the loaded region after each
//! mutation, so a broken invariant surfaces as an `Err` from the call that
//! caused it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use partree::{
    Capabilities, EdgeKind, GeometryAdapter, MemoryModel, ModelEvent, NodeId, NodeInfo, NodeKey,
    NodeState, NodeView, Point, Rect, Reflector, ReflectorConfig, ReflectorError, Size, SizeFn,
    TreeModel, UniformSize, ViewDelegate,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Counts delegate traffic.
#[derive(Debug, Default)]
struct Recorder {
    created: usize,
    released: usize,
    repositioned: usize,
}

impl ViewDelegate for Recorder {
    type Item = NodeKey;

    fn create_item(&mut self, node: &NodeView) -> NodeKey {
        self.created += 1;
        node.key
    }

    fn release_item(&mut self, _id: NodeId, _item: NodeKey) {
        self.released += 1;
    }

    fn geometry_invalidated(&mut self, _node: &NodeView, _item: &mut NodeKey) {
        self.repositioned += 1;
    }
}

fn config() -> ReflectorConfig {
    ReflectorConfig::default()
        .with_buffer_margin(2)
        .with_read_ahead(3)
        .with_indent(2)
        .with_validation(true)
}

fn reflector() -> Reflector<Recorder> {
    Reflector::new(UniformSize::new(10, 1), Recorder::default(), config())
}

fn viewport(y: u32, height: u32) -> Rect {
    Rect::new(0, y, 10, height)
}

fn keys(range: std::ops::Range<u64>) -> Vec<NodeKey> {
    range.map(NodeKey).collect()
}

fn key_of<D: ViewDelegate>(reflector: &Reflector<D>, id: NodeId) -> NodeKey {
    reflector
        .tree()
        .node(id)
        .and_then(|node| node.key())
        .expect("window ids are tracked")
}

/// Keys of the loaded region in flattened order.
fn region<D: ViewDelegate>(reflector: &Reflector<D>) -> Vec<NodeKey> {
    let Some(edge) = reflector.edges().loaded() else {
        return Vec::new();
    };
    reflector
        .tree()
        .range(edge.begin, edge.end)
        .map(|id| key_of(reflector, id))
        .collect()
}

fn window<D: ViewDelegate>(reflector: &Reflector<D>, kind: EdgeKind) -> Option<(NodeKey, NodeKey)> {
    let edge = reflector.edges().get(kind)?;
    Some((key_of(reflector, edge.begin), key_of(reflector, edge.end)))
}

fn visible<D: ViewDelegate>(reflector: &Reflector<D>) -> Vec<NodeKey> {
    reflector
        .visible_nodes()
        .into_iter()
        .map(|id| key_of(reflector, id))
        .collect()
}

fn row_of<D: ViewDelegate>(reflector: &Reflector<D>, key: NodeKey) -> usize {
    let id = reflector.tree().find(key).expect("key is tracked");
    reflector.tree().node(id).expect("tracked").row()
}

// ============================================================================
// Viewport
// ============================================================================

#[test]
fn initial_viewport_loads_target_window() {
    let model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    assert_eq!(region(&reflector), keys(0..10));
    assert_eq!(
        window(&reflector, EdgeKind::Buffer),
        Some((NodeKey(0), NodeKey(6)))
    );
    assert_eq!(visible(&reflector), keys(0..5));
    assert_eq!(reflector.delegate().created, 5);
    assert_eq!(reflector.node_rect(NodeKey(3)), Some(Rect::new(0, 3, 10, 1)));
}

#[test]
fn scrolling_down_evicts_above() {
    let model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    reflector.set_viewport(&model, viewport(50, 5)).unwrap();

    assert_eq!(region(&reflector), keys(48..60));
    assert_eq!(reflector.tree().len(), 12);
    assert_eq!(visible(&reflector), keys(50..55));
    assert_eq!(reflector.delegate().released, 5);
    // The old region shares no rows with the target: rebuilt in place.
    assert_eq!(reflector.stats().nodes_created, 22);
    assert_eq!(reflector.stats().nodes_evicted, 10);
}

#[test]
fn jump_to_far_end_builds_only_the_target() {
    let model = MemoryModel::flat(1_000_000);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    reflector.set_viewport(&model, viewport(900_000, 5)).unwrap();

    assert!(
        reflector.stats().nodes_created < 10_000,
        "built {} nodes",
        reflector.stats().nodes_created
    );
    assert_eq!(region(&reflector), keys(899_998..900_010));
    assert_eq!(visible(&reflector), keys(900_000..900_005));
    assert_eq!(
        reflector.node_rect(NodeKey(900_000)),
        Some(Rect::new(0, 900_000, 10, 1))
    );

    reflector.set_viewport(&model, viewport(999_998, 5)).unwrap();
    assert_eq!(region(&reflector).last(), Some(&NodeKey(999_999)));
    assert!(reflector.stats().nodes_created < 10_000);
}

#[test]
fn jump_without_uniform_size_estimates_from_region() {
    let model = MemoryModel::flat(2_000);
    let adapter = SizeFn::new(|_model: &dyn TreeModel, _node: &NodeInfo| Some(Size::new(10, 2)));
    let mut reflector = Reflector::new(adapter, Recorder::default(), config());
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(region(&reflector), keys(0..5));

    reflector.set_viewport(&model, viewport(1_000, 5)).unwrap();
    assert_eq!(region(&reflector), keys(499..505));
    assert_eq!(
        reflector.node_rect(NodeKey(500)),
        Some(Rect::new(0, 1_000, 10, 2))
    );
}

#[test]
fn drifted_region_reanchors_when_first_row_is_reached() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    reflector.set_viewport(&model, viewport(50, 5)).unwrap();

    // Rows above the region vanish; tracked rows keep their old offsets.
    model
        .remove_rows(None, 0, 44, |m, e| reflector.handle_event(m, e))
        .unwrap();
    assert_eq!(reflector.node_rect(NodeKey(48)).map(|r| r.y), Some(48));

    reflector.set_viewport(&model, viewport(44, 5)).unwrap();
    assert_eq!(region(&reflector), keys(84..96));
    assert_eq!(reflector.node_rect(NodeKey(84)).map(|r| r.y), Some(39));
    assert_eq!(row_of(&reflector, NodeKey(84)), 39);
    assert_eq!(visible(&reflector), keys(89..94));
}

#[test]
fn scrolling_back_up_reloads_from_top() {
    let model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    reflector.set_viewport(&model, viewport(50, 5)).unwrap();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    assert_eq!(region(&reflector), keys(0..7));
    assert_eq!(visible(&reflector), keys(0..5));
    assert_eq!(reflector.node_rect(NodeKey(0)), Some(Rect::new(0, 0, 10, 1)));
}

#[test]
fn deep_scroll_keeps_ancestors_as_anchors() {
    // Roots 0..3, children of root r are keys 3 + 50r .. 3 + 50(r + 1).
    let model = MemoryModel::balanced(&[3, 50]);
    let mut reflector = reflector();

    reflector.set_viewport(&model, viewport(20, 5)).unwrap();
    assert_eq!(region(&reflector).first(), Some(&NodeKey(3 + 14)));
    assert!(reflector.tree().find(NodeKey(0)).is_some(), "root 0 anchors the region");
    assert!(reflector.node_rect(NodeKey(3 + 14)).is_some_and(|r| r.y == 15 && r.x == 2));

    reflector.set_viewport(&model, viewport(120, 5)).unwrap();
    assert_eq!(reflector.tree().find(NodeKey(0)), None);
    assert_eq!(reflector.tree().find(NodeKey(1)), None);
    assert!(reflector.tree().find(NodeKey(2)).is_some());
    assert_eq!(region(&reflector), keys(118..130));
    assert_eq!(reflector.tree().len(), 13);

    reflector.set_viewport(&model, viewport(20, 5)).unwrap();
    assert_eq!(region(&reflector), keys(17..29));
    assert_eq!(reflector.tree().find(NodeKey(2)), None);
    assert_eq!(reflector.tree().len(), 13);
    assert_eq!(reflector.node_rect(NodeKey(17)).map(|r| r.y), Some(15));
}

#[test]
fn headless_reflector_counts_work() {
    let model = MemoryModel::flat(100);
    let mut reflector = Reflector::headless(UniformSize::new(10, 1), config());
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    let stats = reflector.stats();
    assert_eq!(stats.nodes_created, 10);
    assert_eq!(stats.items_created, 5);
    assert!(stats.layout_passes >= 1);
}

#[test]
fn empty_model_has_no_region() {
    let model = MemoryModel::new();
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert!(reflector.tree().is_empty());
    assert!(reflector.edges().is_empty());
}

// ============================================================================
// Insertions
// ============================================================================

#[test]
fn rows_inserted_at_top_extend_region_upward() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    let added = model
        .insert_rows(None, 0, ["a", "b"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    // Rows pushed past the target window are trimmed.
    let mut expected = added.clone();
    expected.extend(keys(0..8));
    assert_eq!(region(&reflector), expected);
    assert_eq!(visible(&reflector)[..2], added[..]);
    assert_eq!(reflector.node_rect(added[0]).map(|r| r.y), Some(0));
    assert_eq!(reflector.node_rect(NodeKey(0)).map(|r| r.y), Some(2));
    assert_eq!(row_of(&reflector, NodeKey(0)), 2);
}

#[test]
fn rows_inserted_inside_region_shift_later_siblings() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    let added = model
        .insert_rows(None, 3, ["mid"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    let mut expected = keys(0..3);
    expected.push(added[0]);
    expected.extend(keys(3..9));
    assert_eq!(region(&reflector), expected);
    assert_eq!(row_of(&reflector, NodeKey(3)), 4);
    assert!(reflector.delegate().repositioned > 0);
}

#[test]
fn rows_inserted_after_region_are_not_tracked() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    let added = model
        .insert_rows(None, 50, ["far"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    assert_eq!(reflector.tree().find(added[0]), None);
    assert_eq!(region(&reflector), keys(0..10));
}

#[test]
fn rows_appended_after_end_extend_region() {
    let mut model = MemoryModel::flat(5);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(region(&reflector), keys(0..5));

    let added = model
        .append_rows(None, ["x", "y"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    assert_eq!(reflector.tree().len(), 7);
    assert_eq!(region(&reflector).last(), added.last());
}

#[test]
fn large_insert_inside_region_stays_bounded() {
    let mut model = MemoryModel::flat(1_000);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    let labels: Vec<String> = (0..50_000).map(|i| format!("bulk {i}")).collect();
    let added = model
        .insert_rows(None, 5, labels, |m, e| reflector.handle_event(m, e))
        .unwrap();

    let mut expected = keys(0..5);
    expected.extend_from_slice(&added[..5]);
    assert_eq!(region(&reflector), expected);
    assert_eq!(reflector.tree().len(), 10);
    assert!(reflector.stats().nodes_created < 100);
}

#[test]
fn moving_large_subtree_above_region_stays_bounded() {
    // Roots 0..3; root 2 has children 10_003..15_003.
    let mut model = MemoryModel::balanced(&[3, 5_000]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    model
        .move_rows(None, 2, 2, None, 0, |m, e| reflector.handle_event(m, e))
        .unwrap();

    let mut expected = vec![NodeKey(2)];
    expected.extend(keys(10_003..10_012));
    assert_eq!(region(&reflector), expected);
    assert_eq!(reflector.tree().find(NodeKey(0)), None);
    assert!(reflector.stats().nodes_created < 100);
}

#[test]
fn rows_inserted_into_empty_model_seed_region() {
    let mut model = MemoryModel::new();
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    let added = model
        .append_rows(None, ["first", "second"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    assert_eq!(region(&reflector), added);
    assert_eq!(visible(&reflector), added);
}

#[test]
fn inverted_range_is_rejected() {
    let model = MemoryModel::flat(3);
    let mut reflector = reflector();
    let event = ModelEvent::RowsInserted {
        parent: None,
        first: 3,
        last: 1,
    };
    assert_eq!(
        reflector.handle_event(&model, &event),
        Err(ReflectorError::InvalidRange { first: 3, last: 1 })
    );
}

// ============================================================================
// Removals
// ============================================================================

#[test]
fn removing_rows_inside_region() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    model
        .remove_rows(None, 2, 3, |m, e| reflector.handle_event(m, e))
        .unwrap();

    let mut expected = keys(0..2);
    expected.extend(keys(4..10));
    assert_eq!(region(&reflector), expected);
    assert_eq!(row_of(&reflector, NodeKey(4)), 2);
    assert_eq!(visible(&reflector), vec![NodeKey(0), NodeKey(1), NodeKey(4), NodeKey(5), NodeKey(6)]);
}

#[test]
fn removing_sole_child_empties_parent() {
    let mut model = MemoryModel::new();
    let p = model.push(None, "p").unwrap();
    let x = model.push(Some(p), "x").unwrap();
    let q = model.push(None, "q").unwrap();
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(region(&reflector), vec![p, x, q]);

    model
        .remove_rows(Some(p), 0, 0, |m, e| reflector.handle_event(m, e))
        .unwrap();

    let tree = reflector.tree();
    let parent = tree.node(tree.find(p).unwrap()).unwrap();
    assert_eq!(parent.first_child(), None);
    assert_eq!(parent.last_child(), None);
    assert_eq!(parent.loaded_children_count(), 0);
    assert_eq!(tree.find(x), None);
    assert_eq!(region(&reflector), vec![p, q]);
}

#[test]
fn removing_everything_clears_region() {
    let mut model = MemoryModel::flat(3);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    model
        .remove_rows(None, 0, 2, |m, e| reflector.handle_event(m, e))
        .unwrap();

    assert!(reflector.tree().is_empty());
    assert!(reflector.edges().is_empty());
    assert_eq!(reflector.delegate().released, reflector.delegate().created);
}

#[test]
fn removing_rows_forgets_their_collapsed_state() {
    // Roots 0, 1; children of 0 are 2, 3.
    let mut model = MemoryModel::balanced(&[2, 2]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();
    reflector.set_expanded(&model, NodeKey(2), false).unwrap();
    reflector.set_expanded(&model, NodeKey(1), false).unwrap();

    model
        .remove_rows(None, 0, 1, |m, e| reflector.handle_event(m, e))
        .unwrap();
    assert!(reflector.is_expanded(NodeKey(1)));
    assert!(reflector.is_expanded(NodeKey(2)));
}

#[test]
fn removing_untracked_collapsed_row_forgets_it() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    reflector.set_expanded(&model, NodeKey(50), false).unwrap();
    assert!(!reflector.is_expanded(NodeKey(50)));
    model
        .remove_rows(None, 50, 50, |m, e| reflector.handle_event(m, e))
        .unwrap();
    assert!(reflector.is_expanded(NodeKey(50)));
}

#[test]
fn removal_above_region_reanchors_at_top() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    reflector.set_viewport(&model, viewport(50, 5)).unwrap();

    model
        .remove_rows(None, 0, 9, |m, e| reflector.handle_event(m, e))
        .unwrap();
    assert_eq!(region(&reflector), keys(48..60));
    assert_eq!(row_of(&reflector, NodeKey(48)), 38);

    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(region(&reflector), keys(10..17));
    assert_eq!(reflector.node_rect(NodeKey(10)).map(|r| r.y), Some(0));
    assert_eq!(visible(&reflector), keys(10..15));
}

// ============================================================================
// Moves
// ============================================================================

struct MoveOutcome {
    valid_while_pending: Option<bool>,
    state_while_pending: Option<NodeState>,
    size_requests: usize,
    valid_after: bool,
    reflector: Reflector<Recorder>,
}

/// Move X from row 2 under A to row 0 under B.
///
/// Keys: A = 0, B = 1, A's children 2..5 (X = 4), B's children 5..8.
fn move_x(capabilities: Capabilities) -> MoveOutcome {
    let mut model = MemoryModel::balanced(&[2, 3]);
    let (a, b, x) = (NodeKey(0), NodeKey(1), NodeKey(4));
    let requests: Rc<RefCell<HashMap<NodeKey, usize>>> = Rc::default();
    let counter = Rc::clone(&requests);
    let adapter = SizeFn::new(move |_model: &dyn TreeModel, node: &NodeInfo| {
        *counter.borrow_mut().entry(node.key).or_default() += 1;
        Some(Size::new(10, 1))
    })
    .with_capabilities(capabilities);
    let mut reflector = Reflector::new(adapter, Recorder::default(), config());
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();
    assert_eq!(reflector.tree().len(), 8);

    let mut valid_while_pending = None;
    let mut state_while_pending = None;
    let moved = model
        .move_rows(Some(a), 2, 2, Some(b), 0, |m, e| {
            reflector.handle_event(m, e)?;
            if matches!(e, ModelEvent::RowsAboutToBeMoved { .. }) {
                let node = reflector.tree().find(x).and_then(|id| reflector.tree().node(id));
                valid_while_pending = node.map(|n| n.geometry().is_valid());
                state_while_pending = node.map(|n| n.state());
            }
            Ok::<_, ReflectorError>(())
        })
        .unwrap();
    assert!(moved);

    let tree = reflector.tree();
    let id = tree.find(x).expect("X stays tracked");
    let node = tree.node(id).unwrap();
    assert_eq!(node.state(), NodeState::Normal);
    assert_eq!(node.row(), 0);
    assert_eq!(tree.parent_key(id), Some(b));
    assert_eq!(
        tree.snapshot().keys(),
        model.preorder(|_| false),
        "tracked order follows the model"
    );
    let valid_after = node.geometry().is_valid();
    let size_requests = requests.borrow().get(&x).copied().unwrap_or(0);
    MoveOutcome {
        valid_while_pending,
        state_while_pending,
        size_requests,
        valid_after,
        reflector,
    }
}

#[test]
fn move_keeps_geometry_for_order_independent_adapter() {
    let outcome = move_x(Capabilities::empty());
    assert_eq!(outcome.state_while_pending, Some(NodeState::Transition));
    assert_eq!(outcome.valid_while_pending, Some(true));
    assert!(outcome.valid_after);
    assert_eq!(outcome.size_requests, 1, "size is reused across the move");
    assert_eq!(outcome.reflector.node_rect(NodeKey(4)).map(|r| r.y), Some(4));
}

#[test]
fn move_invalidates_geometry_for_order_dependent_adapter() {
    let outcome = move_x(Capabilities::ORDER_DEPENDENT);
    assert_eq!(outcome.state_while_pending, Some(NodeState::Transition));
    assert_eq!(outcome.valid_while_pending, Some(false));
    assert_eq!(outcome.size_requests, 2, "size is recomputed at the destination");
    assert!(outcome.valid_after);
}

#[test]
fn sibling_changes_recompute_order_dependent_sizes() {
    let mut model = MemoryModel::flat(10);
    let requests: Rc<RefCell<HashMap<NodeKey, usize>>> = Rc::default();
    let counter = Rc::clone(&requests);
    let adapter = SizeFn::new(move |_model: &dyn TreeModel, node: &NodeInfo| {
        *counter.borrow_mut().entry(node.key).or_default() += 1;
        Some(Size::new(10, 1))
    })
    .with_capabilities(Capabilities::ORDER_DEPENDENT);
    let mut reflector = Reflector::new(adapter, Recorder::default(), config());
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();
    let count = |key: u64| requests.borrow().get(&NodeKey(key)).copied().unwrap_or(0);

    let added = model
        .insert_rows(None, 3, ["x"], |m, e| reflector.handle_event(m, e))
        .unwrap();
    let x = added[0];
    assert!((0..3).all(|k| count(k) == 1), "rows above the insertion keep their size");
    assert!((3..10).all(|k| count(k) == 2), "later siblings are resized");
    assert_eq!(count(x.0), 1);

    model
        .remove_rows(None, 1, 1, |m, e| reflector.handle_event(m, e))
        .unwrap();
    assert_eq!(count(0), 1);
    assert_eq!(count(2), 2);
    assert_eq!(count(x.0), 2);
    assert!((3..10).all(|k| count(k) == 3));
    let tree = reflector.tree();
    assert!(tree.iter().all(|id| tree.node(id).unwrap().geometry().is_valid()));
}

#[test]
fn confirm_without_announce_runs_both_phases() {
    let mut model = MemoryModel::flat(10);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();

    model
        .move_rows(None, 0, 0, None, 5, |m, e| match e {
            ModelEvent::RowsAboutToBeMoved { .. } => Ok(()),
            _ => reflector.handle_event(m, e),
        })
        .unwrap();

    assert_eq!(region(&reflector), model.preorder(|_| false));
    assert_eq!(row_of(&reflector, NodeKey(0)), 4);
    assert_eq!(reflector.node_rect(NodeKey(1)).map(|r| r.y), Some(0));
}

#[test]
fn move_confirmation_must_match_announcement() {
    let model = MemoryModel::flat(10);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();

    let announce = ModelEvent::RowsAboutToBeMoved {
        source_parent: None,
        first: 0,
        last: 0,
        dest_parent: None,
        dest_row: 3,
    };
    let confirm = ModelEvent::RowsMoved {
        source_parent: None,
        first: 1,
        last: 1,
        dest_parent: None,
        dest_row: 3,
    };
    reflector.handle_event(&model, &announce).unwrap();
    assert!(matches!(
        reflector.handle_event(&model, &confirm),
        Err(ReflectorError::MoveMismatch { .. })
    ));
}

#[test]
fn move_out_of_region_evicts_rows() {
    let mut model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    model
        .move_rows(None, 2, 3, None, 80, |m, e| reflector.handle_event(m, e))
        .unwrap();

    assert_eq!(reflector.tree().find(NodeKey(2)), None);
    assert_eq!(reflector.tree().find(NodeKey(3)), None);
    let mut expected = keys(0..2);
    expected.extend(keys(4..10));
    assert_eq!(region(&reflector), expected);
}

// ============================================================================
// Reset, layout change, expansion
// ============================================================================

#[test]
fn reset_discards_everything() {
    let mut model = MemoryModel::balanced(&[5, 5]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert!(!reflector.tree().is_empty());

    model
        .reset(["a", "b", "c"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    let tree = reflector.tree();
    assert_eq!(tree.loaded_children_count(tree.root()), 0);
    assert!(reflector.edges().is_empty());
    assert_eq!(reflector.delegate().released, reflector.delegate().created);

    reflector.refresh(&model).unwrap();
    assert_eq!(reflector.tree().len(), 3);
}

#[test]
fn layout_change_keeps_collapsed_state() {
    let model = MemoryModel::balanced(&[3, 4]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 100)).unwrap();
    reflector.set_expanded(&model, NodeKey(0), false).unwrap();

    reflector
        .handle_event(&model, &ModelEvent::LayoutChanged)
        .unwrap();
    assert!(reflector.tree().is_empty());

    reflector.refresh(&model).unwrap();
    assert!(!reflector.is_expanded(NodeKey(0)));
    assert_eq!(region(&reflector), model.preorder(|k| k == NodeKey(0)));
}

#[test]
fn collapse_and_expand_in_place() {
    // Roots 0..3; root 0 has children 3..7.
    let model = MemoryModel::balanced(&[3, 4]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 100)).unwrap();
    assert_eq!(reflector.tree().len(), 15);

    reflector.set_expanded(&model, NodeKey(0), false).unwrap();
    assert_eq!(reflector.tree().len(), 11);
    assert_eq!(region(&reflector), model.preorder(|k| k == NodeKey(0)));
    assert_eq!(reflector.node_rect(NodeKey(1)).map(|r| r.y), Some(1));

    reflector.set_expanded(&model, NodeKey(0), true).unwrap();
    assert_eq!(reflector.tree().len(), 15);
    assert_eq!(region(&reflector), model.preorder(|_| false));
    assert_eq!(reflector.node_rect(NodeKey(1)).map(|r| r.y), Some(5));
}

#[test]
fn expanding_region_end_loads_on_next_pass() {
    let mut model = MemoryModel::new();
    let first = model.push(None, "first").unwrap();
    let last = model.push(None, "last").unwrap();
    let children: Vec<NodeKey> = (0..3)
        .filter_map(|i| model.push(Some(last), format!("child {i}")))
        .collect();
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();

    reflector.set_expanded(&model, last, false).unwrap();
    assert_eq!(region(&reflector), vec![first, last]);

    reflector.set_expanded(&model, last, true).unwrap();
    let mut expected = vec![first, last];
    expected.extend(children);
    assert_eq!(region(&reflector), expected);
}

#[test]
fn rows_inserted_under_collapsed_parent_stay_hidden() {
    let mut model = MemoryModel::balanced(&[2, 2]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();
    reflector.set_expanded(&model, NodeKey(0), false).unwrap();

    let added = model
        .append_rows(Some(NodeKey(0)), ["hidden"], |m, e| reflector.handle_event(m, e))
        .unwrap();

    assert_eq!(reflector.tree().find(added[0]), None);
    assert_eq!(region(&reflector), model.preorder(|k| k == NodeKey(0)));
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn unknown_sizes_are_not_materialized() {
    let model = MemoryModel::flat(5);
    let adapter = SizeFn::new(|_model: &dyn TreeModel, node: &NodeInfo| {
        (node.key != NodeKey(2)).then_some(Size::new(10, 1))
    });
    let mut reflector = Reflector::new(adapter, Recorder::default(), config());
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();

    assert_eq!(region(&reflector), keys(0..5));
    assert_eq!(reflector.node_rect(NodeKey(2)), None);
    assert_eq!(reflector.node_rect(NodeKey(3)).map(|r| r.y), Some(2));
    assert_eq!(visible(&reflector), vec![NodeKey(0), NodeKey(1), NodeKey(3), NodeKey(4)]);
}

#[test]
fn adapter_swap_invalidates_geometry() {
    let model = MemoryModel::flat(100);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    let tall = UniformSize::new(10, 2);
    reflector.set_geometry_adapter(tall);
    let tree = reflector.tree();
    for id in tree.iter() {
        let node = tree.node(id).unwrap();
        assert!(!node.geometry().is_valid());
        assert_eq!(node.flags(), tall.capabilities());
    }

    reflector.refresh(&model).unwrap();
    assert_eq!(reflector.node_rect(NodeKey(1)), Some(Rect::new(0, 2, 10, 2)));
    assert_eq!(region(&reflector), keys(0..5));
}

#[test]
fn node_rect_reports_last_layout_until_next_pass() {
    let model = MemoryModel::flat(20);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    reflector.set_geometry_adapter(UniformSize::new(10, 3));
    assert_eq!(reflector.node_rect(NodeKey(1)), Some(Rect::new(0, 1, 10, 1)));

    reflector.refresh(&model).unwrap();
    assert_eq!(reflector.node_rect(NodeKey(1)), Some(Rect::new(0, 3, 10, 3)));
}

/// Shifts odd rows right; even rows keep the flow origin.
struct Staggered;

impl GeometryAdapter for Staggered {
    fn capabilities(&self) -> Capabilities {
        Capabilities::PROVIDES_POSITION
    }

    fn size_hint(&mut self, _model: &dyn TreeModel, _node: &NodeInfo) -> Option<Size> {
        Some(Size::new(10, 1))
    }

    fn position_hint(&mut self, _model: &dyn TreeModel, node: &NodeInfo, flow: Point) -> Option<Point> {
        (node.row % 2 == 1).then_some(Point::new(flow.x + 5, flow.y))
    }
}

#[test]
fn position_hint_overrides_flow_origin() {
    let model = MemoryModel::flat(6);
    let mut reflector = Reflector::new(Staggered, Recorder::default(), config());
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();

    assert_eq!(reflector.node_rect(NodeKey(0)), Some(Rect::new(0, 0, 10, 1)));
    assert_eq!(reflector.node_rect(NodeKey(1)), Some(Rect::new(5, 1, 10, 1)));
    assert_eq!(reflector.node_rect(NodeKey(2)), Some(Rect::new(0, 2, 10, 1)));
    assert_eq!(reflector.node_rect(NodeKey(5)), Some(Rect::new(5, 5, 10, 1)));
}

#[test]
fn explicit_invalidation_recomputes_lazily() {
    let model = MemoryModel::flat(20);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();

    reflector.invalidate_geometry();
    let tree = reflector.tree();
    assert!(tree.iter().all(|id| !tree.node(id).unwrap().geometry().is_valid()));

    reflector.refresh(&model).unwrap();
    let tree = reflector.tree();
    assert!(tree.iter().all(|id| tree.node(id).unwrap().geometry().is_valid()));
}

#[test]
fn prefetch_reports_loaded_extent() {
    let model = MemoryModel::flat(100);
    let mut eager = reflector();
    eager.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(eager.prefetch_geometry(&model), Some(10));

    let lazy = SizeFn::new(|_model: &dyn TreeModel, _node: &NodeInfo| Some(Size::new(10, 1)));
    let mut lazy = Reflector::new(lazy, Recorder::default(), config());
    lazy.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(lazy.prefetch_geometry(&model), None);
}

#[test]
fn indentation_follows_depth() {
    let model = MemoryModel::balanced(&[1, 1, 1]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 5)).unwrap();
    assert_eq!(reflector.node_rect(NodeKey(0)).map(|r| r.x), Some(0));
    assert_eq!(reflector.node_rect(NodeKey(1)).map(|r| r.x), Some(2));
    assert_eq!(reflector.node_rect(NodeKey(2)).map(|r| r.x), Some(4));
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_serializes_flattened_sequence() {
    let model = MemoryModel::balanced(&[2, 2]);
    let mut reflector = reflector();
    reflector.set_viewport(&model, viewport(0, 20)).unwrap();

    let json = serde_json::to_value(reflector.tree().snapshot()).unwrap();
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0]["key"], 0);
    assert_eq!(entries[0]["depth"], 0);
    assert_eq!(entries[1]["key"], 2);
    assert_eq!(entries[1]["depth"], 1);
    assert_eq!(entries[1]["state"], "normal");

    let stats = serde_json::to_value(reflector.stats()).unwrap();
    assert_eq!(stats["nodes_created"], 6);
}
