//! Outbound hooks from the reflector to the view.

use partree_core::geometry::Rect;
use partree_core::model::NodeKey;

use crate::node::NodeId;

/// Read-only description of a tracked node handed to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeView {
    pub id: NodeId,
    pub key: NodeKey,
    pub row: usize,
    pub column: usize,
    /// Levels below the top (top-level rows are depth 0).
    pub depth: usize,
    /// Content-space rect, once position and size are both known.
    pub rect: Option<Rect>,
}

/// Materializes and releases visual items for tracked nodes.
///
/// The reflector owns the items it is handed and gives each one back
/// through [`release_item`](Self::release_item) before the node it belongs
/// to is freed, so pooling views can recycle them.
pub trait ViewDelegate {
    type Item;

    /// Build the visual item for a node entering the visible window.
    fn create_item(&mut self, node: &NodeView) -> Self::Item;

    /// Take back an item whose node left the visible window or was removed.
    fn release_item(&mut self, id: NodeId, item: Self::Item) {
        let _ = (id, item);
    }

    fn entered_visible(&mut self, _node: &NodeView, _item: &mut Self::Item) {}

    fn left_visible(&mut self, _node: &NodeView, _item: &mut Self::Item) {}

    /// A materialized node's rect changed; the view should reposition it.
    fn geometry_invalidated(&mut self, _node: &NodeView, _item: &mut Self::Item) {}
}

/// Headless delegate: tracks nodes without producing items.
impl ViewDelegate for () {
    type Item = ();

    fn create_item(&mut self, _node: &NodeView) {}
}
