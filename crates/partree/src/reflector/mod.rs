//! The reflector: keeps a [`PartialTree`] in step with a source model and a
//! scrolling viewport.
//!
//! # Loaded region
//!
//! The loaded window `[begin, end]` always covers one contiguous run of the
//! model's visible pre-order (collapsed subtrees excluded):
//!
//! - tracked nodes before `begin` are strict ancestors of `begin` (anchors);
//! - nothing is tracked after `end`.
//!
//! Every node in the region is laid out in flow order starting from the
//! origin stored on `begin`. Anchors keep their links but no layout.
//!
//! # Materialization
//!
//! Visual items exist only for nodes inside the visible window whose size
//! is known. Items are released through the [`ViewDelegate`] before the
//! node they belong to is freed.

mod events;
mod viewport;

use std::collections::{HashMap, HashSet};

use partree_core::geometry::{Point, Rect};
use partree_core::model::{NodeKey, TreeModel};
use serde::{Deserialize, Serialize};

use crate::adapter::{Capabilities, GeometryAdapter, NodeInfo};
use crate::config::ReflectorConfig;
use crate::delegate::{NodeView, ViewDelegate};
use crate::edges::{Edge, EdgeKind, EdgeTracker};
use crate::error::{InvariantCode, InvariantViolation, ReflectorError};
use crate::node::NodeId;
use crate::tree::PartialTree;

pub(crate) use events::MoveRecord;
pub use viewport::ScrollDirection;

/// Running counters, useful for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectorStats {
    /// Tree nodes constructed.
    pub nodes_created: u64,
    /// Tree nodes freed by removal, eviction or discard.
    pub nodes_evicted: u64,
    /// Visual items requested from the delegate.
    pub items_created: u64,
    /// Visual items handed back to the delegate.
    pub items_released: u64,
    /// Layout passes over the loaded region.
    pub layout_passes: u64,
}

/// Partial mirror of a hierarchical model, sized to a viewport.
pub struct Reflector<D: ViewDelegate = ()> {
    tree: PartialTree,
    edges: EdgeTracker,
    adapter: Box<dyn GeometryAdapter>,
    delegate: D,
    items: HashMap<NodeId, D::Item>,
    config: ReflectorConfig,
    viewport: Option<Rect>,
    direction: Option<ScrollDirection>,
    collapsed: HashSet<NodeKey>,
    pending_move: Option<MoveRecord>,
    stats: ReflectorStats,
}

impl<D: ViewDelegate> std::fmt::Debug for Reflector<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reflector")
            .field("tracked", &self.tree.len())
            .field("edges", &self.edges)
            .field("items", &self.items.len())
            .field("config", &self.config)
            .field("viewport", &self.viewport)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Reflector<()> {
    /// Reflector without a view: tracks and lays out nodes only.
    #[must_use]
    pub fn headless(adapter: impl GeometryAdapter + 'static, config: ReflectorConfig) -> Self {
        Self::new(adapter, (), config)
    }
}

impl<D: ViewDelegate> Reflector<D> {
    #[must_use]
    pub fn new(adapter: impl GeometryAdapter + 'static, delegate: D, config: ReflectorConfig) -> Self {
        Self {
            tree: PartialTree::new(),
            edges: EdgeTracker::new(),
            adapter: Box::new(adapter),
            delegate,
            items: HashMap::new(),
            config,
            viewport: None,
            direction: None,
            collapsed: HashSet::new(),
            pending_move: None,
            stats: ReflectorStats::default(),
        }
    }

    #[must_use]
    pub const fn tree(&self) -> &PartialTree {
        &self.tree
    }

    #[must_use]
    pub const fn edges(&self) -> &EdgeTracker {
        &self.edges
    }

    #[must_use]
    pub const fn config(&self) -> &ReflectorConfig {
        &self.config
    }

    #[must_use]
    pub const fn viewport(&self) -> Option<Rect> {
        self.viewport
    }

    #[must_use]
    pub const fn stats(&self) -> ReflectorStats {
        self.stats
    }

    #[must_use]
    pub const fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    /// Capabilities of the active geometry adapter.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.adapter.capabilities()
    }

    /// Materialized item for `id`, if it is currently visible.
    #[must_use]
    pub fn item(&self, id: NodeId) -> Option<&D::Item> {
        self.items.get(&id)
    }

    /// Laid-out rect of the tracked node with `key`.
    ///
    /// This is the cached value from the last layout. After an
    /// invalidation it may be stale until the next pass (`refresh`,
    /// `set_viewport` or a model event) recomputes the size.
    #[must_use]
    pub fn node_rect(&self, key: NodeKey) -> Option<Rect> {
        let id = self.tree.find(key)?;
        self.tree.node(id)?.geometry().rect()
    }

    /// Materialized nodes in flattened order.
    #[must_use]
    pub fn visible_nodes(&self) -> Vec<NodeId> {
        match self.edges.visible() {
            Some(edge) => self
                .tree
                .range(edge.begin, edge.end)
                .filter(|id| self.items.contains_key(id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether `key` shows its children.
    #[must_use]
    pub fn is_expanded(&self, key: NodeKey) -> bool {
        !self.collapsed.contains(&key)
    }

    /// Swap the geometry adapter.
    ///
    /// Capability flags are re-derived for every tracked node and all cached
    /// geometry is invalidated; sizes are recomputed on the next pass.
    pub fn set_geometry_adapter(&mut self, adapter: impl GeometryAdapter + 'static) {
        self.adapter = Box::new(adapter);
        let flags = self.adapter.capabilities();
        partree_core::debug!(?flags, "geometry adapter replaced");
        let ids: Vec<NodeId> = self.tree.iter().collect();
        for id in ids {
            if let Some(node) = self.tree.node_mut(id) {
                node.flags = flags;
                node.geometry.invalidate();
            }
        }
    }

    /// Invalidate every cached size.
    pub fn invalidate_geometry(&mut self) {
        let ids: Vec<NodeId> = self.tree.iter().collect();
        for id in ids {
            if let Some(node) = self.tree.node_mut(id) {
                node.geometry.invalidate();
            }
        }
    }

    /// Compute the size of every loaded node up front.
    ///
    /// Only adapters advertising [`Capabilities::AHEAD_OF_TIME`] are asked;
    /// returns the loaded extent, or `None` for lazy adapters.
    pub fn prefetch_geometry(&mut self, model: &dyn TreeModel) -> Option<u32> {
        if !self.adapter.capabilities().contains(Capabilities::AHEAD_OF_TIME) {
            return None;
        }
        let Some(loaded) = self.edges.loaded() else {
            return Some(0);
        };
        let ids: Vec<NodeId> = self.tree.range(loaded.begin, loaded.end).collect();
        for &id in &ids {
            self.ensure_size(model, id);
        }
        self.layout_region(model);
        Some(self.bottom_of(loaded.end).saturating_sub(self.top_of(loaded.begin)))
    }

    /// Check tree invariants and the loaded-region shape.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        self.tree.validate()?;
        self.validate_region()
    }

    fn validate_region(&self) -> Result<(), InvariantViolation> {
        let Some(loaded) = self.edges.loaded() else {
            if !self.tree.is_empty() {
                return Err(InvariantViolation::new(
                    InvariantCode::RegionContiguity,
                    None,
                    format!("{} nodes tracked without a loaded region", self.tree.len()),
                ));
            }
            if self.edges.buffer().is_some() || self.edges.visible().is_some() {
                return Err(InvariantViolation::new(
                    InvariantCode::EdgeContainment,
                    None,
                    "window set without a loaded region",
                ));
            }
            return Ok(());
        };

        for id in self.tree.iter() {
            if id == loaded.begin {
                break;
            }
            if !self.tree.is_ancestor_of(id, loaded.begin) {
                return Err(InvariantViolation::new(
                    InvariantCode::RegionContiguity,
                    Some(id),
                    "tracked node precedes the loaded region",
                ));
            }
        }

        let order: HashMap<NodeId, usize> = self
            .tree
            .range(loaded.begin, loaded.end)
            .enumerate()
            .map(|(index, id)| (id, index))
            .collect();
        if !order.contains_key(&loaded.end) {
            return Err(InvariantViolation::new(
                InvariantCode::RegionContiguity,
                Some(loaded.end),
                "loaded end is not reachable from loaded begin",
            ));
        }
        if let Some(next) = self.tree.down(loaded.end) {
            return Err(InvariantViolation::new(
                InvariantCode::RegionContiguity,
                Some(next),
                "tracked node follows the loaded region",
            ));
        }

        let span = |kind: EdgeKind| -> Result<Option<(usize, usize)>, InvariantViolation> {
            let Some(edge) = self.edges.get(kind) else {
                return Ok(None);
            };
            match (order.get(&edge.begin), order.get(&edge.end)) {
                (Some(&begin), Some(&end)) if begin <= end => Ok(Some((begin, end))),
                _ => Err(InvariantViolation::new(
                    InvariantCode::EdgeContainment,
                    Some(edge.begin),
                    format!("{kind:?} window is not an ordered run inside the loaded region"),
                )),
            }
        };
        let buffer = span(EdgeKind::Buffer)?;
        let visible = span(EdgeKind::Visible)?;
        if let Some((begin, end)) = visible {
            let contained = buffer.is_some_and(|(b, e)| b <= begin && end <= e);
            if !contained {
                return Err(InvariantViolation::new(
                    InvariantCode::EdgeContainment,
                    self.edges.visible().map(|edge| edge.begin),
                    "visible window escapes the buffer window",
                ));
            }
        }

        for &id in self.items.keys() {
            let inside = visible.is_some_and(|(b, e)| order.get(&id).is_some_and(|&i| b <= i && i <= e));
            if !inside {
                return Err(InvariantViolation::new(
                    InvariantCode::EdgeContainment,
                    Some(id),
                    "item materialized outside the visible window",
                ));
            }
        }
        Ok(())
    }

    /// Run validation when the config asks for it.
    fn finish(&self) -> Result<(), ReflectorError> {
        if self.config.validate_after_mutation {
            self.validate()?;
        }
        Ok(())
    }

    // --- model helpers ---

    /// Row count as seen through the collapsed set.
    fn visible_rows(&self, model: &dyn TreeModel, parent: Option<NodeKey>) -> usize {
        match parent {
            Some(key) if self.collapsed.contains(&key) => 0,
            _ => model.row_count(parent),
        }
    }

    /// Tree node standing for a model parent (`None` = the root sentinel).
    fn resolve(&self, parent: Option<NodeKey>) -> Option<NodeId> {
        match parent {
            None => Some(self.tree.root()),
            Some(key) => self.tree.find(key),
        }
    }

    fn key_of(&self, id: NodeId) -> Option<NodeKey> {
        self.tree.node(id).and_then(|node| node.key())
    }

    /// True for tracked nodes inside `[begin, end]`; false for anchors.
    fn in_region(&self, id: NodeId) -> bool {
        let Some(loaded) = self.edges.loaded() else {
            return false;
        };
        id != self.tree.root()
            && self.tree.node(id).is_some()
            && !self.tree.is_ancestor_of(id, loaded.begin)
    }

    fn ancestors(&self, id: NodeId) -> HashSet<NodeId> {
        let root = self.tree.root();
        let mut out = HashSet::new();
        let mut cursor = self.tree.node(id).and_then(|n| n.parent());
        while let Some(parent) = cursor {
            if parent == root {
                break;
            }
            out.insert(parent);
            cursor = self.tree.node(parent).and_then(|n| n.parent());
        }
        out
    }

    // --- node construction ---

    /// Look up the model row and attach it under `parent` after `after`.
    fn attach(
        &mut self,
        model: &dyn TreeModel,
        parent_key: Option<NodeKey>,
        row: usize,
        parent: NodeId,
        after: Option<NodeId>,
    ) -> Result<NodeId, ReflectorError> {
        let key = model
            .index(parent_key, row, 0)
            .ok_or(ReflectorError::MissingRow {
                parent: parent_key,
                row,
            })?;
        self.attach_key(model, key, row, parent, after)
    }

    fn attach_key(
        &mut self,
        model: &dyn TreeModel,
        key: NodeKey,
        row: usize,
        parent: NodeId,
        after: Option<NodeId>,
    ) -> Result<NodeId, ReflectorError> {
        let id = self.tree.create_node(key, row, 0);
        if let Err(err) = self.tree.insert_after(id, after, parent) {
            let _ = self.tree.discard_subtree(id);
            return Err(err.into());
        }
        let flags = self.adapter.capabilities();
        if let Some(node) = self.tree.node_mut(id) {
            node.flags = flags;
        }
        self.stats.nodes_created += 1;
        if flags.contains(Capabilities::AHEAD_OF_TIME) {
            self.ensure_size(model, id);
        }
        partree_core::trace!(node = %id, key = %key, row, "node attached");
        Ok(id)
    }

    /// Remove a childless node, releasing its item first.
    fn evict_leaf(&mut self, id: NodeId) -> Result<(), ReflectorError> {
        self.release_item(id);
        self.tree.remove(id, false)?;
        self.stats.nodes_evicted += 1;
        Ok(())
    }

    /// Remove `start` and its ancestors while they have no children left.
    fn prune_upward(&mut self, start: Option<NodeId>) -> Result<(), ReflectorError> {
        let root = self.tree.root();
        let mut cursor = start;
        while let Some(id) = cursor {
            if id == root || self.tree.loaded_children_count(id) > 0 {
                break;
            }
            cursor = self.tree.node(id).and_then(|n| n.parent());
            self.evict_leaf(id)?;
        }
        Ok(())
    }

    /// Drop every tracked node, item and window.
    fn clear_region(&mut self) {
        let ids: Vec<NodeId> = self.items.keys().copied().collect();
        for id in ids {
            self.release_item(id);
        }
        self.stats.nodes_evicted += self.tree.len() as u64;
        self.tree.clear();
        self.edges.clear_all();
    }

    // --- geometry ---

    fn info(&self, id: NodeId) -> Option<NodeInfo> {
        let node = self.tree.node(id)?;
        Some(NodeInfo {
            key: node.key()?,
            row: node.row(),
            column: node.column(),
            depth: self.tree.depth(id),
        })
    }

    /// Ask the adapter for `id`'s size if the cached one is stale.
    fn ensure_size(&mut self, model: &dyn TreeModel, id: NodeId) {
        if self.tree.node(id).is_none_or(|node| node.geometry().is_valid()) {
            return;
        }
        let Some(info) = self.info(id) else {
            return;
        };
        let size = self.adapter.size_hint(model, &info);
        if let Some(node) = self.tree.node_mut(id) {
            node.geometry.store_size(size);
        }
    }

    fn invalidate_children_from(&mut self, parent: NodeId, from_row: usize) {
        if !self.adapter.capabilities().contains(Capabilities::ORDER_DEPENDENT) {
            return;
        }
        let ids: Vec<NodeId> = self.tree.children(parent).collect();
        for id in ids {
            if let Some(node) = self.tree.node_mut(id)
                && node.row() >= from_row
            {
                node.geometry.invalidate();
            }
        }
    }

    fn top_of(&self, id: NodeId) -> u32 {
        self.tree
            .node(id)
            .and_then(|node| node.geometry().origin())
            .map_or(0, |origin| origin.y)
    }

    fn bottom_of(&self, id: NodeId) -> u32 {
        self.tree
            .node(id)
            .and_then(|node| node.geometry().bottom())
            .unwrap_or(0)
    }

    fn set_top(&mut self, id: NodeId, y: u32) {
        let x = self.indent_for(id);
        if let Some(node) = self.tree.node_mut(id) {
            node.geometry.set_origin(Point::new(x, y));
        }
    }

    fn indent_for(&self, id: NodeId) -> u32 {
        let depth = u32::try_from(self.tree.depth(id)).unwrap_or(u32::MAX);
        depth.saturating_mul(self.config.indent)
    }

    /// Size and place one node at flow position `y`; returns its bottom.
    fn place(&mut self, model: &dyn TreeModel, id: NodeId, y: u32) -> u32 {
        self.ensure_size(model, id);
        let flow = Point::new(self.indent_for(id), y);
        let origin = if self.adapter.capabilities().contains(Capabilities::PROVIDES_POSITION) {
            match self.info(id) {
                Some(info) => self.adapter.position_hint(model, &info, flow).unwrap_or(flow),
                None => flow,
            }
        } else {
            flow
        };
        let Some(node) = self.tree.node_mut(id) else {
            return y;
        };
        let before = node.geometry.rect();
        node.geometry.set_origin(origin);
        let after = node.geometry.rect();
        let bottom = origin.y.saturating_add(node.geometry.extent());
        if before != after && self.items.contains_key(&id) {
            let view = self.view(id);
            if let (Some(view), Some(item)) = (view, self.items.get_mut(&id)) {
                self.delegate.geometry_invalidated(&view, item);
            }
        }
        bottom
    }

    /// Flow layout of `[begin, end]` from the origin stored on `begin`.
    fn layout_region(&mut self, model: &dyn TreeModel) {
        let Some(loaded) = self.edges.loaded() else {
            return;
        };
        self.stats.layout_passes += 1;
        let mut y = self.top_of(loaded.begin);
        let mut cursor = Some(loaded.begin);
        while let Some(id) = cursor {
            y = self.place(model, id, y);
            cursor = if id == loaded.end {
                None
            } else {
                self.tree.down(id)
            };
        }
    }

    // --- windows and items ---

    fn view(&self, id: NodeId) -> Option<NodeView> {
        let node = self.tree.node(id)?;
        Some(NodeView {
            id,
            key: node.key()?,
            row: node.row(),
            column: node.column(),
            depth: self.tree.depth(id),
            rect: node.geometry().rect(),
        })
    }

    /// Recompute the buffer and visible windows from laid-out rects.
    fn update_windows(&mut self) {
        let (Some(viewport), Some(loaded)) = (self.viewport, self.edges.loaded()) else {
            self.edges.set(EdgeKind::Buffer, None);
            self.edges.set(EdgeKind::Visible, None);
            return;
        };
        let margin = self.config.buffer_margin;
        let buffer_rect = viewport.expand_vertically(margin, margin);
        let mut buffer: Option<Edge> = None;
        let mut visible: Option<Edge> = None;
        for id in self.tree.range(loaded.begin, loaded.end) {
            let Some(rect) = self.tree.node(id).and_then(|node| node.geometry().rect()) else {
                continue;
            };
            if rect.intersects_vertically(&buffer_rect) {
                grow(&mut buffer, id);
            }
            if rect.intersects_vertically(&viewport) {
                grow(&mut visible, id);
            }
        }
        self.edges.set(EdgeKind::Buffer, buffer);
        self.edges.set(EdgeKind::Visible, visible);
    }

    /// Diff materialized items against the visible window.
    fn sync_items(&mut self) {
        let wanted: Vec<NodeId> = match self.edges.visible() {
            Some(edge) => self
                .tree
                .range(edge.begin, edge.end)
                .filter(|&id| {
                    self.tree
                        .node(id)
                        .is_some_and(|node| node.geometry().rect().is_some())
                })
                .collect(),
            None => Vec::new(),
        };
        let keep: HashSet<NodeId> = wanted.iter().copied().collect();
        let mut stale: Vec<NodeId> = self
            .items
            .keys()
            .filter(|id| !keep.contains(id))
            .copied()
            .collect();
        stale.sort_unstable();
        for id in stale {
            self.release_item(id);
        }
        for id in wanted {
            if self.items.contains_key(&id) {
                continue;
            }
            let Some(view) = self.view(id) else {
                continue;
            };
            let mut item = self.delegate.create_item(&view);
            self.delegate.entered_visible(&view, &mut item);
            self.items.insert(id, item);
            self.stats.items_created += 1;
            partree_core::trace!(node = %id, key = %view.key, "item materialized");
        }
    }

    fn release_item(&mut self, id: NodeId) {
        let Some(mut item) = self.items.remove(&id) else {
            return;
        };
        if let Some(view) = self.view(id) {
            self.delegate.left_visible(&view, &mut item);
        }
        self.delegate.release_item(id, item);
        self.stats.items_released += 1;
        partree_core::trace!(node = %id, "item released");
    }

    /// Relayout after a structural change and trim the region back to the
    /// target window. Never loads.
    ///
    /// An emptied region is rebuilt from the model when `reseed` is set.
    fn relayout(&mut self, model: &dyn TreeModel, reseed: bool) -> Result<(), ReflectorError> {
        let Some(viewport) = self.viewport else {
            return Ok(());
        };
        if self.edges.loaded().is_none() {
            if reseed {
                return self.sync(model);
            }
            self.update_windows();
            self.sync_items();
            return Ok(());
        }
        self.layout_region(model);
        let target = self.target_window(viewport);
        self.evict_below(target)?;
        self.evict_above(target)?;
        self.update_windows();
        self.sync_items();
        Ok(())
    }
}

fn grow(edge: &mut Option<Edge>, id: NodeId) {
    match edge {
        Some(edge) => edge.end = id,
        None => *edge = Some(Edge::single(id)),
    }
}
