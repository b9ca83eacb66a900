//! Viewport-driven loading and eviction.

use std::collections::HashSet;

use partree_core::geometry::Rect;
use partree_core::model::{NodeKey, TreeModel};

use super::Reflector;
use crate::adapter::{Capabilities, NodeInfo};
use crate::delegate::ViewDelegate;
use crate::edges::{Edge, EdgeKind};
use crate::error::ReflectorError;
use crate::node::NodeId;

/// Zero-extent nodes make no progress toward the target window; bound how
/// many are loaded in a row.
pub(super) const UNSIZED_RUN_LIMIT: usize = 256;

/// Model rows inspected while locating a jump target before the remaining
/// siblings are counted as single rows.
const SEEK_BUDGET: usize = 4096;

/// Direction of the last viewport change; read-ahead applies on the leading edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl<D: ViewDelegate> Reflector<D> {
    /// Move the viewport (content coordinates) and resynchronize.
    pub fn set_viewport(
        &mut self,
        model: &dyn TreeModel,
        viewport: Rect,
    ) -> Result<(), ReflectorError> {
        if let Some(previous) = self.viewport {
            if viewport.y > previous.y {
                self.direction = Some(ScrollDirection::Down);
            } else if viewport.y < previous.y {
                self.direction = Some(ScrollDirection::Up);
            }
        }
        self.viewport = Some(viewport);
        self.sync(model)
    }

    /// Resynchronize against the current viewport.
    pub fn refresh(&mut self, model: &dyn TreeModel) -> Result<(), ReflectorError> {
        self.sync(model)
    }

    /// Rect the loaded region should cover.
    pub(super) fn target_window(&self, viewport: Rect) -> Rect {
        let margin = self.config.buffer_margin;
        let ahead = self.config.read_ahead;
        let (above, below) = match self.direction {
            Some(ScrollDirection::Down) => (margin, margin.saturating_add(ahead)),
            Some(ScrollDirection::Up) => (margin.saturating_add(ahead), margin),
            None => (margin.saturating_add(ahead), margin.saturating_add(ahead)),
        };
        viewport.expand_vertically(above, below)
    }

    pub(super) fn sync(&mut self, model: &dyn TreeModel) -> Result<(), ReflectorError> {
        let Some(viewport) = self.viewport else {
            return self.finish();
        };
        let span = partree_core::debug_span!(
            "partree.viewport",
            y = viewport.y,
            height = viewport.height,
            tracked = self.tree.len()
        );
        let _guard = span.enter();

        let target = self.target_window(viewport);
        let mut estimate = None;
        if let Some(loaded) = self.edges.loaded()
            && self.misses(loaded, target)
        {
            // Nothing tracked is reusable; start over at the target.
            estimate = self.average_extent(loaded);
            partree_core::debug!(
                top = self.top_of(loaded.begin),
                bottom = self.bottom_of(loaded.end),
                "viewport jumped past the loaded region"
            );
            self.clear_region();
        }
        if self.edges.loaded().is_none() && !self.seed(model, target, estimate)? {
            self.update_windows();
            self.sync_items();
            return self.finish();
        }

        self.layout_region(model);
        self.extend_down(model, target)?;
        self.extend_up(model, target)?;
        self.layout_region(model);
        // Re-anchoring at the top can leave room below.
        self.extend_down(model, target)?;
        self.evict_above(target)?;
        self.evict_below(target)?;
        self.update_windows();
        self.sync_items();

        partree_core::debug!(
            tracked = self.tree.len(),
            items = self.items.len(),
            "viewport synchronized"
        );
        self.finish()
    }

    /// True when the loaded extent and `target` share no rows.
    fn misses(&self, loaded: Edge, target: Rect) -> bool {
        self.bottom_of(loaded.end) < target.top() || self.top_of(loaded.begin) > target.bottom()
    }

    /// Mean height of the sized nodes in `loaded`.
    fn average_extent(&self, loaded: Edge) -> Option<u32> {
        let (sum, count) = self
            .tree
            .range(loaded.begin, loaded.end)
            .filter_map(|id| self.tree.node(id)?.geometry().size())
            .fold((0u64, 0u64), |(sum, count), size| {
                (sum + u64::from(size.height), count + 1)
            });
        let mean = sum.checked_div(count)?;
        Some(u32::try_from(mean).unwrap_or(u32::MAX))
    }

    /// Height of the first model row as the adapter reports it.
    fn sample_extent(&mut self, model: &dyn TreeModel) -> Option<u32> {
        let key = model.index(None, 0, 0)?;
        let info = NodeInfo {
            key,
            row: 0,
            column: 0,
            depth: 0,
        };
        self.adapter.size_hint(model, &info).map(|size| size.height)
    }

    /// Start an empty region at the row expected to sit at `target.top()`.
    ///
    /// With [`Capabilities::UNIFORM_SIZE`] the row follows from the offset
    /// exactly; otherwise rows are assumed to be `estimate` tall (or as tall
    /// as the first model row). Ancestors of the row become anchors.
    fn seed(
        &mut self,
        model: &dyn TreeModel,
        target: Rect,
        estimate: Option<u32>,
    ) -> Result<bool, ReflectorError> {
        if self.visible_rows(model, None) == 0 {
            return Ok(false);
        }
        let (path, y) = if target.top() == 0 {
            (vec![(None, 0)], 0)
        } else {
            let unit = if self.adapter.capabilities().contains(Capabilities::UNIFORM_SIZE) {
                self.sample_extent(model)
            } else {
                estimate.or_else(|| self.sample_extent(model))
            }
            .unwrap_or(1)
            .max(1);
            let (path, reached) = self.locate(model, (target.top() / unit) as usize);
            let reached = u32::try_from(reached).unwrap_or(u32::MAX);
            (path, reached.saturating_mul(unit))
        };

        let mut id = self.tree.root();
        for &(parent_key, row) in &path {
            id = self.attach(model, parent_key, row, id, None)?;
        }
        if id == self.tree.root() {
            return Ok(false);
        }
        self.set_top(id, y);
        self.edges.set(EdgeKind::Loaded, Some(Edge::single(id)));
        partree_core::debug!(depth = path.len(), y, "region seeded");
        Ok(true)
    }

    /// Model path `(parent, row)` from the top level down to the row at
    /// flattened position `index`, clamped to the last visible row, and the
    /// position actually reached.
    ///
    /// Sibling subtrees are counted until [`SEEK_BUDGET`] rows have been
    /// inspected; past that, siblings count as single rows.
    fn locate(
        &self,
        model: &dyn TreeModel,
        index: usize,
    ) -> (Vec<(Option<NodeKey>, usize)>, usize) {
        let mut budget = SEEK_BUDGET;
        let mut path = Vec::new();
        let mut parent = None;
        let mut remaining = index;
        let mut reached = 0;
        loop {
            let rows = self.visible_rows(model, parent);
            if rows == 0 {
                break;
            }
            let mut row = 0;
            while remaining > 0 && row + 1 < rows {
                if budget == 0 {
                    let skip = remaining.min(rows - 1 - row);
                    row += skip;
                    reached += skip;
                    remaining -= skip;
                    break;
                }
                let Some(key) = model.index(parent, row, 0) else {
                    break;
                };
                let span = self.subtree_span(model, key, &mut budget);
                if remaining < span {
                    break;
                }
                remaining -= span;
                reached += span;
                row += 1;
            }
            path.push((parent, row));
            let Some(key) = model.index(parent, row, 0) else {
                break;
            };
            if remaining == 0 || self.visible_rows(model, Some(key)) == 0 {
                break;
            }
            remaining -= 1;
            reached += 1;
            parent = Some(key);
        }
        (path, reached)
    }

    /// Visible rows in `key`'s subtree, itself included.
    fn subtree_span(&self, model: &dyn TreeModel, key: NodeKey, budget: &mut usize) -> usize {
        *budget = budget.saturating_sub(1);
        let rows = self.visible_rows(model, Some(key));
        let mut span = 1;
        for row in 0..rows {
            if *budget == 0 {
                return span + (rows - row);
            }
            if let Some(child) = model.index(Some(key), row, 0) {
                span += self.subtree_span(model, child, budget);
            }
        }
        span
    }

    fn extend_down(&mut self, model: &dyn TreeModel, target: Rect) -> Result<(), ReflectorError> {
        let mut unsized_run = 0;
        while let Some(loaded) = self.edges.loaded() {
            let end_bottom = self.bottom_of(loaded.end);
            if end_bottom >= target.bottom() {
                break;
            }
            if unsized_run >= UNSIZED_RUN_LIMIT {
                partree_core::warn!(run = unsized_run, "stopped loading downward: no sized rows");
                break;
            }
            let Some(next) = self.attach_successor(model, loaded.end)? else {
                break;
            };
            self.edges
                .set(EdgeKind::Loaded, Some(Edge::new(loaded.begin, next)));
            let bottom = self.place(model, next, end_bottom);
            unsized_run = if bottom == end_bottom { unsized_run + 1 } else { 0 };
            self.evict_above(target)?;
        }
        Ok(())
    }

    fn extend_up(&mut self, model: &dyn TreeModel, target: Rect) -> Result<(), ReflectorError> {
        let mut unsized_run = 0;
        while let Some(loaded) = self.edges.loaded() {
            let top = self.top_of(loaded.begin);
            if top <= target.top() && target.top() > 0 {
                break;
            }
            if unsized_run >= UNSIZED_RUN_LIMIT {
                partree_core::warn!(run = unsized_run, "stopped loading upward: no sized rows");
                break;
            }
            let Some(prev) = self.attach_predecessor(model, loaded.begin)? else {
                if top != 0 {
                    // First model row reached: re-anchor the region at 0.
                    self.set_top(loaded.begin, 0);
                    self.layout_region(model);
                }
                break;
            };
            self.edges.set(EdgeKind::Loaded, Some(Edge::new(prev, loaded.end)));
            self.ensure_size(model, prev);
            let height = self
                .tree
                .node(prev)
                .map_or(0, |node| node.geometry().extent());
            unsized_run = if height == 0 { unsized_run + 1 } else { 0 };
            if height > top {
                self.set_top(prev, 0);
                self.layout_region(model);
            } else {
                self.set_top(prev, top - height);
            }
            self.evict_below(target)?;
        }
        Ok(())
    }

    /// Attach the model row following `end` in visible pre-order.
    fn attach_successor(
        &mut self,
        model: &dyn TreeModel,
        end: NodeId,
    ) -> Result<Option<NodeId>, ReflectorError> {
        let Some(key) = self.key_of(end) else {
            return Ok(None);
        };
        if self.visible_rows(model, Some(key)) > 0 {
            return self.attach(model, Some(key), 0, end, None).map(Some);
        }
        let root = self.tree.root();
        let mut cursor = end;
        loop {
            let Some(node) = self.tree.node(cursor) else {
                return Ok(None);
            };
            let Some(parent) = node.parent() else {
                return Ok(None);
            };
            let row = node.position().row();
            let parent_key = self.key_of(parent);
            if row + 1 < self.visible_rows(model, parent_key) {
                return self
                    .attach(model, parent_key, row + 1, parent, Some(cursor))
                    .map(Some);
            }
            if parent == root {
                return Ok(None);
            }
            cursor = parent;
        }
    }

    /// Make the model row preceding `begin` trackable and return it.
    ///
    /// A previous sibling is attached together with its chain of last
    /// descendants, which become anchors above the returned node.
    fn attach_predecessor(
        &mut self,
        model: &dyn TreeModel,
        begin: NodeId,
    ) -> Result<Option<NodeId>, ReflectorError> {
        let Some(node) = self.tree.node(begin) else {
            return Ok(None);
        };
        let Some(parent) = node.parent() else {
            return Ok(None);
        };
        let row = node.position().row();
        if row == 0 {
            return Ok((parent != self.tree.root()).then_some(parent));
        }
        let parent_key = self.key_of(parent);
        let mut cursor = self.attach(model, parent_key, row - 1, parent, None)?;
        while let Some(key) = self.key_of(cursor) {
            let rows = self.visible_rows(model, Some(key));
            if rows == 0 {
                break;
            }
            cursor = self.attach(model, Some(key), rows - 1, cursor, None)?;
        }
        Ok(Some(cursor))
    }

    /// Evict from the top while `begin` lies wholly above `target`.
    pub(super) fn evict_above(&mut self, target: Rect) -> Result<(), ReflectorError> {
        if target.top() == 0 {
            return Ok(());
        }
        while let Some(loaded) = self.edges.loaded() {
            if loaded.begin == loaded.end || self.bottom_of(loaded.begin) > target.top() {
                break;
            }
            self.evict_begin(loaded)?;
        }
        Ok(())
    }

    /// Evict from the bottom while `end` lies wholly below `target`.
    pub(super) fn evict_below(&mut self, target: Rect) -> Result<(), ReflectorError> {
        while let Some(loaded) = self.edges.loaded() {
            if loaded.begin == loaded.end || self.top_of(loaded.end) < target.bottom() {
                break;
            }
            if self.tree.loaded_children_count(loaded.end) > 0 {
                break;
            }
            self.retire_from_windows(loaded.end);
            self.evict_leaf(loaded.end)?;
        }
        Ok(())
    }

    fn evict_begin(&mut self, loaded: Edge) -> Result<(), ReflectorError> {
        let begin = loaded.begin;
        self.retire_from_windows(begin);
        if self.tree.loaded_children_count(begin) > 0 {
            // Keeps its children; stays tracked as an anchor.
            self.release_item(begin);
            return Ok(());
        }
        let parent = self.tree.node(begin).and_then(|node| node.parent());
        self.evict_leaf(begin)?;
        self.prune_upward(parent)
    }

    /// Pull every window off `id`, moving lost ends to its flattened neighbors.
    pub(super) fn retire_from_windows(&mut self, id: NodeId) {
        let removed = HashSet::from([id]);
        let before = self.tree.up(id);
        let after = self.tree.down(id);
        self.edges.shrink_around(&removed, before, after);
    }
}
