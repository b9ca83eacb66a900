//! Structural notifications from the source model.

use std::collections::{HashMap, HashSet};

use partree_core::model::{ModelEvent, NodeKey, TreeModel, moved_block_start};

use super::Reflector;
use super::viewport::UNSIZED_RUN_LIMIT;
use crate::adapter::Capabilities;
use crate::delegate::ViewDelegate;
use crate::edges::{Edge, EdgeKind};
use crate::error::ReflectorError;
use crate::node::NodeId;

/// An announced move awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MoveRecord {
    source_parent: Option<NodeKey>,
    first: usize,
    last: usize,
    dest_parent: Option<NodeKey>,
    dest_row: usize,
}

impl MoveRecord {
    const fn count(&self) -> usize {
        self.last - self.first + 1
    }

    fn dest_start(&self) -> usize {
        moved_block_start(
            self.source_parent,
            self.first,
            self.last,
            self.dest_parent,
            self.dest_row,
        )
    }

    const fn summary(&self) -> (Option<NodeKey>, usize, usize) {
        (self.source_parent, self.first, self.last)
    }
}

/// Where inserted rows land relative to the loaded region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Directly after `end`; the region grows downward.
    AfterEnd,
    /// Between two region nodes.
    Within,
    /// Above `begin` at the top of the model; the region grows upward.
    BeforeBegin,
}

/// Running flow position while new rows are built in pre-order.
///
/// Building stops once the flow passes the bottom of the target window;
/// the rest is left to the next viewport pass.
#[derive(Debug)]
struct Flow {
    y: u32,
    limit: u32,
    unsized_run: usize,
    last: Option<NodeId>,
}

impl Flow {
    const fn new(y: u32, limit: u32) -> Self {
        Self {
            y,
            limit,
            unsized_run: 0,
            last: None,
        }
    }

    const fn exhausted(&self) -> bool {
        self.y >= self.limit || self.unsized_run >= UNSIZED_RUN_LIMIT
    }
}

fn check_range(first: usize, last: usize) -> Result<(), ReflectorError> {
    if first > last {
        Err(ReflectorError::InvalidRange { first, last })
    } else {
        Ok(())
    }
}

impl<D: ViewDelegate> Reflector<D> {
    /// Apply one model notification.
    ///
    /// `model` must already reflect the event: the old layout for
    /// `RowsAboutToBe*`, the new layout for everything else.
    pub fn handle_event(
        &mut self,
        model: &dyn TreeModel,
        event: &ModelEvent,
    ) -> Result<(), ReflectorError> {
        partree_core::debug!(event = event.name(), tracked = self.tree.len(), "model notification");
        match *event {
            ModelEvent::RowsInserted {
                parent,
                first,
                last,
            } => {
                check_range(first, last)?;
                self.rows_inserted(model, parent, first, last)?;
            }
            ModelEvent::RowsAboutToBeRemoved {
                parent,
                first,
                last,
            } => {
                check_range(first, last)?;
                self.rows_about_to_be_removed(model, parent, first, last)?;
                // The model still holds the doomed rows: never reseed here.
                self.relayout(model, false)?;
                return self.finish();
            }
            ModelEvent::RowsAboutToBeMoved {
                source_parent,
                first,
                last,
                dest_parent,
                dest_row,
            } => {
                check_range(first, last)?;
                self.announce_move(MoveRecord {
                    source_parent,
                    first,
                    last,
                    dest_parent,
                    dest_row,
                })?;
                return self.finish();
            }
            ModelEvent::RowsMoved {
                source_parent,
                first,
                last,
                dest_parent,
                dest_row,
            } => {
                check_range(first, last)?;
                self.confirm_move(
                    model,
                    MoveRecord {
                        source_parent,
                        first,
                        last,
                        dest_parent,
                        dest_row,
                    },
                )?;
            }
            ModelEvent::LayoutChanged => {
                self.discard_all();
                return self.finish();
            }
            ModelEvent::Reset => {
                self.reset();
                return self.finish();
            }
        }
        self.relayout(model, true)?;
        self.finish()
    }

    /// Forget everything, including collapsed state.
    ///
    /// The next viewport pass rebuilds the region from the model.
    pub fn reset(&mut self) {
        self.discard_all();
        self.collapsed.clear();
    }

    fn discard_all(&mut self) {
        partree_core::debug!(tracked = self.tree.len(), "discarding tracked tree");
        self.clear_region();
        self.pending_move = None;
    }

    /// Show or hide the children of `key`.
    ///
    /// Collapsing evicts the tracked subtree. Expanding a node inside the
    /// region loads its rows in place; elsewhere the next pass picks them up.
    pub fn set_expanded(
        &mut self,
        model: &dyn TreeModel,
        key: NodeKey,
        expanded: bool,
    ) -> Result<(), ReflectorError> {
        if expanded {
            if !self.collapsed.remove(&key) {
                return Ok(());
            }
            let end = self.edges.loaded().map(|edge| edge.end);
            if let Some(id) = self.tree.find(key)
                && self.in_region(id)
                && Some(id) != end
            {
                let count = model.row_count(Some(key));
                if count > 0 {
                    self.insert_rows(model, id, Some(key), 0, count, &mut HashMap::new())?;
                }
            }
        } else {
            if !self.collapsed.insert(key) {
                return Ok(());
            }
            if let Some(id) = self.tree.find(key) {
                let block: Vec<NodeId> = self.tree.children(id).collect();
                if !block.is_empty() {
                    self.excise(id, &block, false)?;
                }
            }
        }
        partree_core::debug!(key = %key, expanded, "expansion changed");
        self.sync(model)
    }

    fn rows_inserted(
        &mut self,
        model: &dyn TreeModel,
        parent: Option<NodeKey>,
        first: usize,
        last: usize,
    ) -> Result<(), ReflectorError> {
        if parent.is_some_and(|key| self.collapsed.contains(&key)) {
            return Ok(());
        }
        let Some(pid) = self.resolve(parent) else {
            return Ok(());
        };
        self.insert_rows(model, pid, parent, first, last - first + 1, &mut HashMap::new())
    }

    /// Mirror `count` new model rows under `pid` starting at `first`.
    ///
    /// Rows are only tracked when they land inside or right after the
    /// loaded region, or on top of a region that starts at the first model
    /// row. Nodes found in `kept` (by key) are re-homed instead of built.
    ///
    /// Building stops at the bottom of the target window. Tracked nodes
    /// pushed past that point are evicted so the region stays contiguous.
    pub(super) fn insert_rows(
        &mut self,
        model: &dyn TreeModel,
        pid: NodeId,
        parent_key: Option<NodeKey>,
        first: usize,
        count: usize,
        kept: &mut HashMap<NodeKey, NodeId>,
    ) -> Result<(), ReflectorError> {
        let root = self.tree.root();
        let Some(loaded) = self.edges.loaded() else {
            return Ok(());
        };
        let begin_at_top = self
            .tree
            .node(loaded.begin)
            .is_some_and(|node| node.parent() == Some(root) && node.position().row() == 0);

        self.tree.shift_rows(pid, first, count as isize);
        self.invalidate_children_from(pid, first + count);

        let neighbor = if first == 0 {
            None
        } else {
            self.neighbor_at(model, pid, parent_key, first - 1)
        };
        let pred = if first == 0 {
            (pid != root).then_some(pid)
        } else {
            neighbor.and_then(|n| self.adjacent_tail(model, n))
        };
        let placement = match pred {
            Some(p) if self.in_region(p) && p == loaded.end => Placement::AfterEnd,
            Some(p) if self.in_region(p) => Placement::Within,
            None if pid == root && first == 0 && begin_at_top => Placement::BeforeBegin,
            _ => {
                partree_core::trace!(first, count, "inserted rows outside the loaded region");
                return Ok(());
            }
        };

        let start = match pred {
            Some(p) => self.bottom_of(p),
            None => self.top_of(loaded.begin),
        };
        let limit = self
            .viewport
            .map_or(u32::MAX, |viewport| self.target_window(viewport).bottom());
        let mut flow = Flow::new(start, limit);

        let mut after = neighbor;
        let mut inserted = Vec::new();
        for offset in 0..count {
            if flow.exhausted() {
                break;
            }
            let row = first + offset;
            let key = model.index(parent_key, row, 0).ok_or(ReflectorError::MissingRow {
                parent: parent_key,
                row,
            })?;
            let id = match kept.remove(&key) {
                Some(id) => {
                    self.tree.insert_after(id, after, pid)?;
                    id
                }
                None => self.attach_key(model, key, row, pid, after)?,
            };
            self.advance(model, &mut flow, id);
            self.complete_subtree(model, id, &mut flow)?;
            after = Some(id);
            inserted.push(id);
        }

        match placement {
            Placement::AfterEnd => {
                if let Some(&last) = inserted.last() {
                    let tail = self.tree.deepest_last(last);
                    self.edges
                        .set(EdgeKind::Loaded, Some(Edge::new(loaded.begin, tail)));
                }
            }
            Placement::BeforeBegin => {
                if let Some(&head) = inserted.first() {
                    let top = self.top_of(loaded.begin);
                    self.set_top(head, top);
                    self.edges
                        .set(EdgeKind::Loaded, Some(Edge::new(head, loaded.end)));
                }
            }
            Placement::Within => {}
        }
        if flow.exhausted()
            && let Some(stop) = flow.last.or(pred)
        {
            self.truncate_after(stop)?;
        }
        partree_core::debug!(
            first,
            count,
            built = inserted.len(),
            placement = ?placement,
            "rows tracked"
        );
        Ok(())
    }

    /// Size a freshly tracked node and move the flow past it.
    fn advance(&mut self, model: &dyn TreeModel, flow: &mut Flow, id: NodeId) {
        self.ensure_size(model, id);
        let height = self
            .tree
            .node(id)
            .map_or(0, |node| node.geometry().extent());
        flow.y = flow.y.saturating_add(height);
        flow.unsized_run = if height == 0 { flow.unsized_run + 1 } else { 0 };
        flow.last = Some(id);
    }

    /// Evict every tracked node after `stop` in flattened order, making it
    /// the region's end.
    fn truncate_after(&mut self, stop: NodeId) -> Result<(), ReflectorError> {
        let mut evicted = 0usize;
        while let Some(loaded) = self.edges.loaded() {
            if loaded.end == stop || loaded.begin == loaded.end {
                break;
            }
            self.retire_from_windows(loaded.end);
            self.evict_leaf(loaded.end)?;
            evicted += 1;
        }
        if evicted > 0 {
            partree_core::trace!(evicted, "region truncated after insertion");
        }
        Ok(())
    }

    /// Tracked child of `pid` at `row`: by identity first, then by position.
    fn neighbor_at(
        &self,
        model: &dyn TreeModel,
        pid: NodeId,
        parent_key: Option<NodeKey>,
        row: usize,
    ) -> Option<NodeId> {
        model
            .index(parent_key, row, 0)
            .and_then(|key| self.tree.child_by_key(pid, key))
            .or_else(|| self.tree.child_at_row(pid, row))
    }

    /// Last tracked node of `node`'s subtree, if it is also the model's
    /// last visible descendant. Otherwise the subtree is only partly
    /// tracked and rows after it are not adjacent to the region.
    fn adjacent_tail(&self, model: &dyn TreeModel, node: NodeId) -> Option<NodeId> {
        let tail = self.tree.deepest_last(node);
        let mut key = self.key_of(node)?;
        loop {
            let rows = self.visible_rows(model, Some(key));
            if rows == 0 {
                break;
            }
            key = model.index(Some(key), rows - 1, 0)?;
        }
        (self.key_of(tail) == Some(key)).then_some(tail)
    }

    /// Track the visible model descendants of `id` until `flow` runs out,
    /// reusing tracked ones.
    fn complete_subtree(
        &mut self,
        model: &dyn TreeModel,
        id: NodeId,
        flow: &mut Flow,
    ) -> Result<(), ReflectorError> {
        let Some(key) = self.key_of(id) else {
            return Ok(());
        };
        let rows = self.visible_rows(model, Some(key));
        if rows == 0 {
            let stale: Vec<NodeId> = self.tree.children(id).collect();
            for child in stale {
                self.discard(child)?;
            }
            return Ok(());
        }
        let mut after = None;
        for row in 0..rows {
            if flow.exhausted() {
                break;
            }
            let child_key = model
                .index(Some(key), row, 0)
                .ok_or(ReflectorError::MissingRow {
                    parent: Some(key),
                    row,
                })?;
            let child = match self.tree.child_by_key(id, child_key) {
                Some(existing) => existing,
                None => self.attach_key(model, child_key, row, id, after)?,
            };
            self.advance(model, flow, child);
            self.complete_subtree(model, child, flow)?;
            after = Some(child);
        }
        Ok(())
    }

    fn rows_about_to_be_removed(
        &mut self,
        model: &dyn TreeModel,
        parent: Option<NodeKey>,
        first: usize,
        last: usize,
    ) -> Result<(), ReflectorError> {
        self.forget_collapsed(model, parent, first, last);
        let Some(pid) = self.resolve(parent) else {
            return Ok(());
        };
        let block = self.tracked_block(pid, first, last);
        if !block.is_empty() {
            self.excise(pid, &block, false)?;
        }
        if self.tree.node(pid).is_some() {
            let count = last - first + 1;
            self.tree.shift_rows(pid, last + 1, -(count as isize));
            self.invalidate_children_from(pid, first);
        }
        Ok(())
    }

    /// Drop collapsed state for rows about to leave the model.
    ///
    /// Covers the removed rows themselves and every tracked descendant;
    /// untracked descendants keep stale entries until the next reset.
    fn forget_collapsed(
        &mut self,
        model: &dyn TreeModel,
        parent: Option<NodeKey>,
        first: usize,
        last: usize,
    ) {
        if self.collapsed.is_empty() {
            return;
        }
        let mut doomed: Vec<NodeKey> = (first..=last)
            .filter_map(|row| model.index(parent, row, 0))
            .collect();
        if let Some(pid) = self.resolve(parent) {
            for id in self.tracked_block(pid, first, last) {
                doomed.extend(
                    self.tree
                        .subtree(id)
                        .into_iter()
                        .filter_map(|node| self.key_of(node)),
                );
            }
        }
        for key in doomed {
            self.collapsed.remove(&key);
        }
    }

    /// Tracked children of `pid` whose current row is in `first..=last`.
    fn tracked_block(&self, pid: NodeId, first: usize, last: usize) -> Vec<NodeId> {
        self.tree
            .children(pid)
            .filter(|&id| {
                self.tree
                    .node(id)
                    .is_some_and(|node| (first..=last).contains(&node.position().row()))
            })
            .collect()
    }

    /// Take a run of consecutive tracked siblings (and their subtrees) out
    /// of the tree.
    ///
    /// Windows losing an end move to the nearest surviving neighbor, items
    /// are released, and anchors left without children are pruned. With
    /// `keep`, the block roots stay allocated and are returned for
    /// re-insertion; an emptied region frees them too.
    pub(super) fn excise(
        &mut self,
        pid: NodeId,
        block: &[NodeId],
        keep: bool,
    ) -> Result<Vec<NodeId>, ReflectorError> {
        let (Some(&first), Some(&last)) = (block.first(), block.last()) else {
            return Ok(Vec::new());
        };
        let before = self.tree.up(first);
        let after = self.tree.skip_subtree(last);
        let removed: Vec<NodeId> = block
            .iter()
            .flat_map(|&id| self.tree.subtree(id))
            .collect();
        let removed_set: HashSet<NodeId> = removed.iter().copied().collect();

        let old_loaded = self.edges.loaded();
        let anchors = old_loaded.map_or_else(HashSet::new, |edge| self.ancestors(edge.begin));
        self.edges.shrink_around(&removed_set, before, after);
        if let (Some(old), Some(new)) = (old_loaded, self.edges.loaded())
            && old.begin != new.begin
        {
            let top = self.top_of(old.begin);
            self.set_top(new.begin, top);
        }

        for &id in &removed {
            self.release_item(id);
        }
        let mut roots = Vec::new();
        if keep {
            for &id in block {
                self.tree.remove(id, true)?;
                roots.push(id);
            }
        } else {
            for &id in removed.iter().rev() {
                self.tree.remove(id, false)?;
            }
            self.stats.nodes_evicted += removed.len() as u64;
        }
        partree_core::debug!(removed = removed.len(), keep, "tracked rows excised");

        if self.edges.loaded().is_none() {
            self.clear_region();
            return Ok(Vec::new());
        }

        let root = self.tree.root();
        let mut cursor = Some(pid);
        while let Some(id) = cursor {
            if id == root || !anchors.contains(&id) || self.tree.loaded_children_count(id) > 0 {
                break;
            }
            cursor = self.tree.node(id).and_then(|node| node.parent());
            self.evict_leaf(id)?;
        }
        Ok(roots)
    }

    /// Free a node and its subtree, attached or not.
    fn discard(&mut self, id: NodeId) -> Result<(), ReflectorError> {
        let doomed = self.tree.subtree(id);
        for &node in &doomed {
            self.release_item(node);
        }
        self.tree.discard_subtree(id)?;
        self.stats.nodes_evicted += doomed.len() as u64;
        Ok(())
    }

    fn announce_move(&mut self, record: MoveRecord) -> Result<(), ReflectorError> {
        self.pending_move = Some(record);
        let Some(pid) = self.resolve(record.source_parent) else {
            return Ok(());
        };
        let start = record.dest_start();
        let order_dependent = self
            .adapter
            .capabilities()
            .contains(Capabilities::ORDER_DEPENDENT);
        for id in self.tracked_block(pid, record.first, record.last) {
            let Some(row) = self.tree.node(id).map(|node| node.position().row()) else {
                continue;
            };
            self.tree.set_temporary_index(
                id,
                record.dest_parent,
                start + (row - record.first),
                0,
            )?;
            if order_dependent && let Some(node) = self.tree.node_mut(id) {
                node.geometry.invalidate();
            }
        }
        partree_core::debug!(first = record.first, last = record.last, start, "move announced");
        Ok(())
    }

    fn confirm_move(&mut self, model: &dyn TreeModel, record: MoveRecord) -> Result<(), ReflectorError> {
        match self.pending_move {
            None => self.announce_move(record)?,
            Some(announced) if announced != record => {
                return Err(ReflectorError::MoveMismatch {
                    announced: announced.summary(),
                    confirmed: record.summary(),
                });
            }
            Some(_) => {}
        }
        self.pending_move = None;

        let count = record.count();
        let mut roots = Vec::new();
        if let Some(pid) = self.resolve(record.source_parent) {
            let block = self.tracked_block(pid, record.first, record.last);
            if !block.is_empty() {
                roots = self.excise(pid, &block, true)?;
            }
            if self.tree.node(pid).is_some() {
                self.tree.shift_rows(pid, record.last + 1, -(count as isize));
                self.invalidate_children_from(pid, record.first);
            }
        }

        let mut kept: HashMap<NodeKey, NodeId> = roots
            .iter()
            .filter_map(|&id| Some((self.key_of(id)?, id)))
            .collect();
        let dest_collapsed = record
            .dest_parent
            .is_some_and(|key| self.collapsed.contains(&key));
        if !dest_collapsed && let Some(dest) = self.resolve(record.dest_parent) {
            self.insert_rows(
                model,
                dest,
                record.dest_parent,
                record.dest_start(),
                count,
                &mut kept,
            )?;
        }

        for (_, id) in kept.drain() {
            self.discard(id)?;
        }
        for id in roots {
            if self.tree.node(id).is_some_and(|node| node.parent().is_some()) {
                self.tree.reset_temporary_index(id)?;
            }
        }
        partree_core::debug!(count, "move confirmed");
        Ok(())
    }
}
