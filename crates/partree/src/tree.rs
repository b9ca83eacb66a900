//! Arena-backed partial tree over tracked model indices.
//!
//! The tree exposes two views of the same nodes:
//!
//! - **Tree links**: parent, first/last child, previous/next sibling, plus a
//!   per-parent identity mapping from [`NodeKey`] to child.
//! - **Flattened sequence**: [`PartialTree::down`] and [`PartialTree::up`]
//!   walk every tracked node in depth-first pre-order, independent of depth.
//!
//! # Invariants
//!
//! 1. `first_child` is `None` exactly when `last_child` is `None`.
//! 2. The first child has no previous sibling; the last child has no next.
//! 3. Walking the sibling chain either way visits exactly
//!    `loaded_children_count()` nodes.
//! 4. Settled siblings hold consecutive rows.
//! 5. `down()` is a depth-first pre-order and `up()` is its inverse.
//!
//! [`PartialTree::validate`] checks all five. Every entry point checks its
//! own preconditions before touching a link, so a rejected call leaves the
//! tree unchanged.

use std::collections::HashMap;

use partree_core::model::NodeKey;
use serde::{Deserialize, Serialize};

use crate::error::{InvariantCode, InvariantViolation, TreeError};
use crate::node::{NodeId, NodeState, PendingMove, TreeNode};

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<TreeNode>,
}

/// Partial mirror of a hierarchical model.
#[derive(Debug, Clone)]
pub struct PartialTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    by_key: HashMap<NodeKey, NodeId>,
}

impl Default for PartialTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialTree {
    /// Empty tree holding only the root sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(TreeNode::root()),
            }],
            free: Vec::new(),
            root: NodeId::new(0, 0),
            by_key: HashMap::new(),
        }
    }

    /// The root sentinel. Never returned by `down()`/`up()`.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Number of tracked nodes, excluding the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Lookup a node by id. Stale ids resolve to `None`.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    fn get(&self, id: NodeId) -> Result<&TreeNode, TreeError> {
        self.node(id).ok_or(TreeError::StaleNode { node: id })
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut TreeNode, TreeError> {
        self.node_mut(id).ok_or(TreeError::StaleNode { node: id })
    }

    /// Tracked node for a stable identity, anywhere in the tree.
    #[must_use]
    pub fn find(&self, key: NodeKey) -> Option<NodeId> {
        self.by_key.get(&key).copied()
    }

    /// Tracked child of `parent` with the given identity.
    #[must_use]
    pub fn child_by_key(&self, parent: NodeId, key: NodeKey) -> Option<NodeId> {
        self.node(parent)?.children.get(&key).copied()
    }

    /// Tracked child of `parent` currently at `row` (positional scan).
    #[must_use]
    pub fn child_at_row(&self, parent: NodeId, row: usize) -> Option<NodeId> {
        self.children(parent)
            .find(|&child| self.node(child).is_some_and(|n| n.position.row() == row))
    }

    /// Number of tracked children of `parent`.
    #[must_use]
    pub fn loaded_children_count(&self, parent: NodeId) -> usize {
        self.node(parent).map_or(0, TreeNode::loaded_children_count)
    }

    /// Iterate tracked children of `parent` in sibling order.
    pub fn children(&self, parent: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.node(parent).and_then(|n| n.first_child),
        }
    }

    /// Construct a detached `NEW` node.
    pub fn create_node(&mut self, key: NodeKey, row: usize, column: usize) -> NodeId {
        let node = TreeNode::new(key, row, column);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId::new(index, 0)
        }
    }

    fn free_slot(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index())
            && slot.generation == id.generation()
            && slot.node.is_some()
        {
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index() as u32);
        }
    }

    /// Attach `node` right after `after` (or as first child when `None`).
    pub fn insert_after(
        &mut self,
        node: NodeId,
        after: Option<NodeId>,
        parent: NodeId,
    ) -> Result<(), TreeError> {
        let next = match after {
            Some(sibling) => {
                self.check_sibling(sibling, parent)?;
                self.get(sibling)?.next_sibling
            }
            None => self.get(parent)?.first_child,
        };
        self.link(node, parent, after, next)
    }

    /// Attach `node` right before `before` (or as last child when `None`).
    pub fn insert_before(
        &mut self,
        node: NodeId,
        before: Option<NodeId>,
        parent: NodeId,
    ) -> Result<(), TreeError> {
        let prev = match before {
            Some(sibling) => {
                self.check_sibling(sibling, parent)?;
                self.get(sibling)?.prev_sibling
            }
            None => self.get(parent)?.last_child,
        };
        self.link(node, parent, prev, before)
    }

    fn check_sibling(&self, sibling: NodeId, parent: NodeId) -> Result<(), TreeError> {
        if self.get(sibling)?.parent == Some(parent) {
            Ok(())
        } else {
            Err(TreeError::SiblingMismatch { sibling, parent })
        }
    }

    fn link(
        &mut self,
        node: NodeId,
        parent: NodeId,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    ) -> Result<(), TreeError> {
        let target = self.get(node)?;
        let key = target.key.ok_or(TreeError::RootMutation)?;
        if target.parent.is_some() {
            return Err(TreeError::AlreadyAttached { node });
        }
        if node == parent || self.is_ancestor_of(node, parent) {
            return Err(TreeError::AlreadyAttached { node });
        }
        if self.get(parent)?.children.contains_key(&key) || self.by_key.contains_key(&key) {
            return Err(TreeError::DuplicateKey { key, parent });
        }

        let target = self.get_mut(node)?;
        target.parent = Some(parent);
        target.prev_sibling = prev;
        target.next_sibling = next;
        match prev {
            Some(prev) => self.get_mut(prev)?.next_sibling = Some(node),
            None => self.get_mut(parent)?.first_child = Some(node),
        }
        match next {
            Some(next) => self.get_mut(next)?.prev_sibling = Some(node),
            None => self.get_mut(parent)?.last_child = Some(node),
        }
        self.get_mut(parent)?.children.insert(key, node);
        self.by_key.insert(key, node);
        Ok(())
    }

    /// Detach `node` from its parent and bridge the gap it leaves.
    ///
    /// With `reparent == false` the node must be a leaf and its slot is
    /// freed. With `reparent == true` the node keeps its subtree and stays
    /// allocated in the `NEW` state for the caller to re-insert or discard.
    pub fn remove(&mut self, node: NodeId, reparent: bool) -> Result<(), TreeError> {
        if node == self.root {
            return Err(TreeError::RootMutation);
        }
        let target = self.get(node)?;
        let parent = target.parent.ok_or(TreeError::NotAttached { node })?;
        let (prev, next) = (target.prev_sibling, target.next_sibling);
        let key = target.key.ok_or(TreeError::RootMutation)?;
        if !reparent && (target.first_child.is_some() || !target.children.is_empty()) {
            return Err(TreeError::HasChildren { node });
        }

        self.get_mut(parent)?.children.remove(&key);
        if self.by_key.get(&key) == Some(&node) {
            self.by_key.remove(&key);
        }
        let target = self.get_mut(node)?;
        target.parent = None;
        target.prev_sibling = None;
        target.next_sibling = None;
        self.bridge_gap(parent, prev, next)?;

        if !reparent {
            self.free_slot(node);
        }
        Ok(())
    }

    /// Reconnect `parent`'s child list around an excised node.
    ///
    /// - both neighbors: link them directly;
    /// - only `after`: it becomes the first child;
    /// - only `before`: it becomes the last child;
    /// - neither: `parent` has no children left.
    pub fn bridge_gap(
        &mut self,
        parent: NodeId,
        before: Option<NodeId>,
        after: Option<NodeId>,
    ) -> Result<(), TreeError> {
        for sibling in [before, after].into_iter().flatten() {
            self.check_sibling(sibling, parent)?;
        }
        match (before, after) {
            (Some(before), Some(after)) => {
                self.get_mut(before)?.next_sibling = Some(after);
                self.get_mut(after)?.prev_sibling = Some(before);
            }
            (None, Some(after)) => {
                self.get_mut(after)?.prev_sibling = None;
                self.get_mut(parent)?.first_child = Some(after);
            }
            (Some(before), None) => {
                self.get_mut(before)?.next_sibling = None;
                self.get_mut(parent)?.last_child = Some(before);
            }
            (None, None) => {
                let parent = self.get_mut(parent)?;
                parent.first_child = None;
                parent.last_child = None;
            }
        }
        Ok(())
    }

    /// Remove `node` and its whole tracked subtree, freeing every slot.
    ///
    /// Works on attached nodes and on nodes detached with `reparent`.
    pub fn discard_subtree(&mut self, node: NodeId) -> Result<(), TreeError> {
        if node == self.root {
            return Err(TreeError::RootMutation);
        }
        if self.get(node)?.parent.is_some() {
            self.remove(node, true)?;
        }
        let doomed = self.subtree(node);
        for id in doomed.into_iter().rev() {
            if let Some(key) = self.node(id).and_then(|n| n.key)
                && self.by_key.get(&key) == Some(&id)
            {
                self.by_key.remove(&key);
            }
            self.free_slot(id);
        }
        Ok(())
    }

    /// Drop every node below the root.
    pub fn clear(&mut self) {
        let root = self.root;
        let ids: Vec<NodeId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(index, slot)| *index != root.index() && slot.node.is_some())
            .map(|(index, slot)| NodeId::new(index as u32, slot.generation))
            .collect();
        for id in ids {
            self.free_slot(id);
        }
        self.by_key.clear();
        if let Some(root) = self.node_mut(root) {
            root.first_child = None;
            root.last_child = None;
            root.children.clear();
        }
    }

    /// `node` and its tracked descendants in pre-order.
    #[must_use]
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if self.node(id).is_none() {
                continue;
            }
            out.push(id);
            let mut child = self.node(id).and_then(|n| n.last_child);
            while let Some(c) = child {
                stack.push(c);
                child = self.node(c).and_then(|n| n.prev_sibling);
            }
        }
        out
    }

    /// First tracked node in flattened order.
    #[must_use]
    pub fn first(&self) -> Option<NodeId> {
        self.node(self.root).and_then(|root| root.first_child)
    }

    /// Last tracked node in flattened order.
    #[must_use]
    pub fn last(&self) -> Option<NodeId> {
        self.node(self.root)
            .and_then(|root| root.last_child)
            .map(|last| self.deepest_last(last))
    }

    /// Next node in depth-first pre-order.
    #[must_use]
    pub fn down(&self, node: NodeId) -> Option<NodeId> {
        let current = self.node(node)?;
        if let Some(child) = current.first_child {
            return Some(child);
        }
        self.skip_subtree(node)
    }

    /// Next node in pre-order that is not a descendant of `node`.
    #[must_use]
    pub fn skip_subtree(&self, node: NodeId) -> Option<NodeId> {
        let mut cursor = node;
        loop {
            let current = self.node(cursor)?;
            if let Some(next) = current.next_sibling {
                return Some(next);
            }
            match current.parent {
                Some(parent) if parent != self.root => cursor = parent,
                _ => return None,
            }
        }
    }

    /// Previous node in depth-first pre-order; inverse of [`down`](Self::down).
    #[must_use]
    pub fn up(&self, node: NodeId) -> Option<NodeId> {
        if node == self.root {
            return None;
        }
        let current = self.node(node)?;
        match current.prev_sibling {
            Some(prev) => Some(self.deepest_last(prev)),
            None => current.parent.filter(|&parent| parent != self.root),
        }
    }

    /// Follow `last_child` links down to a leaf.
    #[must_use]
    pub fn deepest_last(&self, node: NodeId) -> NodeId {
        let mut cursor = node;
        while let Some(last) = self.node(cursor).and_then(|n| n.last_child) {
            cursor = last;
        }
        cursor
    }

    /// Iterate the flattened sequence from the first tracked node.
    pub fn iter(&self) -> Flattened<'_> {
        Flattened {
            tree: self,
            next: self.first(),
        }
    }

    /// Iterate the flattened sequence from `from` through `to` inclusive.
    pub fn range(&self, from: NodeId, to: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = Some(from);
        std::iter::from_fn(move || {
            let current = next?;
            next = if current == to { None } else { self.down(current) };
            Some(current)
        })
    }

    /// Levels below the top (top-level rows are depth 0).
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = self.node(node).and_then(|n| n.parent);
        while let Some(parent) = cursor {
            if parent == self.root {
                break;
            }
            depth += 1;
            cursor = self.node(parent).and_then(|n| n.parent);
        }
        depth
    }

    /// True if `ancestor` is a strict ancestor of `node`.
    #[must_use]
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = self.node(node).and_then(|n| n.parent);
        while let Some(parent) = cursor {
            if parent == ancestor {
                return true;
            }
            cursor = self.node(parent).and_then(|n| n.parent);
        }
        false
    }

    /// Model key of `node`'s parent (`None` for top-level rows).
    #[must_use]
    pub fn parent_key(&self, node: NodeId) -> Option<NodeKey> {
        self.node(node)
            .and_then(|n| n.parent)
            .and_then(|parent| self.node(parent))
            .and_then(|parent| parent.key)
    }

    /// Shift the current row of every tracked child of `parent` at or past `from_row`.
    pub fn shift_rows(&mut self, parent: NodeId, from_row: usize, delta: isize) {
        let children: Vec<NodeId> = self.children(parent).collect();
        for child in children {
            if let Some(node) = self.node_mut(child)
                && node.position.row() >= from_row
            {
                node.position = node.position.shifted(delta);
            }
        }
    }

    /// Enter `TRANSITION`: record a pending destination while the tree
    /// links keep describing the current position.
    pub fn set_temporary_index(
        &mut self,
        node: NodeId,
        parent: Option<NodeKey>,
        row: usize,
        column: usize,
    ) -> Result<(), TreeError> {
        if node == self.root {
            return Err(TreeError::RootMutation);
        }
        let target = self.get_mut(node)?;
        if target.parent.is_none() {
            return Err(TreeError::NotAttached { node });
        }
        target.position = target.position.with_pending(PendingMove {
            parent,
            row,
            column,
        });
        Ok(())
    }

    /// Leave `TRANSITION`: the pending destination becomes authoritative.
    pub fn reset_temporary_index(&mut self, node: NodeId) -> Result<(), TreeError> {
        let target = self.get_mut(node)?;
        target.position = target
            .position
            .settle()
            .ok_or(TreeError::NotInTransition { node })?;
        Ok(())
    }

    /// Check invariants 1–5 over every tracked node.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut preorder = Vec::with_capacity(self.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if id != self.root {
                preorder.push(id);
            }
            let kids = self.check_children(id)?;
            stack.extend(kids.into_iter().rev());
        }

        if preorder.len() != self.by_key.len() {
            return Err(InvariantViolation::new(
                InvariantCode::IdentityMapping,
                None,
                format!(
                    "{} reachable nodes but {} registered keys",
                    preorder.len(),
                    self.by_key.len()
                ),
            ));
        }

        let mut walked = Vec::with_capacity(preorder.len());
        let mut cursor = self.first();
        while let Some(id) = cursor {
            if walked.len() > preorder.len() {
                return Err(InvariantViolation::new(
                    InvariantCode::FlattenedOrder,
                    Some(id),
                    "down() does not terminate",
                ));
            }
            walked.push(id);
            cursor = self.down(id);
        }
        if walked != preorder {
            return Err(InvariantViolation::new(
                InvariantCode::FlattenedOrder,
                None,
                format!(
                    "down() visited {} nodes, pre-order has {}",
                    walked.len(),
                    preorder.len()
                ),
            ));
        }
        if let Some(&first) = walked.first()
            && self.up(first).is_some()
        {
            return Err(InvariantViolation::new(
                InvariantCode::FlattenedInverse,
                Some(first),
                "first node has a predecessor",
            ));
        }
        for pair in walked.windows(2) {
            if self.up(pair[1]) != Some(pair[0]) {
                return Err(InvariantViolation::new(
                    InvariantCode::FlattenedInverse,
                    Some(pair[1]),
                    format!("up() does not return {}", pair[0]),
                ));
            }
        }
        Ok(())
    }

    /// Checks invariants 1–4 for one parent and returns its children.
    fn check_children(&self, parent: NodeId) -> Result<Vec<NodeId>, InvariantViolation> {
        let violation = |code, node, msg: String| InvariantViolation::new(code, Some(node), msg);
        let node = self.node(parent).ok_or_else(|| {
            violation(InvariantCode::ParentLink, parent, "dangling child link".into())
        })?;

        match (node.first_child, node.last_child) {
            (None, None) | (Some(_), Some(_)) => {}
            _ => {
                return Err(violation(
                    InvariantCode::EndpointMismatch,
                    parent,
                    "first_child and last_child disagree".into(),
                ));
            }
        }
        if let Some(first) = node.first_child
            && self.node(first).is_some_and(|n| n.prev_sibling.is_some())
        {
            return Err(violation(
                InvariantCode::DanglingEndpoint,
                first,
                "first child has a previous sibling".into(),
            ));
        }
        if let Some(last) = node.last_child
            && self.node(last).is_some_and(|n| n.next_sibling.is_some())
        {
            return Err(violation(
                InvariantCode::DanglingEndpoint,
                last,
                "last child has a next sibling".into(),
            ));
        }

        let expected = node.children.len();
        let mut forward = Vec::with_capacity(expected);
        let mut previous: Option<&TreeNode> = None;
        let mut cursor = node.first_child;
        while let Some(id) = cursor {
            if forward.len() >= expected {
                return Err(violation(
                    InvariantCode::ChildCount,
                    parent,
                    format!("more than {expected} children in sibling chain"),
                ));
            }
            let child = self.node(id).ok_or_else(|| {
                violation(InvariantCode::SiblingChain, id, "stale sibling link".into())
            })?;
            if child.parent != Some(parent) {
                return Err(violation(
                    InvariantCode::ParentLink,
                    id,
                    format!("parent is {:?}, expected {parent}", child.parent),
                ));
            }
            let registered = child.key.and_then(|key| node.children.get(&key)).copied();
            if registered != Some(id) {
                return Err(violation(
                    InvariantCode::IdentityMapping,
                    id,
                    "child missing from parent's identity mapping".into(),
                ));
            }
            if let Some(prev) = previous
                && prev.state() == NodeState::Normal
                && child.state() == NodeState::Normal
                && child.position.row() != prev.position.row() + 1
            {
                return Err(violation(
                    InvariantCode::RowSequence,
                    id,
                    format!(
                        "row {} follows row {}",
                        child.position.row(),
                        prev.position.row()
                    ),
                ));
            }
            forward.push(id);
            previous = Some(child);
            cursor = child.next_sibling;
        }
        if forward.len() != expected {
            return Err(violation(
                InvariantCode::ChildCount,
                parent,
                format!("{} children walked, {expected} registered", forward.len()),
            ));
        }
        if forward.last().copied() != node.last_child {
            return Err(violation(
                InvariantCode::SiblingChain,
                parent,
                "forward walk does not end at last_child".into(),
            ));
        }

        let mut backward = 0usize;
        let mut cursor = node.last_child;
        while let Some(id) = cursor {
            if backward >= expected || forward[expected - 1 - backward] != id {
                return Err(violation(
                    InvariantCode::SiblingChain,
                    id,
                    "backward walk disagrees with forward walk".into(),
                ));
            }
            backward += 1;
            cursor = self.node(id).and_then(|n| n.prev_sibling);
        }
        if backward != expected {
            return Err(violation(
                InvariantCode::SiblingChain,
                parent,
                format!("backward walk visited {backward} of {expected}"),
            ));
        }
        Ok(forward)
    }

    /// Serializable view of the flattened sequence.
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        let entries = self
            .iter()
            .filter_map(|id| {
                let node = self.node(id)?;
                Some(SnapshotEntry {
                    key: node.key?,
                    depth: self.depth(id),
                    row: node.row(),
                    state: node.state(),
                })
            })
            .collect();
        TreeSnapshot { entries }
    }
}

/// Sibling iterator.
#[derive(Debug, Clone)]
pub struct Children<'a> {
    tree: &'a PartialTree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.node(current).and_then(|n| n.next_sibling);
        Some(current)
    }
}

/// Flattened-sequence iterator.
#[derive(Debug, Clone)]
pub struct Flattened<'a> {
    tree: &'a PartialTree,
    next: Option<NodeId>,
}

impl Iterator for Flattened<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.down(current);
        Some(current)
    }
}

/// One tracked node in a [`TreeSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: NodeKey,
    pub depth: usize,
    pub row: usize,
    pub state: NodeState,
}

/// Flattened sequence as plain data, for diffing and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl TreeSnapshot {
    /// Keys in flattened order.
    #[must_use]
    pub fn keys(&self) -> Vec<NodeKey> {
        self.entries.iter().map(|entry| entry.key).collect()
    }
}
