//! Edge tracker: the three sliding windows over the flattened sequence.
//!
//! Each window is a `begin..=end` pair of tracked nodes in `down()` order.
//!
//! | Window | Bounds |
//! |--------|--------|
//! | `Loaded` | every node the reflector keeps positioned |
//! | `Buffer` | nodes intersecting the viewport grown by the buffer margin |
//! | `Visible` | nodes intersecting the viewport |
//!
//! # Invariants
//!
//! 1. `Visible ⊆ Buffer ⊆ Loaded` after every viewport pass.
//! 2. A window never names a node that is no longer tracked: removals call
//!    [`EdgeTracker::shrink_around`] before the nodes are freed.

use std::collections::HashSet;

use crate::node::NodeId;

/// Which window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Loaded,
    Buffer,
    Visible,
}

impl EdgeKind {
    /// All windows, outermost first.
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Loaded, EdgeKind::Buffer, EdgeKind::Visible];

    const fn slot(self) -> usize {
        match self {
            Self::Loaded => 0,
            Self::Buffer => 1,
            Self::Visible => 2,
        }
    }
}

/// A non-empty `begin..=end` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub begin: NodeId,
    pub end: NodeId,
}

impl Edge {
    #[must_use]
    pub const fn new(begin: NodeId, end: NodeId) -> Self {
        Self { begin, end }
    }

    /// Window holding a single node.
    #[must_use]
    pub const fn single(node: NodeId) -> Self {
        Self::new(node, node)
    }
}

/// Begin/end bookkeeping for the loaded, buffer and visible windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeTracker {
    windows: [Option<Edge>; 3],
}

impl EdgeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn get(&self, kind: EdgeKind) -> Option<Edge> {
        self.windows[kind.slot()]
    }

    pub fn set(&mut self, kind: EdgeKind, edge: Option<Edge>) {
        self.windows[kind.slot()] = edge;
    }

    #[must_use]
    pub const fn loaded(&self) -> Option<Edge> {
        self.get(EdgeKind::Loaded)
    }

    #[must_use]
    pub const fn buffer(&self) -> Option<Edge> {
        self.get(EdgeKind::Buffer)
    }

    #[must_use]
    pub const fn visible(&self) -> Option<Edge> {
        self.get(EdgeKind::Visible)
    }

    /// True when no window is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(Option::is_none)
    }

    pub fn clear_all(&mut self) {
        self.windows = [None; 3];
    }

    /// Retarget windows whose ends are about to be removed.
    ///
    /// `removed` is one contiguous run of the flattened sequence; `before`
    /// and `after` are its surviving neighbors. A window entirely inside the
    /// run is cleared; a window losing one end moves it to the neighbor on
    /// that side.
    pub fn shrink_around(
        &mut self,
        removed: &HashSet<NodeId>,
        before: Option<NodeId>,
        after: Option<NodeId>,
    ) {
        for window in &mut self.windows {
            let Some(edge) = *window else {
                continue;
            };
            let lost_begin = removed.contains(&edge.begin);
            let lost_end = removed.contains(&edge.end);
            *window = match (lost_begin, lost_end) {
                (false, false) => Some(edge),
                (true, true) => None,
                (true, false) => after.map(|begin| Edge::new(begin, edge.end)),
                (false, true) => before.map(|end| Edge::new(edge.begin, end)),
            };
        }
    }
}
