//! Tracked node record and its positional state.
//!
//! A [`TreeNode`] mirrors one model index. Its links are arena ids, so the
//! parent back-pointer and the sibling chain are plain copies that can be
//! rewritten in O(1) without lifetime bookkeeping.

use std::collections::HashMap;
use std::fmt;

use partree_core::model::NodeKey;
use serde::{Deserialize, Serialize};

use crate::adapter::Capabilities;
use crate::cache::GeometryCache;

/// Generational handle into the partial-tree arena.
///
/// A freed slot bumps its generation, so ids held past removal resolve to
/// `None` instead of aliasing a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Slot generation at allocation time.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}v{}", self.index, self.generation)
    }
}

/// Lifecycle of a tracked node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Constructed or removed; not part of any traversal.
    New,
    /// Attached with a settled position.
    Normal,
    /// Attached, with a move announced but not yet confirmed.
    Transition,
    /// The synthetic root sentinel.
    Root,
}

/// Destination of an announced move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingMove {
    /// Destination parent (`None` = model root).
    pub parent: Option<NodeKey>,
    pub row: usize,
    pub column: usize,
}

/// Row/column coordinates, with an optional in-flight destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodePosition {
    Stable {
        row: usize,
        column: usize,
    },
    /// Tree links still reflect `row`/`column`; `target` is where the
    /// node lands once the move is confirmed.
    Pending {
        row: usize,
        column: usize,
        target: PendingMove,
    },
}

impl NodePosition {
    /// Row the node currently occupies among its tracked siblings.
    #[must_use]
    pub const fn row(&self) -> usize {
        match *self {
            Self::Stable { row, .. } | Self::Pending { row, .. } => row,
        }
    }

    /// Column the node currently occupies.
    #[must_use]
    pub const fn column(&self) -> usize {
        match *self {
            Self::Stable { column, .. } | Self::Pending { column, .. } => column,
        }
    }

    /// Row answered to queries: the pending destination while a move is in flight.
    #[must_use]
    pub const fn effective_row(&self) -> usize {
        match *self {
            Self::Stable { row, .. } => row,
            Self::Pending { target, .. } => target.row,
        }
    }

    /// Column answered to queries.
    #[must_use]
    pub const fn effective_column(&self) -> usize {
        match *self {
            Self::Stable { column, .. } => column,
            Self::Pending { target, .. } => target.column,
        }
    }

    /// The announced destination, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<PendingMove> {
        match *self {
            Self::Stable { .. } => None,
            Self::Pending { target, .. } => Some(target),
        }
    }

    pub(crate) const fn with_pending(self, target: PendingMove) -> Self {
        Self::Pending {
            row: self.row(),
            column: self.column(),
            target,
        }
    }

    /// Make the pending destination authoritative.
    pub(crate) const fn settle(self) -> Option<Self> {
        match self {
            Self::Stable { .. } => None,
            Self::Pending { target, .. } => Some(Self::Stable {
                row: target.row,
                column: target.column,
            }),
        }
    }

    pub(crate) fn shifted(self, delta: isize) -> Self {
        let shift = |row: usize| row.checked_add_signed(delta).unwrap_or(0);
        match self {
            Self::Stable { row, column } => Self::Stable {
                row: shift(row),
                column,
            },
            Self::Pending {
                row,
                column,
                target,
            } => Self::Pending {
                row: shift(row),
                column,
                target,
            },
        }
    }
}

/// One tracked model index.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// `None` only for the root sentinel.
    pub(crate) key: Option<NodeKey>,
    pub(crate) position: NodePosition,
    pub(crate) parent: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) last_child: Option<NodeId>,
    pub(crate) prev_sibling: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
    /// Identity mapping for tracked children.
    pub(crate) children: HashMap<NodeKey, NodeId>,
    pub(crate) geometry: GeometryCache,
    pub(crate) flags: Capabilities,
}

impl TreeNode {
    pub(crate) fn new(key: NodeKey, row: usize, column: usize) -> Self {
        Self {
            key: Some(key),
            position: NodePosition::Stable { row, column },
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            children: HashMap::new(),
            geometry: GeometryCache::default(),
            flags: Capabilities::empty(),
        }
    }

    pub(crate) fn root() -> Self {
        Self {
            key: None,
            ..Self::new(NodeKey(0), 0, 0)
        }
    }

    /// Stable model identity (`None` for the root sentinel).
    #[must_use]
    pub const fn key(&self) -> Option<NodeKey> {
        self.key
    }

    /// Current lifecycle state, derived from attachment and position.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        if self.key.is_none() {
            NodeState::Root
        } else if self.parent.is_none() {
            NodeState::New
        } else if self.position.pending().is_some() {
            NodeState::Transition
        } else {
            NodeState::Normal
        }
    }

    #[must_use]
    pub const fn position(&self) -> NodePosition {
        self.position
    }

    /// Effective row (pending destination while in transition).
    #[must_use]
    pub const fn row(&self) -> usize {
        self.position.effective_row()
    }

    /// Effective column.
    #[must_use]
    pub const fn column(&self) -> usize {
        self.position.effective_column()
    }

    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub const fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    #[must_use]
    pub const fn last_child(&self) -> Option<NodeId> {
        self.last_child
    }

    #[must_use]
    pub const fn previous_sibling(&self) -> Option<NodeId> {
        self.prev_sibling
    }

    #[must_use]
    pub const fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }

    /// Number of tracked children.
    #[must_use]
    pub fn loaded_children_count(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub const fn geometry(&self) -> &GeometryCache {
        &self.geometry
    }

    /// Capability flags inherited from the geometry adapter at attach time.
    #[must_use]
    pub const fn flags(&self) -> Capabilities {
        self.flags
    }
}
