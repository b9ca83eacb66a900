#![forbid(unsafe_code)]

//! Hierarchical source-model contract.
//!
//! The reflector never owns model data. It reads rows through [`TreeModel`]
//! and reacts to [`ModelEvent`]s delivered in the order the model emits them.
//!
//! # Stable identity
//!
//! Every model node has a [`NodeKey`] that survives unrelated mutations:
//! inserting ten rows above a node shifts its row number but not its key.
//! `None` in a parent position means the invisible model root.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of one node in the source hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub u64);

impl NodeKey {
    /// Get the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read access to a hierarchical data source.
///
/// Implementations must return keys that stay valid across structural
/// mutations for as long as the node exists.
pub trait TreeModel {
    /// Number of rows under `parent` (`None` = model root).
    fn row_count(&self, parent: Option<NodeKey>) -> usize;

    /// Number of columns under `parent`.
    fn column_count(&self, _parent: Option<NodeKey>) -> usize {
        1
    }

    /// Key of the node at `row`/`column` under `parent`, if it exists.
    fn index(&self, parent: Option<NodeKey>, row: usize, column: usize) -> Option<NodeKey>;

    /// Whether the node declares child rows.
    fn has_children(&self, key: NodeKey) -> bool {
        self.row_count(Some(key)) > 0
    }
}

/// Structural notification emitted by a source model.
///
/// Row ranges are inclusive (`first..=last`). `RowsAboutToBeRemoved` and
/// `RowsAboutToBeMoved` are delivered while the model still holds the old
/// layout; `RowsInserted` and `RowsMoved` after the model has changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModelEvent {
    RowsInserted {
        parent: Option<NodeKey>,
        first: usize,
        last: usize,
    },
    RowsAboutToBeRemoved {
        parent: Option<NodeKey>,
        first: usize,
        last: usize,
    },
    RowsAboutToBeMoved {
        source_parent: Option<NodeKey>,
        first: usize,
        last: usize,
        dest_parent: Option<NodeKey>,
        dest_row: usize,
    },
    RowsMoved {
        source_parent: Option<NodeKey>,
        first: usize,
        last: usize,
        dest_parent: Option<NodeKey>,
        dest_row: usize,
    },
    LayoutChanged,
    Reset,
}

impl ModelEvent {
    /// Short event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RowsInserted { .. } => "rows_inserted",
            Self::RowsAboutToBeRemoved { .. } => "rows_about_to_be_removed",
            Self::RowsAboutToBeMoved { .. } => "rows_about_to_be_moved",
            Self::RowsMoved { .. } => "rows_moved",
            Self::LayoutChanged => "layout_changed",
            Self::Reset => "reset",
        }
    }
}

/// Final first row of a moved block, in post-move coordinates.
///
/// `dest_row` is expressed before the move; when rows travel downward
/// inside one parent the block's own rows vanish above the destination.
#[must_use]
pub fn moved_block_start(
    source_parent: Option<NodeKey>,
    first: usize,
    last: usize,
    dest_parent: Option<NodeKey>,
    dest_row: usize,
) -> usize {
    let count = last - first + 1;
    if source_parent == dest_parent && dest_row > last {
        dest_row - count
    } else {
        dest_row
    }
}
