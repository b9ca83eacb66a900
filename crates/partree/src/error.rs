//! Error types for tree mutation and notification handling.
//!
//! Every error here describes a broken contract upstream: a notification
//! sequence the source model should never have produced, or a caller that
//! mutated the tree out of order. None of them are retried.

use std::fmt;

use partree_core::model::NodeKey;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Structural precondition failure on a [`PartialTree`](crate::tree::PartialTree) entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The id refers to a freed or never-allocated slot.
    StaleNode { node: NodeId },
    /// The root sentinel cannot be inserted, removed, or repositioned.
    RootMutation,
    /// Insertion of a node that already has a parent.
    AlreadyAttached { node: NodeId },
    /// Operation requires an attached node.
    NotAttached { node: NodeId },
    /// The reference sibling does not belong to the given parent.
    SiblingMismatch { sibling: NodeId, parent: NodeId },
    /// A node with the same stable identity is already tracked.
    DuplicateKey { key: NodeKey, parent: NodeId },
    /// Leaf removal requested for a node that still has children.
    HasChildren { node: NodeId },
    /// Move resolution requested for a node without a pending move.
    NotInTransition { node: NodeId },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleNode { node } => write!(f, "node {node} is not allocated"),
            Self::RootMutation => write!(f, "the root sentinel cannot be mutated"),
            Self::AlreadyAttached { node } => write!(f, "node {node} already has a parent"),
            Self::NotAttached { node } => write!(f, "node {node} is not attached to the tree"),
            Self::SiblingMismatch { sibling, parent } => {
                write!(f, "sibling {sibling} is not a child of {parent}")
            }
            Self::DuplicateKey { key, parent } => {
                write!(f, "key {key} is already tracked (inserting under {parent})")
            }
            Self::HasChildren { node } => {
                write!(f, "node {node} still has children and cannot be removed as a leaf")
            }
            Self::NotInTransition { node } => write!(f, "node {node} has no pending move"),
        }
    }
}

impl std::error::Error for TreeError {}

/// Stable code for invariant findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantCode {
    /// `first_child` and `last_child` disagree on emptiness.
    EndpointMismatch,
    /// First child has a previous sibling or last child has a next one.
    DanglingEndpoint,
    /// Forward and backward sibling walks disagree.
    SiblingChain,
    /// Sibling walk length differs from the identity mapping size.
    ChildCount,
    /// A child does not point back at its parent.
    ParentLink,
    /// Identity mapping entry missing or pointing elsewhere.
    IdentityMapping,
    /// Settled sibling rows are not consecutive.
    RowSequence,
    /// `down()` does not produce the depth-first pre-order.
    FlattenedOrder,
    /// `up()` is not the inverse of `down()`.
    FlattenedInverse,
    /// A tracked node outside the loaded region is not one of its anchors.
    RegionContiguity,
    /// Edge windows are not nested visible ⊆ buffer ⊆ loaded.
    EdgeContainment,
}

/// One invariant finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub code: InvariantCode,
    #[serde(skip)]
    pub node: Option<NodeId>,
    pub message: String,
}

impl InvariantViolation {
    pub(crate) fn new(code: InvariantCode, node: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            code,
            node,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{:?} at {node}: {}", self.code, self.message),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Failure while applying a model notification or viewport update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectorError {
    Tree(TreeError),
    Invariant(InvariantViolation),
    /// Row range with `first > last`.
    InvalidRange { first: usize, last: usize },
    /// A move confirmation that does not match the announced move.
    MoveMismatch {
        announced: (Option<NodeKey>, usize, usize),
        confirmed: (Option<NodeKey>, usize, usize),
    },
    /// The model reported rows it cannot index.
    MissingRow { parent: Option<NodeKey>, row: usize },
}

impl fmt::Display for ReflectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree(err) => write!(f, "tree mutation failed: {err}"),
            Self::Invariant(violation) => write!(f, "invariant violated: {violation}"),
            Self::InvalidRange { first, last } => {
                write!(f, "invalid row range {first}..={last}")
            }
            Self::MoveMismatch {
                announced,
                confirmed,
            } => write!(
                f,
                "move confirmation {confirmed:?} does not match announced move {announced:?}"
            ),
            Self::MissingRow { parent, row } => {
                write!(f, "model has no row {row} under {parent:?}")
            }
        }
    }
}

impl std::error::Error for ReflectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(err) => Some(err),
            Self::Invariant(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<TreeError> for ReflectorError {
    fn from(err: TreeError) -> Self {
        Self::Tree(err)
    }
}

impl From<InvariantViolation> for ReflectorError {
    fn from(violation: InvariantViolation) -> Self {
        Self::Invariant(violation)
    }
}
