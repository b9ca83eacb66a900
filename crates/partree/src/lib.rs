#![forbid(unsafe_code)]

//! Partial-tree reflector for virtualized hierarchical views.
//!
//! A [`Reflector`] tracks only the slice of a large hierarchical model that
//! a scrollable view needs, and keeps that slice consistent while the model
//! mutates and the viewport moves:
//!
//! - [`PartialTree`] - arena tree of tracked nodes, navigable as a tree and
//!   as a flattened pre-order sequence
//! - [`EdgeTracker`] - loaded, buffer and visible windows over that sequence
//! - [`GeometryAdapter`] - pluggable sizing with [`Capabilities`] flags
//! - [`ViewDelegate`] - creates and releases the visual items
//! - [`MemoryModel`] - in-memory reference model emitting notifications
//!
//! ```ignore
//! use partree::{MemoryModel, Reflector, ReflectorConfig, UniformSize};
//! use partree_core::geometry::Rect;
//!
//! let model = MemoryModel::balanced(&[1_000, 10]);
//! let mut reflector = Reflector::headless(UniformSize::new(40, 1), ReflectorConfig::default());
//! reflector.set_viewport(&model, Rect::new(0, 0, 40, 20))?;
//! assert!(reflector.tree().len() < 200);
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod delegate;
pub mod edges;
pub mod error;
pub mod memory_model;
pub mod node;
pub mod reflector;
pub mod tree;

pub use adapter::{Capabilities, GeometryAdapter, NodeInfo, SizeFn, UniformSize};
pub use cache::GeometryCache;
pub use config::ReflectorConfig;
pub use delegate::{NodeView, ViewDelegate};
pub use edges::{Edge, EdgeKind, EdgeTracker};
pub use error::{InvariantCode, InvariantViolation, ReflectorError, TreeError};
pub use memory_model::MemoryModel;
pub use node::{NodeId, NodePosition, NodeState, PendingMove, TreeNode};
pub use reflector::{Reflector, ReflectorStats, ScrollDirection};
pub use tree::{PartialTree, SnapshotEntry, TreeSnapshot};

pub use partree_core::geometry::{Point, Rect, Size};
pub use partree_core::model::{ModelEvent, NodeKey, TreeModel};
