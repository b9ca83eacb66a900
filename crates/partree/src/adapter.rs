//! Geometry adapters: pluggable answers to "how large is this node".
//!
//! The reflector never decides sizing policy. It asks the active
//! [`GeometryAdapter`] and shapes its caching around the advertised
//! [`Capabilities`]:
//!
//! | Capability | Effect on the reflector |
//! |------------|-------------------------|
//! | `UNIFORM_SIZE` | viewport jumps map an offset straight to a flattened row |
//! | `AHEAD_OF_TIME` | sizes are computed on insertion, not on first layout |
//! | `SINGLE_INSTANCE` | the adapter holds per-view state and must not be shared |
//! | `ORDER_DEPENDENT` | sibling mutations and moves invalidate cached sizes |
//! | `PROVIDES_POSITION` | `position_hint` may override the flow origin |

use bitflags::bitflags;
use partree_core::geometry::{Point, Size};
use partree_core::model::{NodeKey, TreeModel};

bitflags! {
    /// What a geometry adapter can provide, and when.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// All nodes share one size.
        const UNIFORM_SIZE      = 0b0000_0001;
        /// Sizes can be computed eagerly at insertion time.
        const AHEAD_OF_TIME     = 0b0000_0010;
        /// The adapter keeps per-view state.
        const SINGLE_INSTANCE   = 0b0000_0100;
        /// A node's size depends on its position among siblings.
        const ORDER_DEPENDENT   = 0b0000_1000;
        /// `position_hint` answers for this adapter.
        const PROVIDES_POSITION = 0b0001_0000;
    }
}

/// What an adapter sees of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub key: NodeKey,
    /// Effective row (pending destination during a move).
    pub row: usize,
    pub column: usize,
    /// Distance from the top level (top-level rows are depth 0).
    pub depth: usize,
}

/// Strategy object answering size/position queries.
pub trait GeometryAdapter {
    /// Capability flags; must not change over the adapter's lifetime.
    fn capabilities(&self) -> Capabilities;

    /// Size of `node`, or `None` while unknown.
    ///
    /// An unknown node is laid out with zero extent and stays
    /// unmaterialized until a later pass gets an answer.
    fn size_hint(&mut self, model: &dyn TreeModel, node: &NodeInfo) -> Option<Size>;

    /// Override the flow origin computed by the reflector.
    ///
    /// Only consulted when [`Capabilities::PROVIDES_POSITION`] is advertised.
    fn position_hint(
        &mut self,
        _model: &dyn TreeModel,
        _node: &NodeInfo,
        _flow: Point,
    ) -> Option<Point> {
        None
    }
}

/// Every node has the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSize {
    size: Size,
}

impl UniformSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            size: Size::new(width, height),
        }
    }
}

impl Default for UniformSize {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl GeometryAdapter for UniformSize {
    fn capabilities(&self) -> Capabilities {
        Capabilities::UNIFORM_SIZE | Capabilities::AHEAD_OF_TIME
    }

    fn size_hint(&mut self, _model: &dyn TreeModel, _node: &NodeInfo) -> Option<Size> {
        Some(self.size)
    }
}

/// Sizes computed by a closure over the model (proxy-computed geometry).
pub struct SizeFn<F> {
    compute: F,
    capabilities: Capabilities,
}

impl<F> SizeFn<F>
where
    F: FnMut(&dyn TreeModel, &NodeInfo) -> Option<Size>,
{
    /// Lazy, order-independent adapter backed by `compute`.
    pub fn new(compute: F) -> Self {
        Self {
            compute,
            capabilities: Capabilities::empty(),
        }
    }

    /// Advertise additional capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl<F> std::fmt::Debug for SizeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeFn")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl<F> GeometryAdapter for SizeFn<F>
where
    F: FnMut(&dyn TreeModel, &NodeInfo) -> Option<Size>,
{
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn size_hint(&mut self, model: &dyn TreeModel, node: &NodeInfo) -> Option<Size> {
        (self.compute)(model, node)
    }
}
