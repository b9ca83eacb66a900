//! Per-node geometry cache.
//!
//! Size and origin are cached independently. The size comes from the
//! geometry adapter and carries the validity flag; the origin is derived by
//! the reflector's layout pass from the node's flattened predecessor.

use partree_core::geometry::{Point, Rect, Size};

/// Cached `{position, size, validity}` triple.
///
/// Invalidation keeps the last known values so a view can still place a
/// stale item until the next layout pass replaces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryCache {
    size: Option<Size>,
    origin: Option<Point>,
    valid: bool,
}

impl GeometryCache {
    /// Last known size (`None` = the adapter has not answered yet).
    #[must_use]
    pub const fn size(&self) -> Option<Size> {
        self.size
    }

    /// Last laid-out origin.
    #[must_use]
    pub const fn origin(&self) -> Option<Point> {
        self.origin
    }

    /// Whether the cached size reflects the current adapter state.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Full rectangle, when both origin and size are known.
    #[must_use]
    pub fn rect(&self) -> Option<Rect> {
        Some(Rect::from_parts(self.origin?, self.size?))
    }

    /// Height used for flow layout; unknown sizes occupy no space.
    #[must_use]
    pub fn extent(&self) -> u32 {
        self.size.map_or(0, |size| size.height)
    }

    /// Bottom edge in flow layout, when positioned.
    #[must_use]
    pub fn bottom(&self) -> Option<u32> {
        self.origin.map(|origin| origin.y.saturating_add(self.extent()))
    }

    /// Store an adapter answer. Returns true if the size changed.
    pub(crate) fn store_size(&mut self, size: Option<Size>) -> bool {
        let changed = self.size != size;
        self.size = size;
        self.valid = size.is_some();
        changed
    }

    /// Returns true if the origin changed.
    pub(crate) fn set_origin(&mut self, origin: Point) -> bool {
        let changed = self.origin != Some(origin);
        self.origin = Some(origin);
        changed
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }
}
