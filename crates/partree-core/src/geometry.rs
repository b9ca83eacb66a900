#![forbid(unsafe_code)]

//! Geometric primitives in content coordinates.
//!
//! Content coordinates are unbounded by the viewport: a hierarchy of a
//! million rows lays out far past `u16`, so every axis is `u32` and edge
//! arithmetic saturates instead of wrapping.

use serde::{Deserialize, Serialize};

/// A point in content coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    /// Create a new point.
    #[inline]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A width/height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned rectangle in content coordinates.
///
/// Origin at top-left; `bottom()` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge (inclusive).
    pub x: u32,
    /// Top edge (inclusive).
    pub y: u32,
    /// Width in content units.
    pub width: u32,
    /// Height in content units.
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from an origin and a size.
    #[inline]
    pub const fn from_parts(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    /// Top edge (inclusive). Alias for `self.y`.
    #[inline]
    pub const fn top(&self) -> u32 {
        self.y
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// True when the vertical spans `[top, bottom)` overlap.
    ///
    /// Rows in a vertical list are tested on the scroll axis only, so a
    /// zero-width row still counts as intersecting a viewport it spans.
    #[inline]
    pub const fn intersects_vertically(&self, other: &Rect) -> bool {
        self.y < other.bottom() && other.y < self.bottom()
    }

    /// Grow the rectangle vertically by `above` and `below`, clamped at 0.
    #[must_use]
    pub const fn expand_vertically(&self, above: u32, below: u32) -> Rect {
        let y = self.y.saturating_sub(above);
        let bottom = self.bottom().saturating_add(below);
        Rect::new(self.x, y, self.width, bottom - y)
    }
}
