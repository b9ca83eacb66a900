#![forbid(unsafe_code)]

//! Core: content-space geometry, the hierarchical source-model contract,
//! and the logging shim shared by the partree crates.

pub mod geometry;
pub mod logging;
pub mod model;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, debug_span, trace, warn};
