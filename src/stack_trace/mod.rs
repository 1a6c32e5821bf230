//! Stack trace mapping for compiled suites.
//!
//! Each compiled suite may carry a source map. A [`StackTraceMapper`] built
//! from it rewrites browser stack frames to the original sources, and
//! [`StackTraceMaps`] keeps one mapper per suite path for the session.

// ============================================================================
// Submodules
// ============================================================================

/// Stack frame parsing.
pub mod frame;

/// Frame rewriting and the per-suite cache.
pub mod mapper;

/// Source map decoding.
pub mod source_map;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::Frame;
pub use mapper::{MapperContext, StackTraceMapper, StackTraceMaps};
pub use source_map::SourceMap;
