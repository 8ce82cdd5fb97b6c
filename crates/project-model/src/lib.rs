//! Storyreel Project Model
//!
//! Defines the data contracts shared by the export pipeline:
//! - **Scene:** one timed unit of narrated visual content, plus the manifest
//!   that orders scenes for export
//! - **Format:** output aspect presets and the resolution each maps to
//! - **State:** the export status machine published to callers
//! - **Geometry:** aspect-preserving placement and fill colors
//!
//! Scene order is significant: timestamps are cumulative, so the list is
//! never reordered once an export starts.

pub mod format;
pub mod geometry;
pub mod scene;
pub mod state;

pub use format::*;
pub use geometry::*;
pub use scene::*;
pub use state::*;
