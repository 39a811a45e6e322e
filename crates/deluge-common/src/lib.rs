//! # Deluge Common
//!
//! Common types and utilities shared by the Deluge crates.
//!
//! This crate provides:
//! - Geodesy: WGS84 ellipsoid, geographic points, east-north-up tangent frames
//!   and geographic extents
//! - Cell identifiers (`CellIndex`, `GridCoord`)
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod geo;
pub mod ids;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::geo::*;
    pub use crate::ids::*;
}

pub use prelude::*;
