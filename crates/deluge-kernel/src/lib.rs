//! # Deluge Kernel
//!
//! Grid-based shallow-water simulation core.
//!
//! This crate provides:
//! - The four-channel scalar codec every field is stored in
//! - Grid geometry and geographic cell lookup
//! - Source, sink, seawall and rainfall injection
//! - A CPU reference solver and a wgpu compute solver behind one trait
//! - Readback, volume accounting and frame playback
//!
//! ## Tick structure
//!
//! Each tick runs three passes over the N×N grid:
//! 1. **Flux**: apply sources, sinks and evaporation, then compute the four
//!    outgoing pipe flows of each cell from surface height differences,
//!    scaled so a cell never sends more water than it holds
//! 2. **Transport**: move water along the pipes and derive a velocity field
//! 3. **Height resolve**: clamp heights into range and write the outputs
//!
//! Water and flux are double-buffered; a tick reads the front slot, writes
//! the back slot and swaps.
//!
//! ## Validation
//!
//! Pass targets are checked before every pass. A failed check is logged and
//! the tick keeps the previous state instead of aborting the run.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod compute;
pub mod field;
pub mod gpu;
pub mod grid;
pub mod injection;
pub mod mass;
pub mod params;
pub mod playback;
pub mod readback;
pub mod solver;
pub mod validation;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::field::*;
    pub use crate::gpu::{GpuContext, GpuSolver};
    pub use crate::grid::*;
    pub use crate::injection::*;
    pub use crate::mass::*;
    pub use crate::params::*;
    pub use crate::playback::*;
    pub use crate::readback::ReadbackMode;
    pub use crate::solver::CpuSolver;
}
