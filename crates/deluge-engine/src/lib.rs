//! # Deluge Engine
//!
//! Runtime around the simulation kernel:
//! - [`config`]: TOML configuration with defaults and clamping
//! - [`simulation`]: the [`FluidSimulation`](simulation::FluidSimulation) run
//!   with its edit, query and timer operations
//! - [`playback`]: replaying recorded frames on the same timer
//! - [`terrain`]: flat and heightmap elevation sources
//! - [`output`]: frame fan-out to renderers
//! - [`timing`]: the non-overlapping tick timer

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod output;
pub mod playback;
pub mod simulation;
pub mod terrain;
pub mod timing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{BackendKind, SimulationConfig, SourceConfig, CONFIG_FILE};
    pub use crate::output::FrameOutput;
    pub use crate::playback::PlaybackSession;
    pub use crate::simulation::FluidSimulation;
    pub use crate::terrain::{FlatTerrain, HeightmapTerrain, TerrainConfig, TerrainSource};
    pub use crate::timing::{TickMetrics, TickTimer};
    pub use deluge_kernel::prelude::{ReadbackMode, SimulationInfo, SourceKind};
}
