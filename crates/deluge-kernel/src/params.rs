//! Physical and visual parameters of a run.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Physical constants for the pipe-model solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Gravitational acceleration (m/s²)
    pub gravity: f32,
    /// Water density (kg/m³)
    pub water_density: f32,
    /// Base integration step (s); the solver uses `time_step / √cell_size`
    pub time_step: f32,
    /// Cell edge length (m)
    pub cell_size: f32,
    /// Per-tick damping applied to flux and velocity, in `(0, 1]`
    pub cushion_factor: f32,
    /// Fraction of water removed per tick, in `[0, 1]`
    pub evaporation_rate: f32,
    /// Water and terrain height range (m)
    pub max_height: f32,
    /// Pipe flow range (m³/s)
    pub max_flux: f32,
    /// Treat the grid edge as a solid wall
    pub simulation_confine: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            gravity: 9.806_65,
            water_density: 998.0,
            time_step: 0.1,
            cell_size: 1.0,
            cushion_factor: 0.998,
            evaporation_rate: 0.0001,
            max_height: 10_000.0,
            max_flux: 10_000.0,
            simulation_confine: false,
        }
    }
}

impl SimulationParams {
    /// Integration step actually used per tick.
    #[must_use]
    pub fn effective_time_step(&self) -> f32 {
        self.time_step / self.cell_size.sqrt()
    }

    /// Area of one cell (m²).
    #[must_use]
    pub fn cell_area(&self) -> f32 {
        self.cell_size * self.cell_size
    }

    /// Clamps every parameter into its usable range.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        let positive = |v: f32, fallback: f32| if v.is_finite() && v > 0.0 { v } else { fallback };
        self.gravity = positive(self.gravity, defaults.gravity);
        self.water_density = positive(self.water_density, defaults.water_density);
        self.time_step = positive(self.time_step, defaults.time_step);
        self.cell_size = self.cell_size.max(1.0);
        self.cushion_factor = if self.cushion_factor.is_finite() {
            self.cushion_factor.clamp(f32::EPSILON, 1.0)
        } else {
            defaults.cushion_factor
        };
        self.evaporation_rate = if self.evaporation_rate.is_finite() {
            self.evaporation_rate.clamp(0.0, 1.0)
        } else {
            defaults.evaporation_rate
        };
        self.max_height = positive(self.max_height, defaults.max_height);
        self.max_flux = positive(self.max_flux, defaults.max_flux);
        self
    }
}

/// Presentation settings; never affect the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualParams {
    /// Linear RGBA water tint
    pub water_color: [f32; 4],
    /// Output brightness multiplier
    pub brightness: f32,
}

impl Default for VisualParams {
    fn default() -> Self {
        Self {
            water_color: [0.1, 0.35, 0.8, 0.85],
            brightness: 1.0,
        }
    }
}

/// Uniform block shared by the WGSL passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSimParams {
    /// Cells per edge
    pub grid_size: u32,
    /// Non-zero when the edge is a wall
    pub confine: u32,
    /// Padding to 16 bytes
    pub _pad: [u32; 2],
    /// Gravitational acceleration
    pub gravity: f32,
    /// Water density
    pub density: f32,
    /// Effective time step
    pub dt: f32,
    /// Cell edge length
    pub cell_size: f32,
    /// Flux and velocity damping
    pub cushion: f32,
    /// Evaporation fraction per tick
    pub evaporation: f32,
    /// Height range
    pub max_height: f32,
    /// Flux range
    pub max_flux: f32,
}

impl GpuSimParams {
    /// Packs parameters for upload.
    #[must_use]
    pub fn new(grid_size: u32, params: &SimulationParams) -> Self {
        Self {
            grid_size,
            confine: u32::from(params.simulation_confine),
            _pad: [0; 2],
            gravity: params.gravity,
            density: params.water_density,
            dt: params.effective_time_step(),
            cell_size: params.cell_size,
            cushion: params.cushion_factor,
            evaporation: params.evaporation_rate,
            max_height: params.max_height,
            max_flux: params.max_flux,
        }
    }
}
