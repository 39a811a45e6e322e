//! Simulation configuration.
//!
//! Every key is optional; missing keys take their defaults. Configuration
//! can be loaded from and saved to a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use deluge_common::Extent;
use deluge_kernel::grid::{self, SimulationGrid, MAX_GRID_SIZE, MIN_CELL_SIZE, MIN_GRID_SIZE};
use deluge_kernel::injection::{Rainfall, SourceKind, SourceSet};
use deluge_kernel::params::{SimulationParams, VisualParams};
use deluge_kernel::readback::ReadbackMode;

use crate::terrain::TerrainConfig;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "deluge.toml";

/// Which solver runs the ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// wgpu compute shaders
    #[default]
    Gpu,
    /// CPU reference solver
    Cpu,
}

/// A source placed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Edit kind
    pub kind: SourceKind,
    /// Longitude (degrees)
    pub lon: f64,
    /// Latitude (degrees)
    pub lat: f64,
}

/// Simulation configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // === Grid ===
    /// Cells per edge
    pub grid_size: u32,
    /// Cell edge length (m)
    pub cell_size: f64,
    /// Grid center longitude (degrees)
    pub center_lon: f64,
    /// Grid center latitude (degrees)
    pub center_lat: f64,

    // === Ranges ===
    /// Water and terrain height range (m)
    pub max_height: f32,
    /// Pipe flow range (m³/s)
    pub max_flux: f32,

    // === Timing ===
    /// Tick period (ms)
    pub interval_ms: f64,

    // === Physics ===
    /// Gravitational acceleration (m/s²)
    pub gravity: f32,
    /// Base integration step (s)
    pub time_step: f32,
    /// Water density (kg/m³)
    pub water_density: f32,
    /// Flux and velocity damping, in `(0, 1]`
    pub cushion_factor: f32,
    /// Fraction of water removed per tick
    pub evaporation_rate: f32,
    /// Treat the grid edge as a wall
    pub simulation_confine: bool,

    // === Rain ===
    /// Percentage of cells receiving a drop each tick
    pub rain_amount: f32,
    /// Upper bound of a drop's rate (m/s); 0 disables rain
    pub rain_max_precipitation: f32,
    /// Seed for reproducible rain (None = random)
    pub rain_seed: Option<u64>,

    // === Sources ===
    /// Inflow rate of a water source (m/s)
    pub water_source_amount: f32,
    /// Outflow rate of a sink (m/s)
    pub water_minus_source_amount: f32,
    /// Seawall height (m)
    pub water_seawall_height: f32,
    /// Square radius of new sources (cells)
    pub water_source_area: u32,
    /// Square radius of new sinks (cells)
    pub water_minus_source_area: u32,
    /// Square radius of new seawalls (cells)
    pub water_seawall_area: u32,

    // === Runtime ===
    /// Solver backend
    pub backend: BackendKind,
    /// GPU readback mode
    pub readback: ReadbackMode,
    /// Dry ticks with active inflow before warning (0 = never)
    pub zero_mass_warning_ticks: u32,
    /// Frames buffered per subscriber before frames are dropped
    pub frame_channel_capacity: usize,

    // === Visual ===
    /// Linear RGBA water tint
    pub water_color: [f32; 4],
    /// Output brightness multiplier
    pub brightness: f32,

    // === Recording and playback ===
    /// Directory receiving one frame file per tick (None = no recording)
    pub record_dir: Option<PathBuf>,
    /// Replay frames from this directory instead of simulating
    pub playback_dir: Option<PathBuf>,
    /// Restart playback after the last frame
    pub playback_loop: bool,
    /// Stop the binary after this many seconds (None = until interrupted)
    pub run_seconds: Option<f64>,

    // === Terrain and startup sources ===
    /// Ground elevation source
    pub terrain: TerrainConfig,
    /// Sources placed when the run starts
    pub sources: Vec<SourceConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let params = SimulationParams::default();
        let visual = VisualParams::default();
        Self {
            // Grid
            grid_size: 512,
            cell_size: 1.0,
            center_lon: 0.0,
            center_lat: 0.0,

            // Ranges
            max_height: params.max_height,
            max_flux: params.max_flux,

            // Timing
            interval_ms: 1000.0 / 60.0,

            // Physics
            gravity: params.gravity,
            time_step: params.time_step,
            water_density: params.water_density,
            cushion_factor: params.cushion_factor,
            evaporation_rate: params.evaporation_rate,
            simulation_confine: false,

            // Rain
            rain_amount: 1.0,
            rain_max_precipitation: 0.0,
            rain_seed: None,

            // Sources
            water_source_amount: 10.0,
            water_minus_source_amount: 10.0,
            water_seawall_height: 10.0,
            water_source_area: 1,
            water_minus_source_area: 1,
            water_seawall_area: 1,

            // Runtime
            backend: BackendKind::Gpu,
            readback: ReadbackMode::Blocking,
            zero_mass_warning_ticks: 120,
            frame_channel_capacity: 4,

            // Visual
            water_color: visual.water_color,
            brightness: visual.brightness,

            // Recording and playback
            record_dir: None,
            playback_dir: None,
            playback_loop: false,
            run_seconds: None,

            terrain: TerrainConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Load configuration from `deluge.toml` in the working directory.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }

                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    },
                    Err(e) => {
                        warn!("Failed to parse config file: {e}");
                        Self::default()
                    },
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to usable ranges.
    pub fn validate(&mut self) {
        if self.grid_size < MIN_GRID_SIZE {
            warn!("grid_size {} clamped to {MIN_GRID_SIZE}", self.grid_size);
            self.grid_size = MIN_GRID_SIZE;
        } else if self.grid_size > MAX_GRID_SIZE {
            warn!("grid_size {} clamped to {MAX_GRID_SIZE}", self.grid_size);
            self.grid_size = MAX_GRID_SIZE;
        }
        if !(self.cell_size.is_finite() && self.cell_size >= MIN_CELL_SIZE) {
            warn!("cell_size {} clamped to {MIN_CELL_SIZE}", self.cell_size);
            self.cell_size = MIN_CELL_SIZE;
        }

        // Physics
        let params = self.to_params();
        self.gravity = params.gravity;
        self.time_step = params.time_step;
        self.water_density = params.water_density;
        self.cushion_factor = params.cushion_factor;
        self.evaporation_rate = params.evaporation_rate;
        self.max_height = params.max_height;
        self.max_flux = params.max_flux;

        // Timing
        if !self.interval_ms.is_finite() {
            self.interval_ms = Self::default().interval_ms;
        }
        self.interval_ms = self.interval_ms.clamp(1.0, 60_000.0);

        // Rain and sources
        self.rain_amount = non_negative(self.rain_amount).min(100.0);
        self.rain_max_precipitation = non_negative(self.rain_max_precipitation);
        self.water_source_amount = non_negative(self.water_source_amount);
        self.water_minus_source_amount = non_negative(self.water_minus_source_amount);
        self.water_seawall_height = non_negative(self.water_seawall_height);

        // Runtime
        self.frame_channel_capacity = self.frame_channel_capacity.clamp(1, 1024);

        // Visual
        for channel in &mut self.water_color {
            *channel = non_negative(*channel).min(1.0);
        }
        self.brightness = non_negative(self.brightness).min(16.0);
    }

    /// Physics parameters of a run, clamped into range.
    #[must_use]
    pub fn to_params(&self) -> SimulationParams {
        SimulationParams {
            gravity: self.gravity,
            water_density: self.water_density,
            time_step: self.time_step,
            cell_size: self.cell_size as f32,
            cushion_factor: self.cushion_factor,
            evaporation_rate: self.evaporation_rate,
            max_height: self.max_height,
            max_flux: self.max_flux,
            simulation_confine: self.simulation_confine,
        }
        .sanitized()
    }

    /// Presentation settings.
    #[must_use]
    pub const fn visual(&self) -> VisualParams {
        VisualParams {
            water_color: self.water_color,
            brightness: self.brightness,
        }
    }

    /// Tick period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_ms.clamp(1.0, 60_000.0) / 1000.0)
    }

    /// Grid of the run.
    #[must_use]
    pub fn grid(&self) -> SimulationGrid {
        SimulationGrid::new(self.center_lon, self.center_lat, self.grid_size, self.cell_size)
    }

    /// Geographic extent of the run's grid.
    #[must_use]
    pub fn extent(&self) -> Extent {
        grid::calc_extent(self.center_lon, self.center_lat, self.grid_size, self.cell_size)
    }

    /// Empty edit lists with the configured magnitudes and radii.
    #[must_use]
    pub const fn source_set(&self) -> SourceSet {
        SourceSet::new(
            (self.water_source_amount, self.water_source_area),
            (self.water_minus_source_amount, self.water_minus_source_area),
            (self.water_seawall_height, self.water_seawall_area),
        )
    }

    /// Rain generator.
    #[must_use]
    pub fn rainfall(&self) -> Rainfall {
        Rainfall::new(self.rain_amount, self.rain_max_precipitation, self.rain_seed)
    }
}

fn non_negative(v: f32) -> f32 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.grid_size, 512);
        assert_eq!(config.cell_size, 1.0);
        assert_eq!(config.max_height, 10_000.0);
        assert_eq!(config.cushion_factor, 0.998);
        assert_eq!(config.backend, BackendKind::Gpu);
        assert_eq!(config.readback, ReadbackMode::Blocking);
        assert!(!config.simulation_confine);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulationConfig {
            grid_size: 2,
            cell_size: 0.25,
            cushion_factor: 3.0,
            evaporation_rate: -1.0,
            interval_ms: 0.0,
            rain_amount: 500.0,
            water_source_amount: f32::NAN,
            frame_channel_capacity: 0,
            ..Default::default()
        };

        config.validate();

        assert_eq!(config.grid_size, 8);
        assert_eq!(config.cell_size, 1.0);
        assert_eq!(config.cushion_factor, 1.0);
        assert_eq!(config.evaporation_rate, 0.0);
        assert_eq!(config.interval_ms, 1.0);
        assert_eq!(config.rain_amount, 100.0);
        assert_eq!(config.water_source_amount, 0.0);
        assert_eq!(config.frame_channel_capacity, 1);
    }

    #[test]
    fn test_oversized_grid_clamped() {
        let mut config = SimulationConfig {
            grid_size: 70_000,
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.grid_size, MAX_GRID_SIZE);
        assert_eq!(config.grid().size(), MAX_GRID_SIZE);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("deluge.toml");

        let config = SimulationConfig {
            grid_size: 64,
            cell_size: 2.5,
            center_lon: 139.75,
            center_lat: 35.5,
            simulation_confine: true,
            rain_seed: Some(12345),
            backend: BackendKind::Cpu,
            readback: ReadbackMode::Pipelined,
            terrain: TerrainConfig::Flat { elevation: 4.0 },
            sources: vec![SourceConfig {
                kind: SourceKind::Seawall,
                lon: 139.75,
                lat: 35.5,
            }],
            ..Default::default()
        };

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = SimulationConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = SimulationConfig::load_from("/nonexistent/path/deluge.toml");
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_config_load_malformed_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "grid_size = \"large\"").expect("write");
        assert_eq!(SimulationConfig::load_from(&path), SimulationConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SimulationConfig = toml::from_str(
            r#"
            grid_size = 128
            backend = "cpu"

            [terrain]
            kind = "flat"
            elevation = 2.0

            [[sources]]
            kind = "minus_source"
            lon = 1.0
            lat = 2.0
            "#,
        )
        .expect("parse");
        assert_eq!(config.grid_size, 128);
        assert_eq!(config.backend, BackendKind::Cpu);
        assert_eq!(config.time_step, 0.1);
        assert_eq!(config.terrain, TerrainConfig::Flat { elevation: 2.0 });
        assert_eq!(config.sources[0].kind, SourceKind::MinusSource);
    }

    #[test]
    fn test_derived_values() {
        let config = SimulationConfig {
            cell_size: 4.0,
            interval_ms: 250.0,
            water_source_amount: 3.0,
            water_source_area: 2,
            ..Default::default()
        };
        assert_eq!(config.to_params().cell_size, 4.0);
        assert_eq!(config.interval(), Duration::from_millis(250));
        let spec = config.source_set();
        assert_eq!(spec.spec(SourceKind::Source).magnitude, 3.0);
        assert_eq!(spec.spec(SourceKind::Source).area, 2);
        assert_eq!(config.grid().size(), 512);
        assert!(config.extent().contains(0.0, 0.0));
    }
}
