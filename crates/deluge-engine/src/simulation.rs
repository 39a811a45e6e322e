//! The running simulation.
//!
//! [`FluidSimulation`] owns one run: grid, parameters, user edits, terrain
//! and a solver backend, all behind a single mutex so an edit is never
//! applied while a tick is in progress. A [`TickTimer`] drives the ticks.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use deluge_common::{CellIndex, DelugeResult, Extent, GeoPoint};
use deluge_kernel::backend::SimulationBackend;
use deluge_kernel::field::ScalarField;
use deluge_kernel::gpu::{GpuContext, GpuSolver};
use deluge_kernel::grid::SimulationGrid;
use deluge_kernel::injection::{MaskSet, Rainfall, SourceKind, SourceSet};
use deluge_kernel::mass::{MassAccountant, SimulationInfo};
use deluge_kernel::params::{SimulationParams, VisualParams};
use deluge_kernel::playback::{frame_len, FrameWriter};
use deluge_kernel::solver::CpuSolver;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{BackendKind, SimulationConfig};
use crate::output::{FrameBroadcaster, FrameOutput};
use crate::terrain::{build_terrain_field, TerrainSource};
use crate::timing::{TickMetrics, TickTimer};

/// State of one run. Everything a tick touches lives here.
struct SimulationCore {
    config: SimulationConfig,
    grid: SimulationGrid,
    params: SimulationParams,
    visual: VisualParams,
    sources: SourceSet,
    masks: MaskSet,
    rain: Rainfall,
    terrain: ScalarField,
    terrain_pending: bool,
    backend: Option<Box<dyn SimulationBackend>>,
    accountant: MassAccountant,
    info: SimulationInfo,
    output: FrameBroadcaster,
    recorder: Option<FrameWriter>,
    ticks: u64,
}

impl SimulationCore {
    fn build(
        mut config: SimulationConfig,
        terrain: &dyn TerrainSource,
        backend: Option<Box<dyn SimulationBackend>>,
    ) -> DelugeResult<Self> {
        config.validate();
        let grid = config.grid();
        let params = config.to_params();
        let size = grid.size();

        let recorder = match &config.record_dir {
            Some(dir) => Some(FrameWriter::create(dir, size)?),
            None => None,
        };

        let terrain = build_terrain_field(&grid, terrain, params.max_height);
        let blank = vec![0; frame_len(size)];
        let info = SimulationInfo {
            degraded: backend.is_none(),
            water: blank.clone(),
            flux: blank,
            ..Default::default()
        };

        info!(
            "Simulation grid {size}x{size}, cell {} m, centered at ({}, {}), backend {}",
            grid.cell_size(),
            config.center_lon,
            config.center_lat,
            backend.as_ref().map_or("none", |b| b.name())
        );

        Ok(Self {
            grid,
            params,
            visual: config.visual(),
            sources: config.source_set(),
            masks: MaskSet::new(size, params.max_height),
            rain: config.rainfall(),
            terrain,
            terrain_pending: true,
            backend,
            accountant: MassAccountant::new(
                params.max_height,
                params.cell_size,
                config.zero_mass_warning_ticks,
            ),
            info,
            output: FrameBroadcaster::new(config.frame_channel_capacity),
            recorder,
            ticks: 0,
            config,
        })
    }

    fn tick(&mut self) {
        self.ticks += 1;
        let raining = self.rain.is_active(self.grid.size());
        let expects_water = self.sources.has_inflow() || raining;

        let Some(backend) = self.backend.as_mut() else {
            // Degraded: blank output, zero mass.
            self.info.tick = self.ticks;
            let report = self.accountant.record(self.ticks, &self.info.water, expects_water);
            self.info.total_water = report.total_water();
            self.info.volume = report.volume;
            self.info.wet_cells = report.wet_cells;
            self.publish();
            return;
        };

        if self.terrain_pending {
            backend.write_terrain(&self.terrain);
            self.terrain_pending = false;
        }

        if self.sources.take_dirty() || raining {
            self.masks.rebuild(&self.grid, &self.sources);
            if raining {
                self.rain.apply(&mut self.masks.source);
            }
            backend.write_masks(&self.masks);
        }

        let Some(output) = backend.step(&self.params) else {
            debug!(
                "Tick {} produced no frame ({} failed target checks so far)",
                self.ticks,
                backend.check_failures()
            );
            return;
        };

        let report = self
            .accountant
            .record(output.tick, output.water.as_bytes(), expects_water);
        self.info = SimulationInfo {
            tick: output.tick,
            total_water: report.total_water(),
            volume: report.volume,
            wet_cells: report.wet_cells,
            degraded: false,
            water: output.water.into_bytes(),
            flux: output.flux.into_bytes(),
        };
        self.record();
        self.publish();
    }

    fn record(&mut self) {
        let Some(writer) = self.recorder.as_mut() else {
            return;
        };
        if let Err(e) = writer.write(&self.info.water) {
            warn!("Frame recording stopped: {e}");
            self.recorder = None;
        }
    }

    fn publish(&mut self) {
        if !self.output.has_subscribers() {
            return;
        }
        let frame = FrameOutput {
            tick: self.info.tick,
            water: Arc::new(self.info.water.clone()),
            flux: Arc::new(self.info.flux.clone()),
            total_water: self.info.total_water,
        };
        self.output.publish(&frame);
    }

    fn add_position(&mut self, kind: SourceKind, lon: f64, lat: f64) -> Option<GeoPoint> {
        let Some(cell) = self.grid.find_cell_from_degree(lon, lat) else {
            debug!("{} at ({lon}, {lat}) is outside the grid", kind.label());
            return None;
        };
        self.sources.add(kind, cell);
        self.grid.cell_center_position(cell)
    }
}

/// Creates the backend a configuration asks for.
///
/// A GPU that cannot be initialised is logged and yields `None`; the run
/// then continues degraded.
async fn create_backend(config: &SimulationConfig) -> Option<Box<dyn SimulationBackend>> {
    let size = config.grid().size();
    let params = config.to_params();
    match config.backend {
        BackendKind::Cpu => Some(Box::new(CpuSolver::new(size, &params))),
        BackendKind::Gpu => match GpuContext::new().await {
            Ok(context) => Some(Box::new(GpuSolver::new(
                context,
                size,
                &params,
                config.readback,
            ))),
            Err(e) => {
                error!("GPU initialisation failed, running without a solver: {e}");
                None
            },
        },
    }
}

/// A shallow-water simulation run.
pub struct FluidSimulation {
    core: Arc<Mutex<SimulationCore>>,
    timer: TickTimer,
}

impl FluidSimulation {
    /// Builds a run with the backend the configuration names and renders its first frame.
    pub async fn init(config: SimulationConfig, terrain: &dyn TerrainSource) -> DelugeResult<Self> {
        let backend = create_backend(&config).await;
        Self::with_backend(config, terrain, backend)
    }

    /// Builds a run on an explicit backend (`None` runs degraded) and renders its first frame.
    pub fn with_backend(
        config: SimulationConfig,
        terrain: &dyn TerrainSource,
        backend: Option<Box<dyn SimulationBackend>>,
    ) -> DelugeResult<Self> {
        let timer = TickTimer::new(config.interval());
        let mut core = SimulationCore::build(config, terrain, backend)?;
        core.tick();
        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            timer,
        })
    }

    /// Tears the run down and starts a new one.
    ///
    /// Stops the timer, drops every source, rebuilds the grid, terrain and
    /// backend, and renders one frame. Subscriptions carry over. The timer
    /// is left stopped.
    pub async fn init_base(
        &mut self,
        config: SimulationConfig,
        terrain: &dyn TerrainSource,
    ) -> DelugeResult<()> {
        self.timer.stop();
        let backend = create_backend(&config).await;
        let interval = config.interval();
        let mut core = SimulationCore::build(config, terrain, backend)?;

        let mut current = self.core.lock();
        core.output.adopt(&mut current.output);
        core.tick();
        *current = core;
        drop(current);

        self.timer = TickTimer::new(interval);
        info!("Simulation re-initialised");
        Ok(())
    }

    /// Starts ticking every configured interval. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        let core = Arc::clone(&self.core);
        self.timer.start(move || {
            core.lock().tick();
            true
        });
        info!("Simulation started ({:?} per tick)", self.timer.period());
    }

    /// Stops ticking. A tick in progress completes.
    pub fn stop(&mut self) {
        if self.timer.is_running() {
            info!("Simulation stopped");
        }
        self.timer.stop();
    }

    /// Whether the timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Runs one tick on the calling thread and returns the tick of the latest frame.
    pub fn tick_once(&self) -> u64 {
        let mut core = self.core.lock();
        core.tick();
        core.info.tick
    }

    /// Adds a water source at the cell containing `(lon, lat)`.
    ///
    /// Returns the center of that cell, or `None` when the point is outside the grid.
    pub fn add_water_source_position(&self, lon: f64, lat: f64) -> Option<GeoPoint> {
        self.core.lock().add_position(SourceKind::Source, lon, lat)
    }

    /// Adds a sink at the cell containing `(lon, lat)`.
    pub fn add_water_minus_source_position(&self, lon: f64, lat: f64) -> Option<GeoPoint> {
        self.core.lock().add_position(SourceKind::MinusSource, lon, lat)
    }

    /// Adds a seawall at the cell containing `(lon, lat)`.
    pub fn add_sea_wall_position(&self, lon: f64, lat: f64) -> Option<GeoPoint> {
        self.core.lock().add_position(SourceKind::Seawall, lon, lat)
    }

    /// Places every source listed in the configuration; returns how many landed on the grid.
    pub fn add_configured_sources(&self) -> usize {
        let mut core = self.core.lock();
        let sources = core.config.sources.clone();
        sources
            .iter()
            .filter(|s| core.add_position(s.kind, s.lon, s.lat).is_some())
            .count()
    }

    /// Removes every water source.
    pub fn clear_water_source_positions(&self) {
        self.core.lock().sources.clear(SourceKind::Source);
    }

    /// Removes every sink.
    pub fn clear_water_minus_source_positions(&self) {
        self.core.lock().sources.clear(SourceKind::MinusSource);
    }

    /// Removes every seawall.
    pub fn clear_sea_wall_positions(&self) {
        self.core.lock().sources.clear(SourceKind::Seawall);
    }

    /// Removes every edit.
    pub fn clear_all_sources(&self) {
        self.core.lock().sources.clear_all();
    }

    /// State after the latest frame.
    #[must_use]
    pub fn info(&self) -> SimulationInfo {
        self.core.lock().info.clone()
    }

    /// Total water of the latest frame, rounded to whole m³.
    #[must_use]
    pub fn total_water(&self) -> u64 {
        self.core.lock().info.total_water
    }

    /// Receives every subsequent frame. Slow receivers miss frames.
    pub fn subscribe(&self) -> Receiver<FrameOutput> {
        self.core.lock().output.subscribe()
    }

    /// Cell containing `(lon, lat)`.
    #[must_use]
    pub fn find_cell_from_degree(&self, lon: f64, lat: f64) -> Option<CellIndex> {
        self.core.lock().grid.find_cell_from_degree(lon, lat)
    }

    /// Geographic center of a cell.
    #[must_use]
    pub fn cell_center_position(&self, cell: CellIndex) -> Option<GeoPoint> {
        self.core.lock().grid.cell_center_position(cell)
    }

    /// Geographic extent of the current grid.
    #[must_use]
    pub fn extent(&self) -> Extent {
        self.core.lock().grid.extent()
    }

    /// Geographic extent a configuration would cover, without building a run.
    #[must_use]
    pub fn calc_extent(config: &SimulationConfig) -> Extent {
        config.extent()
    }

    /// The current grid.
    #[must_use]
    pub fn grid(&self) -> SimulationGrid {
        self.core.lock().grid.clone()
    }

    /// Terrain field of the run.
    #[must_use]
    pub fn terrain_field(&self) -> ScalarField {
        self.core.lock().terrain.clone()
    }

    /// Physics parameters of the run.
    #[must_use]
    pub fn params(&self) -> SimulationParams {
        self.core.lock().params
    }

    /// Name of the active backend, or `None` when degraded.
    #[must_use]
    pub fn backend_name(&self) -> Option<&'static str> {
        self.core.lock().backend.as_ref().map(|b| b.name())
    }

    /// Sets the water tint. Presentation only.
    pub fn set_water_color(&self, color: [f32; 4]) {
        self.core.lock().visual.water_color = color.map(|c| c.clamp(0.0, 1.0));
    }

    /// Sets the brightness multiplier. Presentation only.
    pub fn set_brightness(&self, brightness: f32) {
        self.core.lock().visual.brightness = brightness.max(0.0);
    }

    /// Presentation settings.
    #[must_use]
    pub fn visual(&self) -> VisualParams {
        self.core.lock().visual
    }

    /// Tick duration statistics of the timer.
    #[must_use]
    pub fn metrics(&self) -> TickMetrics {
        self.timer.metrics()
    }
}
