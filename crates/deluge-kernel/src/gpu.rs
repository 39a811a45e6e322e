//! wgpu backend.

use deluge_common::GpuError;
use tracing::{debug, error, info};
use wgpu::{Device, Queue};

use crate::backend::{PassKind, SimulationBackend, TickOutput};
use crate::buffer::FieldBuffers;
use crate::codec::BYTES_PER_CELL;
use crate::compute::FluidPipelines;
use crate::field::ScalarField;
use crate::injection::MaskSet;
use crate::params::{GpuSimParams, SimulationParams};
use crate::readback::{ReadbackMode, ReadbackRing, ReadbackStats};
use crate::validation::{create_validated_instance, handle_device_error, ValidationHarness};

/// Device and queue used by a GPU run.
pub struct GpuContext {
    /// Logical device
    pub device: Device,
    /// Submission queue
    pub queue: Queue,
    /// Adapter description for logs
    pub adapter_name: String,
}

impl GpuContext {
    /// Requests a high-performance adapter and a device able to bind whole fields.
    pub async fn new() -> Result<Self, GpuError> {
        let instance = create_validated_instance();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        let adapter_name = adapter.get_info().name;
        info!("using GPU adapter: {adapter_name}");

        let supported = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::default()
        };
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deluge Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;
        device.on_uncaptured_error(Box::new(|e| handle_device_error(&e)));

        Ok(Self {
            device,
            queue,
            adapter_name,
        })
    }
}

/// Runs the three passes as WGSL compute shaders.
pub struct GpuSolver {
    context: GpuContext,
    pipelines: FluidPipelines,
    buffers: FieldBuffers,
    readback: ReadbackRing,
    harness: ValidationHarness,
    max_height: f32,
    max_flux: f32,
    tick: u64,
}

impl GpuSolver {
    /// Compiles the passes and allocates fields for an N×N grid.
    pub fn new(
        context: GpuContext,
        grid_size: u32,
        params: &SimulationParams,
        mode: ReadbackMode,
    ) -> Self {
        let pipelines = FluidPipelines::new(&context.device);
        let buffers = FieldBuffers::new(&context.device, &pipelines, grid_size);
        let byte_len = u64::from(grid_size) * u64::from(grid_size) * BYTES_PER_CELL as u64;
        let readback = ReadbackRing::new(&context.device, byte_len, mode);
        info!("GPU solver ready ({grid_size}x{grid_size}, {mode:?} readback)");
        Self {
            context,
            pipelines,
            buffers,
            readback,
            harness: ValidationHarness::new(),
            max_height: params.max_height,
            max_flux: params.max_flux,
            tick: 0,
        }
    }

    /// Readback counters.
    #[must_use]
    pub const fn readback_stats(&self) -> ReadbackStats {
        self.readback.stats()
    }
}

impl SimulationBackend for GpuSolver {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn grid_size(&self) -> u32 {
        self.buffers.grid_size()
    }

    fn write_terrain(&mut self, terrain: &ScalarField) {
        self.buffers.upload_terrain(&self.context.queue, terrain);
    }

    fn write_masks(&mut self, masks: &MaskSet) {
        self.buffers.upload_masks(&self.context.queue, masks);
    }

    fn step(&mut self, params: &SimulationParams) -> Option<TickOutput> {
        let tick = self.tick + 1;
        self.tick = tick;
        self.harness.begin_tick(tick);

        let grid_size = self.buffers.grid_size();
        self.buffers
            .upload_params(&self.context.queue, &GpuSimParams::new(grid_size, params));

        let max_binding = u64::from(self.context.device.limits().max_storage_buffer_binding_size);
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Simulation Tick"),
            });

        let mut completed = true;
        for kind in PassKind::ORDER {
            if !self
                .harness
                .validate_target(self.buffers.check_pass(kind, max_binding))
            {
                completed = false;
                break;
            }
            self.pipelines
                .get(kind)
                .dispatch(&mut encoder, self.buffers.bind_group(kind), grid_size);
        }

        if completed {
            self.readback.record_copy(
                &mut encoder,
                self.buffers.water_output(),
                self.buffers.flux_summary(),
                tick,
            );
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));
        if !completed {
            debug!("tick {tick} kept the previous state");
            return None;
        }
        self.buffers.swap();

        match self.readback.collect(&self.context.device) {
            Ok(Some(frame)) => Some(TickOutput {
                tick: frame.tick,
                water: ScalarField::from_bytes(grid_size, self.max_height, frame.water),
                flux: ScalarField::from_bytes(grid_size, 4.0 * self.max_flux, frame.flux),
            }),
            Ok(None) => None,
            Err(e) => {
                error!("tick {tick} output lost: {e}");
                None
            }
        }
    }

    fn check_failures(&self) -> u64 {
        self.harness.failure_count()
    }

    fn reset(&mut self) {
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Simulation Reset"),
            });
        self.buffers.clear_state(&mut encoder);
        self.context.queue.submit(std::iter::once(encoder.finish()));
        self.readback.clear();
        self.tick = 0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::SimulationGrid;
    use crate::injection::{SourceKind, SourceSet};
    use crate::solver::CpuSolver;

    /// Creates a device on any available adapter, or `None` on machines without one.
    pub(crate) fn create_test_context() -> Option<(Device, Queue)> {
        let instance = create_validated_instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None)).ok()
    }

    pub(crate) fn create_test_device() -> Option<Device> {
        create_test_context().map(|(device, _)| device)
    }

    fn test_solver(size: u32, params: &SimulationParams, mode: ReadbackMode) -> Option<GpuSolver> {
        let (device, queue) = create_test_context()?;
        let context = GpuContext {
            device,
            queue,
            adapter_name: "test".to_string(),
        };
        Some(GpuSolver::new(context, size, params, mode))
    }

    fn params() -> SimulationParams {
        SimulationParams {
            max_height: 100.0,
            max_flux: 1000.0,
            evaporation_rate: 0.0,
            ..Default::default()
        }
    }

    fn source_masks(size: u32) -> MaskSet {
        let grid = SimulationGrid::new(0.0, 0.0, size, 1.0);
        let mut set = SourceSet::new((1.0, 1), (1.0, 1), (1.0, 1));
        set.add(SourceKind::Source, grid.cell_index(size / 2, size / 2));
        let mut masks = MaskSet::new(size, 100.0);
        masks.rebuild(&grid, &set);
        masks
    }

    #[test]
    fn test_gpu_first_tick_matches_cpu() {
        let p = params();
        let Some(mut gpu) = test_solver(16, &p, ReadbackMode::Blocking) else {
            return;
        };
        let mut cpu = CpuSolver::new(16, &p);
        let masks = source_masks(16);
        gpu.write_masks(&masks);
        cpu.write_masks(&masks);

        for _ in 0..5 {
            let (Some(g), Some(c)) = (gpu.step(&p), cpu.step(&p)) else {
                panic!("blocking readback yields every tick");
            };
            assert_eq!(g.tick, c.tick);
            for i in 0..256 {
                assert!(
                    (g.water.get(i) - c.water.get(i)).abs() < 1e-3,
                    "cell {i}: gpu {} cpu {}",
                    g.water.get(i),
                    c.water.get(i)
                );
            }
        }
    }

    #[test]
    fn test_gpu_pipelined_lags() {
        let p = params();
        let Some(mut gpu) = test_solver(16, &p, ReadbackMode::Pipelined) else {
            return;
        };
        assert!(gpu.step(&p).is_none());
        assert_eq!(gpu.step(&p).map(|o| o.tick), Some(1));
    }

    #[test]
    fn test_gpu_incomplete_terrain_skips() {
        let p = params();
        let Some(mut gpu) = test_solver(16, &p, ReadbackMode::Blocking) else {
            return;
        };
        gpu.write_terrain(&ScalarField::new(8, 100.0));
        assert!(gpu.step(&p).is_none());
        assert_eq!(gpu.check_failures(), 1);
        gpu.write_terrain(&ScalarField::new(16, 100.0));
        assert!(gpu.step(&p).is_some());
    }
}
