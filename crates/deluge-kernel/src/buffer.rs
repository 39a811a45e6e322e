//! GPU storage for the simulation fields.
//!
//! Water and flux are double-buffered: each tick reads the front slot and
//! writes the back slot, then the slots swap. Bind groups are created once
//! for both parities so a tick only selects one by `generation % 2`.

use deluge_common::GpuError;
use tracing::{info, warn};
use wgpu::{BindGroup, Buffer, BufferUsages, CommandEncoder, Device, Queue};

use crate::backend::PassKind;
use crate::codec::BYTES_PER_CELL;
use crate::compute::FluidPipelines;
use crate::field::{DoubleBuffer, ScalarField};
use crate::injection::MaskSet;
use crate::params::GpuSimParams;
use crate::validation::check_target;

/// Bytes per cell of the interleaved flux buffer.
pub const FLUX_BYTES_PER_CELL: usize = 4 * BYTES_PER_CELL;

/// Bytes per cell of the velocity buffer (`vec2<f32>`).
pub const VELOCITY_BYTES_PER_CELL: usize = 8;

/// All buffers and bind groups of one GPU run.
pub struct FieldBuffers {
    grid_size: u32,
    params: Buffer,
    terrain: Buffer,
    source: Buffer,
    minus_source: Buffer,
    seawall: Buffer,
    water: DoubleBuffer<Buffer>,
    flux: DoubleBuffer<Buffer>,
    injected: Buffer,
    transported: Buffer,
    summary: Buffer,
    velocity: Buffer,
    /// Indexed by pass then parity
    bind_groups: [[BindGroup; 2]; 3],
    terrain_ready: bool,
    masks_ready: bool,
}

impl FieldBuffers {
    /// Allocates zeroed buffers for an N×N grid.
    pub fn new(device: &Device, pipelines: &FluidPipelines, grid_size: u32) -> Self {
        let cells = grid_size as usize * grid_size as usize;
        info!(
            "allocating GPU fields ({}x{} = {} cells)",
            grid_size, grid_size, cells
        );
        let field = |label: &str| storage_buffer(device, cells * BYTES_PER_CELL, label);

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sim Params"),
            size: std::mem::size_of::<GpuSimParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let terrain = field("Terrain");
        let source = field("Source Mask");
        let minus_source = field("Minus Source Mask");
        let seawall = field("Seawall Mask");
        let water = DoubleBuffer::new(field("Water A"), field("Water B"));
        let flux = DoubleBuffer::new(
            storage_buffer(device, cells * FLUX_BYTES_PER_CELL, "Flux A"),
            storage_buffer(device, cells * FLUX_BYTES_PER_CELL, "Flux B"),
        );
        let injected = field("Injected Water");
        let transported = field("Transported Water");
        let summary = field("Flux Summary");
        let velocity = storage_buffer(device, cells * VELOCITY_BYTES_PER_CELL, "Velocity");

        // Parity 0 reads slot A and writes slot B; parity 1 the reverse.
        let slots = |p: usize| {
            if p == 0 {
                (water.front(), water.back(), flux.front(), flux.back())
            } else {
                (water.back(), water.front(), flux.back(), flux.front())
            }
        };
        let flux_groups = [0, 1].map(|p| {
            let (water_in, _, flux_in, flux_out) = slots(p);
            pipelines.flux.create_bind_group(
                device,
                &[
                    &params,
                    water_in,
                    &terrain,
                    &source,
                    &minus_source,
                    &seawall,
                    flux_in,
                    &injected,
                    flux_out,
                ],
            )
        });
        let transport_groups = [0, 1].map(|p| {
            let (water_in, _, _, flux_out) = slots(p);
            pipelines.transport.create_bind_group(
                device,
                &[
                    &params,
                    water_in,
                    &injected,
                    flux_out,
                    &transported,
                    &velocity,
                ],
            )
        });
        let resolve_groups = [0, 1].map(|p| {
            let (_, water_out, _, flux_out) = slots(p);
            pipelines.resolve.create_bind_group(
                device,
                &[&params, &transported, flux_out, water_out, &summary],
            )
        });

        Self {
            grid_size,
            params,
            terrain,
            source,
            minus_source,
            seawall,
            water,
            flux,
            injected,
            transported,
            summary,
            velocity,
            bind_groups: [flux_groups, transport_groups, resolve_groups],
            terrain_ready: true,
            masks_ready: true,
        }
    }

    /// Cells per edge.
    #[must_use]
    pub const fn grid_size(&self) -> u32 {
        self.grid_size
    }

    fn cell_count(&self) -> u64 {
        u64::from(self.grid_size) * u64::from(self.grid_size)
    }

    /// Uploads the uniform block.
    pub fn upload_params(&self, queue: &Queue, params: &GpuSimParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Uploads terrain. A field of the wrong size marks terrain incomplete.
    pub fn upload_terrain(&mut self, queue: &Queue, terrain: &ScalarField) {
        self.terrain_ready = self.upload_field(queue, &self.terrain, "terrain", terrain);
    }

    /// Uploads the three masks. Any mask of the wrong size marks them incomplete.
    pub fn upload_masks(&mut self, queue: &Queue, masks: &MaskSet) {
        let ok = self.upload_field(queue, &self.source, "source", &masks.source)
            & self.upload_field(queue, &self.minus_source, "minus_source", &masks.minus_source)
            & self.upload_field(queue, &self.seawall, "seawall", &masks.seawall);
        self.masks_ready = ok;
    }

    fn upload_field(
        &self,
        queue: &Queue,
        target: &Buffer,
        label: &str,
        field: &ScalarField,
    ) -> bool {
        let bytes = field.as_bytes();
        if field.size() != self.grid_size || bytes.len() as u64 != target.size() {
            warn!(
                "{label} field is {}x{} ({} bytes), GPU grid is {}x{}",
                field.size(),
                field.size(),
                bytes.len(),
                self.grid_size,
                self.grid_size
            );
            return false;
        }
        queue.write_buffer(target, 0, bytes);
        true
    }

    /// Checks the targets of one pass against the grid and the binding limit.
    pub fn check_pass(&self, kind: PassKind, max_binding: u64) -> Result<(), GpuError> {
        let cells = self.cell_count();
        let field = cells * BYTES_PER_CELL as u64;
        let flux = cells * FLUX_BYTES_PER_CELL as u64;
        let targets: Vec<(&str, &Buffer, u64)> = match kind {
            PassKind::Flux => {
                if !self.terrain_ready {
                    return Err(incomplete("terrain", "last upload did not match the grid"));
                }
                if !self.masks_ready {
                    return Err(incomplete("masks", "last upload did not match the grid"));
                }
                vec![
                    ("water", self.water.front(), field),
                    ("terrain", &self.terrain, field),
                    ("flux_in", self.flux.front(), flux),
                    ("injected", &self.injected, field),
                    ("flux_out", self.flux.back(), flux),
                ]
            }
            PassKind::Transport => vec![
                ("transported", &self.transported, field),
                ("velocity", &self.velocity, cells * VELOCITY_BYTES_PER_CELL as u64),
            ],
            PassKind::HeightResolve => vec![
                ("water_out", self.water.back(), field),
                ("flux_summary", &self.summary, field),
            ],
        };
        for (label, buffer, expected) in targets {
            check_target(label, buffer.size(), expected)?;
            if expected > max_binding {
                return Err(incomplete(
                    label,
                    &format!("{expected} bytes exceed the binding limit {max_binding}"),
                ));
            }
        }
        Ok(())
    }

    /// Bind group of `kind` for the current parity.
    #[must_use]
    pub fn bind_group(&self, kind: PassKind) -> &BindGroup {
        let pass = match kind {
            PassKind::Flux => 0,
            PassKind::Transport => 1,
            PassKind::HeightResolve => 2,
        };
        &self.bind_groups[pass][self.water.parity()]
    }

    /// Water written by the current tick (valid until [`swap`](Self::swap)).
    #[must_use]
    pub fn water_output(&self) -> &Buffer {
        self.water.back()
    }

    /// Flux summary written by the current tick.
    #[must_use]
    pub const fn flux_summary(&self) -> &Buffer {
        &self.summary
    }

    /// Makes this tick's outputs the next tick's inputs.
    pub fn swap(&mut self) {
        self.water.swap();
        self.flux.swap();
    }

    /// Records clears of all dynamic state.
    pub fn clear_state(&self, encoder: &mut CommandEncoder) {
        for buffer in [
            self.water.front(),
            self.water.back(),
            self.flux.front(),
            self.flux.back(),
            &self.injected,
            &self.transported,
            &self.summary,
            &self.velocity,
        ] {
            encoder.clear_buffer(buffer, 0, None);
        }
    }
}

fn incomplete(target: &str, reason: &str) -> GpuError {
    GpuError::IncompleteTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    }
}

fn storage_buffer(device: &Device, size: usize, label: &str) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::tests::create_test_context;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(FLUX_BYTES_PER_CELL, 16);
        assert_eq!(VELOCITY_BYTES_PER_CELL, 2 * std::mem::size_of::<f32>());
    }

    #[test]
    fn test_buffers_pass_checks_and_swap_parity() {
        let Some((device, queue)) = create_test_context() else {
            return;
        };
        let pipelines = FluidPipelines::new(&device);
        let mut buffers = FieldBuffers::new(&device, &pipelines, 16);
        for kind in PassKind::ORDER {
            assert!(buffers.check_pass(kind, u64::MAX).is_ok());
        }
        assert!(buffers.check_pass(PassKind::Flux, 64).is_err());

        buffers.upload_terrain(&queue, &ScalarField::new(8, 10.0));
        assert!(buffers.check_pass(PassKind::Flux, u64::MAX).is_err());
        buffers.upload_terrain(&queue, &ScalarField::new(16, 10.0));
        assert!(buffers.check_pass(PassKind::Flux, u64::MAX).is_ok());

        assert_eq!(buffers.water.parity(), 0);
        buffers.swap();
        assert_eq!(buffers.water.parity(), 1);
        assert_eq!(buffers.flux.generation(), 1);
    }
}
