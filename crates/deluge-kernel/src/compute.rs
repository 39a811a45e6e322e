//! WGSL compute passes for the shallow-water tick.
//!
//! Each pass is its own shader module built from a shared prelude (uniform
//! block and codec) plus the pass body. All fields are `array<u32>` with one
//! encoded cell per element; the four directional fluxes of a cell are
//! interleaved as a `vec4<u32>` in (up, down, left, right) order.

use tracing::debug;
use wgpu::{BindGroup, BindGroupLayout, Buffer, CommandEncoder, ComputePipeline, Device};

use crate::backend::PassKind;

/// Workgroup edge used by every pass.
pub const WORKGROUP_SIZE: u32 = 8;

/// Uniform block and codec shared by all passes.
const PRELUDE_WGSL: &str = r"
struct Params {
    grid_size: u32,
    confine: u32,
    pad0: u32,
    pad1: u32,
    gravity: f32,
    density: f32,
    dt: f32,
    cell_size: f32,
    cushion: f32,
    evaporation: f32,
    max_height: f32,
    max_flux: f32,
};

@group(0) @binding(0) var<uniform> params: Params;

fn decode(packed: u32) -> f32 {
    let c = unpack4x8unorm(packed);
    return c.x + c.y / 255.0 + c.z / 65025.0 + c.w / 16581375.0;
}

fn encode(value: f32) -> u32 {
    let v = clamp(value, 0.0, 1.0);
    if (v >= 1.0) {
        return 255u;
    }
    var x = v * 255.0;
    let b0 = floor(x);
    x = (x - b0) * 255.0;
    let b1 = min(floor(x), 254.0);
    x = (x - b1) * 255.0;
    let b2 = min(floor(x), 254.0);
    x = (x - b2) * 255.0;
    let b3 = min(floor(x), 254.0);
    return u32(b0) | (u32(b1) << 8u) | (u32(b2) << 16u) | (u32(b3) << 24u);
}

fn decode_flux(packed: vec4<u32>) -> vec4<f32> {
    return vec4<f32>(decode(packed.x), decode(packed.y), decode(packed.z), decode(packed.w))
        * params.max_flux;
}
";

const FLUX_WGSL: &str = r"
@group(0) @binding(1) var<storage, read> water_in: array<u32>;
@group(0) @binding(2) var<storage, read> terrain: array<u32>;
@group(0) @binding(3) var<storage, read> source_mask: array<u32>;
@group(0) @binding(4) var<storage, read> minus_mask: array<u32>;
@group(0) @binding(5) var<storage, read> seawall_mask: array<u32>;
@group(0) @binding(6) var<storage, read> flux_in: array<vec4<u32>>;
@group(0) @binding(7) var<storage, read_write> injected: array<u32>;
@group(0) @binding(8) var<storage, read_write> flux_out: array<vec4<u32>>;

fn ground(i: u32) -> f32 {
    return (decode(terrain[i]) + decode(seawall_mask[i])) * params.max_height;
}

fn surface(i: u32) -> f32 {
    return ground(i) + decode(water_in[i]) * params.max_height;
}

fn pipe(previous: f32, here: f32, there: f32) -> f32 {
    let pressure = params.density * params.gravity * (here - there);
    let flow = params.cushion * previous + params.dt * params.cell_size * pressure / params.density;
    return clamp(flow, 0.0, params.max_flux);
}

@compute @workgroup_size(8, 8)
fn flux_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let n = params.grid_size;
    if (id.x >= n || id.y >= n) {
        return;
    }
    let i = id.x + id.y * n;
    let open_edge = params.confine == 0u;

    let h = decode(water_in[i]) * params.max_height;
    let rate = (decode(source_mask[i]) - decode(minus_mask[i])) * params.max_height;
    let wet = min(max(h + rate * params.dt, 0.0) * (1.0 - params.evaporation), params.max_height);
    injected[i] = encode(wet / params.max_height);
    let available = decode(injected[i]) * params.max_height * params.cell_size * params.cell_size;

    let here = surface(i);
    let edge = ground(i);
    let previous = decode_flux(flux_in[i]);
    var f = vec4<f32>(0.0);
    if (id.y + 1u < n) {
        f.x = pipe(previous.x, here, surface(i + n));
    } else if (open_edge) {
        f.x = pipe(previous.x, here, edge);
    }
    if (id.y > 0u) {
        f.y = pipe(previous.y, here, surface(i - n));
    } else if (open_edge) {
        f.y = pipe(previous.y, here, edge);
    }
    if (id.x > 0u) {
        f.z = pipe(previous.z, here, surface(i - 1u));
    } else if (open_edge) {
        f.z = pipe(previous.z, here, edge);
    }
    if (id.x + 1u < n) {
        f.w = pipe(previous.w, here, surface(i + 1u));
    } else if (open_edge) {
        f.w = pipe(previous.w, here, edge);
    }

    let drained = (f.x + f.y + f.z + f.w) * params.dt;
    if (drained > available && drained > 0.0) {
        f = f * (available / drained);
    }
    let normalized = f / params.max_flux;
    flux_out[i] = vec4<u32>(
        encode(normalized.x),
        encode(normalized.y),
        encode(normalized.z),
        encode(normalized.w),
    );
}
";

const TRANSPORT_WGSL: &str = r"
@group(0) @binding(1) var<storage, read> water_in: array<u32>;
@group(0) @binding(2) var<storage, read> injected: array<u32>;
@group(0) @binding(3) var<storage, read> flux: array<vec4<u32>>;
@group(0) @binding(4) var<storage, read_write> transported: array<u32>;
@group(0) @binding(5) var<storage, read_write> velocity: array<vec2<f32>>;

@compute @workgroup_size(8, 8)
fn transport_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let n = params.grid_size;
    if (id.x >= n || id.y >= n) {
        return;
    }
    let i = id.x + id.y * n;
    let own = decode_flux(flux[i]);

    var from_left = 0.0;
    var from_right = 0.0;
    var from_below = 0.0;
    var from_above = 0.0;
    if (id.x > 0u) {
        from_left = decode_flux(flux[i - 1u]).w;
    }
    if (id.x + 1u < n) {
        from_right = decode_flux(flux[i + 1u]).z;
    }
    if (id.y > 0u) {
        from_below = decode_flux(flux[i - n]).x;
    }
    if (id.y + 1u < n) {
        from_above = decode_flux(flux[i + n]).y;
    }

    let area = params.cell_size * params.cell_size;
    let inflow = from_left + from_right + from_below + from_above;
    let outflow = own.x + own.y + own.z + own.w;
    let height_in = decode(injected[i]) * params.max_height;
    let h = max(height_in + params.dt * (inflow - outflow) / area, 0.0);
    transported[i] = encode(h / params.max_height);

    let depth = 0.5 * (decode(water_in[i]) * params.max_height + h);
    var v = vec2<f32>(0.0);
    if (depth > 1e-6) {
        let wx = 0.5 * (from_left - own.z + own.w - from_right);
        let wy = 0.5 * (from_below - own.y + own.x - from_above);
        v = vec2<f32>(wx, wy) / (params.cell_size * depth) * params.cushion;
    }
    if (params.confine != 0u) {
        if (id.x == 0u || id.x + 1u == n) {
            v.x = 0.0;
        }
        if (id.y == 0u || id.y + 1u == n) {
            v.y = 0.0;
        }
    }
    velocity[i] = v;
}
";

const RESOLVE_WGSL: &str = r"
@group(0) @binding(1) var<storage, read> transported: array<u32>;
@group(0) @binding(2) var<storage, read> flux: array<vec4<u32>>;
@group(0) @binding(3) var<storage, read_write> water_out: array<u32>;
@group(0) @binding(4) var<storage, read_write> flux_summary: array<u32>;

@compute @workgroup_size(8, 8)
fn resolve_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let n = params.grid_size;
    if (id.x >= n || id.y >= n) {
        return;
    }
    let i = id.x + id.y * n;
    let h = clamp(decode(transported[i]) * params.max_height, 0.0, params.max_height);
    water_out[i] = encode(h / params.max_height);
    let f = decode_flux(flux[i]);
    flux_summary[i] = encode((f.x + f.y + f.z + f.w) / (4.0 * params.max_flux));
}
";

/// How a pass accesses one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Uniform block
    Uniform,
    /// Read-only storage
    Read,
    /// Read-write storage
    ReadWrite,
}

impl PassKind {
    /// Binding layout (binding `i` is element `i`).
    #[must_use]
    pub const fn bindings(self) -> &'static [Access] {
        use Access::{Read, ReadWrite, Uniform};
        match self {
            Self::Flux => &[
                Uniform, Read, Read, Read, Read, Read, Read, ReadWrite, ReadWrite,
            ],
            Self::Transport => &[Uniform, Read, Read, Read, ReadWrite, ReadWrite],
            Self::HeightResolve => &[Uniform, Read, Read, ReadWrite, ReadWrite],
        }
    }

    const fn shader(self) -> (&'static str, &'static str) {
        match self {
            Self::Flux => (FLUX_WGSL, "flux_main"),
            Self::Transport => (TRANSPORT_WGSL, "transport_main"),
            Self::HeightResolve => (RESOLVE_WGSL, "resolve_main"),
        }
    }
}

/// Full WGSL source of one pass.
#[must_use]
pub fn pass_source(kind: PassKind) -> String {
    let (body, _) = kind.shader();
    format!("{PRELUDE_WGSL}\n{body}")
}

/// Compiled pipeline and bind group layout of one pass.
pub struct PassPipeline {
    kind: PassKind,
    pipeline: ComputePipeline,
    layout: BindGroupLayout,
}

impl PassPipeline {
    /// Compiles the pass.
    pub fn new(device: &Device, kind: PassKind) -> Self {
        let label = kind.label();
        let (_, entry_point) = kind.shader();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(pass_source(kind).into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = kind
            .bindings()
            .iter()
            .enumerate()
            .map(|(binding, &access)| layout_entry(binding as u32, access))
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        debug!("compiled {label} pass");
        Self {
            kind,
            pipeline,
            layout,
        }
    }

    /// Which pass this is.
    #[must_use]
    pub const fn kind(&self) -> PassKind {
        self.kind
    }

    /// Binds `buffers` in binding order.
    #[must_use]
    pub fn create_bind_group(&self, device: &Device, buffers: &[&Buffer]) -> BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.kind.label()),
            layout: &self.layout,
            entries: &entries,
        })
    }

    /// Records the pass over an N×N grid.
    pub fn dispatch(&self, encoder: &mut CommandEncoder, bind_group: &BindGroup, grid_size: u32) {
        let groups = grid_size.div_ceil(WORKGROUP_SIZE);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.kind.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(groups, groups, 1);
    }
}

/// The three compiled passes.
pub struct FluidPipelines {
    /// Flux pass
    pub flux: PassPipeline,
    /// Transport pass
    pub transport: PassPipeline,
    /// Height-resolve pass
    pub resolve: PassPipeline,
}

impl FluidPipelines {
    /// Compiles every pass.
    pub fn new(device: &Device) -> Self {
        Self {
            flux: PassPipeline::new(device, PassKind::Flux),
            transport: PassPipeline::new(device, PassKind::Transport),
            resolve: PassPipeline::new(device, PassKind::HeightResolve),
        }
    }

    /// Pipeline for `kind`.
    #[must_use]
    pub const fn get(&self, kind: PassKind) -> &PassPipeline {
        match kind {
            PassKind::Flux => &self.flux,
            PassKind::Transport => &self.transport,
            PassKind::HeightResolve => &self.resolve,
        }
    }
}

fn layout_entry(binding: u32, access: Access) -> wgpu::BindGroupLayoutEntry {
    let ty = match access {
        Access::Uniform => wgpu::BufferBindingType::Uniform,
        Access::Read => wgpu::BufferBindingType::Storage { read_only: true },
        Access::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
