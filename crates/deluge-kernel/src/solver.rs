//! CPU reference solver.
//!
//! Implements the virtual-pipe shallow-water scheme with the same three
//! passes and the same encoded fields as the WGSL pipeline, so either
//! backend can drive a run and their outputs stay comparable.

use tracing::debug;

use crate::backend::{PassKind, SimulationBackend, TickOutput};
use crate::field::{DoubleBuffer, FluxSet, ScalarField};
use crate::grid::Direction;
use crate::injection::MaskSet;
use crate::params::SimulationParams;
use crate::validation::ValidationHarness;

/// Depth below which velocity is reported as zero (m).
const MIN_VELOCITY_DEPTH: f32 = 1e-6;

/// Single-threaded solver operating on encoded fields.
pub struct CpuSolver {
    size: u32,
    terrain: ScalarField,
    masks: MaskSet,
    water: DoubleBuffer<ScalarField>,
    flux: DoubleBuffer<FluxSet>,
    /// Water after sources, sinks and evaporation
    injected: ScalarField,
    /// Water after pipe transport, before the final clamp
    transported: ScalarField,
    flux_summary: ScalarField,
    velocity: Vec<[f32; 2]>,
    harness: ValidationHarness,
    tick: u64,
}

impl CpuSolver {
    /// Creates a dry solver on flat zero terrain.
    #[must_use]
    pub fn new(size: u32, params: &SimulationParams) -> Self {
        let height = || ScalarField::new(size, params.max_height);
        Self {
            size,
            terrain: height(),
            masks: MaskSet::new(size, params.max_height),
            water: DoubleBuffer::new(height(), height()),
            flux: DoubleBuffer::new(
                FluxSet::new(size, params.max_flux),
                FluxSet::new(size, params.max_flux),
            ),
            injected: height(),
            transported: height(),
            flux_summary: ScalarField::new(size, 4.0 * params.max_flux),
            velocity: vec![[0.0; 2]; size as usize * size as usize],
            harness: ValidationHarness::new(),
            tick: 0,
        }
    }

    /// Current water heights.
    #[must_use]
    pub fn water(&self) -> &ScalarField {
        self.water.front()
    }

    /// Current outgoing pipe flows.
    #[must_use]
    pub fn flux(&self) -> &FluxSet {
        self.flux.front()
    }

    /// Velocity `(u, v)` per cell from the last tick (m/s).
    #[must_use]
    pub fn velocity(&self) -> &[[f32; 2]] {
        &self.velocity
    }

    /// Overwrites the current water height of one cell.
    pub fn set_water(&mut self, index: usize, height: f32) {
        self.water.front_mut().set(index, height);
    }

    /// Ticks completed so far.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    fn fits(&self, field: &ScalarField) -> bool {
        field.size() == self.size && field.is_complete()
    }

    fn targets_complete(&mut self, pass: PassKind) -> bool {
        let flux_ok = |set: &FluxSet, size: u32| {
            set.is_complete() && Direction::ALL.iter().all(|&d| set.get(d).size() == size)
        };
        let (ok, what) = match pass {
            PassKind::Flux => (
                self.fits(&self.terrain)
                    && self.fits(&self.masks.source)
                    && self.fits(&self.masks.minus_source)
                    && self.fits(&self.masks.seawall)
                    && self.fits(self.water.front())
                    && self.fits(&self.injected)
                    && flux_ok(self.flux.front(), self.size)
                    && flux_ok(self.flux.back(), self.size),
                "terrain, masks, water or flux do not cover the grid",
            ),
            PassKind::Transport => (
                self.fits(&self.transported)
                    && self.velocity.len() == self.injected.cell_count(),
                "transport targets do not cover the grid",
            ),
            PassKind::HeightResolve => (
                self.fits(self.water.back()) && self.fits(&self.flux_summary),
                "output targets do not cover the grid",
            ),
        };
        let message = format!("{} pass: {what}", pass.label());
        self.harness.validate(ok, &message)
    }

    fn flux_pass(&mut self, p: &SimulationParams) {
        let n = self.size;
        let dt = p.effective_time_step();
        let cell_size = p.cell_size;
        let cell_area = p.cell_area();
        let count = self.terrain.cell_count();

        let water = self.water.front();
        let base: Vec<f32> = (0..count)
            .map(|i| self.terrain.get(i) + self.masks.seawall.get(i))
            .collect();
        let surface: Vec<f32> = (0..count).map(|i| base[i] + water.get(i)).collect();
        let (previous, next) = self.flux.split_mut();

        for y in 0..n {
            for x in 0..n {
                let i = (x + y * n) as usize;

                let rate = self.masks.source.get(i) - self.masks.minus_source.get(i);
                let injected = ((water.get(i) + rate * dt).max(0.0)
                    * (1.0 - p.evaporation_rate))
                    .min(p.max_height);
                self.injected.set(i, injected);
                let available = self.injected.get(i) * cell_area;

                let mut out = [0.0f32; 4];
                for direction in Direction::ALL {
                    let there = match neighbour(n, x, y, direction) {
                        Some(j) => surface[j],
                        None if p.simulation_confine => continue,
                        None => base[i],
                    };
                    let pressure = p.water_density * p.gravity * (surface[i] - there);
                    let flow = p.cushion_factor * previous.get(direction).get(i)
                        + dt * cell_size * pressure / p.water_density;
                    out[direction.slot()] = flow.clamp(0.0, p.max_flux);
                }

                let drained = out.iter().sum::<f32>() * dt;
                if drained > available && drained > 0.0 {
                    let k = available / drained;
                    for flow in &mut out {
                        *flow *= k;
                    }
                }
                for direction in Direction::ALL {
                    next.get_mut(direction).set(i, out[direction.slot()]);
                }
            }
        }
    }

    fn transport_pass(&mut self, p: &SimulationParams) {
        let n = self.size;
        let dt = p.effective_time_step();
        let cell_size = p.cell_size;
        let cell_area = p.cell_area();
        let previous = self.water.front();
        let flux = self.flux.back();

        for y in 0..n {
            for x in 0..n {
                let i = (x + y * n) as usize;
                let own = flux.cell(i);
                // Flow entering from the neighbour on side `d`.
                let from = |d: Direction| {
                    neighbour(n, x, y, d).map_or(0.0, |j| flux.get(d.opposite()).get(j))
                };
                let from_left = from(Direction::Left);
                let from_right = from(Direction::Right);
                let from_below = from(Direction::Down);
                let from_above = from(Direction::Up);

                let inflow = from_left + from_right + from_below + from_above;
                let outflow: f32 = own.iter().sum();
                let height = (self.injected.get(i) + dt * (inflow - outflow) / cell_area).max(0.0);
                self.transported.set(i, height);

                let depth = 0.5 * (previous.get(i) + height);
                let mut velocity = [0.0f32; 2];
                if depth > MIN_VELOCITY_DEPTH {
                    let wx = 0.5
                        * (from_left - own[Direction::Left.slot()] + own[Direction::Right.slot()]
                            - from_right);
                    let wy = 0.5
                        * (from_below - own[Direction::Down.slot()] + own[Direction::Up.slot()]
                            - from_above);
                    velocity = [
                        wx / (cell_size * depth) * p.cushion_factor,
                        wy / (cell_size * depth) * p.cushion_factor,
                    ];
                }
                if p.simulation_confine {
                    if x == 0 || x + 1 == n {
                        velocity[0] = 0.0;
                    }
                    if y == 0 || y + 1 == n {
                        velocity[1] = 0.0;
                    }
                }
                self.velocity[i] = velocity;
            }
        }
    }

    fn resolve_pass(&mut self, p: &SimulationParams) {
        let (_, output) = self.water.split_mut();
        let flux = self.flux.back();
        for i in 0..self.transported.cell_count() {
            output.set(i, self.transported.get(i).clamp(0.0, p.max_height));
            self.flux_summary.set(i, flux.total(i));
        }
    }
}

impl SimulationBackend for CpuSolver {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn grid_size(&self) -> u32 {
        self.size
    }

    fn write_terrain(&mut self, terrain: &ScalarField) {
        self.terrain = terrain.clone();
    }

    fn write_masks(&mut self, masks: &MaskSet) {
        self.masks = masks.clone();
    }

    fn step(&mut self, params: &SimulationParams) -> Option<TickOutput> {
        let tick = self.tick + 1;
        self.harness.begin_tick(tick);

        let mut completed = true;
        for pass in PassKind::ORDER {
            // Later passes consume earlier outputs, so a skipped pass skips the rest.
            if !self.targets_complete(pass) {
                completed = false;
                break;
            }
            match pass {
                PassKind::Flux => self.flux_pass(params),
                PassKind::Transport => self.transport_pass(params),
                PassKind::HeightResolve => self.resolve_pass(params),
            }
        }

        if completed {
            self.water.swap();
            self.flux.swap();
        } else {
            debug!("tick {tick} kept the previous state");
        }
        self.tick = tick;

        Some(TickOutput {
            tick,
            water: self.water.front().clone(),
            flux: self.flux_summary.clone(),
        })
    }

    fn check_failures(&self) -> u64 {
        self.harness.failure_count()
    }

    fn reset(&mut self) {
        self.water.for_each_mut(ScalarField::clear);
        self.flux.for_each_mut(FluxSet::clear);
        self.injected.clear();
        self.transported.clear();
        self.flux_summary.clear();
        self.velocity.fill([0.0; 2]);
        self.tick = 0;
    }
}

/// Row-major index of the neighbour of `(x, y)` in `direction`.
fn neighbour(n: u32, x: u32, y: u32, direction: Direction) -> Option<usize> {
    let (dx, dy) = direction.offset();
    let nx = i64::from(x) + dx;
    let ny = i64::from(y) + dy;
    let size = i64::from(n);
    ((0..size).contains(&nx) && (0..size).contains(&ny)).then(|| (nx + ny * size) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::SimulationGrid;
    use crate::injection::{SourceKind, SourceSet};

    const N: u32 = 16;

    fn params() -> SimulationParams {
        SimulationParams {
            max_height: 100.0,
            max_flux: 1000.0,
            evaporation_rate: 0.0,
            ..Default::default()
        }
    }

    fn confined() -> SimulationParams {
        SimulationParams {
            simulation_confine: true,
            ..params()
        }
    }

    fn idx(x: u32, y: u32) -> usize {
        (x + y * N) as usize
    }

    fn masks_with(kind: SourceKind, magnitude: f32, x: u32, y: u32, area: u32) -> MaskSet {
        let grid = SimulationGrid::new(0.0, 0.0, N, 1.0);
        let mut set = SourceSet::new((magnitude, area), (magnitude, area), (magnitude, area));
        set.add(kind, grid.cell_index(x, y));
        let mut masks = MaskSet::new(N, 100.0);
        masks.rebuild(&grid, &set);
        masks
    }

    #[test]
    fn test_dry_grid_stays_dry() {
        let mut solver = CpuSolver::new(N, &params());
        for _ in 0..5 {
            let out = solver.step(&params());
            assert!(out.is_some_and(|o| o.water.sum_f64() == 0.0));
        }
        assert_eq!(solver.tick(), 5);
    }

    #[test]
    fn test_first_tick_stays_inside_source_square() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        solver.write_masks(&masks_with(SourceKind::Source, 1.0, 8, 8, 1));
        let Some(out) = solver.step(&p) else {
            panic!("cpu solver always yields a frame");
        };
        let expected = 1.0 * p.effective_time_step();
        for y in 0..N {
            for x in 0..N {
                let h = out.water.get(idx(x, y));
                if x.abs_diff(8) <= 1 && y.abs_diff(8) <= 1 {
                    assert!((h - expected).abs() < 1e-5, "({x},{y}) = {h}");
                } else {
                    assert_eq!(h, 0.0, "({x},{y}) got water on the first tick");
                }
            }
        }
    }

    #[test]
    fn test_water_spreads_after_more_ticks() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        solver.write_masks(&masks_with(SourceKind::Source, 1.0, 8, 8, 1));
        for _ in 0..10 {
            solver.step(&p);
        }
        assert!(solver.water().get(idx(8, 11)) > 0.0);
        assert!(solver.water().get(idx(5, 8)) > 0.0);
    }

    #[test]
    fn test_confined_mass_is_conserved() {
        let p = confined();
        let mut solver = CpuSolver::new(N, &p);
        for y in 6..10 {
            for x in 6..10 {
                solver.set_water(idx(x, y), 5.0);
            }
        }
        let initial = solver.water().sum_f64();
        for _ in 0..60 {
            solver.step(&p);
        }
        let after = solver.water().sum_f64();
        assert!(after <= initial * (1.0 + 1e-4), "{initial} -> {after}");
        assert!(after >= initial * (1.0 - 1e-3), "{initial} -> {after}");
        assert!(solver.water().get(idx(0, 0)) > 0.0);
    }

    #[test]
    fn test_open_edges_drain() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        for y in 0..N {
            solver.set_water(idx(0, y), 2.0);
        }
        let initial = solver.water().sum_f64();
        for _ in 0..20 {
            solver.step(&p);
        }
        assert!(solver.water().sum_f64() < initial);
    }

    #[test]
    fn test_flat_confined_pool_is_still() {
        let p = confined();
        let mut solver = CpuSolver::new(N, &p);
        for i in 0..(N * N) as usize {
            solver.set_water(i, 3.0);
        }
        for _ in 0..5 {
            solver.step(&p);
        }
        for i in 0..(N * N) as usize {
            assert!((solver.water().get(i) - 3.0).abs() < 1e-4);
            assert!(solver.velocity()[i][0].abs() < 1e-3);
        }
    }

    #[test]
    fn test_sink_never_goes_negative() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        solver.set_water(idx(4, 4), 0.05);
        solver.write_masks(&masks_with(SourceKind::MinusSource, 10.0, 4, 4, 0));
        for _ in 0..3 {
            solver.step(&p);
        }
        let water = solver.water();
        assert!((0..water.cell_count()).all(|i| water.get(i) >= 0.0));
        assert_eq!(water.get(idx(4, 4)), 0.0);
    }

    #[test]
    fn test_height_clamped_to_max() {
        let p = SimulationParams {
            max_height: 50.0,
            ..params()
        };
        let mut solver = CpuSolver::new(N, &p);
        let mut masks = MaskSet::new(N, 50.0);
        masks.source.set(idx(3, 3), 50.0);
        solver.write_masks(&masks);
        for _ in 0..30 {
            solver.step(&p);
        }
        assert!(solver.water().get(idx(3, 3)) <= 50.0);
    }

    #[test]
    fn test_evaporation_removes_water() {
        let p = SimulationParams {
            evaporation_rate: 0.1,
            ..confined()
        };
        let mut solver = CpuSolver::new(N, &p);
        for i in 0..(N * N) as usize {
            solver.set_water(i, 1.0);
        }
        solver.step(&p);
        assert!((solver.water().get(idx(5, 5)) - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_seawall_blocks_without_adding_water() {
        let p = confined();
        let mut solver = CpuSolver::new(N, &p);
        let mut masks = MaskSet::new(N, 100.0);
        for y in 0..N {
            masks.seawall.set(idx(8, y), 20.0);
        }
        solver.write_masks(&masks);
        for y in 0..N {
            for x in 0..8 {
                solver.set_water(idx(x, y), 1.0);
            }
        }
        for _ in 0..30 {
            solver.step(&p);
        }
        for y in 0..N {
            for x in 9..N {
                assert_eq!(solver.water().get(idx(x, y)), 0.0);
            }
        }
    }

    #[test]
    fn test_velocity_points_downhill() {
        let p = confined();
        let mut solver = CpuSolver::new(N, &p);
        for y in 0..N {
            for x in 0..8 {
                solver.set_water(idx(x, y), 1.0);
            }
        }
        let Some(out) = solver.step(&p) else {
            panic!("cpu solver always yields a frame");
        };
        let v = solver.velocity()[idx(8, 4)];
        assert!(v[0] > 0.0);
        assert!(v[1].abs() < 1e-4);
        assert_eq!(solver.velocity()[idx(N - 1, 4)][0], 0.0);
        assert!(out.flux.get(idx(7, 4)) > 0.0);
    }

    #[test]
    fn test_long_run_keeps_no_check_history() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        solver.set_water(idx(4, 4), 2.0);
        for _ in 0..1000 {
            solver.step(&p);
        }
        let mut expected = ValidationHarness::new();
        expected.begin_tick(1000);
        assert_eq!(solver.harness, expected);
        assert_eq!(solver.check_failures(), 0);
    }

    #[test]
    fn test_incomplete_terrain_skips_tick() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        solver.set_water(idx(2, 2), 1.0);
        solver.write_terrain(&ScalarField::new(N / 2, 100.0));
        let Some(out) = solver.step(&p) else {
            panic!("cpu solver always yields a frame");
        };
        assert_eq!(out.tick, 1);
        assert!((out.water.get(idx(2, 2)) - 1.0).abs() < 1e-5);
        assert_eq!(solver.check_failures(), 1);

        solver.write_terrain(&ScalarField::new(N, 100.0));
        solver.step(&p);
        assert!(solver.water().get(idx(2, 2)) < 1.0);
    }

    #[test]
    fn test_reset_clears_state() {
        let p = params();
        let mut solver = CpuSolver::new(N, &p);
        solver.set_water(idx(1, 1), 4.0);
        solver.step(&p);
        solver.reset();
        assert_eq!(solver.tick(), 0);
        assert_eq!(solver.water().sum_f64(), 0.0);
    }
}
