//! Water volume accounting and simulation health.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::{self, BYTES_PER_CELL};

/// Observable state after a tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationInfo {
    /// Last completed tick
    pub tick: u64,
    /// Total water volume, rounded to whole m³
    pub total_water: u64,
    /// Total water volume (m³)
    pub volume: f64,
    /// Number of wet cells
    pub wet_cells: usize,
    /// Whether the run has no backend and produces blank output
    pub degraded: bool,
    /// Encoded water field of the tick
    #[serde(skip)]
    pub water: Vec<u8>,
    /// Encoded flux summary of the tick
    #[serde(skip)]
    pub flux: Vec<u8>,
}

/// One volume measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassReport {
    /// Volume (m³)
    pub volume: f64,
    /// Cells holding any water
    pub wet_cells: usize,
}

impl MassReport {
    /// Volume rounded to whole m³.
    #[must_use]
    pub fn total_water(&self) -> u64 {
        if self.volume.is_finite() && self.volume > 0.0 {
            self.volume.round() as u64
        } else {
            0
        }
    }
}

/// Integrates water fields and warns when a run stays dry unexpectedly.
#[derive(Debug, Clone)]
pub struct MassAccountant {
    max_height: f64,
    cell_area: f64,
    warn_after: u32,
    dry_streak: u32,
    warned: bool,
}

impl MassAccountant {
    /// Creates an accountant for fields in `[0, max_height]` on cells of `cell_size` m.
    ///
    /// `warn_after` is the number of consecutive dry ticks, while inflow is
    /// configured, before a warning is logged (0 disables it).
    #[must_use]
    pub fn new(max_height: f32, cell_size: f32, warn_after: u32) -> Self {
        Self {
            max_height: f64::from(max_height),
            cell_area: f64::from(cell_size) * f64::from(cell_size),
            warn_after,
            dry_streak: 0,
            warned: false,
        }
    }

    /// Measures an encoded water field.
    #[must_use]
    pub fn measure(&self, water: &[u8]) -> MassReport {
        let mut volume = 0.0;
        let mut wet_cells = 0;
        for cell in water.chunks_exact(BYTES_PER_CELL) {
            let h = codec::decode_f64([cell[0], cell[1], cell[2], cell[3]]);
            if h > 0.0 {
                wet_cells += 1;
                volume += h;
            }
        }
        MassReport {
            volume: volume * self.max_height * self.cell_area,
            wet_cells,
        }
    }

    /// Measures a frame and updates the dry-streak health check.
    pub fn record(&mut self, tick: u64, water: &[u8], expects_water: bool) -> MassReport {
        let report = self.measure(water);
        if report.wet_cells == 0 && expects_water {
            self.dry_streak = self.dry_streak.saturating_add(1);
            if self.warn_after > 0 && self.dry_streak >= self.warn_after && !self.warned {
                warn!(
                    "no water on the grid for {} ticks despite active sources (tick {})",
                    self.dry_streak, tick
                );
                self.warned = true;
            }
        } else {
            if self.warned {
                info!("water present again at tick {tick}");
            }
            self.dry_streak = 0;
            self.warned = false;
        }
        report
    }

    /// Consecutive dry ticks with inflow configured.
    #[must_use]
    pub const fn dry_streak(&self) -> u32 {
        self.dry_streak
    }

    /// Whether the dry warning has fired and not yet cleared.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        self.warned
    }

    /// Resets the health state.
    pub fn reset(&mut self) {
        self.dry_streak = 0;
        self.warned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ScalarField;

    #[test]
    fn test_measure_volume() {
        let mut field = ScalarField::new(8, 100.0);
        field.set(0, 2.0);
        field.set(10, 3.0);
        let accountant = MassAccountant::new(100.0, 2.0, 0);
        let report = accountant.measure(field.as_bytes());
        assert_eq!(report.wet_cells, 2);
        assert!((report.volume - 20.0).abs() < 1e-3);
        assert_eq!(report.total_water(), 20);
    }

    #[test]
    fn test_dry_streak_warns_once() {
        let dry = ScalarField::new(8, 10.0);
        let mut accountant = MassAccountant::new(10.0, 1.0, 3);
        for tick in 1..=2 {
            accountant.record(tick, dry.as_bytes(), true);
        }
        assert!(!accountant.is_warning());
        accountant.record(3, dry.as_bytes(), true);
        assert!(accountant.is_warning());
        assert_eq!(accountant.dry_streak(), 3);

        let mut wet = ScalarField::new(8, 10.0);
        wet.set(1, 1.0);
        accountant.record(4, wet.as_bytes(), true);
        assert!(!accountant.is_warning());
        assert_eq!(accountant.dry_streak(), 0);
    }

    #[test]
    fn test_dry_without_sources_is_healthy() {
        let dry = ScalarField::new(8, 10.0);
        let mut accountant = MassAccountant::new(10.0, 1.0, 1);
        accountant.record(1, dry.as_bytes(), false);
        assert_eq!(accountant.dry_streak(), 0);
        assert!(!accountant.is_warning());
    }

    #[test]
    fn test_empty_frame() {
        let accountant = MassAccountant::new(10.0, 1.0, 0);
        let report = accountant.measure(&[]);
        assert_eq!(report.total_water(), 0);
    }
}
