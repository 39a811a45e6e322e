//! Backend abstraction shared by the CPU and GPU solvers.

use crate::field::ScalarField;
use crate::injection::MaskSet;
use crate::params::SimulationParams;

/// The three passes of one tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Applies sources, sinks and evaporation, then computes pipe flows
    Flux,
    /// Moves water along the pipes and derives velocity
    Transport,
    /// Clamps heights and writes the output fields
    HeightResolve,
}

impl PassKind {
    /// Execution order.
    pub const ORDER: [Self; 3] = [Self::Flux, Self::Transport, Self::HeightResolve];

    /// Label used in logs and GPU debug markers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Flux => "flux",
            Self::Transport => "transport",
            Self::HeightResolve => "height_resolve",
        }
    }
}

/// Fields produced by one completed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    /// Tick the fields belong to (1 for the first tick)
    pub tick: u64,
    /// Water height per cell
    pub water: ScalarField,
    /// Total outgoing flow per cell, as a fraction of `4 · max_flux`
    pub flux: ScalarField,
}

/// A solver that advances the water state one tick at a time.
pub trait SimulationBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Cells per edge.
    fn grid_size(&self) -> u32;

    /// Replaces the terrain field.
    fn write_terrain(&mut self, terrain: &ScalarField);

    /// Replaces the source, sink and seawall masks.
    fn write_masks(&mut self, masks: &MaskSet);

    /// Runs one tick.
    ///
    /// Returns `None` when no frame is available yet (pipelined readback)
    /// or the readback failed.
    fn step(&mut self, params: &SimulationParams) -> Option<TickOutput>;

    /// Pass-target checks failed since creation.
    fn check_failures(&self) -> u64;

    /// Zeroes water and flux state and the tick counter.
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_order() {
        assert_eq!(PassKind::ORDER[0], PassKind::Flux);
        assert_eq!(PassKind::ORDER[2].label(), "height_resolve");
    }
}
