//! Water sources, sinks, seawalls and rainfall.
//!
//! User edits are recorded as [`SourceSpec`] entries (a cell plus a square
//! radius). Before a tick the entries are stamped into three mask fields:
//! inflow rate, outflow rate and seawall height. Rainfall then adds random
//! drops to the inflow mask.

use deluge_common::CellIndex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::field::ScalarField;
use crate::grid::SimulationGrid;

/// Kind of user edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Adds water at a fixed rate
    Source,
    /// Removes water at a fixed rate
    MinusSource,
    /// Raises the ground surface without adding water
    Seawall,
}

impl SourceKind {
    /// All kinds.
    pub const ALL: [Self; 3] = [Self::Source, Self::MinusSource, Self::Seawall];

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::MinusSource => "minus_source",
            Self::Seawall => "seawall",
        }
    }
}

/// One stamped square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceEntry {
    /// Center cell
    pub cell: CellIndex,
    /// Square radius in cells
    pub area: u32,
}

/// All edits of one kind, sharing a magnitude.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    kind: SourceKind,
    /// Rate (m/s) for sources and sinks, height (m) for seawalls
    pub magnitude: f32,
    /// Radius used for new entries
    pub area: u32,
    entries: Vec<SourceEntry>,
}

impl SourceSpec {
    /// Creates an empty spec.
    #[must_use]
    pub const fn new(kind: SourceKind, magnitude: f32, area: u32) -> Self {
        Self {
            kind,
            magnitude,
            area,
            entries: Vec::new(),
        }
    }

    /// Kind of this spec.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Recorded entries.
    #[must_use]
    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three user edit lists, with a dirty flag for mask rebuilds.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSet {
    specs: [SourceSpec; 3],
    dirty: bool,
}

impl SourceSet {
    /// Creates empty lists with the given magnitudes and radii.
    #[must_use]
    pub const fn new(source: (f32, u32), minus_source: (f32, u32), seawall: (f32, u32)) -> Self {
        Self {
            specs: [
                SourceSpec::new(SourceKind::Source, source.0, source.1),
                SourceSpec::new(SourceKind::MinusSource, minus_source.0, minus_source.1),
                SourceSpec::new(SourceKind::Seawall, seawall.0, seawall.1),
            ],
            dirty: true,
        }
    }

    const fn slot(kind: SourceKind) -> usize {
        match kind {
            SourceKind::Source => 0,
            SourceKind::MinusSource => 1,
            SourceKind::Seawall => 2,
        }
    }

    /// Spec for one kind.
    #[must_use]
    pub fn spec(&self, kind: SourceKind) -> &SourceSpec {
        &self.specs[Self::slot(kind)]
    }

    /// Records an edit at `cell` using the kind's default radius.
    pub fn add(&mut self, kind: SourceKind, cell: CellIndex) {
        let spec = &mut self.specs[Self::slot(kind)];
        spec.entries.push(SourceEntry {
            cell,
            area: spec.area,
        });
        self.dirty = true;
        debug!("added {} at {} (area {})", kind.label(), cell, spec.area);
    }

    /// Removes every edit of one kind.
    pub fn clear(&mut self, kind: SourceKind) {
        let spec = &mut self.specs[Self::slot(kind)];
        if !spec.entries.is_empty() {
            spec.entries.clear();
            self.dirty = true;
        }
    }

    /// Removes every edit.
    pub fn clear_all(&mut self) {
        for kind in SourceKind::ALL {
            self.clear(kind);
        }
    }

    /// Whether any inflow is configured.
    #[must_use]
    pub fn has_inflow(&self) -> bool {
        !self.spec(SourceKind::Source).is_empty()
    }

    /// Returns and resets the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Forces the next tick to rebuild masks.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Mask fields consumed by the flux pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskSet {
    /// Inflow rate per cell (m/s)
    pub source: ScalarField,
    /// Outflow rate per cell (m/s)
    pub minus_source: ScalarField,
    /// Extra ground height per cell (m)
    pub seawall: ScalarField,
}

impl MaskSet {
    /// Creates empty masks; all three share the height range.
    #[must_use]
    pub fn new(size: u32, max_height: f32) -> Self {
        Self {
            source: ScalarField::new(size, max_height),
            minus_source: ScalarField::new(size, max_height),
            seawall: ScalarField::new(size, max_height),
        }
    }

    /// Mask for one kind.
    #[must_use]
    pub const fn get(&self, kind: SourceKind) -> &ScalarField {
        match kind {
            SourceKind::Source => &self.source,
            SourceKind::MinusSource => &self.minus_source,
            SourceKind::Seawall => &self.seawall,
        }
    }

    fn get_mut(&mut self, kind: SourceKind) -> &mut ScalarField {
        match kind {
            SourceKind::Source => &mut self.source,
            SourceKind::MinusSource => &mut self.minus_source,
            SourceKind::Seawall => &mut self.seawall,
        }
    }

    /// Whether every mask covers the grid.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        SourceKind::ALL.iter().all(|&k| self.get(k).is_complete())
    }

    /// Clears the masks and stamps every recorded edit.
    pub fn rebuild(&mut self, grid: &SimulationGrid, sources: &SourceSet) {
        for kind in SourceKind::ALL {
            let spec = sources.spec(kind);
            let mask = self.get_mut(kind);
            mask.clear();
            for entry in spec.entries() {
                stamp(mask, grid, entry.cell, entry.area, spec.magnitude);
            }
        }
    }
}

/// Writes `magnitude` into the square of radius `area` around `center`.
///
/// Cells past the grid edge are skipped; returns the number written.
pub fn stamp(
    field: &mut ScalarField,
    grid: &SimulationGrid,
    center: CellIndex,
    area: u32,
    magnitude: f32,
) -> usize {
    let mut written = 0;
    for cell in grid.square(center, area) {
        field.set(cell.as_usize(), magnitude);
        written += 1;
    }
    written
}

/// Random precipitation added to the inflow mask every tick.
#[derive(Debug, Clone)]
pub struct Rainfall {
    rng: fastrand::Rng,
    /// Percentage of cells receiving a drop each tick
    pub amount: f32,
    /// Upper bound of a drop's rate (m/s)
    pub max_precipitation: f32,
}

impl Rainfall {
    /// Creates a rain generator; `seed` makes runs reproducible.
    #[must_use]
    pub fn new(amount: f32, max_precipitation: f32, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        Self {
            rng,
            amount,
            max_precipitation,
        }
    }

    /// Drops per tick: `floor(N² / 100 · amount)`.
    #[must_use]
    pub fn drop_count(&self, grid_size: u32) -> usize {
        let cells = f64::from(grid_size) * f64::from(grid_size);
        let count = (cells / 100.0 * f64::from(self.amount)).floor();
        if count.is_finite() && count > 0.0 {
            count as usize
        } else {
            0
        }
    }

    /// Whether any rain falls at this grid size.
    #[must_use]
    pub fn is_active(&self, grid_size: u32) -> bool {
        self.max_precipitation > 0.0 && self.drop_count(grid_size) > 0
    }

    /// Adds drops to random cells of `mask`; returns the number of drops.
    pub fn apply(&mut self, mask: &mut ScalarField) -> usize {
        if !self.is_active(mask.size()) {
            return 0;
        }
        let cells = mask.cell_count();
        let count = self.drop_count(mask.size());
        for _ in 0..count {
            let cell = self.rng.usize(..cells);
            let rate = self.rng.f32() * self.max_precipitation;
            mask.add(cell, rate);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SimulationGrid {
        SimulationGrid::new(0.0, 0.0, 16, 1.0)
    }

    #[test]
    fn test_add_and_clear_tracks_dirty() {
        let mut set = SourceSet::new((10.0, 1), (10.0, 1), (10.0, 1));
        assert!(set.take_dirty());
        assert!(!set.take_dirty());

        set.add(SourceKind::Source, CellIndex::new(5));
        assert!(set.has_inflow());
        assert!(set.take_dirty());

        set.clear(SourceKind::Seawall);
        assert!(!set.take_dirty());

        set.clear_all();
        assert!(!set.has_inflow());
        assert!(set.take_dirty());
    }

    #[test]
    fn test_rebuild_stamps_squares() {
        let g = grid();
        let mut set = SourceSet::new((2.0, 1), (1.0, 0), (5.0, 2));
        set.add(SourceKind::Source, g.cell_index(8, 8));
        set.add(SourceKind::MinusSource, g.cell_index(0, 0));
        set.add(SourceKind::Seawall, g.cell_index(15, 15));

        let mut masks = MaskSet::new(16, 100.0);
        masks.rebuild(&g, &set);

        let nonzero = |f: &ScalarField| (0..f.cell_count()).filter(|&i| f.get(i) > 0.0).count();
        assert_eq!(nonzero(&masks.source), 9);
        assert_eq!(nonzero(&masks.minus_source), 1);
        assert_eq!(nonzero(&masks.seawall), 9);
        assert!((masks.source.get(g.cell_index(7, 9).as_usize()) - 2.0).abs() < 1e-5);
        assert!((masks.seawall.get(g.cell_index(13, 13).as_usize()) - 5.0).abs() < 1e-5);

        set.clear(SourceKind::Source);
        masks.rebuild(&g, &set);
        assert_eq!(nonzero(&masks.source), 0);
    }

    #[test]
    fn test_stamp_only_touches_square() {
        let g = grid();
        let mut field = ScalarField::new(16, 10.0);
        let center = g.cell_index(3, 12);
        let written = stamp(&mut field, &g, center, 2, 1.0);
        assert_eq!(written, 25);
        for i in 0..field.cell_count() {
            let c = g.cell_coords(CellIndex::new(i as u32));
            let inside = c.chebyshev(g.cell_coords(center)) <= 2;
            assert_eq!(field.get(i) > 0.0, inside, "cell {i}");
        }
    }

    #[test]
    fn test_rain_drop_count() {
        let rain = Rainfall::new(1.0, 0.5, Some(7));
        assert_eq!(rain.drop_count(512), 2621);
        assert_eq!(rain.drop_count(8), 0);
        assert!(!rain.is_active(8));
        assert!(!Rainfall::new(1.0, 0.0, None).is_active(512));
    }

    #[test]
    fn test_rain_is_seeded_and_bounded() {
        let mut a = Rainfall::new(10.0, 0.5, Some(42));
        let mut b = Rainfall::new(10.0, 0.5, Some(42));
        let mut mask_a = ScalarField::new(32, 100.0);
        let mut mask_b = ScalarField::new(32, 100.0);
        assert_eq!(a.apply(&mut mask_a), 102);
        b.apply(&mut mask_b);
        assert_eq!(mask_a, mask_b);
        let total: f32 = mask_a.to_values().iter().sum();
        assert!(total > 0.0);
        assert!(total <= 102.0 * 0.5 + 1e-3);
    }
}
