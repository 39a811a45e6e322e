//! Cell identifiers and integer grid coordinates.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Row-major index of a cell in an N×N simulation grid (`x + y * N`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(transparent)]
pub struct CellIndex(u32);

impl CellIndex {
    /// Creates a cell index from a raw value.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the index as a `usize` for slice access.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for CellIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Integer cell coordinate inside a grid (x grows east, y grows north).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct GridCoord {
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
}

impl GridCoord {
    /// Creates a new grid coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Converts to a row-major cell index.
    #[must_use]
    pub const fn to_index(self, grid_size: u32) -> CellIndex {
        CellIndex(self.y * grid_size + self.x)
    }

    /// Creates from a row-major cell index.
    #[must_use]
    pub const fn from_index(index: CellIndex, grid_size: u32) -> Self {
        Self {
            x: index.0 % grid_size,
            y: index.0 / grid_size,
        }
    }

    /// Chebyshev (king-move) distance between two coordinates.
    #[must_use]
    pub fn chebyshev(self, other: Self) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        let coord = GridCoord::new(3, 5);
        let index = coord.to_index(8);
        assert_eq!(index, CellIndex::new(43));
        assert_eq!(GridCoord::from_index(index, 8), coord);
    }

    #[test]
    fn test_chebyshev() {
        let a = GridCoord::new(2, 2);
        assert_eq!(a.chebyshev(GridCoord::new(4, 3)), 2);
        assert_eq!(a.chebyshev(a), 0);
    }
}
