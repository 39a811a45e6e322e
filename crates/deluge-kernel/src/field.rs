//! Encoded scalar fields and double-buffered storage.
//!
//! A [`ScalarField`] is N×N cells, each holding a physical value in
//! `[0, max_value]` encoded as four bytes (see [`crate::codec`]). The byte
//! layout is exactly what the GPU buffers hold and what playback frames
//! contain, so fields move between CPU, GPU and disk without conversion.

use crate::codec::{self, BYTES_PER_CELL};
use crate::grid::Direction;

/// Per-cell scalar field with a fixed physical range.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    size: u32,
    max_value: f32,
    data: Vec<u8>,
}

impl ScalarField {
    /// Creates a zero-filled field of `size × size` cells.
    #[must_use]
    pub fn new(size: u32, max_value: f32) -> Self {
        let cells = size as usize * size as usize;
        Self {
            size,
            max_value,
            data: vec![0; cells * BYTES_PER_CELL],
        }
    }

    /// Wraps already-encoded bytes.
    ///
    /// The length is not checked here; use [`is_complete`](Self::is_complete).
    #[must_use]
    pub fn from_bytes(size: u32, max_value: f32, data: Vec<u8>) -> Self {
        Self {
            size,
            max_value,
            data,
        }
    }

    /// Cells per edge.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Upper bound of the physical range.
    #[must_use]
    pub const fn max_value(&self) -> f32 {
        self.max_value
    }

    /// Number of cells the field should hold.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.size as usize * self.size as usize
    }

    /// Whether the backing bytes cover every cell and the range is usable.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.cell_count() * BYTES_PER_CELL
            && self.max_value.is_finite()
            && self.max_value > 0.0
    }

    /// Physical value of cell `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> f32 {
        self.get_normalized(index) * self.max_value
    }

    /// Normalized value of cell `index` in `[0, 1]`.
    #[must_use]
    pub fn get_normalized(&self, index: usize) -> f32 {
        codec::decode(codec::read_cell(&self.data, index))
    }

    /// Physical value at double precision.
    #[must_use]
    pub fn get_f64(&self, index: usize) -> f64 {
        codec::decode_f64(codec::read_cell(&self.data, index)) * f64::from(self.max_value)
    }

    /// Stores a physical value, clamped to `[0, max_value]`.
    pub fn set(&mut self, index: usize, value: f32) {
        let normalized = (value / self.max_value).clamp(0.0, 1.0);
        codec::write_cell(&mut self.data, index, codec::encode(normalized));
    }

    /// Adds to the physical value of a cell (saturating at the range bounds).
    pub fn add(&mut self, index: usize, delta: f32) {
        let value = self.get(index) + delta;
        self.set(index, value);
    }

    /// Sets every cell to `value`.
    pub fn fill(&mut self, value: f32) {
        let normalized = (value / self.max_value).clamp(0.0, 1.0);
        let channels = codec::encode(normalized);
        for cell in self.data.chunks_exact_mut(BYTES_PER_CELL) {
            cell.copy_from_slice(&channels);
        }
    }

    /// Zeroes every cell.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Encoded bytes, four per cell.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the field, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Sum of all physical values at double precision.
    #[must_use]
    pub fn sum_f64(&self) -> f64 {
        (0..self.cell_count()).map(|i| self.get_f64(i)).sum()
    }

    /// Decodes every cell to its physical value.
    #[must_use]
    pub fn to_values(&self) -> Vec<f32> {
        (0..self.cell_count()).map(|i| self.get(i)).collect()
    }
}

/// Two slots of the same resource: one read this tick, one written.
///
/// [`swap`](Self::swap) exchanges the roles and bumps the generation, so
/// after each tick the freshly written slot becomes the front.
#[derive(Debug, Clone)]
pub struct DoubleBuffer<T> {
    front: T,
    back: T,
    generation: u64,
}

impl<T> DoubleBuffer<T> {
    /// Creates a double buffer from two slots.
    pub const fn new(front: T, back: T) -> Self {
        Self {
            front,
            back,
            generation: 0,
        }
    }

    /// The slot holding the last completed state.
    pub const fn front(&self) -> &T {
        &self.front
    }

    /// The slot being written this tick.
    pub const fn back(&self) -> &T {
        &self.back
    }

    /// Mutable access to the front slot.
    pub fn front_mut(&mut self) -> &mut T {
        &mut self.front
    }

    /// Reads the front while writing the back.
    pub fn split_mut(&mut self) -> (&T, &mut T) {
        (&self.front, &mut self.back)
    }

    /// Number of swaps so far.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Which physical slot is the front (0 or 1).
    pub const fn parity(&self) -> usize {
        (self.generation % 2) as usize
    }

    /// Makes the back slot the new front.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
        self.generation += 1;
    }

    /// Applies `f` to both slots.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        f(&mut self.front);
        f(&mut self.back);
    }
}

/// The four outgoing pipe flows of every cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxSet {
    fields: [ScalarField; 4],
}

impl FluxSet {
    /// Creates zeroed fluxes bounded by `max_flux`.
    #[must_use]
    pub fn new(size: u32, max_flux: f32) -> Self {
        Self {
            fields: std::array::from_fn(|_| ScalarField::new(size, max_flux)),
        }
    }

    /// Field for one direction.
    #[must_use]
    pub fn get(&self, direction: Direction) -> &ScalarField {
        &self.fields[direction.slot()]
    }

    /// Mutable field for one direction.
    pub fn get_mut(&mut self, direction: Direction) -> &mut ScalarField {
        &mut self.fields[direction.slot()]
    }

    /// Outgoing flows of one cell, in [`Direction::ALL`] order.
    #[must_use]
    pub fn cell(&self, index: usize) -> [f32; 4] {
        std::array::from_fn(|slot| self.fields[slot].get(index))
    }

    /// Sum of outgoing flows of one cell.
    #[must_use]
    pub fn total(&self, index: usize) -> f32 {
        self.cell(index).iter().sum()
    }

    /// Whether all four directional fields are complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fields.iter().all(ScalarField::is_complete)
    }

    /// Zeroes all flows.
    pub fn clear(&mut self) {
        for field in &mut self.fields {
            field.clear();
        }
    }
}
