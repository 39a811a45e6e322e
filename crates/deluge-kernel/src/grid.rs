//! Simulation grid geometry.
//!
//! The grid is an N×N square of cells laid on the east-north tangent plane of
//! its center point. Cell `(x, y)` covers the plane square
//! `[x·cs − half, (x+1)·cs − half) × [y·cs − half, (y+1)·cs − half)` where
//! `half = N·cs/2`. Index 0 is the south-west corner and indices run
//! row-major (`x + y·N`), so rows grow northward. A geographic point maps
//! to the plane along its ellipsoid normal.

use deluge_common::{CellIndex, Extent, GeoPoint, GridCoord, TangentFrame};
use tracing::warn;

/// Smallest grid edge accepted; smaller requests are raised to this.
pub const MIN_GRID_SIZE: u32 = 8;

/// Largest grid edge accepted; larger requests are lowered to this.
pub const MAX_GRID_SIZE: u32 = 4096;

/// Smallest cell edge (m) accepted; smaller requests are raised to this.
pub const MIN_CELL_SIZE: f64 = 1.0;

/// Distance (in cells) under which a coordinate is snapped onto a cell boundary.
const BOUNDARY_SNAP: f64 = 1e-6;

/// Slack (degrees, about 1 µm) on the reference scan's cell boxes.
const SCAN_MARGIN_DEG: f64 = 1e-11;

/// One of the four pipe directions between neighbouring cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Toward `y + 1` (north)
    Up,
    /// Toward `y − 1` (south)
    Down,
    /// Toward `x − 1` (west)
    Left,
    /// Toward `x + 1` (east)
    Right,
}

impl Direction {
    /// All directions, in flux-channel order.
    pub const ALL: [Self; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    /// Position of this direction in [`Direction::ALL`].
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
        }
    }

    /// The direction pointing back.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Cell offset `(dx, dy)`.
    #[must_use]
    pub const fn offset(self) -> (i64, i64) {
        match self {
            Self::Up => (0, 1),
            Self::Down => (0, -1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }
}

/// Geometry of one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationGrid {
    size: u32,
    cell_size: f64,
    frame: TangentFrame,
    extent: Extent,
}

impl SimulationGrid {
    /// Creates a grid centered on `(center_lon, center_lat)`.
    ///
    /// `size` outside [`MIN_GRID_SIZE`]..=[`MAX_GRID_SIZE`] and `cell_size`
    /// below [`MIN_CELL_SIZE`] are clamped with a warning.
    #[must_use]
    pub fn new(center_lon: f64, center_lat: f64, size: u32, cell_size: f64) -> Self {
        let size = clamp_grid_size(size);
        let cell_size = clamp_cell_size(cell_size);
        let frame = TangentFrame::new(GeoPoint::surface(center_lon, center_lat));
        let extent = frame.square_extent(half_width(size, cell_size));
        Self {
            size,
            cell_size,
            frame,
            extent,
        }
    }

    /// Cells per edge.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Cell edge length (m).
    #[must_use]
    pub const fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.size as usize * self.size as usize
    }

    /// Grid center on the ellipsoid.
    #[must_use]
    pub const fn center(&self) -> GeoPoint {
        self.frame.anchor()
    }

    /// Geographic bounding rectangle of the grid.
    #[must_use]
    pub const fn extent(&self) -> Extent {
        self.extent
    }

    /// Tangent frame the grid lives on.
    #[must_use]
    pub const fn frame(&self) -> &TangentFrame {
        &self.frame
    }

    /// Half the grid edge (m).
    #[must_use]
    pub fn half_width(&self) -> f64 {
        half_width(self.size, self.cell_size)
    }

    /// Whether `index` addresses a cell of this grid.
    #[must_use]
    pub fn contains(&self, index: CellIndex) -> bool {
        index.as_usize() < self.cell_count()
    }

    /// Row-major index of `(x, y)`.
    #[must_use]
    pub const fn cell_index(&self, x: u32, y: u32) -> CellIndex {
        GridCoord::new(x, y).to_index(self.size)
    }

    /// Coordinates of `index`.
    #[must_use]
    pub const fn cell_coords(&self, index: CellIndex) -> GridCoord {
        GridCoord::from_index(index, self.size)
    }

    /// Neighbour of `coord` in `direction`, or `None` past the grid edge.
    #[must_use]
    pub fn neighbour(&self, coord: GridCoord, direction: Direction) -> Option<GridCoord> {
        let (dx, dy) = direction.offset();
        self.offset_coord(coord, dx, dy)
    }

    fn offset_coord(&self, coord: GridCoord, dx: i64, dy: i64) -> Option<GridCoord> {
        let x = i64::from(coord.x) + dx;
        let y = i64::from(coord.y) + dy;
        let n = i64::from(self.size);
        ((0..n).contains(&x) && (0..n).contains(&y)).then(|| GridCoord::new(x as u32, y as u32))
    }

    /// Plane offset (east, north) of the south-west corner of cell `(x, y)`.
    ///
    /// `x` and `y` may equal the grid size to address the far edges.
    #[must_use]
    pub fn corner_offset(&self, x: u32, y: u32) -> (f64, f64) {
        let half = self.half_width();
        (
            f64::from(x) * self.cell_size - half,
            f64::from(y) * self.cell_size - half,
        )
    }

    /// Geographic position of the center of cell `index`.
    #[must_use]
    pub fn cell_center_position(&self, index: CellIndex) -> Option<GeoPoint> {
        if !self.contains(index) {
            return None;
        }
        let coord = self.cell_coords(index);
        let (east, north) = self.corner_offset(coord.x, coord.y);
        let half_cell = self.cell_size * 0.5;
        Some(
            self.frame
                .local_to_geodetic(east + half_cell, north + half_cell),
        )
    }

    /// Finds the cell containing `(lon, lat)` by inverting the plane mapping.
    ///
    /// Cells are half-open; a point on a shared edge belongs to the cell to
    /// its east or north. Returns `None` outside the grid.
    #[must_use]
    pub fn find_cell_from_degree(&self, lon: f64, lat: f64) -> Option<CellIndex> {
        let (east, north) = self.frame.geodetic_to_local(GeoPoint::surface(lon, lat));
        let half = self.half_width();
        let x = self.axis_cell((east + half) / self.cell_size)?;
        let y = self.axis_cell((north + half) / self.cell_size)?;
        Some(self.cell_index(x, y))
    }

    /// Reference locator: scans cells from the north-east corner and returns
    /// the first whose geographic box (bounding its four corners) contains
    /// the point.
    ///
    /// Scanning north-east first gives boundary points to the same cell as
    /// [`find_cell_from_degree`](Self::find_cell_from_degree). Quadratic in
    /// the grid size and only exact while cells are small against the earth
    /// radius; kept for cross-checking.
    #[must_use]
    pub fn find_cell_from_degree_scan(&self, lon: f64, lat: f64) -> Option<CellIndex> {
        for y in (0..self.size).rev() {
            for x in (0..self.size).rev() {
                let corners = [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)];
                let cell_box = Extent::from_points(corners.iter().map(|&(cx, cy)| {
                    let (east, north) = self.corner_offset(cx, cy);
                    self.frame.local_to_geodetic(east, north)
                }));
                if cell_box.expanded(SCAN_MARGIN_DEG).contains(lon, lat) {
                    return Some(self.cell_index(x, y));
                }
            }
        }
        None
    }

    /// Cells of the `(2·area + 1)²` square centered on `center`, clipped to the grid.
    pub fn square(&self, center: CellIndex, area: u32) -> impl Iterator<Item = CellIndex> + '_ {
        let c = self.cell_coords(center);
        let a = i64::from(area);
        let in_grid = self.contains(center);
        (-a..=a)
            .flat_map(move |dy| (-a..=a).map(move |dx| (dx, dy)))
            .filter(move |_| in_grid)
            .filter_map(move |(dx, dy)| self.offset_coord(c, dx, dy))
            .map(move |coord| coord.to_index(self.size))
    }

    fn axis_cell(&self, f: f64) -> Option<u32> {
        let nearest = f.round();
        let f = if (f - nearest).abs() < BOUNDARY_SNAP {
            nearest
        } else {
            f
        };
        (f >= 0.0 && f < f64::from(self.size)).then(|| f.floor() as u32)
    }
}

/// Geographic extent of a grid without building it.
#[must_use]
pub fn calc_extent(center_lon: f64, center_lat: f64, size: u32, cell_size: f64) -> Extent {
    let frame = TangentFrame::new(GeoPoint::surface(center_lon, center_lat));
    frame.square_extent(half_width(
        clamp_grid_size(size),
        clamp_cell_size(cell_size),
    ))
}

fn half_width(size: u32, cell_size: f64) -> f64 {
    f64::from(size) * cell_size * 0.5
}

fn clamp_grid_size(size: u32) -> u32 {
    if size < MIN_GRID_SIZE {
        warn!("grid_size {} below minimum, using {}", size, MIN_GRID_SIZE);
        MIN_GRID_SIZE
    } else if size > MAX_GRID_SIZE {
        warn!("grid_size {} above maximum, using {}", size, MAX_GRID_SIZE);
        MAX_GRID_SIZE
    } else {
        size
    }
}

fn clamp_cell_size(cell_size: f64) -> f64 {
    if cell_size.is_finite() && cell_size >= MIN_CELL_SIZE {
        cell_size
    } else {
        warn!(
            "cell_size {} below minimum, using {}",
            cell_size, MIN_CELL_SIZE
        );
        MIN_CELL_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(size: u32) -> SimulationGrid {
        SimulationGrid::new(116.39, 39.9, size, 1.0)
    }

    #[test]
    fn test_clamps_small_inputs() {
        let g = SimulationGrid::new(0.0, 0.0, 2, 0.25);
        assert_eq!(g.size(), MIN_GRID_SIZE);
        assert_eq!(g.cell_size(), MIN_CELL_SIZE);
        assert_eq!(g.cell_count(), 64);
        assert_eq!(calc_extent(0.0, 0.0, 70_000, 1.0), calc_extent(0.0, 0.0, MAX_GRID_SIZE, 1.0));
    }

    #[test]
    fn test_center_resolves_to_upper_middle_cell() {
        for size in [8, 16, 64, 512] {
            let g = grid(size);
            let c = g.center();
            let index = g.find_cell_from_degree(c.lon, c.lat);
            assert_eq!(
                index,
                Some(CellIndex::new(size * size / 2 + size / 2)),
                "size {size}"
            );
        }
    }

    #[test]
    fn test_outside_extent_is_none() {
        let g = grid(16);
        let e = g.extent();
        assert_eq!(g.find_cell_from_degree(e.max_lon + 0.01, e.center().lat), None);
        assert_eq!(g.find_cell_from_degree(e.center().lon, e.min_lat - 0.01), None);
        assert_eq!(g.find_cell_from_degree_scan(e.max_lon + 0.01, e.center().lat), None);
    }

    #[test]
    fn test_cell_center_round_trip() {
        let g = grid(32);
        for raw in [0, 1, 31, 32, 500, 1023] {
            let index = CellIndex::new(raw);
            let p = g.cell_center_position(index);
            let p = p.map(|p| g.find_cell_from_degree(p.lon, p.lat));
            assert_eq!(p, Some(Some(index)));
        }
        assert!(g.cell_center_position(CellIndex::new(1024)).is_none());
    }

    #[test]
    fn test_scan_agrees_with_inverse_at_cell_centers() {
        let g = grid(12);
        for raw in 0..144 {
            let index = CellIndex::new(raw);
            let Some(p) = g.cell_center_position(index) else {
                panic!("missing center for {index}");
            };
            assert_eq!(g.find_cell_from_degree_scan(p.lon, p.lat), Some(index));
        }
    }

    #[test]
    fn test_shared_edges_belong_to_east_or_north_cell() {
        let g = grid(12);
        let half_cell = g.cell_size() * 0.5;
        let at = |east: f64, north: f64| g.frame().local_to_geodetic(east, north);
        for y in 1..12 {
            for x in 1..12 {
                let expected = Some(g.cell_index(x, y));
                let (e0, n0) = g.corner_offset(x, y);
                for (what, p) in [
                    ("corner", at(e0, n0)),
                    ("west edge", at(e0, n0 + half_cell)),
                    ("south edge", at(e0 + half_cell, n0)),
                ] {
                    assert_eq!(
                        g.find_cell_from_degree(p.lon, p.lat),
                        expected,
                        "{what} of ({x}, {y})"
                    );
                    assert_eq!(
                        g.find_cell_from_degree_scan(p.lon, p.lat),
                        expected,
                        "scan, {what} of ({x}, {y})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_cell_center_round_trip_on_large_grids() {
        for (cell_size, lat) in [(50.0, 45.0), (100.0, 45.0), (100.0, -60.0)] {
            let g = SimulationGrid::new(0.0, lat, 4096, cell_size);
            for (x, y) in [(0, 0), (4095, 4095), (4095, 2048), (0, 4095), (4095, 0), (2048, 2048)] {
                let index = g.cell_index(x, y);
                let Some(p) = g.cell_center_position(index) else {
                    panic!("missing center for ({x}, {y})");
                };
                assert_eq!(
                    g.find_cell_from_degree(p.lon, p.lat),
                    Some(index),
                    "({x}, {y}) on a {cell_size} m grid at {lat}"
                );
            }
        }
    }

    #[test]
    fn test_index_zero_is_south_west() {
        let g = grid(16);
        let (Some(sw), Some(ne)) = (
            g.cell_center_position(CellIndex::new(0)),
            g.cell_center_position(CellIndex::new(255)),
        ) else {
            panic!("corner cells must exist");
        };
        assert!(sw.lon < ne.lon);
        assert!(sw.lat < ne.lat);
    }

    #[test]
    fn test_neighbour_directions() {
        let g = grid(8);
        let c = GridCoord::new(0, 7);
        assert_eq!(g.neighbour(c, Direction::Up), None);
        assert_eq!(g.neighbour(c, Direction::Left), None);
        assert_eq!(g.neighbour(c, Direction::Down), Some(GridCoord::new(0, 6)));
        assert_eq!(g.neighbour(c, Direction::Right), Some(GridCoord::new(1, 7)));
        for d in Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(Direction::ALL[d.slot()], d);
        }
    }

    #[test]
    fn test_square_is_clipped_in_two_dimensions() {
        let g = grid(8);
        let center: Vec<_> = g.square(g.cell_index(4, 4), 1).collect();
        assert_eq!(center.len(), 9);

        // Corner cell: only the in-grid quarter survives, no wrap onto other rows.
        let corner: Vec<_> = g.square(g.cell_index(7, 0), 1).collect();
        assert_eq!(corner.len(), 4);
        for index in corner {
            let c = g.cell_coords(index);
            assert!(c.x >= 6 && c.y <= 1);
        }

        assert_eq!(g.square(CellIndex::new(64), 1).count(), 0);
    }

    #[test]
    fn test_calc_extent_matches_grid() {
        let g = SimulationGrid::new(10.0, 45.0, 128, 2.0);
        assert_eq!(calc_extent(10.0, 45.0, 128, 2.0), g.extent());
        assert!(g.extent().contains(10.0, 45.0));
        assert!(g.extent().width() > 0.0);
    }
}
