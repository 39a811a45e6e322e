//! Ground elevation sources.
//!
//! Terrain is sampled once per run at every cell center and stored as a
//! [`ScalarField`] against the run's `max_height`.

use std::path::{Path, PathBuf};

use deluge_common::{CellIndex, DelugeError, DelugeResult, GeoPoint};
use deluge_kernel::field::ScalarField;
use deluge_kernel::grid::SimulationGrid;
use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where a cell center sits, geographically and on the unit square of the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainSample {
    /// Geographic position of the cell center
    pub point: GeoPoint,
    /// West-to-east position in `[0, 1]`
    pub u: f64,
    /// South-to-north position in `[0, 1]`
    pub v: f64,
}

/// Supplies ground elevation (m) for the grid.
pub trait TerrainSource: Send + Sync {
    /// Elevation at a cell center.
    fn elevation(&self, sample: &TerrainSample) -> f32;
}

/// Level ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatTerrain {
    /// Elevation (m)
    pub elevation: f32,
}

impl FlatTerrain {
    /// Creates level ground at `elevation` m.
    #[must_use]
    pub const fn new(elevation: f32) -> Self {
        Self { elevation }
    }
}

impl TerrainSource for FlatTerrain {
    fn elevation(&self, _sample: &TerrainSample) -> f32 {
        self.elevation
    }
}

/// A grayscale image stretched over the grid extent.
///
/// Row 0 of the image is the northern edge. Black maps to `min_elevation`,
/// white to `max_elevation`.
#[derive(Debug, Clone)]
pub struct HeightmapTerrain {
    pixels: ImageBuffer<Luma<u16>, Vec<u16>>,
    min_elevation: f32,
    max_elevation: f32,
}

impl HeightmapTerrain {
    /// Wraps decoded pixels.
    #[must_use]
    pub fn new(
        pixels: ImageBuffer<Luma<u16>, Vec<u16>>,
        min_elevation: f32,
        max_elevation: f32,
    ) -> Self {
        Self {
            pixels,
            min_elevation,
            max_elevation,
        }
    }

    /// Loads any image the `image` crate can decode and converts it to 16-bit luma.
    pub fn load<P: AsRef<Path>>(
        path: P,
        min_elevation: f32,
        max_elevation: f32,
    ) -> DelugeResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DelugeError::Terrain(format!(
                "heightmap not found: {}",
                path.display()
            )));
        }

        let file_data = std::fs::read(path)?;
        let img = image::load_from_memory(&file_data)
            .map_err(|e| DelugeError::Terrain(format!("{}: {e}", path.display())))?;
        let pixels = img.to_luma16();
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(DelugeError::Terrain(format!(
                "heightmap {} is empty",
                path.display()
            )));
        }

        info!(
            "Loaded {width}x{height} heightmap from {} ({min_elevation}..{max_elevation} m)",
            path.display()
        );
        Ok(Self::new(pixels, min_elevation, max_elevation))
    }
}

impl TerrainSource for HeightmapTerrain {
    fn elevation(&self, sample: &TerrainSample) -> f32 {
        let (width, height) = self.pixels.dimensions();
        if width == 0 || height == 0 {
            return self.min_elevation;
        }
        let x = (sample.u.clamp(0.0, 1.0) * f64::from(width)) as u32;
        let y = ((1.0 - sample.v.clamp(0.0, 1.0)) * f64::from(height)) as u32;
        let luma = self.pixels.get_pixel(x.min(width - 1), y.min(height - 1))[0];
        let t = f32::from(luma) / f32::from(u16::MAX);
        self.min_elevation + t * (self.max_elevation - self.min_elevation)
    }
}

/// Terrain selection in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerrainConfig {
    /// Level ground
    Flat {
        /// Elevation (m)
        elevation: f32,
    },
    /// Grayscale image
    Heightmap {
        /// Image file
        path: PathBuf,
        /// Elevation of black (m)
        min_elevation: f32,
        /// Elevation of white (m)
        max_elevation: f32,
    },
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self::Flat { elevation: 0.0 }
    }
}

impl TerrainConfig {
    /// Builds the configured source.
    pub fn load(&self) -> DelugeResult<Box<dyn TerrainSource>> {
        match self {
            Self::Flat { elevation } => Ok(Box::new(FlatTerrain::new(*elevation))),
            Self::Heightmap {
                path,
                min_elevation,
                max_elevation,
            } => Ok(Box::new(HeightmapTerrain::load(
                path,
                *min_elevation,
                *max_elevation,
            )?)),
        }
    }
}

/// Samples `source` at every cell center of `grid`.
#[must_use]
pub fn build_terrain_field(
    grid: &SimulationGrid,
    source: &dyn TerrainSource,
    max_height: f32,
) -> ScalarField {
    let size = grid.size();
    let mut field = ScalarField::new(size, max_height);
    let mut clamped = 0usize;

    for index in 0..grid.cell_count() {
        let cell = CellIndex::new(index as u32);
        let Some(point) = grid.cell_center_position(cell) else {
            continue;
        };
        let coord = grid.cell_coords(cell);
        let sample = TerrainSample {
            point,
            u: (f64::from(coord.x) + 0.5) / f64::from(size),
            v: (f64::from(coord.y) + 0.5) / f64::from(size),
        };
        let elevation = source.elevation(&sample);
        if !(0.0..=max_height).contains(&elevation) {
            clamped += 1;
        }
        field.set(index, elevation);
    }

    if clamped > 0 {
        warn!("{clamped} terrain cells outside 0..{max_height} m were clamped");
    }
    debug!("Built {size}x{size} terrain field");
    field
}
