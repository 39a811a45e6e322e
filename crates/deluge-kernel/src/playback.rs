//! Recording and replaying encoded water frames.
//!
//! A frame is the raw water field of one tick: `grid_size² · 4` bytes in
//! the codec layout. Recordings are directories of `frame_NNNNNN.bin` files.

use std::fs;
use std::path::{Path, PathBuf};

use deluge_common::{DelugeResult, PlaybackError};
use tracing::{debug, info};

use crate::codec::BYTES_PER_CELL;
use crate::field::ScalarField;

/// File extension of recorded frames.
pub const FRAME_EXTENSION: &str = "bin";

/// Expected byte length of one frame.
#[must_use]
pub fn frame_len(grid_size: u32) -> usize {
    grid_size as usize * grid_size as usize * BYTES_PER_CELL
}

fn check_len(frame: usize, grid_size: u32, actual: usize) -> Result<(), PlaybackError> {
    let expected = frame_len(grid_size);
    if actual == expected {
        Ok(())
    } else {
        Err(PlaybackError::FrameLength {
            frame,
            expected,
            actual,
        })
    }
}

/// Writes sequential frames into a directory.
#[derive(Debug)]
pub struct FrameWriter {
    dir: PathBuf,
    grid_size: u32,
    next: usize,
}

impl FrameWriter {
    /// Creates the directory if needed.
    pub fn create(dir: impl Into<PathBuf>, grid_size: u32) -> DelugeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("recording frames to {}", dir.display());
        Ok(Self {
            dir,
            grid_size,
            next: 0,
        })
    }

    /// Writes one frame and returns its path.
    pub fn write(&mut self, frame: &[u8]) -> DelugeResult<PathBuf> {
        check_len(self.next, self.grid_size, frame.len())?;
        let path = self
            .dir
            .join(format!("frame_{:06}.{FRAME_EXTENSION}", self.next));
        fs::write(&path, frame)?;
        self.next += 1;
        Ok(path)
    }

    /// Frames written so far.
    #[must_use]
    pub const fn frames_written(&self) -> usize {
        self.next
    }
}

/// One replayed frame.
#[derive(Debug, Clone)]
pub struct PlaybackFrame {
    /// Position in the recording
    pub index: usize,
    /// Decoded water field
    pub water: ScalarField,
}

/// Where a player's frames live.
#[derive(Debug, Clone)]
enum FrameStore {
    Memory(Vec<Vec<u8>>),
    /// Read one at a time as they are played
    Files(Vec<PathBuf>),
}

impl FrameStore {
    fn len(&self) -> usize {
        match self {
            Self::Memory(frames) => frames.len(),
            Self::Files(paths) => paths.len(),
        }
    }
}

/// Replays a validated sequence of frames.
#[derive(Debug, Clone)]
pub struct FramePlayer {
    grid_size: u32,
    max_height: f32,
    store: FrameStore,
    cursor: usize,
    looping: bool,
}

impl FramePlayer {
    /// Builds a player from in-memory frames; every frame must be `grid_size² · 4` bytes.
    pub fn from_frames(
        grid_size: u32,
        max_height: f32,
        frames: Vec<Vec<u8>>,
    ) -> DelugeResult<Self> {
        if frames.is_empty() {
            return Err(PlaybackError::Empty("frame list".to_string()).into());
        }
        for (i, frame) in frames.iter().enumerate() {
            check_len(i, grid_size, frame.len())?;
        }
        Ok(Self::with_store(grid_size, max_height, FrameStore::Memory(frames)))
    }

    /// Opens every `.bin` file of a directory in file-name order.
    ///
    /// Lengths are checked against the file sizes up front; frame data is
    /// only read when the frame is played.
    pub fn from_dir(dir: &Path, grid_size: u32, max_height: f32) -> DelugeResult<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == FRAME_EXTENSION))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(PlaybackError::Empty(dir.display().to_string()).into());
        }
        for (i, path) in paths.iter().enumerate() {
            let len = usize::try_from(fs::metadata(path)?.len()).unwrap_or(usize::MAX);
            check_len(i, grid_size, len)?;
        }
        debug!("found {} frames in {}", paths.len(), dir.display());
        Ok(Self::with_store(grid_size, max_height, FrameStore::Files(paths)))
    }

    fn with_store(grid_size: u32, max_height: f32, store: FrameStore) -> Self {
        Self {
            grid_size,
            max_height,
            store,
            cursor: 0,
            looping: false,
        }
    }

    /// Restart from the first frame after the last one.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Always false for a constructed player.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Cells per edge.
    #[must_use]
    pub const fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Rewinds to the first frame.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Returns the next frame, or `None` at the end when not looping.
    ///
    /// Fails when a recorded file can no longer be read or has changed length.
    pub fn next_frame(&mut self) -> DelugeResult<Option<PlaybackFrame>> {
        if self.cursor >= self.store.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let index = self.cursor;
        let bytes = match &self.store {
            FrameStore::Memory(frames) => frames[index].clone(),
            FrameStore::Files(paths) => {
                let bytes = fs::read(&paths[index])?;
                check_len(index, self.grid_size, bytes.len())?;
                bytes
            },
        };
        self.cursor += 1;
        Ok(Some(PlaybackFrame {
            index,
            water: ScalarField::from_bytes(self.grid_size, self.max_height, bytes),
        }))
    }
}
