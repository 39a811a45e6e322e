//! Replaying recorded frames in place of a live simulation.
//!
//! A [`PlaybackSession`] ticks a [`FramePlayer`] on the same timer as a live
//! run, measures every frame with the mass accountant and publishes it like
//! a simulated one.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use deluge_common::{DelugeError, DelugeResult};
use deluge_kernel::mass::{MassAccountant, SimulationInfo};
use deluge_kernel::playback::{frame_len, FramePlayer};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::SimulationConfig;
use crate::output::{FrameBroadcaster, FrameOutput};
use crate::timing::TickTimer;

struct PlaybackCore {
    player: FramePlayer,
    accountant: MassAccountant,
    info: SimulationInfo,
    blank_flux: Arc<Vec<u8>>,
    output: FrameBroadcaster,
    ticks: u64,
    finished: bool,
}

impl PlaybackCore {
    fn step(&mut self) -> bool {
        let frame = match self.player.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if !self.finished {
                    info!("Playback finished after {} frames", self.ticks);
                    self.finished = true;
                }
                return false;
            },
            Err(e) => {
                error!("Playback stopped after {} frames: {e}", self.ticks);
                self.finished = true;
                return false;
            },
        };
        self.ticks += 1;

        let water = frame.water.into_bytes();
        let report = self.accountant.record(self.ticks, &water, false);
        self.info.tick = self.ticks;
        self.info.total_water = report.total_water();
        self.info.volume = report.volume;
        self.info.wet_cells = report.wet_cells;
        self.info.water = water;

        if self.output.has_subscribers() {
            self.output.publish(&FrameOutput {
                tick: self.ticks,
                water: Arc::new(self.info.water.clone()),
                flux: Arc::clone(&self.blank_flux),
                total_water: self.info.total_water,
            });
        }
        true
    }
}

/// Replays a recording on a timer.
pub struct PlaybackSession {
    core: Arc<Mutex<PlaybackCore>>,
    timer: TickTimer,
}

impl PlaybackSession {
    /// Wraps a player; grid size, height range, cell size and period come from `config`.
    #[must_use]
    pub fn new(mut player: FramePlayer, config: &SimulationConfig) -> Self {
        player.set_looping(config.playback_loop);
        let params = config.to_params();
        let len = frame_len(player.grid_size());
        let core = PlaybackCore {
            accountant: MassAccountant::new(params.max_height, params.cell_size, 0),
            info: SimulationInfo {
                flux: vec![0; len],
                ..Default::default()
            },
            blank_flux: Arc::new(vec![0; len]),
            output: FrameBroadcaster::new(config.frame_channel_capacity),
            ticks: 0,
            finished: false,
            player,
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            timer: TickTimer::new(config.interval()),
        }
    }

    /// Loads the recording in `config.playback_dir`.
    pub fn open(config: &SimulationConfig) -> DelugeResult<Self> {
        let dir = config
            .playback_dir
            .as_deref()
            .ok_or_else(|| DelugeError::Config("playback_dir is not set".to_string()))?;
        let params = config.to_params();
        let player = FramePlayer::from_dir(dir, config.grid().size(), params.max_height)?;
        info!("Playing {} frames from {}", player.len(), dir.display());
        Ok(Self::new(player, config))
    }

    /// Advances one frame on the calling thread. Returns `false` at the end.
    pub fn step(&self) -> bool {
        self.core.lock().step()
    }

    /// Starts replaying one frame per interval. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        let core = Arc::clone(&self.core);
        self.timer.start(move || core.lock().step());
    }

    /// Stops the timer.
    pub fn stop(&mut self) {
        self.timer.stop();
    }

    /// Whether frames are being replayed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Whether the last frame has been played (never true when looping).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.lock().finished
    }

    /// Starts again from the first frame.
    pub fn rewind(&self) {
        let mut core = self.core.lock();
        core.player.rewind();
        core.finished = false;
    }

    /// State after the latest frame.
    #[must_use]
    pub fn info(&self) -> SimulationInfo {
        self.core.lock().info.clone()
    }

    /// Receives every subsequent frame.
    pub fn subscribe(&self) -> Receiver<FrameOutput> {
        self.core.lock().output.subscribe()
    }
}
