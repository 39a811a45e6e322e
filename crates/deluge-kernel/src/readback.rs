//! GPU→CPU transfer of each tick's output fields.
//!
//! Two staging slots alternate. In [`ReadbackMode::Blocking`] a tick maps the
//! slot it just filled and waits, so the returned frame is the current one.
//! In [`ReadbackMode::Pipelined`] a tick maps the slot filled by the previous
//! tick instead, trading one tick of latency for not stalling on the copy
//! that was just submitted.

use deluge_common::GpuError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wgpu::{Buffer, BufferUsages, CommandEncoder, Device, MapMode};

/// How tick outputs are brought back to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadbackMode {
    /// Wait for the current tick
    #[default]
    Blocking,
    /// Return the previous tick's output
    Pipelined,
}

/// State of one staging slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackStatus {
    /// Holds nothing pending
    Idle,
    /// A copy into the slot has been recorded
    Submitted,
}

/// Output of one tick on the CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadbackFrame {
    /// Tick the data belongs to
    pub tick: u64,
    /// Encoded water heights
    pub water: Vec<u8>,
    /// Encoded flux summary
    pub flux: Vec<u8>,
}

#[derive(Debug)]
struct StagingSlot {
    water: Buffer,
    flux: Buffer,
    status: ReadbackStatus,
    tick: u64,
}

impl StagingSlot {
    fn new(device: &Device, byte_len: u64, index: usize) -> Self {
        let staging = |what: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("Staging {what} {index}")),
                size: byte_len,
                usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        };
        Self {
            water: staging("Water"),
            flux: staging("Flux"),
            status: ReadbackStatus::Idle,
            tick: 0,
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadbackStats {
    /// Copies recorded
    pub submitted: u64,
    /// Frames returned
    pub completed: u64,
    /// Mapping failures
    pub failed: u64,
}

/// Double-buffered staging for tick outputs.
#[derive(Debug)]
pub struct ReadbackRing {
    slots: [StagingSlot; 2],
    mode: ReadbackMode,
    byte_len: u64,
    current: usize,
    stats: ReadbackStats,
}

impl ReadbackRing {
    /// Creates staging for fields of `byte_len` bytes.
    pub fn new(device: &Device, byte_len: u64, mode: ReadbackMode) -> Self {
        Self {
            slots: [
                StagingSlot::new(device, byte_len, 0),
                StagingSlot::new(device, byte_len, 1),
            ],
            mode,
            byte_len,
            current: 0,
            stats: ReadbackStats::default(),
        }
    }

    /// Records copies of this tick's outputs into the next slot.
    pub fn record_copy(
        &mut self,
        encoder: &mut CommandEncoder,
        water: &Buffer,
        flux: &Buffer,
        tick: u64,
    ) {
        self.current = (self.current + 1) % self.slots.len();
        let slot = &mut self.slots[self.current];
        encoder.copy_buffer_to_buffer(water, 0, &slot.water, 0, self.byte_len);
        encoder.copy_buffer_to_buffer(flux, 0, &slot.flux, 0, self.byte_len);
        slot.status = ReadbackStatus::Submitted;
        slot.tick = tick;
        self.stats.submitted += 1;
    }

    /// Maps the slot selected by the mode. Call after the copy is submitted.
    ///
    /// Returns `Ok(None)` when pipelined and no earlier tick is pending.
    pub fn collect(&mut self, device: &Device) -> Result<Option<ReadbackFrame>, GpuError> {
        let index = match self.mode {
            ReadbackMode::Blocking => self.current,
            ReadbackMode::Pipelined => (self.current + 1) % self.slots.len(),
        };
        let slot = &mut self.slots[index];
        if slot.status != ReadbackStatus::Submitted {
            return Ok(None);
        }
        slot.status = ReadbackStatus::Idle;
        match map_pair(device, &slot.water, &slot.flux) {
            Ok((water, flux)) => {
                self.stats.completed += 1;
                debug!("read back tick {}", slot.tick);
                Ok(Some(ReadbackFrame {
                    tick: slot.tick,
                    water,
                    flux,
                }))
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!("readback of tick {} failed: {e}", slot.tick);
                Err(e)
            }
        }
    }

    /// Forgets pending copies.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.status = ReadbackStatus::Idle;
        }
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> ReadbackStats {
        self.stats
    }
}

/// Maps both buffers, waits, copies them out and unmaps.
fn map_pair(
    device: &Device,
    water: &Buffer,
    flux: &Buffer,
) -> Result<(Vec<u8>, Vec<u8>), GpuError> {
    let (tx, rx) = std::sync::mpsc::channel();
    for (slot, buffer) in [water, flux].into_iter().enumerate() {
        let tx = tx.clone();
        buffer.slice(..).map_async(MapMode::Read, move |result| {
            let _ = tx.send((slot, result));
        });
    }
    drop(tx);
    device.poll(wgpu::Maintain::Wait);

    let mut mapped = [false; 2];
    let mut failure = None;
    for (slot, result) in rx.try_iter() {
        match result {
            Ok(()) => mapped[slot] = true,
            Err(e) => failure = Some(GpuError::MapFailed(e.to_string())),
        }
    }

    let buffers = [water, flux];
    if failure.is_some() || mapped.contains(&false) {
        for (buffer, was_mapped) in buffers.iter().zip(mapped) {
            if was_mapped {
                buffer.unmap();
            }
        }
        return Err(failure
            .unwrap_or_else(|| GpuError::MapFailed("mapping callback never ran".to_string())));
    }

    let [water_bytes, flux_bytes] = buffers.map(|buffer| {
        let bytes = buffer.slice(..).get_mapped_range().to_vec();
        buffer.unmap();
        bytes
    });
    Ok((water_bytes, flux_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::tests::create_test_context;
    use wgpu::util::DeviceExt;

    fn source(device: &Device, fill: u8) -> Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Readback Source"),
            contents: &[fill; 64],
            usage: BufferUsages::COPY_SRC,
        })
    }

    #[test]
    fn test_mode_default_is_blocking() {
        assert_eq!(ReadbackMode::default(), ReadbackMode::Blocking);
        assert_eq!(ReadbackStats::default().completed, 0);
    }

    #[test]
    fn test_blocking_returns_current_tick() {
        let Some((device, queue)) = create_test_context() else {
            return;
        };
        let mut ring = ReadbackRing::new(&device, 64, ReadbackMode::Blocking);
        let (water, flux) = (source(&device, 7), source(&device, 9));
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        ring.record_copy(&mut encoder, &water, &flux, 1);
        queue.submit(std::iter::once(encoder.finish()));

        let frame = ring.collect(&device).expect("map").expect("frame");
        assert_eq!(frame.tick, 1);
        assert!(frame.water.iter().all(|&b| b == 7));
        assert!(frame.flux.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_pipelined_lags_one_tick() {
        let Some((device, queue)) = create_test_context() else {
            return;
        };
        let mut ring = ReadbackRing::new(&device, 64, ReadbackMode::Pipelined);
        let (water, flux) = (source(&device, 1), source(&device, 2));

        let mut ticks = Vec::new();
        for tick in 1..=3 {
            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
            ring.record_copy(&mut encoder, &water, &flux, tick);
            queue.submit(std::iter::once(encoder.finish()));
            ticks.push(ring.collect(&device).expect("map").map(|f| f.tick));
        }
        assert_eq!(ticks, vec![None, Some(1), Some(2)]);
    }
}
