//! Frames published to the renderer.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::debug;

/// Fields of one tick, in the packed codec layout (4 bytes per cell, row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutput {
    /// Tick the fields belong to
    pub tick: u64,
    /// Encoded water heights
    pub water: Arc<Vec<u8>>,
    /// Encoded flux summary
    pub flux: Arc<Vec<u8>>,
    /// Total water, rounded to whole m³
    pub total_water: u64,
}

/// Fans frames out to bounded subscriber channels.
///
/// A subscriber that falls behind loses frames; one that hangs up is dropped.
#[derive(Debug)]
pub struct FrameBroadcaster {
    senders: Vec<Sender<FrameOutput>>,
    capacity: usize,
    dropped: u64,
}

impl FrameBroadcaster {
    /// Creates a broadcaster whose channels hold `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Vec::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Opens a new subscription.
    pub fn subscribe(&mut self) -> Receiver<FrameOutput> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        self.senders.push(tx);
        rx
    }

    /// Whether anyone is listening.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.senders.is_empty()
    }

    /// Live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }

    /// Frames not delivered because a subscriber was full.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Sends `frame` to every subscriber without blocking.
    pub fn publish(&mut self, frame: &FrameOutput) {
        let mut dropped = 0;
        self.senders.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        });
        if dropped > 0 {
            debug!("tick {}: {dropped} subscriber(s) full, frame dropped", frame.tick);
            self.dropped += dropped;
        }
    }

    /// Moves the subscriptions of `other` into this broadcaster.
    pub fn adopt(&mut self, other: &mut Self) {
        self.senders.append(&mut other.senders);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tick: u64) -> FrameOutput {
        FrameOutput {
            tick,
            water: Arc::new(vec![0; 4]),
            flux: Arc::new(vec![0; 4]),
            total_water: 0,
        }
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let mut out = FrameBroadcaster::new(2);
        let a = out.subscribe();
        let b = out.subscribe();
        out.publish(&frame(1));
        assert_eq!(a.try_recv().map(|f| f.tick), Ok(1));
        assert_eq!(b.try_recv().map(|f| f.tick), Ok(1));
    }

    #[test]
    fn test_full_subscriber_drops_frames() {
        let mut out = FrameBroadcaster::new(1);
        let rx = out.subscribe();
        out.publish(&frame(1));
        out.publish(&frame(2));
        assert_eq!(out.dropped(), 1);
        assert_eq!(rx.try_recv().map(|f| f.tick), Ok(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnected_subscriber_removed() {
        let mut out = FrameBroadcaster::new(1);
        drop(out.subscribe());
        let _kept = out.subscribe();
        out.publish(&frame(1));
        assert_eq!(out.subscriber_count(), 1);
        assert!(out.has_subscribers());
    }

    #[test]
    fn test_adopt_moves_subscribers() {
        let mut old = FrameBroadcaster::new(1);
        let rx = old.subscribe();
        let mut new = FrameBroadcaster::new(1);
        new.adopt(&mut old);
        assert!(!old.has_subscribers());
        new.publish(&frame(7));
        assert_eq!(rx.try_recv().map(|f| f.tick), Ok(7));
    }
}
