//! This module contains the capture history

// Every completed spectrum lands here. The receive thread is the only writer,
// the UI side reads snapshots. Slots are overwritten strictly by position, so
// reading a channel across the history gives you buffer order, not time order.

use std::sync::Arc;

use crate::error::{Error, Result};

/// One completed spectrometer reading, one intensity per channel.
/// Cheap to clone, so readers can take it out from under the lock.
pub type Capture = Arc<[f32]>;

fn empty_capture() -> Capture {
    Arc::from(Vec::new())
}

#[derive(Debug, Clone)]
pub struct CaptureRingBuffer {
    slots: Vec<Capture>,
    cursor: usize,
    written: usize,
}

impl CaptureRingBuffer {
    /// Build a ring with `capacity` empty slots
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidHistory);
        }
        Ok(Self {
            slots: vec![empty_capture(); capacity],
            cursor: 0,
            written: 0,
        })
    }

    /// Overwrite the slot under the cursor and advance it
    pub fn insert(&mut self, capture: Capture) {
        self.slots[self.cursor] = capture;
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.written < self.slots.len() {
            self.written += 1;
        }
    }

    /// The most recent capture, or a zero-length one if nothing was inserted yet
    pub fn latest(&self) -> Capture {
        let idx = (self.cursor + self.slots.len() - 1) % self.slots.len();
        self.slots[idx].clone()
    }

    /// The value at `channel` for every slot, in slot order
    pub fn channel_series(&self, channel: usize) -> Result<Vec<f32>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot, capture)| {
                capture
                    .get(channel)
                    .copied()
                    .ok_or(Error::NotReady { channel, slot })
            })
            .collect()
    }

    /// Per-slot mean over several channels
    pub fn averaged_series(&self, channels: &[usize]) -> Result<Vec<f32>> {
        if channels.is_empty() {
            return Err(Error::NoChannels);
        }
        let mut acc = vec![0f32; self.slots.len()];
        for &channel in channels {
            let series = self.channel_series(channel)?;
            acc.iter_mut().zip(series).for_each(|(a, v)| *a += v);
        }
        let n = channels.len() as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        Ok(acc)
    }

    /// Snapshot of every slot in slot order, empty slots included
    pub fn captures(&self) -> Vec<Capture> {
        self.slots.clone()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of filled slots, stops growing once the ring has wrapped
    pub fn size_written_so_far(&self) -> usize {
        self.written
    }

    /// Index of the next slot to be overwritten
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
