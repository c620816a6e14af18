//! In this module, we implement the periodic stats report for a running session.
//! Captures taken, the rolling capture time and rate, and the latest value of
//! the channel being followed. It also calls out a stalled chain: running, a
//! command out, and nothing back for a while. Nothing is cancelled, the sensor
//! may still answer.

use std::time::Duration;

use spectro_capture::{AcquisitionEngine, PacketCodec, Transport};
use tracing::{info, warn};

pub struct Monitor {
    channel: usize,
    stall_after: Duration,
    last_taken: u64,
}

impl Monitor {
    pub fn new(channel: usize, stall_after: Duration) -> Self {
        Self {
            channel,
            stall_after,
            last_taken: 0,
        }
    }

    pub fn report<T, C>(&mut self, engine: &AcquisitionEngine<T, C>)
    where
        T: Transport,
        C: PacketCodec,
    {
        let taken = engine.captures_taken();
        let new = taken - self.last_taken;
        self.last_taken = taken;
        // Zero-length until the first capture, and short captures are possible
        let value = engine.latest_capture().get(self.channel).copied();
        let rate = engine
            .captures_per_second()
            .map(|r| format!("{:.2}", r))
            .unwrap_or_else(|| "-".to_string());
        info!(
            taken,
            new,
            avg_ms = engine.average_capture_time_ms(),
            per_second = %rate,
            channel = self.channel,
            value = ?value,
            "Capture stats"
        );
        if engine.is_running() && new == 0 {
            if let Some(waited) = engine.awaiting_for() {
                if waited >= self.stall_after {
                    warn!(
                        waited_ms = waited.as_millis() as u64,
                        "No reply to the last acquire, sensor may be stalled"
                    );
                }
            }
        }
    }
}
