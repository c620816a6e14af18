//! Error taxonomy for the acquisition core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value was outside its accepted range. Nothing was changed.
    #[error("{field} = {value} is out of range (expected 1..=99)")]
    Validation { field: &'static str, value: u32 },
    #[error("history capacity and timing window must be greater than zero")]
    InvalidHistory,
    #[error("at least one channel must be selected")]
    NoChannels,
    /// Channel not populated in every history slot yet. Expected during warm-up, retry later.
    #[error("channel {channel} not ready: slot {slot} holds fewer channels")]
    NotReady { channel: usize, slot: usize },
    #[error("transport closed")]
    TransportClosed,
    #[error("receive loop panicked")]
    ReceiveLoopPanicked,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    /// True for the conditions a caller should simply retry later
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady { .. })
    }
}
