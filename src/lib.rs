//! Acquisition core for a serial spectrometer.
//!
//! A [`SensorSession`] owns the serial link, a background receive thread and an
//! [`AcquisitionEngine`]. The engine sends acquire commands, stores every
//! spectrum that comes back in a fixed-size [`CaptureRingBuffer`], keeps a
//! rolling average of capture time, and in continuous mode re-arms the next
//! acquisition as soon as the previous one lands.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod capture;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod receive;
pub mod session;
pub mod timing;
pub mod transport;

pub use capture::{Capture, CaptureRingBuffer};
pub use codec::{Nsp32Codec, Packet, PacketCodec};
pub use config::{AcquisitionConfig, SerialSettings, SessionConfig};
pub use engine::{AcquisitionEngine, AcquisitionState};
pub use error::{Error, Result};
pub use session::{open_serial, SensorSession};
pub use timing::TimingTracker;
pub use transport::{SerialTransport, Transport};

// Poisoned locks are recovered, the data behind them is consistent between statements
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
