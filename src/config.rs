//! Session and acquisition settings

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::{
    error::{Error, Result},
    timing::DEFAULT_WINDOW,
};

/// Accepted range for integration passes and frame average
pub const COUNT_RANGE: RangeInclusive<u8> = 1..=99;
pub const DEFAULT_HISTORY: usize = 100;

/// Parameters sent with every acquire command
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AcquisitionConfig {
    pub integration_passes: u8,
    pub frame_average: u8,
    pub auto_exposure: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            integration_passes: 20,
            frame_average: 1,
            auto_exposure: false,
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        check_count("integration_passes", self.integration_passes)?;
        check_count("frame_average", self.frame_average)
    }
}

fn check_count(field: &'static str, value: u8) -> Result<()> {
    if COUNT_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(Error::Validation {
            field,
            value: value.into(),
        })
    }
}

/// Everything fixed for the lifetime of one sensor connection
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SessionConfig {
    pub history_capacity: usize,
    pub timing_window: usize,
    pub acquisition: AcquisitionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY,
            timing_window: DEFAULT_WINDOW,
            acquisition: AcquisitionConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 || self.timing_window == 0 {
            return Err(Error::InvalidHistory);
        }
        self.acquisition.validate()
    }
}

/// Line settings the sensor firmware expects: 115200 8N1, no flow control.
/// Only the device path is up to the user.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SerialSettings {
    pub path: String,
    /// Read timeout, only matters if a read is issued with nothing buffered
    pub timeout: Duration,
}

impl SerialSettings {
    pub const BAUD_RATE: u32 = 115_200;
    pub const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;
    pub const PARITY: serialport::Parity = serialport::Parity::None;
    pub const STOP_BITS: serialport::StopBits = serialport::StopBits::One;
    pub const FLOW_CONTROL: serialport::FlowControl = serialport::FlowControl::None;

    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_millis(100),
        }
    }

    pub fn builder(&self) -> serialport::SerialPortBuilder {
        serialport::new(&self.path, Self::BAUD_RATE)
            .data_bits(Self::DATA_BITS)
            .parity(Self::PARITY)
            .stop_bits(Self::STOP_BITS)
            .flow_control(Self::FLOW_CONTROL)
            .timeout(self.timeout)
    }
}
