//! Sensor packet framing
//!
//! The acquisition core only needs two things from the wire protocol: turn a
//! command into bytes, and turn a stream of bytes into zero or more typed
//! packets. [`PacketCodec`] is that seam. [`Nsp32Codec`] is the framing we ship
//! with, laid out as
//!
//! ```text
//! 0x03 0xBB | cmd | user | len (u16 LE) | payload[len] | checksum
//! ```
//!
//! where the checksum brings the byte sum of the whole frame to 0 mod 256 and
//! `user` carries the sensor id.

use thiserror::Error;
use tracing::{debug, warn};

pub const PREFIX: [u8; 2] = [0x03, 0xBB];
// prefix + cmd + user + len
const HEADER_LEN: usize = 6;
// Nothing the sensor sends comes close to this
const MAX_PAYLOAD: usize = 16 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CmdCode {
    GetSensorId = 0x04,
    GetWavelength = 0x24,
    AcqSpectrum = 0x26,
    GetSpectrum = 0x28,
}

/// A decoded reply from the sensor
#[derive(Clone, PartialEq, Debug)]
pub enum Packet {
    SensorId(String),
    Wavelength(Vec<u16>),
    Spectrum(SpectrumInfo),
    /// Acks and anything else we don't interpret
    Other { cmd_code: u8, payload: Vec<u8> },
}

#[derive(Clone, PartialEq, Debug)]
pub struct SpectrumInfo {
    pub integration_time: u16,
    pub saturated: bool,
    pub spectrum: Vec<f32>,
}

impl Packet {
    pub fn is_spectrum(&self) -> bool {
        matches!(self, Packet::Spectrum(_))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bad frame prefix")]
    Prefix,
    #[error("payload length {0} exceeds limit")]
    Oversized(usize),
    #[error("checksum mismatch")]
    Checksum,
    #[error("payload for command {cmd_code:#04x} is malformed")]
    Payload { cmd_code: u8 },
}

pub trait PacketCodec {
    fn encode_acquire(
        &self,
        sensor_id: u8,
        integration_passes: u8,
        frame_average: u8,
        auto_exposure: bool,
    ) -> Vec<u8>;
    fn encode_get_sensor_id(&self, sensor_id: u8) -> Vec<u8>;
    fn encode_get_wavelength(&self, sensor_id: u8) -> Vec<u8>;
    /// Push received bytes in, get every packet completed so far out.
    /// Partial frames are kept for the next call, garbage is dropped.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Packet>;
}

#[derive(Default, Clone, Debug)]
pub struct Nsp32Codec {
    pending: Vec<u8>,
    dropped: usize,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// Build a complete frame around `payload`
pub fn frame(cmd_code: u8, user: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    out.extend_from_slice(&PREFIX);
    out.push(cmd_code);
    out.push(user);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out.push(checksum(&out));
    out
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn parse_payload(cmd_code: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    let malformed = DecodeError::Payload { cmd_code };
    match cmd_code {
        c if c == CmdCode::GetSensorId as u8 => {
            if payload.len() != 5 {
                return Err(malformed);
            }
            let id = payload
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join("-");
            Ok(Packet::SensorId(id))
        }
        c if c == CmdCode::GetWavelength as u8 => {
            let n = read_u32(payload, 0).ok_or(DecodeError::Payload { cmd_code })? as usize;
            let body = &payload[4..];
            // A bogus count must not overflow on 32-bit targets
            if n.checked_mul(2) != Some(body.len()) {
                return Err(malformed);
            }
            Ok(Packet::Wavelength(
                body.chunks_exact(2)
                    .map(|w| u16::from_le_bytes([w[0], w[1]]))
                    .collect(),
            ))
        }
        c if c == CmdCode::GetSpectrum as u8 => {
            let integration_time = read_u16(payload, 0).ok_or(DecodeError::Payload { cmd_code })?;
            let saturated = *payload.get(2).ok_or(DecodeError::Payload { cmd_code })? != 0;
            let n = read_u32(payload, 3).ok_or(DecodeError::Payload { cmd_code })? as usize;
            let body = &payload[7..];
            if n.checked_mul(4) != Some(body.len()) {
                return Err(malformed);
            }
            let spectrum = body
                .chunks_exact(4)
                .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                .collect();
            Ok(Packet::Spectrum(SpectrumInfo {
                integration_time,
                saturated,
                spectrum,
            }))
        }
        _ => Ok(Packet::Other {
            cmd_code,
            payload: payload.to_vec(),
        }),
    }
}

impl Nsp32Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes discarded while resynchronising, for diagnostics
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    fn skip(&mut self, n: usize) {
        self.pending.drain(..n);
        self.dropped += n;
    }

    /// Try to pull one frame off the front of `pending`.
    /// `Ok(None)` means we need more bytes.
    fn next_frame(&mut self) -> Result<Option<Packet>, DecodeError> {
        // Line up on a prefix, tossing anything before it
        match self.pending.windows(2).position(|w| w == PREFIX) {
            Some(0) => (),
            Some(at) => {
                self.skip(at);
                return Err(DecodeError::Prefix);
            }
            None => {
                // Keep a trailing 0x03, it may be the start of the next prefix
                let keep = usize::from(self.pending.last() == Some(&PREFIX[0]));
                let n = self.pending.len() - keep;
                if n > 0 {
                    self.skip(n);
                    return Err(DecodeError::Prefix);
                }
                return Ok(None);
            }
        }
        if self.pending.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = usize::from(u16::from_le_bytes([self.pending[4], self.pending[5]]));
        if len > MAX_PAYLOAD {
            self.skip(1);
            return Err(DecodeError::Oversized(len));
        }
        let total = HEADER_LEN + len + 1;
        if self.pending.len() < total {
            return Ok(None);
        }
        if checksum(&self.pending[..total]) != 0 {
            self.skip(1);
            return Err(DecodeError::Checksum);
        }
        let cmd_code = self.pending[2];
        let packet = parse_payload(cmd_code, &self.pending[HEADER_LEN..HEADER_LEN + len]);
        // The frame itself was sound, so consume it either way
        self.pending.drain(..total);
        packet.map(Some)
    }
}

impl PacketCodec for Nsp32Codec {
    fn encode_acquire(
        &self,
        sensor_id: u8,
        integration_passes: u8,
        frame_average: u8,
        auto_exposure: bool,
    ) -> Vec<u8> {
        frame(
            CmdCode::AcqSpectrum as u8,
            sensor_id,
            &[integration_passes, frame_average, u8::from(auto_exposure)],
        )
    }

    fn encode_get_sensor_id(&self, sensor_id: u8) -> Vec<u8> {
        frame(CmdCode::GetSensorId as u8, sensor_id, &[])
    }

    fn encode_get_wavelength(&self, sensor_id: u8) -> Vec<u8> {
        frame(CmdCode::GetWavelength as u8, sensor_id, &[])
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<Packet> {
        self.pending.extend_from_slice(bytes);
        let mut packets = vec![];
        loop {
            match self.next_frame() {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => break,
                Err(e @ DecodeError::Payload { .. }) => warn!(%e, "Dropping frame"),
                Err(e) => debug!(%e, "Resynchronising"),
            }
        }
        packets
    }
}

/// Reply frames, as the sensor would send them. Handy for tests and benches.
pub mod reply {
    use super::{frame, CmdCode};

    pub fn spectrum(sensor_id: u8, integration_time: u16, spectrum: &[f32]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(7 + spectrum.len() * 4);
        payload.extend_from_slice(&integration_time.to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(&(spectrum.len() as u32).to_le_bytes());
        for v in spectrum {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        frame(CmdCode::GetSpectrum as u8, sensor_id, &payload)
    }

    pub fn sensor_id(sensor_id: u8, id: [u8; 5]) -> Vec<u8> {
        frame(CmdCode::GetSensorId as u8, sensor_id, &id)
    }

    pub fn wavelength(sensor_id: u8, table: &[u16]) -> Vec<u8> {
        let mut payload = (table.len() as u32).to_le_bytes().to_vec();
        for w in table {
            payload.extend_from_slice(&w.to_le_bytes());
        }
        frame(CmdCode::GetWavelength as u8, sensor_id, &payload)
    }
}
