//! This module contains the receive path

// The receive thread does one thing: poll the transport, hand whatever bytes
// are waiting to the codec, and dispatch every completed packet to the engine.
// It never retries. The first transport error, or the transport reporting
// closed, ends the loop and the owner finds out by joining it.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crossbeam_channel::Sender;
use tracing::{debug, error, trace};

use crate::{
    codec::{Packet, PacketCodec},
    engine::AcquisitionEngine,
    error::{Error, Result},
    lock,
    transport::Transport,
};

/// How long to back off when nothing is waiting on the line
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct ReceiveLoop<T, C> {
    transport: Arc<Mutex<T>>,
    codec: C,
    engine: Arc<AcquisitionEngine<T, C>>,
    info_sender: Option<Sender<Packet>>,
    idle_sleep: Duration,
}

impl<T, C> ReceiveLoop<T, C>
where
    T: Transport,
    C: PacketCodec,
{
    /// `codec` is the decoding instance, owned by this loop alone
    pub fn new(transport: Arc<Mutex<T>>, codec: C, engine: Arc<AcquisitionEngine<T, C>>) -> Self {
        Self {
            transport,
            codec,
            engine,
            info_sender: None,
            idle_sleep: IDLE_SLEEP,
        }
    }

    /// Forward every non-spectrum packet here. Dropped if the channel is full.
    pub fn with_info_sender(mut self, sender: Sender<Packet>) -> Self {
        self.info_sender = Some(sender);
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Grab everything currently waiting, `None` if there's nothing
    fn poll(&self) -> Result<Option<Vec<u8>>> {
        let mut transport = lock(&self.transport);
        if !transport.is_open() {
            return Err(Error::TransportClosed);
        }
        let available = transport.bytes_available()?;
        if available == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; available];
        let n = transport.read(&mut buf)?;
        buf.truncate(n);
        Ok(Some(buf))
    }

    /// Feed one chunk of bytes through the codec and dispatch what comes out.
    /// Returns the number of packets decoded.
    pub fn dispatch(&mut self, bytes: &[u8]) -> usize {
        let packets = self.codec.feed(bytes);
        let n = packets.len();
        for packet in packets {
            if let Some(info) = self.engine.on_packet(packet) {
                debug!(?info, "Informational packet");
                if let Some(sender) = &self.info_sender {
                    // We don't care if nobody is listening
                    let _ = sender.try_send(info);
                }
            }
        }
        n
    }

    /// Run until the transport closes or fails
    pub fn run(mut self) -> Result<()> {
        debug!("Receive loop running");
        loop {
            match self.poll() {
                Ok(Some(bytes)) => {
                    trace!(n = bytes.len(), "Bytes received");
                    self.dispatch(&bytes);
                }
                Ok(None) => thread::sleep(self.idle_sleep),
                Err(Error::TransportClosed) => {
                    debug!("Transport closed, receive loop exiting");
                    return Err(Error::TransportClosed);
                }
                Err(e) => {
                    error!(%e, "Transport failed, receive loop exiting");
                    return Err(e);
                }
            }
        }
    }
}
