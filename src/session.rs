//! One sensor connection: the engine plus its receive thread
//!
//! The capture history and timing window live exactly as long as the session.
//! Dropping the session stops acquisition, closes the transport and joins the
//! receive thread.

use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver};
use tracing::{info, warn};

use crate::{
    codec::{Nsp32Codec, Packet, PacketCodec},
    config::{SerialSettings, SessionConfig},
    engine::AcquisitionEngine,
    error::{Error, Result},
    lock,
    receive::ReceiveLoop,
    transport::{SerialTransport, Transport},
};

// Sensor id / wavelength replies are rare, this is plenty
const INFO_CHANNEL_DEPTH: usize = 16;

pub struct SensorSession<T, C>
where
    T: Transport + 'static,
    C: PacketCodec + Send + 'static,
{
    engine: Arc<AcquisitionEngine<T, C>>,
    transport: Arc<Mutex<T>>,
    receiver: Option<JoinHandle<Result<()>>>,
    info: Receiver<Packet>,
}

/// Connect to a sensor on a serial port with the bundled codec
pub fn open_serial(
    settings: &SerialSettings,
    config: &SessionConfig,
) -> Result<SensorSession<SerialTransport, Nsp32Codec>> {
    let transport = SerialTransport::open(settings)?;
    SensorSession::open(transport, Nsp32Codec::new(), config)
}

impl<T, C> SensorSession<T, C>
where
    T: Transport + 'static,
    C: PacketCodec + Clone + Send + 'static,
{
    /// Build the engine and spawn the receive thread. The codec is cloned:
    /// one copy encodes commands, the other decodes on the receive thread.
    pub fn open(transport: T, codec: C, config: &SessionConfig) -> Result<Self> {
        let transport = Arc::new(Mutex::new(transport));
        let engine = Arc::new(AcquisitionEngine::new(
            transport.clone(),
            codec.clone(),
            config,
        )?);
        let (info_sender, info) = bounded(INFO_CHANNEL_DEPTH);
        let receive_loop =
            ReceiveLoop::new(transport.clone(), codec, engine.clone()).with_info_sender(info_sender);
        let receiver = thread::Builder::new()
            .name("sensor-rx".to_string())
            .spawn(move || receive_loop.run())?;
        info!(
            capacity = config.history_capacity,
            window = config.timing_window,
            "Sensor session opened"
        );
        Ok(Self {
            engine,
            transport,
            receiver: Some(receiver),
            info,
        })
    }
}

impl<T, C> SensorSession<T, C>
where
    T: Transport + 'static,
    C: PacketCodec + Send + 'static,
{
    pub fn engine(&self) -> &Arc<AcquisitionEngine<T, C>> {
        &self.engine
    }

    /// Sensor id, wavelength and other non-spectrum replies
    pub fn info_packets(&self) -> &Receiver<Packet> {
        &self.info
    }

    /// False once the receive thread has ended, i.e. the transport closed or failed
    pub fn is_alive(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop acquisition, close the transport and collect the receive thread.
    ///
    /// If the receive thread had already died on its own, its error is returned
    /// here. A clean close reports `Ok`.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.receiver.take() else {
            return Ok(());
        };
        let died_early = handle.is_finished();
        self.engine.stop();
        lock(&self.transport).close();
        let outcome = handle.join().map_err(|_| Error::ReceiveLoopPanicked)?;
        match outcome {
            Err(Error::TransportClosed) if !died_early => Ok(()),
            Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl<T, C> Drop for SensorSession<T, C>
where
    T: Transport + 'static,
    C: PacketCodec + Send + 'static,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(%e, "Sensor session ended with an error");
        }
    }
}
