//! The acquisition state machine
//!
//! The engine owns the request/response cycle with the sensor. `start` sends an
//! acquire command; every spectrum that comes back is stored in the capture
//! history and, while we are still running, immediately re-arms the next
//! acquisition. There are no request ids on the wire, so replies are matched to
//! requests purely by order. A spectrum arriving while running always re-arms,
//! so the chain can't be left running with nothing on the wire.
//!
//! Stopping is cooperative: `stop` only flips the state. A command already on
//! the wire still gets its reply stored, it just doesn't re-arm. `start` always
//! sends, even if a reply from before the stop is still due; that reply cannot
//! be told apart from a lost one, so if it does turn up it re-arms too and two
//! acquires stay queued until the next `stop`. There is no timeout either, so a
//! reply that never arrives leaves the chain waiting forever in `Running`.
//! [`AcquisitionEngine::awaiting_for`] exposes how long we have been waiting so
//! an owner can notice, and `stop` + `start` gets things moving again.
//!
//! Locking: every decision to send (state check, state change, bookkeeping) is
//! made in one go under `control`, so a `start`/`stop` racing with a reply can
//! neither arm twice for the same event nor lose the chain. The write itself
//! happens after `control` is released, so readers never wait on serial I/O.
//! `history` is only written from `on_packet` (the receive thread) and read by
//! everyone else. Lock order is control, then history; the transport is never
//! locked while holding either.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    capture::{Capture, CaptureRingBuffer},
    codec::{Packet, PacketCodec},
    config::{AcquisitionConfig, SessionConfig},
    error::{Error, Result},
    lock, read,
    timing::TimingTracker,
    transport::Transport,
    write,
};

/// Single sensor design, every command goes to sensor 0
pub const SENSOR_ID: u8 = 0;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Running,
}

struct Control<C> {
    state: AcquisitionState,
    config: AcquisitionConfig,
    codec: C,
    /// When the last acquire command went out
    started_at: Option<Instant>,
    /// An acquire went out and no spectrum has come back since
    awaiting: bool,
    /// Bumped for every acquire booked, so a failed send only undoes its own
    generation: u64,
}

/// An acquire decided on under the lock, sent after letting go of it
struct Armed {
    bytes: Vec<u8>,
    generation: u64,
}

struct History {
    ring: CaptureRingBuffer,
    timing: TimingTracker,
    captures_taken: u64,
    last_capture_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SensorInfo {
    id: Option<String>,
    wavelengths: Option<Vec<u16>>,
}

pub struct AcquisitionEngine<T, C> {
    transport: Arc<Mutex<T>>,
    control: Mutex<Control<C>>,
    history: RwLock<History>,
    sensor: Mutex<SensorInfo>,
}

impl<T, C> AcquisitionEngine<T, C>
where
    T: Transport,
    C: PacketCodec,
{
    pub fn new(transport: Arc<Mutex<T>>, codec: C, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            control: Mutex::new(Control {
                state: AcquisitionState::Idle,
                config: config.acquisition,
                codec,
                started_at: None,
                awaiting: false,
                generation: 0,
            }),
            history: RwLock::new(History {
                ring: CaptureRingBuffer::new(config.history_capacity)?,
                timing: TimingTracker::new(config.timing_window)?,
                captures_taken: 0,
                last_capture_at: None,
            }),
            sensor: Mutex::new(SensorInfo::default()),
        })
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut transport = lock(&self.transport);
        if !transport.is_open() {
            return Err(Error::TransportClosed);
        }
        transport.write(bytes)?;
        Ok(())
    }

    /// Encode an acquire with the current config and do the bookkeeping for it
    fn book(control: &mut Control<C>) -> Armed {
        let cfg = control.config;
        control.generation += 1;
        control.started_at = Some(Instant::now());
        control.awaiting = true;
        Armed {
            bytes: control.codec.encode_acquire(
                SENSOR_ID,
                cfg.integration_passes,
                cfg.frame_average,
                cfg.auto_exposure,
            ),
            generation: control.generation,
        }
    }

    /// Put a booked acquire on the wire. If that fails and nothing was booked
    /// since, the chain is dead: drop back to idle.
    fn fire(&self, armed: Armed) -> Result<()> {
        let res = self.send(&armed.bytes);
        if res.is_err() {
            let mut control = lock(&self.control);
            if control.generation == armed.generation {
                control.state = AcquisitionState::Idle;
                control.awaiting = false;
            }
        }
        res
    }

    /// Validate and store new acquisition parameters. They apply from the next
    /// command on, anything already sent is unaffected.
    pub fn configure(&self, config: AcquisitionConfig) -> Result<()> {
        config.validate()?;
        lock(&self.control).config = config;
        debug!(?config, "Acquisition reconfigured");
        Ok(())
    }

    pub fn config(&self) -> AcquisitionConfig {
        lock(&self.control).config
    }

    /// Begin continuous capture. Does nothing if already running.
    pub fn start(&self) -> Result<()> {
        let armed = {
            let mut control = lock(&self.control);
            if control.state == AcquisitionState::Running {
                return Ok(());
            }
            control.state = AcquisitionState::Running;
            info!(
                config = ?control.config,
                reply_due = control.awaiting,
                "Acquisition started"
            );
            Self::book(&mut control)
        };
        self.fire(armed)
    }

    /// Stop re-arming. A reply already on its way is still stored.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        if control.state == AcquisitionState::Idle {
            return;
        }
        control.state = AcquisitionState::Idle;
        info!(reply_due = control.awaiting, "Acquisition stopped");
    }

    pub fn state(&self) -> AcquisitionState {
        lock(&self.control).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == AcquisitionState::Running
    }

    /// An acquire went out and its spectrum hasn't come back yet
    pub fn awaiting_response(&self) -> bool {
        lock(&self.control).awaiting
    }

    /// How long the last unanswered acquire has been waiting, if any
    pub fn awaiting_for(&self) -> Option<Duration> {
        let control = lock(&self.control);
        match (control.awaiting, control.started_at) {
            (true, Some(at)) => Some(at.elapsed()),
            _ => None,
        }
    }

    pub fn request_sensor_id(&self) -> Result<()> {
        let bytes = lock(&self.control).codec.encode_get_sensor_id(SENSOR_ID);
        self.send(&bytes)
    }

    pub fn request_wavelengths(&self) -> Result<()> {
        let bytes = lock(&self.control).codec.encode_get_wavelength(SENSOR_ID);
        self.send(&bytes)
    }

    /// Handle one decoded packet from the receive path.
    ///
    /// Spectra are stored and, if still running, re-arm the next acquisition.
    /// Everything else is remembered as sensor metadata and handed back.
    pub fn on_packet(&self, packet: Packet) -> Option<Packet> {
        match packet {
            Packet::Spectrum(info) => {
                if info.saturated {
                    warn!("Sensor reports saturation");
                }
                self.on_spectrum(Arc::from(info.spectrum));
                None
            }
            Packet::SensorId(ref id) => {
                lock(&self.sensor).id = Some(id.clone());
                Some(packet)
            }
            Packet::Wavelength(ref table) => {
                lock(&self.sensor).wavelengths = Some(table.clone());
                Some(packet)
            }
            Packet::Other { .. } => Some(packet),
        }
    }

    fn on_spectrum(&self, capture: Capture) {
        let mut control = lock(&self.control);
        control.awaiting = false;
        {
            let mut history = write(&self.history);
            let previous = history.ring.latest().len();
            if previous != 0 && previous != capture.len() {
                warn!(previous, now = capture.len(), "Channel count changed");
            }
            history.ring.insert(capture);
            history.captures_taken += 1;
            history.last_capture_at = Some(Utc::now());
            if let Some(at) = control.started_at {
                history.timing.record(at.elapsed());
            }
        }
        if control.state != AcquisitionState::Running {
            return;
        }
        let armed = Self::book(&mut control);
        drop(control);
        if let Err(e) = self.fire(armed) {
            error!(%e, "Failed to re-arm acquisition, stopping");
        }
    }

    /// Newest capture, zero-length before the first one arrives
    pub fn latest_capture(&self) -> Capture {
        read(&self.history).ring.latest()
    }

    /// One channel across the history, in slot order.
    /// Fails with [`Error::NotReady`] until every slot holds that channel.
    pub fn channel_series(&self, channel: usize) -> Result<Vec<f32>> {
        read(&self.history).ring.channel_series(channel)
    }

    /// Per-slot mean of several channels
    pub fn averaged_series(&self, channels: &[usize]) -> Result<Vec<f32>> {
        read(&self.history).ring.averaged_series(channels)
    }

    /// Every history slot, in slot order
    pub fn captures(&self) -> Vec<Capture> {
        read(&self.history).ring.captures()
    }

    /// Slot the next capture will land in
    pub fn capture_index(&self) -> usize {
        read(&self.history).ring.cursor()
    }

    pub fn max_captures(&self) -> usize {
        read(&self.history).ring.capacity()
    }

    pub fn captures_taken(&self) -> u64 {
        read(&self.history).captures_taken
    }

    pub fn last_capture_at(&self) -> Option<DateTime<Utc>> {
        read(&self.history).last_capture_at
    }

    pub fn average_capture_time_ms(&self) -> u64 {
        read(&self.history).timing.average_ms()
    }

    /// `None` while the average capture time is still 0 ms
    pub fn captures_per_second(&self) -> Option<f64> {
        read(&self.history).timing.captures_per_second()
    }

    pub fn sensor_id(&self) -> Option<String> {
        lock(&self.sensor).id.clone()
    }

    pub fn wavelengths(&self) -> Option<Vec<u16>> {
        lock(&self.sensor).wavelengths.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
    };

    use super::*;
    use crate::{
        codec::{reply, Nsp32Codec, SpectrumInfo},
        transport::mock::MockTransport,
    };

    type MockEngine = AcquisitionEngine<MockTransport, Nsp32Codec>;

    fn setup(capacity: usize) -> (MockEngine, MockTransport) {
        let mock = MockTransport::new();
        let config = SessionConfig {
            history_capacity: capacity,
            ..Default::default()
        };
        let engine =
            AcquisitionEngine::new(Arc::new(Mutex::new(mock.clone())), Nsp32Codec::new(), &config)
                .unwrap();
        (engine, mock)
    }

    fn spectrum(values: &[f32]) -> Packet {
        Packet::Spectrum(SpectrumInfo {
            integration_time: 20,
            saturated: false,
            spectrum: values.to_vec(),
        })
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stands in for the sensor: answers every acquire written, in order.
    /// `answered` is bumped before the reply is handed over, so the re-arm it
    /// causes is never counted as unanswered.
    fn spawn_sensor(
        engine: Arc<MockEngine>,
        mock: MockTransport,
        answered: Arc<AtomicUsize>,
        done: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                if mock.write_count() > answered.load(Ordering::SeqCst) {
                    let n = answered.fetch_add(1, Ordering::SeqCst);
                    engine.on_packet(spectrum(&[n as f32]));
                } else {
                    thread::yield_now();
                }
            }
        })
    }

    #[test]
    fn test_start_is_idempotent() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(mock.write_count(), 1);
        assert!(engine.is_running());
        assert_eq!(mock.writes()[0], Nsp32Codec::new().encode_acquire(0, 20, 1, false));
    }

    #[test]
    fn test_stop_then_start_sends_again() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        engine.stop();
        assert!(!engine.is_running());
        engine.start().unwrap();
        assert_eq!(mock.write_count(), 2);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (engine, mock) = setup(4);
        engine.stop();
        assert_eq!(engine.state(), AcquisitionState::Idle);
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn test_each_spectrum_rearms() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        for i in 0..6 {
            assert!(engine.on_packet(spectrum(&[i as f32])).is_none());
        }
        assert_eq!(engine.captures_taken(), 6);
        // one from start, one per spectrum
        assert_eq!(mock.write_count(), 7);
        assert!(engine.awaiting_response());
        assert_eq!(engine.latest_capture()[0], 5.0);
    }

    #[test]
    fn test_reply_after_stop_is_stored_without_rearm() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        engine.stop();
        engine.on_packet(spectrum(&[7.0, 8.0]));
        assert_eq!(engine.captures_taken(), 1);
        assert_eq!(&engine.latest_capture()[..], &[7.0, 8.0]);
        assert_eq!(mock.write_count(), 1);
        assert!(!engine.awaiting_response());
        assert!(engine.awaiting_for().is_none());
    }

    #[test]
    fn test_lost_reply_then_restart_resumes_chain() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        // First reply never arrives
        for i in 0..3 {
            engine.stop();
            engine.start().unwrap();
            let sent = mock.write_count();
            engine.on_packet(spectrum(&[i as f32]));
            assert_eq!(mock.write_count(), sent + 1);
            assert!(engine.is_running());
            assert!(engine.awaiting_response());
        }
        assert_eq!(engine.captures_taken(), 3);
    }

    #[test]
    fn test_late_reply_after_restart_ends_at_stop() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        engine.stop();
        engine.start().unwrap();
        assert_eq!(mock.write_count(), 2);
        // Both replies re-arm, there is no telling which command they answer
        engine.on_packet(spectrum(&[1.0]));
        engine.on_packet(spectrum(&[2.0]));
        assert_eq!(mock.write_count(), 4);
        // Whatever is still queued is stored without sending anything more
        engine.stop();
        engine.on_packet(spectrum(&[3.0]));
        engine.on_packet(spectrum(&[4.0]));
        assert_eq!(mock.write_count(), 4);
        assert_eq!(engine.captures_taken(), 4);
        assert!(!engine.awaiting_response());
    }

    #[test]
    fn test_start_stop_racing_replies() {
        let (engine, mock) = setup(8);
        let engine = Arc::new(engine);
        let answered = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let sensor = spawn_sensor(engine.clone(), mock.clone(), answered.clone(), done.clone());
        let cycles = 200;
        for _ in 0..cycles {
            engine.start().unwrap();
            assert!(engine.is_running());
            engine.stop();
        }
        done.store(true, Ordering::SeqCst);
        sensor.join().unwrap();
        // Every write came from a start or a reply, never two from one event
        let sent = mock.write_count();
        assert!(sent <= cycles + answered.load(Ordering::SeqCst));

        // Deliver whatever was still queued; stopped, so nothing re-arms
        while answered.load(Ordering::SeqCst) < sent {
            let n = answered.fetch_add(1, Ordering::SeqCst);
            engine.on_packet(spectrum(&[n as f32]));
        }
        assert_eq!(mock.write_count(), sent);
        assert!(!engine.awaiting_response());

        // From a quiet line a fresh start runs exactly one chain
        done.store(false, Ordering::SeqCst);
        let sensor = spawn_sensor(engine.clone(), mock.clone(), answered.clone(), done.clone());
        let before = engine.captures_taken();
        engine.start().unwrap();
        wait_for(|| {
            // Writes first: a later `answered` can only shrink the gap
            let written = mock.write_count();
            let replied = answered.load(Ordering::SeqCst);
            assert!(written.saturating_sub(replied) <= 1);
            engine.captures_taken() >= before + 50
        });
        assert!(engine.is_running());
        engine.stop();
        done.store(true, Ordering::SeqCst);
        sensor.join().unwrap();
    }

    #[test]
    fn test_reads_not_blocked_by_slow_write() {
        let (engine, mock) = setup(4);
        let engine = Arc::new(engine);
        mock.hold_writes();
        let starter = {
            let engine = engine.clone();
            thread::spawn(move || engine.start())
        };
        wait_for(|| mock.parked_writes() == 1);
        // The acquire is stuck on the line, control is free
        assert!(engine.is_running());
        assert!(engine.awaiting_response());
        assert_eq!(engine.config(), AcquisitionConfig::default());
        engine.stop();
        mock.release_writes();
        starter.join().unwrap().unwrap();
        assert_eq!(mock.write_count(), 1);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_ring_wraps_through_engine() {
        let (engine, _mock) = setup(4);
        engine.start().unwrap();
        for i in 1..=5 {
            engine.on_packet(spectrum(&[i as f32]));
        }
        assert_eq!(engine.channel_series(0).unwrap(), vec![5.0, 2.0, 3.0, 4.0]);
        assert_eq!(engine.capture_index(), 1);
        assert_eq!(engine.captures().len(), 4);
    }

    #[test]
    fn test_series_not_ready_while_warming_up() {
        let (engine, _mock) = setup(3);
        engine.on_packet(spectrum(&[1.0, 2.0]));
        assert!(engine.channel_series(0).unwrap_err().is_not_ready());
        assert!(engine.latest_capture().len() == 2);
    }

    #[test]
    fn test_invalid_configure_leaves_config() {
        let (engine, mock) = setup(4);
        let before = engine.config();
        let err = engine
            .configure(AcquisitionConfig {
                integration_passes: 150,
                ..before
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(engine.config(), before);
        assert_eq!(engine.state(), AcquisitionState::Idle);
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn test_configure_applies_to_next_command() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        let cfg = AcquisitionConfig {
            integration_passes: 42,
            frame_average: 3,
            auto_exposure: true,
        };
        engine.configure(cfg).unwrap();
        engine.on_packet(spectrum(&[0.0]));
        let codec = Nsp32Codec::new();
        assert_eq!(mock.writes()[0], codec.encode_acquire(0, 20, 1, false));
        assert_eq!(mock.writes()[1], codec.encode_acquire(0, 42, 3, true));
    }

    #[test]
    fn test_metadata_packets_pass_through() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        let mut codec = Nsp32Codec::new();
        let mut bytes = reply::sensor_id(0, [1, 2, 3, 4, 5]);
        bytes.extend(reply::wavelength(0, &[400, 410]));
        for packet in codec.feed(&bytes) {
            assert!(engine.on_packet(packet).is_some());
        }
        assert_eq!(engine.sensor_id().as_deref(), Some("01-02-03-04-05"));
        assert_eq!(engine.wavelengths(), Some(vec![400, 410]));
        assert_eq!(engine.captures_taken(), 0);
        assert_eq!(mock.write_count(), 1);
        assert!(engine.awaiting_response());
    }

    #[test]
    fn test_failed_start_stays_idle() {
        let (engine, mock) = setup(4);
        mock.fail_writes(true);
        assert!(matches!(engine.start(), Err(Error::Io(_))));
        assert!(!engine.is_running());
        assert!(!engine.awaiting_response());
    }

    #[test]
    fn test_failed_rearm_stops() {
        let (engine, mock) = setup(4);
        engine.start().unwrap();
        mock.fail_writes(true);
        engine.on_packet(spectrum(&[1.0]));
        assert_eq!(engine.captures_taken(), 1);
        assert!(!engine.is_running());
        assert!(!engine.awaiting_response());
    }

    #[test]
    fn test_closed_transport() {
        let (engine, mock) = setup(4);
        mock.hang_up();
        assert!(matches!(engine.start(), Err(Error::TransportClosed)));
        assert!(matches!(
            engine.request_sensor_id(),
            Err(Error::TransportClosed)
        ));
    }

    #[test]
    fn test_timing_recorded_per_capture() {
        let (engine, _mock) = setup(4);
        assert_eq!(engine.captures_per_second(), None);
        engine.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        engine.on_packet(spectrum(&[1.0]));
        // 30ms+ spread over a 10 sample window
        assert!(engine.average_capture_time_ms() >= 3);
        assert!(engine.captures_per_second().is_some());
        assert!(engine.last_capture_at().is_some());
    }
}
