//! The background task that keeps the latest target reading up to date.
//!
//! A [`SensorReader`] owns a thread that polls the shared transport, cuts
//! data frames out of the stream, decodes them and publishes each reading
//! into a [`SharedSensorState`]. Everybody else only ever looks at that
//! state; nothing but the reader and the command engine touches the link.

use crate::frame::Channel;
use crate::frame_reader::FrameReader;
use crate::telemetry::{self, GateResolution, TargetReading};
use crate::transport::{SharedTransport, Transport, TransportError};
use log::{debug, info, trace, warn};
use std::{
    io,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

const READ_CHUNK: usize = 256;

const IDLE_POLL: Duration = Duration::from_millis(10);

/// A copy of everything the reader has published.
#[derive(Debug, Clone, Default)]
pub struct SensorSnapshot {
    /// The most recent reading, if any arrived yet.
    pub reading: Option<Arc<TargetReading>>,
    /// Whether the last poll of the transport succeeded.
    pub connected: bool,
    /// Data frames decoded since the reader started.
    pub frames_decoded: u64,
    /// When `reading` was published.
    pub updated_at: Option<Instant>,
}

/// The latest reading, shared between the reader thread and its consumers.
///
/// Readings are published as fresh `Arc`s and never changed in place, so a
/// consumer holding one keeps a consistent value however long it holds it.
#[derive(Debug, Clone, Default)]
pub struct SharedSensorState {
    inner: Arc<Mutex<SensorSnapshot>>,
}

impl SharedSensorState {
    /// Empty, disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut SensorSnapshot)) {
        match self.inner.lock() {
            Ok(mut snapshot) => f(&mut snapshot),
            Err(_) => warn!("Sensor state lock poisoned, dropping update"),
        }
    }

    /// Replaces the last reading.
    pub fn publish(&self, reading: TargetReading) {
        let reading = Arc::new(reading);
        self.update(|snapshot| {
            snapshot.reading = Some(reading);
            snapshot.frames_decoded += 1;
            snapshot.updated_at = Some(Instant::now());
        });
    }

    /// Records whether the link is currently working. Losing the link also
    /// drops the last reading, which says nothing about the room any more.
    pub fn set_connected(&self, connected: bool) {
        self.update(|snapshot| {
            snapshot.connected = connected;
            if !connected {
                snapshot.reading = None;
            }
        });
    }

    /// The last reading, or `None` if there is none (or the lock is poisoned).
    pub fn latest(&self) -> Option<Arc<TargetReading>> {
        self.inner
            .lock()
            .ok()
            .and_then(|snapshot| snapshot.reading.clone())
    }

    /// Whether the link is currently working.
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .map(|snapshot| snapshot.connected)
            .unwrap_or(false)
    }

    /// A copy of the whole state.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.inner
            .lock()
            .map(|snapshot| snapshot.clone())
            .unwrap_or_default()
    }
}

/// How the reader polls and decodes.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Backoff after a transport failure, and the bound on how long a stop
    /// request can go unnoticed.
    pub poll_timeout: Duration,
    /// Gate width used to place engineering-mode energies.
    pub resolution: GateResolution,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            resolution: GateResolution::default(),
        }
    }
}

enum Signal {
    Stop,
}

/// Handle to the background reader thread.
pub struct SensorReader {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    done: mpsc::Receiver<()>,
}

impl SensorReader {
    /// Starts reading `transport` into `state`.
    pub fn spawn<T: Transport + 'static>(
        transport: SharedTransport<T>,
        state: SharedSensorState,
        options: ReaderOptions,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Signal>();
        let (done_tx, done) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("sensor-reader".into())
            .spawn(move || {
                let mut reader = FrameReader::new(Channel::Data);
                let mut connected = false;
                let mut running = true;
                while running {
                    match rx.try_recv() {
                        Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => {
                            running = false;
                            continue;
                        }
                        Err(mpsc::TryRecvError::Empty) => {}
                    }

                    match poll(&transport, &mut reader) {
                        Ok(0) => {
                            mark_connected(&state, &mut connected, true);
                            spin_sleep::sleep(IDLE_POLL);
                        }
                        Ok(_) => {
                            mark_connected(&state, &mut connected, true);
                            while let Some(frame) = reader.extract() {
                                match telemetry::decode(frame.payload(), options.resolution) {
                                    Some(reading) => {
                                        trace!("{}", reading.status);
                                        state.publish(reading);
                                    }
                                    None => debug!("Ignoring undecodable data frame"),
                                }
                            }
                        }
                        Err(e) => {
                            if connected {
                                warn!("Sensor read failed: {}", e);
                            } else {
                                debug!("Sensor read failed: {}", e);
                            }
                            mark_connected(&state, &mut connected, false);
                            spin_sleep::sleep(options.poll_timeout);
                        }
                    }
                }
                state.set_connected(false);
                info!(
                    "Sensor reader stopped ({} bytes discarded while resynchronizing)",
                    reader.dropped()
                );
                let _ = done_tx.send(());
            })?;

        Ok(SensorReader {
            handle: Some(handle),
            tx,
            done,
        })
    }

    /// Asks the thread to finish and waits up to `timeout` for it. Returns
    /// false if the thread did not finish in time; it is then left detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        // The thread may already be gone; that is what we want anyway.
        let _ = self.tx.send(Signal::Stop);

        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("Sensor reader thread panicked");
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Sensor reader did not stop within {:?}", timeout);
                false
            }
        }
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SensorReader {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
    }
}

fn mark_connected(state: &SharedSensorState, connected: &mut bool, now: bool) {
    if *connected != now {
        *connected = now;
        state.set_connected(now);
    }
}

// Moves whatever the transport has buffered into `reader`. The lock is only
// held for the non-blocking check and the read, so a command exchange can
// take the link between polls.
fn poll<T: Transport>(
    transport: &SharedTransport<T>,
    reader: &mut FrameReader,
) -> Result<usize, TransportError> {
    let mut transport = transport
        .lock()
        .map_err(|_| TransportError::Disconnected)?;
    let available = transport.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }
    let mut chunk = [0u8; READ_CHUNK];
    let n = transport.read(&mut chunk[..available.min(READ_CHUNK)])?;
    reader.feed(&chunk[..n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use crate::telemetry::TargetStatus;
    use crate::transport::{share, MockTransport};

    fn reading_frame(status: TargetStatus) -> Vec<u8> {
        encode(
            Channel::Data,
            &TargetReading::with_status(status).to_payload(),
        )
        .unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn options() -> ReaderOptions {
        ReaderOptions {
            poll_timeout: Duration::from_millis(20),
            ..ReaderOptions::default()
        }
    }

    #[test]
    fn publishes_the_latest_reading() {
        let mock = MockTransport::new();
        mock.inject(&[0x00, 0x13, 0x37]);
        mock.inject(&reading_frame(TargetStatus::Moving));
        mock.inject(&reading_frame(TargetStatus::Stationary));

        let state = SharedSensorState::new();
        let mut reader =
            SensorReader::spawn(share(mock.clone()), state.clone(), options()).unwrap();

        assert!(wait_for(|| state.snapshot().frames_decoded == 2));
        assert_eq!(state.latest().unwrap().status, TargetStatus::Stationary);
        assert!(state.is_connected());
        assert!(reader.stop(Duration::from_secs(1)));
        assert!(!state.is_connected());
    }

    #[test]
    fn skips_frames_that_do_not_decode() {
        let mock = MockTransport::new();
        let mut bad = TargetReading::with_status(TargetStatus::Moving).to_payload();
        bad[2] = 0x09;
        mock.inject(&encode(Channel::Data, &bad).unwrap());
        mock.inject(&reading_frame(TargetStatus::Both));

        let state = SharedSensorState::new();
        let mut reader =
            SensorReader::spawn(share(mock.clone()), state.clone(), options()).unwrap();

        assert!(wait_for(|| state.latest().is_some()));
        assert_eq!(state.latest().unwrap().status, TargetStatus::Both);
        assert_eq!(state.snapshot().frames_decoded, 1);
        reader.stop(Duration::from_secs(1));
    }

    #[test]
    fn survives_a_broken_link() {
        let mock = MockTransport::new();
        mock.break_link();

        let state = SharedSensorState::new();
        let mut reader =
            SensorReader::spawn(share(mock.clone()), state.clone(), options()).unwrap();

        thread::sleep(Duration::from_millis(60));
        assert!(reader.is_running());
        assert!(!state.is_connected());

        mock.restore_link();
        mock.inject(&reading_frame(TargetStatus::Moving));
        assert!(wait_for(|| state.latest().is_some()));
        assert!(state.is_connected());

        // Going away again takes the reading with it.
        mock.break_link();
        assert!(wait_for(|| !state.is_connected()));
        assert!(state.latest().is_none());
        assert!(state.snapshot().updated_at.is_some());

        mock.restore_link();
        mock.inject(&reading_frame(TargetStatus::Moving));
        assert!(wait_for(|| state.latest().is_some()));
        assert!(state.is_connected());
        assert!(reader.stop(Duration::from_secs(1)));
    }

    #[test]
    fn stops_promptly() {
        let state = SharedSensorState::new();
        let mut reader =
            SensorReader::spawn(share(MockTransport::new()), state, options()).unwrap();

        let started = Instant::now();
        assert!(reader.stop(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!reader.is_running());
        // A second stop is a no-op.
        assert!(reader.stop(Duration::from_millis(1)));
    }

    #[test]
    fn readings_are_replaced_not_mutated() {
        let state = SharedSensorState::new();
        state.publish(TargetReading::with_status(TargetStatus::Moving));
        let held = state.latest().unwrap();
        state.publish(TargetReading::with_status(TargetStatus::None));

        assert_eq!(held.status, TargetStatus::Moving);
        assert_eq!(state.latest().unwrap().status, TargetStatus::None);
    }
}
