//! Sensor reads with a bounded wait.
//!
//! The sensor driver lives on its own reader thread. Each cycle sends a
//! numbered request and waits at most the configured timeout for the matching
//! answer, so a hung transport costs one timed-out cycle instead of wedging the
//! control loop.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::drivers::SensorDriver;
use crate::error::DriverError;

/// Both channels read in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub lightness: Result<f64, DriverError>,
    pub position: Result<f64, DriverError>,
}

/// Sensor driver behind a reader thread with per-read timeout.
pub struct TimedSensor {
    requests: Sender<u64>,
    responses: Receiver<(u64, SensorReading)>,
    next_seq: u64,
    timeout: Duration,
}

impl TimedSensor {
    /// Move `driver` onto a reader thread.
    pub fn spawn<S: SensorDriver>(driver: S, timeout: Duration) -> Self {
        // One request may wait while another is being read; anything more
        // means the reader is stuck and the read is reported as a timeout.
        let (request_tx, request_rx) = bounded::<u64>(1);
        let (response_tx, response_rx) = bounded::<(u64, SensorReading)>(4);

        // The reader is detached: a driver stuck in a blocking call cannot be
        // joined. It exits once the request channel closes.
        let spawned = thread::Builder::new()
            .name("sensor-reader".to_string())
            .spawn(move || Self::reader_thread(driver, request_rx, response_tx));
        if let Err(e) = spawned {
            // Every read will report Disconnected
            warn!("Failed to spawn sensor reader thread: {e}");
        }

        Self {
            requests: request_tx,
            responses: response_rx,
            next_seq: 0,
            timeout,
        }
    }

    /// Read both channels, waiting at most the configured timeout.
    ///
    /// # Errors
    /// [`DriverError::Timeout`] if no answer arrived in time or the reader is
    /// still busy with an earlier request; [`DriverError::Disconnected`] if the
    /// reader thread has exited.
    pub fn read(&mut self) -> Result<SensorReading, DriverError> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        match self.requests.try_send(seq) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(DriverError::Timeout),
            Err(TrySendError::Disconnected(_)) => return Err(DriverError::Disconnected),
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok((answered, reading)) if answered == seq => return Ok(reading),
                Ok((stale, _)) => {
                    debug!("Discarding stale sensor reading #{stale} (waiting for #{seq})");
                }
                Err(RecvTimeoutError::Timeout) => return Err(DriverError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(DriverError::Disconnected),
            }
        }
    }

    fn reader_thread<S: SensorDriver>(
        mut driver: S,
        requests: Receiver<u64>,
        responses: Sender<(u64, SensorReading)>,
    ) {
        for seq in requests.iter() {
            let reading = SensorReading {
                lightness: driver.get_lightness(),
                position: driver.get_position(),
            };
            if responses.send((seq, reading)).is_err() {
                break;
            }
        }
        debug!("Sensor reader thread exiting");
    }
}

impl std::fmt::Debug for TimedSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedSensor")
            .field("next_seq", &self.next_seq)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct SlowSensor {
        delay_ms: Arc<AtomicU64>,
        calls: u64,
    }

    impl SensorDriver for SlowSensor {
        fn get_lightness(&mut self) -> Result<f64, DriverError> {
            thread::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)));
            self.calls += 1;
            Ok(self.calls as f64)
        }

        fn get_position(&mut self) -> Result<f64, DriverError> {
            Err(DriverError::Hardware("encoder unplugged".to_string()))
        }
    }

    #[test]
    fn test_read_returns_both_channels() {
        let delay = Arc::new(AtomicU64::new(0));
        let mut sensor = TimedSensor::spawn(
            SlowSensor {
                delay_ms: delay,
                calls: 0,
            },
            Duration::from_millis(500),
        );

        let reading = sensor.read().unwrap();
        assert_eq!(reading.lightness, Ok(1.0));
        assert!(matches!(reading.position, Err(DriverError::Hardware(_))));
        assert_eq!(sensor.read().unwrap().lightness, Ok(2.0));
    }

    #[test]
    fn test_hung_read_times_out_and_recovers() {
        let delay = Arc::new(AtomicU64::new(300));
        let mut sensor = TimedSensor::spawn(
            SlowSensor {
                delay_ms: delay.clone(),
                calls: 0,
            },
            Duration::from_millis(30),
        );

        let start = Instant::now();
        assert_eq!(sensor.read(), Err(DriverError::Timeout));
        assert!(start.elapsed() < Duration::from_millis(250));

        // Reader is fast again; the late answer to the first request is stale
        delay.store(0, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(400));

        let mut fresh = None;
        for _ in 0..5 {
            if let Ok(reading) = sensor.read() {
                fresh = Some(reading);
                break;
            }
        }
        let reading = fresh.expect("reader should recover");
        assert!(reading.lightness.unwrap() >= 2.0);
    }
}
