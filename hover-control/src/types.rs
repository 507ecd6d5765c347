//! Sample and history record types passed between the loop stages.

use serde::{Deserialize, Serialize};

use crate::ring_buffer::SampleBuffer;

/// One cycle's raw sensor readings.
///
/// `time` is seconds since the loop started running, measured, not assumed
/// from the configured period. Values substituted after a failed read are
/// stored here too, so a `RawSample` is always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Seconds since loop start
    pub time: f64,
    /// Light sensor reading in raw counts
    pub raw_height: f64,
    /// Rotor encoder position in degrees
    pub raw_rotor_pos: f64,
}

impl RawSample {
    pub fn new(time: f64, raw_height: f64, raw_rotor_pos: f64) -> Self {
        Self {
            time,
            raw_height,
            raw_rotor_pos,
        }
    }
}

/// Smoothed counterpart of a [`RawSample`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedSample {
    /// Seconds since loop start
    pub time: f64,
    /// EMA of the height proxy in raw counts
    pub smoothed_height: f64,
    /// EMA of rotor speed in degrees per second
    pub smoothed_speed: f64,
}

/// Everything recorded about one control cycle, for export and display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub time: f64,
    pub raw_position: f64,
    pub smoothed_speed: f64,
    pub smoothed_height: f64,
    pub target_height: f64,
    /// Clamped controller output in pitch degrees
    pub target_pitch: f64,
    /// Estimated lift in newtons at the smoothed height reading
    pub lift_newtons: f64,
    /// False when this cycle ran on substituted sensor values
    pub sensor_valid: bool,
}

impl HistoryRecord {
    /// `(time, raw_position, smoothed_speed, smoothed_height, target_pitch)`
    pub fn as_tuple(&self) -> (f64, f64, f64, f64, f64) {
        (
            self.time,
            self.raw_position,
            self.smoothed_speed,
            self.smoothed_height,
            self.target_pitch,
        )
    }
}

/// Bounded histories kept by the control loop.
///
/// All three buffers share one capacity and receive exactly one entry per
/// cycle, so they stay index-aligned.
#[derive(Debug, Clone)]
pub struct History {
    raw: SampleBuffer<RawSample>,
    smoothed: SampleBuffer<SmoothedSample>,
    records: SampleBuffer<HistoryRecord>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            raw: SampleBuffer::new(capacity),
            smoothed: SampleBuffer::new(capacity),
            records: SampleBuffer::new(capacity),
        }
    }

    pub(crate) fn push(&mut self, raw: RawSample, smoothed: SmoothedSample, record: HistoryRecord) {
        self.raw.push(raw);
        self.smoothed.push(smoothed);
        self.records.push(record);
    }

    pub fn raw(&self) -> &SampleBuffer<RawSample> {
        &self.raw
    }

    pub fn smoothed(&self) -> &SampleBuffer<SmoothedSample> {
        &self.smoothed
    }

    pub fn records(&self) -> &SampleBuffer<HistoryRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only export of the records in chronological order.
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.records.to_vec()
    }

    /// Export as `(time, raw_position, smoothed_speed, smoothed_height, target_pitch)` tuples.
    pub fn export_tuples(&self) -> Vec<(f64, f64, f64, f64, f64)> {
        self.records.iter().map(HistoryRecord::as_tuple).collect()
    }
}
