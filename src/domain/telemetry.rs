//! Device telemetry sample types
//!
//! A sample is immutable once captured; the capture task wraps each one in a
//! sync envelope and appends it to the durable queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceId, GeoPoint};

/// Raw instrument reading delivered by a telemetry source.
///
/// The capture task stamps it with the device id and capture time to form a
/// [`DeviceTelemetrySample`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Last known position of the device
    pub coordinates: GeoPoint,

    /// Battery charge, 0-100
    pub battery_level: u8,

    /// Radio signal strength, 0-100
    pub signal_strength: u8,
}

impl TelemetryReading {
    pub fn new(coordinates: GeoPoint, battery_level: u8, signal_strength: u8) -> Self {
        Self {
            coordinates,
            battery_level,
            signal_strength,
        }
    }

    /// Bounds check; percentages stay within 0-100 and coordinates inside
    /// WGS84 ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !self.coordinates.is_valid() {
            return Err(format!("coordinates out of range: {}", self.coordinates));
        }
        if self.battery_level > 100 {
            return Err(format!("battery_level {} exceeds 100", self.battery_level));
        }
        if self.signal_strength > 100 {
            return Err(format!(
                "signal_strength {} exceeds 100",
                self.signal_strength
            ));
        }
        Ok(())
    }
}

/// One captured telemetry sample, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetrySample {
    /// Capturing device
    pub device_id: DeviceId,

    /// Capture timestamp (device clock, UTC)
    pub captured_at: DateTime<Utc>,

    /// Position at capture time
    pub coordinates: GeoPoint,

    /// Battery charge, 0-100
    pub battery_level: u8,

    /// Radio signal strength, 0-100
    pub signal_strength: u8,
}

impl DeviceTelemetrySample {
    /// Stamp a reading with the capturing device and the current time.
    pub fn capture(device_id: DeviceId, reading: TelemetryReading) -> Self {
        Self::capture_at(device_id, reading, Utc::now())
    }

    pub fn capture_at(
        device_id: DeviceId,
        reading: TelemetryReading,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            captured_at,
            coordinates: reading.coordinates,
            battery_level: reading.battery_level,
            signal_strength: reading.signal_strength,
        }
    }
}
