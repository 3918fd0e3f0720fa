//! Audio device handles.
//!
//! Devices are passed into the pipelines explicitly. A capture device is
//! held open only while the [`CaptureStream`] guard it returns is alive; a
//! playback device is released when its last `Arc` is dropped.

use std::sync::Arc;

use crate::errors::DeviceError;

/// Receives interleaved `f32` frames on the device thread. Must not block.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Guard for an open capture stream. Dropping it releases the device.
pub trait CaptureStream: Send {}

pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> String;

    fn open(
        &self,
        on_samples: SampleCallback,
    ) -> Result<(CaptureFormat, Box<dyn CaptureStream>), DeviceError>;
}

/// Output device with its own playback clock.
pub trait PlaybackDevice: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Playback clock in seconds.
    fn current_time(&self) -> f64;

    /// Output latency reported by the device, in seconds.
    fn base_latency(&self) -> f64;

    /// Play mono `samples` starting at `start_at` on the playback clock.
    fn schedule(&self, start_at: f64, samples: Arc<[f32]>);

    /// Drop everything scheduled and not yet played.
    fn cancel_all(&self);

    /// Latest level from the metering path. Never blocks.
    fn output_level(&self) -> f32;
}

/// Source of fresh device handles, one set per session.
pub trait AudioDeviceProvider: Send + Sync {
    fn capture_device(&self) -> Result<Arc<dyn CaptureDevice>, DeviceError>;

    fn playback_device(&self) -> Result<Arc<dyn PlaybackDevice>, DeviceError>;
}
