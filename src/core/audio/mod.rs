//! Audio capture and playback pipelines.
//!
//! - Capture: device frames -> 16kHz mono -> 2048-sample chunks -> base64 PCM16
//! - Playback: PCM16 chunks -> device rate -> gap-free schedule on the device clock
//!
//! Devices are injected through [`AudioDeviceProvider`]. Enable the
//! `cpal-audio` feature for system microphone and speaker support.

mod capture;
#[cfg(feature = "cpal-audio")]
mod cpal_device;
mod device;
pub mod pcm;
mod playback;

pub use capture::{AudioCapture, CaptureConfig, ChunkAssembler};
#[cfg(feature = "cpal-audio")]
pub use cpal_device::{CpalAudioProvider, CpalCaptureDevice, CpalPlaybackDevice};
pub use device::{
    AudioDeviceProvider, CaptureDevice, CaptureFormat, CaptureStream, PlaybackDevice,
    SampleCallback,
};
pub use pcm::{SharedLevel, StreamResampler, VolumeMeter};
pub use playback::{AudioPlayback, PlaybackConfig, PlaybackSchedule, ScheduledChunk};
