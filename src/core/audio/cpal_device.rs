//! System audio devices through cpal.
//!
//! cpal streams are not `Send` on every platform, so each stream lives on a
//! dedicated thread that owns it until its stop channel closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;

use super::device::{
    AudioDeviceProvider, CaptureDevice, CaptureFormat, CaptureStream, PlaybackDevice,
    SampleCallback,
};
use super::pcm::{SharedLevel, VolumeMeter};
use crate::errors::DeviceError;

/// Seconds of audio the output ring can hold.
const OUTPUT_RING_SECONDS: usize = 30;

/// Assumed output latency; cpal does not report one.
const DEFAULT_OUTPUT_LATENCY: f64 = 0.05;

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| DeviceError::StreamOpen(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or(DeviceError::NotFound("input")),
        None => host.default_input_device().ok_or(DeviceError::NotFound("input")),
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| DeviceError::StreamOpen(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or(DeviceError::NotFound("output")),
        None => host
            .default_output_device()
            .ok_or(DeviceError::NotFound("output")),
    }
}

// =============================================================================
// Capture
// =============================================================================

pub struct CpalCaptureDevice {
    device_name: Option<String>,
}

impl CpalCaptureDevice {
    /// `None` selects the host's default input.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

struct CpalCaptureStream {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        // Closing the channel wakes the stream thread, which drops the stream.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("Capture thread panicked");
        }
    }
}

fn build_input_stream(
    device: &cpal::Device,
    mut on_samples: SampleCallback,
) -> Result<(CaptureFormat, cpal::Stream), DeviceError> {
    let supported = device
        .default_input_config()
        .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?;
    let format = CaptureFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config: StreamConfig = supported.config();
    let err_fn = |err| tracing::warn!("Capture stream error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_samples(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                    on_samples(&scratch);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0));
                    on_samples(&scratch);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(DeviceError::UnsupportedConfig(format!(
                "sample format {other:?}"
            )));
        }
    }
    .map_err(|e| DeviceError::StreamOpen(e.to_string()))?;

    stream
        .play()
        .map_err(|e| DeviceError::StreamOpen(e.to_string()))?;
    Ok((format, stream))
}

impl CaptureDevice for CpalCaptureDevice {
    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }

    fn open(
        &self,
        on_samples: SampleCallback,
    ) -> Result<(CaptureFormat, Box<dyn CaptureStream>), DeviceError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let thread = std::thread::Builder::new()
            .name("capture-stream".into())
            .spawn(move || {
                let opened = find_input_device(device_name.as_deref())
                    .and_then(|device| build_input_stream(&device, on_samples));
                match opened {
                    Ok((format, stream)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Blocks until the guard drops its sender.
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::StreamOpen(e.to_string()))?;

        let format = ready_rx
            .recv()
            .map_err(|_| DeviceError::StreamOpen("capture thread exited".into()))??;

        Ok((
            format,
            Box::new(CpalCaptureStream {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
        ))
    }
}

// =============================================================================
// Playback
// =============================================================================

/// State shared with the output callback. Only atomics, so the callback
/// never waits on the scheduler.
#[derive(Default)]
struct OutputShared {
    /// Frames handed to the device since the stream opened.
    played_frames: AtomicU64,
    /// Samples with a ring index below this are discarded unplayed.
    flush_until: AtomicU64,
    level: SharedLevel,
}

struct RingWriter {
    producer: rtrb::Producer<f32>,
    /// Total samples pushed into the ring.
    written: u64,
    /// Timeline frame at which the next pushed sample plays.
    cursor_frame: u64,
}

pub struct CpalPlaybackDevice {
    sample_rate: u32,
    base_latency: f64,
    shared: Arc<OutputShared>,
    writer: Mutex<RingWriter>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalPlaybackDevice {
    /// Open the output stream. `None` selects the host's default output.
    pub fn open(device_name: Option<String>) -> Result<Self, DeviceError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let shared = Arc::new(OutputShared::default());
        let callback_shared = shared.clone();

        let thread = std::thread::Builder::new()
            .name("playback-stream".into())
            .spawn(move || {
                let opened = find_output_device(device_name.as_deref()).and_then(|device| {
                    let supported = device
                        .default_output_config()
                        .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?;
                    let sample_rate = supported.sample_rate().0;
                    let (producer, consumer) =
                        rtrb::RingBuffer::new(sample_rate as usize * OUTPUT_RING_SECONDS);
                    let stream =
                        build_output_stream(&device, &supported, consumer, callback_shared)?;
                    Ok((sample_rate, producer, stream))
                });
                match opened {
                    Ok((sample_rate, producer, stream)) => {
                        let _ = ready_tx.send(Ok((sample_rate, producer)));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::StreamOpen(e.to_string()))?;

        let (sample_rate, producer) = ready_rx
            .recv()
            .map_err(|_| DeviceError::StreamOpen("playback thread exited".into()))??;
        tracing::info!("Playback device opened at {} Hz", sample_rate);

        Ok(Self {
            sample_rate,
            base_latency: DEFAULT_OUTPUT_LATENCY,
            shared,
            writer: Mutex::new(RingWriter {
                producer,
                written: 0,
                cursor_frame: 0,
            }),
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn build_output_stream(
    device: &cpal::Device,
    supported: &cpal::SupportedStreamConfig,
    mut consumer: rtrb::Consumer<f32>,
    shared: Arc<OutputShared>,
) -> Result<cpal::Stream, DeviceError> {
    let config: StreamConfig = supported.config();
    let channels = config.channels.max(1) as usize;
    let mut read: u64 = 0;
    let mut meter = VolumeMeter::default();
    let mut mono = Vec::new();

    // Fills `mono` with one sample per output frame.
    let mut render = move |frames: usize, mono: &mut Vec<f32>| {
        let flush_until = shared.flush_until.load(Ordering::Acquire);
        while read < flush_until && consumer.pop().is_ok() {
            read += 1;
        }
        mono.clear();
        for _ in 0..frames {
            match consumer.pop() {
                Ok(s) => {
                    read += 1;
                    mono.push(s);
                }
                Err(_) => mono.push(0.0),
            }
        }
        shared
            .played_frames
            .fetch_add(frames as u64, Ordering::AcqRel);
        shared.level.store(meter.update(mono));
    };

    let err_fn = |err| tracing::warn!("Playback stream error: {}", err);
    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(data.len() / channels, &mut mono);
                for (frame, s) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(*s);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                render(data.len() / channels, &mut mono);
                for (frame, s) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(DeviceError::UnsupportedConfig(format!(
                "sample format {other:?}"
            )));
        }
    }
    .map_err(|e| DeviceError::StreamOpen(e.to_string()))?;

    stream
        .play()
        .map_err(|e| DeviceError::StreamOpen(e.to_string()))?;
    Ok(stream)
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.shared.played_frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn base_latency(&self) -> f64 {
        self.base_latency
    }

    fn schedule(&self, start_at: f64, samples: Arc<[f32]>) {
        let mut writer = self.writer.lock();
        let played = self.shared.played_frames.load(Ordering::Acquire);
        // The ring drained and the callback played silence past our cursor.
        if writer.cursor_frame < played {
            writer.cursor_frame = played;
        }

        let start_frame = (start_at * self.sample_rate as f64).round() as u64;
        let gap = start_frame.saturating_sub(writer.cursor_frame) as usize;
        let needed = gap + samples.len();
        if writer.producer.slots() < needed {
            tracing::warn!("Playback ring full, dropping {} samples", samples.len());
            return;
        }

        for s in std::iter::repeat_n(0.0, gap).chain(samples.iter().copied()) {
            if writer.producer.push(s).is_err() {
                break;
            }
            writer.written += 1;
            writer.cursor_frame += 1;
        }
    }

    fn cancel_all(&self) {
        let mut writer = self.writer.lock();
        self.shared
            .flush_until
            .store(writer.written, Ordering::Release);
        writer.cursor_frame = self.shared.played_frames.load(Ordering::Acquire);
    }

    fn output_level(&self) -> f32 {
        self.shared.level.load()
    }
}

impl Drop for CpalPlaybackDevice {
    fn drop(&mut self) {
        self.stop_tx.lock().take();
        if let Some(thread) = self.thread.lock().take()
            && thread.join().is_err()
        {
            tracing::warn!("Playback thread panicked");
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Opens the host's input and output devices, fresh for every session.
#[derive(Debug, Clone, Default)]
pub struct CpalAudioProvider {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl AudioDeviceProvider for CpalAudioProvider {
    fn capture_device(&self) -> Result<Arc<dyn CaptureDevice>, DeviceError> {
        // Resolve now so a missing microphone is reported before connect.
        find_input_device(self.input_device.as_deref())?;
        Ok(Arc::new(CpalCaptureDevice::new(self.input_device.clone())))
    }

    fn playback_device(&self) -> Result<Arc<dyn PlaybackDevice>, DeviceError> {
        Ok(Arc::new(CpalPlaybackDevice::open(self.output_device.clone())?))
    }
}
