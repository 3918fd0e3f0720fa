//! Fake audio devices.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use live_assist::core::audio::{
    AudioDeviceProvider, CaptureDevice, CaptureFormat, CaptureStream, PlaybackDevice,
    SampleCallback, ScheduledChunk,
};
use live_assist::errors::DeviceError;

struct FakeStream {
    open: Arc<AtomicUsize>,
}

impl CaptureStream for FakeStream {}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Microphone fed by the test through [`FakeMic::feed`].
#[derive(Default)]
pub struct FakeMic {
    open: Arc<AtomicUsize>,
    callback: Mutex<Option<SampleCallback>>,
}

impl FakeMic {
    /// Deliver samples as if the device thread produced them.
    pub fn feed(&self, samples: &[f32]) {
        if let Some(cb) = self.callback.lock().as_mut() {
            cb(samples);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) > 0
    }
}

impl CaptureDevice for FakeMic {
    fn name(&self) -> String {
        "fake-mic".into()
    }

    fn open(
        &self,
        on_samples: SampleCallback,
    ) -> Result<(CaptureFormat, Box<dyn CaptureStream>), DeviceError> {
        self.open.fetch_add(1, Ordering::SeqCst);
        *self.callback.lock() = Some(on_samples);
        Ok((
            CaptureFormat {
                sample_rate: 16000,
                channels: 1,
            },
            Box::new(FakeStream {
                open: self.open.clone(),
            }),
        ))
    }
}

/// Speaker whose clock only moves when the test advances it.
pub struct ManualSpeaker {
    pub now: Mutex<f64>,
    pub scheduled: Mutex<Vec<ScheduledChunk>>,
    pub cancels: AtomicUsize,
}

impl Default for ManualSpeaker {
    fn default() -> Self {
        Self {
            now: Mutex::new(1.0),
            scheduled: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        }
    }
}

impl ManualSpeaker {
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl PlaybackDevice for ManualSpeaker {
    fn sample_rate(&self) -> u32 {
        24000
    }

    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn base_latency(&self) -> f64 {
        0.0
    }

    fn schedule(&self, start_at: f64, samples: Arc<[f32]>) {
        self.scheduled.lock().push(ScheduledChunk { start_at, samples });
    }

    fn cancel_all(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn output_level(&self) -> f32 {
        0.3
    }
}

/// Hands out the same mic and speaker on every request.
#[derive(Default)]
pub struct FakeAudioProvider {
    pub mic: Arc<FakeMic>,
    pub speaker: Arc<ManualSpeaker>,
    pub capture_unavailable: AtomicBool,
    pub playback_requests: AtomicUsize,
}

impl FakeAudioProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl AudioDeviceProvider for FakeAudioProvider {
    fn capture_device(&self) -> Result<Arc<dyn CaptureDevice>, DeviceError> {
        if self.capture_unavailable.load(Ordering::SeqCst) {
            return Err(DeviceError::NotFound("input"));
        }
        Ok(self.mic.clone())
    }

    fn playback_device(&self) -> Result<Arc<dyn PlaybackDevice>, DeviceError> {
        self.playback_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.speaker.clone())
    }
}
