//! Gap-free playback of model audio.
//!
//! [`PlaybackSchedule`] holds the timing policy and is driven with explicit
//! clock readings so it can be tested without a device. [`AudioPlayback`]
//! binds it to a [`PlaybackDevice`] and a pump task that hands pending
//! chunks to the device as the play head advances.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::device::PlaybackDevice;
use super::pcm::{PLAYBACK_RESAMPLER_BLOCK, StreamResampler, pcm16_decode};
use crate::errors::DeviceError;

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledChunk {
    pub start_at: f64,
    pub samples: Arc<[f32]>,
}

/// Timing policy:
///
/// - a chunk starts exactly where the previous one ends, never before `now`;
/// - a pending chunk is released only once the schedule end is within
///   `base_latency` of `now`, so at most one chunk plays ahead of the head.
///
/// Audio beyond that window waits in the pending queue and is timed against
/// the device clock when released, so the lead on the device stays within
/// `base_latency` plus one chunk however fast chunks arrive. A schedule
/// that falls behind the clock restarts at `now`.
#[derive(Debug)]
pub struct PlaybackSchedule {
    sample_rate: u32,
    scheduled_time: f64,
    pending: VecDeque<Arc<[f32]>>,
}

impl PlaybackSchedule {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            scheduled_time: 0.0,
            pending: VecDeque::new(),
        }
    }

    pub fn duration_of(&self, samples: &[f32]) -> f64 {
        samples.len() as f64 / self.sample_rate as f64
    }

    /// End of everything handed to the device so far.
    pub fn scheduled_time(&self) -> f64 {
        self.scheduled_time
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Audio handed to the device that has not played yet.
    pub fn device_lead(&self, now: f64) -> f64 {
        (self.scheduled_time - now).max(0.0)
    }

    /// Audio not yet played: the device lead plus pending chunks.
    pub fn buffered_duration(&self, now: f64) -> f64 {
        self.device_lead(now)
            + self
                .pending
                .iter()
                .map(|c| self.duration_of(c))
                .sum::<f64>()
    }

    pub fn is_idle(&self, now: f64) -> bool {
        self.pending.is_empty() && self.scheduled_time <= now
    }

    pub fn push(&mut self, samples: Arc<[f32]>) {
        if !samples.is_empty() {
            self.pending.push_back(samples);
        }
    }

    /// Release pending chunks that are due relative to `now`.
    pub fn pump(&mut self, now: f64, base_latency: f64) -> Vec<ScheduledChunk> {
        let mut due = Vec::new();
        while !self.pending.is_empty() && self.scheduled_time <= now + base_latency {
            let Some(samples) = self.pending.pop_front() else {
                break;
            };
            let start_at = self.scheduled_time.max(now);
            self.scheduled_time = start_at + self.duration_of(&samples);
            due.push(ScheduledChunk { start_at, samples });
        }
        due
    }

    /// Forget pending chunks and restart timing from the next chunk.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.scheduled_time = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    /// Sample rate of the PCM16 chunks passed to `add_chunk`.
    pub input_sample_rate: u32,
    /// How often the pump re-checks pending chunks.
    pub pump_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 24000,
            pump_interval: Duration::from_millis(10),
        }
    }
}

struct PlaybackState {
    schedule: PlaybackSchedule,
    resampler: StreamResampler,
}

pub struct AudioPlayback {
    device: Arc<dyn PlaybackDevice>,
    state: Arc<Mutex<PlaybackState>>,
    pump_task: JoinHandle<()>,
}

impl AudioPlayback {
    /// Bind to `device`. Must be called inside a tokio runtime.
    pub fn new(device: Arc<dyn PlaybackDevice>, config: PlaybackConfig) -> Result<Self, DeviceError> {
        let device_rate = device.sample_rate();
        let state = Arc::new(Mutex::new(PlaybackState {
            schedule: PlaybackSchedule::new(device_rate),
            resampler: StreamResampler::new(
                config.input_sample_rate,
                device_rate,
                PLAYBACK_RESAMPLER_BLOCK,
            )?,
        }));

        let pump_task = tokio::spawn({
            let device = device.clone();
            let state = state.clone();
            async move {
                let mut ticker = tokio::time::interval(config.pump_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    pump(&*device, &state);
                }
            }
        });

        Ok(Self {
            device,
            state,
            pump_task,
        })
    }

    /// Enqueue PCM16 LE mono audio at the configured input rate.
    ///
    /// When the device runs at another rate, up to one resampler block is
    /// held back until the next chunk or [`finish_turn`](Self::finish_turn).
    pub fn add_chunk(&self, pcm16: &[u8]) {
        let decoded = pcm16_decode(pcm16);
        if decoded.is_empty() {
            return;
        }

        {
            let mut state = self.state.lock();
            let mut samples = Vec::with_capacity(decoded.len() * 2);
            if let Err(e) = state.resampler.process(&decoded, &mut samples) {
                tracing::warn!("Dropping model audio chunk: {}", e);
                return;
            }
            state.schedule.push(samples.into());
        }
        pump(&*self.device, &self.state);
    }

    /// The model finished its turn: play out audio the resampler still holds.
    pub fn finish_turn(&self) {
        {
            let mut state = self.state.lock();
            let mut samples = Vec::new();
            if let Err(e) = state.resampler.flush(&mut samples) {
                tracing::warn!("Dropping end of model turn: {}", e);
                return;
            }
            state.schedule.push(samples.into());
        }
        pump(&*self.device, &self.state);
    }

    /// Flush pending audio and silence the device immediately.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.schedule.reset();
            state.resampler.reset();
        }
        self.device.cancel_all();
    }

    /// Output level from the device meter.
    pub fn volume(&self) -> f32 {
        self.device.output_level()
    }

    pub fn buffered_duration(&self) -> f64 {
        self.state
            .lock()
            .schedule
            .buffered_duration(self.device.current_time())
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().schedule.is_idle(self.device.current_time())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.pump_task.abort();
        self.device.cancel_all();
    }
}

fn pump(device: &dyn PlaybackDevice, state: &Mutex<PlaybackState>) {
    let due = state
        .lock()
        .schedule
        .pump(device.current_time(), device.base_latency());
    for chunk in due {
        device.schedule(chunk.start_at, chunk.samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> Arc<[f32]> {
        vec![0.1f32; len].into()
    }

    #[test]
    fn test_second_chunk_starts_exactly_at_previous_end() {
        let mut schedule = PlaybackSchedule::new(1000);
        let latency = 0.05;

        // d1 = 0.5s at t0 = 1.0
        schedule.push(chunk(500));
        let first = schedule.pump(1.0, latency);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].start_at, 1.0);

        // d2 arrives at t1 = 1.2 < t0 + d1
        schedule.push(chunk(300));
        assert!(schedule.pump(1.2, latency).is_empty());

        let second = schedule.pump(1.46, latency);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].start_at, 1.5);
        assert!((schedule.scheduled_time() - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_never_schedules_before_clock() {
        let mut schedule = PlaybackSchedule::new(1000);
        schedule.push(chunk(100));
        schedule.pump(0.0, 0.0);
        // underrun: next chunk arrives long after the first ended
        schedule.push(chunk(100));
        let due = schedule.pump(5.0, 0.0);
        assert_eq!(due[0].start_at, 5.0);
    }

    #[test]
    fn test_no_overlap_across_many_chunks() {
        let mut schedule = PlaybackSchedule::new(1000);
        let mut now = 0.0;
        let mut placed = Vec::new();
        for i in 0..20 {
            schedule.push(chunk(90 - i * 3));
            now += 0.013;
            for c in schedule.pump(now, 0.02) {
                placed.push((c.start_at, c.start_at + c.samples.len() as f64 / 1000.0));
            }
        }
        while !schedule.is_idle(now) {
            now += 0.01;
            for c in schedule.pump(now, 0.02) {
                placed.push((c.start_at, c.start_at + c.samples.len() as f64 / 1000.0));
            }
        }
        assert_eq!(placed.len(), 20);
        for w in placed.windows(2) {
            assert!(w[1].0 >= w[0].1 - 1e-9, "overlap between {:?} and {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn test_at_most_one_chunk_ahead() {
        let mut schedule = PlaybackSchedule::new(1000);
        for _ in 0..5 {
            schedule.push(chunk(200));
        }
        let due = schedule.pump(0.0, 0.05);
        assert_eq!(due.len(), 1);
        assert_eq!(schedule.pending_len(), 4);
    }

    #[test]
    fn test_device_lead_bounded_when_chunks_arrive_fast() {
        // 100ms chunks arriving every 10ms on a clock that moves forward.
        let mut schedule = PlaybackSchedule::new(1000);
        let latency = 0.02;
        let mut now = 0.0;
        let mut placed = Vec::new();
        let mut max_buffered: f64 = 0.0;

        for _ in 0..50 {
            schedule.push(chunk(100));
            placed.extend(schedule.pump(now, latency));
            assert!(
                schedule.device_lead(now) <= latency + 0.1 + 1e-9,
                "lead {} at {}",
                schedule.device_lead(now),
                now
            );
            max_buffered = max_buffered.max(schedule.buffered_duration(now));
            now += 0.01;
        }
        // The backlog waits in the queue, not on the device.
        assert!(max_buffered > 4.0, "{max_buffered}");
        assert!(schedule.pending_len() > 40);

        while !schedule.is_idle(now) {
            placed.extend(schedule.pump(now, latency));
            assert!(schedule.device_lead(now) <= latency + 0.1 + 1e-9);
            now += 0.01;
        }
        assert_eq!(placed.len(), 50);
        for w in placed.windows(2) {
            let end = w[0].start_at + w[0].samples.len() as f64 / 1000.0;
            assert!((w[1].start_at - end).abs() < 1e-9, "gap before {}", w[1].start_at);
        }
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let mut schedule = PlaybackSchedule::new(1000);
        schedule.push(chunk(0));
        assert_eq!(schedule.pending_len(), 0);
        assert!(schedule.is_idle(0.0));
    }

    #[test]
    fn test_reset_flushes() {
        let mut schedule = PlaybackSchedule::new(1000);
        schedule.push(chunk(100));
        schedule.push(chunk(100));
        schedule.reset();
        assert!(schedule.is_idle(0.0));
        assert_eq!(schedule.buffered_duration(0.0), 0.0);
    }

    struct ManualDevice {
        rate: u32,
        now: Mutex<f64>,
        scheduled: Mutex<Vec<ScheduledChunk>>,
        cancels: Mutex<usize>,
    }

    impl PlaybackDevice for ManualDevice {
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn current_time(&self) -> f64 {
            *self.now.lock()
        }
        fn base_latency(&self) -> f64 {
            0.01
        }
        fn schedule(&self, start_at: f64, samples: Arc<[f32]>) {
            self.scheduled.lock().push(ScheduledChunk { start_at, samples });
        }
        fn cancel_all(&self) {
            *self.cancels.lock() += 1;
        }
        fn output_level(&self) -> f32 {
            0.25
        }
    }

    fn manual_device(rate: u32) -> Arc<ManualDevice> {
        Arc::new(ManualDevice {
            rate,
            now: Mutex::new(2.0),
            scheduled: Mutex::new(Vec::new()),
            cancels: Mutex::new(0),
        })
    }

    #[tokio::test]
    async fn test_audio_playback_add_and_stop() {
        let device = manual_device(24000);
        let playback = AudioPlayback::new(device.clone(), PlaybackConfig::default()).unwrap();

        // 2400 samples at 24kHz = 100ms
        playback.add_chunk(&vec![0u8; 4800]);
        playback.add_chunk(&vec![0u8; 4800]);
        {
            let scheduled = device.scheduled.lock();
            assert_eq!(scheduled.len(), 1);
            assert_eq!(scheduled[0].start_at, 2.0);
            assert_eq!(scheduled[0].samples.len(), 2400);
        }
        assert!((playback.buffered_duration() - 0.2).abs() < 1e-9);
        assert_eq!(playback.volume(), 0.25);

        playback.stop();
        assert!(playback.is_idle());
        assert_eq!(*device.cancels.lock(), 1);
    }

    #[tokio::test]
    async fn test_resampled_turn_plays_out_in_full() {
        // 24kHz model audio on a 48kHz device.
        let device = manual_device(48000);
        let playback = AudioPlayback::new(device.clone(), PlaybackConfig::default()).unwrap();

        // 1000 samples: two resampler blocks and a remainder held back.
        playback.add_chunk(&vec![0u8; 2000]);
        let before = playback.buffered_duration();
        assert!(before < 1000.0 / 24000.0);

        playback.finish_turn();
        assert!((playback.buffered_duration() - 1000.0 / 24000.0).abs() < 1e-9);

        playback.stop();
        assert!(playback.is_idle());
    }

    #[tokio::test]
    async fn test_zero_rate_device_is_rejected() {
        let device = manual_device(0);
        assert!(matches!(
            AudioPlayback::new(device, PlaybackConfig::default()),
            Err(DeviceError::UnsupportedConfig(_))
        ));
    }
}
