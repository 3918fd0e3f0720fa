//! PCM conversion, resampling and level metering.
//!
//! Resampling is delegated to `rubato`'s windowed-sinc resampler, which
//! low-pass filters below the lower Nyquist limit before decimating.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::prelude::*;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    calculate_cutoff,
};

use crate::errors::DeviceError;

/// Convert float samples in `[-1, 1]` to PCM16 little-endian bytes.
pub fn pcm16_encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Convert PCM16 little-endian bytes to float samples. A trailing odd byte is ignored.
pub fn pcm16_decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

pub fn pcm16_base64(samples: &[f32]) -> String {
    BASE64_STANDARD.encode(pcm16_encode(samples))
}

/// Average interleaved frames down to mono.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => interleaved.to_vec(),
        n => interleaved
            .chunks(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect(),
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Input frames per resampler block for microphone audio.
pub const CAPTURE_RESAMPLER_BLOCK: usize = 1024;

/// Input frames per resampler block for model audio (20ms at 24kHz).
pub const PLAYBACK_RESAMPLER_BLOCK: usize = 480;

const SINC_LEN: usize = 256;
const SINC_OVERSAMPLING: usize = 128;

/// Band-limited streaming resampler for mono audio.
///
/// Input is buffered up to the fixed block size of the sinc resampler, so
/// up to one block stays inside until more audio arrives or [`flush`] is
/// called. The filter delay is trimmed from the start of the output, which
/// keeps the resampled stream aligned with its input.
///
/// [`flush`]: StreamResampler::flush
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: Option<SincFixedIn<f32>>,
    input: Vec<f32>,
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("buffered", &self.input.len())
            .finish_non_exhaustive()
    }
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, block: usize) -> Result<Self, DeviceError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(DeviceError::UnsupportedConfig(format!(
                "cannot resample {from_rate} Hz to {to_rate} Hz"
            )));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: SINC_LEN,
                f_cutoff: calculate_cutoff(SINC_LEN, WindowFunction::BlackmanHarris2),
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: SINC_OVERSAMPLING,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(
                to_rate as f64 / from_rate as f64,
                1.0,
                params,
                block.max(1),
                1,
            )
            .map_err(|e| DeviceError::UnsupportedConfig(format!("resampler: {e}")))?;
            Some(resampler)
        };
        let delay_left = inner.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            from_rate,
            to_rate,
            inner,
            input: Vec::new(),
            delay_left,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Input frames waiting for a full block.
    pub fn buffered(&self) -> usize {
        self.input.len()
    }

    /// Resample `input` and append every completed block to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), DeviceError> {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.frames_in += input.len() as u64;
        self.input.extend_from_slice(input);

        let mut consumed = 0;
        while self.input.len() - consumed >= inner.input_frames_next() {
            let needed = inner.input_frames_next();
            let block = &self.input[consumed..consumed + needed];
            let mut resampled = inner
                .process(&[block], None)
                .map_err(|e| DeviceError::Stream(format!("resampler: {e}")))?;
            consumed += needed;
            let frames = resampled.swap_remove(0);
            self.frames_out += take_output(&frames, &mut self.delay_left, usize::MAX, out) as u64;
        }
        self.input.drain(..consumed);
        Ok(())
    }

    /// Push the buffered remainder and the filter tail through, appending
    /// exactly the output owed for all input since the last reset. The
    /// resampler starts over afterwards.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), DeviceError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };

        let owed = (self.frames_in as f64 * self.to_rate as f64 / self.from_rate as f64).round()
            as u64;
        let remainder = std::mem::take(&mut self.input);
        let mut tail: &[f32] = &remainder;
        // The filter delay is shorter than one block, so this ends within two passes.
        for _ in 0..3 {
            if self.frames_out >= owed {
                break;
            }
            let block: [&[f32]; 1] = [tail];
            let mut resampled = inner
                .process_partial(Some(&block[..]), None)
                .map_err(|e| DeviceError::Stream(format!("resampler: {e}")))?;
            tail = &[];
            let frames = resampled.swap_remove(0);
            let limit = (owed - self.frames_out) as usize;
            self.frames_out += take_output(&frames, &mut self.delay_left, limit, out) as u64;
        }

        self.reset();
        Ok(())
    }

    /// Drop buffered input and filter state.
    pub fn reset(&mut self) {
        self.input.clear();
        self.frames_in = 0;
        self.frames_out = 0;
        self.delay_left = match self.inner.as_mut() {
            Some(inner) => {
                inner.reset();
                inner.output_delay()
            }
            None => 0,
        };
    }
}

/// Append `frames` to `out` after skipping what is left of the filter
/// delay, at most `limit` frames. Returns the number appended.
fn take_output(frames: &[f32], delay_left: &mut usize, limit: usize, out: &mut Vec<f32>) -> usize {
    let skip = (*delay_left).min(frames.len());
    *delay_left -= skip;
    let taken = (frames.len() - skip).min(limit);
    out.extend_from_slice(&frames[skip..skip + taken]);
    taken
}

/// RMS meter with exponential decay: `level = max(rms, level * decay)`.
#[derive(Debug, Clone)]
pub struct VolumeMeter {
    level: f32,
    decay: f32,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self {
            level: 0.0,
            decay: 0.7,
        }
    }
}

impl VolumeMeter {
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        self.level = rms(samples).max(self.level * self.decay);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

/// Lock-free `f32` shared between an audio callback and readers.
#[derive(Debug, Clone, Default)]
pub struct SharedLevel(Arc<AtomicU32>);

impl SharedLevel {
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}
