//! Programmatically generated audio.

use std::f32::consts::PI;

/// Mono sine wave.
pub fn sine_wave(frequency: f32, sample_rate: u32, samples: usize, amplitude: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// PCM16 little-endian bytes of a 440Hz tone at 24kHz, `millis` long.
pub fn model_audio_pcm16(millis: u32) -> Vec<u8> {
    let samples = (24_000 * millis / 1000) as usize;
    sine_wave(440.0, 24_000, samples, 0.5)
        .into_iter()
        .flat_map(|s| ((s * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}
