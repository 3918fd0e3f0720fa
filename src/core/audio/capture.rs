//! Microphone capture pipeline.
//!
//! The device callback copies frames into a bounded queue with `try_send`
//! and returns. A processing task downmixes, resamples to the target rate
//! with a band-limited resampler, cuts fixed-size chunks and publishes them
//! with the current volume.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::device::{CaptureDevice, CaptureFormat, CaptureStream};
use super::pcm::{
    CAPTURE_RESAMPLER_BLOCK, StreamResampler, VolumeMeter, downmix, pcm16_base64,
};
use crate::core::realtime::OutboundAudioChunk;
use crate::errors::DeviceError;

const CHUNK_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    pub target_sample_rate: u32,
    /// Samples per emitted chunk at the target rate (2048 = 128ms at 16kHz).
    pub chunk_samples: usize,
    /// Raw callback blocks buffered before frames are dropped.
    pub raw_queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            chunk_samples: 2048,
            raw_queue_capacity: 64,
        }
    }
}

/// Turns raw device blocks into fixed-size mono chunks at the target rate.
#[derive(Debug)]
pub struct ChunkAssembler {
    channels: u16,
    chunk_samples: usize,
    resampler: StreamResampler,
    buffer: Vec<f32>,
}

impl ChunkAssembler {
    pub fn new(
        format: CaptureFormat,
        target_sample_rate: u32,
        chunk_samples: usize,
    ) -> Result<Self, DeviceError> {
        let chunk_samples = chunk_samples.max(1);
        Ok(Self {
            channels: format.channels,
            chunk_samples,
            resampler: StreamResampler::new(
                format.sample_rate,
                target_sample_rate,
                CAPTURE_RESAMPLER_BLOCK,
            )?,
            buffer: Vec::with_capacity(chunk_samples * 2),
        })
    }

    /// Feed interleaved frames; returns every chunk completed by them.
    pub fn push(&mut self, interleaved: &[f32]) -> Result<Vec<Vec<f32>>, DeviceError> {
        let mono = downmix(interleaved, self.channels);
        self.resampler.process(&mono, &mut self.buffer)?;

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_samples {
            let rest = self.buffer.split_off(self.chunk_samples);
            chunks.push(std::mem::replace(&mut self.buffer, rest));
        }
        Ok(chunks)
    }

    /// Samples waiting for the next chunk boundary.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

struct RunningCapture {
    // Held for its Drop: releasing it closes the device.
    _stream: Box<dyn CaptureStream>,
    task: JoinHandle<()>,
}

pub struct AudioCapture {
    device: Arc<dyn CaptureDevice>,
    config: CaptureConfig,
    chunks_tx: broadcast::Sender<OutboundAudioChunk>,
    volume_tx: watch::Sender<f32>,
    running: Option<RunningCapture>,
}

impl AudioCapture {
    pub fn new(device: Arc<dyn CaptureDevice>, config: CaptureConfig) -> Self {
        let (chunks_tx, _) = broadcast::channel(CHUNK_BROADCAST_CAPACITY);
        let (volume_tx, _) = watch::channel(0.0);
        Self {
            device,
            config,
            chunks_tx,
            volume_tx,
            running: None,
        }
    }

    /// Encoded chunks, one every `chunk_samples / target_sample_rate` seconds of input.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundAudioChunk> {
        self.chunks_tx.subscribe()
    }

    pub fn volume(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open the device and begin emitting chunks. No-op while running.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.is_some() {
            return Ok(());
        }

        let (raw_tx, raw_rx) = mpsc::channel::<Vec<f32>>(self.config.raw_queue_capacity);
        let on_samples = Box::new(move |samples: &[f32]| {
            // Never block the device thread; drop the block if processing lags.
            let _ = raw_tx.try_send(samples.to_vec());
        });

        let (format, stream) = self.device.open(on_samples)?;
        // Dropping `stream` on this error releases the device.
        let assembler = ChunkAssembler::new(
            format,
            self.config.target_sample_rate,
            self.config.chunk_samples,
        )?;
        tracing::info!(
            "Capture started on '{}' ({} Hz, {} ch)",
            self.device.name(),
            format.sample_rate,
            format.channels
        );

        let task = tokio::spawn(process_capture(
            raw_rx,
            assembler,
            self.config.target_sample_rate,
            self.chunks_tx.clone(),
            self.volume_tx.clone(),
        ));

        self.running = Some(RunningCapture {
            _stream: stream,
            task,
        });
        Ok(())
    }

    /// Release the device. Samples not yet forming a full chunk are discarded.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
            drop(running);
            self.volume_tx.send_replace(0.0);
            tracing::info!("Capture stopped on '{}'", self.device.name());
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn process_capture(
    mut raw_rx: mpsc::Receiver<Vec<f32>>,
    mut assembler: ChunkAssembler,
    sample_rate: u32,
    chunks_tx: broadcast::Sender<OutboundAudioChunk>,
    volume_tx: watch::Sender<f32>,
) {
    let mut meter = VolumeMeter::default();
    while let Some(block) = raw_rx.recv().await {
        let chunks = match assembler.push(&block) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("Dropping captured block: {}", e);
                continue;
            }
        };
        for chunk in chunks {
            volume_tx.send_replace(meter.update(&chunk));
            let _ = chunks_tx.send(OutboundAudioChunk::pcm16(pcm16_base64(&chunk), sample_rate));
        }
    }
    tracing::debug!("Capture stream ended");
}
