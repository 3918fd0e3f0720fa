//! Performance benchmarks for the live-assist hot paths
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use live_assist::core::audio::pcm::{
    CAPTURE_RESAMPLER_BLOCK, PLAYBACK_RESAMPLER_BLOCK, StreamResampler, pcm16_base64, pcm16_decode,
    pcm16_encode,
};
use live_assist::core::realtime::gemini::parse_server_message;
use live_assist::LogStore;

fn sine(samples: usize, rate: u32) -> Vec<f32> {
    (0..samples)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
        .collect()
}

/// Device-rate capture blocks down to the 16kHz wire rate
fn bench_resampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("resampler");
    group.measurement_time(Duration::from_secs(5));

    for from_rate in [44_100u32, 48_000] {
        // 10ms device block
        let block = sine(from_rate as usize / 100, from_rate);
        group.throughput(Throughput::Elements(block.len() as u64));
        group.bench_with_input(BenchmarkId::new("to_16k", from_rate), &block, |b, block| {
            let mut resampler =
                StreamResampler::new(from_rate, 16_000, CAPTURE_RESAMPLER_BLOCK).unwrap();
            let mut out = Vec::with_capacity(block.len());
            b.iter(|| {
                out.clear();
                resampler.process(black_box(block), &mut out).unwrap();
            });
        });
    }

    let model_audio = sine(2400, 24_000);
    group.bench_function("24k_to_48k", |b| {
        let mut resampler =
            StreamResampler::new(24_000, 48_000, PLAYBACK_RESAMPLER_BLOCK).unwrap();
        let mut out = Vec::with_capacity(4800);
        b.iter(|| {
            out.clear();
            resampler.process(black_box(&model_audio), &mut out).unwrap();
        });
    });

    group.finish();
}

/// PCM16 conversions for one 2048-sample capture chunk
fn bench_pcm_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("pcm16");
    let chunk = sine(2048, 16_000);
    let bytes = pcm16_encode(&chunk);

    group.throughput(Throughput::Elements(chunk.len() as u64));
    group.bench_function("encode", |b| b.iter(|| pcm16_encode(black_box(&chunk))));
    group.bench_function("encode_base64", |b| {
        b.iter(|| pcm16_base64(black_box(&chunk)))
    });
    group.bench_function("decode", |b| b.iter(|| pcm16_decode(black_box(&bytes))));

    group.finish();
}

/// Inbound audio message parsing (base64 decode included)
fn bench_server_message_parsing(c: &mut Criterion) {
    let data = pcm16_base64(&sine(2400, 24_000));
    let raw = format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{data}"}}}}]}}}}}}"#
    );

    let mut group = c.benchmark_group("server_message");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("audio_chunk", |b| {
        b.iter(|| parse_server_message(black_box(&raw)))
    });
    group.finish();
}

fn bench_log_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_store");

    group.bench_function("push_distinct", |b| {
        let logs = LogStore::new(100);
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            logs.push("server.audio", n.to_string());
        });
    });

    group.bench_function("push_repeat", |b| {
        let logs = LogStore::new(100);
        b.iter(|| logs.push(black_box("client.realtimeInput"), black_box("audio/pcm;rate=16000")));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_resampler,
    bench_pcm_encoding,
    bench_server_message_parsing,
    bench_log_store,
);

criterion_main!(benches);
