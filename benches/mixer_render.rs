//! Mixer render benchmarks
//!
//! Cost of summing N stems into one interleaved output block.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use stem_mixer::audio::{AudioBuffer, Mixer};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_SIZES: &[usize] = &[64, 256, 1024];

fn stem(seconds: f64, channels: u16) -> Arc<AudioBuffer> {
    let frames = (seconds * SAMPLE_RATE as f64) as usize;
    let samples = (0..frames * channels as usize)
        .map(|i| ((i as f32) * 0.01).sin() * 0.5)
        .collect();
    Arc::new(AudioBuffer::new(samples, channels, SAMPLE_RATE))
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer_render");
    let buffer = stem(30.0, 2);

    for &tracks in &[1usize, 4, 16] {
        for &block in BLOCK_SIZES {
            let (mixer, _completions) = Mixer::new(0.7);
            let strips: Vec<_> = (0..tracks)
                .map(|i| {
                    let strip = mixer.add_channel(i as u8 + 1);
                    strip.set_volume(0.7);
                    strip.set_pan(i as f32 / tracks as f32 * 2.0 - 1.0);
                    strip
                })
                .collect();
            let mut out = vec![0.0f32; block * 2];

            group.throughput(Throughput::Elements((block * tracks) as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{}_tracks", tracks), block),
                &block,
                |b, _| {
                    b.iter(|| {
                        for strip in &strips {
                            if strip.voice_generation().is_none() {
                                strip.start_voice(buffer.clone(), 0.0, 1.0, 1);
                            }
                        }
                        mixer.render(&mut out, 2, SAMPLE_RATE);
                        black_box(&out);
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_resampled_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer_render_rate");
    let buffer = stem(30.0, 1);

    for &rate in &[0.5f64, 1.0, 1.5] {
        let (mixer, _completions) = Mixer::new(1.0);
        let strip = mixer.add_channel(1);
        let mut out = vec![0.0f32; 512 * 2];

        group.bench_with_input(BenchmarkId::new("mono", rate), &rate, |b, &rate| {
            b.iter(|| {
                if strip.voice_generation().is_none() {
                    strip.start_voice(buffer.clone(), 0.0, rate, 1);
                }
                mixer.render(&mut out, 2, 44_100);
                black_box(&out);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_render, bench_resampled_render);
criterion_main!(benches);
