use beacon_core::pipeline::{Pipeline, PipelineConfig};
use beacon_core::polar_kf::{PolarKalmanFilter, PolarKfConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uwb_protocol::binary::{AnchorInfo, BinaryFrame, TagInfo};
use uwb_protocol::{DecoderConfig, RawChunk, WireFormat};

/// One chunk carrying a frame for each of `n` tags walking on a circle.
fn make_chunk(n: usize, step: usize, t: f64) -> RawChunk {
    let mut bytes = Vec::with_capacity(n * 33);
    for i in 0..n {
        let angle = ((i * 37 + step) % 120) as f64 - 60.0;
        let frame = BinaryFrame::new(
            1,
            AnchorInfo {
                role: 1,
                anchor_id: 0,
                local_time: step as u32,
                system_time: step as u32,
                voltage_mv: 3_300,
            },
            TagInfo {
                tag_id: i as u8,
                distance_mm: 2_000 + (i as i32) * 50,
                angle_centideg: (angle * 100.0) as i16,
                fp_db: -80,
                rx_db: -78,
            },
        );
        bytes.extend_from_slice(&frame.encode());
    }
    RawChunk::new(bytes, t)
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for n in [1, 16, 128] {
        group.bench_function(format!("{n}_tags"), |b| {
            let config = PipelineConfig {
                decoder: DecoderConfig {
                    format: WireFormat::Binary,
                    ..Default::default()
                },
                ..Default::default()
            };
            let chunks: Vec<RawChunk> = (0..50).map(|s| make_chunk(n, s, s as f64 * 0.05)).collect();
            b.iter(|| {
                let mut pipeline = Pipeline::new(config.clone());
                for chunk in &chunks {
                    black_box(pipeline.submit_chunk(chunk.clone()));
                }
            });
        });
    }

    group.finish();
}

fn bench_filter_step(c: &mut Criterion) {
    c.bench_function("polar_kf_step", |b| {
        let mut kf = PolarKalmanFilter::new(PolarKfConfig::default());
        let mut t = 0.0;
        b.iter(|| {
            t += 0.05;
            black_box(kf.filter_measurement(3.0, 10.0, t))
        });
    });
}

criterion_group!(benches, bench_pipeline, bench_filter_step);
criterion_main!(benches);
