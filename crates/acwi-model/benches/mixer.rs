//! Wavelet mixer and mixing-block throughput on a 14×14 token grid.

use acwi_model::block::MixingBlock;
use acwi_model::init::InitScheme;
use acwi_model::{AcwiConfig, WaveletMixer};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_mixer(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut group = c.benchmark_group("wavelet_mixer");
    for cfg in [AcwiConfig::deit_tiny_acwi(), AcwiConfig::deit_small_acwi()] {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let dim = cfg.embed_dim_acwi;
        let mixer = WaveletMixer::new(dim, &cfg, &InitScheme::default(), vb.pp("filter")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (4, 196, dim), &device).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("dim{}", dim)), &x, |b, x| {
            b.iter(|| black_box(mixer.forward(black_box(x), Some((14, 14))).unwrap()))
        });
    }
    group.finish();
}

fn bench_block(c: &mut Criterion) {
    let device = Device::Cpu;
    let cfg = AcwiConfig::deit_tiny_acwi();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let block = MixingBlock::new(&cfg, 0.0, &InitScheme::default(), vb.pp("blocks_acwi.0")).unwrap();
    let x = Tensor::randn(0f32, 1.0, (4, 196, cfg.embed_dim_acwi), &device).unwrap();

    c.bench_function("mixing_block_dim192", |b| {
        b.iter(|| black_box(block.forward_t(black_box(&x), Some((14, 14)), false).unwrap()))
    });
}

criterion_group!(benches, bench_mixer, bench_block);
criterion_main!(benches);
