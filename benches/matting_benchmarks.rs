use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use efi_bgremove::{services::flatten_on_white, utils::matting, AlphaMattingConfig};
use image::{GrayImage, Luma, Rgba, RgbaImage};

/// Soft mask with a disc of foreground and a blurry edge
fn synthetic_mask(size: u32) -> GrayImage {
    let center = size as f32 / 2.0;
    let radius = size as f32 / 3.0;
    GrayImage::from_fn(size, size, |x, y| {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        let distance = (dx * dx + dy * dy).sqrt();
        let value = ((radius + 8.0 - distance) / 16.0).clamp(0.0, 1.0) * 255.0;
        Luma([value as u8])
    })
}

fn synthetic_image(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]))
}

fn benchmark_cutout(c: &mut Criterion) {
    let mut group = c.benchmark_group("cutout");
    group.sample_size(10);

    for size in [320u32, 1024] {
        let image = synthetic_image(size);
        let mask = synthetic_mask(size);

        let enabled = AlphaMattingConfig::default();
        group.bench_with_input(BenchmarkId::new("matting", size), &size, |b, _| {
            b.iter(|| matting::cutout(black_box(&image), black_box(&mask), &enabled).unwrap());
        });

        let disabled = AlphaMattingConfig {
            enabled: false,
            ..AlphaMattingConfig::default()
        };
        group.bench_with_input(BenchmarkId::new("soft_mask", size), &size, |b, _| {
            b.iter(|| matting::cutout(black_box(&image), black_box(&mask), &disabled).unwrap());
        });
    }

    group.finish();
}

fn benchmark_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_on_white");

    for size in [320u32, 1024] {
        let mut image = synthetic_image(size);
        let mask = synthetic_mask(size);
        for (pixel, alpha) in image.pixels_mut().zip(mask.pixels()) {
            pixel.0[3] = alpha.0[0];
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| flatten_on_white(black_box(&image)));
        });
    }

    group.finish();
}

criterion_group!(matting_benches, benchmark_cutout, benchmark_flatten);
criterion_main!(matting_benches);
