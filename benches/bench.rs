use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgb, RgbImage};

use texton_bow::{compute_histogram, seeded_rng, DictionaryParams, FilterBank, VisualDictionary};

fn test_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) * 3 % 256) as u8])
    })
}

/// Benchmark for FilterBank::filter and VisualDictionary::word_map
fn bench_word_map(c: &mut Criterion) {
    let fb = FilterBank::default();
    let images = vec![test_image(48, 32), test_image(32, 48)];
    let params = DictionaryParams {
        alpha: 100,
        words: 20,
        ..DictionaryParams::default()
    };
    let dict = VisualDictionary::build(&params, &fb, &images, &mut seeded_rng(Some(0))).unwrap();
    let image = test_image(64, 64);

    c.bench_function("filter", |b| b.iter(|| fb.filter(black_box(&image))));

    let response = fb.filter(&image);
    c.bench_function("quantize_image", |b| {
        b.iter(|| dict.quantize_image(black_box(&response), 64, 64))
    });

    let map = dict.word_map(&image, &fb).unwrap();
    c.bench_function("compute_histogram", |b| {
        b.iter(|| compute_histogram(black_box(&map), dict.words()))
    });
}

criterion_group!(benches, bench_word_map);
criterion_main!(benches);
