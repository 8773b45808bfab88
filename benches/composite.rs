use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{Rgb, RgbImage};
use rust_arqr::Point;
use rust_arqr::render::PreviewCompositor;
use rust_arqr::render::composite::placement_mask;

fn code_corners() -> [Point; 4] {
    [
        Point::new(560.0, 220.0),
        Point::new(700.0, 230.0),
        Point::new(690.0, 370.0),
        Point::new(555.0, 360.0),
    ]
}

fn bench_composite_720p(c: &mut Criterion) {
    let frame = RgbImage::from_fn(1280, 720, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 60]));
    let overlay = RgbImage::from_fn(1024, 768, |x, y| Rgb([200, (x % 256) as u8, (y % 256) as u8]));
    let compositor = PreviewCompositor::default();
    let corners = code_corners();

    c.bench_function("composite_1280x720_overlay_1024x768", |b| {
        b.iter(|| {
            compositor.composite(
                black_box(&frame),
                black_box(&corners),
                black_box(&overlay),
                1280,
                720,
            )
        })
    });
}

fn bench_placement_mask(c: &mut Criterion) {
    let compositor = PreviewCompositor::default();
    let placement = compositor.placement_quad(&code_corners());
    c.bench_function("placement_mask_1280x720", |b| {
        b.iter(|| placement_mask(black_box(&placement), 1280, 720))
    });
}

criterion_group!(benches, bench_composite_720p, bench_placement_mask);
criterion_main!(benches);
