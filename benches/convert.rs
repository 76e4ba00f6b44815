use criterion::{criterion_group, criterion_main, Criterion};
use emergent_camera::{
    convert::{convert, encode_samples},
    format::PixelFormat,
};

fn native_frame(format: PixelFormat, width: u32, height: u32) -> Vec<u8> {
    let len = format.buffer_len(width, height).unwrap();
    let mut buf = vec![0u8; len];
    match format {
        PixelFormat::Bgr8 | PixelFormat::Yuv422 => {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = i as u8;
            }
        }
        _ => {
            let mask = (1u32 << format.bit_depth()) - 1;
            let samples: Vec<u16> = (0..width * height).map(|i| (i & mask) as u16).collect();
            encode_samples(format, &samples, &mut buf).unwrap();
        }
    }
    buf
}

pub fn benchmark_convert(c: &mut Criterion) {
    let pairs = [
        (PixelFormat::Mono12Packed, PixelFormat::Mono16),
        (PixelFormat::Mono10Packed, PixelFormat::Mono8),
        (PixelFormat::Mono12, PixelFormat::Mono8),
        (PixelFormat::Bgr8, PixelFormat::Rgb8),
        (PixelFormat::Yuv422, PixelFormat::Rgb8),
        (PixelFormat::BayerGB8, PixelFormat::Rgb8),
        (PixelFormat::BayerGB12Packed, PixelFormat::Rgb16),
    ];
    let dims = [(640, 480), (1920, 1080), (3840, 2160)];

    for (from, to) in pairs.iter() {
        let mut group = c.benchmark_group(format!("convert/{}-{}", from, to));
        for (width, height) in dims.iter() {
            let src = native_frame(*from, *width, *height);
            let mut dst = vec![0u8; to.buffer_len(*width, *height).unwrap()];
            group.bench_function(format!("{}x{}", width, height), |b| {
                b.iter(|| convert(*from, &src, *to, &mut dst, *width, *height))
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_convert);
criterion_main!(benches);
