#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use av_ffpipe::{
    FrameGeometry, FrameReader, PixelLayout, SampleType,
    diagnostics::{self, StreamKind},
};
use criterion::{Criterion, criterion_group, criterion_main};
use std::{hint::black_box, io::Cursor};

const BANNER: &str = "\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'big_buck_bunny_720p_1mb.mp4':
  Metadata:
    major_brand     : isom
    creation_time   : 1970-01-01T00:00:00.000000Z
  Duration: 00:00:05.31, start: 0.000000, bitrate: 1589 kb/s
    Stream #0:0(und): Video: h264 (Main) (avc1 / 0x31637661), yuv420p, 1280x720 [SAR 1:1 DAR 16:9], 1205 kb/s, 25 fps, 25 tbr, 12800 tbn, 50 tbc (default)
    Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, 5.1, fltp, 384 kb/s (default)
At least one output file must be specified
";

const WIDTH: usize = 1280;
const HEIGHT: usize = 720;
const FRAMES: usize = 8;

fn banner_benchmark(c: &mut Criterion) {
    c.bench_function("banner parse", |b| {
        b.iter(|| {
            let (input, _) = diagnostics::split_sections(black_box(BANNER));
            let video = diagnostics::stream_line(input, StreamKind::Video, 0).unwrap();
            let audio = diagnostics::stream_line(input, StreamKind::Audio, 0).unwrap();
            black_box((
                diagnostics::resolution(video),
                diagnostics::framerate(video),
                diagnostics::pixel_format(video),
                diagnostics::decoder(video),
                diagnostics::bitrate(video),
                diagnostics::sample_rate(audio),
                diagnostics::duration(input),
            ))
        })
    });
}

fn reshape_benchmark(c: &mut Criterion, name: &str, depth: usize, layout: PixelLayout) {
    let geometry = FrameGeometry {
        width: WIDTH,
        height: HEIGHT,
        depth,
        sample_type: SampleType::U8,
        layout,
    };
    let stream = vec![0x80_u8; geometry.frame_len() * FRAMES];
    c.bench_function(name, |b| {
        b.iter_batched(
            || FrameReader::new(Cursor::new(stream.as_slice()), geometry),
            |mut reader| {
                let frames = reader.frames::<u8>(None).count();
                assert_eq!(frames, FRAMES);
            },
            criterion::BatchSize::PerIteration,
        )
    });
}

fn packed_benchmark(c: &mut Criterion) {
    reshape_benchmark(c, "rgb24 frames 720p", 3, PixelLayout::Packed);
}

fn planar_benchmark(c: &mut Criterion) {
    reshape_benchmark(c, "yuv444p frames 720p", 3, PixelLayout::Planar);
}

criterion_group!(
    benches,
    banner_benchmark,
    packed_benchmark,
    planar_benchmark
);
criterion_main!(benches);
