use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rcwt::demux::{DemuxOptions, RcwtDemuxer};
use rcwt::index::SeekPolicy;
use std::io::Cursor;

const HEADER: [u8; 11] = [0xCC, 0xCC, 0xED, 0xCC, 0x00, 0x50, 0x00, 0x01, 0x00, 0x00, 0x00];

/// One cluster per 29.97 fps frame, two cc triplets each, one hour long.
fn one_hour_capture() -> Vec<u8> {
    let mut data = HEADER.to_vec();
    for frame in 0..107_892i64 {
        data.extend_from_slice(&(frame * 1001 / 30).to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&[0xFC, 0x94, 0x20, 0xFD, 0x80, 0x80]);
    }
    data
}

fn bench_demux(c: &mut Criterion) {
    let data = one_hour_capture();
    c.bench_function("demux_1h_capture", |b| {
        b.iter(|| {
            RcwtDemuxer::from_reader(Cursor::new(black_box(&data)), DemuxOptions::default()).unwrap()
        })
    });
}

fn bench_seek(c: &mut Criterion) {
    let demux = RcwtDemuxer::from_reader(Cursor::new(one_hour_capture()), DemuxOptions::default())
        .unwrap();
    let index = demux.index();
    c.bench_function("seek_1h_capture", |b| {
        b.iter(|| index.locate(black_box(1_800_000), SeekPolicy::AtOrAfter))
    });
}

criterion_group!(benches, bench_demux, bench_seek);
criterion_main!(benches);
