use std::hint::black_box;
use std::path::{Path, PathBuf};

use criterion::{criterion_group, criterion_main, Criterion};
use fiffraw::{open_raw, MeasInfo, RawFif, SaveOptions, SplitSize};
use ndarray::Array2;

const N_CHAN: usize = 32;
const SFREQ: f64 = 1000.0;
const N_TIMES: usize = 60_000;

/// One minute of 32-channel data, once as a single file and once split
/// into parts of at most 2 MB.
fn fixtures(dir: &Path) -> (PathBuf, PathBuf) {
    let names: Vec<String> = (0..N_CHAN).map(|i| format!("EEG {:03}", i + 1)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let info = MeasInfo::from_names(&refs, fiffraw::fiff::constants::FIFFV_EEG_CH, SFREQ);
    let data = Array2::from_shape_fn((N_CHAN, N_TIMES), |(c, t)| ((t as f64) * 0.01 + c as f64).sin() * 1e-5);
    let raw = RawFif::from_array(info, data, 0).unwrap();

    let single = dir.join("bench_raw.fif");
    raw.save(&single, &SaveOptions::default()).unwrap();
    let split = dir.join("bench_split_raw.fif");
    let opts = SaveOptions { split_size: SplitSize::from_bytes(2_000_000).unwrap(), ..SaveOptions::default() };
    raw.save(&split, &opts).unwrap();
    (single, split)
}

fn bench_reads(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (single, split) = fixtures(dir.path());

    c.bench_function("open_raw (header + buffer map)", |b| {
        b.iter(|| {
            let raw = open_raw(black_box(&single)).unwrap();
            black_box(raw.n_times())
        })
    });

    c.bench_function("open_raw split chain", |b| {
        b.iter(|| {
            let raw = open_raw(black_box(&split)).unwrap();
            black_box(raw.filenames().len())
        })
    });

    let raw = open_raw(&single).unwrap();
    c.bench_function("read_all_data [32×60000 f64]", |b| {
        b.iter(|| {
            let data = raw.read_all_data().unwrap();
            black_box(data.ncols())
        })
    });

    c.bench_function("read_slice 1000 samples (1 s)", |b| {
        b.iter(|| {
            let data = raw.read_slice(black_box(30_500), black_box(31_500)).unwrap();
            black_box(data[[0, 0]])
        })
    });
}

fn bench_save(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (single, _) = fixtures(dir.path());
    let mut raw = open_raw(&single).unwrap();
    raw.load_data().unwrap();
    let out = dir.path().join("resaved_raw.fif");
    let opts = SaveOptions { overwrite: true, ..SaveOptions::default() };
    c.bench_function("save 60 s single precision", |b| {
        b.iter(|| {
            let manifest = raw.save(black_box(&out), &opts).unwrap();
            black_box(manifest.paths.len())
        })
    });
}

criterion_group!(benches, bench_reads, bench_save);
criterion_main!(benches);
