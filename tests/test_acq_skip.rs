//! Acquisition skips: reading, annotating and writing them back.
mod common;

use std::path::Path;

use common::*;
use fiffraw::fiff::constants::*;
use fiffraw::{open_raw, ChannelSelector, RawFif, RejectByAnnotation, SaveOptions, Warning};

const N_CHAN: usize = 2;
const FIRST: i32 = 1000;
/// Skipped sample ranges, relative to the first sample.
const SKIPS: [(usize, usize); 3] = [(2000, 4000), (7000, 9000), (11000, 14000)];

/// 17 s at 1 kHz in 1 s buffers, with the three skips encoded in both
/// skip flavours.
fn write_skipped(path: &Path) {
    let buf = |k: usize| Item::Buffer(ramp_buffer(N_CHAN, k * 1000, (k + 1) * 1000));
    let items = vec![
        buf(0),
        buf(1),
        Item::Skip(2),
        buf(4),
        buf(5),
        buf(6),
        Item::SkipSamp(2000),
        buf(9),
        buf(10),
        Item::Skip(3),
        buf(14),
        buf(15),
        buf(16),
    ];
    write_custom(path, &info(N_CHAN, 1000.0), FIFFB_RAW_DATA, FIRST, &items);
}

fn in_skip(t: usize) -> bool {
    SKIPS.iter().any(|&(a, b)| a <= t && t < b)
}

fn assert_skipped_content(raw: &RawFif) {
    let data = raw.read_all_data().unwrap();
    assert_eq!(data.dim(), (N_CHAN, 17_000));
    for t in (0..17_000).step_by(250) {
        for c in 0..N_CHAN {
            let expected = if in_skip(t) { 0.0 } else { value(c, t) };
            assert_eq!(data[[c, t]], expected, "channel {c}, sample {t}");
        }
    }
}

#[test]
fn skips_read_as_zeros_and_are_annotated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("skips_raw.fif");
    write_skipped(&path);

    let raw = open_raw(&path).unwrap();
    assert_eq!(raw.first_samp(), FIRST as i64);
    assert_eq!(raw.n_times(), 17_000);
    assert_skipped_content(&raw);

    let skips: Vec<(f64, f64)> = raw
        .annotations
        .iter()
        .filter(|a| a.description == "BAD_ACQ_SKIP")
        .map(|a| (a.onset, a.duration))
        .collect();
    assert_eq!(skips, vec![(3.0, 2.0), (8.0, 2.0), (12.0, 3.0)]);
    let n_warn = raw.warnings.iter().filter(|w| matches!(w, Warning::AcquisitionSkip { .. })).count();
    assert_eq!(n_warn, 3);

    let kept = raw.get_data(&ChannelSelector::All, 0, None, RejectByAnnotation::Omit).unwrap();
    assert_eq!(kept.ncols(), 17_000 - 7_000);
    assert_eq!(kept[[1, 2000]], value(1, 4000));
}

#[test]
fn skips_survive_a_save() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("skips_raw.fif");
    write_skipped(&src);
    let raw = open_raw(&src).unwrap();

    let out = dir.path().join("resaved_raw.fif");
    let manifest = raw.save(&out, &SaveOptions::default()).unwrap();
    assert!(manifest.warnings.is_empty(), "{:?}", manifest.warnings);

    // skipped seconds are not stored
    let entries = directory(&out);
    assert_eq!(entries.iter().filter(|e| e.kind == FIFF_DATA_BUFFER).count(), 10);
    assert_eq!(entries.iter().filter(|e| e.kind == FIFF_DATA_SKIP_SAMP).count(), 7);

    let back = open_raw(&out).unwrap();
    assert_eq!(back.first_samp(), FIRST as i64);
    assert_skipped_content(&back);
    let n_skip = back.annotations.iter().filter(|a| a.description == "BAD_ACQ_SKIP").count();
    assert_eq!(n_skip, 3);
}

#[test]
fn misaligned_buffers_warn_once() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("skips_raw.fif");
    write_skipped(&src);
    let raw = open_raw(&src).unwrap();

    let out = dir.path().join("misaligned_raw.fif");
    let opts = SaveOptions { buffer_size_sec: Some(0.3), ..SaveOptions::default() };
    let manifest = raw.save(&out, &opts).unwrap();
    let n = manifest.warnings.iter().filter(|w| matches!(w, Warning::SkipNotAligned { .. })).count();
    assert_eq!(n, 1);
    assert!(manifest.warnings[0].to_string().contains("did not fit evenly"));
    assert_skipped_content(&open_raw(&out).unwrap());
}

#[test]
fn leading_skip_moves_first_sample() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lead_raw.fif");
    let items = vec![Item::Skip(1), Item::Buffer(ramp_buffer(1, 0, 500))];
    write_custom(&path, &info(1, 500.0), FIFFB_RAW_DATA, 0, &items);
    let raw = open_raw(&path).unwrap();
    assert_eq!(raw.first_samp(), 500);
    assert_eq!(raw.n_times(), 500);
    assert!(raw.annotations.is_empty());
    assert!(raw.warnings.is_empty());
}

#[test]
fn trailing_skip_extends_the_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trail_raw.fif");
    let items = vec![Item::Buffer(ramp_buffer(1, 0, 500)), Item::SkipSamp(250)];
    write_custom(&path, &info(1, 500.0), FIFFB_RAW_DATA, 0, &items);
    let raw = open_raw(&path).unwrap();
    assert_eq!(raw.n_times(), 750);
    let a = raw.annotations.iter().next().unwrap();
    assert_eq!((a.onset, a.duration), (1.0, 0.5));
    let tail = raw.read_slice(500, 750).unwrap();
    assert!(tail.iter().all(|&v| v == 0.0));
}
