//! Shared helpers: synthetic recordings and hand-built FIF files.
#![allow(dead_code)]

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use fiffraw::fiff::constants::*;
use fiffraw::fiff::info::{write_meas_info, FileId};
use fiffraw::fiff::tree::load_directory;
use fiffraw::{FifWriter, FifError, MeasInfo, RawFif, TagHeader, TagWrite};
use ndarray::Array2;

/// Deterministic sample value, exact in f32 for the sizes used here.
pub fn value(ch: usize, t: usize) -> f64 {
    (ch * 100_000 + t) as f64
}

pub fn info(n_chan: usize, sfreq: f64) -> MeasInfo {
    let names: Vec<String> = (0..n_chan).map(|i| format!("EEG {:03}", i + 1)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    MeasInfo::from_names(&refs, FIFFV_EEG_CH, sfreq)
}

pub fn ramp_data(n_chan: usize, n_times: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_chan, n_times), |(c, t)| value(c, t))
}

/// In-memory recording filled with [`value`].
pub fn ramp(n_chan: usize, n_times: usize, sfreq: f64, first_samp: i64) -> RawFif {
    RawFif::from_array(info(n_chan, sfreq), ramp_data(n_chan, n_times), first_samp).unwrap()
}

/// Root cause of an error, if it is classified.
pub fn fif_error(err: &anyhow::Error) -> Option<&FifError> {
    err.downcast_ref::<FifError>()
}

/// Tag directory of a file on disk.
pub fn directory(path: &Path) -> Vec<TagHeader> {
    let mut reader = BufReader::new(File::open(path).unwrap());
    load_directory(&mut reader).unwrap().entries
}

/// Sample counts of the data buffers of a single-file save.
pub fn buffer_lengths(path: &Path, n_chan: usize, bytes_per_value: usize) -> Vec<usize> {
    directory(path)
        .iter()
        .filter(|t| t.kind == FIFF_DATA_BUFFER)
        .map(|t| t.size as usize / (n_chan * bytes_per_value))
        .collect()
}

/// Position the `FIFF_DIR_POINTER` of a file points at.
pub fn dir_pointer(bytes: &[u8]) -> usize {
    // FILE_ID tag (16 + 20 bytes), then the pointer tag header.
    i32::from_be_bytes([bytes[52], bytes[53], bytes[54], bytes[55]]) as usize
}

// ── Hand-built files ──────────────────────────────────────────────────────

/// Content of a raw-data block.
pub enum Item {
    /// `[n_chan, n_samp]` samples, written as floats.
    Buffer(Array2<f64>),
    /// `FIFF_DATA_SKIP` (whole buffers).
    Skip(i32),
    /// `FIFF_DATA_SKIP_SAMP` (samples).
    SkipSamp(i32),
}

/// Float buffer payload, interleaved `[n_samp, n_chan]`.
pub fn float_payload(block: &Array2<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    for t in 0..block.ncols() {
        for c in 0..block.nrows() {
            out.extend_from_slice(&(block[[c, t]] as f32).to_be_bytes());
        }
    }
    out
}

/// Write a file with a raw block of kind `block` built from `items`.
pub fn write_custom(path: &Path, info: &MeasInfo, block: i32, first_samp: i32, items: &[Item]) {
    let mut w = FifWriter::create(path).unwrap();
    w.write_id(FIFF_FILE_ID, &FileId::now()).unwrap();
    w.write_int(FIFF_DIR_POINTER, &[-1]).unwrap();
    w.start_block(FIFFB_MEAS).unwrap();
    write_meas_info(&mut w, info).unwrap();
    w.start_block(block).unwrap();
    w.write_int(FIFF_FIRST_SAMPLE, &[first_samp]).unwrap();
    for item in items {
        match item {
            Item::Buffer(b) => w.write_samples(FIFFT_FLOAT, &float_payload(b)).unwrap(),
            Item::Skip(n) => w.write_int(FIFF_DATA_SKIP, &[*n]).unwrap(),
            Item::SkipSamp(n) => w.write_int(FIFF_DATA_SKIP_SAMP, &[*n]).unwrap(),
        }
    }
    w.end_block(block).unwrap();
    w.end_block(FIFFB_MEAS).unwrap();
    w.finish().unwrap();
}

/// Samples `start..stop` of channel ramp data as one buffer.
pub fn ramp_buffer(n_chan: usize, start: usize, stop: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_chan, stop - start), |(c, t)| value(c, start + t))
}
