//! Buffer map of one physical file.
//!
//! [`BufferExtras`] records which tags of a file hold which samples:
//! `ent[i]` covers samples `bounds[i]..bounds[i + 1]` of the file (counted
//! from its first sample).  Acquisition skips occupy sample slots without
//! stored data ([`BufferEntry::Skip`]); they read back as zeros and are
//! reported as annotated gaps.  The map is built once when a file is opened
//! and never changes afterwards; views onto it are shared through `Arc`.
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ndarray::{s, Array2};

use super::constants::*;
use super::tag::{be_f32, be_f64, be_i32, read_i32, read_payload, TagHeader};
use crate::error::FifError;

// ── Byte sources ──────────────────────────────────────────────────────────

/// Anything samples can be read from.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Where the bytes of one physical file live.
#[derive(Debug, Clone)]
pub enum Source {
    File(PathBuf),
    /// A stream read fully into memory.
    Memory(Arc<[u8]>),
}

impl Source {
    /// Open a fresh reader.  Handles are scoped to one read operation.
    pub fn open(&self) -> Result<Box<dyn ReadSeek>> {
        match self {
            Source::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("open {}", path.display()))?;
                Ok(Box::new(BufReader::new(file)))
            }
            Source::Memory(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Source::File(p) => Some(p),
            Source::Memory(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Source::File(p) => p.display().to_string(),
            Source::Memory(b) => format!("<stream of {} bytes>", b.len()),
        }
    }
}

// ── Buffer map ────────────────────────────────────────────────────────────

/// One slot of the buffer map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferEntry {
    /// A `FIFF_DATA_BUFFER` tag.
    Data(TagHeader),
    /// An acquisition skip; no samples are stored.
    Skip,
}

/// Buffer map of one file; see the module docs.
#[derive(Debug, Clone)]
pub struct BufferExtras {
    pub source:      Source,
    pub n_chan:      usize,
    /// Per-channel calibration, `cal × range`.
    pub cals:        Vec<f64>,
    pub ent:         Vec<BufferEntry>,
    /// Cumulative sample counts, `ent.len() + 1` values starting at 0.
    pub bounds:      Vec<usize>,
    /// Sample type of the data buffers on disk.
    pub orig_format: u32,
    pub first_samp:  i64,
    pub last_samp:   i64,
    /// Samples in the first data buffer.
    pub buffer_size: usize,
}

impl BufferExtras {
    /// Samples contributed by this file, skips included.
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.bounds.last().copied().unwrap_or(0)
    }

    /// Acquisition skips as `(absolute first sample, length)`.
    pub fn skips(&self) -> Vec<(i64, usize)> {
        self.ent
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, BufferEntry::Skip))
            .map(|(i, _)| (self.first_samp + self.bounds[i] as i64, self.bounds[i + 1] - self.bounds[i]))
            .collect()
    }

    /// Calibrated samples `[picks.len(), stop - start]` for the file-relative
    /// range `start..stop`; `picks` index the file's channels.
    pub fn read(
        &self,
        reader: &mut dyn ReadSeek,
        start: usize,
        stop: usize,
        picks: &[usize],
    ) -> Result<Array2<f64>> {
        let stop = stop.min(self.n_samples());
        let mut out = Array2::<f64>::zeros((picks.len(), stop.saturating_sub(start)));
        if start >= stop {
            return Ok(out);
        }
        let first = self.bounds.partition_point(|&b| b <= start).saturating_sub(1);
        for i in first..self.ent.len() {
            let (b0, b1) = (self.bounds[i], self.bounds[i + 1]);
            if b0 >= stop {
                break;
            }
            if b1 <= start {
                continue;
            }
            let BufferEntry::Data(tag) = &self.ent[i] else { continue };
            let block = read_buffer_data(reader, tag, b1 - b0, self.n_chan, &self.cals, picks)?;
            let (lo, hi) = (start.max(b0), stop.min(b1));
            out.slice_mut(s![.., lo - start..hi - start])
                .assign(&block.slice(s![.., lo - b0..hi - b0]));
        }
        Ok(out)
    }
}

/// Map the entries of a raw-data block to samples.
///
/// `FIFF_DATA_SKIP` counts whole buffers of the size of the next data
/// buffer (or the previous one for a trailing skip); `FIFF_DATA_SKIP_SAMP`
/// counts samples.  A skip before the first data buffer moves `first_samp`
/// forward instead of creating a gap.
pub fn compute_bounds<R: Read + Seek>(
    reader: &mut R,
    entries: &[TagHeader],
    n_chan: usize,
    cals: Vec<f64>,
    source: Source,
) -> Result<BufferExtras> {
    if n_chan == 0 {
        bail!(FifError::Decode("raw data declare zero channels".into()));
    }
    let mut first_samp: i64 = 0;
    for e in entries.iter().filter(|e| e.kind == FIFF_FIRST_SAMPLE) {
        first_samp = read_i32(reader, e)? as i64;
    }

    let mut ent = Vec::new();
    let mut bounds = vec![0usize];
    let mut skip_buffers: i64 = 0;
    let mut skip_samps: i64 = 0;
    let mut last_nsamp: Option<usize> = None;
    let mut orig_format: Option<u32> = None;

    for e in entries {
        match e.kind {
            FIFF_DATA_SKIP => skip_buffers += read_i32(reader, e)?.max(0) as i64,
            FIFF_DATA_SKIP_SAMP => skip_samps += read_i32(reader, e)?.max(0) as i64,
            FIFF_DATA_BUFFER => {
                let bps = bytes_per_sample(e.ftype).ok_or_else(|| {
                    FifError::Decode(format!("unknown buffer type {} @ {:#x}", e.ftype, e.pos))
                })?;
                let size = e.size as usize;
                if size % (bps * n_chan) != 0 {
                    bail!(FifError::Decode(format!(
                        "buffer @ {:#x} of {size} bytes is not a whole number of {n_chan}-channel samples",
                        e.pos
                    )));
                }
                let nsamp = size / (bps * n_chan);
                let skip = (skip_buffers * nsamp as i64 + skip_samps) as usize;
                skip_buffers = 0;
                skip_samps = 0;
                let end = bounds[bounds.len() - 1];
                if skip > 0 {
                    if last_nsamp.is_none() {
                        first_samp += skip as i64;
                    } else {
                        ent.push(BufferEntry::Skip);
                        bounds.push(end + skip);
                    }
                }
                let end = bounds[bounds.len() - 1];
                ent.push(BufferEntry::Data(*e));
                bounds.push(end + nsamp);
                last_nsamp = Some(nsamp);
                orig_format.get_or_insert(e.ftype);
            }
            _ => {}
        }
    }

    let Some(buffer_nsamp) = last_nsamp else {
        bail!(FifError::Decode("no FIFF_DATA_BUFFER tags found in raw-data block".into()));
    };
    let trailing = (skip_buffers * buffer_nsamp as i64 + skip_samps) as usize;
    if trailing > 0 {
        let end = bounds[bounds.len() - 1];
        ent.push(BufferEntry::Skip);
        bounds.push(end + trailing);
    }
    let buffer_size = bounds
        .windows(2)
        .zip(&ent)
        .find(|(_, e)| matches!(e, BufferEntry::Data(_)))
        .map(|(w, _)| w[1] - w[0])
        .unwrap_or(buffer_nsamp);
    let total = bounds[bounds.len() - 1];

    Ok(BufferExtras {
        source,
        n_chan,
        cals,
        ent,
        bounds,
        orig_format: orig_format.unwrap_or(FIFFT_FLOAT),
        first_samp,
        last_samp: first_samp + total as i64 - 1,
        buffer_size,
    })
}

// ── Buffer data reader ───────────────────────────────────────────────────

/// Read one data buffer and return `[picks.len(), n_samp]` f64 with calibration.
///
/// The on-disk layout is `[n_samp, n_chan]` (row-major, big-endian), i.e.
/// interleaved channels.  Complex samples contribute their real part.
pub fn read_buffer_data<R: Read + Seek + ?Sized>(
    reader: &mut R,
    tag:    &TagHeader,
    n_samp: usize,
    n_chan: usize,
    cals:   &[f64],
    picks:  &[usize],
) -> Result<Array2<f64>> {
    let mut reader = reader;
    let bytes = read_payload(&mut reader, tag)?;
    let width = bytes_per_sample(tag.ftype)
        .ok_or_else(|| FifError::Decode(format!("unsupported buffer type {}", tag.ftype)))?;
    if bytes.len() < n_samp * n_chan * width {
        bail!(FifError::Decode(format!("buffer @ {:#x} is shorter than declared", tag.pos)));
    }
    let decode: fn(&[u8]) -> f64 = match tag.ftype {
        FIFFT_FLOAT | FIFFT_COMPLEX_FLOAT => |b| be_f32(b) as f64,
        FIFFT_DOUBLE | FIFFT_COMPLEX_DOUBLE => be_f64,
        FIFFT_INT => |b| be_i32(b) as f64,
        FIFFT_SHORT | FIFFT_DAU_PACK16 => |b| i16::from_be_bytes([b[0], b[1]]) as f64,
        other => bail!(FifError::Decode(format!("unsupported buffer type {other}"))),
    };
    let mut out = Array2::<f64>::zeros((picks.len(), n_samp));
    for t in 0..n_samp {
        let row = &bytes[t * n_chan * width..(t + 1) * n_chan * width];
        for (k, &c) in picks.iter().enumerate() {
            out[[k, t]] = decode(&row[c * width..]) * cals[c];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiff::write::{FifWriter, TagWrite};
    use std::io::Cursor;

    /// Raw block entries for a 2-channel float file: buffers of `sizes`
    /// samples, `Err(n)` marking a DATA_SKIP_SAMP of n samples.
    fn build(first: i32, layout: &[std::result::Result<usize, i32>]) -> (Vec<u8>, Vec<TagHeader>) {
        let mut w = FifWriter::new(Cursor::new(Vec::new()));
        w.write_int(FIFF_FIRST_SAMPLE, &[first]).unwrap();
        let mut value = 0.0_f32;
        for item in layout {
            match item {
                Ok(n) => {
                    let mut vals = Vec::new();
                    for _ in 0..*n {
                        vals.push(value);
                        vals.push(-value);
                        value += 1.0;
                    }
                    w.write_float(FIFF_DATA_BUFFER, &vals).unwrap();
                }
                Err(n) => w.write_int(FIFF_DATA_SKIP_SAMP, &[*n]).unwrap(),
            }
        }
        let entries = w.directory().to_vec();
        (w.into_inner().into_inner(), entries)
    }

    #[test]
    fn bounds_follow_buffer_sizes() {
        let (bytes, entries) = build(10, &[Ok(4), Ok(4), Ok(2)]);
        let mut cur = Cursor::new(bytes);
        let ex = compute_bounds(&mut cur, &entries, 2, vec![1.0, 1.0], Source::Memory(Arc::from(vec![]))).unwrap();
        assert_eq!(ex.bounds, vec![0, 4, 8, 10]);
        let diffs: Vec<usize> = ex.bounds.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(diffs, vec![4, 4, 2]);
        assert_eq!(ex.first_samp, 10);
        assert_eq!(ex.last_samp, 19);
        assert_eq!(ex.buffer_size, 4);
        assert_eq!(ex.orig_format, FIFFT_FLOAT);
    }

    #[test]
    fn skips_become_gaps() {
        let (bytes, entries) = build(0, &[Ok(3), Err(5), Ok(3)]);
        let mut cur = Cursor::new(bytes.clone());
        let ex = compute_bounds(&mut cur, &entries, 2, vec![1.0, 2.0], Source::Memory(Arc::from(bytes))).unwrap();
        assert_eq!(ex.bounds, vec![0, 3, 8, 11]);
        assert_eq!(ex.skips(), vec![(3, 5)]);
        let mut reader = ex.source.open().unwrap();
        let data = ex.read(&mut *reader, 1, 10, &[1, 0]).unwrap();
        assert_eq!(data.dim(), (2, 9));
        // channel 1 is calibrated by 2 and stores -value
        assert_eq!(data[[0, 0]], -2.0);
        assert_eq!(data[[1, 0]], 1.0);
        assert_eq!(data[[1, 2]], 0.0); // inside the skip
        assert_eq!(data[[1, 7]], 3.0); // first sample after the skip
    }

    #[test]
    fn leading_skip_moves_first_samp() {
        let (bytes, entries) = build(100, &[Err(7), Ok(3)]);
        let mut cur = Cursor::new(bytes);
        let ex = compute_bounds(&mut cur, &entries, 2, vec![1.0, 1.0], Source::Memory(Arc::from(vec![]))).unwrap();
        assert_eq!(ex.first_samp, 107);
        assert_eq!(ex.bounds, vec![0, 3]);
        assert!(ex.skips().is_empty());
    }

    #[test]
    fn ragged_buffer_is_decode_error() {
        let mut w = FifWriter::new(Cursor::new(Vec::new()));
        w.write_float(FIFF_DATA_BUFFER, &[1.0, 2.0, 3.0]).unwrap();
        let entries = w.directory().to_vec();
        let mut cur = Cursor::new(w.into_inner().into_inner());
        let err = compute_bounds(&mut cur, &entries, 2, vec![1.0; 2], Source::Memory(Arc::from(vec![])))
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Decode(_))));
    }
}
