//! FIFF tag encoding.
//!
//! Every structured write goes through the [`TagWrite`] capability: one
//! required primitive (`write_tag`) that appends a complete tag, plus one
//! provided method per typed tag.  The split writer only ever talks to a
//! `dyn TagWrite`, so tests can substitute a writer that fails or records
//! instead of touching the real file.
//!
//! Implementations:
//! * [`FifWriter`] writes to any `Write + Seek` sink, keeps the directory
//!   accumulator and emits the trailing `FIFF_DIR` tag on [`TagWrite::finish`].
//! * [`TagCounter`] only counts bytes and tags; it sizes headers before
//!   anything is written.
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array2;

use super::constants::*;
use super::info::{ChannelInfo, CoordTrans, FileId};
use super::tag::{TagHeader, TAG_HEADER_SIZE};

/// Encode a header image.
pub fn encode_tag_header(kind: i32, ftype: u32, size: i32, next: i32) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[0..4].copy_from_slice(&kind.to_be_bytes());
    b[4..8].copy_from_slice(&ftype.to_be_bytes());
    b[8..12].copy_from_slice(&size.to_be_bytes());
    b[12..16].copy_from_slice(&next.to_be_bytes());
    b
}

/// Latin-1 encoding; characters outside it become `?`.
pub fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect()
}

// ── Writer capability ─────────────────────────────────────────────────────

/// Low-level tag writer.
pub trait TagWrite {
    /// Append one complete tag and return the position of its header.
    ///
    /// A tag is either written completely or the call fails; callers treat a
    /// failure as fatal for the whole file.
    fn write_tag(&mut self, kind: i32, ftype: u32, payload: &[u8]) -> Result<u64>;

    /// Byte position where the next tag will land.
    fn position(&self) -> u64;

    /// Number of tags written so far (the directory will list this many).
    fn tag_count(&self) -> usize;

    /// Write the directory, patch the directory pointer and flush.
    fn finish(&mut self) -> Result<()>;

    fn write_int(&mut self, kind: i32, values: &[i32]) -> Result<()> {
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_tag(kind, FIFFT_INT, &payload).map(drop)
    }

    fn write_float(&mut self, kind: i32, values: &[f32]) -> Result<()> {
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_tag(kind, FIFFT_FLOAT, &payload).map(drop)
    }

    fn write_double(&mut self, kind: i32, values: &[f64]) -> Result<()> {
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_tag(kind, FIFFT_DOUBLE, &payload).map(drop)
    }

    fn write_string(&mut self, kind: i32, s: &str) -> Result<()> {
        self.write_tag(kind, FIFFT_STRING, &encode_latin1(s)).map(drop)
    }

    /// Row-major elements followed by the reversed dimensions and `ndim`.
    fn write_float_matrix(&mut self, kind: i32, m: &Array2<f32>) -> Result<()> {
        let (rows, cols) = m.dim();
        let mut payload = Vec::with_capacity(rows * cols * 4 + 12);
        for v in m.iter() {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        for d in [cols as i32, rows as i32, 2] {
            payload.extend_from_slice(&d.to_be_bytes());
        }
        self.write_tag(kind, FIFFT_MATRIX | FIFFT_FLOAT, &payload).map(drop)
    }

    fn write_id(&mut self, kind: i32, id: &FileId) -> Result<()> {
        self.write_tag(kind, FIFFT_ID_STRUCT, &id.to_bytes()).map(drop)
    }

    fn write_ch_info(&mut self, ch: &ChannelInfo) -> Result<()> {
        self.write_tag(FIFF_CH_INFO, FIFFT_CH_INFO_STRUCT, &ch.to_bytes()).map(drop)
    }

    fn write_coord_trans(&mut self, trans: &CoordTrans) -> Result<()> {
        self.write_tag(FIFF_COORD_TRANS, FIFFT_COORD_TRANS_STRUCT, &trans.to_bytes()).map(drop)
    }

    /// One data buffer, already encoded as `ftype` samples.
    fn write_samples(&mut self, ftype: u32, payload: &[u8]) -> Result<()> {
        self.write_tag(FIFF_DATA_BUFFER, ftype, payload).map(drop)
    }

    fn start_block(&mut self, kind: i32) -> Result<()> {
        self.write_int(FIFF_BLOCK_START, &[kind])
    }

    fn end_block(&mut self, kind: i32) -> Result<()> {
        self.write_int(FIFF_BLOCK_END, &[kind])
    }
}

// ── File writer ───────────────────────────────────────────────────────────

/// Tag writer over a seekable sink.
///
/// Tags are appended with `next = 0`; the closing `FIFF_DIR` tag carries
/// `next = -1`.  When a `FIFF_DIR_POINTER` tag has been written its payload
/// is patched to the directory position by [`TagWrite::finish`].
pub struct FifWriter<W: Write + Seek> {
    inner:    W,
    pos:      u64,
    dir:      Vec<TagHeader>,
    dir_ptr:  Option<u64>,
    finished: bool,
}

impl FifWriter<BufWriter<File>> {
    /// Create (truncate) `path` and write to it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("create {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Seek> FifWriter<W> {
    /// Wrap a sink positioned at its start.
    pub fn new(inner: W) -> Self {
        Self { inner, pos: 0, dir: Vec::new(), dir_ptr: None, finished: false }
    }

    /// Entries accumulated for the directory so far.
    pub fn directory(&self) -> &[TagHeader] {
        &self.dir
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn emit(&mut self, kind: i32, ftype: u32, payload: &[u8], next: i32) -> Result<u64> {
        let pos = self.pos;
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&encode_tag_header(kind, ftype, payload.len() as i32, next));
        buf.extend_from_slice(payload);
        self.inner
            .write_all(&buf)
            .with_context(|| format!("write tag kind {kind} @ {pos:#x}"))?;
        self.pos += buf.len() as u64;
        Ok(pos)
    }
}

impl<W: Write + Seek> TagWrite for FifWriter<W> {
    fn write_tag(&mut self, kind: i32, ftype: u32, payload: &[u8]) -> Result<u64> {
        let pos = self.emit(kind, ftype, payload, FIFFV_NEXT_SEQ)?;
        if kind == FIFF_DIR_POINTER {
            self.dir_ptr = Some(pos);
        }
        self.dir.push(TagHeader { kind, ftype, size: payload.len() as i32, next: FIFFV_NEXT_SEQ, pos });
        Ok(pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn tag_count(&self) -> usize {
        self.dir.len()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let dir_pos = self.pos;
        let mut payload = Vec::with_capacity(self.dir.len() * 16);
        for e in &self.dir {
            payload.extend_from_slice(&e.kind.to_be_bytes());
            payload.extend_from_slice(&e.ftype.to_be_bytes());
            payload.extend_from_slice(&e.size.to_be_bytes());
            payload.extend_from_slice(&(e.pos as i32).to_be_bytes());
        }
        self.emit(FIFF_DIR, FIFFT_DIR_ENTRY_STRUCT, &payload, FIFFV_NEXT_NONE)?;
        if let Some(ptr) = self.dir_ptr {
            self.inner.seek(SeekFrom::Start(ptr + TAG_HEADER_SIZE))?;
            self.inner.write_all(&(dir_pos as i32).to_be_bytes())?;
            self.inner.seek(SeekFrom::Start(self.pos))?;
        }
        self.inner.flush().context("flush FIF output")?;
        self.finished = true;
        log::debug!("closed FIF output: {} tags, directory @ {dir_pos:#x}", self.dir.len());
        Ok(())
    }
}

// ── Dry run ───────────────────────────────────────────────────────────────

/// Counts what a sequence of writes would occupy without producing bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagCounter {
    pos:  u64,
    tags: usize,
}

impl TagCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagWrite for TagCounter {
    fn write_tag(&mut self, _kind: i32, _ftype: u32, payload: &[u8]) -> Result<u64> {
        let pos = self.pos;
        self.pos += TAG_HEADER_SIZE + payload.len() as u64;
        self.tags += 1;
        Ok(pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn tag_count(&self) -> usize {
        self.tags
    }

    fn finish(&mut self) -> Result<()> {
        self.pos += directory_size(self.tags);
        Ok(())
    }
}

/// Size of a `FIFF_DIR` tag listing `n_tags` entries.
#[inline]
pub fn directory_size(n_tags: usize) -> u64 {
    TAG_HEADER_SIZE + 16 * n_tags as u64
}
