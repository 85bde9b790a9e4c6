//! Split writer.
//!
//! A save is planned completely before the first byte is written: output
//! buffers ("units") are cut from the selected sample range, the header of
//! every part is sized with a dry run ([`TagCounter`]) and units are assigned
//! to parts so that no file exceeds `split_size`.  Argument, size and
//! destination checks therefore all fail before any file is created.
//!
//! Writing then runs the state machine
//!
//! ```text
//! WritingHeader → WritingBuffers → {Rotating → WritingBuffers}* → ClosingDirectory → Done
//! ```
//!
//! with `Failed` reachable from every state.  A part always ends on a whole
//! buffer.  When a write fails the current file is closed as far as
//! possible (open blocks ended, directory written) so that it stays
//! readable; files already completed are kept.
use std::borrow::Cow;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use ndarray::Array2;

use super::annotations::{write_annotations, Annotations, ACQ_SKIP};
use super::constants::*;
use super::info::{write_meas_info, FileId, MeasInfo};
use super::raw::RawFif;
use super::tag::be_i32;
use super::write::{directory_size, TagCounter, TagWrite};
use crate::config::{SampleFormat, SaveOptions, SplitNaming};
use crate::error::{FifError, Warning};

/// File name endings recognised as raw FIF recordings.
const CONVENTIONAL_ENDINGS: &[&str] =
    &["raw.fif", "raw_sss.fif", "raw_tsss.fif", "_meg.fif", "_eeg.fif", "_ieeg.fif"];

/// Outcome of a save.
#[derive(Debug, Clone, Default)]
pub struct SplitManifest {
    /// Written files, in order.
    pub paths:    Vec<PathBuf>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    WritingHeader,
    WritingBuffers,
    Rotating,
    ClosingDirectory,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Data,
    Skip,
}

/// One output buffer: samples `start..stop` of the source.
#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    stop:  usize,
    kind:  UnitKind,
}

// ── Naming ────────────────────────────────────────────────────────────────

/// File names of the parts of one save.
#[derive(Debug, Clone)]
struct PartNames {
    dir:    PathBuf,
    stem:   String,
    naming: SplitNaming,
}

impl PartNames {
    fn new(path: &Path, naming: SplitNaming) -> Result<Self> {
        let name = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
        let Some(stem) = name.strip_suffix(".fif") else {
            bail!(FifError::InvalidArgument(format!("file name {name:?} must end with .fif")));
        };
        if naming == SplitNaming::Bids {
            match stem.rsplit_once('_') {
                Some((head, suffix)) if !head.is_empty() && !suffix.is_empty() => {}
                _ => bail!(FifError::InvalidArgument(format!(
                    "file name {name:?} must end with an underscore followed by a suffix \
                     (e.g. sub-01_meg.fif) when split_naming is bids"
                ))),
            }
        }
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self { dir, stem: stem.to_string(), naming })
    }

    /// File name of part `k` of a save that produces several parts.
    fn file_name(&self, k: usize) -> String {
        match self.naming {
            SplitNaming::Neuromag if k == 0 => format!("{}.fif", self.stem),
            SplitNaming::Neuromag => format!("{}-{k}.fif", self.stem),
            SplitNaming::Bids => {
                let (head, suffix) = self.stem.rsplit_once('_').unwrap_or((self.stem.as_str(), ""));
                format!("{head}_split-{:02}_{suffix}.fif", k + 1)
            }
        }
    }

    fn path(&self, k: usize) -> PathBuf {
        self.dir.join(self.file_name(k))
    }
}

// ── Job ───────────────────────────────────────────────────────────────────

/// Everything a save writes, resolved up front.
struct Job<'a> {
    raw:         &'a RawFif,
    info:        MeasInfo,
    picks:       Vec<usize>,
    /// Divisor turning calibrated samples into stored values.
    scales:      Vec<f64>,
    fmt:         SampleFormat,
    annotations: Annotations,
    units:       Vec<Unit>,
    names:       PartNames,
}

impl Job<'_> {
    fn header_size(&self, part: usize) -> Result<(u64, usize)> {
        let mut counter = TagCounter::new();
        write_header(&mut counter, self, part, 0)?;
        Ok((counter.position(), counter.tag_count()))
    }

    fn closing_size(&self, next: Option<usize>) -> Result<(u64, usize)> {
        let mut counter = TagCounter::new();
        let next = next.map(|k| (k, self.names.file_name(k)));
        write_closing(&mut counter, next.as_ref().map(|(k, n)| (*k, n.as_str())))?;
        Ok((counter.position(), counter.tag_count()))
    }

    fn unit_size(&self, unit: &Unit) -> u64 {
        match unit.kind {
            UnitKind::Data => {
                16 + ((unit.stop - unit.start) * self.info.n_chan * self.fmt.width()) as u64
            }
            UnitKind::Skip => 20,
        }
    }

    /// Assign units to parts.  A part ends before unit `k` when unit `k`
    /// plus the closing tags and directory would not fit in `split`.
    fn plan(&mut self, split: u64) -> Result<Vec<Range<usize>>> {
        let last_tail = self.closing_size(None)?;
        let mut parts = Vec::new();
        let mut k = 0;
        while k < self.units.len() {
            let p = parts.len();
            // a part never starts with a skip
            if self.units[k].kind == UnitKind::Skip {
                self.units[k].kind = UnitKind::Data;
            }
            let (mut pos, mut tags) = self.header_size(p)?;
            if p == 0 && pos + last_tail.0 + directory_size(tags + last_tail.1) > split {
                bail!(FifError::InvalidArgument(format!(
                    "split_size ({split} bytes) is too small after writing measurement information \
                     ({pos} bytes), you must use a larger value for split_size"
                )));
            }
            let mid_tail = self.closing_size(Some(p + 1))?;
            let first = k;
            while k < self.units.len() {
                let size = self.unit_size(&self.units[k]);
                let is_last = k + 1 == self.units.len();
                let fits_last = pos + size + last_tail.0 + directory_size(tags + 1 + last_tail.1) <= split;
                let fits_mid = pos + size + mid_tail.0 + directory_size(tags + 1 + mid_tail.1) <= split;
                if !((is_last && fits_last) || fits_mid) {
                    break;
                }
                pos += size;
                tags += 1;
                k += 1;
            }
            if k == first {
                let unit = self.units[k];
                bail!(FifError::InvalidArgument(format!(
                    "buffer of {} samples is too large for the given split size ({split} bytes), \
                     use a smaller buffer_size_sec or a larger split_size",
                    unit.stop - unit.start
                )));
            }
            log::debug!("part {p}: units {first}..{k}, {pos} bytes before closing");
            parts.push(first..k);
        }
        Ok(parts)
    }
}

// ── Tag sequences ────────────────────────────────────────────────────────

fn write_ref(w: &mut dyn TagWrite, role: i32, num: usize, name: &str) -> Result<()> {
    w.start_block(FIFFB_REF)?;
    w.write_int(FIFF_REF_ROLE, &[role])?;
    w.write_string(FIFF_REF_FILE_NAME, name)?;
    w.write_int(FIFF_REF_FILE_NUM, &[num as i32])?;
    w.end_block(FIFFB_REF)
}

/// Everything up to and including `FIFF_FIRST_SAMPLE`.
fn write_header(w: &mut dyn TagWrite, job: &Job<'_>, part: usize, first_samp: i64) -> Result<()> {
    w.write_id(FIFF_FILE_ID, &FileId::now())?;
    w.write_int(FIFF_DIR_POINTER, &[-1])?;
    w.start_block(FIFFB_MEAS)?;
    write_meas_info(w, &job.info)?;
    if part == 0 {
        write_annotations(w, &job.annotations)?;
    } else {
        write_ref(w, FIFFV_ROLE_PREV_FILE, part - 1, &job.names.file_name(part - 1))?;
    }
    w.start_block(FIFFB_RAW_DATA)?;
    w.write_int(FIFF_FIRST_SAMPLE, &[first_samp as i32])
}

/// Closing tags; the directory is written by `finish`.
fn write_closing(w: &mut dyn TagWrite, next: Option<(usize, &str)>) -> Result<()> {
    w.end_block(FIFFB_RAW_DATA)?;
    if let Some((num, name)) = next {
        write_ref(w, FIFFV_ROLE_NEXT_FILE, num, name)?;
    }
    w.end_block(FIFFB_MEAS)
}

fn write_unit(w: &mut dyn TagWrite, job: &Job<'_>, unit: &Unit) -> Result<()> {
    match unit.kind {
        UnitKind::Skip => w.write_int(FIFF_DATA_SKIP_SAMP, &[(unit.stop - unit.start) as i32]),
        UnitKind::Data => {
            let block = job.raw.read_range(unit.start, unit.stop, &job.picks)?;
            w.write_samples(job.fmt.tag_type(), &encode_block(&block, &job.scales, job.fmt))
        }
    }
}

/// Interleave `[n_chan, n_samp]` samples as `[n_samp, n_chan]` stored values.
fn encode_block(block: &Array2<f64>, scales: &[f64], fmt: SampleFormat) -> Vec<u8> {
    let (n_chan, n_samp) = block.dim();
    let mut out = Vec::with_capacity(n_chan * n_samp * fmt.width());
    for t in 0..n_samp {
        for c in 0..n_chan {
            let v = block[[c, t]] / scales[c];
            match fmt {
                SampleFormat::Short => {
                    let q = v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                    out.extend_from_slice(&q.to_be_bytes());
                }
                SampleFormat::Int => {
                    let q = v.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                    out.extend_from_slice(&q.to_be_bytes());
                }
                SampleFormat::Single => out.extend_from_slice(&(v as f32).to_be_bytes()),
                SampleFormat::Double => out.extend_from_slice(&v.to_be_bytes()),
                SampleFormat::ComplexSingle => {
                    out.extend_from_slice(&(v as f32).to_be_bytes());
                    out.extend_from_slice(&0f32.to_be_bytes());
                }
                SampleFormat::ComplexDouble => {
                    out.extend_from_slice(&v.to_be_bytes());
                    out.extend_from_slice(&0f64.to_be_bytes());
                }
            }
        }
    }
    out
}

// ── Block tracking ────────────────────────────────────────────────────────

/// Tag writer that remembers which blocks are open, so a failed part can
/// still be closed.
struct Tracked<'w> {
    inner: &'w mut dyn TagWrite,
    open:  Vec<i32>,
}

impl Tracked<'_> {
    /// Close what can be closed; errors are ignored.
    fn abort(&mut self) {
        while let Some(kind) = self.open.pop() {
            let _ = self.inner.end_block(kind);
        }
        let _ = self.inner.finish();
    }
}

impl TagWrite for Tracked<'_> {
    fn write_tag(&mut self, kind: i32, ftype: u32, payload: &[u8]) -> Result<u64> {
        let pos = self.inner.write_tag(kind, ftype, payload)?;
        if payload.len() >= 4 {
            match kind {
                FIFF_BLOCK_START => self.open.push(be_i32(payload)),
                FIFF_BLOCK_END => {
                    self.open.pop();
                }
                _ => {}
            }
        }
        Ok(pos)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn tag_count(&self) -> usize {
        self.inner.tag_count()
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }
}

// ── Writer ────────────────────────────────────────────────────────────────

struct SplitWriter<'j, 'a> {
    job:   &'j Job<'a>,
    state: WriterState,
}

impl SplitWriter<'_, '_> {
    fn advance(&mut self, next: WriterState) {
        log::debug!("split writer: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn write_part(
        &mut self,
        w: &mut Tracked<'_>,
        part: usize,
        units: Range<usize>,
        next: Option<(usize, String)>,
    ) -> Result<()> {
        let first = self.job.units[units.start].start;
        write_header(w, self.job, part, self.job.raw.first_samp() + first as i64)?;
        self.advance(WriterState::WritingBuffers);
        for unit in &self.job.units[units] {
            write_unit(w, self.job, unit)?;
        }
        self.advance(match next {
            Some(_) => WriterState::Rotating,
            None => WriterState::ClosingDirectory,
        });
        write_closing(w, next.as_ref().map(|(k, n)| (*k, n.as_str())))?;
        w.finish()
    }
}

// ── Entry point ───────────────────────────────────────────────────────────

/// Buffer length in samples; a duration that is a whole number of samples
/// up to rounding noise is not rounded up.
fn buffer_samples(sec: f64, sfreq: f64) -> usize {
    let x = sec * sfreq;
    let n = if (x - x.round()).abs() < 1e-6 { x.round() } else { x.ceil() };
    (n as usize).max(1)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Save `raw` to `path`; see [`RawFif::save`].
pub(crate) fn write_raw(
    raw: &RawFif,
    path: &Path,
    opts: &SaveOptions,
    open: &mut dyn FnMut(&Path) -> Result<Box<dyn TagWrite>>,
) -> Result<SplitManifest> {
    let mut warnings = Vec::new();

    // ── Arguments ──
    let names = PartNames::new(path, opts.split_naming)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory does not exist: {}", dir.display()),
            )
            .into());
        }
    }
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
    if !CONVENTIONAL_ENDINGS.iter().any(|e| file_name.ends_with(e)) {
        Warning::NamingConvention { name: file_name.to_string() }.emit(&mut warnings);
    }

    let source: Cow<'_, RawFif> = if opts.proj && raw.info.projs.iter().any(|p| !p.active) {
        let mut projected = raw.clone();
        projected.apply_projection()?;
        Cow::Owned(projected)
    } else {
        Cow::Borrowed(raw)
    };
    let raw = source.as_ref();

    let picks = opts.picks.resolve(&raw.info)?;
    let sfreq = raw.info.sfreq;
    let n_times = raw.n_times();
    if opts.tmin < 0.0 {
        bail!(FifError::InvalidArgument(format!("tmin must be >= 0, got {}", opts.tmin)));
    }
    if let Some(tmax) = opts.tmax {
        if tmax < opts.tmin {
            bail!(FifError::InvalidArgument(format!("tmin ({}) must be less than tmax ({tmax})", opts.tmin)));
        }
    }
    let start = (opts.tmin * sfreq).round() as i64;
    let stop = opts
        .tmax
        .map_or(n_times as i64, |t| ((t * sfreq).round() as i64 + 1).min(n_times as i64));
    if stop <= start {
        bail!(FifError::InvalidArgument(format!(
            "tmin ({}) must be less than tmax ({:?}) and lie within the data",
            opts.tmin, opts.tmax
        )));
    }
    let (start, stop) = (start as usize, stop as usize);

    let buffer_sec = opts.buffer_size_sec.or(raw.buffer_size_sec()).unwrap_or(1.0);
    if !(buffer_sec > 0.0 && buffer_sec.is_finite()) {
        bail!(FifError::InvalidArgument(format!("buffer_size_sec must be positive, got {buffer_sec}")));
    }
    let buffer_size = buffer_samples(buffer_sec, sfreq);

    // ── Units ──
    let skips: Vec<(usize, usize)> = raw
        .spans(raw.annotations.matching(&[ACQ_SKIP]))
        .into_iter()
        .filter(|(a, b)| a < b)
        .collect();
    let mut units = Vec::new();
    let mut warned = false;
    for b in (start..stop).step_by(buffer_size) {
        let e = (b + buffer_size).min(stop);
        if opts.drop_small_buffer && e - b < buffer_size {
            log::debug!("dropping trailing buffer of {} samples", e - b);
            continue;
        }
        let kind = if skips.iter().any(|&(s0, s1)| s0 <= b && e <= s1) {
            UnitKind::Skip
        } else {
            if !warned && skips.iter().any(|&(s0, s1)| s0 < e && b < s1) {
                Warning::SkipNotAligned { start: b, buffer_size }.emit(&mut warnings);
                warned = true;
            }
            UnitKind::Data
        };
        units.push(Unit { start: b, stop: e, kind });
    }
    if units.is_empty() {
        bail!(FifError::InvalidArgument("no samples left to write".into()));
    }

    // ── Output calibration ──
    let mut info = raw.info.pick(&picks);
    let fmt = opts.fmt;
    if fmt.is_integer() {
        let max = match fmt {
            SampleFormat::Short => i16::MAX as f64,
            _ => i32::MAX as f64,
        };
        let mut peaks = vec![0.0_f64; picks.len()];
        for unit in units.iter().filter(|u| u.kind == UnitKind::Data) {
            let block = raw.read_range(unit.start, unit.stop, &picks)?;
            for (peak, row) in peaks.iter_mut().zip(block.rows()) {
                *peak = row.iter().fold(*peak, |m, v| m.max(v.abs()));
            }
        }
        let fits = raw.orig_format() == fmt
            && info.chs.iter().zip(&peaks).all(|(ch, &peak)| {
                let cal = ch.calibration().abs();
                cal > 0.0 && peak / cal <= max + 0.5
            });
        if !fits {
            for (ch, &peak) in info.chs.iter_mut().zip(&peaks) {
                ch.cal = if peak > 0.0 { (peak / max) as f32 } else { 1.0 };
                ch.range = 1.0;
            }
            log::debug!("rescaled calibrations to the full {fmt:?} range");
        }
    }
    let scales = info
        .chs
        .iter()
        .map(|c| match c.calibration() {
            v if v == 0.0 => 1.0,
            v => v,
        })
        .collect();

    let first = raw.first_samp();
    let annotations = raw
        .annotations
        .cropped((first + start as i64) as f64 / sfreq, (first + stop as i64) as f64 / sfreq);

    let mut job = Job { raw, info, picks, scales, fmt, annotations, units, names };
    let parts = job.plan(opts.split_size.bytes())?;
    let n_write = parts.len().min(opts.max_splits);
    let paths: Vec<PathBuf> = if parts.len() == 1 {
        vec![path.to_path_buf()]
    } else {
        (0..parts.len()).map(|k| job.names.path(k)).collect()
    };

    // ── Destinations ──
    if !raw.is_loaded() {
        for p in &paths {
            if raw.filenames().iter().any(|f| same_file(f, p)) {
                bail!(FifError::InvalidArgument(format!(
                    "You cannot save data to the same file it is read from ({}), \
                     please use a different filename",
                    p.display()
                )));
            }
        }
    }
    if !opts.overwrite {
        let mut targets: Vec<PathBuf> = paths.iter().take(n_write).cloned().collect();
        if parts.len() == 1 && opts.split_naming == SplitNaming::Bids {
            targets.push(job.names.path(0));
        }
        if let Some(existing) = targets.into_iter().find(|p| p.exists()) {
            bail!(FifError::FileExists(existing));
        }
    }

    // ── Write ──
    let mut writer = SplitWriter { job: &job, state: WriterState::WritingHeader };
    let mut manifest = SplitManifest { paths: Vec::new(), warnings };
    for (p, range) in parts.iter().enumerate().take(n_write) {
        let mut sink = match open(&paths[p]) {
            Ok(sink) => sink,
            Err(e) => {
                writer.advance(WriterState::Failed);
                return Err(e);
            }
        };
        let mut tracked = Tracked { inner: &mut *sink, open: Vec::new() };
        let next = (p + 1 < parts.len()).then(|| (p + 1, job.names.file_name(p + 1)));
        if let Err(e) = writer.write_part(&mut tracked, p, range.clone(), next) {
            writer.advance(WriterState::Failed);
            tracked.abort();
            return Err(e);
        }
        log::info!("wrote {} ({} buffers)", paths[p].display(), range.len());
        manifest.paths.push(paths[p].clone());
    }
    if parts.len() > n_write {
        writer.advance(WriterState::Failed);
        bail!(FifError::Runtime(format!(
            "Exceeded maximum number of splits ({}), the data would need {} files",
            opts.max_splits,
            parts.len()
        )));
    }
    writer.advance(WriterState::Done);
    Ok(manifest)
}
