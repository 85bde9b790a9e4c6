//! Raw FIF recordings.
//!
//! [`RawFif`] is the accessor over one recording, possibly split across
//! several files and possibly the concatenation of several recordings.
//! Samples live either on disk ([`Storage::Lazy`], read on demand through
//! the buffer maps) or in memory ([`Storage::Materialized`]).  The
//! transition is one-way: [`RawFif::load_data`] replaces the lazy views by
//! the full sample matrix, which is the only source of samples afterwards.
//!
//! # Algorithm (open)
//! 1. Load the tag directory (stored, link chain, or recovered by scanning).
//! 2. Build the block tree and read `MeasInfo`.
//! 3. Find the `FIFFB_RAW_DATA` (or `FIFFB_CONTINUOUS_DATA`, or IAS) node.
//! 4. Map its buffers to samples ([`compute_bounds`]) and annotate skips.
//! 5. Follow the `FIFFB_REF` chain to the next split file, if any.
//! 6. Optionally materialize all samples.
//!
//! # Clock
//! Sample `i` of the data has the absolute number `first_samp + i`;
//! annotation onsets are absolute sample numbers divided by `sfreq`.
//!
//! # Calibration
//! ```text
//! calibrated_f64[ch, t] = raw_value[t, ch] × info.chs[ch].cal × info.chs[ch].range
//! ```
use std::collections::HashSet;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ndarray::{s, Array1, Array2, Axis};

use super::annotations::{read_annotations, Annotation, Annotations, ACQ_SKIP};
use super::constants::*;
use super::extras::{compute_bounds, BufferExtras, Source};
use super::info::{read_meas_info, MeasInfo};
use super::picks::{ChannelSelector, SampleSelector};
use super::proj::{make_projector, Projector};
use super::split::{write_raw, SplitManifest};
use super::tag::{read_i32, read_string};
use super::tree::{load_directory, read_tree, Node};
use super::write::{FifWriter, TagWrite};
use crate::config::{OnSplitMissing, OpenOptions, SampleFormat, SaveOptions};
use crate::error::{FifError, Warning};
use crate::filter::SampleTransform;

/// Annotation prefixes that delimit the stretches a transform runs over.
pub const DEFAULT_SKIP_BY_ANNOTATION: &[&str] = &["edge", "bad_acq_skip"];

// ── Segments and storage ──────────────────────────────────────────────────

/// One original recording inside a (possibly concatenated) [`RawFif`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub first_samp: i64,
    /// Inclusive.
    pub last_samp:  i64,
}

impl Segment {
    #[inline]
    pub fn len(&self) -> usize {
        (self.last_samp - self.first_samp + 1).max(0) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Disk-backed view of one segment.
#[derive(Debug, Clone)]
pub struct LazySegment {
    /// Buffer maps of the split chain, in order.
    pub parts: Vec<Arc<BufferExtras>>,
    /// File channel index of every output channel.
    pub picks: Vec<usize>,
    /// Offset of the first visible sample into the chain.
    pub start: usize,
    pub len:   usize,
}

impl LazySegment {
    /// Samples `start..stop` of this view for output channels `picks`.
    fn read(&self, start: usize, stop: usize, picks: &[usize]) -> Result<Array2<f64>> {
        let file_picks: Vec<usize> = picks.iter().map(|&p| self.picks[p]).collect();
        let mut out = Array2::<f64>::zeros((picks.len(), stop - start));
        let (abs_start, abs_stop) = (self.start + start, self.start + stop);
        let mut offset = 0;
        for part in &self.parts {
            let n = part.n_samples();
            let (lo, hi) = (abs_start.max(offset), abs_stop.min(offset + n));
            if lo < hi {
                let mut reader = part.source.open()?;
                let block = part.read(&mut *reader, lo - offset, hi - offset, &file_picks)?;
                out.slice_mut(s![.., lo - abs_start..hi - abs_start]).assign(&block);
            }
            offset += n;
            if offset >= abs_stop {
                break;
            }
        }
        Ok(out)
    }
}

/// Where the samples of a [`RawFif`] come from.
#[derive(Debug, Clone)]
pub enum Storage {
    /// One view per segment, read on demand.
    Lazy(Vec<LazySegment>),
    /// `[n_chan, n_times]` calibrated samples.
    Materialized(Array2<f64>),
}

/// Origin of a recording; only recordings of the same kind concatenate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Fif,
    Array,
}

/// Treatment of samples covered by annotations starting with "bad".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectByAnnotation {
    #[default]
    None,
    /// Leave the samples out.
    Omit,
    /// Replace the samples by NaN.
    Nan,
}

// ── RawFif ───────────────────────────────────────────────────────────────

/// A raw FIF recording.
#[derive(Debug, Clone)]
pub struct RawFif {
    /// Measurement info (channels, sfreq, projectors, …).
    pub info:        MeasInfo,
    pub annotations: Annotations,
    /// Diagnostics raised while this instance was produced.
    pub warnings:    Vec<Warning>,
    pub(crate) segments:        Vec<Segment>,
    pub(crate) storage:         Storage,
    /// Operator applied to lazy reads after `apply_projection`.
    pub(crate) projector:       Option<Array2<f64>>,
    pub(crate) orig_format:     SampleFormat,
    pub(crate) kind:            RawKind,
    pub(crate) buffer_size_sec: Option<f64>,
    pub(crate) filenames:       Vec<PathBuf>,
}

impl RawFif {
    /// Wrap in-memory samples `[n_chan, n_times]`.
    pub fn from_array(info: MeasInfo, data: Array2<f64>, first_samp: i64) -> Result<Self> {
        if data.nrows() != info.n_chan || info.chs.len() != info.n_chan {
            bail!(FifError::InvalidArgument(format!(
                "data have {} rows but info lists {} channels",
                data.nrows(),
                info.n_chan
            )));
        }
        if data.ncols() == 0 {
            bail!(FifError::InvalidArgument("data must contain at least one sample".into()));
        }
        if !(info.sfreq > 0.0) {
            bail!(FifError::InvalidArgument(format!("sfreq must be positive, got {}", info.sfreq)));
        }
        let last_samp = first_samp + data.ncols() as i64 - 1;
        Ok(Self {
            info,
            annotations: Annotations::new(),
            warnings: Vec::new(),
            segments: vec![Segment { first_samp, last_samp }],
            storage: Storage::Materialized(data),
            projector: None,
            orig_format: SampleFormat::Double,
            kind: RawKind::Array,
            buffer_size_sec: None,
            filenames: Vec::new(),
        })
    }

    fn from_parts(
        info: MeasInfo,
        annotations: Annotations,
        parts: Vec<Arc<BufferExtras>>,
        filenames: Vec<PathBuf>,
        warnings: Vec<Warning>,
        preload: bool,
    ) -> Result<Self> {
        let Some(head) = parts.first() else {
            bail!(FifError::Decode("recording has no data files".into()));
        };
        let n_times: usize = parts.iter().map(|p| p.n_samples()).sum();
        let first_samp = head.first_samp;
        let orig_format = SampleFormat::from_tag_type(head.orig_format).unwrap_or_default();
        let buffer_size_sec = Some(head.buffer_size as f64 / info.sfreq);
        let view = LazySegment { parts, picks: (0..info.n_chan).collect(), start: 0, len: n_times };
        let mut raw = Self {
            info,
            annotations,
            warnings,
            segments: vec![Segment { first_samp, last_samp: first_samp + n_times as i64 - 1 }],
            storage: Storage::Lazy(vec![view]),
            projector: None,
            orig_format,
            kind: RawKind::Fif,
            buffer_size_sec,
            filenames,
        };
        log::info!(
            "opened raw: {} channels, {} samples @ {} Hz, first_samp {}",
            raw.info.n_chan, n_times, raw.info.sfreq, first_samp
        );
        if preload {
            raw.load_data()?;
        }
        Ok(raw)
    }

    /// Copy of everything but the data-describing parts.
    pub(crate) fn derive(&self, info: MeasInfo, annotations: Annotations, segments: Vec<Segment>, storage: Storage) -> RawFif {
        RawFif {
            info,
            annotations,
            warnings: self.warnings.clone(),
            segments,
            storage,
            projector: self.projector.clone(),
            orig_format: self.orig_format,
            kind: self.kind,
            buffer_size_sec: self.buffer_size_sec,
            filenames: self.filenames.clone(),
        }
    }

    // ── Shape ────────────────────────────────────────────────────────────

    /// Total number of time points.
    #[inline]
    pub fn n_times(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Total duration in seconds.
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.n_times() as f64 / self.info.sfreq
    }

    /// Absolute number of the first sample.
    pub fn first_samp(&self) -> i64 {
        self.segments.first().map_or(0, |s| s.first_samp)
    }

    /// Absolute number of the last sample on the continuous clock.
    pub fn last_samp(&self) -> i64 {
        self.first_samp() + self.n_times() as i64 - 1
    }

    /// First sample of every concatenated recording.
    pub fn first_samps(&self) -> Vec<i64> {
        self.segments.iter().map(|s| s.first_samp).collect()
    }

    /// Last sample of every concatenated recording.
    pub fn last_samps(&self) -> Vec<i64> {
        self.segments.iter().map(|s| s.last_samp).collect()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Sample times in seconds from the first sample.
    pub fn times(&self) -> Array1<f64> {
        let sfreq = self.info.sfreq;
        Array1::from_iter((0..self.n_times()).map(|i| i as f64 / sfreq))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.storage, Storage::Materialized(_))
    }

    pub fn kind(&self) -> RawKind {
        self.kind
    }

    /// Encoding of the data on disk (`Double` for in-memory data).
    pub fn orig_format(&self) -> SampleFormat {
        self.orig_format
    }

    /// Files the samples are read from (empty for in-memory data).
    pub fn filenames(&self) -> &[PathBuf] {
        &self.filenames
    }

    /// Duration of the on-disk buffers of the source file.
    pub fn buffer_size_sec(&self) -> Option<f64> {
        self.buffer_size_sec
    }

    // ── Reading ──────────────────────────────────────────────────────────

    /// Samples `start..stop` of channels `picks`, projection applied.
    pub(crate) fn read_range(&self, start: usize, stop: usize, picks: &[usize]) -> Result<Array2<f64>> {
        match &self.storage {
            Storage::Materialized(data) => Ok(data.slice(s![.., start..stop]).select(Axis(0), picks)),
            Storage::Lazy(views) => {
                let all: Vec<usize>;
                let read_picks = if self.projector.is_some() {
                    all = (0..self.info.n_chan).collect();
                    &all[..]
                } else {
                    picks
                };
                let mut out = Array2::<f64>::zeros((read_picks.len(), stop - start));
                let mut offset = 0;
                for view in views {
                    let (lo, hi) = (start.max(offset), stop.min(offset + view.len));
                    if lo < hi {
                        let block = view.read(lo - offset, hi - offset, read_picks)?;
                        out.slice_mut(s![.., lo - start..hi - start]).assign(&block);
                    }
                    offset += view.len;
                }
                match &self.projector {
                    Some(proj) => Ok(proj.dot(&out).select(Axis(0), picks)),
                    None => Ok(out),
                }
            }
        }
    }

    /// Read **all** data into a `[n_chan, n_times]` f64 array with calibration.
    pub fn read_all_data(&self) -> Result<Array2<f64>> {
        let picks: Vec<usize> = (0..self.info.n_chan).collect();
        self.read_range(0, self.n_times(), &picks)
    }

    /// Read the half-open sample range `[start, end)` of every channel.
    pub fn read_slice(&self, start: usize, end: usize) -> Result<Array2<f64>> {
        let end = end.min(self.n_times());
        let picks: Vec<usize> = (0..self.info.n_chan).collect();
        self.read_range(start.min(end), end, &picks)
    }

    /// Samples of the selected channels between `start` and `stop`
    /// (default: the end), with bad annotations handled per `reject`.
    pub fn get_data(
        &self,
        picks: &ChannelSelector,
        start: usize,
        stop: Option<usize>,
        reject: RejectByAnnotation,
    ) -> Result<Array2<f64>> {
        let picks = picks.resolve(&self.info)?;
        let n = self.n_times();
        let stop = stop.unwrap_or(n).min(n);
        if start > stop {
            bail!(FifError::InvalidArgument(format!("start ({start}) must not exceed stop ({stop})")));
        }
        let bad = self.spans(self.annotations.iter().filter(|a| a.is_bad()));
        match reject {
            RejectByAnnotation::None => self.read_range(start, stop, &picks),
            RejectByAnnotation::Omit => {
                let blocks = gaps_between(&bad, start, stop)
                    .into_iter()
                    .map(|(a, b)| self.read_range(a, b, &picks))
                    .collect::<Result<Vec<_>>>()?;
                if blocks.is_empty() {
                    return Ok(Array2::zeros((picks.len(), 0)));
                }
                let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
                Ok(ndarray::concatenate(Axis(1), &views)?)
            }
            RejectByAnnotation::Nan => {
                let mut data = self.read_range(start, stop, &picks)?;
                for (a, b) in bad {
                    let (a, b) = (a.clamp(start, stop), b.clamp(start, stop));
                    if a < b {
                        data.slice_mut(s![.., a - start..b - start]).fill(f64::NAN);
                    }
                }
                Ok(data)
            }
        }
    }

    /// Samples and their times for a channel and sample selection.
    pub fn slice(&self, picks: &ChannelSelector, samples: SampleSelector) -> Result<(Array2<f64>, Array1<f64>)> {
        let picks = picks.resolve(&self.info)?;
        let (start, stop) = samples.resolve(self.n_times())?;
        let data = self.read_range(start, stop, &picks)?;
        let sfreq = self.info.sfreq;
        let times = Array1::from_iter((start..stop).map(|i| i as f64 / sfreq));
        Ok((data, times))
    }

    /// Index spans `[lo, hi)` covered by `annots`, clipped to the data.
    /// Zero-duration annotations give empty spans.
    pub(crate) fn spans<'a>(&self, annots: impl Iterator<Item = &'a Annotation>) -> Vec<(usize, usize)> {
        let first = self.first_samp();
        let n = self.n_times() as i64;
        annots
            .filter_map(|a| {
                let (onset, len) = a.sample_span(self.info.sfreq);
                let lo = onset - first;
                let hi = lo + len;
                (hi >= 0 && lo <= n).then(|| (lo.clamp(0, n) as usize, hi.clamp(0, n) as usize))
            })
            .collect()
    }

    // ── State transition ─────────────────────────────────────────────────

    /// Read every sample into memory.  Does nothing when already loaded.
    pub fn load_data(&mut self) -> Result<&mut Self> {
        if matches!(self.storage, Storage::Lazy(_)) {
            let data = self.read_all_data()?;
            log::debug!("materialized {} × {} samples", data.nrows(), data.ncols());
            self.storage = Storage::Materialized(data);
            self.projector = None;
        }
        Ok(self)
    }

    // ── Derived views ────────────────────────────────────────────────────

    /// Restrict to `tmin..=tmax` seconds from the first sample.
    ///
    /// `tmax` defaults to the last sample.  With `include_tmax = false` the
    /// sample at `tmax` is left out.
    pub fn crop(&self, tmin: f64, tmax: Option<f64>, include_tmax: bool) -> Result<RawFif> {
        let sfreq = self.info.sfreq;
        let max_time = (self.n_times() - 1) as f64 / sfreq;
        let tmax = tmax.unwrap_or(max_time);
        if tmin > tmax {
            bail!(FifError::InvalidArgument(format!("tmin ({tmin}) must be less than tmax ({tmax})")));
        }
        if tmin < 0.0 {
            bail!(FifError::InvalidArgument(format!("tmin must be >= 0, got {tmin}")));
        }
        let excluded = if include_tmax { 0.0 } else { 1.0 / sfreq };
        if tmax - excluded > max_time {
            bail!(FifError::InvalidArgument(format!(
                "tmax ({tmax}) must be less than or equal to the max time ({max_time:.4} s)"
            )));
        }
        let smin = (tmin * sfreq).round() as i64;
        let smax = (tmax * sfreq).round() as i64 - i64::from(!include_tmax);
        if smax < smin {
            bail!(FifError::InvalidArgument(format!(
                "No samples remain when cropping with tmin={tmin}, tmax={tmax} and include_tmax=False"
            )));
        }
        let stop = ((smax + 1) as usize).min(self.n_times());
        Ok(self.crop_samples(smin as usize, stop))
    }

    /// Restrict to samples `start..stop`.
    pub(crate) fn crop_samples(&self, start: usize, stop: usize) -> RawFif {
        let mut segments = Vec::new();
        let mut views = Vec::new();
        let mut offset = 0;
        for (k, seg) in self.segments.iter().enumerate() {
            let len = seg.len();
            let (lo, hi) = (start.max(offset), stop.min(offset + len));
            if lo < hi {
                segments.push(Segment {
                    first_samp: seg.first_samp + (lo - offset) as i64,
                    last_samp:  seg.first_samp + (hi - offset) as i64 - 1,
                });
                if let Storage::Lazy(lazy) = &self.storage {
                    if let Some(v) = lazy.get(k) {
                        views.push(LazySegment { start: v.start + lo - offset, len: hi - lo, ..v.clone() });
                    }
                }
            }
            offset += len;
        }
        let storage = match &self.storage {
            Storage::Lazy(_) => Storage::Lazy(views),
            Storage::Materialized(data) => Storage::Materialized(data.slice(s![.., start..stop]).to_owned()),
        };

        let sfreq = self.info.sfreq;
        let old_clock = self.first_samp() + start as i64;
        let new_first = segments.first().map_or(old_clock, |s| s.first_samp);
        let annotations = self
            .annotations
            .cropped(old_clock as f64 / sfreq, (self.first_samp() + stop as i64) as f64 / sfreq)
            .shifted((new_first - old_clock) as f64 / sfreq);
        self.derive(self.info.clone(), annotations, segments, storage)
    }

    /// Keep only the selected channels, in selection order.
    ///
    /// Lazy data stay lazy unless a projector is pending on the reads, in
    /// which case the data are materialized first.
    pub fn pick(&self, picks: &ChannelSelector) -> Result<RawFif> {
        let idx = picks.resolve(&self.info)?;
        if self.projector.is_some() && !self.is_loaded() {
            let mut loaded = self.clone();
            loaded.load_data()?;
            return loaded.pick(picks);
        }
        let storage = match &self.storage {
            Storage::Lazy(views) => Storage::Lazy(
                views
                    .iter()
                    .map(|v| LazySegment { picks: idx.iter().map(|&i| v.picks[i]).collect(), ..v.clone() })
                    .collect(),
            ),
            Storage::Materialized(data) => Storage::Materialized(data.select(Axis(0), &idx)),
        };
        Ok(self.derive(self.info.pick(&idx), self.annotations.clone(), self.segments.clone(), storage))
    }

    // ── Projection ───────────────────────────────────────────────────────

    /// Add projectors (inactive), optionally removing the existing ones.
    ///
    /// Projectors identical to one already present are skipped.  Removing
    /// projectors that are active, or adding one whose name matches an
    /// active projector with different vectors, fails.
    pub fn set_projection(&mut self, projs: Vec<Projector>, remove_existing: bool) -> Result<()> {
        if remove_existing {
            if self.info.projs.iter().any(|p| p.active) {
                bail!(FifError::InvalidArgument(
                    "Cannot remove projectors that have already been applied".into()
                ));
            }
            self.info.projs.clear();
        }
        for p in projs {
            if let Some(active) = self.info.projs.iter().find(|e| e.active && e.desc == p.desc) {
                if !active.same_content(&p) {
                    bail!(FifError::InvalidArgument(format!(
                        "projector {:?} is already active and conflicts with the one being added",
                        p.desc
                    )));
                }
            }
            if self.info.projs.iter().any(|e| e.same_content(&p)) {
                continue;
            }
            self.info.projs.push(Projector { active: false, ..p });
        }
        Ok(())
    }

    /// Remove the projector at `idx`; active projectors cannot be removed.
    pub fn del_projection(&mut self, idx: usize) -> Result<Projector> {
        let Some(p) = self.info.projs.get(idx) else {
            bail!(FifError::Index(format!(
                "projector index {idx} is out of range for {} projectors",
                self.info.projs.len()
            )));
        };
        if p.active {
            bail!(FifError::InvalidArgument(format!(
                "Cannot remove projector {:?}, it has already been applied",
                p.desc
            )));
        }
        Ok(self.info.projs.remove(idx))
    }

    /// Apply every inactive projector and mark it active.
    ///
    /// Loaded data are multiplied in place; lazy data get the operator
    /// applied on every subsequent read.
    pub fn apply_projection(&mut self) -> Result<()> {
        let pending: Vec<Projector> = self.info.projs.iter().filter(|p| !p.active).cloned().collect();
        if pending.is_empty() {
            return Ok(());
        }
        let op = {
            let names = self.info.ch_names();
            make_projector(&pending, &names)
        };
        if let Some(op) = op {
            match &mut self.storage {
                Storage::Materialized(data) => *data = op.dot(data),
                Storage::Lazy(_) => {
                    self.projector = Some(match self.projector.take() {
                        Some(prev) => op.dot(&prev),
                        None => op,
                    });
                }
            }
        }
        for p in &mut self.info.projs {
            p.active = true;
        }
        log::debug!("applied {} projector(s)", pending.len());
        Ok(())
    }

    // ── Integrity ────────────────────────────────────────────────────────

    /// CRC-32 over sfreq, first sample, channel names and the samples.
    pub fn content_hash(&self) -> Result<u32> {
        let Storage::Materialized(data) = &self.storage else {
            bail!(FifError::Runtime("Cannot hash raw data that is not loaded, call load_data() first".into()));
        };
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.info.sfreq.to_le_bytes());
        hasher.update(&self.first_samp().to_le_bytes());
        for name in self.info.ch_names() {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        for v in data.iter() {
            hasher.update(&v.to_le_bytes());
        }
        Ok(hasher.finalize())
    }

    // ── Transforms ───────────────────────────────────────────────────────

    /// Run `transform` over every selected channel, separately on each
    /// stretch between annotations whose description starts with one of
    /// `skip_by_annotation` (see [`DEFAULT_SKIP_BY_ANNOTATION`]).
    pub fn apply_transform(
        &mut self,
        picks: &ChannelSelector,
        transform: &dyn SampleTransform,
        skip_by_annotation: &[&str],
    ) -> Result<()> {
        let picks = picks.resolve(&self.info)?;
        let skipped = self.spans(self.annotations.matching(skip_by_annotation));
        let stretches = gaps_between(&skipped, 0, self.n_times());
        let sfreq = self.info.sfreq;
        let Storage::Materialized(data) = &mut self.storage else {
            bail!(FifError::Runtime(
                "data must be loaded before applying a transform, call load_data() first".into()
            ));
        };
        for &ch in &picks {
            for &(a, b) in &stretches {
                let out = transform.apply(data.slice(s![ch, a..b]), sfreq)?;
                if out.len() != b - a {
                    bail!(FifError::Runtime(format!(
                        "transform returned {} samples for a stretch of {}",
                        out.len(),
                        b - a
                    )));
                }
                data.slice_mut(s![ch, a..b]).assign(&out);
            }
        }
        log::debug!("transformed {} channel(s) over {} stretch(es)", picks.len(), stretches.len());
        Ok(())
    }

    // ── Saving ───────────────────────────────────────────────────────────

    /// Write to `path`, splitting into several files when needed.
    pub fn save<P: AsRef<Path>>(&self, path: P, opts: &SaveOptions) -> Result<SplitManifest> {
        self.save_with(path, opts, |p| -> Result<Box<dyn TagWrite>> { Ok(Box::new(FifWriter::create(p)?)) })
    }

    /// Like [`RawFif::save`], creating each output file through `open`.
    pub fn save_with<P, F>(&self, path: P, opts: &SaveOptions, mut open: F) -> Result<SplitManifest>
    where
        P: AsRef<Path>,
        F: FnMut(&Path) -> Result<Box<dyn TagWrite>>,
    {
        write_raw(self, path.as_ref(), opts, &mut open)
    }
}

/// Parts of `start..stop` not covered by `spans`.  Empty spans split the
/// range without removing anything.
pub(crate) fn gaps_between(spans: &[(usize, usize)], start: usize, stop: usize) -> Vec<(usize, usize)> {
    let mut spans = spans.to_vec();
    spans.sort_unstable();
    let mut out = Vec::new();
    let mut cur = start;
    for (a, b) in spans {
        let (a, b) = (a.clamp(start, stop), b.clamp(start, stop));
        if a > cur {
            out.push((cur, a));
        }
        cur = cur.max(b);
    }
    if cur < stop {
        out.push((cur, stop));
    }
    out
}

// ── Opening ───────────────────────────────────────────────────────────────

/// Continuation reference of a split file.
#[derive(Debug, Clone)]
struct NextRef {
    name: Option<String>,
    num:  Option<i32>,
}

struct OpenedFile {
    info:        MeasInfo,
    annotations: Annotations,
    extras:      BufferExtras,
    next:        Option<NextRef>,
}

/// Parse one physical file.
fn read_file(source: Source, opts: &OpenOptions, warnings: &mut Vec<Warning>) -> Result<OpenedFile> {
    let mut reader = source.open()?;

    let directory = load_directory(&mut reader)?;
    if directory.recovered {
        Warning::DirectoryRecovered { path: source.describe() }.emit(warnings);
    }
    let tree = read_tree(&mut reader, &directory.entries)?;
    let info = read_meas_info(&mut reader, &tree)?;

    let (raw_node, maxshield) = find_raw_node(&tree)?;
    if maxshield {
        if !opts.allow_maxshield {
            bail!(FifError::InvalidArgument(format!(
                "{} contains raw Internal Active Shielding data, which may be distorted; \
                 process it with Maxwell filtering first or open it with allow_maxshield",
                source.describe()
            )));
        }
        Warning::MaxShield.emit(warnings);
    }

    let extras = compute_bounds(&mut reader, &raw_node.entries, info.n_chan, info.cals(), source.clone())?;
    let mut annotations = match tree.find_block(FIFFB_MNE_ANNOTATIONS) {
        Some(node) => read_annotations(&mut reader, node)?,
        None => Annotations::new(),
    };
    annotate_skips(&extras, info.sfreq, &mut annotations, warnings);
    let next = read_next_ref(&mut reader, &tree)?;
    log::debug!(
        "{}: {} buffers, samples {}..={}",
        source.describe(), extras.ent.len(), extras.first_samp, extras.last_samp
    );
    Ok(OpenedFile { info, annotations, extras, next })
}

fn find_raw_node(tree: &Node) -> Result<(&Node, bool)> {
    if let Some(node) = tree
        .find_block(FIFFB_RAW_DATA)
        .or_else(|| tree.find_block(FIFFB_CONTINUOUS_DATA))
    {
        return Ok((node, false));
    }
    match tree.find_block(FIFFB_IAS_RAW_DATA) {
        Some(node) => Ok((node, true)),
        None => bail!(FifError::Decode("no raw data block found in file".into())),
    }
}

/// One `BAD_ACQ_SKIP` annotation per skip, unless the file already has it.
fn annotate_skips(extras: &BufferExtras, sfreq: f64, annotations: &mut Annotations, warnings: &mut Vec<Warning>) {
    let tol = 0.5 / sfreq;
    for (start, n) in extras.skips() {
        let onset = start as f64 / sfreq;
        let duration = n as f64 / sfreq;
        if !annotations.contains_close(onset, duration, ACQ_SKIP, tol) {
            annotations.push(onset, duration, ACQ_SKIP);
        }
        Warning::AcquisitionSkip { onset, duration }.emit(warnings);
    }
}

fn read_next_ref<R: Read + Seek>(reader: &mut R, tree: &Node) -> Result<Option<NextRef>> {
    for node in tree.find_blocks(FIFFB_REF) {
        let Some(role) = node.find_tag(FIFF_REF_ROLE) else { continue };
        if read_i32(reader, role)? != FIFFV_ROLE_NEXT_FILE {
            continue;
        }
        let name = node.find_tag(FIFF_REF_FILE_NAME).map(|t| read_string(reader, t)).transpose()?;
        let num = node.find_tag(FIFF_REF_FILE_NUM).map(|t| read_i32(reader, t)).transpose()?;
        return Ok(Some(NextRef { name, num }));
    }
    Ok(None)
}

/// Paths the next split file may have: the recorded name next to the
/// current file, then the Neuromag name built from the part number.
fn next_candidates(current: &Path, next: &NextRef) -> Vec<PathBuf> {
    let dir = current.parent().unwrap_or_else(|| Path::new(""));
    let mut out = Vec::new();
    if let Some(file) = next.name.as_deref().and_then(|n| Path::new(n).file_name()) {
        out.push(dir.join(file));
    }
    if let Some(num) = next.num {
        let stem = current.file_name().and_then(|f| f.to_str()).and_then(|f| f.strip_suffix(".fif"));
        if let Some(stem) = stem {
            let base = match stem.rsplit_once('-') {
                Some((base, n)) if n.parse::<u32>().is_ok() => base,
                _ => stem,
            };
            out.push(dir.join(format!("{base}-{num}.fif")));
        }
    }
    out
}

fn split_missing(next: &str, policy: OnSplitMissing, warnings: &mut Vec<Warning>) -> Result<()> {
    match policy {
        OnSplitMissing::Raise => bail!(FifError::InvalidArgument(format!(
            "Split raw file detected but next file {next} does not exist. Ensure all files \
             were transferred properly and that split and original files were not manually \
             renamed on disk (split files should be renamed by loading and re-saving them)."
        ))),
        OnSplitMissing::Warn => {
            Warning::SplitMissing { next: next.to_string() }.emit(warnings);
            Ok(())
        }
        OnSplitMissing::Ignore => {
            log::debug!("next split file {next} is missing, ignored");
            Ok(())
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Open a FIF file with default options (lazy, no MaxShield data, a
/// missing split part is an error).
pub fn open_raw<P: AsRef<Path>>(path: P) -> Result<RawFif> {
    open_raw_with(path, &OpenOptions::default())
}

/// Open a FIF file, following its split continuation files.
pub fn open_raw_with<P: AsRef<Path>>(path: P, opts: &OpenOptions) -> Result<RawFif> {
    let path = path.as_ref();
    let mut warnings = Vec::new();
    let first = read_file(Source::File(path.to_path_buf()), opts, &mut warnings)?;
    let tol = 0.5 / first.info.sfreq;
    let n_chan = first.info.n_chan;

    let mut annotations = first.annotations;
    let mut parts = vec![Arc::new(first.extras)];
    let mut filenames = vec![path.to_path_buf()];
    let mut visited: HashSet<PathBuf> = HashSet::from([canonical(path)]);
    let mut current = path.to_path_buf();
    let mut next = first.next;

    while let Some(r) = next.take() {
        let candidates = next_candidates(&current, &r);
        let Some(found) = candidates.iter().find(|p| p.is_file()).cloned() else {
            let shown = candidates
                .first()
                .map(|p| p.display().to_string())
                .or_else(|| r.name.clone())
                .unwrap_or_else(|| "<unnamed>".into());
            split_missing(&shown, opts.on_split_missing, &mut warnings)?;
            break;
        };
        if !visited.insert(canonical(&found)) {
            log::debug!("split chain returns to {}, stopping", found.display());
            break;
        }
        log::info!("following split chain to {}", found.display());
        let part = read_file(Source::File(found.clone()), opts, &mut warnings)?;
        if part.info.n_chan != n_chan {
            bail!(FifError::Decode(format!(
                "split file {} has {} channels, expected {n_chan}",
                found.display(),
                part.info.n_chan
            )));
        }
        for a in part.annotations.iter() {
            if !annotations.contains_close(a.onset, a.duration, &a.description, tol) {
                annotations.push(a.onset, a.duration, &a.description);
            }
        }
        parts.push(Arc::new(part.extras));
        filenames.push(found.clone());
        next = part.next;
        current = found;
    }

    RawFif::from_parts(first.info, annotations, parts, filenames, warnings, opts.preload)
}

/// Open a FIF recording from a byte stream.
///
/// The stream is read to its end and kept in memory.  Split continuation
/// files cannot be located from a stream, so a continuation reference is
/// handled by `opts.on_split_missing`.
pub fn open_raw_reader<R: Read>(mut reader: R, opts: &OpenOptions) -> Result<RawFif> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).context("read FIF stream")?;
    let mut warnings = Vec::new();
    let file = read_file(Source::Memory(Arc::from(bytes)), opts, &mut warnings)?;
    if let Some(r) = &file.next {
        let shown = r.name.clone().unwrap_or_else(|| format!("part {}", r.num.unwrap_or(1)));
        split_missing(&shown, opts.on_split_missing, &mut warnings)?;
    }
    RawFif::from_parts(file.info, file.annotations, vec![Arc::new(file.extras)], Vec::new(), warnings, opts.preload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, ArrayView1};

    fn ramp(n_chan: usize, n: usize, sfreq: f64) -> RawFif {
        let names: Vec<String> = (0..n_chan).map(|i| format!("EEG {i:03}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let info = MeasInfo::from_names(&refs, FIFFV_EEG_CH, sfreq);
        let data = Array2::from_shape_fn((n_chan, n), |(c, t)| (c * 1000 + t) as f64);
        RawFif::from_array(info, data, 100).unwrap()
    }

    #[test]
    fn shape_and_clock() {
        let raw = ramp(2, 50, 10.0);
        assert_eq!(raw.n_times(), 50);
        assert_eq!(raw.first_samp(), 100);
        assert_eq!(raw.last_samp(), 149);
        assert_abs_diff_eq!(raw.times()[49], 4.9, epsilon = 1e-12);
        assert_eq!(raw.kind(), RawKind::Array);
        assert!(raw.is_loaded());
    }

    #[test]
    fn crop_bounds() {
        let raw = ramp(1, 100, 10.0);
        let c = raw.crop(1.0, Some(2.0), true).unwrap();
        assert_eq!(c.n_times(), 11);
        assert_eq!(c.first_samp(), 110);
        let c = raw.crop(1.0, Some(2.0), false).unwrap();
        assert_eq!(c.n_times(), 10);

        let err = raw.crop(-1.0, None, true).unwrap_err();
        assert!(err.to_string().contains("tmin must be >= 0"));
        let err = raw.crop(0.0, Some(10.0), true).unwrap_err();
        assert!(err.to_string().contains("must be less than or equal to the max time (9.9000 s)"));
        let err = raw.crop(1.0, Some(1.0), false).unwrap_err();
        assert!(err.to_string().contains("No samples remain"));
        assert!(raw.crop(2.0, Some(1.0), true).is_err());
    }

    #[test]
    fn crop_keeps_annotation_clock() {
        let mut raw = ramp(1, 100, 10.0);
        raw.annotations.push(13.0, 1.0, "BAD_x");
        let c = raw.crop(2.5, None, true).unwrap();
        let a = c.annotations.iter().next().unwrap();
        assert_abs_diff_eq!(a.onset, 13.0, epsilon = 1e-12);
        // samples 130..140 are rows 5..15 of the cropped data
        let kept = c.get_data(&ChannelSelector::All, 0, None, RejectByAnnotation::Omit).unwrap();
        assert_eq!(kept.ncols(), 65);
        assert_eq!(kept[[0, 5]], 40.0);
    }

    #[test]
    fn get_data_omit_and_nan() {
        let mut raw = ramp(1, 20, 10.0);
        raw.annotations.push(10.5, 0.5, "bad blink");
        raw.annotations.push(11.5, 0.0, "BAD boundary");
        let omit = raw.get_data(&ChannelSelector::All, 0, None, RejectByAnnotation::Omit).unwrap();
        assert_eq!(omit.ncols(), 15);
        assert_eq!(omit[[0, 5]], 10.0);
        let nan = raw.get_data(&ChannelSelector::All, 0, None, RejectByAnnotation::Nan).unwrap();
        assert!(nan[[0, 5]].is_nan() && nan[[0, 9]].is_nan());
        assert_eq!(nan[[0, 10]], 10.0);
    }

    #[test]
    fn slice_selectors() {
        let raw = ramp(3, 10, 10.0);
        let (d, t) = raw
            .slice(&ChannelSelector::Indices(vec![-1, 0]), SampleSelector::Range { start: Some(2), stop: Some(4) })
            .unwrap();
        assert_eq!(d, array![[2002.0, 2003.0], [2.0, 3.0]]);
        assert_abs_diff_eq!(t[1], 0.3, epsilon = 1e-12);
        let err = raw.slice(&ChannelSelector::All, SampleSelector::Index(10)).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Index(_))));
        let err = raw.slice(&ChannelSelector::Index(3), SampleSelector::Index(0)).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::InvalidArgument(_))));
    }

    #[test]
    fn projection_rules() {
        let mut raw = ramp(2, 10, 10.0);
        let avg = Projector::new("avg", &["EEG 000", "EEG 001"], array![[1.0, 1.0]]);
        raw.set_projection(vec![avg.clone(), avg.clone()], false).unwrap();
        assert_eq!(raw.info.projs.len(), 1);
        raw.apply_projection().unwrap();
        let data = raw.read_all_data().unwrap();
        for t in 0..10 {
            assert_abs_diff_eq!(data[[0, t]] + data[[1, t]], 0.0, epsilon = 1e-9);
        }
        let other = Projector::new("avg", &["EEG 000", "EEG 001"], array![[1.0, 0.0]]);
        assert!(raw.set_projection(vec![other], false).is_err());
        assert!(raw.set_projection(vec![], true).is_err());
        assert!(raw.del_projection(0).is_err());
        assert!(matches!(
            raw.del_projection(5).unwrap_err().downcast_ref::<FifError>(),
            Some(FifError::Index(_))
        ));
    }

    #[test]
    fn pick_prunes_channels() {
        let raw = ramp(3, 5, 10.0);
        let p = raw.pick(&ChannelSelector::from(&["EEG 002", "EEG 000"][..])).unwrap();
        assert_eq!(p.info.ch_names(), vec!["EEG 002", "EEG 000"]);
        assert_eq!(p.read_all_data().unwrap().row(0)[1], 2001.0);
    }

    #[test]
    fn hash_tracks_content() {
        let raw = ramp(2, 10, 10.0);
        let same = ramp(2, 10, 10.0);
        assert_eq!(raw.content_hash().unwrap(), same.content_hash().unwrap());
        let cropped = raw.crop(0.1, None, true).unwrap();
        assert_ne!(raw.content_hash().unwrap(), cropped.content_hash().unwrap());
    }

    struct Negate;

    impl SampleTransform for Negate {
        fn apply(&self, x: ArrayView1<'_, f64>, _sfreq: f64) -> Result<Array1<f64>> {
            Ok(x.mapv(|v| -v))
        }
    }

    #[test]
    fn transform_skips_annotated_stretches() {
        let mut raw = ramp(1, 10, 10.0);
        raw.annotations.push(10.3, 0.2, "BAD_ACQ_SKIP");
        raw.apply_transform(&ChannelSelector::All, &Negate, DEFAULT_SKIP_BY_ANNOTATION).unwrap();
        let d = raw.read_all_data().unwrap();
        assert_eq!(d[[0, 2]], -2.0);
        assert_eq!(d[[0, 3]], 3.0);
        assert_eq!(d[[0, 4]], 4.0);
        assert_eq!(d[[0, 5]], -5.0);
    }

    #[test]
    fn gaps() {
        assert_eq!(gaps_between(&[(2, 4), (3, 6), (8, 8)], 0, 10), vec![(0, 2), (6, 8), (8, 10)]);
        assert!(gaps_between(&[(0, 10)], 0, 10).is_empty());
    }
}
