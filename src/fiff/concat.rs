//! Concatenation and resampling of raw recordings.
//!
//! # Concatenation
//! Inputs are checked pairwise against the first one, in this order:
//! kind, channel count, channel names and order, bad channels, sampling
//! rate and projectors, and finally the device-to-head transform (the only
//! check governed by [`OnMismatch`]).  The joined samples are then built;
//! nothing of the receiver changes until every fallible step has succeeded.
//!
//! Each input stays a separate [`Segment`], so the original sample numbers
//! of every recording remain recoverable.  A zero-length `BAD boundary` and
//! `EDGE boundary` annotation pair marks every junction.
//!
//! # Resampling
//! Every segment is resampled on its own: continuous channels through a
//! [`Resampler`], stim channels by picking the first non-zero code in the
//! window of input samples that maps onto each output sample.  Resampling
//! before or after concatenation therefore gives identical samples.
use std::collections::BTreeSet;

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::annotations::{BAD_BOUNDARY, EDGE_BOUNDARY};
use super::raw::{RawFif, Segment, Storage};
use crate::config::OnMismatch;
use crate::error::{FifError, Warning};
use crate::events::{concatenate_events, find_onsets, Event};
use crate::resample::{FftResampler, Resampler};

/// Tolerance when comparing device-to-head transforms.
const HEAD_T_TOL: f32 = 1e-6;

// ── Checks ───────────────────────────────────────────────────────────────

fn check_compatible(
    base: &RawFif,
    other: &RawFif,
    idx: usize,
    on_mismatch: OnMismatch,
    warnings: &mut Vec<Warning>,
) -> Result<()> {
    if base.kind() != other.kind() {
        bail!(FifError::InvalidArgument(format!(
            "raw[{idx}] type must match ({:?} vs {:?})",
            other.kind(),
            base.kind()
        )));
    }
    if base.info.n_chan != other.info.n_chan {
        bail!(FifError::InvalidArgument(format!(
            "raw[{idx}]['info']['nchan'] must match ({} vs {})",
            other.info.n_chan, base.info.n_chan
        )));
    }
    let (names, other_names) = (base.info.ch_names(), other.info.ch_names());
    if names != other_names {
        let a: BTreeSet<&str> = names.iter().copied().collect();
        let b: BTreeSet<&str> = other_names.iter().copied().collect();
        if a == b {
            bail!(FifError::InvalidArgument(format!(
                "Channel order must match. raw[{idx}] lists the same channels in a different \
                 order, pick them in the order of raw[0] first"
            )));
        }
        bail!(FifError::InvalidArgument(format!("raw[{idx}]['info']['ch_names'] must match")));
    }
    let bads: BTreeSet<&str> = base.info.bads.iter().map(String::as_str).collect();
    let other_bads: BTreeSet<&str> = other.info.bads.iter().map(String::as_str).collect();
    if bads != other_bads {
        bail!(FifError::InvalidArgument(format!("raw[{idx}]['info']['bads'] must match")));
    }
    if base.info.sfreq != other.info.sfreq {
        bail!(FifError::InvalidArgument(format!(
            "raw[{idx}].info['sfreq'] must match ({} vs {})",
            other.info.sfreq, base.info.sfreq
        )));
    }
    let same_projs = base.info.projs.len() == other.info.projs.len()
        && base
            .info
            .projs
            .iter()
            .zip(&other.info.projs)
            .all(|(a, b)| a.active == b.active && a.same_content(b));
    if !same_projs {
        bail!(FifError::InvalidArgument(format!("raw[{idx}].info['projs'] must match")));
    }
    let same_head = match (&base.info.dev_head_t, &other.info.dev_head_t) {
        (Some(a), Some(b)) => a.approx_eq(b, HEAD_T_TOL),
        (None, None) => true,
        _ => false,
    };
    if !same_head {
        match on_mismatch {
            OnMismatch::Raise => bail!(FifError::InvalidArgument(format!(
                "raw[{idx}]['info']['dev_head_t'] differs. The instances probably come from \
                 different runs, and are therefore associated with different head positions"
            ))),
            OnMismatch::Warn => Warning::HeadPositionMismatch { index: idx }.emit(warnings),
            OnMismatch::Ignore => {}
        }
    }
    Ok(())
}

// ── Concatenation ─────────────────────────────────────────────────────────

/// Join `raws` end to end; see the module docs.
pub fn concatenate(raws: Vec<RawFif>, preload: bool, on_mismatch: OnMismatch) -> Result<RawFif> {
    let mut it = raws.into_iter();
    let Some(mut out) = it.next() else {
        bail!(FifError::InvalidArgument("concatenate needs at least one raw instance".into()));
    };
    out.append(it.collect(), preload, on_mismatch)?;
    Ok(out)
}

/// Like [`concatenate`], moving every recording's events onto the joined
/// clock.  `events` holds one list per recording.
pub fn concatenate_with_events(
    raws: Vec<RawFif>,
    events: &[Vec<Event>],
    preload: bool,
    on_mismatch: OnMismatch,
) -> Result<(RawFif, Vec<Event>)> {
    if raws.len() != events.len() {
        bail!(FifError::InvalidArgument(format!(
            "raws ({}) and event lists ({}) must have the same length",
            raws.len(),
            events.len()
        )));
    }
    let firsts: Vec<i64> = raws.iter().map(RawFif::first_samp).collect();
    let lasts: Vec<i64> = raws.iter().map(RawFif::last_samp).collect();
    let events = concatenate_events(events, &firsts, &lasts)?;
    Ok((concatenate(raws, preload, on_mismatch)?, events))
}

impl RawFif {
    /// Append `others` after the end of this recording.
    ///
    /// The result stays disk-backed only when every input is disk-backed,
    /// none has a projector pending on its reads and `preload` is false.
    pub fn append(&mut self, others: Vec<RawFif>, preload: bool, on_mismatch: OnMismatch) -> Result<()> {
        if others.is_empty() {
            if preload {
                self.load_data()?;
            }
            return Ok(());
        }
        let mut warnings = Vec::new();
        for (i, other) in others.iter().enumerate() {
            check_compatible(self, other, i + 1, on_mismatch, &mut warnings)?;
        }

        let materialize = preload
            || self.is_loaded()
            || self.projector.is_some()
            || others.iter().any(|o| o.is_loaded() || o.projector.is_some());
        let storage = if materialize {
            let mut blocks = vec![self.read_all_data()?];
            for other in &others {
                blocks.push(other.read_all_data()?);
            }
            let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
            Storage::Materialized(ndarray::concatenate(Axis(1), &views)?)
        } else {
            let mut views = Vec::new();
            for raw in std::iter::once(&*self).chain(&others) {
                if let Storage::Lazy(v) = &raw.storage {
                    views.extend(v.iter().cloned());
                }
            }
            Storage::Lazy(views)
        };

        // Nothing below can fail.
        let sfreq = self.info.sfreq;
        let first = self.first_samp();
        for other in others {
            let clock = first + self.n_times() as i64;
            let onset = clock as f64 / sfreq;
            self.annotations.push(onset, 0.0, BAD_BOUNDARY);
            self.annotations.push(onset, 0.0, EDGE_BOUNDARY);
            self.annotations
                .extend(&other.annotations.shifted((clock - other.first_samp()) as f64 / sfreq));
            self.segments.extend(other.segments.iter().copied());
            for f in &other.filenames {
                if !self.filenames.contains(f) {
                    self.filenames.push(f.clone());
                }
            }
            self.warnings.extend(other.warnings);
        }
        if materialize {
            self.projector = None;
        }
        self.storage = storage;
        self.warnings.extend(warnings);
        log::debug!(
            "concatenated into {} segment(s), {} samples, loaded: {}",
            self.segments.len(),
            self.n_times(),
            self.is_loaded()
        );
        Ok(())
    }

    // ── Resampling ───────────────────────────────────────────────────────

    /// Resample to `sfreq` with the FFT resampler.
    ///
    /// `events` (absolute samples) are moved onto the new clock and
    /// returned.  Without events, a stim channel whose number of events
    /// changes raises [`Warning::EventsUnreliable`].
    pub fn resample(&self, sfreq: f64, events: Option<&[Event]>) -> Result<(RawFif, Option<Vec<Event>>)> {
        self.resample_with(sfreq, events, &FftResampler)
    }

    /// Like [`RawFif::resample`] with a caller-supplied kernel for the
    /// continuous channels.
    pub fn resample_with(
        &self,
        sfreq: f64,
        events: Option<&[Event]>,
        resampler: &dyn Resampler,
    ) -> Result<(RawFif, Option<Vec<Event>>)> {
        if !(sfreq > 0.0 && sfreq.is_finite()) {
            bail!(FifError::InvalidArgument(format!("sfreq must be positive, got {sfreq}")));
        }
        let ratio = sfreq / self.info.sfreq;
        let n_chan = self.info.n_chan;
        let all: Vec<usize> = (0..n_chan).collect();
        let is_stim: Vec<bool> = self.info.chs.iter().map(|c| c.is_stim()).collect();
        let mut counts = vec![(0usize, 0usize); n_chan];

        let mut blocks = Vec::with_capacity(self.segments.len());
        let mut segments = Vec::with_capacity(self.segments.len());
        let mut offset = 0;
        for seg in &self.segments {
            let n = seg.len();
            let n_out = (n as f64 * ratio).round() as usize;
            if n_out == 0 {
                bail!(FifError::InvalidArgument(format!(
                    "a segment of {n} samples is too short to resample to {sfreq} Hz"
                )));
            }
            let data = self.read_range(offset, offset + n, &all)?;
            let mut out = Array2::<f64>::zeros((n_chan, n_out));
            for (c, row) in data.rows().into_iter().enumerate() {
                let res = if is_stim[c] {
                    counts[c].0 += find_onsets(row).len();
                    let res = decimate_stim(row, ratio, n_out);
                    counts[c].1 += find_onsets(res.view()).len();
                    res
                } else {
                    resampler.resample(row, ratio)?
                };
                if res.len() != n_out {
                    bail!(FifError::Runtime(format!(
                        "resampler returned {} samples, expected {n_out}",
                        res.len()
                    )));
                }
                out.row_mut(c).assign(&res);
            }
            let first_samp = (seg.first_samp as f64 * ratio).round_ties_even() as i64;
            segments.push(Segment { first_samp, last_samp: first_samp + n_out as i64 - 1 });
            blocks.push(out);
            offset += n;
        }
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        let data = ndarray::concatenate(Axis(1), &views)?;
        let n_out_total = data.ncols() as i64;

        let mut info = self.info.clone();
        let nyquist = sfreq / 2.0;
        info.sfreq = sfreq;
        info.lowpass = Some(info.lowpass.map_or(nyquist, |l| l.min(nyquist)));

        let mut out = self.derive(info, self.annotations.clone(), segments, Storage::Materialized(data));
        out.projector = None;

        let remapped = events.map(|evs| {
            let first = self.first_samp();
            let new_first = (first as f64 * ratio).round_ties_even() as i64;
            evs.iter()
                .map(|e| {
                    let idx = (((e.sample - first) as f64) * ratio).round_ties_even() as i64;
                    Event { sample: idx.clamp(0, n_out_total - 1) + new_first, ..*e }
                })
                .collect::<Vec<_>>()
        });
        if events.is_none() {
            for (c, &(before, after)) in counts.iter().enumerate() {
                if is_stim[c] && before != after {
                    Warning::EventsUnreliable { channel: self.info.chs[c].name.clone(), before, after }
                        .emit(&mut out.warnings);
                }
            }
        }
        log::info!(
            "resampled {} -> {} Hz ({} -> {} samples)",
            self.info.sfreq,
            sfreq,
            self.n_times(),
            out.n_times()
        );
        Ok((out, remapped))
    }
}

/// Stim trace at the new rate: output sample `i` takes the first non-zero
/// code in `[pick_i, pick_{i+1})`, `pick_i = min(floor(i / ratio), n - 1)`.
fn decimate_stim(x: ArrayView1<'_, f64>, ratio: f64, n_out: usize) -> Array1<f64> {
    let n = x.len();
    let pick = |i: usize| (((i as f64) / ratio).floor() as usize).min(n - 1);
    Array1::from_iter((0..n_out).map(|i| {
        let lo = pick(i);
        let hi = (if i + 1 < n_out { pick(i + 1) } else { n }).max(lo + 1);
        x.slice(ndarray::s![lo..hi]).iter().copied().find(|&v| v != 0.0).unwrap_or(0.0)
    }))
}
