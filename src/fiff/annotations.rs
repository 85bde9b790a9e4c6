//! Time annotations.
//!
//! Onsets are seconds on the recording clock, i.e. an onset `t` refers to
//! sample `round(t · sfreq)` in the same numbering as `first_samp`.  On disk
//! they live in a `FIFFB_MNE_ANNOTATIONS` block as three parallel fields:
//! onsets (`FIFF_MNE_BASELINE_MIN`), ends (`FIFF_MNE_BASELINE_MAX`) and the
//! descriptions joined by `:` (`FIFF_COMMENT`).
use std::io::{Read, Seek};

use anyhow::{bail, Result};

use super::constants::*;
use super::tag::{read_f32_array, read_string};
use super::tree::Node;
use super::write::TagWrite;
use crate::error::FifError;

/// Description given to acquisition skips.
pub const ACQ_SKIP: &str = "BAD_ACQ_SKIP";
/// Descriptions inserted at the junctions of concatenated recordings.
pub const BAD_BOUNDARY: &str = "BAD boundary";
pub const EDGE_BOUNDARY: &str = "EDGE boundary";

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub onset:       f64,
    pub duration:    f64,
    pub description: String,
}

impl Annotation {
    /// Descriptions starting with "bad" (any case) mark unusable data.
    pub fn is_bad(&self) -> bool {
        self.description.to_ascii_lowercase().starts_with("bad")
    }

    /// First sample covered and the number of samples covered.
    pub fn sample_span(&self, sfreq: f64) -> (i64, i64) {
        let start = (self.onset * sfreq).round() as i64;
        (start, (self.duration * sfreq).round().max(0.0) as i64)
    }
}

/// Ordered collection of annotations (sorted by onset).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    items: Vec<Annotation>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Annotation> {
        self.items.iter()
    }

    /// Insert keeping onset order (stable for equal onsets).
    pub fn push(&mut self, onset: f64, duration: f64, description: &str) {
        let idx = self.items.partition_point(|a| a.onset <= onset);
        self.items.insert(idx, Annotation { onset, duration, description: description.to_string() });
    }

    /// `true` if an annotation with the same description lies within `tol`
    /// seconds in both onset and duration.
    pub fn contains_close(&self, onset: f64, duration: f64, description: &str, tol: f64) -> bool {
        self.items.iter().any(|a| {
            a.description == description
                && (a.onset - onset).abs() <= tol
                && (a.duration - duration).abs() <= tol
        })
    }

    pub fn extend(&mut self, other: &Annotations) {
        for a in &other.items {
            self.push(a.onset, a.duration, &a.description);
        }
    }

    /// Copy with every onset moved by `delta` seconds.
    pub fn shifted(&self, delta: f64) -> Annotations {
        let items = self
            .items
            .iter()
            .map(|a| Annotation { onset: a.onset + delta, ..a.clone() })
            .collect();
        Annotations { items }
    }

    /// Keep what overlaps `[tmin, tmax]`, clipped to it.  Zero-duration
    /// annotations are kept when their onset lies inside the window.
    pub fn cropped(&self, tmin: f64, tmax: f64) -> Annotations {
        let items = self
            .items
            .iter()
            .filter_map(|a| {
                let end = a.onset + a.duration;
                if a.onset > tmax || end < tmin || (a.duration > 0.0 && end == tmin) {
                    return None;
                }
                let onset = a.onset.max(tmin);
                let end = end.min(tmax);
                Some(Annotation { onset, duration: (end - onset).max(0.0), description: a.description.clone() })
            })
            .collect();
        Annotations { items }
    }

    /// Annotations whose lowercase description starts with any of `prefixes`.
    pub fn matching<'a>(&'a self, prefixes: &'a [&str]) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.items.iter().filter(move |a| {
            let d = a.description.to_ascii_lowercase();
            prefixes.iter().any(|p| d.starts_with(&p.to_ascii_lowercase()))
        })
    }
}

/// Read a `FIFFB_MNE_ANNOTATIONS` block.
pub fn read_annotations<R: Read + Seek>(reader: &mut R, node: &Node) -> Result<Annotations> {
    let mut onsets = Vec::new();
    let mut ends = Vec::new();
    let mut descriptions = Vec::new();
    for ent in &node.entries {
        match ent.kind {
            FIFF_MNE_BASELINE_MIN => onsets = read_f32_array(reader, ent)?,
            FIFF_MNE_BASELINE_MAX => ends = read_f32_array(reader, ent)?,
            FIFF_COMMENT => {
                descriptions = read_string(reader, ent)?
                    .split(':')
                    .map(|d| d.replace(';', ":"))
                    .collect();
            }
            _ => {}
        }
    }
    if onsets.is_empty() {
        return Ok(Annotations::new());
    }
    if onsets.len() != ends.len() || onsets.len() != descriptions.len() {
        bail!(FifError::Decode(format!(
            "annotation block is inconsistent: {} onsets, {} ends, {} descriptions",
            onsets.len(), ends.len(), descriptions.len()
        )));
    }
    let mut out = Annotations::new();
    for ((&on, &end), desc) in onsets.iter().zip(&ends).zip(&descriptions) {
        out.push(on as f64, (end - on).max(0.0) as f64, desc);
    }
    Ok(out)
}

/// Write a `FIFFB_MNE_ANNOTATIONS` block; nothing for an empty set.
pub fn write_annotations(w: &mut dyn TagWrite, annots: &Annotations) -> Result<()> {
    if annots.is_empty() {
        return Ok(());
    }
    let onsets: Vec<f32> = annots.iter().map(|a| a.onset as f32).collect();
    let ends: Vec<f32> = annots.iter().map(|a| (a.onset + a.duration) as f32).collect();
    let descs: Vec<String> = annots.iter().map(|a| a.description.replace(':', ";")).collect();
    w.start_block(FIFFB_MNE_ANNOTATIONS)?;
    w.write_float(FIFF_MNE_BASELINE_MIN, &onsets)?;
    w.write_float(FIFF_MNE_BASELINE_MAX, &ends)?;
    w.write_string(FIFF_COMMENT, &descs.join(":"))?;
    w.end_block(FIFFB_MNE_ANNOTATIONS)
}
