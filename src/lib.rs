//! # fiffraw: FIFF raw recording I/O in pure Rust
//!
//! `fiffraw` reads and writes continuous multichannel recordings stored in
//! the FIFF container used by Neuromag/Elekta/MEGIN systems and
//! [MNE-Python](https://mne.tools).
//!
//! ## Layers
//!
//! ```text
//! file bytes
//!   │
//!   ├─ fiff::tag        16-byte big-endian tag headers + typed payloads
//!   ├─ fiff::tree       tag directory (stored, or rebuilt by scanning) → block tree
//!   ├─ fiff::extras     data buffers → sample ranges, acquisition skips
//!   ├─ fiff::raw        RawFif: lazy or loaded samples, crop, pick, projection
//!   ├─ fiff::split      save, sharded into parts of at most `split_size` bytes
//!   └─ fiff::concat     concatenation and stim-aware resampling
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use fiffraw::{open_raw, SaveOptions, SplitSize};
//!
//! // Lazy open: only metadata and the buffer map are read.
//! let raw = open_raw("data/sample1_raw.fif").unwrap();
//! println!("{} channels @ {} Hz, {} samples", raw.info.n_chan, raw.info.sfreq, raw.n_times());
//!
//! // First ten seconds, written in parts of at most 100 MB.
//! let head = raw.crop(0.0, Some(10.0), true).unwrap();
//! let opts = SaveOptions { split_size: SplitSize::from_bytes(100_000_000).unwrap(), ..Default::default() };
//! let manifest = head.save("out/head_raw.fif", &opts).unwrap();
//! println!("wrote {:?}", manifest.paths);
//! ```
//!
//! ## Diagnostics
//!
//! Failures are `anyhow::Error`s whose root cause is a [`FifError`]; use
//! `err.downcast_ref::<FifError>()` to branch on the class.  Non-fatal
//! conditions are [`Warning`]s: logged through the `log` facade and kept
//! on [`RawFif::warnings`] or [`SplitManifest::warnings`].

pub mod config;
pub mod error;
pub mod events;
pub mod fiff;
pub mod filter;
pub mod resample;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `fiffraw::Foo` without having to know the internal module layout.

// config
pub use config::{
    OnMismatch, OnSplitMissing, OpenOptions, SampleFormat, SaveOptions, SplitNaming, SplitSize, MAX_SPLIT_SIZE,
};

// errors and warnings
pub use error::{FifError, Warning};

// events
pub use events::{concatenate_events, find_events, find_onsets, Event};

// fiff: raw accessor, metadata, annotations, tag I/O
pub use fiff::{
    // high-level
    concatenate, concatenate_with_events, open_raw, open_raw_reader, open_raw_with,
    RawFif, RawKind, RejectByAnnotation, Segment, SplitManifest,
    ChannelSelector, SampleSelector,
    ChannelInfo, CoordTrans, MeasInfo, Projector,
    Annotation, Annotations,
    // tag I/O
    FifWriter, TagCounter, TagHeader, TagWrite,
};

// signal processing seams
pub use filter::{FirFilter, SampleTransform};
pub use resample::{FftResampler, Resampler};
