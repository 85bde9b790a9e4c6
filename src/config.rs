//! Open and save configuration.
//!
//! [`OpenOptions`] controls how a recording is opened and [`SaveOptions`]
//! holds every tunable parameter of [`crate::RawFif::save`].  All fields are
//! `pub` and have defaults, so options are built with struct-update syntax:
//!
//! ```
//! use fiffraw::{SaveOptions, SplitNaming, SplitSize};
//!
//! let opts = SaveOptions {
//!     buffer_size_sec: Some(1.0),
//!     split_size:      "10MB".parse::<SplitSize>().unwrap(),
//!     split_naming:    SplitNaming::Bids,
//!     overwrite:       true,
//!     ..SaveOptions::default()
//! };
//! assert_eq!(opts.split_size.bytes(), 10_000_000);
//! ```
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::error::FifError;
use crate::fiff::constants::*;
use crate::fiff::picks::ChannelSelector;

// ── Enumerations ──────────────────────────────────────────────────────────

/// File naming scheme used when a save is divided into several parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitNaming {
    /// `<stem>.fif`, `<stem>-1.fif`, `<stem>-2.fif`, …
    #[default]
    Neuromag,
    /// `<stem>_split-01_<suffix>.fif`, `<stem>_split-02_<suffix>.fif`, …
    Bids,
}

/// Reaction to a soft mismatch between concatenated recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnMismatch {
    Ignore,
    Warn,
    #[default]
    Raise,
}

/// Reaction to a split continuation file that cannot be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnSplitMissing {
    #[default]
    Raise,
    Warn,
    Ignore,
}

/// On-disk sample encoding of data buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 16-bit integers (`FIFFT_DAU_PACK16`).
    Short,
    /// 32-bit integers.
    Int,
    /// IEEE single precision.
    #[default]
    Single,
    /// IEEE double precision.
    Double,
    /// Interleaved single-precision real/imaginary pairs.
    ComplexSingle,
    /// Interleaved double-precision real/imaginary pairs.
    ComplexDouble,
}

impl SampleFormat {
    /// Tag payload type written for data buffers of this format.
    pub fn tag_type(self) -> u32 {
        match self {
            SampleFormat::Short         => FIFFT_DAU_PACK16,
            SampleFormat::Int           => FIFFT_INT,
            SampleFormat::Single        => FIFFT_FLOAT,
            SampleFormat::Double        => FIFFT_DOUBLE,
            SampleFormat::ComplexSingle => FIFFT_COMPLEX_FLOAT,
            SampleFormat::ComplexDouble => FIFFT_COMPLEX_DOUBLE,
        }
    }

    /// Inverse of [`SampleFormat::tag_type`]; `FIFFT_SHORT` maps to `Short`.
    pub fn from_tag_type(ftype: u32) -> Option<Self> {
        match ftype {
            FIFFT_DAU_PACK16 | FIFFT_SHORT => Some(SampleFormat::Short),
            FIFFT_INT                      => Some(SampleFormat::Int),
            FIFFT_FLOAT                    => Some(SampleFormat::Single),
            FIFFT_DOUBLE                   => Some(SampleFormat::Double),
            FIFFT_COMPLEX_FLOAT            => Some(SampleFormat::ComplexSingle),
            FIFFT_COMPLEX_DOUBLE           => Some(SampleFormat::ComplexDouble),
            _ => None,
        }
    }

    /// Bytes per stored sample.
    pub fn width(self) -> usize {
        bytes_per_sample(self.tag_type()).unwrap_or(4)
    }

    /// `true` for the integer encodings that need calibration rescaling.
    pub fn is_integer(self) -> bool {
        matches!(self, SampleFormat::Short | SampleFormat::Int)
    }
}

// ── Split size ────────────────────────────────────────────────────────────

/// Upper bound on the size of one output file in bytes.
///
/// Parsed from plain byte counts (`"123"`, `"123B"`) or from decimal
/// multiples: `kB` = 10³, `MB` = 10⁶, `GB` = 10⁹ (`"4.5MB"`, `"2GB"`).
/// Tag positions are 32-bit on disk, so the maximum is 2 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSize(u64);

/// Largest representable split size.
pub const MAX_SPLIT_SIZE: u64 = 1 << 31;

impl SplitSize {
    /// Validate a byte count.
    pub fn from_bytes(bytes: u64) -> Result<Self> {
        if bytes == 0 {
            bail!(FifError::InvalidArgument("split_size must be positive".into()));
        }
        if bytes > MAX_SPLIT_SIZE {
            bail!(FifError::InvalidArgument(format!(
                "split_size cannot be larger than 2GB, got {bytes} bytes"
            )));
        }
        Ok(Self(bytes))
    }

    #[inline]
    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl Default for SplitSize {
    /// 2 GB, the largest size addressable by 32-bit tag positions.
    fn default() -> Self {
        Self(2_000_000_000)
    }
}

impl FromStr for SplitSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let mult = match unit.trim() {
            "" | "B" => 1.0,
            "kB" | "KB" => 1e3,
            "MB" => 1e6,
            "GB" => 1e9,
            other => bail!(FifError::InvalidArgument(format!(
                "split_size unit must be one of B, kB, MB or GB, got {other:?}"
            ))),
        };
        let value: f64 = num.parse().map_err(|_| {
            FifError::InvalidArgument(format!("could not parse split_size {s:?}"))
        })?;
        SplitSize::from_bytes((value * mult).round() as u64)
    }
}

impl fmt::Display for SplitSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

// ── Open options ──────────────────────────────────────────────────────────

/// Options for [`crate::open_raw_with`] and [`crate::open_raw_reader`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Read every sample into memory right after parsing the header.
    ///
    /// Default: `false` (samples are read from disk on demand).
    pub preload: bool,

    /// Accept files holding raw Internal Active Shielding data.
    ///
    /// Such data are usually distorted and should be Maxwell filtered
    /// first, so opening them fails unless this is set, in which case a
    /// [`crate::Warning::MaxShield`] is emitted instead.
    ///
    /// Default: `false`.
    pub allow_maxshield: bool,

    /// What to do when a split continuation file is referenced but absent.
    ///
    /// Default: [`OnSplitMissing::Raise`].
    pub on_split_missing: OnSplitMissing,
}

// ── Save options ──────────────────────────────────────────────────────────

/// Parameters of [`crate::RawFif::save`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Channels to write.
    ///
    /// Default: [`ChannelSelector::All`].
    pub picks: ChannelSelector,

    /// First time point to write, in seconds from the start of the data.
    ///
    /// Default: `0.0`.
    pub tmin: f64,

    /// Last time point to write (inclusive), in seconds.  `None` writes up
    /// to the last sample.
    ///
    /// Default: `None`.
    pub tmax: Option<f64>,

    /// Target duration of one on-disk data buffer in seconds.
    ///
    /// The buffer holds `ceil(buffer_size_sec · sfreq)` samples; the last
    /// buffer of a save may be shorter.  `None` reuses the buffer duration
    /// of the file the data came from, or 1 s for in-memory data.
    ///
    /// Default: `None`.
    pub buffer_size_sec: Option<f64>,

    /// Maximum size of one output file.  Larger saves are split into
    /// several files linked to each other.
    ///
    /// Default: 2 GB.
    pub split_size: SplitSize,

    /// Naming scheme of the files after the first one.
    ///
    /// Default: [`SplitNaming::Neuromag`].
    pub split_naming: SplitNaming,

    /// Discard a trailing buffer shorter than the buffer size instead of
    /// writing it.
    ///
    /// Default: `false`.
    pub drop_small_buffer: bool,

    /// On-disk sample encoding.
    ///
    /// Default: [`SampleFormat::Single`].
    pub fmt: SampleFormat,

    /// Overwrite existing destination files.
    ///
    /// Default: `false`.
    pub overwrite: bool,

    /// Apply pending (inactive) projectors before writing.
    ///
    /// Default: `false`.
    pub proj: bool,

    /// Maximum number of files one save may produce.  Exceeding it aborts
    /// the save with a runtime error; files written so far are kept.
    ///
    /// Default: `100`.
    pub max_splits: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            picks: ChannelSelector::All,
            tmin: 0.0,
            tmax: None,
            buffer_size_sec: None,
            split_size: SplitSize::default(),
            split_naming: SplitNaming::Neuromag,
            drop_small_buffer: false,
            fmt: SampleFormat::Single,
            overwrite: false,
            proj: false,
            max_splits: 100,
        }
    }
}
