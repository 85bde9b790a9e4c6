//! Error taxonomy and non-fatal diagnostics.
//!
//! Fallible functions in this crate return [`anyhow::Result`]; whenever the
//! failure belongs to a well-defined class its root cause is a [`FifError`],
//! so callers can branch on it with `err.downcast_ref::<FifError>()`.
//!
//! Recoverable problems never fail an operation.  They are reported as a
//! [`Warning`], logged through the `log` facade at `warn` level and recorded
//! on the object the operation produced (see [`crate::RawFif::warnings`] and
//! [`crate::fiff::split::SplitManifest::warnings`]).
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Classified failure.
#[derive(Debug, Error)]
pub enum FifError {
    /// Malformed binary structure that cannot be reinterpreted.
    #[error("{0}")]
    Decode(String),
    /// A caller-supplied argument violates a precondition.
    #[error("{0}")]
    InvalidArgument(String),
    /// A single index lies outside the valid range.
    #[error("{0}")]
    Index(String),
    /// Destination file collision detected before writing.
    #[error(
        "Destination file exists. Please use option \"overwrite=true\" to force overwriting: {}",
        .0.display()
    )]
    FileExists(PathBuf),
    /// Unrecoverable operational failure.
    #[error("{0}")]
    Runtime(String),
}

// ── Warnings ──────────────────────────────────────────────────────────────

/// Non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// The on-disk tag directory was unusable and was rebuilt by scanning.
    DirectoryRecovered { path: String },
    /// An acquisition skip was found while mapping data buffers.
    AcquisitionSkip { onset: f64, duration: f64 },
    /// An output buffer straddles a skip annotation and was written as data.
    SkipNotAligned { start: usize, buffer_size: usize },
    /// Decimating stim channels changed the number of detectable events.
    EventsUnreliable { channel: String, before: usize, after: usize },
    /// Internal Active Shielding data were opened on request.
    MaxShield,
    /// A split continuation file referenced by the chain is missing.
    SplitMissing { next: String },
    /// Concatenated recordings disagree on the device-to-head transform.
    HeadPositionMismatch { index: usize },
    /// A file name does not follow the FIF naming conventions.
    NamingConvention { name: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::DirectoryRecovered { path } => write!(
                f,
                "FIFF tag directory in {path} is missing or corrupt, \
                 rebuilt it by scanning all tags sequentially"
            ),
            Warning::AcquisitionSkip { onset, duration } => write!(
                f,
                "acquisition skip of {duration:.3} s at {onset:.3} s, \
                 annotated as BAD_ACQ_SKIP"
            ),
            Warning::SkipNotAligned { start, buffer_size } => write!(
                f,
                "acquisition skips did not fit evenly into the output buffers \
                 (buffer of {buffer_size} samples at sample {start} written as data)"
            ),
            Warning::EventsUnreliable { channel, before, after } => write!(
                f,
                "resampling of stim channel {channel} changed the number of events \
                 from {before} to {after}; event timings may become unreliable, \
                 pass events to resample() to remap them"
            ),
            Warning::MaxShield => write!(
                f,
                "this file contains raw Internal Active Shielding data; \
                 it may be distorted, process it with Maxwell filtering"
            ),
            Warning::SplitMissing { next } => write!(
                f,
                "Split raw file detected but next file {next} does not exist; \
                 reading only the available parts"
            ),
            Warning::HeadPositionMismatch { index } => write!(
                f,
                "raw[{index}] dev_head_t differs; the recordings probably come from \
                 different runs and are associated with different head positions"
            ),
            Warning::NamingConvention { name } => write!(
                f,
                "{name} does not conform to MNE naming conventions, \
                 file names should end with raw.fif, raw_sss.fif, raw_tsss.fif, \
                 _meg.fif, _eeg.fif or _ieeg.fif"
            ),
        }
    }
}

impl Warning {
    /// Log the warning and record it in `sink`.
    pub(crate) fn emit(self, sink: &mut Vec<Warning>) {
        log::warn!("{self}");
        sink.push(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_exists_message() {
        let e = FifError::FileExists(PathBuf::from("/tmp/x_raw.fif"));
        let msg = e.to_string();
        assert!(msg.starts_with("Destination file exists"));
        assert!(msg.contains("x_raw.fif"));
    }

    #[test]
    fn downcast_through_anyhow() {
        let err: anyhow::Error = FifError::Index("out of range".into()).into();
        let err = err.context("reading slice");
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Index(_))));
    }

    #[test]
    fn warning_texts() {
        let w = Warning::EventsUnreliable { channel: "STI 014".into(), before: 2, after: 1 };
        assert!(w.to_string().contains("become unreliable"));
        let w = Warning::SkipNotAligned { start: 0, buffer_size: 10 };
        assert!(w.to_string().contains("did not fit evenly"));
        let w = Warning::DirectoryRecovered { path: "a.fif".into() };
        assert!(w.to_string().contains("tag directory"));
        assert!(w.to_string().contains("corrupt"));
        let mut sink = Vec::new();
        Warning::MaxShield.emit(&mut sink);
        assert_eq!(sink, vec![Warning::MaxShield]);
        assert!(sink[0].to_string().contains("Internal Active Shielding"));
    }
}
