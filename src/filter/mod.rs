//! FIR filter design and application.
//!
//! - [`design`]: Hamming-windowed sinc FIR design, matching
//!   `scipy.signal.firwin` with zero-phase alignment.
//! - [`apply`]: Overlap-add zero-phase convolution.
//!
//! [`SampleTransform`] is the seam through which a recording hands its
//! samples to signal processing; [`FirFilter`] is the bundled implementation.

pub mod apply;
pub mod design;

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};

use crate::error::FifError;

pub use apply::filter_1d;
pub use design::{auto_filter_length, auto_trans_bandwidth, design_highpass, design_lowpass, firwin, hamming};

/// A per-channel transform over one contiguous stretch of samples.
///
/// Implementations must return exactly `x.len()` samples.
pub trait SampleTransform {
    fn apply(&self, x: ArrayView1<'_, f64>, sfreq: f64) -> Result<Array1<f64>>;
}

/// Zero-phase FIR filter.
///
/// `l_freq` alone is a highpass, `h_freq` alone a lowpass, both a bandpass
/// (highpass then lowpass).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FirFilter {
    pub l_freq: Option<f64>,
    pub h_freq: Option<f64>,
}

impl FirFilter {
    pub fn highpass(l_freq: f64) -> Self {
        Self { l_freq: Some(l_freq), h_freq: None }
    }

    pub fn lowpass(h_freq: f64) -> Self {
        Self { l_freq: None, h_freq: Some(h_freq) }
    }

    pub fn bandpass(l_freq: f64, h_freq: f64) -> Self {
        Self { l_freq: Some(l_freq), h_freq: Some(h_freq) }
    }
}

impl SampleTransform for FirFilter {
    fn apply(&self, x: ArrayView1<'_, f64>, sfreq: f64) -> Result<Array1<f64>> {
        let nyquist = sfreq / 2.0;
        for f in [self.l_freq, self.h_freq].into_iter().flatten() {
            if !(f > 0.0 && f < nyquist) {
                bail!(FifError::InvalidArgument(format!(
                    "filter frequency {f} Hz must lie between 0 and Nyquist ({nyquist} Hz)"
                )));
            }
        }
        if let (Some(l), Some(h)) = (self.l_freq, self.h_freq) {
            if l >= h {
                bail!(FifError::InvalidArgument(format!("l_freq ({l}) must be less than h_freq ({h})")));
            }
        }
        let mut y = x.to_owned();
        if let Some(l) = self.l_freq {
            y = filter_1d(y.view(), &design_highpass(l, sfreq))?;
        }
        if let Some(h) = self.h_freq {
            y = filter_1d(y.view(), &design_lowpass(h, sfreq))?;
        }
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_keeps_slow_sine() {
        let sfreq = 250.0;
        let x = Array1::from_iter((0..2500).map(|i| (2.0 * std::f64::consts::PI * 2.0 * i as f64 / sfreq).sin()));
        let y = FirFilter::lowpass(40.0).apply(x.view(), sfreq).unwrap();
        for i in 500..2000 {
            approx::assert_abs_diff_eq!(y[i], x[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn rejects_frequency_above_nyquist() {
        let x = Array1::zeros(100);
        assert!(FirFilter::lowpass(200.0).apply(x.view(), 250.0).is_err());
        assert!(FirFilter::bandpass(30.0, 10.0).apply(x.view(), 250.0).is_err());
    }
}
