//! FFT-based rational resampler (`method='fft'` with a boxcar window).
//!
//! Algorithm:
//!   1. Pad with reflect-limited samples on each side (next power of two).
//!   2. FFT of the padded signal  →  half-spectrum.
//!   3. If downsampling: double the Nyquist bin (use_len = new_len).
//!      If upsampling:   halve  the Nyquist bin (use_len = old_len).
//!   4. Scale all bins by `new_len_padded / old_len_padded`.
//!   5. Inverse FFT of length `new_len_padded`, truncating or zero-padding
//!      the spectrum.
//!   6. Strip the resampled padding edges.
//!
//! The output of an `n`-sample signal always has `round(n * ratio)` samples.
use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::FifError;
use crate::filter::apply::reflect_limited_pad;

/// Rate conversion of one continuous signal.
///
/// `ratio` is `new_sfreq / old_sfreq`; implementations must return
/// `round(x.len() * ratio)` samples.
pub trait Resampler {
    fn resample(&self, x: ArrayView1<'_, f64>, ratio: f64) -> Result<Array1<f64>>;
}

/// The FFT resampler described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FftResampler;

impl Resampler for FftResampler {
    fn resample(&self, x: ArrayView1<'_, f64>, ratio: f64) -> Result<Array1<f64>> {
        if !(ratio > 0.0 && ratio.is_finite()) {
            bail!(FifError::InvalidArgument(format!("resampling ratio must be positive, got {ratio}")));
        }
        if (ratio - 1.0).abs() < 1e-12 {
            return Ok(x.to_owned());
        }
        let (npad_l, npad_r) = auto_npad(x.len());
        Ok(Array1::from(resample_1d(x, ratio, npad_l, npad_r)))
    }
}

/// Padding that brings `n` to the next power of two:
///
/// ```text
/// min_add = min(n // 8, 100) * 2
/// total   = 2^ceil(log2(n + min_add)) - n
/// npads   = [total // 2, total - total // 2]
/// ```
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let next_pow2 = (n + min_add).max(1).next_power_of_two();
    let total = next_pow2 - n;
    (total / 2, total - total / 2)
}

/// Resample one signal with explicit (possibly asymmetric) padding.
pub fn resample_1d(x: ArrayView1<'_, f64>, ratio: f64, npad_l: usize, npad_r: usize) -> Vec<f64> {
    let n_in = x.len();
    let final_len = (ratio * n_in as f64).round() as usize;
    if n_in == 0 || final_len == 0 {
        return vec![0.0; final_len];
    }

    let x_ext = reflect_limited_pad(x, npad_l, npad_r);
    let old_len = x_ext.len();

    let new_len_padded = ((ratio * old_len as f64).round() as usize).max(1);
    let shorter = new_len_padded < old_len;
    let use_len = if shorter { new_len_padded } else { old_len };

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let mut buf: Vec<Complex<f64>> = x_ext.iter().map(|&v| Complex { re: v, im: 0.0 }).collect();
    planner.plan_fft_forward(old_len).process(&mut buf);
    let mut x_fft: Vec<Complex<f64>> = buf[..old_len / 2 + 1].to_vec();

    if use_len % 2 == 0 {
        let nyq = use_len / 2;
        if nyq < x_fft.len() {
            x_fft[nyq] *= if shorter { 2.0 } else { 0.5 };
        }
    }

    let scale = new_len_padded as f64 / old_len as f64;
    for v in &mut x_fft {
        *v *= scale;
    }

    // Hermitian spectrum of length new_len_padded.
    let new_rfft_len = new_len_padded / 2 + 1;
    let mut spec = vec![Complex::<f64>::default(); new_len_padded];
    let n_copy = x_fft.len().min(new_rfft_len);
    spec[..n_copy].copy_from_slice(&x_fft[..n_copy]);
    if new_len_padded % 2 == 0 {
        // the Nyquist bin of a real signal is real
        let nyq = new_len_padded / 2;
        spec[nyq].im = 0.0;
    }
    for i in 1..new_rfft_len {
        let idx = new_len_padded - i;
        if idx >= new_rfft_len {
            spec[idx] = spec[i].conj();
        }
    }

    planner.plan_fft_inverse(new_len_padded).process(&mut spec);
    let inv_scale = 1.0 / new_len_padded as f64;

    let to_remove_l = ((ratio * npad_l as f64).round() as usize).min(new_len_padded);
    let mut result: Vec<f64> = spec[to_remove_l..]
        .iter()
        .take(final_len)
        .map(|c| c.re * inv_scale)
        .collect();
    result.resize(final_len, 0.0);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_passthrough() {
        let x = Array1::from_iter((0..512).map(|t| t as f64 / 512.0));
        let out = FftResampler.resample(x.view(), 1.0).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn half_rate_length() {
        let x = Array1::zeros(1024);
        assert_eq!(FftResampler.resample(x.view(), 0.5).unwrap().len(), 512);
        let odd = Array1::zeros(7);
        assert_eq!(FftResampler.resample(odd.view(), 0.5).unwrap().len(), 4);
    }

    #[test]
    fn preserves_dc() {
        let x = Array1::from_elem(1024, 3.14);
        for &v in FftResampler.resample(x.view(), 0.5).unwrap().iter() {
            approx::assert_abs_diff_eq!(v, 3.14, epsilon = 1e-6);
        }
        for &v in FftResampler.resample(x.view(), 2.0).unwrap().iter() {
            approx::assert_abs_diff_eq!(v, 3.14, epsilon = 1e-6);
        }
    }

    #[test]
    fn auto_npad_correct() {
        assert_eq!(auto_npad(15360), (512, 512));
        assert_eq!(auto_npad(30720), (1024, 1024));
    }

    #[test]
    fn rejects_bad_ratio() {
        let x = Array1::zeros(8);
        assert!(FftResampler.resample(x.view(), 0.0).is_err());
    }
}
