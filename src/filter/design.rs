//! FIR filter design matching `scipy.signal.firwin` with a Hamming window.
//!
//! For a highpass edge at `l_freq` Hz (lowpass edge at `h_freq`):
//!   • transition bandwidth = min(max(0.25 * l_freq, 2.0), l_freq)
//!     (lowpass: min(max(0.25 * h_freq, 2.0), sfreq / 2 - h_freq))
//!   • filter length N      = ceil(3.3 / trans_bw * sfreq), rounded to odd
//!   • windowed-sinc design, cutoff in the middle of the transition band
use std::f64::consts::PI;

/// Transition bandwidth of a highpass edge.
///
/// Rule: `min(max(0.25 * l_freq, 2.0), l_freq)`
pub fn auto_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Transition bandwidth of a lowpass edge; never crosses Nyquist.
pub fn auto_trans_bandwidth_low(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of taps for a given transition bandwidth.  Always odd
/// (zero-phase linear-phase FIR).
///
/// Formula: `ceil(3.3 / trans_bw * sfreq)` rounded up to odd.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n_raw = (3.3 / trans_bw * sfreq).ceil() as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

/// Zero-phase highpass FIR at `l_freq` Hz.
pub fn design_highpass(l_freq: f64, sfreq: f64) -> Vec<f64> {
    let trans_bw = auto_trans_bandwidth(l_freq);
    let n = auto_filter_length(trans_bw, sfreq);
    let cutoff_hz = l_freq - trans_bw / 2.0;
    firwin(n, cutoff_hz, sfreq, false)
}

/// Zero-phase lowpass FIR at `h_freq` Hz.
pub fn design_lowpass(h_freq: f64, sfreq: f64) -> Vec<f64> {
    let trans_bw = auto_trans_bandwidth_low(h_freq, sfreq);
    let n = auto_filter_length(trans_bw, sfreq);
    let cutoff_hz = h_freq + trans_bw / 2.0;
    firwin(n, cutoff_hz, sfreq, true)
}

/// Windowed-sinc FIR with cutoff `cutoff_hz` (the -6 dB point).
///
/// `pass_zero = true` gives a lowpass, otherwise the spectral inversion
/// (highpass).  `n` must be odd.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64, pass_zero: bool) -> Vec<f64> {
    debug_assert!(n % 2 == 1, "firwin requires odd N for a linear-phase filter");
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);

    let win = hamming(n);
    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();

    // unit DC gain
    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);

    if !pass_zero {
        h.iter_mut().for_each(|v| *v = -*v);
        h[n / 2] += 1.0;
    }
    h
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_length_is_odd() {
        for l_freq in [0.5, 1.0, 2.0, 5.0] {
            let n = auto_filter_length(auto_trans_bandwidth(l_freq), 256.0);
            assert!(n % 2 == 1, "N={n} is even for l_freq={l_freq}");
        }
    }

    #[test]
    fn highpass_sum_near_zero() {
        let h = design_highpass(0.5, 256.0);
        let s: f64 = h.iter().sum();
        assert!(s.abs() < 1e-9, "highpass sum = {s}");
    }

    #[test]
    fn highpass_is_symmetric() {
        let h = design_highpass(0.5, 256.0);
        let n = h.len();
        for i in 0..n / 2 {
            approx::assert_abs_diff_eq!(h[i], h[n - 1 - i], epsilon = 1e-12);
        }
    }

    #[test]
    fn highpass_known_length_256hz() {
        assert_eq!(design_highpass(0.5, 256.0).len(), 1691);
    }

    #[test]
    fn lowpass_dc_gain_unity() {
        let h = design_lowpass(40.0, 250.0);
        assert_eq!(h.len() % 2, 1);
        let dc: f64 = h.iter().sum();
        approx::assert_abs_diff_eq!(dc, 1.0, epsilon = 1e-9);
    }
}
