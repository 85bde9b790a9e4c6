//! Concatenation and resampling across recordings and files.
mod common;

use common::*;
use fiffraw::fiff::constants::*;
use fiffraw::{
    concatenate, concatenate_with_events, find_events, open_raw, ChannelInfo, Event, MeasInfo, OnMismatch,
    RawFif, SaveOptions,
};
use ndarray::{array, Array2};

/// One EEG channel carrying a slow sine and one stim channel with the
/// given pulses `(onset, length, code)`.
fn with_stim(n: usize, sfreq: f64, first: i64, pulses: &[(usize, usize, i32)]) -> RawFif {
    let chs = vec![ChannelInfo::new("EEG 001", FIFFV_EEG_CH), ChannelInfo::new("STI 014", FIFFV_STIM_CH)];
    let info = MeasInfo::new(chs, sfreq);
    let mut data = Array2::<f64>::zeros((2, n));
    for t in 0..n {
        data[[0, t]] = (t as f64 * 0.02).sin();
    }
    for &(onset, len, code) in pulses {
        for t in onset..onset + len {
            data[[1, t]] = code as f64;
        }
    }
    RawFif::from_array(info, data, first).unwrap()
}

fn boundaries(raw: &RawFif) -> Vec<(f64, String)> {
    raw.annotations
        .iter()
        .filter(|a| a.description.ends_with("boundary"))
        .map(|a| (a.onset, a.description.clone()))
        .collect()
}

#[test]
fn stim_codes_survive_decimation() {
    let info = MeasInfo::new(vec![ChannelInfo::new("STI 014", FIFFV_STIM_CH)], 16.0);
    let trace = array![[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]];
    let raw = RawFif::from_array(info, trace, 0).unwrap();
    let (half, _) = raw.resample(8.0, None).unwrap();
    assert_eq!(half.read_all_data().unwrap(), array![[1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]]);
    assert_eq!(half.info.sfreq, 8.0);
    assert_eq!(half.info.lowpass, Some(4.0));
    assert!(half.warnings.is_empty());
}

#[test]
fn resampling_commutes_with_concatenation() {
    let a = with_stim(1000, 100.0, 0, &[(100, 10, 1)]);
    let b = with_stim(600, 100.0, 1000, &[(300, 10, 2)]);

    let joined = concatenate(vec![a.clone(), b.clone()], false, OnMismatch::Raise).unwrap();
    let (after, _) = joined.resample(50.0, None).unwrap();

    let (ra, _) = a.resample(50.0, None).unwrap();
    let (rb, _) = b.resample(50.0, None).unwrap();
    let before = concatenate(vec![ra, rb], false, OnMismatch::Raise).unwrap();

    assert_eq!(after.n_times(), 800);
    assert_eq!(after.first_samps(), before.first_samps());
    assert_eq!(after.last_samps(), before.last_samps());
    assert_eq!(after.first_samps(), vec![0, 500]);
    assert_eq!(after.read_all_data().unwrap(), before.read_all_data().unwrap());
    assert_eq!(boundaries(&after), boundaries(&before));
    assert_eq!(boundaries(&after)[0].0, 10.0);
}

#[test]
fn files_concatenate_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let pa = dir.path().join("a_raw.fif");
    let pb = dir.path().join("b_raw.fif");
    ramp(2, 1500, 500.0, 250).save(&pa, &SaveOptions::default()).unwrap();
    let mut second = ramp(2, 1000, 500.0, 5000);
    second.annotations.push(10.5, 0.2, "BAD_blink");
    second.save(&pb, &SaveOptions::default()).unwrap();

    let joined = concatenate(vec![open_raw(&pa).unwrap(), open_raw(&pb).unwrap()], false, OnMismatch::Raise)
        .unwrap();
    assert!(!joined.is_loaded());
    assert_eq!(joined.filenames().len(), 2);
    assert_eq!(joined.n_times(), 2500);
    assert_eq!(joined.first_samps(), vec![250, 5000]);
    assert_eq!(joined.last_samps(), vec![1749, 5999]);

    let data = joined.read_all_data().unwrap();
    assert_eq!(data[[1, 1499]], value(1, 1499));
    assert_eq!(data[[1, 1500]], value(1, 0));

    // junction at (250 + 1500) / 500 s; the blink moves onto the joined clock
    let b = boundaries(&joined);
    assert_eq!(b, vec![(3.5, "BAD boundary".to_string()), (3.5, "EDGE boundary".to_string())]);
    let blink = joined.annotations.iter().find(|a| a.description == "BAD_blink").unwrap();
    assert!((blink.onset - (3.5 + 0.5)).abs() < 1e-9);

    let loaded = concatenate(vec![open_raw(&pa).unwrap(), open_raw(&pb).unwrap()], true, OnMismatch::Raise)
        .unwrap();
    assert!(loaded.is_loaded());
    assert_eq!(loaded.read_all_data().unwrap(), data);
}

#[test]
fn events_follow_concatenation() {
    let a = with_stim(1000, 100.0, 200, &[(100, 5, 1), (600, 5, 2)]);
    let b = with_stim(500, 100.0, 0, &[(50, 5, 3)]);
    let ev_a = find_events(&a, None).unwrap();
    let ev_b = find_events(&b, Some("STI 014")).unwrap();
    assert_eq!(ev_a, vec![Event::new(300, 0, 1), Event::new(800, 0, 2)]);
    assert_eq!(ev_b, vec![Event::new(50, 0, 3)]);

    let (joined, events) = concatenate_with_events(vec![a, b], &[ev_a, ev_b], false, OnMismatch::Raise).unwrap();
    assert_eq!(events, vec![Event::new(300, 0, 1), Event::new(800, 0, 2), Event::new(1250, 0, 3)]);
    assert_eq!(find_events(&joined, None).unwrap(), events);
}

#[test]
fn events_are_remapped_by_resampling() {
    let raw = with_stim(2000, 1000.0, 300, &[(100, 20, 1), (700, 20, 2), (1500, 20, 3)]);
    let events = find_events(&raw, None).unwrap();
    assert_eq!(events.iter().map(|e| e.sample).collect::<Vec<_>>(), vec![400, 1000, 1800]);

    let (down, moved) = raw.resample(100.0, Some(&events[..])).unwrap();
    let moved = moved.unwrap();
    assert_eq!(down.first_samp(), 30);
    assert_eq!(down.n_times(), 200);
    assert_eq!(moved.iter().map(|e| e.sample).collect::<Vec<_>>(), vec![40, 100, 180]);
    assert_eq!(find_events(&down, None).unwrap(), moved);
}

#[test]
fn mismatched_recordings_are_rejected() {
    let a = ramp(2, 100, 100.0, 0);
    let err = concatenate(vec![a.clone(), ramp(2, 100, 200.0, 0)], false, OnMismatch::Raise).unwrap_err();
    assert!(err.to_string().contains("info['sfreq'] must match"));
    let err = concatenate(vec![a.clone(), ramp(3, 100, 100.0, 0)], false, OnMismatch::Raise).unwrap_err();
    assert!(err.to_string().contains("['nchan'] must match"));
    let err = concatenate(Vec::new(), false, OnMismatch::Raise).unwrap_err();
    assert!(err.to_string().contains("at least one"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kind_raw.fif");
    a.save(&path, &SaveOptions::default()).unwrap();
    let err = concatenate(vec![open_raw(&path).unwrap(), a], false, OnMismatch::Raise).unwrap_err();
    assert!(err.to_string().contains("type must match"));
}
