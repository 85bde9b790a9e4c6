//! Trigger events on stim channels.
//!
//! An event is the onset of a step on a stim channel: a sample whose value
//! differs from the previous one, is non-zero, and either rises from zero or
//! rises above the previous code.  Samples are absolute (`first_samp`
//! included), like annotation onsets.
use anyhow::{bail, Result};
use ndarray::ArrayView1;

use crate::error::FifError;
use crate::fiff::picks::ChannelSelector;
use crate::fiff::raw::RawFif;

/// One trigger: absolute sample, value before the step, value after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub sample: i64,
    pub prev:   i32,
    pub id:     i32,
}

impl Event {
    pub fn new(sample: i64, prev: i32, id: i32) -> Self {
        Self { sample, prev, id }
    }
}

/// Step onsets of one stim trace; `sample` is the index into `x`.
/// The first sample is never an onset.
pub fn find_onsets(x: ArrayView1<'_, f64>) -> Vec<Event> {
    let mut out = Vec::new();
    let mut prev = match x.first() {
        Some(&v) => v.round() as i32,
        None => return out,
    };
    for (i, &v) in x.iter().enumerate().skip(1) {
        let v = v.round() as i32;
        if v != prev && v != 0 && (prev == 0 || v > prev) {
            out.push(Event::new(i as i64, prev, v));
        }
        prev = v;
    }
    out
}

/// Events of `stim_channel`, or of the first stim channel when `None`.
pub fn find_events(raw: &RawFif, stim_channel: Option<&str>) -> Result<Vec<Event>> {
    let pick = match stim_channel {
        Some(name) => ChannelSelector::from(name),
        None => match raw.info.stim_picks().first() {
            Some(&i) => ChannelSelector::Index(i as i64),
            None => bail!(FifError::InvalidArgument("No stim channels found".into())),
        },
    };
    let data = raw.get_data(&pick, 0, None, Default::default())?;
    let first = raw.first_samp();
    let events: Vec<Event> = find_onsets(data.row(0))
        .into_iter()
        .map(|e| Event { sample: e.sample + first, ..e })
        .collect();
    log::debug!("found {} event(s)", events.len());
    Ok(events)
}

/// Put the events of several recordings onto the clock of their
/// concatenation.
///
/// Events of recording `i > 0` are moved by
/// `first_samps[0] + Σ_{j<i} (last_samps[j] - first_samps[j] + 1) - first_samps[i]`.
pub fn concatenate_events(events: &[Vec<Event>], first_samps: &[i64], last_samps: &[i64]) -> Result<Vec<Event>> {
    if events.len() != first_samps.len() || events.len() != last_samps.len() {
        bail!(FifError::InvalidArgument(format!(
            "events ({}), first_samps ({}) and last_samps ({}) must have the same length",
            events.len(),
            first_samps.len(),
            last_samps.len()
        )));
    }
    let mut out = Vec::with_capacity(events.iter().map(Vec::len).sum());
    let mut offset = first_samps.first().copied().unwrap_or(0);
    for (i, evs) in events.iter().enumerate() {
        let shift = offset - first_samps[i];
        out.extend(evs.iter().map(|e| Event { sample: e.sample + shift, ..*e }));
        offset += last_samps[i] - first_samps[i] + 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn onsets_follow_rising_codes() {
        let x = array![1.0, 1.0, 0.0, 2.0, 2.0, 5.0, 3.0, 0.0, 4.0];
        let ev = find_onsets(x.view());
        assert_eq!(ev, vec![Event::new(3, 0, 2), Event::new(5, 2, 5), Event::new(8, 0, 4)]);
    }

    #[test]
    fn first_sample_is_not_an_onset() {
        assert!(find_onsets(array![3.0, 3.0].view()).is_empty());
        assert!(find_onsets(ndarray::Array1::<f64>::zeros(0).view()).is_empty());
    }

    #[test]
    fn concatenated_clock() {
        let a = vec![Event::new(12, 0, 1)];
        let b = vec![Event::new(105, 0, 2)];
        let out = concatenate_events(&[a, b], &[10, 100], &[19, 149]).unwrap();
        // second recording starts at 10 + 10 = 20 on the joined clock
        assert_eq!(out, vec![Event::new(12, 0, 1), Event::new(25, 0, 2)]);
        assert!(concatenate_events(&[vec![]], &[0, 1], &[0, 1]).is_err());
    }
}
