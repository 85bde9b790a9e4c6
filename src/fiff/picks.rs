//! Channel and sample selectors.
use anyhow::{bail, Result};

use super::info::MeasInfo;
use crate::error::FifError;

/// Which channels an operation addresses.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChannelSelector {
    #[default]
    All,
    /// One index; negative values count from the end.
    Index(i64),
    Name(String),
    Indices(Vec<i64>),
    Names(Vec<String>),
    /// One flag per channel.
    Mask(Vec<bool>),
    /// Half-open index range.
    Slice { start: usize, stop: usize },
    /// The channels marked bad.
    Bads,
}

impl From<&str> for ChannelSelector {
    fn from(name: &str) -> Self {
        ChannelSelector::Name(name.to_string())
    }
}

impl From<&[&str]> for ChannelSelector {
    fn from(names: &[&str]) -> Self {
        ChannelSelector::Names(names.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<usize>> for ChannelSelector {
    fn from(idx: Vec<usize>) -> Self {
        ChannelSelector::Indices(idx.into_iter().map(|i| i as i64).collect())
    }
}

fn resolve_index(i: i64, n: usize) -> Result<usize> {
    let j = if i < 0 { i + n as i64 } else { i };
    if j < 0 || j >= n as i64 {
        bail!(FifError::InvalidArgument(format!("channel index {i} is out of range for {n} channels")));
    }
    Ok(j as usize)
}

fn resolve_name(info: &MeasInfo, name: &str) -> Result<usize> {
    info.chs
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| FifError::InvalidArgument(format!("channel {name:?} not found")).into())
}

impl ChannelSelector {
    /// Channel indices in selection order.  An empty selection is an error.
    pub fn resolve(&self, info: &MeasInfo) -> Result<Vec<usize>> {
        let n = info.n_chan;
        let picks = match self {
            ChannelSelector::All => (0..n).collect(),
            ChannelSelector::Index(i) => vec![resolve_index(*i, n)?],
            ChannelSelector::Name(name) => vec![resolve_name(info, name)?],
            ChannelSelector::Indices(idx) => {
                idx.iter().map(|&i| resolve_index(i, n)).collect::<Result<Vec<_>>>()?
            }
            ChannelSelector::Names(names) => {
                names.iter().map(|s| resolve_name(info, s)).collect::<Result<Vec<_>>>()?
            }
            ChannelSelector::Mask(mask) => {
                if mask.len() != n {
                    bail!(FifError::InvalidArgument(format!(
                        "channel mask has {} entries for {n} channels",
                        mask.len()
                    )));
                }
                mask.iter().enumerate().filter(|(_, m)| **m).map(|(i, _)| i).collect()
            }
            ChannelSelector::Slice { start, stop } => (*start..(*stop).min(n)).collect(),
            ChannelSelector::Bads => info
                .chs
                .iter()
                .enumerate()
                .filter(|(_, c)| info.bads.contains(&c.name))
                .map(|(i, _)| i)
                .collect(),
        };
        if picks.is_empty() {
            bail!(FifError::InvalidArgument("No appropriate channels found for the given picks".into()));
        }
        Ok(picks)
    }
}

/// Which samples an operation addresses, relative to the first sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SampleSelector {
    #[default]
    All,
    /// One sample; negative values count from the end.
    Index(i64),
    /// Half-open range with Python-style negative bounds.
    Range { start: Option<i64>, stop: Option<i64> },
}

impl SampleSelector {
    /// Resolve to `start..stop` within `n_times`.
    ///
    /// A single index out of range is an [`FifError::Index`]; ranges are
    /// clamped like slices and may come out empty.
    pub fn resolve(&self, n_times: usize) -> Result<(usize, usize)> {
        let n = n_times as i64;
        let clamp = |v: i64| -> usize {
            let v = if v < 0 { v + n } else { v };
            v.clamp(0, n) as usize
        };
        match *self {
            SampleSelector::All => Ok((0, n_times)),
            SampleSelector::Index(i) => {
                let j = if i < 0 { i + n } else { i };
                if j < 0 || j >= n {
                    bail!(FifError::Index(format!("sample index {i} is out of range for {n_times} samples")));
                }
                Ok((j as usize, j as usize + 1))
            }
            SampleSelector::Range { start, stop } => {
                let start = start.map_or(0, clamp);
                let stop = stop.map_or(n_times, clamp);
                Ok((start, stop.max(start)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiff::constants::FIFFV_EEG_CH;

    fn info() -> MeasInfo {
        let mut info = MeasInfo::from_names(&["a", "b", "c", "d"], FIFFV_EEG_CH, 100.0);
        info.bads = vec!["c".into()];
        info
    }

    #[test]
    fn selectors_resolve() {
        let info = info();
        assert_eq!(ChannelSelector::All.resolve(&info).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(ChannelSelector::Index(-1).resolve(&info).unwrap(), vec![3]);
        assert_eq!(ChannelSelector::from(&["d", "a"][..]).resolve(&info).unwrap(), vec![3, 0]);
        assert_eq!(
            ChannelSelector::Mask(vec![true, false, false, true]).resolve(&info).unwrap(),
            vec![0, 3]
        );
        assert_eq!(ChannelSelector::Slice { start: 1, stop: 9 }.resolve(&info).unwrap(), vec![1, 2, 3]);
        assert_eq!(ChannelSelector::Bads.resolve(&info).unwrap(), vec![2]);
    }

    #[test]
    fn selector_errors() {
        let info = info();
        let err = ChannelSelector::Index(4).resolve(&info).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::InvalidArgument(_))));
        let err = ChannelSelector::from("zz").resolve(&info).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::InvalidArgument(_))));
        let err = ChannelSelector::Slice { start: 4, stop: 6 }.resolve(&info).unwrap_err();
        assert!(err.to_string().contains("No appropriate channels found"));
    }

    #[test]
    fn sample_ranges() {
        assert_eq!(SampleSelector::All.resolve(10).unwrap(), (0, 10));
        assert_eq!(SampleSelector::Index(-2).resolve(10).unwrap(), (8, 9));
        assert!(SampleSelector::Index(10).resolve(10).is_err());
        let r = SampleSelector::Range { start: Some(-3), stop: None };
        assert_eq!(r.resolve(10).unwrap(), (7, 10));
        let r = SampleSelector::Range { start: Some(5), stop: Some(2) };
        assert_eq!(r.resolve(10).unwrap(), (5, 5));
    }
}
