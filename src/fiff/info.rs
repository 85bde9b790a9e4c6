//! Measurement info read from and written to `FIFFB_MEAS_INFO`.
//!
//! Only the fields the raw reader/writer needs are modelled: channel
//! descriptors (name, kind, calibration), sampling rate, filter settings,
//! bad channels, the device-to-head transform and SSP projectors.
use std::io::{Read, Seek};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};

use super::constants::*;
use super::proj::{read_projectors, write_projectors, Projector};
use super::tag::*;
use super::tree::Node;
use super::write::TagWrite;
use crate::error::FifError;

// ── File id ──────────────────────────────────────────────────────────────

/// `FIFFT_ID_STRUCT`: version, machine id, creation time (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileId {
    pub version: i32,
    pub machid:  [i32; 2],
    pub secs:    i32,
    pub usecs:   i32,
}

impl FileId {
    /// Id stamped with the current time.
    pub fn now() -> Self {
        let t = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            version: (1 << 16) | 3,
            machid:  [0, 0],
            secs:    t.as_secs() as i32,
            usecs:   t.subsec_micros() as i32,
        }
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut b = [0u8; 20];
        for (i, v) in [self.version, self.machid[0], self.machid[1], self.secs, self.usecs]
            .iter()
            .enumerate()
        {
            b[i * 4..i * 4 + 4].copy_from_slice(&v.to_be_bytes());
        }
        b
    }
}

// ── Channel info ─────────────────────────────────────────────────────────

/// Channel info, parsed from a `FIFFT_CH_INFO_STRUCT` (30) tag.
///
/// On-disk layout (big-endian, 96 bytes total):
/// ```text
///  4  scanno       i32
///  4  logno        i32
///  4  kind         i32
///  4  range        f32
///  4  cal          f32
///  4  coil_type    i32
/// 48  loc          12 × f32
///  4  unit         i32
///  4  unit_mul     i32
/// 16  ch_name      16 × u8 (null-padded Latin-1)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub scan_no:   i32,
    pub log_no:    i32,
    pub kind:      i32,
    pub range:     f32,
    pub cal:       f32,
    pub coil_type: i32,
    /// Position + orientation: `[x, y, z, nx0, ny0, nz0, …]` in metres.
    pub loc:       [f32; 12],
    pub unit:      i32,
    pub unit_mul:  i32,
    pub name:      String,
}

/// Size of the channel info struct.
pub const CH_INFO_SIZE: usize = 96;

impl ChannelInfo {
    /// Channel with unit calibration.  Stim channels get no physical unit,
    /// everything else is in volts.
    pub fn new(name: &str, kind: i32) -> Self {
        Self {
            scan_no: 0,
            log_no: 0,
            kind,
            range: 1.0,
            cal: 1.0,
            coil_type: if kind == FIFFV_EEG_CH { 1 } else { 0 },
            loc: [0.0; 12],
            unit: if kind == FIFFV_STIM_CH { -1 } else { 107 },
            unit_mul: 0,
            name: name.to_string(),
        }
    }

    /// Calibration factor applied to raw integer/float samples: `cal × range`.
    #[inline]
    pub fn calibration(&self) -> f64 {
        (self.cal as f64) * (self.range as f64)
    }

    #[inline]
    pub fn is_stim(&self) -> bool {
        self.kind == FIFFV_STIM_CH
    }

    /// Parse from the 96-byte payload of a FIFFT_CH_INFO_STRUCT tag.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < CH_INFO_SIZE {
            bail!(FifError::Decode(format!(
                "ch_info payload too short: {} bytes (need {CH_INFO_SIZE})", raw.len()
            )));
        }
        let mut loc = [0f32; 12];
        for (i, v) in loc.iter_mut().enumerate() {
            *v = be_f32(&raw[24 + i * 4..]);
        }
        // Channel name: null-terminated Latin-1, 16 bytes
        let name_bytes = &raw[80..96];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        Ok(ChannelInfo {
            scan_no:   be_i32(&raw[0..4]),
            log_no:    be_i32(&raw[4..8]),
            kind:      be_i32(&raw[8..12]),
            range:     be_f32(&raw[12..16]),
            cal:       be_f32(&raw[16..20]),
            coil_type: be_i32(&raw[20..24]),
            loc,
            unit:      be_i32(&raw[72..76]),
            unit_mul:  be_i32(&raw[76..80]),
            name:      name_bytes[..end].iter().map(|&b| b as char).collect(),
        })
    }

    /// Encode as a 96-byte struct.  Names are cut to 15 bytes so the field
    /// stays null-terminated.
    pub fn to_bytes(&self) -> [u8; CH_INFO_SIZE] {
        let mut b = [0u8; CH_INFO_SIZE];
        b[0..4].copy_from_slice(&self.scan_no.to_be_bytes());
        b[4..8].copy_from_slice(&self.log_no.to_be_bytes());
        b[8..12].copy_from_slice(&self.kind.to_be_bytes());
        b[12..16].copy_from_slice(&self.range.to_be_bytes());
        b[16..20].copy_from_slice(&self.cal.to_be_bytes());
        b[20..24].copy_from_slice(&self.coil_type.to_be_bytes());
        for (i, v) in self.loc.iter().enumerate() {
            b[24 + i * 4..28 + i * 4].copy_from_slice(&v.to_be_bytes());
        }
        b[72..76].copy_from_slice(&self.unit.to_be_bytes());
        b[76..80].copy_from_slice(&self.unit_mul.to_be_bytes());
        let name = super::write::encode_latin1(&self.name);
        let n = name.len().min(15);
        b[80..80 + n].copy_from_slice(&name[..n]);
        b
    }
}

// ── Coordinate transform ─────────────────────────────────────────────────

/// Rigid transform between two coordinate frames (`FIFFT_COORD_TRANS_STRUCT`).
///
/// On disk: `from`, `to`, rotation (9 × f32, row-major), translation
/// (3 × f32), then the inverse rotation and translation (104 bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordTrans {
    pub from:  i32,
    pub to:    i32,
    pub rot:   [[f32; 3]; 3],
    pub trans: [f32; 3],
}

impl CoordTrans {
    /// Identity device-to-head transform.
    pub fn identity_dev_head() -> Self {
        Self {
            from: FIFFV_COORD_DEVICE,
            to: FIFFV_COORD_HEAD,
            rot: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            trans: [0.0; 3],
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 104 {
            bail!(FifError::Decode(format!(
                "coord_trans payload too short: {} bytes (need 104)", raw.len()
            )));
        }
        let mut rot = [[0f32; 3]; 3];
        for (r, row) in rot.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = be_f32(&raw[8 + (r * 3 + c) * 4..]);
            }
        }
        let mut trans = [0f32; 3];
        for (i, v) in trans.iter_mut().enumerate() {
            *v = be_f32(&raw[44 + i * 4..]);
        }
        Ok(Self { from: be_i32(&raw[0..4]), to: be_i32(&raw[4..8]), rot, trans })
    }

    /// Encode; the inverse assumes an orthonormal rotation.
    pub fn to_bytes(&self) -> [u8; 104] {
        let mut vals = Vec::with_capacity(24);
        vals.extend(self.rot.iter().flatten().copied());
        vals.extend(self.trans);
        for r in 0..3 {
            for c in 0..3 {
                vals.push(self.rot[c][r]);
            }
        }
        for r in 0..3 {
            vals.push(-(0..3).map(|c| self.rot[c][r] * self.trans[c]).sum::<f32>());
        }
        let mut b = [0u8; 104];
        b[0..4].copy_from_slice(&self.from.to_be_bytes());
        b[4..8].copy_from_slice(&self.to.to_be_bytes());
        for (i, v) in vals.iter().enumerate() {
            b[8 + i * 4..12 + i * 4].copy_from_slice(&v.to_be_bytes());
        }
        b
    }

    /// Element-wise comparison with an absolute tolerance.
    pub fn approx_eq(&self, other: &CoordTrans, tol: f32) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.rot.iter().flatten().zip(other.rot.iter().flatten()).all(|(a, b)| (a - b).abs() <= tol)
            && self.trans.iter().zip(other.trans.iter()).all(|(a, b)| (a - b).abs() <= tol)
    }
}

// ── Measurement info ─────────────────────────────────────────────────────

/// Measurement metadata extracted from `FIFFB_MEAS_INFO`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasInfo {
    pub n_chan:       usize,
    pub sfreq:        f64,
    pub lowpass:      Option<f64>,
    pub highpass:     Option<f64>,
    pub line_freq:    Option<f64>,
    pub chs:          Vec<ChannelInfo>,
    pub bads:         Vec<String>,
    pub experimenter: Option<String>,
    pub description:  Option<String>,
    /// `[seconds, microseconds]` since the Unix epoch.
    pub meas_date:    Option<[i32; 2]>,
    pub dev_head_t:   Option<CoordTrans>,
    pub projs:        Vec<Projector>,
}

impl MeasInfo {
    /// Info for freshly created data: lowpass at Nyquist, no highpass.
    pub fn new(chs: Vec<ChannelInfo>, sfreq: f64) -> Self {
        let chs: Vec<ChannelInfo> = chs
            .into_iter()
            .enumerate()
            .map(|(i, ch)| ChannelInfo { scan_no: i as i32 + 1, log_no: i as i32 + 1, ..ch })
            .collect();
        Self {
            n_chan: chs.len(),
            sfreq,
            lowpass: Some(sfreq / 2.0),
            highpass: Some(0.0),
            line_freq: None,
            chs,
            bads: Vec::new(),
            experimenter: None,
            description: None,
            meas_date: None,
            dev_head_t: None,
            projs: Vec::new(),
        }
    }

    /// Shorthand for channels of one kind.
    pub fn from_names(names: &[&str], kind: i32, sfreq: f64) -> Self {
        Self::new(names.iter().map(|n| ChannelInfo::new(n, kind)).collect(), sfreq)
    }

    /// Calibration array `[n_chan]`: `cal[i] = chs[i].cal * chs[i].range`.
    pub fn cals(&self) -> Vec<f64> {
        self.chs.iter().map(|c| c.calibration()).collect()
    }

    /// Channel names in order.
    pub fn ch_names(&self) -> Vec<&str> {
        self.chs.iter().map(|c| c.name.as_str()).collect()
    }

    /// Indices of stim channels.
    pub fn stim_picks(&self) -> Vec<usize> {
        self.chs.iter().enumerate().filter(|(_, c)| c.is_stim()).map(|(i, _)| i).collect()
    }

    /// Info restricted to `picks` (in that order).  Bad channels that are
    /// not kept are dropped and projectors touching none of the kept
    /// channels are removed.
    pub fn pick(&self, picks: &[usize]) -> MeasInfo {
        let chs: Vec<ChannelInfo> = picks.iter().map(|&i| self.chs[i].clone()).collect();
        let bads = self
            .bads
            .iter()
            .filter(|b| chs.iter().any(|c| &c.name == *b))
            .cloned()
            .collect();
        let projs = self
            .projs
            .iter()
            .filter(|p| p.ch_names.iter().any(|n| chs.iter().any(|c| &c.name == n)))
            .cloned()
            .collect();
        MeasInfo { n_chan: chs.len(), chs, bads, projs, ..self.clone() }
    }
}

/// Read `MeasInfo` from an open FIF file given the tree.
pub fn read_meas_info<R: Read + Seek>(reader: &mut R, tree: &Node) -> Result<MeasInfo> {
    let missing = |what: &str| FifError::Decode(format!("{what} not found"));
    let meas_node = tree.find_block(FIFFB_MEAS).ok_or_else(|| missing("FIFFB_MEAS block"))?;
    let info_node = meas_node
        .find_block(FIFFB_MEAS_INFO)
        .ok_or_else(|| missing("FIFFB_MEAS_INFO block"))?;

    let mut n_chan     = None::<usize>;
    let mut sfreq      = None::<f64>;
    let mut lowpass    = None::<f64>;
    let mut highpass   = None::<f64>;
    let mut line_freq  = None::<f64>;
    let mut chs        = Vec::<ChannelInfo>::new();
    let mut bads       = Vec::<String>::new();
    let mut experimenter = None::<String>;
    let mut description  = None::<String>;
    let mut meas_date    = None::<[i32; 2]>;
    let mut dev_head_t   = None::<CoordTrans>;

    let finite = |v: f32| v.is_finite().then_some(v as f64);

    for ent in &info_node.entries {
        match ent.kind {
            FIFF_NCHAN => n_chan = Some(read_i32(reader, ent)?.max(0) as usize),
            FIFF_SFREQ => sfreq = Some(read_f32(reader, ent)? as f64),
            FIFF_LOWPASS => lowpass = finite(read_f32(reader, ent)?),
            FIFF_HIGHPASS => highpass = finite(read_f32(reader, ent)?),
            FIFF_LINE_FREQ => line_freq = finite(read_f32(reader, ent)?),
            FIFF_CH_INFO => chs.push(ChannelInfo::from_bytes(&read_payload(reader, ent)?)?),
            FIFF_BAD_CHS => {
                // List of bad channel names separated by colons.
                bads = read_string(reader, ent)?
                    .split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            FIFF_EXPERIMENTER => experimenter = Some(read_string(reader, ent)?),
            FIFF_DESCRIPTION => description = Some(read_string(reader, ent)?),
            FIFF_MEAS_DATE => {
                let v = read_i32_array(reader, ent)?;
                if v.len() >= 2 {
                    meas_date = Some([v[0], v[1]]);
                }
            }
            FIFF_COORD_TRANS => {
                let t = CoordTrans::from_bytes(&read_payload(reader, ent)?)?;
                if t.from == FIFFV_COORD_DEVICE && t.to == FIFFV_COORD_HEAD {
                    dev_head_t = Some(t);
                }
            }
            _ => {}
        }
    }

    let n_chan = n_chan.ok_or_else(|| missing("FIFF_NCHAN"))?;
    let sfreq = sfreq.ok_or_else(|| missing("FIFF_SFREQ"))?;
    if chs.len() != n_chan {
        bail!(FifError::Decode(format!("expected {n_chan} ch_info structs, got {}", chs.len())));
    }
    if !(sfreq > 0.0) {
        bail!(FifError::Decode(format!("invalid sampling frequency {sfreq}")));
    }
    let projs = match info_node.find_block(FIFFB_PROJ) {
        Some(node) => read_projectors(reader, node)?,
        None => Vec::new(),
    };

    Ok(MeasInfo {
        n_chan, sfreq, lowpass, highpass, line_freq, chs, bads,
        experimenter, description, meas_date, dev_head_t, projs,
    })
}

/// Write a complete `FIFFB_MEAS_INFO` block.
pub fn write_meas_info(w: &mut dyn TagWrite, info: &MeasInfo) -> Result<()> {
    w.start_block(FIFFB_MEAS_INFO)?;
    w.write_int(FIFF_NCHAN, &[info.n_chan as i32])?;
    w.write_float(FIFF_SFREQ, &[info.sfreq as f32])?;
    if let Some(v) = info.lowpass {
        w.write_float(FIFF_LOWPASS, &[v as f32])?;
    }
    if let Some(v) = info.highpass {
        w.write_float(FIFF_HIGHPASS, &[v as f32])?;
    }
    if let Some(v) = info.line_freq {
        w.write_float(FIFF_LINE_FREQ, &[v as f32])?;
    }
    if let Some(d) = info.meas_date {
        w.write_int(FIFF_MEAS_DATE, &d)?;
    }
    if let Some(s) = &info.experimenter {
        w.write_string(FIFF_EXPERIMENTER, s)?;
    }
    if let Some(s) = &info.description {
        w.write_string(FIFF_DESCRIPTION, s)?;
    }
    if let Some(t) = &info.dev_head_t {
        w.write_coord_trans(t)?;
    }
    for ch in &info.chs {
        w.write_ch_info(ch)?;
    }
    if !info.bads.is_empty() {
        w.write_string(FIFF_BAD_CHS, &info.bads.join(":"))?;
    }
    write_projectors(w, &info.projs)?;
    w.end_block(FIFFB_MEAS_INFO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiff::tree::{load_directory, read_tree};
    use crate::fiff::write::FifWriter;
    use std::io::Cursor;

    #[test]
    fn ch_info_from_bytes_basic() {
        // Construct a minimal 96-byte payload.
        let mut raw = vec![0u8; 96];
        // kind = 2 (FIFFV_EEG_CH)
        raw[8..12].copy_from_slice(&2_i32.to_be_bytes());
        // range = 1.0
        raw[12..16].copy_from_slice(&1_f32.to_be_bytes());
        // cal = 2.0
        raw[16..20].copy_from_slice(&2_f32.to_be_bytes());
        // loc[0] = 0.5
        raw[24..28].copy_from_slice(&0.5_f32.to_be_bytes());
        // name = "Fp1\0..."
        raw[80..84].copy_from_slice(b"Fp1\0");

        let ch = ChannelInfo::from_bytes(&raw).unwrap();
        assert_eq!(ch.kind, 2);
        approx::assert_abs_diff_eq!(ch.range, 1.0_f32, epsilon = 1e-7);
        approx::assert_abs_diff_eq!(ch.cal, 2.0_f32, epsilon = 1e-7);
        approx::assert_abs_diff_eq!(ch.loc[0], 0.5_f32, epsilon = 1e-7);
        approx::assert_abs_diff_eq!(ch.calibration() as f32, 2.0, epsilon = 1e-6);
        assert_eq!(ch.name, "Fp1");
        assert_eq!(ChannelInfo::from_bytes(&ch.to_bytes()).unwrap(), ch);
    }

    #[test]
    fn ch_info_too_short() {
        assert!(ChannelInfo::from_bytes(&[0u8; 95]).is_err());
    }

    #[test]
    fn coord_trans_encoding_keeps_forward_part() {
        let mut t = CoordTrans::identity_dev_head();
        t.trans = [0.01, -0.02, 0.04];
        let back = CoordTrans::from_bytes(&t.to_bytes()).unwrap();
        assert_eq!(back, t);
        assert!(back.approx_eq(&t, 0.0));
        let mut moved = t;
        moved.trans[2] += 0.01;
        assert!(!moved.approx_eq(&t, 1e-6));
    }

    #[test]
    fn meas_info_block_round_trip() {
        let mut info = MeasInfo::from_names(&["EEG 001", "EEG 002", "STI 014"], FIFFV_EEG_CH, 250.0);
        info.chs[2].kind = FIFFV_STIM_CH;
        info.bads = vec!["EEG 002".into()];
        info.meas_date = Some([1_600_000_000, 12]);
        info.dev_head_t = Some(CoordTrans::identity_dev_head());
        info.line_freq = Some(50.0);

        let mut w = FifWriter::new(Cursor::new(Vec::new()));
        w.write_id(FIFF_FILE_ID, &FileId::now()).unwrap();
        w.write_int(FIFF_DIR_POINTER, &[-1]).unwrap();
        w.start_block(FIFFB_MEAS).unwrap();
        write_meas_info(&mut w, &info).unwrap();
        w.end_block(FIFFB_MEAS).unwrap();
        w.finish().unwrap();

        let mut cur = Cursor::new(w.into_inner().into_inner());
        let dir = load_directory(&mut cur).unwrap();
        let tree = read_tree(&mut cur, &dir.entries).unwrap();
        let back = read_meas_info(&mut cur, &tree).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.stim_picks(), vec![2]);
    }

    #[test]
    fn pick_prunes_bads() {
        let mut info = MeasInfo::from_names(&["A", "B", "C"], FIFFV_EEG_CH, 100.0);
        info.bads = vec!["B".into()];
        let sub = info.pick(&[2, 0]);
        assert_eq!(sub.ch_names(), vec!["C", "A"]);
        assert!(sub.bads.is_empty());
        assert_eq!(sub.n_chan, 2);
    }
}
