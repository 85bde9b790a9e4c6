//! Signal-space projectors.
//!
//! A projector holds one or more spatial patterns over a named set of
//! channels.  Applying a set of projectors multiplies the data by
//! `P = I − U Uᵀ`, where the columns of `U` are an orthonormal basis of all
//! pattern vectors mapped onto the recording's channel order.
use std::io::{Read, Seek};

use anyhow::Result;
use ndarray::{Array1, Array2};

use super::constants::*;
use super::tag::{read_i32, read_string, read_tag, TagData};
use super::tree::Node;
use super::write::TagWrite;

/// One SSP projector item.
#[derive(Debug, Clone, PartialEq)]
pub struct Projector {
    pub desc:     String,
    pub kind:     i32,
    /// Set once the projector has been applied to the data.
    pub active:   bool,
    pub ch_names: Vec<String>,
    /// `[n_vectors, ch_names.len()]`.
    pub vectors:  Array2<f64>,
}

impl Projector {
    pub fn new(desc: &str, ch_names: &[&str], vectors: Array2<f64>) -> Self {
        Self {
            desc: desc.to_string(),
            kind: 1,
            active: false,
            ch_names: ch_names.iter().map(|s| s.to_string()).collect(),
            vectors,
        }
    }

    /// Same channels and vectors, ignoring description and state.
    pub fn same_content(&self, other: &Projector) -> bool {
        self.ch_names == other.ch_names && self.vectors == other.vectors
    }
}

/// Read all `FIFFB_PROJ_ITEM` blocks below `node`.
pub fn read_projectors<R: Read + Seek>(reader: &mut R, node: &Node) -> Result<Vec<Projector>> {
    let mut out = Vec::new();
    for item in node.find_blocks(FIFFB_PROJ_ITEM) {
        let mut desc = String::new();
        let mut kind = 1;
        let mut active = false;
        let mut ch_names = Vec::new();
        let mut vectors = None;
        for ent in &item.entries {
            match ent.kind {
                FIFF_NAME | FIFF_COMMENT => desc = read_string(reader, ent)?,
                FIFF_PROJ_ITEM_KIND => kind = read_i32(reader, ent)?,
                FIFF_MNE_PROJ_ITEM_ACTIVE => active = read_i32(reader, ent)? != 0,
                FIFF_PROJ_ITEM_CH_NAME_LIST => {
                    ch_names = read_string(reader, ent)?.split(':').map(str::to_string).collect();
                }
                FIFF_PROJ_ITEM_VECTORS => {
                    if let TagData::FloatMatrix(m) = read_tag(reader, ent.pos)?.data {
                        vectors = Some(m.mapv(f64::from));
                    }
                }
                _ => {}
            }
        }
        if let Some(vectors) = vectors {
            if vectors.ncols() == ch_names.len() {
                out.push(Projector { desc, kind, active, ch_names, vectors });
            } else {
                log::warn!("skipping projector {desc:?}: vector width does not match its channel list");
            }
        }
    }
    Ok(out)
}

/// Write a `FIFFB_PROJ` block; nothing is written for an empty list.
pub fn write_projectors(w: &mut dyn TagWrite, projs: &[Projector]) -> Result<()> {
    if projs.is_empty() {
        return Ok(());
    }
    w.start_block(FIFFB_PROJ)?;
    for p in projs {
        w.start_block(FIFFB_PROJ_ITEM)?;
        w.write_string(FIFF_NAME, &p.desc)?;
        w.write_int(FIFF_PROJ_ITEM_KIND, &[p.kind])?;
        w.write_int(FIFF_PROJ_ITEM_NVEC, &[p.vectors.nrows() as i32])?;
        w.write_string(FIFF_PROJ_ITEM_CH_NAME_LIST, &p.ch_names.join(":"))?;
        w.write_float_matrix(FIFF_PROJ_ITEM_VECTORS, &p.vectors.mapv(|v| v as f32))?;
        w.write_int(FIFF_MNE_PROJ_ITEM_ACTIVE, &[p.active as i32])?;
        w.end_block(FIFFB_PROJ_ITEM)?;
    }
    w.end_block(FIFFB_PROJ)
}

/// Build the projection operator for `ch_names`, or `None` when the
/// projectors span nothing on these channels.
pub fn make_projector(projs: &[Projector], ch_names: &[&str]) -> Option<Array2<f64>> {
    let n = ch_names.len();
    let mut basis: Vec<Array1<f64>> = Vec::new();
    for p in projs {
        let cols: Vec<Option<usize>> = p
            .ch_names
            .iter()
            .map(|name| ch_names.iter().position(|c| c == name))
            .collect();
        for row in p.vectors.rows() {
            let mut v = Array1::<f64>::zeros(n);
            for (j, col) in cols.iter().enumerate() {
                if let Some(c) = col {
                    v[*c] = row[j];
                }
            }
            let norm0 = v.dot(&v).sqrt();
            if norm0 <= f64::EPSILON {
                continue;
            }
            v /= norm0;
            // Gram-Schmidt against the vectors kept so far
            for u in &basis {
                let d = u.dot(&v);
                v.scaled_add(-d, u);
            }
            let norm = v.dot(&v).sqrt();
            if norm > 1e-10 {
                basis.push(v / norm);
            }
        }
    }
    if basis.is_empty() {
        return None;
    }
    let mut proj = Array2::<f64>::eye(n);
    for u in &basis {
        for i in 0..n {
            for j in 0..n {
                proj[[i, j]] -= u[i] * u[j];
            }
        }
    }
    Some(proj)
}
