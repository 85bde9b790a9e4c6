//! Tag directory loading and block tree construction.
//!
//! The directory is an ordered list of tag headers with their file
//! positions.  It comes from one of three places:
//!
//! 1. the trailing `FIFF_DIR` tag referenced by `FIFF_DIR_POINTER`
//!    (trusted after validation);
//! 2. the `next` link chain starting at offset 0, when the file declares no
//!    directory (`FIFF_DIR_POINTER == -1`);
//! 3. a sequential scan of every header in the file, when the declared
//!    directory is unusable.  Only this path counts as a recovery.
//!
//! The tree is then built by grouping the flat directory into blocks
//! delimited by `FIFF_BLOCK_START` / `FIFF_BLOCK_END` tags.
use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Result};

use super::constants::*;
use super::tag::{read_directory, read_i32, read_tag_header, TagHeader, TAG_HEADER_SIZE};
use crate::error::FifError;

// ── Node ─────────────────────────────────────────────────────────────────

/// One block of the FIF tree.
#[derive(Debug, Default, Clone)]
pub struct Node {
    /// Block kind (e.g. `FIFFB_MEAS`, `FIFFB_RAW_DATA`, …).
    /// 0 = root / unknown.
    pub block:    i32,
    /// All non-structural tag headers in this node (not including BLOCK_START/END).
    pub entries:  Vec<TagHeader>,
    /// Child nodes.
    pub children: Vec<Node>,
}

impl Node {
    /// Recursively find the first node (depth-first) with the given block kind.
    pub fn find_block(&self, kind: i32) -> Option<&Node> {
        if self.block == kind {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_block(kind))
    }

    /// Recursively collect all nodes with the given block kind.
    pub fn find_blocks(&self, kind: i32) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_blocks(kind, &mut out);
        out
    }

    fn collect_blocks<'a>(&'a self, kind: i32, out: &mut Vec<&'a Node>) {
        if self.block == kind {
            out.push(self);
        }
        for child in &self.children {
            child.collect_blocks(kind, out);
        }
    }

    /// Find the first tag header with the given kind in this node's entries.
    /// Does NOT recurse into children.
    pub fn find_tag(&self, kind: i32) -> Option<&TagHeader> {
        self.entries.iter().find(|e| e.kind == kind)
    }
}

// ── Tree builder ─────────────────────────────────────────────────────────

/// Group a flat directory into blocks.
///
/// `block_kind` resolves the payload of a `FIFF_BLOCK_START` tag.  Blocks
/// left open at the end of the directory are attached to their parents.
pub fn build_tree<F>(directory: &[TagHeader], mut block_kind: F) -> Result<Node>
where
    F: FnMut(&TagHeader) -> Result<i32>,
{
    let mut stack: Vec<Node> = vec![Node::default()]; // root
    for tag in directory {
        match tag.kind {
            FIFF_BLOCK_START => {
                stack.push(Node { block: block_kind(tag)?, ..Node::default() });
            }
            FIFF_BLOCK_END if stack.len() > 1 => {
                if let Some(finished) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(finished);
                    }
                }
            }
            FIFF_BLOCK_END => {} // unbalanced end, ignore
            _ => {
                if let Some(node) = stack.last_mut() {
                    node.entries.push(*tag);
                }
            }
        }
    }
    while stack.len() > 1 {
        if let Some(orphan) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(orphan);
            }
        }
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Build the tree, reading block kinds from the file.
pub fn read_tree<R: Read + Seek>(reader: &mut R, directory: &[TagHeader]) -> Result<Node> {
    build_tree(directory, |tag| read_i32(reader, tag))
}

// ── Directory loading ─────────────────────────────────────────────────────

/// Flat tag directory of one file.
#[derive(Debug, Clone)]
pub struct Directory {
    pub entries:   Vec<TagHeader>,
    /// `true` when the declared directory was unusable and the entries were
    /// rebuilt by a sequential scan.
    pub recovered: bool,
}

/// Load the directory of a FIF stream.
///
/// Fails with [`FifError::Decode`] when the stream does not start with a
/// `FIFF_FILE_ID` tag; every directory-class problem after that is
/// recovered from.
pub fn load_directory<R: Read + Seek>(reader: &mut R) -> Result<Directory> {
    let len = reader.seek(SeekFrom::End(0))?;
    let id_tag = match read_tag_header(reader, 0) {
        Ok(t) if t.kind == FIFF_FILE_ID => t,
        _ => bail!(FifError::Decode("file does not start with a FIFF_FILE_ID tag".into())),
    };

    let dirpos = match id_tag.next_pos() {
        Some(p) if p + TAG_HEADER_SIZE + 4 <= len => {
            let ptr = read_tag_header(reader, p)?;
            if ptr.kind == FIFF_DIR_POINTER { Some(read_i32(reader, &ptr)? as i64) } else { None }
        }
        _ => None,
    };

    match dirpos {
        Some(dirpos) if dirpos > 0 => {
            if let Some(entries) = trusted_directory(reader, dirpos as u64, len) {
                log::debug!("using stored directory with {} entries @ {dirpos:#x}", entries.len());
                return Ok(Directory { entries, recovered: false });
            }
            log::debug!("stored directory @ {dirpos:#x} rejected, scanning");
        }
        _ => match scan_directory(reader, len) {
            Ok(entries) => return Ok(Directory { entries, recovered: false }),
            Err(e) => log::debug!("tag chain broken ({e:#}), scanning"),
        },
    }
    Ok(Directory { entries: recover_directory(reader, len), recovered: true })
}

/// Read and validate the directory stored at `dirpos`.
///
/// Rejected when the tag is missing or truncated, has the wrong kind or
/// type, a size that is not a whole number of entries, entries that do not
/// strictly increase in position, or entries that run past the end.
fn trusted_directory<R: Read + Seek>(reader: &mut R, dirpos: u64, len: u64) -> Option<Vec<TagHeader>> {
    if dirpos + TAG_HEADER_SIZE > len {
        return None;
    }
    let tag = read_tag_header(reader, dirpos).ok()?;
    if tag.kind != FIFF_DIR
        || tag.ftype != FIFFT_DIR_ENTRY_STRUCT
        || tag.size % 16 != 0
        || tag.end_pos() > len
    {
        return None;
    }
    let entries = read_directory(reader, &tag).ok()?;
    if entries.is_empty() {
        return None;
    }
    let monotonic = entries.windows(2).all(|w| w[0].pos < w[1].pos);
    let in_bounds = entries.iter().all(|e| e.size >= 0 && e.end_pos() <= len);
    (monotonic && in_bounds).then_some(entries)
}

/// Follow the `next` link chain from offset 0.
///
/// Links must point forward; a backward or self link is a decode error.
/// The walk ends at a `-1` link or at the end of the stream.
pub fn scan_directory<R: Read + Seek>(reader: &mut R, len: u64) -> Result<Vec<TagHeader>> {
    let mut directory = Vec::new();
    let mut pos: Option<u64> = Some(0);
    while let Some(p) = pos {
        if p + TAG_HEADER_SIZE > len {
            break;
        }
        let tag = read_tag_header(reader, p)?;
        if tag.end_pos() > len {
            bail!(FifError::Decode(format!("tag kind {} @ {p:#x} is truncated", tag.kind)));
        }
        pos = tag.next_pos();
        if let Some(n) = pos {
            if n <= p {
                bail!(FifError::Decode(format!("tag @ {p:#x} links backwards to {n:#x}")));
            }
        }
        if tag.kind != FIFF_DIR {
            directory.push(tag);
        }
    }
    Ok(directory)
}

/// Rebuild the directory by reading every header sequentially.
///
/// Stops quietly at the end of the stream, at an unreadable header, or at
/// a tag whose payload runs past the end (a truncated trailing tag is
/// dropped).  `FIFF_DIR` tags are not listed.
pub fn recover_directory<R: Read + Seek>(reader: &mut R, len: u64) -> Vec<TagHeader> {
    let mut entries = Vec::new();
    let mut pos = 0u64;
    while pos + TAG_HEADER_SIZE <= len {
        let Ok(tag) = read_tag_header(reader, pos) else { break };
        if tag.end_pos() > len {
            break;
        }
        if tag.kind != FIFF_DIR {
            entries.push(TagHeader { next: FIFFV_NEXT_SEQ, ..tag });
        }
        pos = tag.end_pos();
    }
    entries
}
