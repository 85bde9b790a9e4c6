//! FIFF tag decoding.
//!
//! A tag is the smallest structural unit of a FIF file.
//! On-disk layout (always big-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  kind : i32  │  type : u32  │  size : i32  │ next : i32 │  ← 16 bytes
//! ├──────────────────────────────────────────────────────┤
//! │  <size bytes of payload data>                        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! `next == 0` means the next tag follows immediately (pos + 16 + size).
//! `next  > 0` means seek to byte offset `next`.
//! `next == -1` means there is no next tag (end of sequence).
//!
//! The encoding side lives in [`super::write`].
use std::io::{Read, Seek, SeekFrom};
use std::slice::ChunksExact;

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use rustfft::num_complex::Complex;

use super::constants::*;
use crate::error::FifError;

/// Size of a tag header in bytes.
pub const TAG_HEADER_SIZE: u64 = 16;

// ── Tag header ────────────────────────────────────────────────────────────

/// Lightweight tag header, no payload loaded yet.
///
/// Also used as a directory entry: entries carry the same fields, with
/// `pos` holding the tag's absolute file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub kind: i32,
    pub ftype: u32,   // "type" is a Rust keyword
    pub size: i32,
    pub next: i32,
    pub pos: u64,     // byte offset of the header in the file
}

impl TagHeader {
    /// Byte position of the first payload byte.
    #[inline]
    pub fn data_pos(&self) -> u64 {
        self.pos + TAG_HEADER_SIZE
    }

    /// Byte position just past the payload.
    #[inline]
    pub fn end_pos(&self) -> u64 {
        self.data_pos() + self.size.max(0) as u64
    }

    /// Position of the NEXT tag header (or `None` if this is the last tag).
    pub fn next_pos(&self) -> Option<u64> {
        if self.next == FIFFV_NEXT_SEQ {
            Some(self.end_pos())
        } else if self.next > 0 {
            Some(self.next as u64)
        } else {
            None // FIFFV_NEXT_NONE (-1) or any other negative
        }
    }
}

#[inline]
pub(crate) fn be_i32(b: &[u8]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub(crate) fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub(crate) fn be_f32(b: &[u8]) -> f32 {
    f32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub(crate) fn be_f64(b: &[u8]) -> f64 {
    f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Decode a 16-byte header image.  A negative payload size is rejected.
pub fn parse_tag_header(buf: &[u8; 16], pos: u64) -> Result<TagHeader> {
    let tag = TagHeader {
        kind:  be_i32(&buf[0..4]),
        ftype: be_u32(&buf[4..8]),
        size:  be_i32(&buf[8..12]),
        next:  be_i32(&buf[12..16]),
        pos,
    };
    if tag.size < 0 {
        bail!(FifError::Decode(format!(
            "tag kind {} @ {pos:#x} has negative size {}", tag.kind, tag.size
        )));
    }
    Ok(tag)
}

/// Read only the 16-byte tag header at the given file position.
pub fn read_tag_header<R: Read + Seek>(reader: &mut R, pos: u64) -> Result<TagHeader> {
    reader.seek(SeekFrom::Start(pos))
        .with_context(|| format!("seek to tag header @ {pos:#x}"))?;
    let mut buf = [0u8; 16];
    reader.read_exact(&mut buf)
        .with_context(|| format!("read tag header @ {pos:#x}"))?;
    parse_tag_header(&buf, pos)
}

// ── Full tags ─────────────────────────────────────────────────────────────

/// Decoded tag payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TagData {
    Void,
    Byte(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(String),
    ComplexFloat(Vec<Complex<f32>>),
    ComplexDouble(Vec<Complex<f64>>),
    /// `FIFFT_MATRIX | FIFFT_FLOAT`, row-major.
    FloatMatrix(Array2<f32>),
    /// Fixed-layout structs (ids, channel infos, directory entries,
    /// coordinate transforms) kept as raw bytes for the typed parsers.
    Struct(Vec<u8>),
}

/// One tag: header plus decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub header: TagHeader,
    pub data: TagData,
}

impl Tag {
    /// First integer of an int payload.
    pub fn as_i32(&self) -> Option<i32> {
        match &self.data {
            TagData::Int(v) => v.first().copied(),
            _ => None,
        }
    }
}

/// Read the tag at `pos` and decode its payload according to its type.
///
/// Fails with [`FifError::Decode`] for unknown payload types, payload sizes
/// that are not a whole number of elements and truncated payloads.
pub fn read_tag<R: Read + Seek>(reader: &mut R, pos: u64) -> Result<Tag> {
    let header = read_tag_header(reader, pos)?;
    let payload = read_payload(reader, &header)?;
    let data = decode_payload(&header, &payload)?;
    Ok(Tag { header, data })
}

/// Fixed-width elements of `p`. A trailing partial element is a decode
/// error, so `chunks_exact` never drops bytes silently.
fn fixed_width<'a>(tag: &TagHeader, p: &'a [u8], w: usize) -> Result<ChunksExact<'a, u8>> {
    if p.len() % w != 0 {
        bail!(FifError::Decode(format!(
            "tag kind {} @ {:#x}: size {} is not a multiple of {w}",
            tag.kind, tag.pos, p.len()
        )));
    }
    Ok(p.chunks_exact(w))
}

fn decode_payload(tag: &TagHeader, p: &[u8]) -> Result<TagData> {
    let elements = |w: usize| fixed_width(tag, p, w);
    let data = match tag.ftype {
        FIFFT_VOID => TagData::Void,
        FIFFT_BYTE => TagData::Byte(p.to_vec()),
        FIFFT_SHORT | FIFFT_DAU_PACK16 => {
            TagData::Short(elements(2)?.map(|b| i16::from_be_bytes([b[0], b[1]])).collect())
        }
        FIFFT_INT | FIFFT_JULIAN => TagData::Int(elements(4)?.map(be_i32).collect()),
        FIFFT_FLOAT => TagData::Float(elements(4)?.map(be_f32).collect()),
        FIFFT_DOUBLE => TagData::Double(elements(8)?.map(be_f64).collect()),
        // FIFF strings are ISO-8859-1 / Latin-1; safe to decode byte-by-byte.
        FIFFT_STRING => TagData::String(p.iter().map(|&b| b as char).collect()),
        FIFFT_COMPLEX_FLOAT => TagData::ComplexFloat(
            elements(8)?.map(|b| Complex::new(be_f32(&b[..4]), be_f32(&b[4..]))).collect(),
        ),
        FIFFT_COMPLEX_DOUBLE => TagData::ComplexDouble(
            elements(16)?.map(|b| Complex::new(be_f64(&b[..8]), be_f64(&b[8..]))).collect(),
        ),
        FIFFT_ID_STRUCT | FIFFT_CH_INFO_STRUCT | FIFFT_DIR_ENTRY_STRUCT
        | FIFFT_DIG_POINT_STRUCT | FIFFT_COORD_TRANS_STRUCT => TagData::Struct(p.to_vec()),
        t if t == FIFFT_MATRIX | FIFFT_FLOAT => TagData::FloatMatrix(decode_float_matrix(tag, p)?),
        other => bail!(FifError::Decode(format!(
            "tag kind {} @ {:#x} has unknown type {other:#x}", tag.kind, tag.pos
        ))),
    };
    Ok(data)
}

/// Matrices store their elements first, then the dimensions in reverse
/// order, then the number of dimensions.
fn decode_float_matrix(tag: &TagHeader, p: &[u8]) -> Result<Array2<f32>> {
    let bad = |why: &str| FifError::Decode(format!(
        "matrix tag kind {} @ {:#x}: {why}", tag.kind, tag.pos
    ));
    if p.len() < 12 {
        bail!(bad("payload too short for dimensions"));
    }
    let ndim = be_i32(&p[p.len() - 4..]);
    if ndim != 2 {
        bail!(bad(&format!("only 2-D matrices are supported, got {ndim}-D")));
    }
    let cols = be_i32(&p[p.len() - 12..p.len() - 8]);
    let rows = be_i32(&p[p.len() - 8..p.len() - 4]);
    if rows < 0 || cols < 0 || (rows as usize) * (cols as usize) * 4 != p.len() - 12 {
        bail!(bad(&format!("dimensions {rows}x{cols} do not match payload size")));
    }
    let values: Vec<f32> = p[..p.len() - 12].chunks_exact(4).map(be_f32).collect();
    Ok(Array2::from_shape_vec((rows as usize, cols as usize), values)?)
}

// ── Payload readers (stateless, called with a header already read) ─────────

/// Read the entire payload as raw bytes.
pub fn read_payload<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<u8>> {
    seek_data(reader, tag)?;
    let mut buf = vec![0u8; tag.size.max(0) as usize];
    reader.read_exact(&mut buf).map_err(|e| {
        anyhow::Error::new(FifError::Decode(format!(
            "truncated payload for tag kind {} @ {:#x}: {e}", tag.kind, tag.pos
        )))
    })?;
    Ok(buf)
}

/// Read a single big-endian i32 payload.
pub fn read_i32<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<i32> {
    seek_data(reader, tag)?;
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)
        .with_context(|| format!("read i32 tag kind {} @ {:#x}", tag.kind, tag.pos))?;
    Ok(i32::from_be_bytes(buf))
}

/// Read a single big-endian f32 payload.
pub fn read_f32<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<f32> {
    seek_data(reader, tag)?;
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)
        .with_context(|| format!("read f32 tag kind {} @ {:#x}", tag.kind, tag.pos))?;
    Ok(f32::from_be_bytes(buf))
}

/// Read a Latin-1 string payload.
pub fn read_string<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<String> {
    let buf = read_payload(reader, tag)?;
    Ok(buf.iter().map(|&b| b as char).collect())
}

/// Read a big-endian i32 array (one or more ints).
pub fn read_i32_array<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<i32>> {
    let buf = read_payload(reader, tag)?;
    Ok(buf.chunks_exact(4).map(be_i32).collect())
}

/// Read a big-endian f32 array.
pub fn read_f32_array<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<f32>> {
    let buf = read_payload(reader, tag)?;
    Ok(buf.chunks_exact(4).map(be_f32).collect())
}

// ── Directory tag (FIFFT_DIR_ENTRY_STRUCT) ────────────────────────────────

/// Decode the entries of a `FIFF_DIR` tag.
///
/// Each entry is a 16-byte structure laid out like a tag header, except that
/// the last field holds the tag's file position instead of a `next` link.
pub fn read_directory<R: Read + Seek>(
    reader: &mut R,
    tag: &TagHeader,
) -> Result<Vec<TagHeader>> {
    if tag.ftype != FIFFT_DIR_ENTRY_STRUCT {
        bail!(FifError::Decode(format!(
            "expected FIFFT_DIR_ENTRY_STRUCT, got {}", tag.ftype
        )));
    }
    if tag.size % 16 != 0 {
        bail!(FifError::Decode(format!(
            "directory size {} is not a multiple of 16", tag.size
        )));
    }
    let buf = read_payload(reader, tag)?;
    Ok(buf
        .chunks_exact(16)
        .map(|e| TagHeader {
            kind:  be_i32(&e[0..4]),
            ftype: be_u32(&e[4..8]),
            size:  be_i32(&e[8..12]),
            next:  FIFFV_NEXT_SEQ,
            pos:   be_u32(&e[12..16]) as u64,
        })
        .collect())
}

// ── Helpers ───────────────────────────────────────────────────────────────

#[inline]
fn seek_data<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<()> {
    reader
        .seek(SeekFrom::Start(tag.data_pos()))
        .with_context(|| format!("seek to tag data @ {:#x}", tag.data_pos()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiff::write::{encode_tag_header, FifWriter, TagWrite};
    use std::io::Cursor;

    fn tag_bytes(kind: i32, ftype: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = encode_tag_header(kind, ftype, payload.len() as i32, FIFFV_NEXT_SEQ).to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    /// Matrix payload: `values`, then the trailing `dims` words as written.
    fn matrix_bytes(values: &[f32], dims: &[i32]) -> Vec<u8> {
        let mut payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        for d in dims {
            payload.extend_from_slice(&d.to_be_bytes());
        }
        tag_bytes(FIFF_PROJ_ITEM_VECTORS, FIFFT_MATRIX | FIFFT_FLOAT, &payload)
    }

    #[test]
    fn decode_i32_tag() {
        let mut cursor = Cursor::new(tag_bytes(FIFF_NCHAN, FIFFT_INT, &42_i32.to_be_bytes()));
        let tag = read_tag_header(&mut cursor, 0).unwrap();
        assert_eq!(tag.kind,  FIFF_NCHAN);
        assert_eq!(tag.ftype, FIFFT_INT);
        assert_eq!(tag.size,  4);
        assert_eq!(read_i32(&mut cursor, &tag).unwrap(), 42);
        assert_eq!(read_tag(&mut cursor, 0).unwrap().as_i32(), Some(42));
    }

    #[test]
    fn decode_f32_tag() {
        let mut cursor = Cursor::new(tag_bytes(FIFF_SFREQ, FIFFT_FLOAT, &256_f32.to_be_bytes()));
        let tag = read_tag_header(&mut cursor, 0).unwrap();
        let v = read_f32(&mut cursor, &tag).unwrap();
        approx::assert_abs_diff_eq!(v, 256.0_f32, epsilon = 1e-6);
    }

    #[test]
    fn decode_string_tag() {
        let mut cursor = Cursor::new(tag_bytes(FIFF_COMMENT, FIFFT_STRING, b"hello"));
        let tag = read_tag_header(&mut cursor, 0).unwrap();
        assert_eq!(read_string(&mut cursor, &tag).unwrap(), "hello");
    }

    #[test]
    fn decode_complex_tag() {
        let mut payload = Vec::new();
        for v in [1.5_f32, -2.0, 0.25, 4.0] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let mut cursor = Cursor::new(tag_bytes(FIFF_DATA_BUFFER, FIFFT_COMPLEX_FLOAT, &payload));
        let tag = read_tag(&mut cursor, 0).unwrap();
        assert_eq!(
            tag.data,
            TagData::ComplexFloat(vec![Complex::new(1.5, -2.0), Complex::new(0.25, 4.0)])
        );
    }

    #[test]
    fn decode_float_matrix_tag() {
        let mut cursor = Cursor::new(matrix_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2, 2]));
        let TagData::FloatMatrix(m) = read_tag(&mut cursor, 0).unwrap().data else {
            panic!("expected a matrix");
        };
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[1, 0]], 4.0);
    }

    #[test]
    fn unknown_type_is_decode_error() {
        let mut cursor = Cursor::new(tag_bytes(FIFF_NCHAN, 77, &[0, 0, 0, 1]));
        let err = read_tag(&mut cursor, 0).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Decode(_))));
    }

    #[test]
    fn ragged_size_is_decode_error() {
        for (ftype, size) in [
            (FIFFT_SHORT, 3),
            (FIFFT_INT, 6),
            (FIFFT_FLOAT, 6),
            (FIFFT_DOUBLE, 12),
            (FIFFT_COMPLEX_FLOAT, 12),
            (FIFFT_COMPLEX_DOUBLE, 24),
        ] {
            let mut cursor = Cursor::new(tag_bytes(FIFF_DATA_BUFFER, ftype, &vec![0; size]));
            let err = read_tag(&mut cursor, 0).unwrap_err();
            assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Decode(_))), "type {ftype}");
        }
    }

    #[test]
    fn negative_size_is_decode_error() {
        let mut cursor = Cursor::new(encode_tag_header(FIFF_NCHAN, FIFFT_INT, -4, FIFFV_NEXT_SEQ).to_vec());
        let err = read_tag_header(&mut cursor, 0).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Decode(_))));
    }

    #[test]
    fn truncated_payload_is_decode_error() {
        let mut bytes = encode_tag_header(FIFF_NCHAN, FIFFT_INT, 8, FIFFV_NEXT_SEQ).to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 1]);
        let mut cursor = Cursor::new(bytes);
        let err = read_tag(&mut cursor, 0).unwrap_err();
        assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Decode(_))));
    }

    #[test]
    fn malformed_matrix_dimensions_are_decode_errors() {
        let six = [1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        for bytes in [
            matrix_bytes(&six, &[3, 2, 1, 3]), // 3-D
            matrix_bytes(&six, &[3, 3, 2]),    // 9 elements announced
            matrix_bytes(&six, &[-3, -2, 2]),
            matrix_bytes(&[], &[2]),           // no room for the dimensions
        ] {
            let err = read_tag(&mut Cursor::new(bytes), 0).unwrap_err();
            assert!(matches!(err.downcast_ref::<FifError>(), Some(FifError::Decode(_))), "{err:#}");
        }
    }

    #[test]
    fn written_tags_chain_to_directory() {
        let mut w = FifWriter::new(Cursor::new(Vec::new()));
        w.write_int(FIFF_NCHAN, &[3]).unwrap();
        w.write_float(FIFF_SFREQ, &[250.0, 125.0]).unwrap();
        w.finish().unwrap();
        let entries = w.directory().to_vec();
        let mut cursor = Cursor::new(w.into_inner().into_inner());

        assert_eq!(entries[1].pos, 20);
        assert_eq!(entries[1].data_pos(), 36);
        assert_eq!(entries[1].end_pos(), 44);

        let mut seen = Vec::new();
        let mut at = Some(0);
        while let Some(pos) = at {
            let h = read_tag_header(&mut cursor, pos).unwrap();
            seen.push((h.kind, h.pos, h.end_pos()));
            at = h.next_pos();
        }
        assert_eq!(seen, vec![(FIFF_NCHAN, 0, 20), (FIFF_SFREQ, 20, 44), (FIFF_DIR, 44, 44 + 16 + 32)]);
    }

    #[test]
    fn explicit_next_skips_past_payload_end() {
        let mut bytes = encode_tag_header(FIFF_NCHAN, FIFFT_INT, 4, 40).to_vec();
        bytes.extend_from_slice(&7_i32.to_be_bytes());
        bytes.resize(40, 0xff);
        bytes.extend_from_slice(&encode_tag_header(FIFF_SFREQ, FIFFT_FLOAT, 4, FIFFV_NEXT_NONE));
        bytes.extend_from_slice(&100_f32.to_be_bytes());
        let mut cursor = Cursor::new(bytes);

        let first = read_tag_header(&mut cursor, 0).unwrap();
        assert_eq!(first.end_pos(), 20);
        assert_eq!(first.next_pos(), Some(40));
        let last = read_tag_header(&mut cursor, 40).unwrap();
        assert_eq!(last.kind, FIFF_SFREQ);
        assert_eq!(last.end_pos(), 60);
        assert_eq!(last.next_pos(), None);
        assert_eq!(read_tag(&mut cursor, 40).unwrap().data, TagData::Float(vec![100.0]));
    }
}
