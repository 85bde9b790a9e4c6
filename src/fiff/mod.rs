//! FIFF file format reader and writer.
//!
//! Reads and writes raw `.fif` recordings compatible with
//! [MNE-Python](https://mne.tools), including split files, acquisition
//! skips and damaged tag directories.
//!
//! # Quick start
//! ```no_run
//! use fiffraw::fiff::raw::open_raw;
//!
//! let raw = open_raw("data/sample1_raw.fif").unwrap();
//! println!("{} channels @ {} Hz", raw.info.n_chan, raw.info.sfreq);
//! let data = raw.read_all_data().unwrap();  // [n_chan, n_times] f64
//! ```
pub mod annotations;
pub mod concat;
pub mod constants;
pub mod extras;
pub mod info;
pub mod picks;
pub mod proj;
pub mod raw;
pub mod split;
pub mod tag;
pub mod tree;
pub mod write;

// Re-export the most commonly used items.
pub use annotations::{Annotation, Annotations};
pub use concat::{concatenate, concatenate_with_events};
pub use extras::{BufferEntry, BufferExtras, Source};
pub use info::{read_meas_info, write_meas_info, ChannelInfo, CoordTrans, FileId, MeasInfo};
pub use picks::{ChannelSelector, SampleSelector};
pub use proj::Projector;
pub use raw::{open_raw, open_raw_reader, open_raw_with, RawFif, RawKind, RejectByAnnotation, Segment};
pub use split::SplitManifest;
pub use tag::{
    read_directory, read_f32, read_f32_array, read_i32, read_i32_array, read_string, read_tag,
    read_tag_header, Tag, TagData, TagHeader,
};
pub use tree::{build_tree, load_directory, read_tree, scan_directory, Directory, Node};
pub use write::{FifWriter, TagCounter, TagWrite};
