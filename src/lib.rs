//! gpsetlist - merge Guitar Pro 5 tablatures into a single setlist
//!
//! This library provides:
//! - Parsing of Guitar Pro 5 (.gp5) files
//! - Writing songs back to the Guitar Pro 5.00 format
//! - Concatenation of songs into a setlist, track by track
//!
//! # Example
//!
//! ```no_run
//! use gpsetlist::{merge_setlist, parse_gp_data, write_gp_data};
//!
//! let report = merge_setlist(&["intro.gp5", "outro.gp5"], |path| {
//!     parse_gp_data(&std::fs::read(path)?)
//! })
//! .unwrap();
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//! let data = write_gp_data(&report.song).unwrap();
//! std::fs::write("setlist.gp5", data).unwrap();
//! ```

pub mod error;
pub mod parser;
pub mod setlist;
pub mod writer;

// Re-export main types for convenience
pub use error::SetlistError;
pub use parser::song_parser::{
    parse_gp_data, Beat, BeatStatus, Duration, GpVersion, Measure, MeasureHeader, MidiChannel,
    Note, Song, SongInfo, Tempo, Text, TimeSignature, Track, Voice,
};
pub use setlist::driver::{discover_songs, load_song, normalize_output_path, run};
pub use setlist::merge::{merge_setlist, MergeReport, Setlist};
pub use writer::song_writer::{write_gp_data, write_gp_file};
