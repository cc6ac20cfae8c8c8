//! Record and replay browser macros anchored to screen coordinates.
//!
//! A recording is an ordered step sequence (navigate, click, type, key,
//! scroll, wait) persisted as one JSON file. Clicks carry resolution-
//! independent fractional coordinates and a fingerprint (pixel snapshot,
//! OCR text, dominant color) that replay uses to detect element drift
//! and ask the operator whether to proceed.

pub mod backend;
pub mod geometry;
pub mod playback;
pub mod recorder;

pub use playback::{PlaybackEngine, PlaybackOptions, ReplayOutcome};
pub use recorder::{EditSession, Recording, RecordingStore, Step};
