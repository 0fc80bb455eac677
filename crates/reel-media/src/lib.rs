//! FFmpeg CLI wrapper for scene composition.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Wall-clock timeouts with child cleanup
//! - FFprobe stream inspection
//! - Lossless concat with a re-encode fallback, and per-scene audio mux

pub mod command;
pub mod compose;
pub mod error;
pub mod probe;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use compose::{ComposeOutput, FfmpegComposer, MediaComposer};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, AudioStream, MediaInfo, VideoStream};
