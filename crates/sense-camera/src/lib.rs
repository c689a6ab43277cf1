// src/lib.rs

//! The network camera source worker (C4): an RTSP-to-HLS transcoder
//! lifecycle, command handling, and a discover mode — the "hard part" of
//! the fabric's source workers, built on the generic persistent worker base
//! in `sense-worker` rather than a bespoke task loop.

pub mod commands;
pub mod config;
pub mod discover;
pub mod ffmpeg;
pub mod manager;
pub mod mask;
pub mod ptz;
pub mod reconnect;
pub mod source;
pub mod state;

pub use commands::CameraCommandHandler;
pub use config::{CameraConfig, HlsSettings, build_rtsp_url};
pub use manager::StreamManager;
pub use source::CameraSource;
pub use state::{StreamState, StreamStatus};
