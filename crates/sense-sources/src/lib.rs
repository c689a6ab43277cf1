// src/lib.rs

//! Concrete source workers. Per-source data parsing (real weather API
//! responses, psutil-equivalent system stats, SenseHAT hardware access) is
//! out of spec.md §1's scope; these are deliberately thin stand-ins that
//! exercise the ephemeral/persistent worker bases (`sense-worker`) end to
//! end with a small, honest slice of each source's real behavior rather
//! than a full reimplementation of the original Python parsers.

pub mod display;
pub mod sensors;
pub mod sleep;
pub mod system;
pub mod weather;

pub use display::DisplayState;
pub use sensors::SenseHatSource;
pub use system::SystemSource;
pub use weather::WeatherSource;
