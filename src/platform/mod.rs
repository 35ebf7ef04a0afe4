//! Windows adapters for the service seams.
//!
//! Everything under here talks to Win32 or COM directly. The services only
//! see the traits in `audio`, `process`, `net`, `memory`, `mic` and `alert`.

#[cfg(windows)]
pub mod win32;
