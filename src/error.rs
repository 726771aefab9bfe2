//! Typed error taxonomy for the emulator library.
//!
//! Library code returns [`EmuError`] so callers can match on failure kind
//! and decide what is fatal; the binary entry point wraps these in
//! `anyhow::Context` for user-facing reporting.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("failed to parse config {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("input device unavailable: {0}")]
    DeviceUnavailable(PathBuf),

    #[error("all keypad-class input devices are unavailable")]
    NoInputDevices,

    #[error("framebuffer unavailable: {0}")]
    FramebufferUnavailable(String),

    #[error("pty read error: {0}")]
    PtyReadError(#[source] io::Error),

    #[error("pty write error: {0}")]
    PtyWriteError(#[source] io::Error),

    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    #[error("failed to spawn session: {0}")]
    SessionSpawn(String),
}

pub type Result<T> = std::result::Result<T, EmuError>;
