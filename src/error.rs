//! Error taxonomy for the analysis subsystem.
//!
//! Everything here is recovered inside the session manager; the editor layer
//! only ever sees [`ManagerError`], and only for caller-contract violations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::DocumentId;

/// The engine executable could not be started. Not retried automatically —
/// external tool misconfiguration is not self-healing.
#[derive(Debug, Error)]
#[error("failed to spawn `{exe}`: {source}")]
pub struct SpawnError {
    pub(crate) exe: String,
    #[source]
    pub(crate) source: io::Error,
}

/// IO against a running (or no longer running) engine process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Writing to stdin failed; the process is treated as exited.
    #[error("engine stdin closed: {0}")]
    BrokenPipe(#[source] io::Error),
    /// The process has already exited; further writes are refused.
    #[error("engine process has already exited")]
    Exited,
}

/// A response line that could not be decoded. Logged and swallowed upstream;
/// the editor sees an empty result, never an error.
#[derive(Debug, Error)]
#[error("unparseable engine response {raw:?}: {source}")]
pub struct DecodeError {
    pub(crate) raw: String,
    #[source]
    pub(crate) source: serde_json::Error,
}

impl DecodeError {
    pub(crate) fn new(raw: &str, source: serde_json::Error) -> Self {
        // Keep log lines bounded even if the engine misbehaves badly.
        const MAX_RAW: usize = 256;
        let raw = if raw.len() > MAX_RAW {
            let mut end = MAX_RAW;
            while !raw.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &raw[..end])
        } else {
            raw.to_string()
        };
        Self { raw, source }
    }
}

/// Why a single interactive query failed to produce a result.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no response from engine within {0:?}")]
    Timeout(Duration),
    #[error("engine exited (code {0:?}) before responding")]
    EngineExited(Option<i32>),
    #[error("query cancelled: document closed")]
    Cancelled,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Caller-contract violations — the only errors that cross the subsystem
/// boundary.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("document {0} is not open")]
    UnknownDocument(DocumentId),
}
