//! Analysis session manager for the external PSL analysis engine.
//!
//! Mediates between an editor-facing protocol layer and a black-box
//! analysis executable: spawns one engine process per open document and
//! purpose (one-shot validation runs, a long-lived interactive query
//! channel), debounces redundant validation triggers, and turns the engine's
//! line-oriented output into structured diagnostics and query results.
//!
//! Engine failures never surface to the editor as errors; at worst the
//! editor sees an empty diagnostics list or an empty hover.

pub mod codec;
pub mod process;
pub mod types;

pub(crate) mod debounce;
pub(crate) mod parse;
pub(crate) mod session;

mod error;
mod manager;

pub use error::{DecodeError, ManagerError, ProcessError, QueryError, SpawnError};
pub use manager::SessionManager;
pub use types::{
    AnalysisEvent, Diagnostic, DocumentId, EngineConfig, QueryResult, ResolvedEngine, Severity,
    SymbolInfo,
};
