//! Wire codec for the interactive query channel.
//!
//! One query is a single `basename:line:col` line (1-based positions); one
//! response is a single line of JSON-shaped text:
//!
//! ```text
//! {"kind": str, "type"?: {"name": str, "src": str},
//!  "call"?: {"name": str, "src": str}, "error"?: str}
//! ```
//!
//! The protocol carries no request identifiers, so the session layer must
//! keep requests and responses strictly alternating.

use serde::Deserialize;

use crate::error::DecodeError;
use crate::types::{QueryResult, SymbolInfo};

/// Encode a position query. Deterministic; the wire format needs no escaping.
#[must_use]
pub fn encode_query(basename: &str, line: u32, col: u32) -> String {
    format!("{basename}:{line}:{col}")
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    kind: Option<String>,
    #[serde(rename = "type")]
    type_info: Option<SymbolInfo>,
    #[serde(default)]
    call: Option<SymbolInfo>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode one response line.
///
/// An `error` field means the engine has no information for the position —
/// that is `Ok(None)`, not a failure. Unparseable text is a [`DecodeError`],
/// which the session manager logs and swallows.
pub fn decode_response(line: &str) -> Result<Option<QueryResult>, DecodeError> {
    let raw: RawResponse =
        serde_json::from_str(line).map_err(|source| DecodeError::new(line, source))?;
    if let Some(message) = raw.error {
        tracing::debug!("engine reported no information: {message}");
        return Ok(None);
    }
    Ok(Some(QueryResult::new(
        raw.kind.unwrap_or_default(),
        raw.type_info,
        raw.call,
    )))
}
