//! Public types consumed by the editor-protocol layer.
//!
//! The protocol layer constructs an [`EngineConfig`], receives
//! [`AnalysisEvent`]s, and reads [`Diagnostic`]s and [`QueryResult`]s.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so comparison does not depend on what currently exists.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Opaque stable identity of an open document: its normalized absolute path.
///
/// Key for every session lookup. Exists from document-open to document-close.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(PathBuf);

impl DocumentId {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        Self(normalize_path(path))
    }

    /// Parse a `file://` URI into a document identity.
    ///
    /// Returns `None` for non-file schemes or unparseable URIs.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        let path = url::Url::parse(uri).ok()?.to_file_path().ok()?;
        Some(Self::from_path(&path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File basename as the wire protocol expects it in query lines.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.0.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Severity of a validation diagnostic. The engine only distinguishes two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// A single diagnostic parsed from a validation run.
///
/// Positions are 0-indexed with a half-open column range of length ≥ 1.
/// Fields are private; construction goes through [`Diagnostic::new`] and
/// readers use accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: Severity,
    message: String,
    /// 0-indexed line.
    line: u32,
    /// 0-indexed start column.
    col: u32,
    /// 0-indexed exclusive end column.
    end_col: u32,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: Severity, message: String, line: u32, col: u32, end_col: u32) -> Self {
        Self {
            severity,
            message,
            line,
            col,
            end_col: end_col.max(col + 1),
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 0-indexed line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 0-indexed start column.
    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    /// 0-indexed exclusive end column.
    #[must_use]
    pub fn end_col(&self) -> u32 {
        self.end_col
    }

    /// Format as `path:line:col: severity: message` (1-indexed for display).
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: {}",
            path.display(),
            self.line + 1,
            self.col + 1,
            self.severity.label(),
            self.message,
        )
    }
}

/// A symbol the engine resolved for a position query: name plus the
/// `file:line:col` source location it came from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SymbolInfo {
    name: String,
    src: String,
}

impl SymbolInfo {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source location string as reported by the engine (`file:line:col`).
    #[must_use]
    pub fn src(&self) -> &str {
        &self.src
    }
}

/// Decoded result of one interactive position query.
///
/// `type_info` carries the resolved type at the position, `call` the resolved
/// call target; either or both may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    kind: String,
    type_info: Option<SymbolInfo>,
    call: Option<SymbolInfo>,
}

impl QueryResult {
    pub(crate) fn new(
        kind: String,
        type_info: Option<SymbolInfo>,
        call: Option<SymbolInfo>,
    ) -> Self {
        Self {
            kind,
            type_info,
            call,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn type_info(&self) -> Option<&SymbolInfo> {
        self.type_info.as_ref()
    }

    #[must_use]
    pub fn call(&self) -> Option<&SymbolInfo> {
        self.call.as_ref()
    }

    /// Markdown hint for the editor's hover surface.
    ///
    /// Returns `None` when the result carries nothing worth showing, which the
    /// editor layer renders as an empty hover.
    #[must_use]
    pub fn hover_markdown(&self) -> Option<String> {
        let mut sections = Vec::new();
        if let Some(info) = &self.type_info {
            sections.push(format!("**{}** `{}`", info.name(), self.kind));
            sections.push(format!("defined at `{}`", info.src()));
        }
        if let Some(call) = &self.call {
            sections.push(format!("calls **{}** (`{}`)", call.name(), call.src()));
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}

/// An event pushed by the analysis subsystem to the protocol layer.
#[derive(Debug)]
pub enum AnalysisEvent {
    /// A validation run completed; these diagnostics replace any previous
    /// set for the document.
    Diagnostics {
        document: DocumentId,
        items: Vec<Diagnostic>,
    },
}

fn default_enabled() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_query_timeout_ms() -> u64 {
    5000
}

/// Configuration for the analysis subsystem, deserialized from the host's
/// settings. Resolved once at startup; a missing engine or entry script
/// degrades the subsystem to a no-op instead of failing initialization.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Whether the subsystem is enabled at all. Default: true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Engine executable name or path (e.g. "psl-engine").
    #[serde(default)]
    pub engine: String,
    /// Standard-library/context file handed to every invocation.
    #[serde(default)]
    pub context_file: Option<PathBuf>,
    /// Analysis entry script the engine runs.
    #[serde(default)]
    pub entry_script: Option<PathBuf>,
    /// Additional library paths, in order.
    #[serde(default)]
    pub lib_paths: Vec<PathBuf>,
    /// Optional `-command <entry> <target>` suffix for validation runs.
    #[serde(default)]
    pub command_entry: Option<String>,
    /// Extra environment variables for every spawned engine process, on top
    /// of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Minimum interval between validation runs per document.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long a position query waits for its response line.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            engine: String::new(),
            context_file: None,
            entry_script: None,
            lib_paths: Vec::new(),
            command_entry: None,
            env: HashMap::new(),
            debounce_ms: default_debounce_ms(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Resolve the configured engine once at startup.
    ///
    /// Fails if the executable is not on PATH or no entry script is
    /// configured; the caller logs the failure and runs disabled.
    pub fn resolve(&self) -> anyhow::Result<ResolvedEngine> {
        if self.engine.trim().is_empty() {
            anyhow::bail!("no analysis engine configured");
        }
        let exe = which::which(&self.engine)
            .with_context(|| format!("{} not found in PATH", self.engine))?;
        let entry_script = self
            .entry_script
            .clone()
            .context("no analysis entry script configured")?;
        Ok(ResolvedEngine {
            exe,
            context_file: self.context_file.clone(),
            entry_script,
            lib_paths: self.lib_paths.clone(),
            command_entry: self.command_entry.clone(),
            env: self.env.clone(),
        })
    }
}

/// Startup-resolved engine invocation: executable plus the argument skeleton
/// shared by validation and interactive runs.
#[derive(Debug, Clone)]
pub struct ResolvedEngine {
    exe: PathBuf,
    context_file: Option<PathBuf>,
    entry_script: PathBuf,
    lib_paths: Vec<PathBuf>,
    command_entry: Option<String>,
    env: HashMap<String, String>,
}

impl ResolvedEngine {
    #[must_use]
    pub fn exe(&self) -> &Path {
        &self.exe
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(context) = &self.context_file {
            args.push(context.display().to_string());
        }
        for lib in &self.lib_paths {
            args.push(lib.display().to_string());
        }
        args.push(self.entry_script.display().to_string());
        args
    }

    /// Arguments for a one-shot validation run against `target`.
    pub(crate) fn validation_args(&self, target: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.push(target.display().to_string());
        if let Some(entry) = &self.command_entry {
            args.push("-command".to_string());
            args.push(entry.clone());
            args.push(target.display().to_string());
        }
        args
    }

    /// Arguments for the long-lived interactive session for `target`.
    pub(crate) fn interactive_args(&self, target: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.push(target.display().to_string());
        args
    }

    /// Extra environment for spawned engine processes, from configuration.
    pub(crate) fn env(&self) -> &HashMap<String, String> {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d.psl")),
            PathBuf::from("/a/c/d.psl")
        );
    }

    #[test]
    fn test_document_id_from_path_normalizes() {
        let a = DocumentId::from_path(Path::new("/work/src/../src/foo.psl"));
        let b = DocumentId::from_path(Path::new("/work/src/foo.psl"));
        assert_eq!(a, b);
        assert_eq!(a.basename(), "foo.psl");
    }

    #[test]
    fn test_document_id_from_uri() {
        #[cfg(windows)]
        let (uri, path) = ("file:///C:/work/foo.psl", PathBuf::from(r"C:\work\foo.psl"));
        #[cfg(not(windows))]
        let (uri, path) = ("file:///work/foo.psl", PathBuf::from("/work/foo.psl"));

        let from_uri = DocumentId::from_uri(uri).expect("file uri should parse");
        assert_eq!(from_uri, DocumentId::from_path(&path));
    }

    #[test]
    fn test_document_id_rejects_non_file_uri() {
        assert!(DocumentId::from_uri("https://example.com/foo.psl").is_none());
        assert!(DocumentId::from_uri("not a uri").is_none());
    }

    #[test]
    fn test_diagnostic_range_is_at_least_one_column() {
        let d = Diagnostic::new(Severity::Error, "bad type".to_string(), 9, 4, 4);
        assert_eq!(d.col(), 4);
        assert_eq!(d.end_col(), 5);
    }

    #[test]
    fn test_diagnostic_display_is_one_indexed() {
        let d = Diagnostic::new(Severity::Error, "bad type".to_string(), 9, 4, 5);
        assert_eq!(
            d.display_with_path(Path::new("src/foo.psl")),
            "src/foo.psl:10:5: error: bad type"
        );
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::Error.label(), "error");
        assert_eq!(Severity::Warning.label(), "warning");
        assert!(Severity::Error.is_error());
        assert!(!Severity::Warning.is_error());
    }

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enabled);
        assert!(config.engine.is_empty());
        assert_eq!(config.debounce_ms, 1000);
        assert_eq!(config.query_timeout_ms, 5000);
    }

    #[test]
    fn test_engine_config_resolve_requires_engine() {
        let config = EngineConfig::default();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_engine_config_resolve_requires_entry_script() {
        let config = EngineConfig {
            engine: "sh".to_string(),
            ..EngineConfig::default()
        };
        // `sh` exists on unix, but there is no entry script.
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_engine_config_env_survives_resolve() {
        let mut env = HashMap::new();
        env.insert("PSL_LIB_ROOT".to_string(), "/opt/psl".to_string());
        let config = EngineConfig {
            engine: "sh".to_string(),
            entry_script: Some(PathBuf::from("/opt/psl/analyze.psl")),
            env,
            ..EngineConfig::default()
        };
        let engine = config.resolve().expect("sh resolves");
        assert_eq!(
            engine.env().get("PSL_LIB_ROOT").map(String::as_str),
            Some("/opt/psl")
        );
    }

    #[test]
    fn test_validation_args_order() {
        let engine = ResolvedEngine {
            exe: PathBuf::from("/usr/bin/psl-engine"),
            context_file: Some(PathBuf::from("/opt/psl/context.psl")),
            entry_script: PathBuf::from("/opt/psl/analyze.psl"),
            lib_paths: vec![PathBuf::from("/opt/psl/lib")],
            command_entry: Some("check".to_string()),
            env: HashMap::new(),
        };
        let args = engine.validation_args(Path::new("/work/foo.psl"));
        assert_eq!(
            args,
            vec![
                "/opt/psl/context.psl",
                "/opt/psl/lib",
                "/opt/psl/analyze.psl",
                "/work/foo.psl",
                "-command",
                "check",
                "/work/foo.psl",
            ]
        );
    }

    #[test]
    fn test_interactive_args_have_no_command_suffix() {
        let engine = ResolvedEngine {
            exe: PathBuf::from("/usr/bin/psl-engine"),
            context_file: None,
            entry_script: PathBuf::from("/opt/psl/analyze.psl"),
            lib_paths: Vec::new(),
            command_entry: Some("check".to_string()),
            env: HashMap::new(),
        };
        let args = engine.interactive_args(Path::new("/work/foo.psl"));
        assert_eq!(args, vec!["/opt/psl/analyze.psl", "/work/foo.psl"]);
    }

    #[test]
    fn test_hover_markdown_with_type_and_call() {
        let result = QueryResult::new(
            "#object".to_string(),
            Some(SymbolInfo {
                name: "Foo::Bar".to_string(),
                src: "foo.psl:2:3".to_string(),
            }),
            Some(SymbolInfo {
                name: "baz".to_string(),
                src: "foo.psl:7:1".to_string(),
            }),
        );
        let markdown = result.hover_markdown().expect("should produce markdown");
        assert!(markdown.contains("Foo::Bar"));
        assert!(markdown.contains("#object"));
        assert!(markdown.contains("foo.psl:7:1"));
    }

    #[test]
    fn test_hover_markdown_empty_result() {
        let result = QueryResult::new("#none".to_string(), None, None);
        assert!(result.hover_markdown().is_none());
    }
}
