//! Validation output parser — raw engine text to structured diagnostics.
//!
//! The engine writes human-readable lines of the form
//! `<file>:<line>:<col>: (Error|Warning): <message>` with 1-based positions.
//! Lines for files other than the validated target are dropped: the engine
//! reports diagnostics for everything it transitively loads.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Diagnostic, Severity, normalize_path};

static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<file>.+?):(?<line>\d+):(?<col>\d+):\s*(?<sev>Error|Warning):\s*(?<msg>.*)$")
        .expect("diagnostic line pattern is valid")
});

/// Parse the complete captured output of one validation run.
///
/// Only called after process exit — diagnostics always reflect a full run,
/// never partial output.
pub(crate) fn parse_output(output: &str, target: &Path) -> Vec<Diagnostic> {
    let target = normalize_path(target);
    let base_dir = target.parent();

    let mut items = Vec::new();
    for raw in output.lines() {
        let Some(caps) = DIAGNOSTIC_LINE.captures(raw) else {
            continue;
        };
        if !refers_to_target(Path::new(&caps["file"]), base_dir, &target) {
            continue;
        }
        let (Ok(line), Ok(col)) = (caps["line"].parse::<u32>(), caps["col"].parse::<u32>()) else {
            continue;
        };
        let severity = if &caps["sev"] == "Error" {
            Severity::Error
        } else {
            Severity::Warning
        };
        // 1-based in, 0-based half-open range of length 1 out.
        let line0 = line.saturating_sub(1);
        let col0 = col.saturating_sub(1);
        items.push(Diagnostic::new(
            severity,
            caps["msg"].trim_end().to_string(),
            line0,
            col0,
            col0 + 1,
        ));
    }
    items
}

/// Whether a reported file path resolves to the validated target. Relative
/// paths resolve against the target's directory, matching the working
/// directory validation runs are spawned with.
fn refers_to_target(file: &Path, base_dir: Option<&Path>, target: &Path) -> bool {
    let resolved = if file.is_absolute() {
        normalize_path(file)
    } else if let Some(dir) = base_dir {
        normalize_path(&dir.join(file))
    } else {
        normalize_path(file)
    };
    resolved == *target
}
