//! Session state machines: the interactive query session and the
//! one-shot validation run driver.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

use crate::error::{QueryError, SpawnError};
use crate::parse;
use crate::process::{ProcessEvent, ProcessHandle};
use crate::types::{AnalysisEvent, DocumentId, ResolvedEngine};

/// Interactive session state. `Closed` is modeled as removal from the
/// registry, not as a variant — a session that exists is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    Busy,
    Exited,
}

/// Long-lived engine process answering position queries for one document.
///
/// The wire protocol has no correlation identifiers, so requests and
/// responses must strictly alternate. The caller enforces this by holding the
/// per-document session lock across [`InteractiveSession::roundtrip`].
pub(crate) struct InteractiveSession {
    handle: ProcessHandle,
    state: SessionState,
    /// Responses the engine still owes for timed-out queries. The wire has
    /// no correlation ids, so this count is the only way to tell an overdue
    /// reply from the current query's reply.
    stale_owed: u32,
}

impl InteractiveSession {
    pub fn spawn(engine: &ResolvedEngine, target: &Path) -> Result<Self, SpawnError> {
        let args = engine.interactive_args(target);
        let cwd = target.parent().unwrap_or_else(|| Path::new("."));
        let handle = ProcessHandle::spawn(engine.exe(), &args, cwd, engine.env())?;
        tracing::info!(
            pid = handle.id(),
            target = %target.display(),
            "spawned interactive analysis session"
        );
        Ok(Self {
            handle,
            state: SessionState::Ready,
            stale_owed: 0,
        })
    }

    pub fn is_exited(&self) -> bool {
        self.state == SessionState::Exited
    }

    /// Write one query line and await exactly one response line.
    ///
    /// On timeout the session stays alive — the process may still answer the
    /// next query — but the overdue response belongs to no query. Each
    /// timeout bumps `stale_owed`, and that many stdout lines are discarded
    /// before any line is accepted as a reply, whether they were already
    /// buffered when the next query starts or arrive while it waits.
    pub async fn roundtrip(
        &mut self,
        query_line: &str,
        deadline: Duration,
    ) -> Result<String, QueryError> {
        self.drain_stale();
        if let Err(e) = self.handle.write_line(query_line).await {
            self.state = SessionState::Exited;
            return Err(e.into());
        }
        self.state = SessionState::Busy;

        let started = Instant::now();
        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            let event = match timeout(remaining, self.handle.next_event()).await {
                Ok(event) => event,
                Err(_) => {
                    self.state = SessionState::Ready;
                    // The reply for this query is now owed too.
                    self.stale_owed += 1;
                    return Err(QueryError::Timeout(deadline));
                }
            };
            match event {
                ProcessEvent::Stdout(line) => {
                    if self.stale_owed > 0 {
                        self.stale_owed -= 1;
                        tracing::warn!("discarding stale engine response: {line}");
                        continue;
                    }
                    self.state = SessionState::Ready;
                    return Ok(line);
                }
                ProcessEvent::Stderr(line) => {
                    tracing::debug!("interactive session stderr: {line}");
                }
                ProcessEvent::Exited(code) => {
                    self.state = SessionState::Exited;
                    return Err(QueryError::EngineExited(code));
                }
            }
        }
    }

    /// Discard output left behind by timed-out queries that has already
    /// arrived. Anything still owed but not yet buffered is discarded by the
    /// `stale_owed` check in the read loop instead.
    fn drain_stale(&mut self) {
        while let Some(event) = self.handle.try_next_event() {
            match event {
                ProcessEvent::Stdout(line) => {
                    self.stale_owed = self.stale_owed.saturating_sub(1);
                    tracing::warn!("discarding stale engine response: {line}");
                }
                ProcessEvent::Stderr(line) => {
                    tracing::debug!("interactive session stderr: {line}");
                }
                ProcessEvent::Exited(code) => {
                    tracing::debug!(?code, "interactive session already exited");
                    self.state = SessionState::Exited;
                }
            }
        }
    }

    pub async fn release(self) {
        self.handle.release().await;
    }
}

/// Handle to an in-flight validation run, held in the registry so a newer
/// run (or close) can supersede it.
pub(crate) struct ValidationRun {
    pub(crate) cancel: oneshot::Sender<()>,
    pub(crate) task: JoinHandle<()>,
}

/// Drive one validation process to completion and emit its diagnostics.
///
/// Runs as its own task. A superseded prior run is cancelled and awaited
/// first, so two validation processes for the same document never overlap.
/// Cancellation (newer edit, or document close) kills the process and emits
/// nothing — diagnostics from a stale run are worthless.
pub(crate) async fn run_validation(
    engine: Arc<ResolvedEngine>,
    document: DocumentId,
    context: Option<String>,
    event_tx: mpsc::Sender<AnalysisEvent>,
    mut cancel: oneshot::Receiver<()>,
    prior: Option<ValidationRun>,
) {
    if let Some(prior) = prior {
        let _ = prior.cancel.send(());
        let _ = prior.task.await;
    }

    let target = document.path().to_path_buf();
    let args = engine.validation_args(&target);
    let cwd = target
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let mut handle = match ProcessHandle::spawn(engine.exe(), &args, &cwd, engine.env()) {
        Ok(handle) => handle,
        Err(e) => {
            // Best-effort feature: log once, emit nothing.
            tracing::warn!(document = %document, "validation spawn failed: {e}");
            return;
        }
    };
    tracing::debug!(
        pid = handle.id(),
        document = %document,
        "spawned validation run"
    );

    // The feed itself must be cancellable: an engine that never reads its
    // stdin would otherwise block the write once the pipe fills, and with it
    // every close waiting on this task.
    if let Some(context) = &context {
        let cancelled = tokio::select! {
            _ = &mut cancel => true,
            () = feed_context(&mut handle, context) => false,
        };
        if cancelled {
            tracing::debug!(document = %document, "validation run superseded or closed during context feed");
            handle.release().await;
            return;
        }
    }
    handle.close_stdin();

    let mut captured = String::new();
    loop {
        tokio::select! {
            _ = &mut cancel => {
                tracing::debug!(document = %document, "validation run superseded or closed");
                handle.release().await;
                return;
            }
            event = handle.next_event() => match event {
                ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => {
                    captured.push_str(&line);
                    captured.push('\n');
                }
                ProcessEvent::Exited(code) => {
                    // A non-zero exit is normal when the document has errors;
                    // whatever output was captured still gets parsed.
                    if code != Some(0) {
                        tracing::debug!(document = %document, ?code, "validation process exit status");
                    }
                    break;
                }
            }
        }
    }

    // The document may have been closed while the process was exiting; a
    // dropped cancel sender means nobody wants this run's diagnostics.
    if !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
        return;
    }

    let items = parse::parse_output(&captured, &target);
    tracing::debug!(document = %document, count = items.len(), "validation diagnostics ready");
    let _ = event_tx.send(AnalysisEvent::Diagnostics { document, items }).await;
}

/// Write the document context to the process stdin, line by line. A failed
/// write means the process is gone; the run loop will see the exit.
async fn feed_context(handle: &mut ProcessHandle, context: &str) {
    for line in context.lines() {
        if handle.write_line(line).await.is_err() {
            break;
        }
    }
}
