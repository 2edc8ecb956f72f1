//! SessionManager facade — public API consumed by the editor-protocol layer.
//!
//! Owns the document registry: per document, one optional in-flight
//! validation run and one optional interactive session. Operations for
//! different documents proceed independently; within one document the
//! validation path and the interactive path are independent, but each path
//! serializes internally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc, oneshot};

use crate::codec;
use crate::debounce::Debouncer;
use crate::error::{ManagerError, QueryError};
use crate::session::{self, InteractiveSession, ValidationRun};
use crate::types::{AnalysisEvent, DocumentId, EngineConfig, QueryResult, ResolvedEngine};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry entry for one open document.
struct DocumentEntry {
    /// In-flight validation run, if any. Replaced (superseded) by newer runs.
    validation: Option<ValidationRun>,
    /// Interactive session slot. The mutex is the single-outstanding-query
    /// discipline: whoever holds it owns the wire until the response line is
    /// consumed.
    interactive: Arc<Mutex<Option<InteractiveSession>>>,
    /// Signalled once on close so an in-flight query resolves as cancelled
    /// instead of waiting out its timeout.
    closed: Arc<Notify>,
}

impl DocumentEntry {
    fn new() -> Self {
        Self {
            validation: None,
            interactive: Arc::new(Mutex::new(None)),
            closed: Arc::new(Notify::new()),
        }
    }
}

/// Facade over the analysis subsystem.
///
/// Constructed via [`SessionManager::start`], which resolves the external
/// engine once. A missing or misconfigured engine leaves the manager
/// disabled: every operation degrades to a no-op and the editor simply stops
/// seeing diagnostics and hovers.
pub struct SessionManager {
    engine: Option<Arc<ResolvedEngine>>,
    query_timeout: Duration,
    documents: Mutex<HashMap<DocumentId, DocumentEntry>>,
    debouncer: Mutex<Debouncer>,
    event_tx: mpsc::Sender<AnalysisEvent>,
}

impl SessionManager {
    /// Build the manager and the event stream diagnostics are pushed on.
    #[must_use]
    pub fn start(config: &EngineConfig) -> (Self, mpsc::Receiver<AnalysisEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let engine = if config.enabled {
            match config.resolve() {
                Ok(engine) => {
                    tracing::info!(exe = %engine.exe().display(), "analysis engine resolved");
                    Some(Arc::new(engine))
                }
                Err(e) => {
                    tracing::warn!("analysis engine unavailable, diagnostics and hover disabled: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let manager = Self {
            engine,
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            documents: Mutex::new(HashMap::new()),
            debouncer: Mutex::new(Debouncer::new(Duration::from_millis(config.debounce_ms))),
            event_tx,
        };
        (manager, event_rx)
    }

    /// Whether the engine resolved at startup.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Register a document. Idempotent; sessions are spawned lazily later.
    pub async fn open(&self, document: &DocumentId) {
        let mut docs = self.documents.lock().await;
        docs.entry(document.clone()).or_insert_with(DocumentEntry::new);
    }

    /// Fire-and-forget validation of an open document.
    ///
    /// Debounced per document; an admitted run supersedes (kills) any prior
    /// run still in flight. Diagnostics arrive on the event channel once the
    /// run's process has exited; spawn failures are logged and emit nothing.
    pub async fn validate(
        &self,
        document: &DocumentId,
        context: Option<String>,
    ) -> Result<(), ManagerError> {
        let Some(engine) = self.engine.clone() else {
            return Ok(());
        };

        let mut docs = self.documents.lock().await;
        let Some(entry) = docs.get_mut(document) else {
            return Err(ManagerError::UnknownDocument(document.clone()));
        };

        if !self.debouncer.lock().await.admit(document) {
            tracing::trace!(document = %document, "validation debounced");
            return Ok(());
        }

        let prior = entry.validation.take();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(session::run_validation(
            engine,
            document.clone(),
            context,
            self.event_tx.clone(),
            cancel_rx,
            prior,
        ));
        entry.validation = Some(ValidationRun {
            cancel: cancel_tx,
            task,
        });
        Ok(())
    }

    /// Best-effort position query (1-based line/column).
    ///
    /// Lazily spawns the interactive session, or respawns it if the previous
    /// one exited. Every engine-side failure — spawn, timeout, crash,
    /// undecodable response — maps to `Ok(None)` with a log line; the editor
    /// never sees a hard error for engine trouble.
    pub async fn query(
        &self,
        document: &DocumentId,
        line: u32,
        col: u32,
    ) -> Result<Option<QueryResult>, ManagerError> {
        let Some(engine) = self.engine.clone() else {
            return Ok(None);
        };

        let (slot, closed) = {
            let docs = self.documents.lock().await;
            let Some(entry) = docs.get(document) else {
                return Err(ManagerError::UnknownDocument(document.clone()));
            };
            (Arc::clone(&entry.interactive), Arc::clone(&entry.closed))
        };

        // Holding the slot lock across write + read is the alternation rule:
        // the protocol has no request ids, so a second query must wait until
        // the first's response line has been consumed.
        let mut guard = slot.lock().await;

        // The document may have been closed while we waited for the slot.
        if !self.documents.lock().await.contains_key(document) {
            return Err(ManagerError::UnknownDocument(document.clone()));
        }

        if guard.as_ref().is_none_or(InteractiveSession::is_exited) {
            if let Some(old) = guard.take() {
                old.release().await;
            }
            match InteractiveSession::spawn(&engine, document.path()) {
                Ok(session) => *guard = Some(session),
                Err(e) => {
                    tracing::warn!(document = %document, "interactive session spawn failed: {e}");
                    return Ok(None);
                }
            }
        }
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };

        let query_line = codec::encode_query(document.basename(), line, col);
        let outcome = tokio::select! {
            outcome = session.roundtrip(&query_line, self.query_timeout) => outcome,
            () = closed.notified() => Err(QueryError::Cancelled),
        };

        match outcome {
            Ok(response) => match codec::decode_response(&response) {
                Ok(result) => Ok(result),
                Err(e) => {
                    tracing::warn!(document = %document, "undecodable engine response: {e}");
                    Ok(None)
                }
            },
            Err(e) => {
                tracing::warn!(document = %document, "query failed: {e}");
                Ok(None)
            }
        }
    }

    /// Tear down both sessions for a document and forget it. Idempotent —
    /// closing a document with no active sessions is a no-op.
    pub async fn close(&self, document: &DocumentId) {
        let entry = { self.documents.lock().await.remove(document) };
        self.debouncer.lock().await.forget(document);
        let Some(entry) = entry else {
            return;
        };

        if let Some(run) = entry.validation {
            let _ = run.cancel.send(());
            let _ = run.task.await;
        }

        // Resolve any in-flight query as cancelled, then take the session
        // once the wire is free.
        entry.closed.notify_one();
        let mut slot = entry.interactive.lock().await;
        if let Some(session) = slot.take() {
            session.release().await;
        }
        tracing::debug!(document = %document, "document sessions closed");
    }

    /// Close every open document.
    pub async fn shutdown(&self) {
        let open: Vec<DocumentId> = self.documents.lock().await.keys().cloned().collect();
        for document in open {
            self.close(&document).await;
        }
    }
}
