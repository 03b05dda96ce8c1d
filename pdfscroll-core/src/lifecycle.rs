//! Document lifecycle: at most one live document, generation-checked loads.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::backend::{CancelToken, DocumentBackend, DocumentProvider, LoadOptions};
use crate::error::{Result, ViewerError};
use crate::metadata::DocumentMetadata;
use crate::source::SourceDescriptor;
use crate::{worker, DocumentInfo, EventLog, ViewerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready(DocumentInfo),
    Error(ViewerError),
}

impl LoadState {
    pub fn phase(&self) -> LoadPhase {
        match self {
            LoadState::Idle => LoadPhase::Idle,
            LoadState::Loading => LoadPhase::Loading,
            LoadState::Ready(_) => LoadPhase::Ready,
            LoadState::Error(_) => LoadPhase::Error,
        }
    }
}

/// A committed document. Clones share the same engine handle; the
/// controller alone decides when it is destroyed.
#[derive(Clone)]
pub struct LoadedDocument {
    generation: u64,
    backend: Arc<dyn DocumentBackend>,
    info: DocumentInfo,
}

impl LoadedDocument {
    /// Generation of the load that produced this document; unique per
    /// controller.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn backend(&self) -> &Arc<dyn DocumentBackend> {
        &self.backend
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn is_same_handle(&self, other: &LoadedDocument) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl std::fmt::Debug for LoadedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedDocument")
            .field("generation", &self.generation)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Ready(LoadedDocument),
    Failed(ViewerError),
    /// Superseded by a newer load; the result was discarded.
    Stale,
}

#[derive(Clone)]
struct LoadRequest {
    source: SourceDescriptor,
    options: LoadOptions,
}

struct ControllerState {
    generation: u64,
    in_flight: Option<CancelToken>,
    document: Option<LoadedDocument>,
    last_request: Option<LoadRequest>,
    state: LoadState,
}

struct Shared {
    provider: Arc<dyn DocumentProvider>,
    state: Mutex<ControllerState>,
    events: EventLog,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }
}

/// Owns the live document across the viewer's lifetime.
pub struct DocumentController {
    shared: Arc<Shared>,
}

impl DocumentController {
    pub fn new(provider: Arc<dyn DocumentProvider>, events: EventLog) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                state: Mutex::new(ControllerState {
                    generation: 0,
                    in_flight: None,
                    document: None,
                    last_request: None,
                    state: LoadState::Idle,
                }),
                events,
            }),
        }
    }

    /// Starts a new load, cancelling any in-flight load and destroying the
    /// committed document. Drive the returned task to completion with
    /// [`LoadTask::settle`].
    pub fn load(&self, source: SourceDescriptor, options: LoadOptions) -> LoadTask {
        if let Some(path) = options.worker_src.as_deref() {
            worker::configure(path);
        }

        let request = LoadRequest { source, options };
        let cancel = CancelToken::new();
        let (generation, superseded, retired) = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            let superseded = state.in_flight.replace(cancel.clone());
            let retired = state.document.take();
            state.last_request = Some(request.clone());
            state.state = LoadState::Loading;
            (state.generation, superseded, retired)
        };

        if let Some(token) = superseded {
            token.cancel();
        }
        if let Some(document) = retired {
            destroy_quietly(document.backend.as_ref(), document.generation);
        }
        self.shared
            .events
            .push(ViewerEvent::StateChanged(LoadPhase::Loading));
        debug!(generation, kind = ?request.source.kind(), "load started");

        LoadTask {
            shared: Arc::clone(&self.shared),
            generation,
            cancel,
            request,
        }
    }

    /// Repeats the last load with the same source and options.
    pub fn reload(&self) -> Result<LoadTask> {
        let request = self
            .shared
            .state
            .lock()
            .last_request
            .clone()
            .ok_or(ViewerError::NoDocument)?;
        Ok(self.load(request.source, request.options))
    }

    /// Like [`reload`](Self::reload) but with a password, for retrying after
    /// [`ViewerError::PasswordRequired`].
    pub fn reload_with_password(&self, password: impl Into<String>) -> Result<LoadTask> {
        let request = self
            .shared
            .state
            .lock()
            .last_request
            .clone()
            .ok_or(ViewerError::NoDocument)?;
        Ok(self.load(request.source, request.options.with_password(password)))
    }

    pub fn state(&self) -> LoadState {
        self.shared.state.lock().state.clone()
    }

    pub fn document(&self) -> Option<LoadedDocument> {
        self.shared.state.lock().document.clone()
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.shared.is_current(generation)
    }

    /// Cancels any in-flight load and destroys the committed document.
    /// Observers see `Idle` unless the controller was already idle.
    pub fn teardown(&self) {
        let (superseded, retired, was_idle) = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            let previous = std::mem::replace(&mut state.state, LoadState::Idle);
            (
                state.in_flight.take(),
                state.document.take(),
                previous == LoadState::Idle,
            )
        };
        if let Some(token) = superseded {
            token.cancel();
        }
        if let Some(document) = retired {
            destroy_quietly(document.backend.as_ref(), document.generation);
        }
        if !was_idle {
            self.shared
                .events
                .push(ViewerEvent::StateChanged(LoadPhase::Idle));
        }
    }
}

impl Drop for DocumentController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// One load attempt, tagged with the generation it was started under.
pub struct LoadTask {
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancelToken,
    request: LoadRequest,
}

impl LoadTask {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs open → metadata, checking for staleness between stages, then
    /// commits or discards the result.
    #[instrument(skip(self), fields(generation = self.generation))]
    pub async fn settle(self) -> LoadOutcome {
        let LoadTask {
            shared,
            generation,
            cancel,
            request,
        } = self;

        let opened = shared
            .provider
            .open(&request.source, &request.options, &cancel)
            .await;

        let backend = match opened {
            Ok(backend) => backend,
            Err(err) => return fail(&shared, generation, err),
        };

        if !shared.is_current(generation) {
            debug!("discarding superseded document");
            destroy_quietly(backend.as_ref(), generation);
            return LoadOutcome::Stale;
        }

        let metadata = match backend.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(%err, "failed to read document metadata");
                DocumentMetadata::default()
            }
        };

        let info = DocumentInfo {
            num_pages: backend.page_count(),
            fingerprints: backend.fingerprints(),
            metadata,
        };
        commit(&shared, generation, backend, info)
    }
}

fn commit(
    shared: &Shared,
    generation: u64,
    backend: Arc<dyn DocumentBackend>,
    info: DocumentInfo,
) -> LoadOutcome {
    let document = LoadedDocument {
        generation,
        backend,
        info: info.clone(),
    };

    let retired = {
        let mut state = shared.state.lock();
        if state.generation != generation {
            None
        } else {
            let retired = state.document.replace(document.clone());
            state.in_flight = None;
            state.state = LoadState::Ready(info.clone());
            Some(retired)
        }
    };

    let Some(retired) = retired else {
        debug!("discarding superseded document");
        destroy_quietly(document.backend.as_ref(), generation);
        return LoadOutcome::Stale;
    };
    if let Some(previous) = retired {
        destroy_quietly(previous.backend.as_ref(), previous.generation);
    }

    info!(
        pages = info.num_pages,
        fingerprint = info.primary_fingerprint().unwrap_or("-"),
        "document ready"
    );
    shared
        .events
        .push(ViewerEvent::StateChanged(LoadPhase::Ready));
    shared.events.push(ViewerEvent::DocumentLoaded(info));
    LoadOutcome::Ready(document)
}

fn fail(shared: &Shared, generation: u64, err: ViewerError) -> LoadOutcome {
    {
        let mut state = shared.state.lock();
        if state.generation != generation {
            debug!(%err, "ignoring failure of superseded load");
            return LoadOutcome::Stale;
        }
        state.in_flight = None;
        state.state = LoadState::Error(err.clone());
    }

    warn!(%err, "document load failed");
    shared
        .events
        .push(ViewerEvent::StateChanged(LoadPhase::Error));
    shared.events.push(ViewerEvent::LoadFailed(err.clone()));
    if let ViewerError::PasswordRequired { incorrect } = err {
        shared
            .events
            .push(ViewerEvent::PasswordRequired { incorrect });
    }
    LoadOutcome::Failed(err)
}

fn destroy_quietly(backend: &dyn DocumentBackend, generation: u64) {
    if let Err(err) = backend.destroy() {
        warn!(%err, generation, "failed to destroy document");
    }
}
