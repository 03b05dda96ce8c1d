//! Process-wide engine initialisation.
//!
//! The engine library location is configured once; the first caller wins and
//! later calls with a different location are ignored until [`reset`].

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

static WORKER_SOURCE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Records `path` as the engine location. Returns `true` when this call set
/// it (or it was already set to the same path).
pub fn configure(path: &Path) -> bool {
    let mut slot = WORKER_SOURCE.lock();
    match slot.as_deref() {
        None => {
            *slot = Some(path.to_path_buf());
            true
        }
        Some(existing) if existing == path => true,
        Some(existing) => {
            debug!(
                requested = %path.display(),
                active = %existing.display(),
                "worker already initialised; ignoring new source"
            );
            false
        }
    }
}

pub fn source() -> Option<PathBuf> {
    WORKER_SOURCE.lock().clone()
}

pub fn reset() {
    WORKER_SOURCE.lock().take();
}

#[cfg(test)]
pub(crate) static TEST_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
