use thiserror::Error;

pub type Result<T> = std::result::Result<T, ViewerError>;

/// Errors surfaced by the viewer core.
///
/// The type is `Clone` so a failed load can be kept inside the observable
/// [`LoadState`](crate::LoadState).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewerError {
    #[error("invalid source type: {0}")]
    InvalidSource(String),
    #[error("invalid embedded document data: {0}")]
    InvalidEmbeddedData(String),
    #[error("failed to fetch document: {0}")]
    Transport(String),
    #[error("failed to parse document: {0}")]
    Parse(String),
    #[error("{}", password_message(.incorrect))]
    PasswordRequired { incorrect: bool },
    #[error("rendering cancelled")]
    RenderCancelled,
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: usize, page_count: usize },
    #[error("invalid rotation {0}; expected one of 0, 90, 180, 270")]
    InvalidRotation(i32),
    #[error("no document is loaded")]
    NoDocument,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn password_message(incorrect: &bool) -> &'static str {
    if *incorrect {
        "incorrect password"
    } else {
        "password required"
    }
}

impl ViewerError {
    /// Cancelled renders are expected churn and never reported as failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ViewerError::RenderCancelled)
    }

    pub fn is_password_required(&self) -> bool {
        matches!(self, ViewerError::PasswordRequired { .. })
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        ViewerError::Backend(err.to_string())
    }
}

impl From<anyhow::Error> for ViewerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ViewerError>() {
            Ok(inner) => inner,
            Err(other) => ViewerError::Backend(format!("{other:#}")),
        }
    }
}
