use thiserror::Error;

/// A single render attempt failed before the pipeline could finish.
///
/// Covers navigation timeout, DNS failure, proxy auth rejection and
/// browser crashes. The orchestrator converts these into retry decisions.
#[derive(Debug, Error)]
#[error("attempt {attempt} failed: {cause}")]
pub struct NavigationError {
    pub attempt: usize,
    pub cause: String,
}

impl NavigationError {
    pub fn new(attempt: usize, cause: impl Into<String>) -> Self {
        Self {
            attempt,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Missing or malformed URL. Fails fast, never retried, maps to 400.
    #[error("invalid input: {0}")]
    Input(String),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    /// Retry ceiling reached. Carries the last underlying cause.
    #[error("all {attempts} attempts failed, last error: {last_error}")]
    Exhausted { attempts: usize, last_error: String },
}
