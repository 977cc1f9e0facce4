//! Per-run context threaded down the call chain instead of process globals.

use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// Identity and cancellation for one run. Cheap to clone; the token is
/// shared, so cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    cancel: CancellationToken,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Ulid::new().to_string().to_lowercase(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Token shared by every component of this run.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Derive a context scoped to one band. Cancelling the child does not
    /// cancel the run; cancelling the run cancels every child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
