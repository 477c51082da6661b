//! Operation context: cancellation and deadline for one lifecycle call

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Why an operation stopped before finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "cancelled"),
            Interrupted::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Cancellation signal and optional deadline carried by every controller call
///
/// Cancellation is a `watch` channel flipped to `true`; the daemon hands the
/// same receiver to every request so shutdown cancels in-flight work.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keep the earlier of the current and the given deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Interruption that has already happened, if any.
    pub fn interruption(&self) -> Option<Interrupted> {
        if self.cancel.as_ref().map_or(false, |rx| *rx.borrow()) {
            return Some(Interrupted::Cancelled);
        }
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            return Some(Interrupted::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub fn interrupted(&self) -> impl Future<Output = Interrupted> + Send + 'static {
        let cancel = self.cancel.clone();
        let deadline = self.deadline;

        async move {
            let cancelled = async move {
                match cancel {
                    Some(mut rx) => loop {
                        if *rx.borrow_and_update() {
                            break;
                        }
                        if rx.changed().await.is_err() {
                            // Sender gone: cancellation can no longer happen
                            std::future::pending::<()>().await;
                        }
                    },
                    None => std::future::pending::<()>().await,
                }
            };
            let expired = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancelled => Interrupted::Cancelled,
                _ = expired => Interrupted::DeadlineExceeded,
            }
        }
    }

    /// Drive `fut` unless the context is interrupted first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if let Some(interrupted) = self.interruption() {
            return Err(interrupted);
        }

        tokio::select! {
            biased;
            interrupted = self.interrupted() => Err(interrupted),
            output = fut => Ok(output),
        }
    }
}
