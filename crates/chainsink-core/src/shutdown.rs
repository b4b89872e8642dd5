//! Idempotent shutdown signalling shared by the sink and its host process.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Why the sink is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Graceful stop (signal, end of range, end of stream).
    Requested,
    /// An unrecoverable error; the cursor must not be persisted.
    Failed(String),
}

impl ShutdownCause {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Cloneable shutdown handle. The first trigger wins; later ones are no-ops.
#[derive(Debug, Clone, Default)]
pub struct Shutter {
    token: CancellationToken,
    cause: Arc<Mutex<Option<ShutdownCause>>>,
}

impl Shutter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shutdown. Returns `true` if this call was the first trigger.
    pub fn shutdown(&self, cause: ShutdownCause) -> bool {
        let mut slot = self.cause.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        tracing::info!(cause = ?cause, "shutdown triggered");
        *slot = Some(cause);
        self.token.cancel();
        true
    }

    /// Returns `true` once shutdown has been triggered.
    pub fn is_terminating(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn terminating(&self) {
        self.token.cancelled().await
    }

    /// The winning cause, if shutdown was triggered.
    pub fn cause(&self) -> Option<ShutdownCause> {
        self.cause.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_trigger_wins() {
        let shutter = Shutter::new();
        assert!(shutter.cause().is_none());

        assert!(shutter.shutdown(ShutdownCause::Failed("boom".into())));
        assert!(!shutter.shutdown(ShutdownCause::Requested));

        assert!(shutter.is_terminating());
        assert_eq!(shutter.cause(), Some(ShutdownCause::Failed("boom".into())));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let shutter = Shutter::new();
        let remote = shutter.clone();

        let waiter = tokio::spawn(async move {
            remote.terminating().await;
            remote.cause()
        });

        shutter.shutdown(ShutdownCause::Requested);
        let cause = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should wake up")
            .expect("waiter should not panic");
        assert_eq!(cause, Some(ShutdownCause::Requested));
    }
}
