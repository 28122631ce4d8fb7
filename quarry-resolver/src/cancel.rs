//! Cooperative cancellation for resolution calls.
//!
//! Cancelling never interrupts a request already on the wire. The scheduler
//! checks the token before starting each operation, so cancellation only
//! stops new dispatch.

use std::sync::Arc;

use tokio::sync::watch;

/// Read side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

/// Write side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// A token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Signal cancellation to every token. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_is_not_cancelled() {
        assert!(!CancelToken::never().is_cancelled());
        assert!(!CancelToken::default().is_cancelled());
    }

    #[test]
    fn test_cancel_reaches_all_tokens() {
        let handle = CancelHandle::new();
        let first = handle.token();
        let second = first.clone();
        assert!(!first.is_cancelled());

        handle.cancel();
        handle.cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_token_outlives_handle() {
        let handle = CancelHandle::new();
        let token = handle.token();
        handle.cancel();
        drop(handle);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_token_taken_after_cancel_sees_it() {
        let handle = CancelHandle::new();
        handle.cancel();
        assert!(handle.token().is_cancelled());
    }
}
