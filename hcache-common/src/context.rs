//! # Cancellation Context
//!
//! Purpose: Carry a caller's cancellation signal and deadline into every
//! blocking step of a cache call.
//!
//! ## Design Principles
//! 1. **Tree of Tokens**: children inherit parent cancellation; cancelling a
//!    child never touches the parent.
//! 2. **Monotonic Deadlines**: a child deadline is never later than its parent's.
//! 3. **Scoped Release**: `cancel_on_drop` ties the derived token's lifetime to
//!    a stack frame instead of a global cleanup list.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ContextError;

/// Cancellation token plus optional deadline.
///
/// Cloning is cheap and clones share the same token.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Root context: never cancelled, no deadline.
    pub fn background() -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a child that can be cancelled independently of this context.
    pub fn with_cancel(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child whose deadline is `now + timeout`, capped by this
    /// context's own deadline. A timeout too large to represent as an
    /// instant adds no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Derives a child with the earlier of `deadline` and this context's deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Context {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Returns the deadline, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once this context (or a parent) was cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns why the context is done, or `None` while it is still live.
    ///
    /// Cancellation is reported ahead of an elapsed deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Returns a guard that cancels this context when dropped.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}
