//! # Error Taxonomy
//!
//! Purpose: Give callers one error type per failure class so they can tell
//! "could not get a connection" apart from "the store rejected the command".
//!
//! ## Design Principles
//! 1. **Layered Errors**: `ContextError` ⊂ `AcquireError` ⊂ `CacheError`.
//! 2. **No Silent Loss**: every acquisition and command failure surfaces to
//!    the caller; only release failures are absorbed (and logged) upstream.
//! 3. **Binary-Safe Messages**: server replies are kept as raw bytes.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Why a [`Context`](crate::Context) stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context (or one of its parents) was cancelled.
    #[error("context canceled")]
    Cancelled,
    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Failure to lease a connection from a pool.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Every lease is taken and the pool is configured not to wait.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// The pool was closed before or while waiting for a lease.
    #[error("connection pool closed")]
    PoolClosed,
    /// The bounded context was cancelled or timed out.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Dialling a new connection failed.
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
}

/// Errors surfaced by the cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No connection could be obtained; no command was sent.
    #[error("failed to connect to cache store: {0}")]
    Acquire(#[from] AcquireError),
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response to {command}")]
    UnexpectedResponse { command: &'static str },
    /// Connection failed earlier and was discarded instead of pooled.
    #[error("connection broken")]
    ConnectionBroken,
}

impl CacheError {
    /// Returns true when the call failed because a deadline or IO timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        match self {
            CacheError::Acquire(AcquireError::Context(ContextError::DeadlineExceeded)) => true,
            CacheError::Acquire(AcquireError::Connect(err)) | CacheError::Io(err) => {
                err.kind() == std::io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }

    /// Returns true when the caller's context was cancelled before a connection was leased.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CacheError::Acquire(AcquireError::Context(ContextError::Cancelled))
        )
    }
}
