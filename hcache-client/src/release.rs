//! # Scoped Connection Release
//!
//! Purpose: Guarantee that a leased connection is closed exactly once when
//! the call that leased it leaves scope, whatever the exit path: success,
//! error, panic, or the caller dropping the future.
//!
//! Close failures are logged through the injected dispatcher and never
//! reach the caller.

use tracing::{error, Dispatch};

use hcache_common::{CacheError, CacheResult, Command};

use crate::pool::Connection;
use crate::resp::RespValue;

/// Owns a leased connection for the duration of one call.
pub(crate) struct ReleaseGuard<C: Connection> {
    conn: Option<C>,
    command: &'static str,
    dispatch: Dispatch,
}

impl<C: Connection> ReleaseGuard<C> {
    pub(crate) fn new(conn: C, command: &'static str, dispatch: Dispatch) -> Self {
        ReleaseGuard {
            conn: Some(conn),
            command,
            dispatch,
        }
    }

    pub(crate) async fn exec(&mut self, command: &Command) -> CacheResult<RespValue> {
        let conn = self.conn.as_mut().ok_or(CacheError::ConnectionBroken)?;
        conn.exec(command).await
    }
}

impl<C: Connection> Drop for ReleaseGuard<C> {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if let Err(err) = conn.close() {
            let command = self.command;
            tracing::dispatcher::with_default(&self.dispatch, || {
                error!(command, error = %err, "failed to close cache connection");
            });
        }
    }
}
