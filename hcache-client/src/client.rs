//! # Cache Client API
//!
//! Purpose: Expose a small, uniform set of cache operations while hiding
//! pooling, timeouts and the wire protocol from callers.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling and protocol details.
//! 2. **One Lease per Call**: every operation leases a connection, sends
//!    exactly one command, and releases the connection before returning.
//! 3. **Scoped Release**: the connection and the bounded acquisition context
//!    are released by guards on the call's own stack frame.
//! 4. **Injected Logging**: release failures go to the dispatcher captured at
//!    construction (or injected with `with_dispatch`), never to the caller.
//!
//! ## Execution Protocol
//!
//! ```text
//! ctx ──with_timeout(connection_timeout)──> bounded   (cancelled on drop)
//!          │
//!          └─ pool.acquire(&bounded) ──err──> CacheError::Acquire
//!                 │
//!                 └─ ReleaseGuard(conn)   (closed on drop, failure logged)
//!                        │
//!                        └─ exec(command) ──> decode reply
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::Dispatch;

use hcache_common::{CacheError, CacheResult, Command, Context, FieldMap};

use crate::pool::{Pool, PoolConfig, RespPool};
use crate::release::ReleaseGuard;
use crate::resp::RespValue;

/// Uniform cache operations.
///
/// Every method takes the caller's [`Context`]; cancelling it before a
/// connection is leased fails the call without sending anything.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stores `value` under `key`.
    async fn set(&self, ctx: &Context, key: &[u8], value: &[u8]) -> CacheResult<()>;

    /// Stores every field/value pair of `fields` in the hash at `key`.
    async fn hset(&self, ctx: &Context, key: &[u8], fields: &FieldMap) -> CacheResult<()>;

    /// Fetches the value at `key`.
    ///
    /// Returns `Ok(None)` when the key is missing; an empty stored value is
    /// `Ok(Some(vec![]))`.
    async fn get(&self, ctx: &Context, key: &[u8]) -> CacheResult<Option<Vec<u8>>>;

    /// Fetches the hash at `key` flattened as `field, value, field, value, ...`.
    ///
    /// An empty result means no hash exists at `key`.
    async fn hget_all(&self, ctx: &Context, key: &[u8]) -> CacheResult<Vec<Vec<u8>>>;

    /// Sets a time-to-live on `key`, truncated to whole seconds.
    /// Returns true when the TTL was set.
    async fn expire(&self, ctx: &Context, key: &[u8], expiration: Duration) -> CacheResult<bool>;

    /// Liveness check.
    async fn ping(&self, ctx: &Context) -> CacheResult<()>;
}

/// Configuration for the client and its TCP pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum connections leased at the same time.
    pub max_active: usize,
    /// Wait for a free connection instead of failing fast.
    pub wait: bool,
    /// Upper bound on acquiring a connection for one call.
    pub connection_timeout: Duration,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        ClientConfig {
            addr: pool.addr,
            max_idle: pool.max_idle,
            max_active: pool.max_active,
            wait: pool.wait,
            connection_timeout: Duration::from_secs(1),
            read_timeout: pool.read_timeout,
            write_timeout: pool.write_timeout,
            connect_timeout: pool.connect_timeout,
        }
    }
}

impl ClientConfig {
    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            addr: self.addr.clone(),
            max_idle: self.max_idle,
            max_active: self.max_active,
            wait: self.wait,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Cache client over a shared connection pool.
///
/// Holds no per-call state, so one instance can serve concurrent callers.
#[derive(Clone)]
pub struct CacheClient<P> {
    pool: P,
    connection_timeout: Duration,
    dispatch: Dispatch,
}

impl<P: Pool> CacheClient<P> {
    /// Creates a client. Performs no I/O.
    ///
    /// Release failures are logged to the `tracing` dispatcher that is the
    /// default at this point.
    pub fn new(pool: P, connection_timeout: Duration) -> Self {
        CacheClient {
            pool,
            connection_timeout,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Replaces the dispatcher used for release-failure logging.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Returns the per-call acquisition timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    async fn execute(&self, ctx: &Context, command: &Command) -> CacheResult<RespValue> {
        let bounded = ctx.with_timeout(self.connection_timeout);
        // Declared before the connection guard so it is dropped after it.
        let _cancel = bounded.cancel_on_drop();

        let conn = self.pool.acquire(&bounded).await?;
        let mut conn = ReleaseGuard::new(conn, command.name(), self.dispatch.clone());
        // Bound to a local so the exec future, which borrows `conn`, is
        // dropped before the guard.
        let reply = conn.exec(command).await;
        reply
    }
}

impl CacheClient<RespPool> {
    /// Builds a TCP pool from `config` and wraps it in a client.
    pub fn connect(config: ClientConfig) -> Self {
        let pool = RespPool::new(config.pool_config());
        CacheClient::new(pool, config.connection_timeout)
    }
}

#[async_trait]
impl<P: Pool> Cache for CacheClient<P> {
    async fn set(&self, ctx: &Context, key: &[u8], value: &[u8]) -> CacheResult<()> {
        match self.execute(ctx, &Command::set(key, value)).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(CacheError::Server { message }),
            _ => Err(CacheError::UnexpectedResponse { command: "SET" }),
        }
    }

    async fn hset(&self, ctx: &Context, key: &[u8], fields: &FieldMap) -> CacheResult<()> {
        match self.execute(ctx, &Command::hset(key, fields)).await? {
            RespValue::Integer(_) => Ok(()),
            RespValue::Error(message) => Err(CacheError::Server { message }),
            _ => Err(CacheError::UnexpectedResponse { command: "HSET" }),
        }
    }

    async fn get(&self, ctx: &Context, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        match self.execute(ctx, &Command::get(key)).await? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(CacheError::Server { message }),
            _ => Err(CacheError::UnexpectedResponse { command: "GET" }),
        }
    }

    async fn hget_all(&self, ctx: &Context, key: &[u8]) -> CacheResult<Vec<Vec<u8>>> {
        match self.execute(ctx, &Command::hgetall(key)).await? {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(Some(data)) => Ok(data),
                    _ => Err(CacheError::UnexpectedResponse { command: "HGETALL" }),
                })
                .collect(),
            RespValue::Bulk(None) => Ok(Vec::new()),
            RespValue::Error(message) => Err(CacheError::Server { message }),
            _ => Err(CacheError::UnexpectedResponse { command: "HGETALL" }),
        }
    }

    async fn expire(&self, ctx: &Context, key: &[u8], expiration: Duration) -> CacheResult<bool> {
        match self.execute(ctx, &Command::expire(key, expiration)).await? {
            RespValue::Integer(value) => Ok(value == 1),
            RespValue::Error(message) => Err(CacheError::Server { message }),
            _ => Err(CacheError::UnexpectedResponse { command: "EXPIRE" }),
        }
    }

    async fn ping(&self, ctx: &Context) -> CacheResult<()> {
        match self.execute(ctx, &Command::ping()).await? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            RespValue::Error(message) => Err(CacheError::Server { message }),
            _ => Err(CacheError::UnexpectedResponse { command: "PING" }),
        }
    }
}

/// Rebuilds a field/value mapping from a flattened `HGETALL` reply.
///
/// Fails with a protocol error when the sequence has an odd length.
pub fn fields_from_flat(values: Vec<Vec<u8>>) -> CacheResult<FieldMap> {
    if values.len() % 2 != 0 {
        return Err(CacheError::Protocol);
    }
    let mut fields = FieldMap::new();
    let mut iter = values.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(field, value);
    }
    Ok(fields)
}
