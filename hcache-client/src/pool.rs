//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to the store and bound how many can be
//! leased at once, with acquisition limited by a caller's [`Context`].
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Leases as Permits**: A semaphore permit travels with every leased
//!    connection; returning the connection returns the permit.
//! 4. **Poison on Failure**: A connection that failed (or was abandoned)
//!    mid-command is never handed out again.
//!
//! ## Seams
//!
//! [`Pool`] and [`Connection`] are the only things `CacheClient` needs; the
//! TCP implementation below is one way to provide them.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use hcache_common::{AcquireError, CacheError, CacheResult, Command, Context};

use crate::resp::{encode_command, RespParser, RespValue};

/// A leased session with the store.
///
/// `close` consumes the connection, so it can be released at most once.
#[async_trait]
pub trait Connection: Send {
    /// Sends one command and waits for its reply.
    async fn exec(&mut self, command: &Command) -> CacheResult<RespValue>;

    /// Releases the connection back to its pool.
    ///
    /// Returns an error only when releasing itself failed. Discarding a
    /// connection that can no longer be reused is a successful release.
    fn close(self) -> CacheResult<()>;
}

/// Source of leased connections.
#[async_trait]
pub trait Pool: Send + Sync {
    type Conn: Connection;

    /// Leases a connection, giving up when `ctx` is cancelled or expires.
    async fn acquire(&self, ctx: &Context) -> Result<Self::Conn, AcquireError>;
}

/// Pool configuration for the TCP pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum number of connections leased at the same time.
    pub max_active: usize,
    /// Wait for a lease when all are taken instead of failing fast.
    pub wait: bool,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_active: 16,
            wait: true,
            read_timeout: Some(Duration::from_secs(1)),
            write_timeout: Some(Duration::from_secs(1)),
            connect_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently leased to callers.
    pub in_use: usize,
    /// Connections parked in the idle queue.
    pub idle: usize,
    /// Lease limit.
    pub max_active: usize,
}

struct PoolInner {
    config: PoolConfig,
    idle: Mutex<VecDeque<RespConnection>>,
    leases: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolInner {
    fn pop_idle(&self) -> Option<RespConnection> {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        idle.pop_front()
    }

    fn return_connection(&self, conn: RespConnection) {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        if idle.len() < self.config.max_idle {
            idle.push_back(conn);
        } else {
            debug!(addr = %self.config.addr, "idle queue full, dropping connection");
        }
    }
}

/// TCP connection pool speaking RESP2.
///
/// Cloning shares the same pool.
#[derive(Clone)]
pub struct RespPool {
    inner: Arc<PoolInner>,
}

impl RespPool {
    /// Creates a new connection pool. No connection is opened until the
    /// first acquisition.
    pub fn new(mut config: PoolConfig) -> Self {
        // A zero lease limit would make every waiting acquisition time out.
        config.max_active = config.max_active.max(1);
        let leases = Arc::new(Semaphore::new(config.max_active));
        RespPool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                config,
                leases,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquires a connection from the pool.
    ///
    /// **Logic**:
    /// 1. Fail immediately if `ctx` is already done.
    /// 2. Take a lease, waiting (bounded by `ctx`) or failing fast per `wait`.
    /// 3. Reuse an idle connection, or dial a new one under `ctx`.
    pub async fn acquire(&self, ctx: &Context) -> Result<PooledConnection, AcquireError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let lease = if self.inner.config.wait {
            tokio::select! {
                biased;
                err = ctx.done() => return Err(err.into()),
                lease = self.inner.leases.clone().acquire_owned() => {
                    lease.map_err(|_| AcquireError::PoolClosed)?
                }
            }
        } else {
            self.inner
                .leases
                .clone()
                .try_acquire_owned()
                .map_err(|err| match err {
                    TryAcquireError::Closed => AcquireError::PoolClosed,
                    TryAcquireError::NoPermits => AcquireError::PoolExhausted,
                })?
        };

        if let Some(conn) = self.inner.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn, lease));
        }

        let conn = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            conn = RespConnection::connect(&self.inner.config) => conn.map_err(AcquireError::Connect)?,
        };
        debug!(addr = %self.inner.config.addr, "opened cache connection");
        Ok(PooledConnection::new(self.inner.clone(), conn, lease))
    }

    /// Returns current occupancy.
    pub fn stats(&self) -> PoolStats {
        let max_active = self.inner.config.max_active;
        let idle = self.inner.idle.lock().expect("pool mutex poisoned").len();
        PoolStats {
            in_use: max_active.saturating_sub(self.inner.leases.available_permits()),
            idle,
            max_active,
        }
    }

    /// Closes the pool: pending and future acquisitions fail with
    /// `PoolClosed` and idle connections are dropped. Leased connections are
    /// discarded when released.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.leases.close();
        self.inner.idle.lock().expect("pool mutex poisoned").clear();
    }

    /// Returns true once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Pool for RespPool {
    type Conn = PooledConnection;

    async fn acquire(&self, ctx: &Context) -> Result<PooledConnection, AcquireError> {
        RespPool::acquire(self, ctx).await
    }
}

/// RAII wrapper returning a connection to the pool on close or drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<RespConnection>,
    broken: bool,
    // Dropped after `conn` is back in the idle queue, so a woken waiter finds it.
    _lease: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: RespConnection, lease: OwnedSemaphorePermit) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            broken: false,
            _lease: lease,
        }
    }

    /// Hands the connection back to the idle queue, or drops it when it is
    /// unusable or the pool has closed. Discarding is not a failure.
    fn release(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.pool.closed.load(Ordering::Acquire) {
            debug!(addr = %self.pool.config.addr, "pool closed, dropping connection");
            return;
        }
        if self.broken {
            debug!(addr = %self.pool.config.addr, "discarding broken connection");
            drop(conn);
            return;
        }

        self.pool.return_connection(conn);
    }
}

#[async_trait]
impl Connection for PooledConnection {
    async fn exec(&mut self, command: &Command) -> CacheResult<RespValue> {
        let conn = self.conn.as_mut().ok_or(CacheError::ConnectionBroken)?;
        // Stays set if this future is dropped before the reply arrives.
        self.broken = true;
        let response = conn.exec(command).await;
        // If IO/protocol fails, do not return this connection to the pool.
        self.broken = response.is_err();
        response
    }

    fn close(mut self) -> CacheResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
struct RespConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    parser: RespParser,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl RespConnection {
    async fn connect(config: &PoolConfig) -> io::Result<Self> {
        let stream = with_timeout(config.connect_timeout, TcpStream::connect(config.addr.as_str())).await?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(RespConnection {
            stream,
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: Vec::with_capacity(256),
            parser: RespParser::new(),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }

    async fn exec(&mut self, command: &Command) -> CacheResult<RespValue> {
        self.write_buf.clear();
        encode_command(command, &mut self.write_buf);
        with_timeout(self.write_timeout, self.stream.write_all(&self.write_buf)).await?;

        loop {
            if let Some((value, used)) = self.parser.parse(&self.read_buf)? {
                self.read_buf.advance(used);
                return Ok(value);
            }
            let bytes = with_timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf)).await?;
            if bytes == 0 {
                return Err(CacheError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "cache transport timed out"))?,
        None => fut.await,
    }
}
