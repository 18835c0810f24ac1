//! # HCache Client
//!
//! Purpose: Provide a uniform async interface to a Redis-compatible cache
//! store with connection pooling and bounded, cancellable acquisition.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Scoped Release**: Every lease is released by a guard on the call's
//!    own stack frame, on every exit path.
//! 3. **Traits at the Seams**: `Cache`, `Pool` and `Connection` decouple
//!    callers from the TCP/RESP2 implementation.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod pool;
mod release;
mod resp;

pub use client::{fields_from_flat, Cache, CacheClient, ClientConfig};
pub use pool::{Connection, Pool, PoolConfig, PoolStats, PooledConnection, RespPool};
pub use resp::{encode_command, parse_value, RespParser, RespValue};

pub use hcache_common::{
    AcquireError, CacheError, CacheResult, Command, Context, ContextError, FieldMap,
};
