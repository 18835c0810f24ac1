//! # Command Requests
//!
//! Purpose: Translate typed cache operations into the positional argument
//! form the store expects, one `Command` per call.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: `Command::new(name).arg(..)` for ad-hoc commands.
//! 2. **Named Constructors**: one constructor per supported operation keeps
//!    argument layout in one place.
//! 3. **Binary-Safe**: keys, fields and values are opaque bytes.

use std::collections::BTreeMap;
use std::time::Duration;

/// Field/value mapping stored under a single hash key.
pub type FieldMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// A single store command: a name plus positional byte arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with no arguments.
    pub fn new(name: &'static str) -> Self {
        Command {
            name,
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Appends an unsigned integer in decimal form.
    pub fn arg_u64(mut self, value: u64) -> Self {
        self.args.push(value.to_string().into_bytes());
        self
    }

    /// Appends field/value pairs flattened as `f1 v1 f2 v2 ...`.
    pub fn arg_pairs<I, F, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        for (field, value) in pairs {
            self.args.push(field.as_ref().to_vec());
            self.args.push(value.as_ref().to_vec());
        }
        self
    }

    /// `SET key value`
    pub fn set(key: &[u8], value: &[u8]) -> Self {
        Command::new("SET").arg(key).arg(value)
    }

    /// `HSET key field value [field value ...]`
    pub fn hset(key: &[u8], fields: &FieldMap) -> Self {
        Command::new("HSET").arg(key).arg_pairs(fields)
    }

    /// `GET key`
    pub fn get(key: &[u8]) -> Self {
        Command::new("GET").arg(key)
    }

    /// `HGETALL key`
    pub fn hgetall(key: &[u8]) -> Self {
        Command::new("HGETALL").arg(key)
    }

    /// `EXPIRE key seconds`
    ///
    /// Sub-second precision is truncated, never rounded: 1500ms becomes 1
    /// and anything below one second becomes 0.
    pub fn expire(key: &[u8], expiration: Duration) -> Self {
        Command::new("EXPIRE").arg(key).arg_u64(expiration.as_secs())
    }

    /// `PING`
    pub fn ping() -> Self {
        Command::new("PING")
    }

    /// Returns the command name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the positional arguments (without the name).
    #[inline]
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Returns the number of wire parts (name + arguments).
    #[inline]
    pub fn len(&self) -> usize {
        self.args.len() + 1
    }

    /// Always false: a command carries at least its name.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates the wire parts: the name followed by every argument.
    pub fn parts(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.name.as_bytes()).chain(self.args.iter().map(Vec::as_slice))
    }
}
