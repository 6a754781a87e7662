//! Opaque file handles and the allocator that hands them out

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{AdapterError, Result};

/// Opaque 64-bit identifier for an exported path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Root directory handle (always 1)
    pub const ROOT: Handle = Handle(1);

    /// Wire size of an encoded handle
    pub const ENCODED_LEN: usize = 8;

    pub const fn new(raw: u64) -> Self {
        Handle(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// Big-endian encoding used on the protocol boundary
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; Self::ENCODED_LEN] = bytes.try_into().map_err(|_| {
            AdapterError::InvalidHandle(format!(
                "expected {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            ))
        })?;
        Ok(Handle(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

/// Hands out strictly increasing handles, starting right after the root
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
    limit: u64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::with_limit(u64::MAX)
    }

    /// Allocator that refuses to hand out values above `limit`
    pub fn with_limit(limit: u64) -> Self {
        Self {
            next: AtomicU64::new(Handle::ROOT.0 + 1),
            limit,
        }
    }

    /// Allocate the next handle
    pub fn next(&self) -> Result<Handle> {
        let limit = self.limit;
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                // 0 means the counter wrapped past u64::MAX
                if n > limit || n == 0 {
                    None
                } else {
                    Some(n.wrapping_add(1))
                }
            })
            .map(Handle)
            .map_err(|_| AdapterError::IdentifierSpaceExhausted(limit))
    }

    /// Value the next successful call would return
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
