//! Connection context identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 64-bit key naming one tracked connection attempt.
///
/// Event sources usually pack the process id into the high half and the
/// thread id into the low half; the table never looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionContext(u64);

impl ConnectionContext {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Pack a process id and thread id the way `bpf_get_current_pid_tgid` does
    pub const fn from_pid_tid(pid: u32, tid: u32) -> Self {
        Self(((pid as u64) << 32) | tid as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// High 32 bits
    pub const fn pid(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Low 32 bits
    pub const fn tid(self) -> u32 {
        self.0 as u32
    }
}

impl From<u64> for ConnectionContext {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ConnectionContext> for u64 {
    fn from(ctx: ConnectionContext) -> Self {
        ctx.0
    }
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
