//! Process Capture
//!
//! Builds `ProcessRecord`s for live processes from procfs, standing in for
//! the pid/uid/comm helpers available to in-kernel probes.

use crate::connection::ConnectionEvent;
use crate::record::{Comm, ConnectionContext, ProcessRecord};
use crate::Result;
use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Monotonic nanosecond clock, counted from its creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        u64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads process metadata from a procfs mount
#[derive(Debug, Clone)]
pub struct ProcCapture {
    root: PathBuf,
}

impl ProcCapture {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read from an alternate procfs root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Short command name from `<root>/<pid>/comm`
    pub fn comm(&self, pid: u32) -> Result<Comm> {
        let path = self.root.join(pid.to_string()).join("comm");
        let content = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = content
            .split(|&b| b == b'\n')
            .next()
            .unwrap_or_default();
        Ok(Comm::from_bytes(name))
    }

    /// Effective uid from the `Uid:` line of `<root>/<pid>/status`
    pub fn effective_uid(&self, pid: u32) -> Result<u32> {
        let path = self.root.join(pid.to_string()).join("status");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_effective_uid(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Capture a record for `pid`, stamped with `clock`
    pub fn record(&self, pid: u32, clock: &MonotonicClock) -> Result<ProcessRecord> {
        let comm = self.comm(pid)?;
        let uid = self.effective_uid(pid)?;
        Ok(ProcessRecord::new(pid, uid, comm, clock.now_ns()))
    }

    /// `Opened` event for a connection made by thread `tid` of process `pid`
    pub fn opened_event(&self, pid: u32, tid: u32, clock: &MonotonicClock) -> Result<ConnectionEvent> {
        let record = self.record(pid, clock)?;
        Ok(ConnectionEvent::opened(
            ConnectionContext::from_pid_tid(pid, tid),
            record,
        ))
    }
}

impl Default for ProcCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// `Uid:` holds real, effective, saved and filesystem uids
fn parse_effective_uid(status: &str) -> Result<u32> {
    let line = status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .ok_or_else(|| anyhow!("missing Uid line"))?;
    let effective = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("Uid line has no effective uid"))?;
    effective
        .parse::<u32>()
        .with_context(|| format!("Invalid effective uid: {}", effective))
}
