//! Record Module
//!
//! Keys and values stored in the connection table.

pub mod comm;
pub mod context;

pub use comm::{Comm, COMM_LEN};
pub use context::ConnectionContext;

use serde::{Deserialize, Serialize};

/// Number of 64-bit words a `ProcessRecord` occupies in a table slot
pub(crate) const RECORD_WORDS: usize = 4;

/// Process that opened a tracked connection
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Effective user id
    pub uid: u32,
    pub comm: Comm,
    /// Monotonic nanoseconds at insertion
    pub start_time: u64,
}

impl ProcessRecord {
    pub fn new(pid: u32, uid: u32, comm: impl Into<Comm>, start_time: u64) -> Self {
        Self {
            pid,
            uid,
            comm: comm.into(),
            start_time,
        }
    }

    pub(crate) fn to_words(self) -> [u64; RECORD_WORDS] {
        let raw = self.comm.to_raw();
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&raw[..8]);
        hi.copy_from_slice(&raw[8..]);
        [
            u64::from(self.pid) | (u64::from(self.uid) << 32),
            u64::from_le_bytes(lo),
            u64::from_le_bytes(hi),
            self.start_time,
        ]
    }

    pub(crate) fn from_words(words: [u64; RECORD_WORDS]) -> Self {
        let mut raw = [0u8; COMM_LEN];
        raw[..8].copy_from_slice(&words[1].to_le_bytes());
        raw[8..].copy_from_slice(&words[2].to_le_bytes());
        Self {
            pid: words[0] as u32,
            uid: (words[0] >> 32) as u32,
            comm: Comm::from_raw(raw),
            start_time: words[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout_is_fixed() {
        assert_eq!(std::mem::size_of::<ProcessRecord>(), RECORD_WORDS * 8);
    }

    #[test]
    fn test_word_encoding_preserves_fields() {
        let record = ProcessRecord::new(u32::MAX, 1000, "systemd-resolve", u64::MAX - 1);
        let decoded = ProcessRecord::from_words(record.to_words());
        assert_eq!(decoded, record);
        assert_eq!(decoded.comm.as_str(), "systemd-resolve");
    }
}
