//! Fixed-size command name

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Size of the command name buffer, terminator included
pub const COMM_LEN: usize = 16;

/// Short command name of a process.
///
/// Holds at most `COMM_LEN - 1` bytes followed by a NUL terminator. Longer
/// names are truncated on write; the buffer never grows.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Comm([u8; COMM_LEN]);

impl Comm {
    /// Build from text, truncating on a character boundary
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(COMM_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self::from_bytes(&name.as_bytes()[..end])
    }

    /// Build from raw bytes as captured from the kernel.
    ///
    /// Copying stops at the first NUL or after `COMM_LEN - 1` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; COMM_LEN];
        for (dst, &src) in buf[..COMM_LEN - 1].iter_mut().zip(bytes) {
            if src == 0 {
                break;
            }
            *dst = src;
        }
        Self(buf)
    }

    /// Wrap a raw buffer, forcing the terminator
    pub fn from_raw(mut raw: [u8; COMM_LEN]) -> Self {
        raw[COMM_LEN - 1] = 0;
        Self::from_bytes(&raw)
    }

    /// Raw buffer including the terminator and zero padding
    pub fn to_raw(self) -> [u8; COMM_LEN] {
        self.0
    }

    /// Bytes up to the terminator
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.len();
        &self.0[..len]
    }

    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(COMM_LEN - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// Lossy UTF-8 view of the name
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comm({:?})", self.as_str())
    }
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Comm {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Comm {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<Comm> for String {
    fn from(comm: Comm) -> Self {
        comm.as_str().into_owned()
    }
}
