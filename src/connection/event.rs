//! Connection lifecycle events

use crate::record::{Comm, ConnectionContext, ProcessRecord};
use serde::{Deserialize, Serialize};

/// Event delivered by a connection event source.
///
/// Serialized as one JSON object per line, tagged by `type`:
/// `{"type":"opened","context":...,"pid":...,"uid":...,"comm":"curl","timestamp":...}`
/// and `{"type":"closed","context":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionEvent {
    Opened {
        context: ConnectionContext,
        pid: u32,
        uid: u32,
        comm: Comm,
        timestamp: u64,
    },
    Closed {
        context: ConnectionContext,
    },
}

impl ConnectionEvent {
    pub fn opened(context: ConnectionContext, record: ProcessRecord) -> Self {
        Self::Opened {
            context,
            pid: record.pid,
            uid: record.uid,
            comm: record.comm,
            timestamp: record.start_time,
        }
    }

    pub fn closed(context: ConnectionContext) -> Self {
        Self::Closed { context }
    }

    pub fn context(&self) -> ConnectionContext {
        match self {
            Self::Opened { context, .. } | Self::Closed { context } => *context,
        }
    }

    /// Record carried by an `Opened` event
    pub fn record(&self) -> Option<ProcessRecord> {
        match *self {
            Self::Opened {
                pid,
                uid,
                comm,
                timestamp,
                ..
            } => Some(ProcessRecord {
                pid,
                uid,
                comm,
                start_time: timestamp,
            }),
            Self::Closed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opened_json_shape() {
        let event = ConnectionEvent::opened(
            ConnectionContext::new(0x0000_04D2_0000_0007),
            ProcessRecord::new(1234, 1000, "curl", 1000),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"opened","context":5299989643271,"pid":1234,"uid":1000,"comm":"curl","timestamp":1000}"#
        );
    }

    #[test]
    fn test_closed_parses() {
        let event: ConnectionEvent =
            serde_json::from_str(r#"{"type":"closed","context":42}"#).unwrap();
        assert_eq!(event, ConnectionEvent::closed(ConnectionContext::new(42)));
        assert_eq!(event.record(), None);
    }

    #[test]
    fn test_record_round_trips_through_event() {
        let record = ProcessRecord::new(1, 2, "ssh", 3);
        let event = ConnectionEvent::opened(ConnectionContext::new(9), record);
        assert_eq!(event.record(), Some(record));
        assert_eq!(event.context(), ConnectionContext::new(9));
    }
}
