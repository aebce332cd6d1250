//! JSON-lines event source

use super::event::ConnectionEvent;
use crate::Result;
use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Reads one `ConnectionEvent` per line from an async reader
pub struct EventReader<R> {
    lines: Lines<R>,
    line_number: u64,
}

impl<R: AsyncBufRead + Unpin> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Next event, or `None` at end of input.
    ///
    /// Blank lines are skipped. A line that fails to decode returns an error
    /// naming the line that downcasts to `serde_json::Error`; the reader
    /// stays usable afterwards. Read failures return any other error.
    pub async fn next_event(&mut self) -> Result<Option<ConnectionEvent>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context("Failed to read event input")?
            else {
                return Ok(None);
            };
            self.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event = serde_json::from_str(line)
                .with_context(|| format!("Malformed event on line {}", self.line_number))?;
            return Ok(Some(event));
        }
    }

    /// Lines consumed so far
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ConnectionContext;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_events_and_skips_blank_lines() {
        let input = "{\"type\":\"closed\",\"context\":1}\n\n  \n{\"type\":\"closed\",\"context\":2}\n";
        let mut reader = EventReader::new(BufReader::new(input.as_bytes()));

        let first = reader.next_event().await.unwrap().unwrap();
        assert_eq!(first.context(), ConnectionContext::new(1));
        let second = reader.next_event().await.unwrap().unwrap();
        assert_eq!(second.context(), ConnectionContext::new(2));
        assert!(reader.next_event().await.unwrap().is_none());
        assert_eq!(reader.line_number(), 4);
    }

    #[tokio::test]
    async fn test_malformed_line_reports_position_and_continues() {
        let input = "not json\n{\"type\":\"closed\",\"context\":3}\n";
        let mut reader = EventReader::new(BufReader::new(input.as_bytes()));

        let err = reader.next_event().await.unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(err.downcast_ref::<serde_json::Error>().is_some());

        let next = reader.next_event().await.unwrap().unwrap();
        assert_eq!(next.context(), ConnectionContext::new(3));
    }

    #[tokio::test]
    async fn test_reads_from_chunked_stream() {
        let stream = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"clo")
            .read(b"sed\",\"context\":7}\n")
            .build();
        let mut reader = EventReader::new(BufReader::new(stream));

        let event = reader.next_event().await.unwrap().unwrap();
        assert_eq!(event, ConnectionEvent::closed(ConnectionContext::new(7)));
        assert!(reader.next_event().await.unwrap().is_none());
    }
}
