//! Backing store for `ExporterService::LogStream`.
//!
//! Spec §9 leaves `LogStream` ordering as an open question ("the source merges a bounded
//! in-memory ring buffer with periodic polling... a bounded queue with FIFO per source-tag is
//! sufficient"). This implements exactly that: a bounded broadcast channel fed by both the
//! `tracing` pipeline and the hook runner's merged stdout/stderr readers, with delivery order
//! guaranteed only within a single `source` tag, not globally across tags.

use jmp_proto::proto::LogStreamResponse;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LogSink {
    tx: broadcast::Sender<LogStreamResponse>,
}

impl LogSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogStreamResponse> {
        self.tx.subscribe()
    }

    pub fn push(&self, severity: &str, message: impl Into<String>, source: &str) {
        // No subscribers is the common case (no `j log` tailing the exporter); a send error here
        // just means that, which is not a failure worth reporting.
        let _ = self.tx.send(LogStreamResponse {
            severity: severity.to_owned(),
            message: message.into(),
            source: source.to_owned(),
        });
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_pushed_lines_in_order() {
        let sink = LogSink::new();
        let mut rx = sink.subscribe();
        sink.push("info", "first", "BEFORE_LEASE_HOOK");
        sink.push("info", "second", "BEFORE_LEASE_HOOK");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message, "first");
        assert_eq!(second.message, "second");
    }
}
