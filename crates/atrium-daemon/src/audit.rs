//! Fire-and-forget audit notification for privilege changes.
//!
//! The portal keeps a human-readable activity trail of who can launch
//! what. That trail is a collaborator, not part of this engine: the
//! engine hands it a one-line summary and moves on. The [`AuditSink`]
//! contract is infallible by design so that an audit outage can never
//! fail a privilege operation; implementations swallow their own errors
//! and at most `warn!` about them.

use std::sync::Mutex;
use std::sync::mpsc;

use tracing::{info, warn};

/// Receives one-line summaries of privilege changes.
///
/// Implementations must not panic and must not block the caller beyond a
/// bounded hand-off; delivery failures stay inside the sink.
pub trait AuditSink: Send + Sync {
    /// Records one privilege-change summary.
    fn record(&self, summary: &str);
}

/// Default sink: emits the summary on the `audit` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, summary: &str) {
        info!(target: "audit", "{summary}");
    }
}

/// Sink that drops everything. Useful for tests and batch tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _summary: &str) {}
}

/// Sink that forwards summaries over a channel, used by tests to assert
/// on what was recorded. A closed receiver is logged and otherwise
/// ignored.
#[derive(Debug)]
pub struct ChannelAuditSink {
    sender: Mutex<mpsc::Sender<String>>,
}

impl ChannelAuditSink {
    /// Creates a sink plus the receiving end for assertions.
    #[must_use]
    pub fn pair() -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, summary: &str) {
        let Ok(sender) = self.sender.lock() else {
            warn!("audit channel lock poisoned, dropping summary");
            return;
        };
        if sender.send(summary.to_string()).is_err() {
            warn!("audit channel closed, dropping summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, receiver) = ChannelAuditSink::pair();
        sink.record("privilege enabled for user 1");
        assert_eq!(receiver.recv().unwrap(), "privilege enabled for user 1");
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, receiver) = ChannelAuditSink::pair();
        drop(receiver);
        // Must not panic or error.
        sink.record("dropped");
    }
}
