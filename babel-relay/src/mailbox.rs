//! Bounded per-participant delivery queue.
//!
//! Built on a single-receiver Tokio `broadcast` channel: when the queue is
//! full the oldest line is overwritten, so a participant that stops reading
//! never blocks the lanes that feed it. The receiving side learns how many
//! lines it missed instead.

use std::sync::Arc;

use tokio::sync::broadcast;

/// Sending half, held by the hub and copied into lane jobs.
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: broadcast::Sender<Arc<str>>,
}

/// Receiving half, owned by the session's write path.
#[derive(Debug)]
pub struct Inbox {
    receiver: broadcast::Receiver<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Line(Arc<str>),
    /// The oldest `n` lines were overwritten before they could be read.
    Skipped(u64),
    Closed,
}

pub fn channel(capacity: usize) -> (Mailbox, Inbox) {
    let (sender, receiver) = broadcast::channel(capacity.max(1));
    (Mailbox { sender }, Inbox { receiver })
}

impl Mailbox {
    /// Queues a line without waiting. Returns `false` once the inbox is gone.
    pub fn deliver(&self, line: Arc<str>) -> bool {
        self.sender.send(line).is_ok()
    }
}

impl Inbox {
    pub async fn recv(&mut self) -> Delivery {
        match self.receiver.recv().await {
            Ok(line) => Delivery::Line(line),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Delivery::Skipped(skipped),
            Err(broadcast::error::RecvError::Closed) => Delivery::Closed,
        }
    }
}
