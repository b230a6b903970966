use crate::{entity::ExternalIdentity, error::DispatchError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::info;

/// A notice to push through the fallback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationJob {
    pub recipient: ExternalIdentity,
    pub text: String,
}

/// Hands notices to an out-of-band worker.
///
/// `dispatch` only enqueues. Delivery, retries and ordering belong to
/// whatever drains the queue.
pub trait EscalationDispatcher: Send + Sync {
    fn dispatch(&self, recipient: ExternalIdentity, text: String) -> Result<(), DispatchError>;
}

/// Bounded in-process queue feeding a notification worker.
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    tx: mpsc::Sender<EscalationJob>,
}

impl QueueDispatcher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EscalationJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EscalationDispatcher for QueueDispatcher {
    fn dispatch(&self, recipient: ExternalIdentity, text: String) -> Result<(), DispatchError> {
        self.tx
            .try_send(EscalationJob { recipient, text })
            .map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::QueueFull,
                TrySendError::Closed(_) => DispatchError::WorkerClosed,
            })
    }
}

/// Used when no notification channel is configured: the notice is only logged.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

impl EscalationDispatcher for LogDispatcher {
    fn dispatch(&self, recipient: ExternalIdentity, text: String) -> Result<(), DispatchError> {
        info!(%recipient, notice = %text, "escalation channel disabled, notice dropped");
        Ok(())
    }
}
