use crate::chat::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("user name {0:?} is already taken")]
    UserNameTaken(String),
}

/// Enqueue failures. The router logs these and carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("escalation queue is full")]
    QueueFull,

    #[error("escalation worker has stopped")]
    WorkerClosed,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message is {len} characters, limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("failed to resolve sender: {0}")]
    Identity(#[source] StoreError),

    #[error("failed to persist message: {0}")]
    Persist(#[source] StoreError),
}

impl RouterError {
    /// Errors the sender is told about; the connection stays open for these.
    pub fn sender_notice(&self) -> Option<String> {
        match self {
            RouterError::EmptyMessage => None,
            RouterError::MessageTooLong { max, .. } => Some(format!(
                "Message not delivered: longer than {} characters",
                max
            )),
            RouterError::Persist(_) => {
                Some("Message not delivered: could not be saved".to_string())
            }
            RouterError::Identity(_) => None,
        }
    }

    /// Whether the connection loop should end after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RouterError::Identity(_))
    }
}
