//! The send path: one inbound chat message in, every side effect out.
//!
//! For each message the router resolves the sender, persists the message,
//! brings the conversation cache up to date, escalates to the fallback
//! channel when the recipient is away, and broadcasts the formatted line to
//! every live connection. A failed store write stops the send before anything
//! is cached or broadcast; escalation problems never do.

use crate::{
    chat::{departure_notice, escalation_notice, ConversationKey, Message, MessageView, UserId},
    error::RouterError,
    escalation::EscalationDispatcher,
    history::ReadThroughHistory,
    presence::PresenceOracle,
    registry::{ConnectionRegistry, LiveConnection},
    store::{MessageStore, UserDirectory},
};
use futures::{Stream, StreamExt};
use std::{fmt::Display, sync::Arc};
use tracing::{debug, error, info, warn};

/// What happened to one successfully persisted message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub view: MessageView,
    pub escalated: bool,
    pub delivered_to: usize,
}

pub struct MessageRouter {
    directory: Arc<dyn UserDirectory>,
    history: Arc<ReadThroughHistory>,
    presence: PresenceOracle,
    dispatcher: Arc<dyn EscalationDispatcher>,
    registry: Arc<ConnectionRegistry>,
    max_message_len: usize,
}

impl MessageRouter {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        history: Arc<ReadThroughHistory>,
        dispatcher: Arc<dyn EscalationDispatcher>,
        registry: Arc<ConnectionRegistry>,
        max_message_len: usize,
    ) -> Self {
        Self {
            presence: PresenceOracle::new(directory.clone()),
            directory,
            history,
            dispatcher,
            registry,
            max_message_len,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn validate(&self, text: &str) -> Result<(), RouterError> {
        if text.trim().is_empty() {
            return Err(RouterError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.max_message_len {
            return Err(RouterError::MessageTooLong {
                len,
                max: self.max_message_len,
            });
        }
        Ok(())
    }

    /// Route one message from `sender` to `recipient`.
    pub async fn deliver(
        &self,
        sender: UserId,
        recipient: UserId,
        text: &str,
    ) -> Result<Delivery, RouterError> {
        self.validate(text)?;

        let sender_name = self
            .directory
            .display_name(sender)
            .await
            .map_err(RouterError::Identity)?;
        let key = ConversationKey::new(sender, recipient);

        // Store and cache are written under the conversation's lock so the
        // cached sequence always matches the store's order.
        let (message, view) = {
            let _guard = self.history.cache().lock(key).await;

            let message = self
                .history
                .store()
                .append(sender, recipient, text)
                .await
                .map_err(RouterError::Persist)?;
            let view = MessageView::at(text, sender_name.as_str(), message.sent_at);

            if let Err(e) = self.history.record(key, view.clone()).await {
                warn!(conversation = %key, error = %e, "failed to refresh conversation cache");
            }
            (message, view)
        };

        let escalated = self.escalate(recipient, &view).await;
        let delivered_to = self.registry.broadcast(&view.broadcast_line());

        let delivery = Delivery {
            message,
            view,
            escalated,
            delivered_to,
        };
        info!(
            message_id = delivery.message.id,
            %sender,
            %recipient,
            sent = delivery.view.time(),
            escalated = delivery.escalated,
            delivered_to = delivery.delivered_to,
            "message delivered"
        );
        Ok(delivery)
    }

    async fn escalate(&self, recipient: UserId, view: &MessageView) -> bool {
        let target = match self.presence.unreachable_live(recipient).await {
            Ok(Some(target)) => target,
            Ok(None) => return false,
            Err(e) => {
                warn!(%recipient, error = %e, "presence lookup failed, not escalating");
                return false;
            }
        };

        match self
            .dispatcher
            .dispatch(target, escalation_notice(view.sender_name(), view.text()))
        {
            Ok(()) => {
                debug!(%recipient, external_identity = %target, "escalation queued");
                true
            }
            Err(e) => {
                warn!(%recipient, error = %e, "failed to queue escalation");
                false
            }
        }
    }

    /// Drive one live connection until the peer goes away.
    ///
    /// `connection` is registered for broadcasts for the lifetime of the loop.
    /// Every text frame from `inbound` is routed from `sender` to `recipient`.
    /// On exit, clean or not, the connection is unregistered and the others
    /// are told the sender left.
    pub async fn run_session<S, E>(
        &self,
        sender: UserId,
        recipient: UserId,
        connection: LiveConnection,
        mut inbound: S,
    ) where
        S: Stream<Item = Result<String, E>> + Unpin,
        E: Display,
    {
        let connection_id = connection.id;
        self.registry.register(connection);
        info!(connection = %connection_id, %sender, %recipient, "chat session opened");

        while let Some(frame) = inbound.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "connection failed");
                    break;
                }
            };

            match self.deliver(sender, recipient, &text).await {
                Ok(_) => {}
                Err(e) => {
                    if let Some(notice) = e.sender_notice() {
                        self.registry.send_to(connection_id, &notice);
                    }
                    if e.is_fatal() {
                        error!(connection = %connection_id, error = %e, "closing chat session");
                        break;
                    }
                    debug!(connection = %connection_id, error = %e, "message rejected");
                }
            }
        }

        self.registry.unregister(connection_id);
        self.registry.broadcast(&departure_notice(sender));
        info!(connection = %connection_id, %sender, "chat session closed");
    }
}
