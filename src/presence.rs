use crate::{chat::UserId, entity::ExternalIdentity, error::StoreError, store::UserDirectory};
use std::sync::Arc;

/// Decides whether a recipient should be reached through the fallback
/// channel instead of the live chat.
///
/// The answer comes from the presence flag kept by login/logout, not from the
/// connection registry. A user who closed the tab without logging out still
/// reads as live and will not be escalated to.
#[derive(Clone)]
pub struct PresenceOracle {
    directory: Arc<dyn UserDirectory>,
}

impl PresenceOracle {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// The identity to notify when `recipient` is unreachable live, or `None`
    /// when there is no channel or the user is live.
    pub async fn unreachable_live(
        &self,
        recipient: UserId,
    ) -> Result<Option<ExternalIdentity>, StoreError> {
        let record = self.directory.presence_record(recipient).await?;
        Ok(record.escalation_target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Presence;
    use crate::store::tests::test_store;

    #[tokio::test]
    async fn follows_identity_and_presence() {
        let store = Arc::new(test_store().await);
        let oracle = PresenceOracle::new(store.clone());

        let linked = store
            .create_user("linked", Some(ExternalIdentity(555)))
            .await
            .unwrap();
        let unlinked = store.create_user("unlinked", None).await.unwrap();

        assert_eq!(
            oracle.unreachable_live(linked.id).await.unwrap(),
            Some(ExternalIdentity(555))
        );
        assert_eq!(oracle.unreachable_live(unlinked.id).await.unwrap(), None);

        store.set_presence(linked.id, Presence::Live).await.unwrap();
        store.set_presence(unlinked.id, Presence::Live).await.unwrap();
        assert_eq!(oracle.unreachable_live(linked.id).await.unwrap(), None);
        assert_eq!(oracle.unreachable_live(unlinked.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_recipient_is_an_error() {
        let store = Arc::new(test_store().await);
        let oracle = PresenceOracle::new(store);
        assert!(matches!(
            oracle.unreachable_live(UserId(404)).await,
            Err(StoreError::UnknownUser(_))
        ));
    }
}
