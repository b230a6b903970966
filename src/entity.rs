use crate::chat::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram chat id used to reach a user outside the live chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalIdentity(pub i64);

impl ExternalIdentity {
    /// Zero is how the directory spells "no channel configured".
    pub fn from_raw(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }
}

impl fmt::Display for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence flag maintained by the login/logout lifecycle.
///
/// This is an approximation of liveness: it is not updated when a socket
/// drops, so a user can be `Live` with no open connection (and the reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Live,
    NotLive,
}

impl Presence {
    pub fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            Presence::NotLive
        } else {
            Presence::Live
        }
    }

    pub fn as_flag(self) -> i64 {
        match self {
            Presence::Live => 1,
            Presence::NotLive => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub external_identity: Option<ExternalIdentity>,
    pub presence: Presence,
}

impl PresenceRecord {
    pub fn from_raw(external_identity: i64, presence_flag: i64) -> Self {
        Self {
            external_identity: ExternalIdentity::from_raw(external_identity),
            presence: Presence::from_flag(presence_flag),
        }
    }

    /// The identity to escalate to, if the user has a channel and is not live.
    pub fn escalation_target(&self) -> Option<ExternalIdentity> {
        match (self.external_identity, self.presence) {
            (Some(identity), Presence::NotLive) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub user_name: String,
    pub external_identity: Option<ExternalIdentity>,
    pub presence: Presence,
}
