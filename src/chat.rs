use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Participant identifier as issued by the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unordered pair of participants, stored as `(min, max)`.
///
/// The only way to build one is [`ConversationKey::new`], so both directions
/// of a conversation always address the same cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn participants(&self) -> (UserId, UserId) {
        (self.low, self.high)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "messages:{}:{}", self.low, self.high)
    }
}

/// A persisted chat message. Never mutated after the store hands it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// What readers of a conversation see: `(text, sender display name, HH:MM)`.
///
/// Serializes as a three element array, the same shape whether it came from
/// the cache or the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView(pub String, pub String, pub String);

impl MessageView {
    pub fn new(text: impl Into<String>, sender_name: impl Into<String>, time: impl Into<String>) -> Self {
        Self(text.into(), sender_name.into(), time.into())
    }

    /// Builds the view for a message sent at `sent_at`, stamped in local time.
    pub fn at(text: impl Into<String>, sender_name: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self::new(text, sender_name, clock_stamp(sent_at))
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn sender_name(&self) -> &str {
        &self.1
    }

    pub fn time(&self) -> &str {
        &self.2
    }

    /// The single line pushed to live viewers.
    pub fn broadcast_line(&self) -> String {
        format!("{}: {} - {}", self.1, self.2, self.0)
    }
}

/// `HH:MM` in the server's local timezone.
pub fn clock_stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

pub fn departure_notice(user: UserId) -> String {
    format!("User {} left the chat", user)
}

pub fn escalation_notice(sender_name: &str, text: &str) -> String {
    format!("You have a new message from {}. Message: {}", sender_name, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn conversation_key_is_symmetric() {
        for (a, b) in [(1, 2), (2, 1), (7, 7), (-3, 10), (10, -3)] {
            let forward = ConversationKey::new(UserId(a), UserId(b));
            let backward = ConversationKey::new(UserId(b), UserId(a));
            assert_eq!(forward, backward);
            assert_eq!(forward.to_string(), backward.to_string());
        }
        let key = ConversationKey::new(UserId(9), UserId(4));
        assert_eq!(key.participants(), (UserId(4), UserId(9)));
        assert_eq!(key.to_string(), "messages:4:9");
    }

    #[test]
    fn message_view_serializes_as_triple() {
        let view = MessageView::new("hi", "alice", "09:05");
        let json = serde_json::to_string(&view).unwrap();
        assert_eq!(json, r#"["hi","alice","09:05"]"#);

        let back: MessageView = serde_json::from_str(&json).unwrap();
        assert_eq!(back, view);
    }

    #[test]
    fn broadcast_line_format() {
        let view = MessageView::new("hi", "alice", "09:05");
        assert_eq!(view.broadcast_line(), "alice: 09:05 - hi");
    }

    #[test]
    fn clock_stamp_is_hours_and_minutes() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 34, 56).unwrap();
        let stamp = clock_stamp(at);
        assert_eq!(stamp.len(), 5);
        assert_eq!(&stamp[2..3], ":");
        assert!(stamp
            .chars()
            .enumerate()
            .all(|(i, c)| i == 2 || c.is_ascii_digit()));
    }

    #[test]
    fn notices() {
        assert_eq!(departure_notice(UserId(3)), "User 3 left the chat");
        let notice = escalation_notice("bob", "hi");
        assert!(notice.contains("bob"));
        assert!(notice.contains("hi"));
    }
}
