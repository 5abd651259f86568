//! Topics: the (event kind, scope key) pairs that route events.
//!
//! A [`Topic`] names one stream of related events, e.g. every
//! `notification-added` event for one user. Two consumers watching different
//! scopes never see each other's events.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::defaults::{MAX_CHANNEL_NAME_LENGTH, RESTART_KIND};

/// An event payload that knows which event kind it belongs to.
///
/// Implemented by the application's closed payload enum (one variant per event
/// kind). The bus uses `kind()` to check that a payload is published on a
/// matching topic; it never looks inside the payload otherwise.
pub trait TopicPayload: Clone + Send + Sync + fmt::Debug + 'static {
    /// Event kind of this payload, e.g. `"notification-added"`.
    ///
    /// Payloads reporting [`RESTART_KIND`] are rejected by [`crate::EventBus`].
    fn kind(&self) -> &'static str;
}

/// Immutable (event kind, scope key) pair. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic {
    kind: String,
    scope: String,
}

impl Topic {
    /// Create a topic for an event kind within a scope.
    pub fn new(kind: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: scope.into(),
        }
    }

    /// Reserved restart topic for a scope.
    pub fn restart(scope: impl Into<String>) -> Self {
        Self::new(RESTART_KIND, scope)
    }

    /// Topic a payload would be published on within `scope`.
    pub fn for_payload<P: TopicPayload>(payload: &P, scope: impl Into<String>) -> Self {
        Self::new(payload.kind(), scope)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether this is the reserved restart topic.
    pub fn is_restart(&self) -> bool {
        self.kind == RESTART_KIND
    }

    /// Stable wire name for this topic.
    ///
    /// Renders `{"kind":..,"scope":..}` as compact JSON. Names longer than
    /// [`MAX_CHANNEL_NAME_LENGTH`] bytes are prefixed with their sha256 digest
    /// and truncated so distinct long topics stay distinct.
    pub fn channel_name(&self) -> String {
        let name = serde_json::json!({ "kind": self.kind, "scope": self.scope }).to_string();
        limit_channel_name(name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.scope)
    }
}

fn limit_channel_name(name: String) -> String {
    if name.len() <= MAX_CHANNEL_NAME_LENGTH {
        return name;
    }

    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let mut limited = format!("{}:{}", digest, name);
    let mut cut = MAX_CHANNEL_NAME_LENGTH;
    while !limited.is_char_boundary(cut) {
        cut -= 1;
    }
    limited.truncate(cut);
    limited
}

/// Distinct restart topics covering every scope in `topics`, in first-seen order.
pub fn restart_topics<'a>(topics: impl IntoIterator<Item = &'a Topic>) -> Vec<Topic> {
    let mut scopes: Vec<&str> = Vec::new();
    for topic in topics {
        if !scopes.contains(&topic.scope()) {
            scopes.push(topic.scope());
        }
    }
    scopes.into_iter().map(Topic::restart).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_equality_is_by_value() {
        let a = Topic::new("notification-added", "user-1");
        let b = Topic::new(String::from("notification-added"), String::from("user-1"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_topic_scope_distinguishes() {
        let a = Topic::new("x", "A");
        let b = Topic::new("x", "B");
        assert_ne!(a, b);
    }

    #[test]
    fn test_restart_topic() {
        let topic = Topic::restart("user-1");
        assert!(topic.is_restart());
        assert_eq!(topic.kind(), "restart");
        assert_eq!(topic.scope(), "user-1");
        assert!(!Topic::new("inbox-updated", "user-1").is_restart());
    }

    #[test]
    fn test_display() {
        let topic = Topic::new("thread-created", "t-9");
        assert_eq!(topic.to_string(), "thread-created/t-9");
    }

    #[test]
    fn test_channel_name_is_stable_json() {
        let topic = Topic::new("inc", "u1");
        assert_eq!(topic.channel_name(), r#"{"kind":"inc","scope":"u1"}"#);
        assert_eq!(topic.channel_name(), topic.clone().channel_name());
    }

    #[test]
    fn test_channel_name_long_topics_are_limited_and_distinct() {
        let long_a = Topic::new("inc", "a".repeat(2000));
        let long_b = Topic::new("inc", format!("{}b", "a".repeat(1999)));

        let name_a = long_a.channel_name();
        let name_b = long_b.channel_name();
        assert_eq!(name_a.len(), MAX_CHANNEL_NAME_LENGTH);
        assert_eq!(name_b.len(), MAX_CHANNEL_NAME_LENGTH);
        assert_ne!(name_a, name_b);
        // digest prefix followed by the original name
        assert_eq!(name_a.as_bytes()[64], b':');
    }

    #[test]
    fn test_channel_name_truncates_on_char_boundary() {
        let topic = Topic::new("inc", "é".repeat(1000));
        let name = topic.channel_name();
        assert!(name.len() <= MAX_CHANNEL_NAME_LENGTH);
        assert!(name.is_char_boundary(name.len()));
    }

    #[test]
    fn test_restart_topics_dedupes_scopes() {
        let topics = vec![
            Topic::new("thread-message-added", "t1"),
            Topic::new("thread-message-removed", "t1"),
            Topic::new("inbox-updated", "u1"),
        ];
        let restarts = restart_topics(&topics);
        assert_eq!(restarts, vec![Topic::restart("t1"), Topic::restart("u1")]);
    }

    #[test]
    fn test_topic_serde_roundtrip_shape() {
        let topic = Topic::new("inc", "u1");
        let json = serde_json::to_string(&topic).unwrap();
        assert_eq!(json, r#"{"kind":"inc","scope":"u1"}"#);
    }
}
