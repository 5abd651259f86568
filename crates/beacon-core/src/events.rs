//! Event types flowing through the bus, and the built-in domain payload catalog.
//!
//! An [`Event`] wraps either a domain payload or the reserved restart signal.
//! Payloads are a closed enum per application (see [`TopicPayload`]);
//! [`DomainEvent`] is the catalog used by the notification, thread, presence,
//! and preference live queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topic::{Topic, TopicPayload};

// ============================================================================
// Event
// ============================================================================

/// What an event carries: a domain payload or the restart signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventBody<P> {
    /// A domain mutation, folded into live-query state by a reducer.
    Domain(P),
    /// Forces every live query in the topic's scope to reload its snapshot.
    Restart,
}

/// One published event, delivered to every channel subscribed to `topic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub id: Uuid,
    /// Topic the event was published on.
    pub topic: Topic,
    /// When the event was published (UTC).
    pub published_at: DateTime<Utc>,
    pub body: EventBody<P>,
}

impl<P> Event<P> {
    /// Domain event on `topic`.
    pub fn domain(topic: Topic, payload: P) -> Self {
        Self::with_body(topic, EventBody::Domain(payload))
    }

    /// Restart event for `scope`.
    pub fn restart(scope: impl Into<String>) -> Self {
        Self::with_body(Topic::restart(scope), EventBody::Restart)
    }

    fn with_body(topic: Topic, body: EventBody<P>) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic,
            published_at: Utc::now(),
            body,
        }
    }

    pub fn is_restart(&self) -> bool {
        matches!(self.body, EventBody::Restart)
    }

    /// Domain payload, or `None` for restart events.
    pub fn payload(&self) -> Option<&P> {
        match &self.body {
            EventBody::Domain(payload) => Some(payload),
            EventBody::Restart => None,
        }
    }
}

// ============================================================================
// Domain event catalog
// ============================================================================

/// Where a user currently is, as reported by a presence update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceChange {
    /// Short-lived presence (a browser tab is open on a location).
    Ephemeral {
        #[serde(skip_serializing_if = "Option::is_none")]
        arrived: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        departed: Option<serde_json::Value>,
        sequence_num: u64,
    },
    /// Last known location, kept after the user leaves.
    Durable {
        context: serde_json::Value,
        timestamp: i64,
    },
}

/// Built-in payload catalog. One variant per event kind.
///
/// The scope each kind is published under is noted per variant. Live queries
/// build their topic lists with helpers such as
/// [`DomainEvent::notification_topics`].
///
/// Serialized with a kebab-case `kind` tag, e.g.
/// `{"kind":"notification-added","notification_id":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DomainEvent {
    /// Scope: user ID.
    NotificationAdded { notification_id: Uuid },
    /// Scope: user ID.
    NotificationReadStateUpdated { notification_id: Uuid },
    /// Scope: user ID.
    NotificationDeleted { notification_id: Uuid },
    /// Scope: thread ID.
    ThreadCreated { thread_id: Uuid },
    /// Scope: thread ID.
    ThreadDeleted { thread_id: Uuid },
    /// Scope: thread ID.
    ThreadMessageAdded { message_id: Uuid },
    /// Scope: thread ID.
    ThreadMessageUpdated { message_id: Uuid },
    /// Scope: thread ID. Streaming append to a message body.
    ThreadMessageContentAppended {
        message_id: Uuid,
        appended_content: String,
    },
    /// Scope: thread ID.
    ThreadMessageRemoved { message_id: Uuid },
    /// Scope: thread ID.
    ThreadParticipantsUpdated { user_id: Uuid },
    /// Scope: thread ID.
    ThreadTypingUsersUpdated { users: Vec<Uuid> },
    /// Scope: thread ID.
    ThreadPropertiesUpdated,
    /// Scope: thread ID.
    ThreadSubscriberUpdated { user_id: Uuid },
    /// Scope: user ID. `thread_id` is absent for bulk changes.
    InboxUpdated {
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<Uuid>,
    },
    /// Scope: user ID.
    UserPreferenceUpdated { key: String },
    /// Scope: user ID.
    UserIdentity,
    /// Scope: org ID.
    OrgUserIdentity { user_id: Uuid },
    /// Scope: org ID.
    OrgMemberAdded { user_id: Uuid },
    /// Scope: org ID.
    OrgMemberRemoved { user_id: Uuid },
    /// Scope: org ID.
    ContextPresence {
        external_user_id: String,
        change: PresenceChange,
    },
    /// Scope: customer ID.
    CustomerSubscriptionUpdated { customer_id: Uuid },
}

impl DomainEvent {
    /// Every event kind in the catalog, in declaration order.
    pub const KINDS: &'static [&'static str] = &[
        "notification-added",
        "notification-read-state-updated",
        "notification-deleted",
        "thread-created",
        "thread-deleted",
        "thread-message-added",
        "thread-message-updated",
        "thread-message-content-appended",
        "thread-message-removed",
        "thread-participants-updated",
        "thread-typing-users-updated",
        "thread-properties-updated",
        "thread-subscriber-updated",
        "inbox-updated",
        "user-preference-updated",
        "user-identity",
        "org-user-identity",
        "org-member-added",
        "org-member-removed",
        "context-presence",
        "customer-subscription-updated",
    ];

    /// Topics a per-user notification query listens on.
    pub fn notification_topics(user_id: Uuid) -> Vec<Topic> {
        let scope = user_id.to_string();
        [
            "notification-added",
            "notification-read-state-updated",
            "notification-deleted",
        ]
        .into_iter()
        .map(|kind| Topic::new(kind, scope.clone()))
        .collect()
    }

    /// Topics a per-thread query listens on.
    pub fn thread_topics(thread_id: Uuid) -> Vec<Topic> {
        let scope = thread_id.to_string();
        Self::KINDS
            .iter()
            .filter(|kind| kind.starts_with("thread-"))
            .map(|kind| Topic::new(*kind, scope.clone()))
            .collect()
    }
}

impl TopicPayload for DomainEvent {
    fn kind(&self) -> &'static str {
        match self {
            DomainEvent::NotificationAdded { .. } => "notification-added",
            DomainEvent::NotificationReadStateUpdated { .. } => "notification-read-state-updated",
            DomainEvent::NotificationDeleted { .. } => "notification-deleted",
            DomainEvent::ThreadCreated { .. } => "thread-created",
            DomainEvent::ThreadDeleted { .. } => "thread-deleted",
            DomainEvent::ThreadMessageAdded { .. } => "thread-message-added",
            DomainEvent::ThreadMessageUpdated { .. } => "thread-message-updated",
            DomainEvent::ThreadMessageContentAppended { .. } => "thread-message-content-appended",
            DomainEvent::ThreadMessageRemoved { .. } => "thread-message-removed",
            DomainEvent::ThreadParticipantsUpdated { .. } => "thread-participants-updated",
            DomainEvent::ThreadTypingUsersUpdated { .. } => "thread-typing-users-updated",
            DomainEvent::ThreadPropertiesUpdated => "thread-properties-updated",
            DomainEvent::ThreadSubscriberUpdated { .. } => "thread-subscriber-updated",
            DomainEvent::InboxUpdated { .. } => "inbox-updated",
            DomainEvent::UserPreferenceUpdated { .. } => "user-preference-updated",
            DomainEvent::UserIdentity => "user-identity",
            DomainEvent::OrgUserIdentity { .. } => "org-user-identity",
            DomainEvent::OrgMemberAdded { .. } => "org-member-added",
            DomainEvent::OrgMemberRemoved { .. } => "org-member-removed",
            DomainEvent::ContextPresence { .. } => "context-presence",
            DomainEvent::CustomerSubscriptionUpdated { .. } => "customer-subscription-updated",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_event_json_tag_matches_kind() {
        let event = DomainEvent::NotificationAdded {
            notification_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], event.kind());
        assert_eq!(json["notification_id"], Uuid::nil().to_string());
    }

    #[test]
    fn test_unit_variant_json() {
        let json = serde_json::to_string(&DomainEvent::UserIdentity).unwrap();
        assert_eq!(json, r#"{"kind":"user-identity"}"#);
    }

    #[test]
    fn test_inbox_updated_skips_missing_thread() {
        let json = serde_json::to_string(&DomainEvent::InboxUpdated { thread_id: None }).unwrap();
        assert!(!json.contains("thread_id"));
    }

    #[test]
    fn test_every_variant_kind_is_listed() {
        let samples = vec![
            DomainEvent::NotificationDeleted {
                notification_id: Uuid::nil(),
            },
            DomainEvent::ThreadMessageContentAppended {
                message_id: Uuid::nil(),
                appended_content: "hi".to_string(),
            },
            DomainEvent::ThreadPropertiesUpdated,
            DomainEvent::ContextPresence {
                external_user_id: "ext-1".to_string(),
                change: PresenceChange::Durable {
                    context: serde_json::json!({ "page": "/home" }),
                    timestamp: 1,
                },
            },
            DomainEvent::CustomerSubscriptionUpdated {
                customer_id: Uuid::nil(),
            },
        ];
        for event in samples {
            assert!(DomainEvent::KINDS.contains(&event.kind()), "{}", event.kind());
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["kind"], event.kind());
        }
    }

    #[test]
    fn test_presence_change_deserializes() {
        let json = r#"{
            "kind": "context-presence",
            "external_user_id": "ext-1",
            "change": { "ephemeral": { "arrived": {"page": "/a"}, "sequence_num": 3 } }
        }"#;
        let event: DomainEvent = serde_json::from_str(json).unwrap();
        match event {
            DomainEvent::ContextPresence {
                change:
                    PresenceChange::Ephemeral {
                        arrived,
                        departed,
                        sequence_num,
                    },
                ..
            } => {
                assert!(arrived.is_some());
                assert!(departed.is_none());
                assert_eq!(sequence_num, 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_notification_topics_are_user_scoped() {
        let user = Uuid::nil();
        let topics = DomainEvent::notification_topics(user);
        assert_eq!(topics.len(), 3);
        assert!(topics.iter().all(|t| t.scope() == user.to_string()));
    }

    #[test]
    fn test_thread_topics_cover_thread_kinds() {
        let topics = DomainEvent::thread_topics(Uuid::nil());
        assert_eq!(topics.len(), 10);
        assert!(topics.iter().all(|t| t.kind().starts_with("thread-")));
    }

    #[test]
    fn test_event_constructors() {
        let topic = Topic::new("inbox-updated", "u1");
        let event = Event::domain(topic.clone(), DomainEvent::InboxUpdated { thread_id: None });
        assert!(!event.is_restart());
        assert_eq!(event.topic, topic);
        assert!(event.payload().is_some());

        let restart: Event<DomainEvent> = Event::restart("u1");
        assert!(restart.is_restart());
        assert!(restart.payload().is_none());
        assert_eq!(restart.topic, Topic::restart("u1"));
    }

    #[test]
    fn test_event_ids_are_v7() {
        let a: Event<DomainEvent> = Event::restart("s");
        let b: Event<DomainEvent> = Event::restart("s");
        assert_eq!(a.id.get_version_num(), 7);
        assert_ne!(a.id, b.id);
    }
}
