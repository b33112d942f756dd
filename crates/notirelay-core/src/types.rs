use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Raw Event ────────────────────────────────────────────────────

/// One captured notification occurrence, as delivered by the host's
/// notification listener. Consumed by the engine and never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Stable identifier of the originating application.
    pub source_id: String,
    /// Conversation participant. May be empty when the source hides it.
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub body: String,
    /// Milliseconds, monotonic within one capture stream.
    pub occurred_at: u64,
    /// Identifier of the underlying OS notification (used for cancellation).
    pub dedup_key: String,
}

impl RawEvent {
    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey::new(&self.source_id, &self.sender)
    }
}

// ─── Thread Identity ──────────────────────────────────────────────

/// Store-assigned thread handle. Never reused within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThreadId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Grouping key: at most one thread exists per `(source_id, sender)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub source_id: String,
    pub sender: String,
}

impl ThreadKey {
    pub fn new(source_id: &str, sender: &str) -> Self {
        Self {
            source_id: source_id.to_owned(),
            sender: sender.to_owned(),
        }
    }
}

// ─── Thread Snapshot ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: u64,
    pub body: String,
}

/// Value snapshot of an aggregated conversation.
///
/// Produced by the store on every read or mutation; editing a snapshot
/// never affects the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub source_id: String,
    pub display_name: String,
    pub sender: String,
    /// Newest first.
    pub messages: Vec<Message>,
    pub unread_count: u32,
    /// Key of the most recent underlying event.
    pub dedup_key: String,
}

impl Thread {
    /// Timestamp of the newest message, `0` for an empty thread.
    pub fn latest_at(&self) -> u64 {
        self.messages.first().map_or(0, |m| m.timestamp)
    }

    pub fn latest_body(&self) -> Option<&str> {
        self.messages.first().map(|m| m.body.as_str())
    }

    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(&self.source_id, &self.sender)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_defaults_missing_sender_and_body() {
        let event: RawEvent = serde_json::from_str(
            r#"{"source_id":"com.tencent.mm","occurred_at":5,"dedup_key":"k"}"#,
        )
        .expect("deserialize");
        assert_eq!(event.sender, "");
        assert_eq!(event.body, "");
        assert_eq!(event.thread_key(), ThreadKey::new("com.tencent.mm", ""));
    }

    #[test]
    fn thread_id_is_transparent_in_json() {
        let json = serde_json::to_string(&ThreadId(42)).expect("serialize");
        assert_eq!(json, "42");
        assert_eq!("42".parse::<ThreadId>().expect("parse"), ThreadId(42));
        assert!("abc".parse::<ThreadId>().is_err());
    }

    #[test]
    fn latest_reads_front_message() {
        let thread = Thread {
            id: ThreadId(1),
            source_id: "s".into(),
            display_name: "S".into(),
            sender: "a".into(),
            messages: vec![
                Message {
                    timestamp: 200,
                    body: "new".into(),
                },
                Message {
                    timestamp: 100,
                    body: "old".into(),
                },
            ],
            unread_count: 2,
            dedup_key: "k2".into(),
        };
        assert_eq!(thread.latest_at(), 200);
        assert_eq!(thread.latest_body(), Some("new"));
    }
}
