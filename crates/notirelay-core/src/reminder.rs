//! Builds the four reminder fields for a thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::{self, EncodedReminder};
use crate::types::Thread;

/// How the reminder's `date` field is filled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateStamp {
    /// Always send an empty date.
    #[default]
    None,
    /// `HH:MM` (UTC) of the newest message.
    Clock,
}

/// Reminder fields derived from a thread, ready for [`packet::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderInput {
    pub name: String,
    pub title: String,
    pub text: String,
    pub date: String,
}

impl ReminderInput {
    pub fn from_thread(thread: &Thread, stamp: DateStamp) -> Self {
        Self {
            name: thread.display_name.clone(),
            title: thread.sender.clone(),
            text: summary_text(thread),
            date: stamp_date(thread, stamp),
        }
    }

    pub fn encode(&self) -> EncodedReminder {
        packet::encode(&self.name, &self.title, &self.text, &self.date)
    }
}

/// One display line for the thread.
///
/// Several unread messages collapse to `"[<n> unread] tap for details"`;
/// otherwise the newest body is flattened onto a single line.
pub fn summary_text(thread: &Thread) -> String {
    if thread.unread_count > 1 {
        return format!("[{} unread] tap for details", thread.unread_count);
    }
    thread.latest_body().map(single_line).unwrap_or_default()
}

fn single_line(body: &str) -> String {
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn stamp_date(thread: &Thread, stamp: DateStamp) -> String {
    match stamp {
        DateStamp::None => String::new(),
        DateStamp::Clock => i64::try_from(thread.latest_at())
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|at| at.format("%H:%M").to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::decode;
    use crate::types::{Message, ThreadId};

    fn thread(unread: u32, bodies: &[(u64, &str)]) -> Thread {
        Thread {
            id: ThreadId(1),
            source_id: "com.tencent.mm".into(),
            display_name: "WeChat".into(),
            sender: "Alice".into(),
            messages: bodies
                .iter()
                .map(|&(timestamp, body)| Message {
                    timestamp,
                    body: body.into(),
                })
                .collect(),
            unread_count: unread,
            dedup_key: "k".into(),
        }
    }

    #[test]
    fn several_unread_collapse_to_summary() {
        let t = thread(3, &[(300, "c"), (200, "b"), (100, "a")]);
        assert_eq!(summary_text(&t), "[3 unread] tap for details");
    }

    #[test]
    fn single_unread_shows_body() {
        let t = thread(1, &[(100, "see you\nat  noon\t!")]);
        assert_eq!(summary_text(&t), "see you at noon !");
    }

    #[test]
    fn read_thread_with_history_shows_newest_body() {
        let t = thread(1, &[(300, "new"), (200, "old"), (100, "older")]);
        assert_eq!(summary_text(&t), "new");
    }

    #[test]
    fn input_maps_thread_fields() {
        let t = thread(2, &[(200, "lunch?"), (100, "hi")]);
        let input = ReminderInput::from_thread(&t, DateStamp::None);
        assert_eq!(input.name, "WeChat");
        assert_eq!(input.title, "Alice");
        assert_eq!(input.text, "[2 unread] tap for details");
        assert_eq!(input.date, "");

        let fields = decode(&input.encode().bytes).expect("decode");
        assert_eq!(fields.date, None);
    }

    #[test]
    fn clock_stamp_formats_newest_message() {
        // 1970-01-01T01:02:00Z
        let t = thread(1, &[(3_720_000, "hi")]);
        let input = ReminderInput::from_thread(&t, DateStamp::Clock);
        assert_eq!(input.date, "01:02");
    }

    #[test]
    fn date_stamp_deserializes_lowercase() {
        let stamp: DateStamp = serde_json::from_str("\"clock\"").expect("deserialize");
        assert_eq!(stamp, DateStamp::Clock);
    }
}
