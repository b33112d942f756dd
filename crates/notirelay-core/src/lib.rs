//! notirelay-core: notification thread model and reminder packet contract.
//! Groups raw notification events into per-sender threads, tracks the
//! read/unread lifecycle, and encodes message-reminder frames for the
//! paired peripheral. No IO and no async: every type here is a plain
//! state machine or a pure function.

pub mod display_name;
pub mod packet;
pub mod reminder;
pub mod thread_store;
pub mod types;

pub use display_name::{DisplayNameError, DisplayNameResolver, LabelTable, UNKNOWN_DISPLAY_NAME};
pub use packet::{EncodedReminder, MAX_FRAME_LEN, PacketError, ReminderField, ReminderFields};
pub use reminder::{DateStamp, ReminderInput};
pub use thread_store::{ReadAck, ThreadStore};
pub use types::{Message, RawEvent, Thread, ThreadId, ThreadKey};
