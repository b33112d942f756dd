//! Message-reminder command frame for the paired peripheral.
//!
//! Frame layout (multi-byte integers big-endian):
//!
//! ```text
//! +-------+-------+-------------+-----------------------------+----------+
//! | magic | cmd   | payload len | payload                     | checksum |
//! | 0xAB  | 0x12  | u16         | name | title | text | date  | u8       |
//! +-------+-------+-------------+-----------------------------+----------+
//! ```
//!
//! Every payload field is `len: u8` followed by that many UTF-8 bytes.
//! The checksum is the XOR of every byte from `cmd` through the end of the
//! payload. Each field has a fixed byte cap, so a frame never exceeds
//! [`MAX_FRAME_LEN`] whatever the inputs. Oversized fields are cut at a
//! character boundary and end with [`TRUNCATION_MARKER`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display_name::UNKNOWN_DISPLAY_NAME;

// ─── Constants ───────────────────────────────────────────────────────

pub const FRAME_MAGIC: u8 = 0xAB;

/// Command id of the message-reminder command.
pub const CMD_MESSAGE_REMINDER: u8 = 0x12;

const HEADER_LEN: usize = 4;
const CHECKSUM_LEN: usize = 1;
const FIELD_COUNT: usize = 4;

pub const NAME_MAX: usize = 32;
pub const TITLE_MAX: usize = 32;
pub const TEXT_MAX: usize = 144;
pub const DATE_MAX: usize = 24;

/// Upper bound on any encoded frame. Fits a 244-byte BLE notification.
pub const MAX_FRAME_LEN: usize =
    HEADER_LEN + FIELD_COUNT + NAME_MAX + TITLE_MAX + TEXT_MAX + DATE_MAX + CHECKSUM_LEN;

/// Appended to a field that had to be cut to fit its cap.
pub const TRUNCATION_MARKER: &str = "\u{2026}";

// ─── Fields ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderField {
    Name,
    Title,
    Text,
    Date,
}

impl ReminderField {
    pub const ALL: [Self; 4] = [Self::Name, Self::Title, Self::Text, Self::Date];

    /// Byte cap of the encoded field.
    pub fn cap(self) -> usize {
        match self {
            Self::Name => NAME_MAX,
            Self::Title => TITLE_MAX,
            Self::Text => TEXT_MAX,
            Self::Date => DATE_MAX,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Title => "title",
            Self::Text => "text",
            Self::Date => "date",
        }
    }
}

impl std::fmt::Display for ReminderField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded view of a message-reminder frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderFields {
    pub name: String,
    pub title: String,
    pub text: String,
    /// `None` when the frame carried an empty date.
    pub date: Option<String>,
}

/// An encoded frame plus the fields that overflowed their cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedReminder {
    pub bytes: Vec<u8>,
    /// Fields cut to fit; empty when nothing overflowed.
    pub truncated: Vec<ReminderField>,
}

impl EncodedReminder {
    pub fn is_truncated(&self) -> bool {
        !self.truncated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("bad frame magic: {0:#04x}")]
    BadMagic(u8),

    #[error("unknown command: {0:#04x}")]
    UnknownCommand(u8),

    #[error("payload length mismatch: declared {declared}, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("field {0} runs past the end of the payload")]
    MalformedField(ReminderField),

    #[error("field {0} is not valid UTF-8")]
    InvalidUtf8(ReminderField),

    #[error("{0} unexpected bytes after the last field")]
    TrailingPayload(usize),
}

// ─── Encode ──────────────────────────────────────────────────────────

/// Encode a message-reminder frame.
///
/// A blank `name` becomes [`UNKNOWN_DISPLAY_NAME`]. An empty `date` encodes
/// as a zero-length field, which decodes to `None`. Identical inputs always
/// produce identical bytes.
pub fn encode(name: &str, title: &str, text: &str, date: &str) -> EncodedReminder {
    let name = if name.trim().is_empty() {
        UNKNOWN_DISPLAY_NAME
    } else {
        name
    };

    let mut payload = Vec::with_capacity(MAX_FRAME_LEN - HEADER_LEN - CHECKSUM_LEN);
    let mut truncated = Vec::new();

    for (field, value) in ReminderField::ALL.into_iter().zip([name, title, text, date]) {
        let (fitted, was_cut) = fit_to_cap(value, field.cap());
        if was_cut {
            truncated.push(field);
        }
        // fit_to_cap guarantees len <= cap <= u8::MAX
        payload.push(fitted.len() as u8);
        payload.extend_from_slice(fitted.as_bytes());
    }

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    bytes.push(FRAME_MAGIC);
    bytes.push(CMD_MESSAGE_REMINDER);
    bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&payload);
    bytes.push(checksum(&bytes[1..]));

    EncodedReminder { bytes, truncated }
}

/// Cut `value` to at most `cap` bytes, ending with the truncation marker when
/// anything was dropped.
fn fit_to_cap(value: &str, cap: usize) -> (String, bool) {
    if value.len() <= cap {
        return (value.to_owned(), false);
    }
    let mut end = cap.saturating_sub(TRUNCATION_MARKER.len());
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}{TRUNCATION_MARKER}", &value[..end]), true)
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

// ─── Decode ──────────────────────────────────────────────────────────

/// Parse a message-reminder frame, as the peripheral does.
pub fn decode(bytes: &[u8]) -> Result<ReminderFields, PacketError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(PacketError::TooShort(bytes.len()));
    }
    if bytes[0] != FRAME_MAGIC {
        return Err(PacketError::BadMagic(bytes[0]));
    }
    if bytes[1] != CMD_MESSAGE_REMINDER {
        return Err(PacketError::UnknownCommand(bytes[1]));
    }

    let declared = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
    let actual = bytes.len() - HEADER_LEN - CHECKSUM_LEN;
    if declared != actual {
        return Err(PacketError::LengthMismatch { declared, actual });
    }

    let body_end = HEADER_LEN + declared;
    let expected = checksum(&bytes[1..body_end]);
    if bytes[body_end] != expected {
        return Err(PacketError::ChecksumMismatch {
            expected,
            actual: bytes[body_end],
        });
    }

    let payload = &bytes[HEADER_LEN..body_end];
    let mut pos = 0usize;
    let mut values: Vec<String> = Vec::with_capacity(FIELD_COUNT);

    for field in ReminderField::ALL {
        let len = usize::from(
            *payload
                .get(pos)
                .ok_or(PacketError::MalformedField(field))?,
        );
        pos += 1;
        let raw = payload
            .get(pos..pos + len)
            .ok_or(PacketError::MalformedField(field))?;
        pos += len;
        let value = std::str::from_utf8(raw).map_err(|_| PacketError::InvalidUtf8(field))?;
        values.push(value.to_owned());
    }

    if pos != payload.len() {
        return Err(PacketError::TrailingPayload(payload.len() - pos));
    }

    let mut values = values.into_iter();
    let mut next = || values.next().unwrap_or_default();
    let name = next();
    let title = next();
    let text = next();
    let date = next();

    Ok(ReminderFields {
        name,
        title,
        text,
        date: (!date.is_empty()).then_some(date),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────
