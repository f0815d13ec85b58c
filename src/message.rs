//! Chat message model
//!
//! A `Message` is one chat event as delivered by the protocol layer or read back
//! from history. Messages are only mutated for receipt status updates.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What kind of chat event a message represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Incoming,
    Outgoing,
    Status,
    System,
    Error,
    FileTransferSend,
    FileTransferReceive,
    FileTransferHistory,
    StickerSend,
}

impl MessageKind {
    pub fn is_file_transfer(self) -> bool {
        matches!(
            self,
            MessageKind::FileTransferSend
                | MessageKind::FileTransferReceive
                | MessageKind::FileTransferHistory
                | MessageKind::StickerSend
        )
    }

    pub fn is_system(self) -> bool {
        matches!(self, MessageKind::System | MessageKind::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Incoming => "incoming",
            MessageKind::Outgoing => "outgoing",
            MessageKind::Status => "status",
            MessageKind::System => "system",
            MessageKind::Error => "error",
            MessageKind::FileTransferSend => "file_transfer_send",
            MessageKind::FileTransferReceive => "file_transfer_receive",
            MessageKind::FileTransferHistory => "file_transfer_history",
            MessageKind::StickerSend => "sticker_send",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "incoming" => MessageKind::Incoming,
            "outgoing" => MessageKind::Outgoing,
            "status" => MessageKind::Status,
            "system" => MessageKind::System,
            "error" => MessageKind::Error,
            "file_transfer_send" => MessageKind::FileTransferSend,
            "file_transfer_receive" => MessageKind::FileTransferReceive,
            "file_transfer_history" => MessageKind::FileTransferHistory,
            "sticker_send" => MessageKind::StickerSend,
            _ => return None,
        };
        Some(kind)
    }
}

/// Encryption applied to the message on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    #[default]
    Plain,
    Omemo,
    Otr,
}

impl EncryptionType {
    pub fn as_i32(self) -> i32 {
        match self {
            EncryptionType::Plain => 0,
            EncryptionType::Omemo => 1,
            EncryptionType::Otr => 2,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => EncryptionType::Omemo,
            2 => EncryptionType::Otr,
            _ => EncryptionType::Plain,
        }
    }
}

/// Delivery state of an outgoing message, ordered from least to most confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    #[default]
    None,
    ClientSent,
    ServerSent,
    Delivered,
}

impl ReceiptStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            ReceiptStatus::None => 0,
            ReceiptStatus::ClientSent => 1,
            ReceiptStatus::ServerSent => 2,
            ReceiptStatus::Delivered => 4,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => ReceiptStatus::ClientSent,
            2 => ReceiptStatus::ServerSent,
            4 => ReceiptStatus::Delivered,
            _ => ReceiptStatus::None,
        }
    }
}

/// File attached to a file transfer message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    #[serde(default)]
    pub outgoing: bool,
}

/// Closed view of what a message carries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    DirectMessage(&'a str),
    FileTransferRequest(Option<&'a FileInfo>),
    FileTransferRecord(Option<&'a FileInfo>),
    SystemNotice(&'a str),
    ErrorNotice(&'a str),
}

/// A single chat event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uid: String,
    pub sender: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub body: String,
    #[serde(default)]
    pub encryption: EncryptionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_uid: Option<String>,
    #[serde(default)]
    pub receipt: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
}

/// Bodies that are links to uploaded files
static HTTP_FILE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(?:aesgcm:|https?:).*").expect("Invalid file link regex"));

/// XHTML formatted bodies
static HTML_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*<[A-Za-z][A-Za-z0-9]*(?:\s[^>]*)?/?>.*$").expect("Invalid markup regex")
});

impl Message {
    pub fn new(
        uid: impl Into<String>,
        sender: impl Into<String>,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        let sender = sender.into();
        Self {
            uid: uid.into(),
            sender_name: sender.clone(),
            sender,
            timestamp,
            kind,
            body: body.into(),
            encryption: EncryptionType::Plain,
            corrected_uid: None,
            receipt: ReceiptStatus::None,
            file: None,
        }
    }

    pub fn incoming(
        uid: impl Into<String>,
        sender: impl Into<String>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(uid, sender, MessageKind::Incoming, timestamp, body)
    }

    pub fn outgoing(
        uid: impl Into<String>,
        sender: impl Into<String>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(uid, sender, MessageKind::Outgoing, timestamp, body)
    }

    /// Mark this message as replacing the message with `uid`
    pub fn correcting(mut self, uid: impl Into<String>) -> Self {
        self.corrected_uid = Some(uid.into());
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn with_encryption(mut self, encryption: EncryptionType) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_receipt(mut self, receipt: ReceiptStatus) -> Self {
        self.receipt = receipt;
        self
    }

    pub fn with_file(mut self, file: FileInfo) -> Self {
        self.file = Some(file);
        self
    }

    pub fn is_correction(&self) -> bool {
        self.corrected_uid.is_some()
    }

    pub fn payload(&self) -> Payload<'_> {
        match self.kind {
            MessageKind::System => Payload::SystemNotice(&self.body),
            MessageKind::Error => Payload::ErrorNotice(&self.body),
            MessageKind::FileTransferSend
            | MessageKind::FileTransferReceive
            | MessageKind::StickerSend => Payload::FileTransferRequest(self.file.as_ref()),
            MessageKind::FileTransferHistory => Payload::FileTransferRecord(self.file.as_ref()),
            MessageKind::Incoming | MessageKind::Outgoing | MessageKind::Status => {
                Payload::DirectMessage(&self.body)
            }
        }
    }

    /// True if this message must always get a display unit of its own
    pub fn is_non_mergeable(&self) -> bool {
        if self.kind.is_file_transfer() || self.kind.is_system() {
            return true;
        }
        let body = self.body.as_str();
        if body.is_empty() {
            return false;
        }
        HTTP_FILE_LINK.is_match(body)
            || HTML_MARKUP.is_match(body)
            || body.contains("geo:")
            || body.contains("LatLng:")
    }

    /// Whether `next` may be merged after this message.
    ///
    /// A correction of this message always qualifies. Otherwise both messages
    /// must be mergeable, come from the same sender with the same kind and
    /// encryption, and `next` must arrive within `window_ms`.
    pub fn is_consecutive(&self, next: &Message, window_ms: i64) -> bool {
        if next.corrected_uid.as_deref() == Some(self.uid.as_str()) {
            return true;
        }
        if self.is_non_mergeable() || next.is_non_mergeable() {
            return false;
        }
        let same_sender = self.kind == next.kind && self.sender == next.sender;
        let same_encryption = self.encryption == next.encryption;
        let elapsed = (next.timestamp - self.timestamp).num_milliseconds();

        same_sender && same_encryption && elapsed < window_ms
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_consecutive_within_window() {
        let a = inc("a", 0, "hello");
        let b = inc("b", 59_999, "again");
        assert!(a.is_consecutive(&b, 60_000));
    }

    #[test]
    fn test_not_consecutive_after_window() {
        let a = inc("a", 0, "hello");
        let b = inc("b", 60_000, "again");
        assert!(!a.is_consecutive(&b, 60_000));
    }

    #[test]
    fn test_not_consecutive_different_sender_or_kind() {
        let a = inc("a", 0, "hello");
        let mut b = inc("b", 1_000, "again");
        b.sender = "carol@example.org".into();
        assert!(!a.is_consecutive(&b, 60_000));

        let c = out("c", 1_000, "reply");
        assert!(!a.is_consecutive(&c, 60_000));
    }

    #[test]
    fn test_not_consecutive_different_encryption() {
        let a = inc("a", 0, "hello");
        let b = inc("b", 1_000, "again").with_encryption(EncryptionType::Omemo);
        assert!(!a.is_consecutive(&b, 60_000));
    }

    #[test]
    fn test_correction_always_consecutive() {
        let a = out("a", 0, "helo");
        let fix = out("b", 3_600_000, "hello").correcting("a");
        assert!(a.is_consecutive(&fix, 60_000));
    }

    #[test]
    fn test_non_mergeable_bodies() {
        assert!(inc("a", 0, "LatLng: 1.3N, 103.8E").is_non_mergeable());
        assert!(inc("a", 0, "geo:1.3,103.8").is_non_mergeable());
        assert!(inc("a", 0, "https://upload.example.org/f.jpg").is_non_mergeable());
        assert!(inc("a", 0, "aesgcm://upload.example.org/f.jpg#key").is_non_mergeable());
        assert!(inc("a", 0, "<b>bold</b> text").is_non_mergeable());
        assert!(!inc("a", 0, "see https://example.org").is_non_mergeable());
        assert!(!inc("a", 0, "a < b").is_non_mergeable());
        assert!(!inc("a", 0, "").is_non_mergeable());
    }

    #[test]
    fn test_non_mergeable_kinds() {
        let sys = Message::new("s", "bob@example.org", MessageKind::System, at(0), "joined");
        assert!(sys.is_non_mergeable());
        let ft = Message::new("f", "bob@example.org", MessageKind::FileTransferReceive, at(0), "");
        assert!(ft.is_non_mergeable());
        let a = inc("a", 0, "hi");
        assert!(!a.is_consecutive(&sys, 60_000));
    }

    #[test]
    fn test_payload() {
        let sys = Message::new("s", "x", MessageKind::System, at(0), "joined");
        assert_eq!(sys.payload(), Payload::SystemNotice("joined"));
        let rec = Message::new("f", "x", MessageKind::FileTransferHistory, at(0), "").with_file(FileInfo {
            name: "cat.png".into(),
            mime_type: "image/png".into(),
            size: 42,
            outgoing: false,
        });
        assert!(matches!(rec.payload(), Payload::FileTransferRecord(Some(f)) if f.name == "cat.png"));
        assert_eq!(inc("a", 0, "hi").payload(), Payload::DirectMessage("hi"));
    }

    #[test]
    fn test_receipt_ordering() {
        assert!(ReceiptStatus::None < ReceiptStatus::ClientSent);
        assert!(ReceiptStatus::ServerSent < ReceiptStatus::Delivered);
        assert_eq!(ReceiptStatus::from_i32(4), ReceiptStatus::Delivered);
        assert_eq!(ReceiptStatus::from_i32(99), ReceiptStatus::None);
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [MessageKind::Incoming, MessageKind::FileTransferHistory, MessageKind::StickerSend] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("bogus"), None);
    }

    #[test]
    fn test_message_json() {
        let msg = out("a", 1_000, "hi").correcting("z");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"outgoing\""));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }
}
