//! Display units - consecutive messages consolidated into one list row

use crate::config::BODY_SEPARATOR;
use crate::geo::{parse_lat_lng, LatLng};
use crate::message::{Message, MessageKind, ReceiptStatus};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// One visual row: a root message plus the messages merged after it
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayUnit {
    root: Message,
    children: Vec<Message>,
    /// Timestamp of the most recently merged message
    timestamp: DateTime<Utc>,
    location: Option<LatLng>,
    /// (replaced uid, replacing uid) per correction; kept so re-merging
    /// history is a no-op and later corrections can follow the chain
    superseded: Vec<(String, String)>,
}

impl DisplayUnit {
    pub fn new(root: Message) -> Self {
        let location = locate(&root);
        Self {
            timestamp: root.timestamp,
            root,
            children: Vec::new(),
            location,
            superseded: Vec::new(),
        }
    }

    pub fn root(&self) -> &Message {
        &self.root
    }

    pub fn children(&self) -> &[Message] {
        &self.children
    }

    pub fn kind(&self) -> MessageKind {
        self.root.kind
    }

    pub fn sender(&self) -> &str {
        &self.root.sender
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn location(&self) -> Option<LatLng> {
        self.location
    }

    /// Root followed by children, in arrival order
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        std::iter::once(&self.root).chain(self.children.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The most recent message, against which the next one is compared
    pub fn tail(&self) -> &Message {
        self.children.last().unwrap_or(&self.root)
    }

    pub fn message_ids(&self) -> Vec<&str> {
        self.messages().map(|m| m.uid.as_str()).collect()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.messages().any(|m| m.uid == uid)
    }

    /// True if `uid` is present or was replaced by a correction in this unit
    pub fn has_seen(&self, uid: &str) -> bool {
        self.contains(uid) || self.superseded.iter().any(|(old, _)| old == uid)
    }

    /// Uids replaced by corrections in this unit
    pub fn superseded(&self) -> impl Iterator<Item = &str> {
        self.superseded.iter().map(|(old, _)| old.as_str())
    }

    /// Uid of the live message standing in for `uid`.
    ///
    /// Follows the correction chain, so a correction naming the original id
    /// lands on whichever message last replaced it.
    pub fn current_uid<'a>(&'a self, uid: &'a str) -> Option<&'a str> {
        let mut current = uid;
        for _ in 0..=self.superseded.len() {
            if self.contains(current) {
                return Some(current);
            }
            current = self
                .superseded
                .iter()
                .find(|(old, _)| old == current)
                .map(|(_, new)| new.as_str())?;
        }
        None
    }

    /// Rendered body: all bodies joined in arrival order
    pub fn body(&self) -> String {
        let mut out = self.root.body.clone();
        for child in &self.children {
            out.push_str(BODY_SEPARATOR);
            out.push_str(&child.body);
        }
        out
    }

    /// Lowest receipt status across the unit
    pub fn receipt_status(&self) -> ReceiptStatus {
        self.messages()
            .map(|m| m.receipt)
            .min()
            .unwrap_or(ReceiptStatus::None)
    }

    /// Whether `next` can be merged into this unit
    pub fn accepts(&self, next: &Message, window_ms: i64) -> bool {
        if let Some(target) = next.corrected_uid.as_deref() {
            if self.has_seen(target) {
                return true;
            }
        }
        self.tail().is_consecutive(next, window_ms)
    }

    /// Merge `next` into this unit.
    ///
    /// A correction replaces the message it names in place; anything else is
    /// appended as a new child.
    pub fn merge(&mut self, next: Message) {
        if let Some(target) = next.corrected_uid.as_deref() {
            if let Some(live) = self.current_uid(target).map(str::to_string) {
                let replaced = (live.clone(), next.uid.clone());
                if self.root.uid == live {
                    self.root = next;
                } else if let Some(child) = self.children.iter_mut().find(|c| c.uid == live) {
                    *child = next;
                }
                self.superseded.push(replaced);
                self.refresh();
                return;
            }
        }

        self.timestamp = next.timestamp;
        if self.location.is_none() {
            self.location = locate(&next);
        }
        self.children.push(next);
    }

    /// Absorb every message of `other` as if it had been merged one by one
    pub fn absorb(&mut self, other: DisplayUnit) {
        self.superseded.extend(other.superseded);
        self.merge(other.root);
        for child in other.children {
            self.merge(child);
        }
    }

    /// Update the receipt of the message with `uid`; returns false if absent
    pub fn set_receipt(&mut self, uid: &str, status: ReceiptStatus) -> bool {
        if self.root.uid == uid {
            self.root.receipt = status;
            return true;
        }
        match self.children.iter_mut().find(|c| c.uid == uid) {
            Some(child) => {
                child.receipt = status;
                true
            }
            None => false,
        }
    }

    /// Remove every message whose uid is in `ids`.
    ///
    /// Returns `None` when nothing is left of the unit, otherwise the
    /// (possibly unchanged) unit and whether it changed.
    pub fn remove_ids(self, ids: &HashSet<String>) -> Option<(DisplayUnit, bool)> {
        if !self.messages().any(|m| ids.contains(&m.uid)) {
            return Some((self, false));
        }
        let mut remaining = self
            .messages()
            .filter(|m| !ids.contains(&m.uid))
            .cloned()
            .collect::<Vec<_>>()
            .into_iter();

        let root = remaining.next()?;
        let mut unit = DisplayUnit::new(root);
        unit.superseded = self.superseded;
        for child in remaining {
            unit.timestamp = child.timestamp;
            if unit.location.is_none() {
                unit.location = locate(&child);
            }
            unit.children.push(child);
        }
        Some((unit, true))
    }

    /// Message offered for editing: the last child if it has content, else the root
    pub fn message_for_correction(&self) -> &Message {
        match self.children.last() {
            Some(candidate) if !candidate.body.is_empty() => candidate,
            _ => &self.root,
        }
    }

    pub fn uid_for_correction(&self) -> &str {
        &self.message_for_correction().uid
    }

    /// Plain text for copying: bodies joined by newlines
    pub fn content_for_clipboard(&self) -> String {
        self.messages()
            .map(|m| m.body.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn refresh(&mut self) {
        self.timestamp = self.tail().timestamp.max(self.root.timestamp);
        let location = self.messages().find_map(locate);
        self.location = location;
    }
}

/// Only direct messages carry a location for the map view
fn locate(msg: &Message) -> Option<LatLng> {
    match msg.kind {
        MessageKind::Incoming | MessageKind::Outgoing => parse_lat_lng(&msg.body),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::test_support::*;

    #[test]
    fn test_merge_appends_and_advances_timestamp() {
        let mut unit = DisplayUnit::new(inc("a", 0, "A-body"));
        unit.merge(inc("b", 10_000, "B-body"));
        assert_eq!(unit.body(), "A-body<br/>B-body");
        assert_eq!(unit.timestamp(), at(10_000));
        assert_eq!(unit.message_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_correction_replaces_child() {
        let mut unit = DisplayUnit::new(out("a", 0, "first"));
        unit.merge(out("b", 1_000, "secnod"));
        unit.merge(out("c", 5_000, "second").correcting("b"));

        assert_eq!(unit.body(), "first<br/>second");
        assert_eq!(unit.len(), 2);
        assert!(unit.contains("c"));
        assert!(!unit.contains("b"));
        assert!(unit.has_seen("b"));
        assert_eq!(unit.timestamp(), at(5_000));
    }

    #[test]
    fn test_correction_replaces_root() {
        let mut unit = DisplayUnit::new(out("a", 0, "helo"));
        unit.merge(out("b", 500_000, "hello").correcting("a"));
        assert_eq!(unit.body(), "hello");
        assert_eq!(unit.len(), 1);
        assert_eq!(unit.root().uid, "b");
    }

    #[test]
    fn test_correction_chain_naming_original() {
        let mut unit = DisplayUnit::new(out("a", 0, "helo"));
        unit.merge(out("a2", 5_000, "hello").correcting("a"));
        let again = out("a3", 9_000, "hello!").correcting("a");
        assert!(unit.accepts(&again, 60_000));
        unit.merge(again);

        assert_eq!(unit.len(), 1);
        assert_eq!(unit.body(), "hello!");
        assert_eq!(unit.root().uid, "a3");
        assert!(unit.has_seen("a") && unit.has_seen("a2"));
        assert_eq!(unit.current_uid("a"), Some("a3"));
    }

    #[test]
    fn test_correction_refreshes_location() {
        let mut unit = DisplayUnit::new(inc("a", 0, "LatLng: 1.5N, 2.5E"));
        unit.merge(inc("b", 2_000, "LatLng: 3.5N, 4.5E").correcting("a"));
        assert_eq!(unit.location(), Some(LatLng { latitude: 3.5, longitude: 4.5 }));
    }

    #[test]
    fn test_receipt_status_is_lowest() {
        let mut unit = DisplayUnit::new(out("a", 0, "x").with_receipt(ReceiptStatus::Delivered));
        unit.merge(out("b", 1_000, "y").with_receipt(ReceiptStatus::ClientSent));
        assert_eq!(unit.receipt_status(), ReceiptStatus::ClientSent);
        assert!(unit.set_receipt("b", ReceiptStatus::Delivered));
        assert_eq!(unit.receipt_status(), ReceiptStatus::Delivered);
        assert!(!unit.set_receipt("zzz", ReceiptStatus::Delivered));
    }

    #[test]
    fn test_remove_ids() {
        let mut unit = DisplayUnit::new(inc("a", 0, "one"));
        unit.merge(inc("b", 1_000, "two"));
        unit.merge(inc("c", 2_000, "three"));

        let ids: HashSet<String> = ["a".to_string()].into_iter().collect();
        let (unit, changed) = unit.remove_ids(&ids).unwrap();
        assert!(changed);
        assert_eq!(unit.root().uid, "b");
        assert_eq!(unit.body(), "two<br/>three");

        let ids: HashSet<String> = ["b".to_string(), "c".to_string()].into_iter().collect();
        assert!(unit.remove_ids(&ids).is_none());
    }

    #[test]
    fn test_location_from_body() {
        let unit = DisplayUnit::new(inc("a", 0, "LatLng: 1.5N, 2.5E"));
        assert_eq!(unit.location(), Some(LatLng { latitude: 1.5, longitude: 2.5 }));

        let unit = DisplayUnit::new(inc("a", 0, "LatLng: nowhere"));
        assert!(unit.location().is_none());
        assert_eq!(unit.body(), "LatLng: nowhere");
    }

    #[test]
    fn test_message_for_correction() {
        let mut unit = DisplayUnit::new(out("a", 0, "x"));
        assert_eq!(unit.uid_for_correction(), "a");
        unit.merge(out("b", 1_000, "y"));
        assert_eq!(unit.uid_for_correction(), "b");
        assert_eq!(unit.content_for_clipboard(), "x\ny");
    }
}
