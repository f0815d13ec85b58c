//! Presentation adapter
//!
//! Flat, oldest-first view over the display units of one conversation, plus
//! the styling classification and the mutations a rendering layer triggers.

use crate::consolidate::flatten;
use crate::geo::LatLng;
use crate::history::{HistoryRecord, HistoryStore};
use crate::message::{Message, MessageKind, ReceiptStatus};
use crate::store::{FetchPlan, MessageStore};
use crate::unit::DisplayUnit;
use std::collections::HashSet;
use tracing::{debug, warn};

/// How a unit is styled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    Incoming,
    Outgoing,
    CorrectedOutgoing,
    System,
    Error,
    FileTransferIncoming,
    FileTransferOutgoing,
}

impl DisplayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayKind::Incoming => "incoming",
            DisplayKind::Outgoing => "outgoing",
            DisplayKind::CorrectedOutgoing => "corrected",
            DisplayKind::System => "system",
            DisplayKind::Error => "error",
            DisplayKind::FileTransferIncoming => "file-in",
            DisplayKind::FileTransferOutgoing => "file-out",
        }
    }
}

/// One notification per mutation batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange {
    /// A unit was added at the end
    Appended(usize),
    /// The unit at this index changed in place
    Updated(usize),
    /// Older units were inserted at the front
    Prepended { added: usize },
    /// Messages were deleted; `units` rows disappeared entirely
    Removed { messages: usize, units: usize },
    /// Anything else; redraw everything
    Reset,
}

pub trait ListObserver: Send {
    fn on_change(&self, change: &ListChange);
}

impl<F> ListObserver for F
where
    F: Fn(&ListChange) + Send,
{
    fn on_change(&self, change: &ListChange) {
        self(change)
    }
}

/// List shape before a page is merged
#[derive(Debug, Clone, Copy)]
struct PageMark {
    units: usize,
    head_len: Option<usize>,
}

/// The list a rendering surface binds to
pub struct ChatListAdapter {
    store: MessageStore,
    correction_target: Option<String>,
    observers: Vec<Box<dyn ListObserver>>,
}

impl ChatListAdapter {
    pub fn new(store: MessageStore) -> Self {
        Self {
            store,
            correction_target: None,
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: impl ListObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MessageStore {
        &mut self.store
    }

    pub fn count(&self) -> usize {
        self.store.units().len()
    }

    pub fn unit(&self, index: usize) -> Option<&DisplayUnit> {
        self.store.units().get(index)
    }

    /// Root message of the unit at `index`
    pub fn message_at(&self, index: usize) -> Option<&Message> {
        self.unit(index).map(DisplayUnit::root)
    }

    pub fn units(&self) -> &[DisplayUnit] {
        self.store.units()
    }

    pub fn classify(&self, unit: &DisplayUnit) -> DisplayKind {
        let root = unit.root();
        match root.kind {
            MessageKind::Outgoing => match self.correction_target.as_deref() {
                Some(target) if unit.contains(target) => DisplayKind::CorrectedOutgoing,
                _ => DisplayKind::Outgoing,
            },
            MessageKind::System => DisplayKind::System,
            MessageKind::Error => DisplayKind::Error,
            MessageKind::FileTransferSend | MessageKind::StickerSend => {
                DisplayKind::FileTransferOutgoing
            }
            MessageKind::FileTransferReceive => DisplayKind::FileTransferIncoming,
            MessageKind::FileTransferHistory => {
                if root.file.as_ref().is_some_and(|f| f.outgoing) {
                    DisplayKind::FileTransferOutgoing
                } else {
                    DisplayKind::FileTransferIncoming
                }
            }
            MessageKind::Incoming | MessageKind::Status => DisplayKind::Incoming,
        }
    }

    /// Load a history page and notify observers of the rows it changed
    pub fn load_page(&mut self, initial: bool) -> Vec<Message> {
        let refreshing = self.refresh_drops_rows();
        let mark = self.mark();
        let page = self.store.get_page(initial);
        if refreshing {
            self.notify(ListChange::Reset);
        } else {
            self.notify_page(mark);
        }
        page
    }

    /// Plan a fetch to run elsewhere; a pending refresh empties the list now
    pub fn plan_fetch(&mut self, initial: bool) -> Option<FetchPlan> {
        let refreshing = self.refresh_drops_rows();
        let plan = self.store.plan_fetch(initial);
        if refreshing && plan.is_some() {
            self.notify(ListChange::Reset);
        }
        plan
    }

    /// Apply a page fetched elsewhere (see `session::PageLoader`)
    pub fn apply_fetch(&mut self, plan: &FetchPlan, records: Vec<HistoryRecord>) -> Vec<Message> {
        let mark = self.mark();
        let page = self.store.apply_fetch(plan, records);
        self.notify_page(mark);
        page
    }

    /// Append a live message; returns whether the list changed
    pub fn append_live(&mut self, msg: Message) -> bool {
        let before = self.count();
        match self.store.append_live_at(msg) {
            Some(idx) if self.count() > before => {
                self.notify(ListChange::Appended(idx));
                true
            }
            Some(idx) => {
                self.notify(ListChange::Updated(idx));
                true
            }
            None => false,
        }
    }

    /// Remove every message whose uid is in `ids`; emptied units disappear.
    ///
    /// Observers hear about the whole batch once, and not at all if nothing
    /// matched. Returns the number of messages removed.
    pub fn delete_by_ids(&mut self, ids: &HashSet<String>) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let units = std::mem::take(self.store.units_mut());
        let units_before = units.len();
        let messages_before: usize = units.iter().map(DisplayUnit::len).sum();

        let mut kept = Vec::with_capacity(units_before);
        let mut changed = false;
        for unit in units {
            match unit.remove_ids(ids) {
                Some((unit, touched)) => {
                    changed |= touched;
                    kept.push(unit);
                }
                None => changed = true,
            }
        }

        let messages_after: usize = kept.iter().map(DisplayUnit::len).sum();
        let units_removed = units_before - kept.len();
        *self.store.units_mut() = kept;

        if !changed {
            return 0;
        }

        let removed = messages_before - messages_after;
        debug!(
            conversation = %self.store.conversation(),
            removed,
            units_removed,
            "deleted messages"
        );
        if self
            .correction_target
            .as_ref()
            .is_some_and(|target| ids.contains(target))
        {
            self.correction_target = None;
        }
        self.notify(ListChange::Removed {
            messages: removed,
            units: units_removed,
        });
        removed
    }

    /// Delete from the view and erase the same ids from the history store
    pub fn purge_by_ids(&mut self, ids: &HashSet<String>) -> usize {
        let removed = self.delete_by_ids(ids);
        let ids: Vec<String> = ids.iter().cloned().collect();
        let history = self.store.history();
        if let Err(e) = history.purge(self.store.conversation(), &ids) {
            warn!(conversation = %self.store.conversation(), error = %e, "history purge failed");
        }
        removed
    }

    /// Set the receipt of one message, scanning newest first.
    ///
    /// Returns the unit holding it, or `None` for an unknown id.
    pub fn update_delivery_receipt(
        &mut self,
        message_id: &str,
        status: ReceiptStatus,
    ) -> Option<&DisplayUnit> {
        let idx = self
            .store
            .units_mut()
            .iter_mut()
            .rposition(|unit| unit.set_receipt(message_id, status))?;
        self.notify(ListChange::Updated(idx));
        self.store.units().get(idx)
    }

    /// Mark the message being edited; pass `None` when editing stops
    pub fn set_correction_target(&mut self, uid: Option<String>) {
        let previous = std::mem::replace(&mut self.correction_target, uid);
        for target in [previous, self.correction_target.clone()].into_iter().flatten() {
            if let Some(idx) = self.store.units().iter().rposition(|u| u.contains(&target)) {
                self.notify(ListChange::Updated(idx));
            }
        }
    }

    pub fn correction_target(&self) -> Option<&str> {
        self.correction_target.as_deref()
    }

    /// The message offered when the user asks to edit their last message
    pub fn last_outgoing_for_correction(&self) -> Option<&Message> {
        self.store
            .units()
            .iter()
            .rev()
            .find(|u| u.kind() == MessageKind::Outgoing)
            .map(DisplayUnit::message_for_correction)
    }

    /// Every location shown by units of `kind`, oldest first
    pub fn locations_of_kind(&self, kind: MessageKind) -> Vec<LatLng> {
        self.store
            .units()
            .iter()
            .filter(|u| u.kind() == kind)
            .filter_map(DisplayUnit::location)
            .collect()
    }

    /// Every loaded message, oldest first
    pub fn messages(&self) -> Vec<Message> {
        flatten(self.store.units())
    }

    fn refresh_drops_rows(&self) -> bool {
        self.store.is_refresh_requested() && self.count() > 0
    }

    fn mark(&self) -> PageMark {
        PageMark {
            units: self.count(),
            head_len: self.unit(0).map(DisplayUnit::len),
        }
    }

    /// Describe what a merged page did to the list, relative to `mark`
    fn notify_page(&self, mark: PageMark) {
        let after = self.count();
        if after < mark.units {
            self.notify(ListChange::Reset);
            return;
        }
        let added = after - mark.units;
        if added > 0 {
            self.notify(ListChange::Prepended { added });
        }
        // The old top row sits below the new rows and may have absorbed the
        // newest messages of the page
        if let Some(len) = mark.head_len {
            if self.unit(added).map(DisplayUnit::len) != Some(len) {
                self.notify(ListChange::Updated(added));
            }
        }
    }

    fn notify(&self, change: ListChange) {
        for observer in &self.observers {
            observer.on_change(&change);
        }
    }
}
