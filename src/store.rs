//! Message store facade
//!
//! Owns the in-memory cache of display units for one conversation and folds
//! both paged history and live messages into it.

use crate::config::Config;
use crate::consolidate::{append_message, flatten, merge_sequential, tail_merge};
use crate::error::Result;
use crate::history::{HistoryFilter, HistoryRecord, HistoryStore};
use crate::message::Message;
use crate::unit::DisplayUnit;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A history query to run, possibly off the owner thread
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    pub conversation: String,
    pub filter: HistoryFilter,
    /// Exclusive upper bound; `None` fetches the most recent page
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub initial: bool,
}

impl FetchPlan {
    pub fn run(&self, history: &dyn HistoryStore) -> Result<Vec<HistoryRecord>> {
        match self.before {
            Some(before) => {
                history.find_last_before(&self.filter, &self.conversation, before, self.limit)
            }
            None => history.find_last(&self.filter, &self.conversation, self.limit),
        }
    }
}

/// Cache plus history paging for one conversation
pub struct MessageStore {
    conversation: String,
    history: Arc<dyn HistoryStore>,
    filter: HistoryFilter,
    chunk_size: usize,
    window_ms: i64,
    cache: Vec<DisplayUnit>,
    history_loaded: bool,
    boundary: Option<DateTime<Utc>>,
    skip_next_live: bool,
    refresh_requested: bool,
}

impl MessageStore {
    pub fn new(conversation: &str, history: Arc<dyn HistoryStore>, config: &Config) -> Self {
        Self {
            conversation: conversation.to_string(),
            history,
            filter: HistoryFilter::all(),
            chunk_size: config.history_chunk_size,
            window_ms: config.consecutive_window_ms,
            cache: Vec::new(),
            history_loaded: false,
            boundary: None,
            skip_next_live: false,
            refresh_requested: false,
        }
    }

    pub fn with_filter(mut self, filter: HistoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn conversation(&self) -> &str {
        &self.conversation
    }

    pub fn history(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.history)
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn units(&self) -> &[DisplayUnit] {
        &self.cache
    }

    pub(crate) fn units_mut(&mut self) -> &mut Vec<DisplayUnit> {
        &mut self.cache
    }

    pub fn is_history_loaded(&self) -> bool {
        self.history_loaded
    }

    pub fn is_refresh_requested(&self) -> bool {
        self.refresh_requested
    }

    /// Exclusive upper bound used for the next older page
    pub fn boundary(&self) -> Option<DateTime<Utc>> {
        self.boundary
    }

    /// Load a history page.
    ///
    /// With `initial` and history already loaded this returns the cache as-is.
    /// Otherwise the next page is fetched and merged; the whole cache is
    /// returned for `initial`, only the new page otherwise. A failing history
    /// store leaves the cache untouched.
    pub fn get_page(&mut self, initial: bool) -> Vec<Message> {
        let plan = match self.plan_fetch(initial) {
            Some(plan) => plan,
            None => return flatten(&self.cache),
        };

        match plan.run(self.history.as_ref()) {
            Ok(records) => self.apply_fetch(&plan, records),
            Err(e) => {
                warn!(conversation = %self.conversation, error = %e, "history unavailable, keeping cache");
                if initial {
                    flatten(&self.cache)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Decide what to fetch next; `None` when the cached initial page can be reused
    pub fn plan_fetch(&mut self, initial: bool) -> Option<FetchPlan> {
        if initial && self.history_loaded && !self.refresh_requested {
            return None;
        }

        if self.refresh_requested {
            debug!(conversation = %self.conversation, "refreshing message cache");
            self.clear();
            self.refresh_requested = false;
        }

        // The boundary outlives deletions, so removed messages stay gone
        let before = self.boundary.or_else(|| self.oldest_timestamp());

        Some(FetchPlan {
            conversation: self.conversation.clone(),
            filter: self.filter,
            before,
            limit: self.chunk_size,
            initial,
        })
    }

    /// Merge fetched records into the cache
    pub fn apply_fetch(&mut self, plan: &FetchPlan, records: Vec<HistoryRecord>) -> Vec<Message> {
        let page: Vec<Message> = records.into_iter().map(HistoryRecord::into_message).collect();
        let page_units = merge_sequential(Vec::new(), &page, self.window_ms);

        let cache = std::mem::take(&mut self.cache);
        let before = cache.len();
        self.cache = tail_merge(page_units, cache, self.window_ms);
        self.history_loaded = true;
        self.boundary = match (self.boundary, self.oldest_timestamp()) {
            (Some(kept), Some(oldest)) => Some(kept.min(oldest)),
            (kept, oldest) => kept.or(oldest),
        };

        info!(
            conversation = %self.conversation,
            fetched = page.len(),
            units_added = self.cache.len().saturating_sub(before),
            "history page merged"
        );

        if plan.initial {
            flatten(&self.cache)
        } else {
            page
        }
    }

    /// Append a live message; returns whether the cache changed
    pub fn append_live(&mut self, msg: Message) -> bool {
        self.append_live_at(msg).is_some()
    }

    /// Append a live message, returning the index of the unit it landed in
    pub fn append_live_at(&mut self, msg: Message) -> Option<usize> {
        if self.skip_next_live {
            self.skip_next_live = false;
            debug!(uid = %msg.uid, "live message already displayed, not caching");
            return None;
        }
        if self.cache.iter().any(|u| u.has_seen(&msg.uid)) {
            return None;
        }
        Some(append_message(&mut self.cache, msg, self.window_ms))
    }

    /// The next live message has already been echoed locally
    pub fn suppress_next_live(&mut self) {
        self.skip_next_live = true;
    }

    /// Drop the cache on the next page load (e.g. after a transfer status change)
    pub fn request_refresh(&mut self) {
        self.refresh_requested = true;
    }

    /// Forget everything so the next initial page reloads from history
    pub fn clear(&mut self) {
        self.cache.clear();
        self.history_loaded = false;
        self.boundary = None;
    }

    fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.cache
            .first()
            .and_then(|u| u.messages().map(|m| m.timestamp).min())
    }
}
