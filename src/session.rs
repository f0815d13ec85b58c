//! Conversation sessions
//!
//! A session owns the list of one open conversation and drives its paging
//! state machine:
//!
//! ```text
//! Uninitialized -> LoadingFirstPage -> Ready <-> LoadingNextPage
//!        any state -> Disposed
//! ```
//!
//! History fetches may run off the owner thread. Their results are applied
//! under the session lock, and only if the session has not been disposed or
//! reset since the fetch was planned.

use crate::adapter::ChatListAdapter;
use crate::consolidate::flatten;
use crate::error::{Error, Result};
use crate::history::{HistoryRecord, HistoryStore};
use crate::message::Message;
use crate::store::{FetchPlan, MessageStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    LoadingFirstPage,
    Ready,
    LoadingNextPage,
    Disposed,
}

/// A planned fetch tagged with the generation it belongs to
#[derive(Debug, Clone)]
pub struct PendingFetch {
    pub plan: FetchPlan,
    generation: u64,
}

impl PendingFetch {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of asking the session for a page
#[derive(Debug)]
pub enum LoadStep {
    /// The first page is already loaded; here is the cache
    Cached(Vec<Message>),
    /// Another fetch is in flight
    Busy,
    /// Run this fetch, then hand the result to `finish_load`
    Fetch(PendingFetch),
}

pub struct ConversationSession {
    chat_id: String,
    adapter: ChatListAdapter,
    state: SessionState,
    generation: u64,
    disposed: watch::Sender<bool>,
}

/// Sessions are shared between the registry and page loaders
pub type SharedSession = Arc<Mutex<ConversationSession>>;

impl ConversationSession {
    pub fn new(chat_id: &str, store: MessageStore) -> Self {
        let (disposed, _) = watch::channel(false);
        Self {
            chat_id: chat_id.to_string(),
            adapter: ChatListAdapter::new(store),
            state: SessionState::Uninitialized,
            generation: 0,
            disposed,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == SessionState::Disposed
    }

    pub fn adapter(&self) -> &ChatListAdapter {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut ChatListAdapter {
        &mut self.adapter
    }

    pub fn history(&self) -> Arc<dyn HistoryStore> {
        self.adapter.store().history()
    }

    /// Resolves once the session is disposed
    pub fn dispose_signal(&self) -> watch::Receiver<bool> {
        self.disposed.subscribe()
    }

    /// Plan the next page.
    ///
    /// The first call of a session always asks for the initial page. Asking
    /// for the initial page again once it is loaded returns the cache without
    /// touching history.
    pub fn begin_load(&mut self, initial: bool) -> Result<LoadStep> {
        let initial = match self.state {
            SessionState::Disposed => return Err(Error::SessionClosed(self.chat_id.clone())),
            SessionState::LoadingFirstPage | SessionState::LoadingNextPage => {
                return Ok(LoadStep::Busy)
            }
            SessionState::Uninitialized => true,
            SessionState::Ready => initial,
        };

        let plan = match self.adapter.plan_fetch(initial) {
            Some(plan) => plan,
            None => {
                self.state = SessionState::Ready;
                return Ok(LoadStep::Cached(flatten(self.adapter.units())));
            }
        };

        self.state = if initial {
            SessionState::LoadingFirstPage
        } else {
            SessionState::LoadingNextPage
        };
        self.generation += 1;
        debug!(
            chat_id = %self.chat_id,
            state = ?self.state,
            before = ?plan.before,
            generation = self.generation,
            "planned history fetch"
        );
        Ok(LoadStep::Fetch(PendingFetch {
            plan,
            generation: self.generation,
        }))
    }

    /// Apply a completed fetch. Stale results are dropped without touching the cache.
    pub fn finish_load(
        &mut self,
        fetch: PendingFetch,
        result: Result<Vec<HistoryRecord>>,
    ) -> Vec<Message> {
        if self.is_disposed() || fetch.generation != self.generation {
            debug!(
                chat_id = %self.chat_id,
                generation = fetch.generation,
                current = self.generation,
                "dropping stale history fetch"
            );
            return Vec::new();
        }

        match result {
            Ok(records) => {
                self.state = SessionState::Ready;
                self.adapter.apply_fetch(&fetch.plan, records)
            }
            Err(e) => {
                warn!(chat_id = %self.chat_id, error = %e, "history unavailable, keeping cache");
                if fetch.plan.initial {
                    // Retried on the next initial load
                    self.state = SessionState::Uninitialized;
                    flatten(self.adapter.units())
                } else {
                    self.state = SessionState::Ready;
                    Vec::new()
                }
            }
        }
    }

    /// Load a page on the current thread
    pub fn load_page(&mut self, initial: bool) -> Result<Vec<Message>> {
        match self.begin_load(initial)? {
            LoadStep::Cached(messages) => Ok(messages),
            LoadStep::Busy => Ok(Vec::new()),
            LoadStep::Fetch(fetch) => {
                let result = fetch.plan.run(self.history().as_ref());
                Ok(self.finish_load(fetch, result))
            }
        }
    }

    /// Give up on a fetch whose result will never be applied.
    ///
    /// The session returns to the state it was in before `begin_load`, and a
    /// late result for `generation` is dropped by `finish_load`.
    pub fn abandon_load(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        let state = match self.state {
            SessionState::LoadingFirstPage => SessionState::Uninitialized,
            SessionState::LoadingNextPage => SessionState::Ready,
            _ => return,
        };
        self.generation += 1;
        self.state = state;
        debug!(chat_id = %self.chat_id, state = ?state, "history fetch abandoned");
    }

    /// Abandon any in-flight fetch and let the next initial load refetch
    pub fn reset(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.generation += 1;
        self.adapter.store_mut().clear();
        self.state = SessionState::Uninitialized;
    }

    /// Close the session; in-flight fetches are cancelled and the cache dropped
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.state = SessionState::Disposed;
        self.generation += 1;
        self.adapter.store_mut().clear();
        self.disposed.send_replace(true);
        info!(chat_id = %self.chat_id, "session disposed");
    }
}

/// Rolls the session back if a load is dropped before its result lands
struct InFlight<'a> {
    session: &'a SharedSession,
    generation: u64,
    applied: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.applied {
            self.session.lock().abandon_load(self.generation);
        }
    }
}

/// Runs history fetches on the blocking pool, racing them against disposal
pub struct PageLoader {
    session: SharedSession,
}

impl PageLoader {
    pub fn new(session: SharedSession) -> Self {
        Self { session }
    }

    pub async fn load(&self, initial: bool) -> Result<Vec<Message>> {
        let (fetch, history, mut disposed, chat_id) = {
            let mut session = self.session.lock();
            let fetch = match session.begin_load(initial)? {
                LoadStep::Cached(messages) => return Ok(messages),
                LoadStep::Busy => return Ok(Vec::new()),
                LoadStep::Fetch(fetch) => fetch,
            };
            (
                fetch,
                session.history(),
                session.dispose_signal(),
                session.chat_id().to_string(),
            )
        };

        let mut in_flight = InFlight {
            session: &self.session,
            generation: fetch.generation,
            applied: false,
        };
        let plan = fetch.plan.clone();
        let task = tokio::task::spawn_blocking(move || plan.run(history.as_ref()));

        tokio::select! {
            joined = task => {
                let result = joined
                    .map_err(|e| Error::HistoryUnavailable(e.to_string()))
                    .and_then(|r| r);
                let page = self.session.lock().finish_load(fetch, result);
                in_flight.applied = true;
                Ok(page)
            }
            _ = disposed.wait_for(|d| *d) => {
                debug!(chat_id = %chat_id, "session disposed during fetch");
                Err(Error::SessionClosed(chat_id))
            }
        }
    }
}
