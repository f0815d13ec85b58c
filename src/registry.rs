//! Active session registry
//!
//! Process-wide record of open conversations and of the one that currently
//! has focus. It is created once and handed to whoever needs it. Session
//! metadata and the last focused chat are persisted as JSON so the last
//! conversation can be reopened after a restart.

use crate::avatar::AvatarCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::session::{ConversationSession, SharedSession};
use crate::store::MessageStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Single,
    MultiUser,
}

/// Session metadata stored in the registry file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mode: ChatMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_focused: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sessions: HashMap<String, SessionMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<String>,
}

#[derive(Default)]
struct Inner {
    open: HashMap<String, SharedSession>,
    file: RegistryFile,
}

pub struct ActiveSessionRegistry {
    config: Config,
    history: Arc<dyn HistoryStore>,
    registry_path: PathBuf,
    inner: Mutex<Inner>,
    avatars: AvatarCache,
}

impl ActiveSessionRegistry {
    pub fn new(config: &Config, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            config: config.clone(),
            history,
            registry_path: config.registry_file.clone(),
            inner: Mutex::new(Inner::default()),
            avatars: AvatarCache::from_config(config),
        }
    }

    /// Load persisted metadata; returns the number of known sessions
    pub fn load(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        if !self.registry_path.exists() {
            inner.file = RegistryFile::default();
            return Ok(0);
        }

        let content = fs::read_to_string(&self.registry_path)?;
        inner.file = serde_json::from_str(&content)?;
        debug!(
            path = %self.registry_path.display(),
            sessions = inner.file.sessions.len(),
            "loaded session registry"
        );
        Ok(inner.file.sessions.len())
    }

    /// Open a conversation, reusing its live session if there is one
    pub fn open(
        &self,
        chat_id: &str,
        display_name: Option<&str>,
        mode: ChatMode,
    ) -> Result<SharedSession> {
        let mut inner = self.inner.lock();

        let now = Utc::now();
        let previous = inner.file.sessions.get(chat_id);
        let meta = SessionMeta {
            chat_id: chat_id.to_string(),
            display_name: display_name
                .map(str::to_string)
                .or_else(|| previous.and_then(|p| p.display_name.clone())),
            mode,
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            last_focused: previous.and_then(|p| p.last_focused),
        };
        inner.file.sessions.insert(chat_id.to_string(), meta);

        let live = inner
            .open
            .get(chat_id)
            .filter(|s| !s.lock().is_disposed())
            .cloned();
        let session = match live {
            Some(session) => session,
            None => {
                let store = MessageStore::new(chat_id, Arc::clone(&self.history), &self.config);
                let session = ConversationSession::new(chat_id, store).shared();
                inner.open.insert(chat_id.to_string(), Arc::clone(&session));
                info!(chat_id, "session opened");
                session
            }
        };

        save(&self.registry_path, &inner.file)?;
        Ok(session)
    }

    /// The live session for `chat_id`, if open
    pub fn get(&self, chat_id: &str) -> Option<SharedSession> {
        self.inner.lock().open.get(chat_id).cloned()
    }

    pub fn require(&self, chat_id: &str) -> Result<SharedSession> {
        self.get(chat_id)
            .ok_or_else(|| Error::SessionNotFound(chat_id.to_string()))
    }

    /// Change focus; returns the previously focused chat
    pub fn set_current(&self, chat_id: Option<&str>) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        if let Some(id) = chat_id {
            if !inner.open.contains_key(id) {
                return Err(Error::SessionNotFound(id.to_string()));
            }
            if let Some(meta) = inner.file.sessions.get_mut(id) {
                meta.last_focused = Some(Utc::now());
            }
        }
        let previous = std::mem::replace(&mut inner.file.current, chat_id.map(str::to_string));
        save(&self.registry_path, &inner.file)?;
        Ok(previous)
    }

    pub fn current(&self) -> Option<String> {
        self.inner.lock().file.current.clone()
    }

    /// Metadata of the chat that had focus last, even across restarts
    pub fn last_chat(&self) -> Option<SessionMeta> {
        let inner = self.inner.lock();
        let current = inner.file.current.as_ref()?;
        inner.file.sessions.get(current).cloned()
    }

    /// Close a conversation: dispose its session and forget its metadata
    pub fn close(&self, chat_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let session = inner.open.remove(chat_id);
        if let Some(session) = &session {
            session.lock().dispose();
        }
        let forgotten = inner.file.sessions.remove(chat_id).is_some();
        if inner.file.current.as_deref() == Some(chat_id) {
            inner.file.current = None;
        }
        if forgotten {
            save(&self.registry_path, &inner.file)?;
        }
        Ok(session.is_some() || forgotten)
    }

    /// Known sessions, most recently updated first
    pub fn sessions(&self) -> Vec<SessionMeta> {
        let inner = self.inner.lock();
        let mut all: Vec<SessionMeta> = inner.file.sessions.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    /// Avatars shared by every open conversation
    pub fn avatars(&self) -> &AvatarCache {
        &self.avatars
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().open.len()
    }

    /// Dispose every open session and drop cached avatars; persisted
    /// metadata is kept
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        for (_, session) in inner.open.drain() {
            session.lock().dispose();
        }
        self.avatars.clear();
    }
}

/// Write the registry atomically
fn save(path: &Path, file: &RegistryFile) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    let json = serde_json::to_string_pretty(file)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
