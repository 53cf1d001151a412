//! Persistent conversation session id.
//!
//! `SessionStore` is a cloneable handle; every clone sees the same value.
//! Only the turn coordinator writes to it, from backend replies.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ai_therapist_types::SessionId;
use tokio::sync::watch;

/// Name of the single persisted key.
pub const SESSION_KEY: &str = "chatSessionId";

const APP_DIR: &str = "ai-therapist";

/// Durable backing for the session id.
pub trait SessionStorage: Send + Sync {
    /// `Ok(None)` means no session has been stored yet.
    fn load(&self) -> io::Result<Option<String>>;

    fn save(&self, token: &str) -> io::Result<()>;
}

/// Stores the token as a plain string in a single file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/ai-therapist/chatSessionId`, when the platform has a data dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR).join(SESSION_KEY))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)
    }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    value: Mutex<Option<String>>,
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> io::Result<Option<String>> {
        let value = self
            .value
            .lock()
            .map_err(|_| io::Error::other("session storage lock poisoned"))?;
        Ok(value.clone())
    }

    fn save(&self, token: &str) -> io::Result<()> {
        let mut value = self
            .value
            .lock()
            .map_err(|_| io::Error::other("session storage lock poisoned"))?;
        *value = Some(token.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct SessionStore {
    current: Arc<watch::Sender<Option<SessionId>>>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Loads the persisted id, if any. A storage that cannot be read is
    /// treated as empty.
    pub fn open(storage: impl SessionStorage + 'static) -> Self {
        let initial = match storage.load() {
            Ok(token) => token.map(SessionId::from),
            Err(e) => {
                tracing::warn!("failed to load stored session, starting without one: {e}");
                None
            }
        };
        if let Some(id) = &initial {
            tracing::debug!("restored session {id}");
        }

        let (current, _) = watch::channel(initial);
        Self {
            current: Arc::new(current),
            storage: Arc::new(storage),
        }
    }

    pub fn in_memory() -> Self {
        Self::open(MemoryStorage::default())
    }

    pub fn get(&self) -> Option<SessionId> {
        self.current.borrow().clone()
    }

    /// Replaces the current id. Persisting is best effort: on failure the
    /// in-memory value still holds for the rest of the process lifetime.
    pub fn set(&self, id: SessionId) {
        if let Err(e) = self.storage.save(id.as_str()) {
            tracing::warn!("failed to persist session {id}: {e}");
        }
        let previous = self.current.send_replace(Some(id.clone()));
        if previous.as_ref() != Some(&id) {
            tracing::info!("adopted session {id}");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionId>> {
        self.current.subscribe()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("current", &*self.current.borrow())
            .finish()
    }
}
