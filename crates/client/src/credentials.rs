//! Bearer credential sources.
//!
//! The sync core never holds on to a token: it asks its [`TokenSource`] every
//! time it opens a connection or issues a request, and listens for change
//! notifications so a login elsewhere can re-arm an idle connection.

use std::sync::{Arc, Mutex, RwLock};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::storage::Storage;

/// Storage key of the persisted dashboard session.
pub const SESSION_KEY: &str = "srt-manager-storage";

/// Receives a new value every time the credential changes.
///
/// The value is a change counter; read the token itself from the source.
pub type CredentialChanges = watch::Receiver<u64>;

/// Supplies the current bearer credential and announces changes.
pub trait TokenSource: Send + Sync + 'static {
    /// The token to use right now, if the user is logged in.
    fn token(&self) -> Option<String>;

    /// Subscribe to credential changes.
    fn subscribe(&self) -> CredentialChanges;
}

/// In-process credential holder.
#[derive(Clone)]
pub struct SharedToken {
    inner: Arc<SharedTokenInner>,
}

struct SharedTokenInner {
    token: RwLock<Option<String>>,
    changes: watch::Sender<u64>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(SharedTokenInner {
                token: RwLock::new(token),
                changes,
            }),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        self.replace(Some(token.into()));
    }

    pub fn clear(&self) {
        self.replace(None);
    }

    fn replace(&self, token: Option<String>) {
        if let Ok(mut guard) = self.inner.token.write() {
            *guard = token;
        }
        self.inner.changes.send_modify(|n| *n += 1);
    }
}

impl TokenSource for SharedToken {
    fn token(&self) -> Option<String> {
        self.inner
            .token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|t| !t.is_empty())
    }

    fn subscribe(&self) -> CredentialChanges {
        self.inner.changes.subscribe()
    }
}

/// Persisted session, in the same shape the web dashboard keeps in
/// `localStorage`: `{"state":{"currentUser":{"token":"..."}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub state: SessionState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "currentUser", default)]
    pub current_user: Option<serde_json::Value>,
}

impl PersistedSession {
    pub fn with_token(username: &str, token: &str) -> Self {
        Self {
            state: SessionState {
                current_user: Some(serde_json::json!({
                    "username": username,
                    "token": token,
                })),
            },
        }
    }

    /// The token of the logged-in user. Legacy sessions that stored the user
    /// as a bare string have no token.
    pub fn token(&self) -> Option<String> {
        self.state
            .current_user
            .as_ref()?
            .get("token")?
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Token source backed by the session file shared between processes.
///
/// A filesystem watcher on the storage directory re-reads the session on
/// every event touching the file and announces a change whenever the token
/// differs from the last one seen. This is how a login performed by another
/// process reaches this one.
pub struct StoredSession {
    shared: Arc<SessionFile>,
    _watcher: RecommendedWatcher,
}

struct SessionFile {
    storage: Storage,
    last_token: Mutex<Option<String>>,
    changes: watch::Sender<u64>,
}

impl SessionFile {
    fn token(&self) -> Option<String> {
        self.storage.load::<PersistedSession>(SESSION_KEY)?.token()
    }

    /// Re-read the session and notify subscribers if the token changed.
    fn refresh(&self) {
        let current = match self.storage.load::<PersistedSession>(SESSION_KEY) {
            Some(session) => session.token(),
            // present but unparsable: caught mid-write, wait for the next event
            None if self.storage.exists(SESSION_KEY) => return,
            None => None,
        };
        let Ok(mut last) = self.last_token.lock() else {
            return;
        };
        if *last == current {
            return;
        }
        *last = current;
        drop(last);
        tracing::debug!("stored session changed in {}", self.storage.dir().display());
        self.changes.send_modify(|n| *n += 1);
    }
}

impl StoredSession {
    /// Start watching the session in `storage`. Creates the storage
    /// directory if it does not exist yet.
    pub fn watch(storage: Storage) -> notify::Result<Self> {
        storage.ensure_dir().map_err(notify::Error::io)?;

        let (changes, _) = watch::channel(0);
        let initial = storage.load::<PersistedSession>(SESSION_KEY).and_then(|s| s.token());
        let shared = Arc::new(SessionFile {
            storage,
            last_token: Mutex::new(initial),
            changes,
        });

        let session_path = shared.storage.path_of(SESSION_KEY);
        let handler = Arc::clone(&shared);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if event.paths.iter().any(|p| p.file_name() == session_path.file_name()) => {
                handler.refresh();
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("session watcher error: {e}"),
        })?;
        watcher.watch(shared.storage.dir(), RecursiveMode::NonRecursive)?;
        tracing::debug!("watching stored session in {}", shared.storage.dir().display());

        Ok(Self {
            shared,
            _watcher: watcher,
        })
    }

    pub fn session(&self) -> Option<PersistedSession> {
        self.shared.storage.load(SESSION_KEY)
    }

    /// Persist a login. Subscribers of this instance are notified at once;
    /// other processes watching the directory see the file change.
    pub fn login(&self, username: &str, token: &str) -> bool {
        let saved = self
            .shared
            .storage
            .save(SESSION_KEY, &PersistedSession::with_token(username, token));
        if saved {
            self.shared.refresh();
        }
        saved
    }

    pub fn logout(&self) {
        self.shared.storage.remove(SESSION_KEY);
        self.shared.refresh();
    }
}

impl TokenSource for StoredSession {
    fn token(&self) -> Option<String> {
        self.shared.token()
    }

    fn subscribe(&self) -> CredentialChanges {
        self.shared.changes.subscribe()
    }
}
