use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::types::{Session, SessionKey, SessionSummary};

/// A live session: the shared handle channels and the router operate on.
///
/// The transcript sits behind an async mutex so one agent turn at a time
/// mutates it — this is what serialises inbound messages per session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub key: SessionKey,
    pub state: tokio::sync::Mutex<Session>,
}

/// Lifecycle manager for persisted sessions.
///
/// One JSON transcript file per session in the configured directory.
/// The in-memory map is the source of truth while the process runs; files
/// are rewritten on every persist and loaded lazily on first reference.
pub struct SessionManager {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionManager {
    /// Create a manager rooted at `dir`, creating the directory if missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Return an existing session or lazily create a new one.
    ///
    /// The boolean is `true` when the session was created by this call.
    pub fn get_or_create(&self, key: &SessionKey) -> Result<(Arc<SessionHandle>, bool)> {
        let id = key.format();

        {
            let cache = self.cache.lock().unwrap();
            if let Some(handle) = cache.get(&id) {
                return Ok((Arc::clone(handle), false));
            }
        }

        // Not cached — try disk, then create fresh.
        let (session, created) = match self.load_from_disk(&id)? {
            Some(session) => (session, false),
            None => (Session::new(key.clone()), true),
        };

        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            key: key.clone(),
            state: tokio::sync::Mutex::new(session),
        });

        let mut cache = self.cache.lock().unwrap();
        // Handle the race where two callers created the handle simultaneously.
        let entry = cache.entry(id).or_insert_with(|| Arc::clone(&handle));
        Ok((Arc::clone(entry), created))
    }

    /// Retrieve a session by stable id, loading from disk when not cached.
    pub fn get(&self, id: &str) -> Result<Arc<SessionHandle>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(handle) = cache.get(id) {
                return Ok(Arc::clone(handle));
            }
        }

        let session = self
            .load_from_disk(id)?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let key = session.key.clone();
        let handle = Arc::new(SessionHandle {
            id: id.to_string(),
            key,
            state: tokio::sync::Mutex::new(session),
        });

        let mut cache = self.cache.lock().unwrap();
        let entry = cache
            .entry(id.to_string())
            .or_insert_with(|| Arc::clone(&handle));
        Ok(Arc::clone(entry))
    }

    /// Retrieve a session only if it belongs to `tenant_id`.
    ///
    /// Tenant isolation is enforced here, not just at key construction: a
    /// session owned by another tenant is reported as not found.
    pub fn get_with_tenant(&self, id: &str, tenant_id: &str) -> Result<Arc<SessionHandle>> {
        let handle = self.get(id)?;
        if handle.key.tenant_id != tenant_id {
            return Err(SessionError::NotFound { id: id.to_string() });
        }
        Ok(handle)
    }

    /// Delete a session from the cache and from disk.
    pub fn delete(&self, id: &str) -> Result<()> {
        let existed_in_cache = self.cache.lock().unwrap().remove(id).is_some();

        let path = self.session_path(id);
        let existed_on_disk = path.exists();
        if existed_on_disk {
            std::fs::remove_file(&path)?;
            debug!(id, "deleted session file");
        }

        if !existed_in_cache && !existed_on_disk {
            return Err(SessionError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Delete every session owned by a tenant, returning the count removed.
    pub fn delete_for_tenant(&self, tenant_id: &str) -> Result<u64> {
        let mut removed = 0;
        for summary in self.list_sessions_for_tenant(tenant_id) {
            if self.delete(&summary.id).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// List every known session (cache ∪ disk), newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut seen: HashMap<String, SessionSummary> = HashMap::new();

        {
            let cache = self.cache.lock().unwrap();
            for (id, handle) in cache.iter() {
                if let Ok(session) = handle.state.try_lock() {
                    seen.insert(id.clone(), summarise(&session));
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let Ok(raw) = std::fs::read_to_string(&path) else {
                    continue;
                };
                match serde_json::from_str::<Session>(&raw) {
                    Ok(session) => {
                        seen.entry(session.id.clone())
                            .or_insert_with(|| summarise(&session));
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable session file")
                    }
                }
            }
        }

        let mut summaries: Vec<SessionSummary> = seen.into_values().collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// List sessions scoped to one tenant.
    pub fn list_sessions_for_tenant(&self, tenant_id: &str) -> Vec<SessionSummary> {
        self.list_sessions()
            .into_iter()
            .filter(|s| s.tenant_id == tenant_id)
            .collect()
    }

    /// Counts reported on the status/metrics surface: (cached, total known).
    pub fn counts(&self) -> (usize, usize) {
        let active = self.cache.lock().unwrap().len();
        let total = self.list_sessions().len();
        (active, total)
    }

    /// Write the session's current state to its transcript file.
    pub fn persist(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.id);
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&path, json)?;
        debug!(id = %session.id, messages = session.messages.len(), "persisted session");
        Ok(())
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_filename(id)))
    }

    fn load_from_disk(&self, id: &str) -> Result<Option<Session>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let session: Session = serde_json::from_str(&raw)?;
        debug!(id, messages = session.messages.len(), "loaded session from disk");
        Ok(Some(session))
    }
}

fn summarise(session: &Session) -> SessionSummary {
    SessionSummary {
        id: session.id.clone(),
        tenant_id: session.key.tenant_id.clone(),
        channel: session.key.channel.clone(),
        message_count: session.messages.len(),
        created_at: session.created_at,
        updated_at: session.updated_at,
    }
}

/// Session ids may contain characters that are unsafe in file names
/// (Matrix room ids, phone numbers). Everything outside [A-Za-z0-9._-]
/// becomes '_'; uniqueness is preserved by suffixing a hash of the raw id.
fn safe_filename(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{cleaned}-{hash:016x}")
}
