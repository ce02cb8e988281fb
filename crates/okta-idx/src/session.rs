use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::config::AuthConfig;
use crate::cookies::SessionCookies;
use crate::error::Result;

// ─── StoredSession ────────────────────────────────────────────────────────

/// Cookies from a finished login, saved so the next run can skip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub idp_host: String,
    pub cookies: SessionCookies,
    pub saved_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(idp_host: impl Into<String>, cookies: SessionCookies) -> Self {
        Self {
            idp_host: idp_host.into(),
            cookies,
            saved_at: Utc::now(),
        }
    }

    /// Whether the session was saved less than `max_age` ago.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return true;
        };
        Utc::now() - self.saved_at < max_age
    }
}

// ─── SessionStore ─────────────────────────────────────────────────────────

/// Persists session cookies on disk, one file per IdP host.
///
/// Files live at `<dir>/<host>.json` (`:` in `host:port` becomes `_`). The
/// directory is created lazily on the first `save`.
///
/// ```rust,ignore
/// let store = SessionStore::from_config(&config)?;
/// let flow = match store.load("sso.example.edu") {
///     Some(s) if s.is_fresh(Duration::from_secs(3600)) => {
///         let flow = LoginFlow::new(config.clone())?;
///         if flow.validate_session(&s).await? {
///             LoginFlow::with_cookies(config, s.cookies)?
///         } else {
///             flow
///         }
///     }
///     _ => LoginFlow::new(config)?,
/// };
/// ```
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: &Path) -> Self {
        SessionStore {
            sessions_dir: sessions_dir.to_path_buf(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Ok(Self::new(&config.session_dir()?))
    }

    /// Return the stored session for `idp_host`, or `None` if there is none
    /// or it cannot be read.
    pub fn load(&self, idp_host: &str) -> Option<StoredSession> {
        let path = self.path(idp_host);
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
                None
            }
        }
    }

    /// Persist `session`, replacing any earlier one for the same host.
    pub fn save(&self, session: &StoredSession) -> Result<()> {
        let data = serde_json::to_vec_pretty(session)?;
        atomic_write(&self.path(&session.idp_host), &data)
    }

    /// Delete the stored session for `idp_host` (no-op if none exists).
    pub fn clear(&self, idp_host: &str) -> Result<()> {
        let p = self.path(idp_host);
        if p.exists() {
            std::fs::remove_file(&p)?;
        }
        Ok(())
    }

    fn path(&self, idp_host: &str) -> PathBuf {
        let name: String = idp_host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.sessions_dir.join(format!("{name}.json"))
    }
}

/// Write via a temp file in the same directory, then rename into place.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (SessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(&dir.path().join("sessions"));
        (store, dir)
    }

    fn session(host: &str) -> StoredSession {
        let mut cookies = SessionCookies::new();
        cookies.insert(host, "sid", "abc");
        StoredSession::new(host, cookies)
    }

    #[test]
    fn load_returns_none_when_no_file() {
        let (store, _dir) = store();
        assert!(store.load("sso.example.edu").is_none());
    }

    #[test]
    fn save_and_load() {
        let (store, _dir) = store();
        store.save(&session("sso.example.edu")).unwrap();
        let loaded = store.load("sso.example.edu").unwrap();
        assert_eq!(loaded.cookies.get("sso.example.edu", "sid"), Some("abc"));
        assert!(loaded.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn creates_sessions_dir_on_first_save() {
        let (store, _dir) = store();
        assert!(!store.sessions_dir.exists());
        store.save(&session("a.example")).unwrap();
        assert!(store.sessions_dir.exists());
    }

    #[test]
    fn port_is_part_of_the_file_name() {
        let (store, _dir) = store();
        store.save(&session("127.0.0.1:4001")).unwrap();
        assert!(store.sessions_dir.join("127.0.0.1_4001.json").exists());
        assert!(store.load("127.0.0.1:4002").is_none());
    }

    #[test]
    fn clear_removes_session_and_is_idempotent() {
        let (store, _dir) = store();
        store.save(&session("a.example")).unwrap();
        store.clear("a.example").unwrap();
        assert!(store.load("a.example").is_none());
        store.clear("a.example").unwrap();
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let (store, _dir) = store();
        std::fs::create_dir_all(&store.sessions_dir).unwrap();
        std::fs::write(store.path("a.example"), "{not json").unwrap();
        assert!(store.load("a.example").is_none());
    }

    #[test]
    fn old_session_is_stale() {
        let mut s = session("a.example");
        s.saved_at = Utc::now() - chrono::Duration::hours(2);
        assert!(!s.is_fresh(Duration::from_secs(3600)));
    }
}
