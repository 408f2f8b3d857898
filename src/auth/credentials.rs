// Credential persistence
// Cookie-jar style key/value storage with a max-age ceiling per entry

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::types::{TokenPair, UserProfile};
use crate::error::SessionError;

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_DATA_KEY: &str = "user_data";

/// Persisted key/value storage for credentials.
///
/// Every entry carries its own max-age; expired entries read as absent even
/// if the backend has not evicted them yet.
pub trait CredentialStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str, max_age: Duration) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Expiry instant for an entry written now
fn expiry(max_age: Duration) -> Result<DateTime<Utc>> {
    Utc::now()
        .checked_add_signed(max_age)
        .with_context(|| format!("Storage max-age out of range: {}", max_age))
}

/// In-process storage, lost when the process exits
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, (String, DateTime<Utc>)>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if *expires_at > now {
                return Ok(Some(value.clone()));
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, max_age: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), expiry(max_age)?));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed storage that survives restarts
pub struct SqliteStorage {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStorage {
    /// Open (or create) the credential database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Storage backed by a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
        f(&conn)
    }
}

impl CredentialStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT value, expires_at FROM auth_kv WHERE key = ?",
                [key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            );

            match row {
                Ok((value, expires_at)) if expires_at > Utc::now().timestamp() => Ok(Some(value)),
                Ok(_) => {
                    conn.execute("DELETE FROM auth_kv WHERE key = ?", [key])
                        .with_context(|| format!("Failed to evict expired {}", key))?;
                    Ok(None)
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e).with_context(|| format!("Failed to read {}", key)),
            }
        })
    }

    fn set(&self, key: &str, value: &str, max_age: Duration) -> Result<()> {
        let expires_at = expiry(max_age)?.timestamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                rusqlite::params![key, value, expires_at],
            )
            .with_context(|| format!("Failed to write {}", key))?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_kv WHERE key = ?", [key])
                .with_context(|| format!("Failed to remove {}", key))?;
            Ok(())
        })
    }
}

/// Typed access to the persisted credential set
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
    max_age: Duration,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn CredentialStorage>, max_age: Duration) -> Self {
        Self { storage, max_age }
    }

    /// Store tokens and profile from a login/register
    pub fn set_credentials(&self, tokens: &TokenPair, user: &UserProfile) -> Result<()> {
        self.set_tokens(tokens)?;
        self.set_user(user)
    }

    /// Store a freshly issued token pair; both or neither
    pub fn set_tokens(&self, tokens: &TokenPair) -> Result<()> {
        let written = self
            .storage
            .set(AUTH_TOKEN_KEY, &tokens.access_token, self.max_age)
            .and_then(|_| {
                self.storage
                    .set(REFRESH_TOKEN_KEY, &tokens.refresh_token, self.max_age)
            });

        if let Err(e) = written {
            tracing::error!("Failed to persist token pair: {:#}", e);
            let _ = self.storage.remove(AUTH_TOKEN_KEY);
            let _ = self.storage.remove(REFRESH_TOKEN_KEY);
            return Err(e.context("Failed to persist token pair"));
        }
        Ok(())
    }

    /// Replace the cached profile
    pub fn set_user(&self, user: &UserProfile) -> Result<()> {
        let json = serde_json::to_string(user).context("Failed to serialize user profile")?;
        self.storage.set(USER_DATA_KEY, &json, self.max_age)
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.read(AUTH_TOKEN_KEY)
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    /// Cached profile, trusted only while an access token is stored.
    /// A corrupt entry is logged and reads as absent.
    pub fn get_user(&self) -> Option<UserProfile> {
        match self.load_user() {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Ignoring cached profile: {}", e);
                None
            }
        }
    }

    /// Like `get_user`, but reports a corrupt entry
    pub fn load_user(&self) -> crate::error::Result<Option<UserProfile>> {
        if self.get_access_token().is_none() {
            return Ok(None);
        }
        let Some(raw) = self.read(USER_DATA_KEY) else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SessionError::StorageCorruption(format!("{}: {}", USER_DATA_KEY, e)))
    }

    /// Remove every credential entry; clearing an empty store succeeds
    pub fn clear(&self) -> Result<()> {
        let mut first_err = None;
        for key in [AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY] {
            if let Err(e) = self.storage.remove(key) {
                tracing::error!("Failed to remove {}: {:#}", key, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to read {}: {:#}", key, e);
                None
            }
        }
    }
}
