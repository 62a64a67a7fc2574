//! Session store: the single owner of the bearer token.
//!
//! The token lives in one durable slot (a file by default). Claims are read
//! from the JWT payload without verifying the signature; the server remains
//! the authority and rejects anything it does not like with a 401.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token expired at {exp}")]
    Expired { exp: i64 },
    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Token subject; issuers send either a string or a numeric id
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Subject {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Claims carried in the token payload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<Subject>,
    pub exp: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    pub fn is_live_at(&self, now: i64) -> bool {
        self.exp > now
    }

    pub fn subject(&self) -> Option<String> {
        self.sub.as_ref().map(|s| s.to_string())
    }
}

/// Decode the claims segment of a JWT. Never panics on bad input.
pub fn decode_claims(token: &str) -> Result<Claims, SessionError> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 || parts[1].is_empty() {
        return Err(SessionError::Malformed(format!(
            "expected 3 segments, got {}",
            parts.len()
        )));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| SessionError::Malformed(e.to_string()))?;
    serde_json::from_slice(&payload).map_err(|e| SessionError::Malformed(e.to_string()))
}

/// Durable key-value slot holding the token between runs
pub trait TokenStore: Send + Sync {
    fn load(&self) -> std::io::Result<Option<String>>;
    fn save(&self, token: &str) -> std::io::Result<()>;
    fn clear(&self) -> std::io::Result<()>;
}

pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// ~/.p2p/token
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".p2p").join("token"))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> std::io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, token: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)
    }

    fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    #[cfg(test)]
    pub fn with_token(token: &str) -> Self {
        Self {
            slot: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> std::io::Result<Option<String>> {
        Ok(self.slot.lock().map(|s| s.clone()).unwrap_or_default())
    }

    fn save(&self, token: &str) -> std::io::Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> std::io::Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub claims: Claims,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Authenticated,
    Empty,
    Expired,
    Malformed,
    AlreadyRestored,
}

impl RestoreOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::Empty => "empty",
            Self::Expired => "expired",
            Self::Malformed => "malformed",
            Self::AlreadyRestored => "already_restored",
        }
    }
}

pub struct SessionStore {
    slot: Box<dyn TokenStore>,
    current: Mutex<Option<Session>>,
    restored: AtomicBool,
}

impl SessionStore {
    pub fn new(slot: Box<dyn TokenStore>) -> Self {
        Self {
            slot,
            current: Mutex::new(None),
            restored: AtomicBool::new(false),
        }
    }

    /// Load the persisted token once at startup.
    pub fn restore(&self) -> RestoreOutcome {
        self.restore_at(Utc::now().timestamp())
    }

    pub fn restore_at(&self, now: i64) -> RestoreOutcome {
        if self.restored.swap(true, Ordering::SeqCst) {
            return RestoreOutcome::AlreadyRestored;
        }

        let token = match self.slot.load() {
            Ok(Some(token)) => token,
            Ok(None) => return RestoreOutcome::Empty,
            Err(e) => {
                eprintln!("Warning: failed to read saved session: {}", e);
                return RestoreOutcome::Empty;
            }
        };

        match decode_claims(&token) {
            Ok(claims) if claims.is_live_at(now) => {
                self.set_current(Some(Session { token, claims }));
                RestoreOutcome::Authenticated
            }
            Ok(_) => {
                self.terminate();
                RestoreOutcome::Expired
            }
            Err(_) => {
                self.terminate();
                RestoreOutcome::Malformed
            }
        }
    }

    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::SeqCst)
    }

    /// Adopt a freshly issued token from login or registration.
    pub fn establish(&self, token: &str) -> Result<Claims, SessionError> {
        self.establish_at(token, Utc::now().timestamp())
    }

    pub fn establish_at(&self, token: &str, now: i64) -> Result<Claims, SessionError> {
        let claims = decode_claims(token)?;
        if !claims.is_live_at(now) {
            return Err(SessionError::Expired { exp: claims.exp });
        }
        self.slot.save(token)?;
        self.restored.store(true, Ordering::SeqCst);
        self.set_current(Some(Session {
            token: token.trim().to_string(),
            claims: claims.clone(),
        }));
        Ok(claims)
    }

    /// Clear the token and all derived state. Idempotent.
    pub fn terminate(&self) {
        if let Err(e) = self.slot.clear() {
            eprintln!("Warning: failed to clear saved session: {}", e);
        }
        self.set_current(None);
    }

    /// Re-evaluated against the wall clock on every call.
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now().timestamp())
    }

    pub fn is_authenticated_at(&self, now: i64) -> bool {
        self.current
            .lock()
            .map(|s| s.as_ref().is_some_and(|s| s.claims.is_live_at(now)))
            .unwrap_or(false)
    }

    /// The raw token, even if expired; the server decides.
    pub fn token(&self) -> Option<String> {
        self.current
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.token.clone()))
    }

    pub fn claims(&self) -> Option<Claims> {
        self.current
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.claims.clone()))
    }

    fn set_current(&self, session: Option<Session>) {
        if let Ok(mut current) = self.current.lock() {
            *current = session;
        }
    }
}
