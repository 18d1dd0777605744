//! Session table.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration, Utc};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub timeout_ms: f64,
    pub activated: bool,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionInfo {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let timeout = Duration::microseconds((self.timeout_ms * 1000.0) as i64);
        now - self.last_activity > timeout
    }
}

pub(crate) struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
    next_id: AtomicU32,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, sessions: RwLock::new(HashMap::new()), next_id: AtomicU32::new(1) }
    }

    fn revise_timeout(&self, requested_ms: f64) -> f64 {
        if !(requested_ms > 0.0) {
            return self.config.default_timeout_ms;
        }
        requested_ms.min(self.config.max_timeout_ms)
    }

    pub fn create(&self, name: &str, timeout_ms: f64, now: DateTime<Utc>) -> Result<SessionInfo> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_sessions {
            return Err(Error::SessionLimitExceeded(self.config.max_sessions));
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = SessionInfo {
            id,
            name: name.to_string(),
            timeout_ms: self.revise_timeout(timeout_ms),
            activated: false,
            user: None,
            created_at: now,
            last_activity: now,
        };
        sessions.insert(id, info.clone());
        Ok(info)
    }

    pub fn activate(&self, id: SessionId, user: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        let mut sessions = self.sessions.write();
        let info = sessions.get_mut(&id).ok_or(Error::SessionNotFound(id.0))?;
        info.activated = true;
        info.user = user.map(str::to_string);
        info.last_activity = now;
        Ok(())
    }

    /// Record activity; fails for unknown or not yet activated sessions.
    pub fn touch(&self, id: SessionId, now: DateTime<Utc>) -> Result<()> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&id) {
            Some(info) if info.activated => {
                info.last_activity = now;
                Ok(())
            }
            _ => Err(Error::SessionNotFound(id.0)),
        }
    }

    pub fn close(&self, id: SessionId) -> Result<SessionInfo> {
        self.sessions.write().remove(&id).ok_or(Error::SessionNotFound(id.0))
    }

    /// Remove and return every session idle longer than its timeout.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<SessionInfo> {
        let mut sessions = self.sessions.write();
        let expired: Vec<SessionId> = sessions.values().filter(|s| s.is_expired(now)).map(|s| s.id).collect();
        expired.into_iter().filter_map(|id| sessions.remove(&id)).collect()
    }

    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }
}
