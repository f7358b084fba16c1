//! Process-wide table of live sessions.
//!
//! The registry maps a [`SessionKey`] to its [`Session`]. It is created once
//! by the server and handed to the protocol; there is no global instance.

use crate::session::{Session, SessionKey};
use crate::store::SessionRecord;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Maximum number of live sessions reached.
    #[error("Maximum sessions reached ({0})")]
    CapacityReached(usize),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live sessions.
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
        }
    }
}

/// The table of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Arc<Session>>,
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating session registry with config: {:?}", config);
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            session_count: self.sessions.len(),
        }
    }

    /// Return the live session for `record`, creating it on first use.
    ///
    /// An existing session is returned unchanged; the roster and timer in
    /// `record` only matter for creation. Concurrent callers for the same
    /// key always get the same session.
    ///
    /// # Errors
    ///
    /// Returns an error if a new session would exceed `max_sessions`.
    pub fn get_or_create(&self, record: &SessionRecord) -> Result<Arc<Session>, RegistryError> {
        let key = SessionKey::from(record);

        if let Some(existing) = self.sessions.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        // Checked before taking the shard lock; the limit is approximate
        // under concurrent creation of distinct sessions.
        if self.sessions.len() >= self.config.max_sessions {
            return Err(RegistryError::CapacityReached(self.config.max_sessions));
        }

        let session = match self.sessions.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                debug!(
                    session = %entry.key(),
                    participants = record.participants.len(),
                    timer = record.timer_seconds,
                    "Creating session"
                );
                let session = Arc::new(Session::new(record.clone()));
                entry.insert(Arc::clone(&session));
                session
            }
        };

        Ok(session)
    }

    /// Get a live session.
    #[must_use]
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|s| Arc::clone(s.value()))
    }

    /// Remove a session from the table.
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(key).map(|(_, s)| s);
        if removed.is_some() {
            debug!(session = %key, "Removed session");
        }
        removed
    }

    /// Check if a session is live.
    #[must_use]
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Get all live session keys.
    #[must_use]
    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of live sessions.
    pub session_count: usize,
}
