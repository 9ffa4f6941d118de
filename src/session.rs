//! In-memory session bookkeeping
//!
//! Sessions map to their configuration, current container, append-only
//! container history, and idle-retained containers kept for image-matched
//! reuse. Live container metadata is indexed by container id; a final
//! snapshot is archived into the history when a container is de-registered,
//! so removal and de-registration are atomic.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::container::images_match;
use crate::error::{Error, Result};
use crate::types::{ContainerMeta, SessionConfig, SessionInfo};

/// A session and its container bookkeeping
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id
    pub id: String,
    /// Configuration fixed at creation
    pub config: SessionConfig,
    /// Current container id, if any
    pub current: Option<String>,
    /// Snapshots of every container that ever served this session
    pub history: Vec<ContainerMeta>,
    /// Containers kept idle for later image-matched reuse (shared mode)
    pub idle_retained: Vec<String>,
    /// Persistent workspace directory in shared-workspace mode
    pub shared_workspace: Option<PathBuf>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    metas: HashMap<String, ContainerMeta>,
}

/// In-memory store of sessions and live container metadata
#[derive(Debug, Default)]
pub struct SessionManager {
    inner: Mutex<Inner>,
}

impl SessionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        SessionManager::default()
    }

    /// Create a session, honoring a requested id
    ///
    /// An existing id is returned as-is unless the config enforces a new
    /// session, in which case creation fails.
    pub fn create(&self, config: SessionConfig) -> Result<String> {
        let mut inner = self.lock();
        let id = config
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if inner.sessions.contains_key(&id) {
            if config.enforce_new_session {
                return Err(Error::Session(format!("session {} already exists", id)));
            }
            return Ok(id);
        }

        inner.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                config,
                current: None,
                history: Vec::new(),
                idle_retained: Vec::new(),
                shared_workspace: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Whether a session exists
    pub fn exists(&self, session_id: &str) -> bool {
        self.lock().sessions.contains_key(session_id)
    }

    /// Clone a session's configuration
    pub fn config(&self, session_id: &str) -> Result<SessionConfig> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|s| s.config.clone())
            .ok_or_else(|| Error::Session(format!("unknown session {}", session_id)))
    }

    /// All known session ids
    pub fn session_ids(&self) -> Vec<String> {
        self.lock().sessions.keys().cloned().collect()
    }

    /// Metadata of the session's current container
    pub fn current_container(&self, session_id: &str) -> Option<ContainerMeta> {
        let inner = self.lock();
        let current = inner.sessions.get(session_id)?.current.clone()?;
        inner.metas.get(&current).cloned()
    }

    /// Point the session at a container (or none)
    pub fn set_current(&self, session_id: &str, container_id: Option<String>) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.current = container_id;
        }
    }

    /// The session's persistent shared-workspace directory
    pub fn shared_workspace(&self, session_id: &str) -> Option<PathBuf> {
        self.lock().sessions.get(session_id)?.shared_workspace.clone()
    }

    /// Record the session's persistent shared-workspace directory
    pub fn set_shared_workspace(&self, session_id: &str, dir: PathBuf) {
        if let Some(session) = self.lock().sessions.get_mut(session_id) {
            session.shared_workspace = Some(dir);
        }
    }

    /// Register a container as the session's current one
    ///
    /// Appends to the history idempotently on container id.
    pub fn register_container(&self, meta: ContainerMeta) {
        let mut inner = self.lock();
        let session_id = meta.session_id.clone();
        let container_id = meta.container_id.clone();
        inner.metas.insert(container_id.clone(), meta.clone());
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.current = Some(container_id.clone());
            if !session
                .history
                .iter()
                .any(|m| m.container_id == container_id)
            {
                session.history.push(meta);
            }
        }
    }

    /// Clone a container's metadata
    pub fn meta(&self, container_id: &str) -> Option<ContainerMeta> {
        self.lock().metas.get(container_id).cloned()
    }

    /// Write back mutated metadata, refreshing the history snapshot
    pub fn store_meta(&self, meta: ContainerMeta) {
        let mut inner = self.lock();
        let session_id = meta.session_id.clone();
        let container_id = meta.container_id.clone();
        inner.metas.insert(container_id.clone(), meta.clone());
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            if let Some(snapshot) = session
                .history
                .iter_mut()
                .find(|m| m.container_id == container_id)
            {
                *snapshot = meta;
            }
        }
    }

    /// Toggle the running flag, stamping `last_executed_at` when a run begins
    pub fn update_container_state(&self, container_id: &str, is_running: bool) {
        let mut inner = self.lock();
        let meta = match inner.metas.get_mut(container_id) {
            Some(meta) => {
                meta.is_running = is_running;
                if is_running {
                    meta.last_executed_at = Some(Utc::now());
                }
                meta.clone()
            }
            None => return,
        };
        if let Some(session) = inner.sessions.get_mut(&meta.session_id) {
            if let Some(snapshot) = session
                .history
                .iter_mut()
                .find(|m| m.container_id == container_id)
            {
                *snapshot = meta;
            }
        }
    }

    /// Remove a container's live metadata, archiving a final history snapshot
    pub fn deregister_container(&self, container_id: &str) -> Option<ContainerMeta> {
        let mut inner = self.lock();
        let meta = inner.metas.remove(container_id)?;
        if let Some(session) = inner.sessions.get_mut(&meta.session_id) {
            if let Some(snapshot) = session
                .history
                .iter_mut()
                .find(|m| m.container_id == container_id)
            {
                *snapshot = meta.clone();
            }
            if session.current.as_deref() == Some(container_id) {
                session.current = None;
            }
            session.idle_retained.retain(|id| id != container_id);
        }
        Some(meta)
    }

    /// Park the session's container on the idle-retained list
    pub fn retain_idle(&self, session_id: &str, container_id: &str) {
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if session.current.as_deref() == Some(container_id) {
                session.current = None;
            }
            if !session.idle_retained.iter().any(|id| id == container_id) {
                session.idle_retained.push(container_id.to_string());
            }
        }
    }

    /// Take an idle-retained container whose image matches, if any
    pub fn take_idle_matching(&self, session_id: &str, image: &str) -> Option<ContainerMeta> {
        let mut inner = self.lock();
        let found = {
            let session = inner.sessions.get(session_id)?;
            session
                .idle_retained
                .iter()
                .find(|id| {
                    inner
                        .metas
                        .get(id.as_str())
                        .map(|m| images_match(&m.image, image))
                        .unwrap_or(false)
                })
                .cloned()
        }?;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.idle_retained.retain(|id| *id != found);
        }
        inner.metas.get(&found).cloned()
    }

    /// Metadata of every idle-retained container in the session
    pub fn idle_retained(&self, session_id: &str) -> Vec<ContainerMeta> {
        let inner = self.lock();
        let Some(session) = inner.sessions.get(session_id) else {
            return Vec::new();
        };
        session
            .idle_retained
            .iter()
            .filter_map(|id| inner.metas.get(id).cloned())
            .collect()
    }

    /// Remove a session entry, returning it
    pub fn remove_session(&self, session_id: &str) -> Option<Session> {
        self.lock().sessions.remove(session_id)
    }

    /// Derived read-only view of a session
    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        let inner = self.lock();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::Session(format!("unknown session {}", session_id)))?;

        let created_at = session
            .history
            .iter()
            .map(|m| m.created_at)
            .min()
            .unwrap_or(session.created_at);
        let last_executed_at = session
            .history
            .iter()
            .filter_map(|m| m.last_executed_at)
            .max();
        let is_active = session
            .current
            .as_ref()
            .and_then(|id| inner.metas.get(id))
            .map(|m| m.is_running)
            .unwrap_or(false);

        Ok(SessionInfo {
            session_id: session.id.clone(),
            strategy: session.config.strategy,
            current_container: session.current.clone(),
            container_count: session.history.len(),
            created_at,
            last_executed_at,
            is_active,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlacementStrategy;
    use std::path::PathBuf;

    fn meta(session: &str, container: &str, image: &str) -> ContainerMeta {
        ContainerMeta::new(
            session,
            container,
            format!("rb_{}", container),
            image,
            PathBuf::from("/tmp/runbox").join(container),
        )
    }

    #[test]
    fn test_create_returns_existing_id() {
        let manager = SessionManager::new();
        let config = SessionConfig::new(PlacementStrategy::PerSession).with_session_id("fixed");
        let first = manager.create(config.clone()).unwrap();
        let second = manager.create(config).unwrap();
        assert_eq!(first, "fixed");
        assert_eq!(second, "fixed");
    }

    #[test]
    fn test_create_enforce_new_fails_on_duplicate() {
        let manager = SessionManager::new();
        let mut config = SessionConfig::new(PlacementStrategy::PerSession).with_session_id("dup");
        manager.create(config.clone()).unwrap();
        config.enforce_new_session = true;
        assert!(manager.create(config).is_err());
    }

    #[test]
    fn test_history_append_is_idempotent() {
        let manager = SessionManager::new();
        let sid = manager
            .create(SessionConfig::new(PlacementStrategy::PerSession))
            .unwrap();
        let m = meta(&sid, "c1", "alpine:latest");
        manager.register_container(m.clone());
        manager.register_container(m);
        let info = manager.session_info(&sid).unwrap();
        assert_eq!(info.container_count, 1);
    }

    #[test]
    fn test_update_state_stamps_last_executed() {
        let manager = SessionManager::new();
        let sid = manager
            .create(SessionConfig::new(PlacementStrategy::PerSession))
            .unwrap();
        manager.register_container(meta(&sid, "c1", "alpine:latest"));

        manager.update_container_state("c1", true);
        let m = manager.meta("c1").unwrap();
        assert!(m.is_running);
        assert!(m.last_executed_at.is_some());
        assert!(manager.session_info(&sid).unwrap().is_active);

        manager.update_container_state("c1", false);
        assert!(!manager.meta("c1").unwrap().is_running);
        assert!(!manager.session_info(&sid).unwrap().is_active);
    }

    #[test]
    fn test_deregister_archives_history() {
        let manager = SessionManager::new();
        let sid = manager
            .create(SessionConfig::new(PlacementStrategy::PerSession))
            .unwrap();
        manager.register_container(meta(&sid, "c1", "python:3.9-slim"));
        manager.register_container(meta(&sid, "c2", "alpine:latest"));

        let removed = manager.deregister_container("c1").unwrap();
        assert_eq!(removed.container_id, "c1");
        assert!(manager.meta("c1").is_none());
        // History still records both containers
        assert_eq!(manager.session_info(&sid).unwrap().container_count, 2);
    }

    #[test]
    fn test_idle_retained_take_by_image() {
        let manager = SessionManager::new();
        let sid = manager
            .create(SessionConfig::new(PlacementStrategy::PerSession))
            .unwrap();
        manager.register_container(meta(&sid, "c1", "python:3.9-slim"));
        manager.retain_idle(&sid, "c1");

        assert!(manager.current_container(&sid).is_none());
        assert!(manager.take_idle_matching(&sid, "alpine:latest").is_none());
        let taken = manager
            .take_idle_matching(&sid, "docker.io/python:3.9-slim")
            .unwrap();
        assert_eq!(taken.container_id, "c1");
        assert!(manager.idle_retained(&sid).is_empty());
    }
}
