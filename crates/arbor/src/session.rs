//! Durable sessions.
//!
//! Each session is a directory under the user cache: a `session.toml` with
//! metadata and a `history.jsonl` holding the conversation. Resuming a
//! session hands its history path to the adapter, which replays it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const META_FILE: &str = "session.toml";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Name of the backend the session was started with.
    pub backend: String,
}

#[derive(Debug)]
pub struct Session {
    pub meta: SessionMeta,
    dir: PathBuf,
}

impl Session {
    /// Where sessions live by default.
    pub fn base_dir() -> Result<PathBuf> {
        let cache = dirs::cache_dir().ok_or_else(|| anyhow!("no cache directory available"))?;
        Ok(cache.join("arbor").join("sessions"))
    }

    pub fn create(backend: &str) -> Result<Session> {
        Session::create_in(&Session::base_dir()?, backend)
    }

    pub fn create_in(base: &Path, backend: &str) -> Result<Session> {
        let meta = SessionMeta {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            backend: backend.to_string(),
        };
        let dir = base.join(&meta.id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session directory {}", dir.display()))?;
        let encoded = toml::to_string_pretty(&meta)?;
        fs::write(dir.join(META_FILE), encoded)?;
        Ok(Session { meta, dir })
    }

    pub fn resume(id: &str) -> Result<Session> {
        Session::resume_in(&Session::base_dir()?, id)
    }

    pub fn resume_in(base: &Path, id: &str) -> Result<Session> {
        let dir = base.join(id);
        let raw = fs::read_to_string(dir.join(META_FILE))
            .with_context(|| format!("no session {id}"))?;
        let meta: SessionMeta = toml::from_str(&raw)
            .with_context(|| format!("corrupt metadata for session {id}"))?;
        Ok(Session { meta, dir })
    }

    /// All known sessions, newest first.
    pub fn list() -> Result<Vec<SessionMeta>> {
        Session::list_in(&Session::base_dir()?)
    }

    pub fn list_in(base: &Path) -> Result<Vec<SessionMeta>> {
        let mut sessions = Vec::new();
        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let meta_path = entry.path().join(META_FILE);
            let Ok(raw) = fs::read_to_string(&meta_path) else {
                continue;
            };
            match toml::from_str::<SessionMeta>(&raw) {
                Ok(meta) => sessions.push(meta),
                Err(err) => {
                    tracing::warn!(path = %meta_path.display(), error = %err, "skipping unreadable session");
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }
}
