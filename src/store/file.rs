//! File system session store
//!
//! Each session is one file at `root/<c0>/<c1>/<sid>`, where `c0` and `c1`
//! are the first two characters of the ID. The file modification time is the
//! last access time.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::fs::FileTimes;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;

use super::{normalize_lifetime, system_clock, Clock, SessionStore, DEFAULT_LIFETIME};
use crate::codec::{Codec, JsonCodec};
use crate::context::Context;
use crate::error::SessionError;
use crate::session::Session;
use crate::sid::MIN_ID_LENGTH;

/// Options for [`FileStore`]
#[derive(Clone)]
pub struct FileConfig {
    /// Directory holding the session files (default: "sessions")
    pub root_dir: PathBuf,
    /// Time without access before a session is recycled (default: 3600s)
    pub lifetime: Duration,
    /// Codec for the file contents (default: [`JsonCodec`])
    pub codec: Arc<dyn Codec>,
    clock: Clock,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("sessions"),
            lifetime: DEFAULT_LIFETIME,
            codec: Arc::new(JsonCodec),
            clock: system_clock(),
        }
    }
}

impl FileConfig {
    /// Create a configuration rooted at `root_dir`
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Set the session lifetime
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the codec
    pub fn with_codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Replace the clock used for modification times
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// File system session store
#[derive(Clone)]
pub struct FileStore {
    root_dir: PathBuf,
    lifetime: TimeDelta,
    codec: Arc<dyn Codec>,
    clock: Clock,
}

impl FileStore {
    /// Create a file store. The root directory is created lazily.
    pub fn new(config: FileConfig) -> Result<Self, SessionError> {
        if config.root_dir.as_os_str().is_empty() {
            return Err(SessionError::Config("file store root_dir is empty".into()));
        }
        let lifetime = normalize_lifetime(config.lifetime);
        let lifetime = TimeDelta::from_std(lifetime)
            .map_err(|e| SessionError::Config(format!("lifetime {lifetime:?}: {e}")))?;

        Ok(Self {
            root_dir: config.root_dir,
            lifetime,
            codec: config.codec,
            clock: config.clock,
        })
    }

    /// Path of the file for `sid`, or None if the ID cannot name a file
    fn filename(&self, sid: &str) -> Option<PathBuf> {
        if sid.len() < MIN_ID_LENGTH || !sid.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(self.root_dir.join(&sid[0..1]).join(&sid[1..2]).join(sid))
    }

    fn require_filename(&self, sid: &str) -> Result<PathBuf, SessionError> {
        self.filename(sid)
            .ok_or_else(|| SessionError::InvalidSessionId(sid.to_string()))
    }

    fn is_expired(&self, modified: SystemTime, now: DateTime<Utc>) -> bool {
        match DateTime::<Utc>::from(modified).checked_add_signed(self.lifetime) {
            Some(horizon) => now >= horizon,
            None => false,
        }
    }

    fn empty(&self, sid: &str) -> Session {
        Session::new(sid, Arc::clone(&self.codec))
    }

    async fn set_mtime(path: PathBuf, at: DateTime<Utc>) -> Result<(), SessionError> {
        let at = SystemTime::from(at);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.set_times(FileTimes::new().set_accessed(at).set_modified(at))
        })
        .await
        .map_err(|e| SessionError::Store(format!("change times: {e}")))?
        .map_err(|e| SessionError::io("change times", e))
    }

    async fn is_file(path: &Path) -> bool {
        matches!(fs::metadata(path).await, Ok(meta) if meta.is_file())
    }

    async fn sweep(&self, ctx: &Context) -> Result<usize, SessionError> {
        let now = (self.clock)();
        let mut evicted = 0;
        let mut dirs = vec![self.root_dir.clone()];

        while let Some(dir) = dirs.pop() {
            let Some(mut entries) = skip_vanished("read dir", fs::read_dir(&dir).await)? else {
                continue;
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SessionError::io("read dir entry", e))?
            {
                if ctx.is_done() {
                    return Ok(evicted);
                }

                let Some(meta) = skip_vanished("stat file", entry.metadata().await)? else {
                    continue;
                };
                if meta.is_dir() {
                    dirs.push(entry.path());
                    continue;
                }

                let Some(modified) = skip_vanished("stat file", meta.modified())? else {
                    continue;
                };
                if !self.is_expired(modified, now) {
                    continue;
                }
                if skip_vanished("remove file", fs::remove_file(entry.path()).await)?.is_some() {
                    evicted += 1;
                }
            }
        }
        Ok(evicted)
    }
}

/// Entries removed by a concurrent destroy are skipped rather than failing
/// the whole sweep
fn skip_vanished<T>(op: &'static str, result: io::Result<T>) -> Result<Option<T>, SessionError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SessionError::io(op, e)),
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn exist(&self, ctx: &Context, sid: &str) -> bool {
        let Some(path) = self.filename(sid) else {
            return false;
        };
        ctx.run(async { Ok(Self::is_file(&path).await) })
            .await
            .unwrap_or(false)
    }

    async fn read(&self, ctx: &Context, sid: &str) -> Result<Session, SessionError> {
        let path = self.require_filename(sid)?;

        ctx.run(async {
            let meta = match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => return Ok(self.empty(sid)),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(self.empty(sid)),
                Err(e) => return Err(SessionError::io("stat file", e)),
            };

            // Discard existing data if it's expired
            let modified = meta
                .modified()
                .map_err(|e| SessionError::io("stat file", e))?;
            if self.is_expired(modified, (self.clock)()) {
                return Ok(self.empty(sid));
            }

            let binary = fs::read(&path)
                .await
                .map_err(|e| SessionError::io("read file", e))?;
            let data = self
                .codec
                .decode(&binary)
                .map_err(|source| SessionError::Decode {
                    sid: sid.to_string(),
                    source,
                })?;
            Ok(Session::with_data(sid, data, Arc::clone(&self.codec)))
        })
        .await
    }

    async fn destroy(&self, ctx: &Context, sid: &str) -> Result<(), SessionError> {
        let Some(path) = self.filename(sid) else {
            return Ok(());
        };

        ctx.run(async {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SessionError::io("remove file", e)),
            }
        })
        .await
    }

    async fn touch(&self, ctx: &Context, sid: &str) -> Result<(), SessionError> {
        let Some(path) = self.filename(sid) else {
            return Ok(());
        };

        ctx.run(async {
            if !Self::is_file(&path).await {
                return Ok(());
            }
            Self::set_mtime(path.clone(), (self.clock)()).await
        })
        .await
    }

    async fn save(&self, ctx: &Context, session: &Session) -> Result<(), SessionError> {
        let sid = session.id();
        let path = self.require_filename(&sid)?;
        let binary = session.encode()?;

        ctx.run(async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SessionError::io("create parent directory", e))?;
            }
            fs::write(&path, &binary)
                .await
                .map_err(|e| SessionError::io("write file", e))?;
            Self::set_mtime(path.clone(), (self.clock)()).await
        })
        .await
    }

    async fn gc(&self, ctx: &Context) -> Result<(), SessionError> {
        let evicted = self.sweep(ctx).await?;
        if evicted > 0 {
            tracing::debug!(evicted, root = %self.root_dir.display(), "file store gc finished");
        }
        Ok(())
    }
}
