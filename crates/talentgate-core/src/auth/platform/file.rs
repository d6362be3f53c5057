//! Session file platform.
//!
//! Entries live in `session.json` in the talentgate cache directory, keyed by
//! [`EntryKey::storage_key`]. The file is owner-only on Unix and rewritten
//! through a temp file + rename so a crash never leaves half a session.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use tracing::{debug, info, warn};
use url::Url;

use super::{EntryKey, NavigationHook, Platform, StoreError, StoredEntry};
use crate::config::Config;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

type SessionFile = BTreeMap<String, StoredEntry>;

pub struct FilePlatform {
    path: PathBuf,
    // serializes read-modify-write cycles on the file
    write_lock: Mutex<()>,
    on_navigate: Option<NavigationHook>,
}

impl FilePlatform {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            on_navigate: None,
        }
    }

    /// `session.json` under the user cache directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::cache_dir()?.join(SESSION_FILE)))
    }

    /// Run `hook` whenever the session asks to navigate.
    pub fn with_navigation_hook(mut self, hook: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.on_navigate = Some(Box::new(hook));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SessionFile, StoreError> {
        if !self.path.exists() {
            return Ok(SessionFile::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(SessionFile::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, file: &SessionFile) -> Result<(), StoreError> {
        if file.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(FILE_MODE))?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read-modify-write. An unparsable file is replaced rather than
    /// blocking every later write, including the clear that would fix it.
    fn update(&self, change: impl FnOnce(&mut SessionFile)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = match self.read() {
            Err(StoreError::Serialization(e)) => {
                warn!(path = ?self.path, error = %e, "Discarding corrupt session file");
                SessionFile::new()
            }
            other => other?,
        };
        change(&mut file);
        self.write(&file)
    }
}

impl fmt::Debug for FilePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePlatform")
            .field("path", &self.path)
            .field("has_navigation_hook", &self.on_navigate.is_some())
            .finish()
    }
}

impl Platform for FilePlatform {
    fn name(&self) -> &str {
        "file"
    }

    fn retrieve(&self, key: &EntryKey) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.read()?.remove(&key.storage_key()))
    }

    fn persist(&self, key: &EntryKey, entry: &StoredEntry) -> Result<(), StoreError> {
        debug!(key = %key, path = ?self.path, "Persisting session entry");
        self.update(|file| {
            file.insert(key.storage_key(), entry.clone());
        })
    }

    fn remove(&self, key: &EntryKey) -> Result<(), StoreError> {
        self.update(|file| {
            file.remove(&key.storage_key());
        })
    }

    fn navigate(&self, location: &Url) {
        info!(location = %location, "Session ended, sign-in required");
        if let Some(ref hook) = self.on_navigate {
            hook(location);
        }
    }
}
