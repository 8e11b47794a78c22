//! Subscriber registry backed by a newline-delimited membership log

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// The set of currently subscribed chat ids, mirrored to a log file so
/// subscriptions survive restarts
///
/// One id per line. Every mutation takes the single inner mutex, so a
/// check-then-act sequence performed by a caller holding no lock can
/// race; [`Registry::subscribe`] and [`Registry::unsubscribe`] report
/// whether this call changed membership, and callers rely on that
/// return value rather than a prior check.
pub struct Registry {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Insertion order, kept for deterministic replay on startup
    order: Vec<String>,
    members: HashSet<String>,
}

impl Registry {
    /// Open the registry, replaying the membership log at `path` if it
    /// exists
    ///
    /// Duplicate lines, left behind by versions that never rewrote the
    /// log, collapse to their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing log cannot be read
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut order = Vec::new();
        let mut members = HashSet::new();

        match File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    let id = line.trim();
                    if id.is_empty() {
                        continue;
                    }
                    if members.insert(id.to_string()) {
                        order.push(id.to_string());
                    }
                }
                info!(
                    subscribers = order.len(),
                    path = %path.display(),
                    "membership log replayed"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Cannot read {}: {e}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path,
            inner: Mutex::new(Inner { order, members }),
        })
    }

    /// Add `id` to the active set
    ///
    /// Returns `false` without touching the log when the id is already
    /// active.
    ///
    /// # Errors
    ///
    /// Returns an error if the log append fails; the id is then not
    /// added, so memory and log stay consistent
    pub fn subscribe(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock();
        if inner.members.contains(id) {
            return Ok(false);
        }

        append_line(&self.path, id)?;
        inner.members.insert(id.to_string());
        inner.order.push(id.to_string());
        Ok(true)
    }

    /// Remove `id` from the active set, returning whether it was active
    ///
    /// On removal the log is rewritten without the id, so a restart
    /// cannot resurrect it. A failed rewrite is logged and tolerated;
    /// the live set has already changed and the stale entry only costs
    /// one extra watcher spawn after the next restart.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if !inner.members.remove(id) {
            return false;
        }
        inner.order.retain(|entry| entry != id);

        if let Err(e) = rewrite_log(&self.path, &inner.order) {
            warn!(id, "failed to rewrite membership log: {e}");
        }
        true
    }

    /// Whether `id` is currently subscribed
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.lock().members.contains(id)
    }

    /// Whether no chat is subscribed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().members.is_empty()
    }

    /// Snapshot of the active ids in insertion order
    #[must_use]
    pub fn active(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn append_line(path: &Path, id: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Storage(format!("Cannot open {}: {e}", path.display())))?;

    file.write_all(format!("{id}\n").as_bytes())
        .map_err(|e| Error::Storage(format!("Cannot append to {}: {e}", path.display())))?;
    file.sync_data()
        .map_err(|e| Error::Storage(format!("Cannot sync {}: {e}", path.display())))?;
    Ok(())
}

fn rewrite_log(path: &Path, ids: &[String]) -> Result<()> {
    let mut contents = String::new();
    for id in ids {
        contents.push_str(id);
        contents.push('\n');
    }

    // write-then-rename keeps the log whole even if the process dies
    // mid-rewrite
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .map_err(|e| Error::Storage(format!("Cannot write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::Storage(format!("Cannot replace {}: {e}", path.display())))?;
    Ok(())
}
