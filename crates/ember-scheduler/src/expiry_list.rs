//! File-backed list of expiry record lines.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::SchedulerResult;
use crate::expiry::ExpiryRecord;

/// A named, lock-protected list of record lines.
///
/// Lines are kept verbatim, including ones that do not parse, so a save never
/// drops data the server did not understand.
#[derive(Debug)]
pub struct ExpiryList {
    name: String,
    path: Option<PathBuf>,
    lines: Mutex<Vec<String>>,
}

impl ExpiryList {
    /// Create a list that is never persisted.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Load a list from `path`. A missing file yields an empty list.
    pub fn load(name: impl Into<String>, path: impl Into<PathBuf>) -> SchedulerResult<Self> {
        let name = name.into();
        let path = path.into();

        let lines = if path.exists() {
            fs::read_to_string(&path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            debug!("{} list not found at {:?}, starting empty", name, path);
            Vec::new()
        };

        debug!("Loaded {} {} records", lines.len(), name);
        Ok(Self {
            name,
            path: Some(path),
            lines: Mutex::new(lines),
        })
    }

    /// List name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock the lines for a compound read-modify-write.
    ///
    /// Use [`ExpiryList::save_locked`] to persist while the guard is held.
    pub fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock()
    }

    /// Copy of the current lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Add a record, replacing any existing record for the same subject.
    pub fn upsert(&self, record: &ExpiryRecord) {
        let line = record.to_line();
        let mut lines = self.lines.lock();
        match lines
            .iter()
            .position(|l| subject_of(l).eq_ignore_ascii_case(&record.subject))
        {
            Some(index) => lines[index] = line,
            None => lines.push(line),
        }
    }

    /// Append a raw line.
    pub fn push_line(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    /// Remove the record for `subject`. Returns `true` if one was removed.
    pub fn remove(&self, subject: &str) -> bool {
        let mut lines = self.lines.lock();
        let before = lines.len();
        lines.retain(|l| !subject_of(l).eq_ignore_ascii_case(subject));
        lines.len() != before
    }

    /// Find the record for `subject`, if it parses.
    pub fn find(&self, subject: &str) -> Option<ExpiryRecord> {
        self.lines
            .lock()
            .iter()
            .find(|l| subject_of(l).eq_ignore_ascii_case(subject))
            .and_then(|l| ExpiryRecord::parse(l).ok())
    }

    /// Persist the current lines.
    pub fn save(&self) -> SchedulerResult<()> {
        let lines = self.lines.lock();
        self.save_locked(&lines)
    }

    /// Persist `lines`, normally the contents of a guard from [`ExpiryList::lock`].
    ///
    /// Writes to a temporary sibling file and renames it over the target.
    pub fn save_locked(&self, lines: &[String]) -> SchedulerResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for line in lines {
                writeln!(file, "{}", line)?;
            }
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp, path) {
            warn!("Failed to replace {:?}: {}", path, e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn subject_of(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}
