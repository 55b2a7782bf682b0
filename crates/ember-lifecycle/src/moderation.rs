//! Timed moderation states: temporary ranks, mutes and freezes.
//!
//! Each state lives in its own [`ExpiryList`] and is watched from the Main
//! tier. When a record expires the matching [`ModerationActions`] method
//! undoes it; the watch then removes the record and saves the list.

use std::path::PathBuf;
use std::sync::Arc;

use ember_scheduler::{ExpiryList, ExpiryRecord, ExpiryWatch, Scheduler, SchedulerResult};
use tracing::info;

use crate::error::CollaboratorResult;

/// Domain effects applied when a timed moderation state runs out.
pub trait ModerationActions: Send + Sync {
    /// Revert a temporary rank. The record's extra fields carry the old and
    /// new rank names.
    fn revoke_temp_rank(&self, record: &ExpiryRecord) -> CollaboratorResult;

    /// Lift a timed mute.
    fn unmute(&self, record: &ExpiryRecord) -> CollaboratorResult;

    /// Lift a timed freeze.
    fn unfreeze(&self, record: &ExpiryRecord) -> CollaboratorResult;
}

/// Backing files of the three moderation lists.
#[derive(Debug, Clone)]
pub struct ModerationPaths {
    pub temp_ranks: PathBuf,
    pub muted: PathBuf,
    pub frozen: PathBuf,
}

/// The three moderation lists.
#[derive(Debug, Clone)]
pub struct ModerationLists {
    pub temp_ranks: Arc<ExpiryList>,
    pub muted: Arc<ExpiryList>,
    pub frozen: Arc<ExpiryList>,
}

impl ModerationLists {
    /// Load every list from disk. Missing files yield empty lists.
    pub fn load(paths: &ModerationPaths) -> SchedulerResult<Self> {
        let lists = Self {
            temp_ranks: Arc::new(ExpiryList::load("tempranks", &paths.temp_ranks)?),
            muted: Arc::new(ExpiryList::load("muted", &paths.muted)?),
            frozen: Arc::new(ExpiryList::load("frozen", &paths.frozen)?),
        };
        info!(
            "Loaded moderation lists ({} temp ranks, {} muted, {} frozen)",
            lists.temp_ranks.len(),
            lists.muted.len(),
            lists.frozen.len()
        );
        Ok(lists)
    }

    /// Lists that are never persisted.
    pub fn in_memory() -> Self {
        Self {
            temp_ranks: Arc::new(ExpiryList::in_memory("tempranks")),
            muted: Arc::new(ExpiryList::in_memory("muted")),
            frozen: Arc::new(ExpiryList::in_memory("frozen")),
        }
    }
}

/// The running watches over the moderation lists.
pub struct ModerationWatches {
    pub temp_ranks: Arc<ExpiryWatch>,
    pub muted: Arc<ExpiryWatch>,
    pub frozen: Arc<ExpiryWatch>,
}

impl ModerationWatches {
    /// Start one watch per list on `scheduler`.
    pub fn start(
        lists: &ModerationLists,
        scheduler: &Arc<Scheduler>,
        actions: Arc<dyn ModerationActions>,
    ) -> Self {
        let ranks = Arc::clone(&actions);
        let temp_ranks = ExpiryWatch::new(
            Arc::clone(&lists.temp_ranks),
            Arc::clone(scheduler),
            move |record| ranks.revoke_temp_rank(record),
        );

        let mutes = Arc::clone(&actions);
        let muted = ExpiryWatch::new(
            Arc::clone(&lists.muted),
            Arc::clone(scheduler),
            move |record| mutes.unmute(record),
        );

        let frozen = ExpiryWatch::new(
            Arc::clone(&lists.frozen),
            Arc::clone(scheduler),
            move |record| actions.unfreeze(record),
        );

        temp_ranks.start();
        muted.start();
        frozen.start();

        Self {
            temp_ranks,
            muted,
            frozen,
        }
    }

    /// Recompute every watch, e.g. after an operator edits a list.
    pub fn recalculate_all(&self) {
        self.temp_ranks.recalculate();
        self.muted.recalculate();
        self.frozen.recalculate();
    }

    /// Cancel every watch.
    pub fn stop(&self) {
        self.temp_ranks.stop();
        self.muted.stop();
        self.frozen.stop();
    }
}
