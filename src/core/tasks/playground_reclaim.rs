// src/core/tasks/playground_reclaim.rs

//! Reclaims the files a playground created: check that nothing is running in
//! it, fetch its file inventory, unlink, and retry while progress is made.

use super::async_task::{AsyncTask, TaskCore, TaskOutcome, TaskResult, TaskState};
use crate::config::ReclaimConfig;
use crate::core::errors::detail;
use crate::core::fs::{self, FileId, FileSystem};
use crate::core::metrics;
use crate::core::protocol::payload::{
    decode_activity_reply, decode_inventory_reply, encode_playground_query,
};
use crate::core::protocol::{Opcode, Transaction, TransactionChannel, TransactionStatus};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The phases of a reclaim pass. Each retry starts over at `QueryingActivity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReclaimPhase {
    QueryingActivity,
    FetchingFiles,
    Unlinking,
}

/// How a single unlink pass went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassResult {
    Complete,
    Partial,
    NoProgress,
}

/// What happened to a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Removed,
    AlreadyGone,
    Failed(i32),
}

/// Deletes the files owned by a playground.
///
/// A pass that made partial progress starts over with a fresh activity check
/// and inventory; the daemon's membership bookkeeping may lag the filesystem,
/// so the previous inventory is never reused. Consecutive passes without any
/// progress are bounded, and reaching the bound fails the task with
/// `LOCAL_ERROR(BUSY)`.
pub struct PlaygroundReclaimTask<C: TransactionChannel, F: FileSystem> {
    core: TaskCore,
    channel: C,
    fs: F,
    pg_id: u64,
    candidates: Option<HashSet<FileId>>,
    phase: ReclaimPhase,
    max_no_progress_passes: u32,
    no_progress_count: u32,
    passes: u32,
    reclaimed: usize,
    pending: BTreeMap<FileId, Vec<PathBuf>>,
    errors: BTreeMap<FileId, i32>,
    in_flight: Option<C::Transaction>,
}

impl<C: TransactionChannel, F: FileSystem> PlaygroundReclaimTask<C, F> {
    pub fn new(channel: C, fs: F, pg_id: u64) -> Self {
        Self {
            core: TaskCore::default(),
            channel,
            fs,
            pg_id,
            candidates: None,
            phase: ReclaimPhase::QueryingActivity,
            max_no_progress_passes: ReclaimConfig::default().max_no_progress_passes,
            no_progress_count: 0,
            passes: 0,
            reclaimed: 0,
            pending: BTreeMap::new(),
            errors: BTreeMap::new(),
            in_flight: None,
        }
    }

    pub fn from_config(channel: C, fs: F, pg_id: u64, config: &ReclaimConfig) -> Self {
        Self::new(channel, fs, pg_id).with_max_no_progress_passes(config.max_no_progress_passes)
    }

    /// Restricts the task to the given files instead of everything the
    /// playground owns.
    pub fn with_candidates(mut self, candidates: impl IntoIterator<Item = FileId>) -> Self {
        self.candidates = Some(candidates.into_iter().collect());
        self
    }

    pub fn with_max_no_progress_passes(mut self, passes: u32) -> Self {
        self.max_no_progress_passes = passes.max(1);
        self
    }

    pub fn pg_id(&self) -> u64 {
        self.pg_id
    }

    pub fn phase(&self) -> ReclaimPhase {
        self.phase
    }

    /// Returns true if any file currently has a recorded failure.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The last failure code per file. May be inspected while the task is
    /// still retrying; it is empty once the task succeeded.
    pub fn errors(&self) -> &BTreeMap<FileId, i32> {
        &self.errors
    }

    /// The files selected for the current unlink pass, with every path each
    /// is linked under. After a pass only the files that failed remain.
    pub fn pending(&self) -> &BTreeMap<FileId, Vec<PathBuf>> {
        &self.pending
    }

    /// The number of completed unlink passes.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// The number of files removed so far.
    pub fn reclaimed(&self) -> usize {
        self.reclaimed
    }

    pub fn no_progress_count(&self) -> u32 {
        self.no_progress_count
    }

    fn finish(&mut self, outcome: TaskOutcome) -> TaskState {
        if outcome.is_success() {
            info!(
                "Reclaimed playground {}: {} files in {} passes",
                self.pg_id, self.reclaimed, self.passes
            );
        } else {
            warn!(
                "Reclaiming playground {} failed: {} ({} files left with errors)",
                self.pg_id,
                outcome,
                self.errors.len()
            );
        }
        self.core.finish(outcome)
    }

    fn start_query(&mut self) -> Result<(), TaskOutcome> {
        let opcode = match self.phase {
            ReclaimPhase::QueryingActivity => Opcode::PlaygroundActivity,
            _ => Opcode::PlaygroundFiles,
        };
        match self
            .channel
            .start(opcode, None, encode_playground_query(self.pg_id))
        {
            Ok(transaction) => {
                let label: &'static str = opcode.into();
                metrics::TRANSACTIONS_STARTED_TOTAL
                    .with_label_values(&[label])
                    .inc();
                debug!("Started {} query for playground {}", opcode, self.pg_id);
                self.in_flight = Some(transaction);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Could not start {} query for playground {}: {}",
                    opcode, self.pg_id, e
                );
                Err(TaskOutcome::from(&e))
            }
        }
    }

    /// Handles a finished query and moves to the next phase.
    fn complete_query(&mut self, transaction: C::Transaction) -> Result<(), TaskOutcome> {
        match transaction.status() {
            TransactionStatus::Completed => {}
            TransactionStatus::Rejected(code) => {
                return Err(TaskOutcome::failure(TaskResult::RemoteError, code));
            }
            TransactionStatus::Broken | TransactionStatus::Pending => {
                return Err(TaskOutcome::failure(
                    TaskResult::CommunicationError,
                    detail::COMMUNICATION,
                ));
            }
        }

        match self.phase {
            ReclaimPhase::QueryingActivity => {
                let live = decode_activity_reply(transaction.reply_payload())
                    .map_err(|e| TaskOutcome::from(&e))?;
                if live > 0 {
                    info!(
                        "Playground {} still has {} live processes, refusing to reclaim",
                        self.pg_id, live
                    );
                    return Err(TaskOutcome::failure(TaskResult::RemoteError, detail::BUSY));
                }
                self.phase = ReclaimPhase::FetchingFiles;
            }
            ReclaimPhase::FetchingFiles => {
                let inventory = decode_inventory_reply(transaction.reply_payload())
                    .map_err(|e| TaskOutcome::from(&e))?;
                let listed = inventory.len();
                self.pending.clear();
                for entry in inventory {
                    if self
                        .candidates
                        .as_ref()
                        .is_some_and(|candidates| !candidates.contains(&entry.id))
                    {
                        continue;
                    }
                    self.pending.entry(entry.id).or_default().push(entry.path);
                }
                let pending = &self.pending;
                self.errors.retain(|id, _| pending.contains_key(id));
                debug!(
                    "Playground {} lists {} files, {} selected for unlinking",
                    self.pg_id,
                    listed,
                    self.pending.len()
                );
                self.phase = ReclaimPhase::Unlinking;
            }
            ReclaimPhase::Unlinking => {}
        }
        Ok(())
    }

    /// Removes one path, falling back to `rmdir` for directories.
    fn remove(fs: &mut F, path: &Path) -> Removal {
        let result = match fs.unlink(path) {
            Err(e) if fs::is_directory_error(&e) => fs.rmdir(path),
            other => other,
        };
        match result {
            Ok(()) => Removal::Removed,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Removal::AlreadyGone,
            Err(e) => Removal::Failed(fs::error_code(&e)),
        }
    }

    /// Removes every link of every pending file. A file counts as deleted only
    /// when all of its links are gone and at least one of them was removed by
    /// this pass. A file that was already gone leaves the pending set without
    /// counting as progress, since a lagging inventory can list it forever.
    fn unlink_pass(&mut self) -> PassResult {
        let total = self.pending.len();
        let mut deleted = 0usize;
        let mut already_gone = 0usize;
        for (id, paths) in &self.pending {
            let mut failure = None;
            let mut removed_any = false;
            for path in paths {
                match Self::remove(&mut self.fs, path) {
                    Removal::Removed => removed_any = true,
                    Removal::AlreadyGone => {
                        debug!("{:?} ({}) is already gone", path, id);
                    }
                    Removal::Failed(code) => {
                        debug!("Could not remove {:?} ({}): code {}", path, id, code);
                        failure.get_or_insert(code);
                    }
                }
            }
            match failure {
                None => {
                    self.errors.remove(id);
                    if removed_any {
                        deleted += 1;
                    } else {
                        already_gone += 1;
                    }
                }
                Some(code) => {
                    self.errors.insert(*id, code);
                }
            }
        }

        self.passes += 1;
        self.reclaimed += deleted;
        metrics::PLAYGROUND_UNLINK_PASSES_TOTAL.inc();
        metrics::PLAYGROUND_FILES_RECLAIMED_TOTAL.inc_by(deleted as f64);
        let errors = &self.errors;
        self.pending.retain(|id, _| errors.contains_key(id));
        debug!(
            "Unlink pass {} for playground {}: {}/{} removed, {} already gone",
            self.passes, self.pg_id, deleted, total, already_gone
        );

        if self.pending.is_empty() {
            PassResult::Complete
        } else if deleted > 0 {
            PassResult::Partial
        } else {
            PassResult::NoProgress
        }
    }
}

impl<C: TransactionChannel, F: FileSystem> AsyncTask for PlaygroundReclaimTask<C, F> {
    fn poll(&mut self, cancel: &CancellationToken) -> TaskState {
        if self.core.state().is_done() {
            return self.core.state();
        }
        self.core.start();

        loop {
            // An outstanding query is always drained first.
            if let Some(transaction) = &self.in_flight {
                if !transaction.is_done() {
                    return self.core.state();
                }
                if let Some(transaction) = self.in_flight.take()
                    && let Err(outcome) = self.complete_query(transaction)
                {
                    return self.finish(outcome);
                }
                continue;
            }

            // Phase boundary.
            if cancel.is_cancelled() {
                info!(
                    "Reclaiming playground {} cancelled during {}",
                    self.pg_id, self.phase
                );
                return self.finish(TaskOutcome::interrupted());
            }

            match self.phase {
                ReclaimPhase::QueryingActivity | ReclaimPhase::FetchingFiles => {
                    if let Err(outcome) = self.start_query() {
                        return self.finish(outcome);
                    }
                }
                ReclaimPhase::Unlinking => match self.unlink_pass() {
                    PassResult::Complete => return self.finish(TaskOutcome::success()),
                    PassResult::Partial => {
                        self.no_progress_count = 0;
                        self.phase = ReclaimPhase::QueryingActivity;
                    }
                    PassResult::NoProgress => {
                        self.no_progress_count += 1;
                        if self.no_progress_count >= self.max_no_progress_passes {
                            return self
                                .finish(TaskOutcome::failure(TaskResult::LocalError, detail::BUSY));
                        }
                        self.phase = ReclaimPhase::QueryingActivity;
                    }
                },
            }
        }
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn reset(&mut self) {
        if self.in_flight.is_some() {
            warn!(
                "Ignoring reset of reclaim task for playground {} with a query in flight",
                self.pg_id
            );
            return;
        }
        self.core.reset();
        self.phase = ReclaimPhase::QueryingActivity;
        self.no_progress_count = 0;
        self.passes = 0;
        self.reclaimed = 0;
        self.pending.clear();
        self.errors.clear();
    }
}
