// tests/integration/playground_reclaim_test.rs

//! Integration tests for PlaygroundReclaimTask

use super::fixtures::{FakeChannel, FakeFs, playground_daemon};
use super::test_helpers::{init_tracing, poll_once, poll_to_completion};
use bytes::Bytes;
use fileseal::config::ReclaimConfig;
use fileseal::core::errors::detail;
use fileseal::core::fs::{FileId, HostFileSystem};
use fileseal::core::protocol::payload::{
    InventoryEntry, encode_activity_reply, encode_inventory_reply,
};
use fileseal::core::protocol::{Opcode, TransactionStatus};
use fileseal::core::tasks::{
    AsyncTask, PlaygroundReclaimTask, ReclaimPhase, TaskOutcome, TaskResult, TaskState,
};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use tokio_util::sync::CancellationToken;

const PG: u64 = 42;

fn idle_daemon(fs: &FakeFs) -> FakeChannel {
    playground_daemon(fs.clone(), Arc::new(AtomicU32::new(0)))
}

#[test]
fn test_empty_playground_succeeds_in_one_pass() {
    init_tracing();
    let fs = FakeFs::new();
    let channel = idle_daemon(&fs);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome, TaskOutcome::success());
    assert_eq!(task.passes(), 1);
    assert_eq!(task.reclaimed(), 0);
    assert!(fs.unlink_calls().is_empty());
}

#[test]
fn test_every_file_removed() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/42/out.log", 1, 100);
    fs.add_file("/pg/42/tmp.db", 1, 101);
    let channel = idle_daemon(&fs);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(task.reclaimed(), 2);
    assert!(!task.has_errors());
    assert!(fs.inventory().is_empty());
    let opcodes: Vec<_> = channel.started().iter().map(|t| t.opcode).collect();
    assert_eq!(opcodes, [Opcode::PlaygroundActivity, Opcode::PlaygroundFiles]);
    assert!(channel.started().iter().all(|t| t.identity.is_none()));
    assert_eq!(channel.started()[0].payload, Bytes::copy_from_slice(&PG.to_be_bytes()));
}

#[test]
fn test_no_progress_is_bounded_at_two_passes() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 10);
    fs.add_file("/pg/b", 1, 11);
    fs.fail_always("/pg/a", libc::EACCES);
    fs.fail_always("/pg/b", libc::EACCES);
    let channel = idle_daemon(&fs);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome, TaskOutcome::failure(TaskResult::LocalError, detail::BUSY));
    assert_eq!(task.passes(), 2);
    assert_eq!(task.no_progress_count(), 2);
    assert_eq!(channel.count_of(Opcode::PlaygroundActivity), 2);
    assert_eq!(channel.count_of(Opcode::PlaygroundFiles), 2);
    assert_eq!(task.errors().len(), 2);
    assert!(task.errors().values().all(|&code| code == libc::EACCES));
    assert!(fs.exists("/pg/a") && fs.exists("/pg/b"));
}

#[test]
fn test_partial_progress_requeries_and_retries() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 10);
    fs.add_file("/pg/b", 1, 11);
    fs.fail_next("/pg/b", &[libc::EAGAIN]);
    let channel = idle_daemon(&fs);
    channel.set_polls_before_done(1);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);

    // Activity query, inventory query, then the first pass.
    assert_eq!(poll_once(&mut task), TaskState::Running);
    assert_eq!(poll_once(&mut task), TaskState::Running);
    assert_eq!(poll_once(&mut task), TaskState::Running);

    // The failure is visible while the task retries.
    assert_eq!(task.passes(), 1);
    assert_eq!(task.phase(), ReclaimPhase::QueryingActivity);
    assert_eq!(task.errors().get(&FileId::new(1, 11)), Some(&libc::EAGAIN));
    assert!(!fs.exists("/pg/a"));

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(task.passes(), 2);
    assert_eq!(task.reclaimed(), 2);
    assert!(!task.has_errors());
    assert_eq!(channel.count_of(Opcode::PlaygroundActivity), 2);
    assert_eq!(channel.count_of(Opcode::PlaygroundFiles), 2);
}

#[test]
fn test_active_playground_is_not_touched() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/running.sock", 1, 10);
    let channel = playground_daemon(fs.clone(), Arc::new(AtomicU32::new(3)));
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome, TaskOutcome::failure(TaskResult::RemoteError, detail::BUSY));
    assert_eq!(channel.count_of(Opcode::PlaygroundFiles), 0);
    assert!(fs.unlink_calls().is_empty());
    assert!(fs.exists("/pg/running.sock"));
}

#[test]
fn test_rejected_query_is_remote_error() {
    init_tracing();
    let fs = FakeFs::new();
    let channel = FakeChannel::with_responder(Box::new(|_, _, _| {
        (TransactionStatus::Rejected(libc::ESRCH), Bytes::new())
    }));
    let mut task = PlaygroundReclaimTask::new(channel, fs, PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome, TaskOutcome::failure(TaskResult::RemoteError, libc::ESRCH));
}

#[test]
fn test_directories_fall_back_to_rmdir() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_dir("/pg/cache", 1, 20);
    let mut task = PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(fs.unlink_calls(), [PathBuf::from("/pg/cache")]);
    assert_eq!(fs.rmdir_calls(), [PathBuf::from("/pg/cache")]);
}

#[test]
fn test_non_empty_directory_is_removed_on_a_later_pass() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_dir("/pg/d", 1, 5);
    fs.add_file("/pg/d/x", 1, 9);
    fs.fail_next("/pg/d", &[libc::ENOTEMPTY]);
    let mut task = PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(task.passes(), 2);
    assert!(fs.inventory().is_empty());
}

#[test]
fn test_only_candidates_are_removed() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/keep", 1, 1);
    fs.add_file("/pg/drop", 1, 2);
    let mut task = PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG)
        .with_candidates([FileId::new(1, 2)]);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert!(fs.exists("/pg/keep"));
    assert!(!fs.exists("/pg/drop"));
    assert_eq!(task.reclaimed(), 1);
}

#[test]
fn test_already_gone_file_is_not_an_error() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/vanishing", 1, 3);
    fs.fail_next("/pg/vanishing", &[libc::ENOENT]);
    let mut task = PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(task.passes(), 1);
    // Someone else removed it.
    assert_eq!(task.reclaimed(), 0);
    assert!(!task.has_errors());
}

/// A daemon that is idle and always lists the same files, whatever the
/// filesystem holds.
fn stale_daemon(listed: Vec<InventoryEntry>) -> FakeChannel {
    FakeChannel::with_responder(Box::new(move |opcode, _, _| match opcode {
        Opcode::PlaygroundActivity => (TransactionStatus::Completed, encode_activity_reply(0)),
        _ => (
            TransactionStatus::Completed,
            encode_inventory_reply(&listed).unwrap(),
        ),
    }))
}

#[test]
fn test_stale_inventory_still_reaches_the_no_progress_bound() {
    init_tracing();
    let fs = FakeFs::new();
    // /pg/a was removed behind the daemon's back; /pg/b can never be removed.
    fs.add_file("/pg/b", 1, 11);
    fs.fail_always("/pg/b", libc::EACCES);
    let channel = stale_daemon(vec![
        InventoryEntry {
            id: FileId::new(1, 10),
            path: PathBuf::from("/pg/a"),
        },
        InventoryEntry {
            id: FileId::new(1, 11),
            path: PathBuf::from("/pg/b"),
        },
    ]);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome, TaskOutcome::failure(TaskResult::LocalError, detail::BUSY));
    assert_eq!(task.passes(), 2);
    assert_eq!(task.reclaimed(), 0);
    assert_eq!(task.errors().len(), 1);
    assert_eq!(task.errors().get(&FileId::new(1, 11)), Some(&libc::EACCES));
    assert_eq!(channel.count_of(Opcode::PlaygroundFiles), 2);
}

#[test]
fn test_stale_inventory_of_removed_files_succeeds() {
    init_tracing();
    let fs = FakeFs::new();
    let channel = stale_daemon(vec![InventoryEntry {
        id: FileId::new(1, 10),
        path: PathBuf::from("/pg/a"),
    }]);
    let mut task = PlaygroundReclaimTask::new(channel, fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(task.passes(), 1);
    assert_eq!(task.reclaimed(), 0);
}

#[test]
fn test_file_counts_only_when_every_link_is_gone() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 7);
    fs.add_file("/pg/hardlink", 1, 7);
    fs.fail_always("/pg/hardlink", libc::EPERM);
    let mut task = PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome, TaskOutcome::failure(TaskResult::LocalError, detail::BUSY));
    assert_eq!(task.reclaimed(), 0);
    assert_eq!(task.errors().get(&FileId::new(1, 7)), Some(&libc::EPERM));
    assert!(!fs.exists("/pg/a"));
    assert!(fs.exists("/pg/hardlink"));
}

#[test]
fn test_hard_links_are_all_removed() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 7);
    fs.add_file("/pg/b", 1, 7);
    let mut task = PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success());
    assert_eq!(task.reclaimed(), 1);
    assert_eq!(fs.unlink_calls().len(), 2);
}

#[test]
fn test_no_progress_bound_is_configurable() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/stuck", 1, 1);
    fs.fail_always("/pg/stuck", libc::EBUSY);
    let config = ReclaimConfig {
        max_no_progress_passes: 3,
    };
    let mut task = PlaygroundReclaimTask::from_config(idle_daemon(&fs), fs.clone(), PG, &config);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert_eq!(outcome.detail, Some(detail::BUSY));
    assert_eq!(task.passes(), 3);

    let mut task =
        PlaygroundReclaimTask::new(idle_daemon(&fs), fs.clone(), PG).with_max_no_progress_passes(0);
    poll_to_completion(&mut task, &CancellationToken::new());
    assert_eq!(task.passes(), 1);
}

#[test]
fn test_cancel_before_first_poll() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 1);
    let channel = idle_daemon(&fs);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = poll_to_completion(&mut task, &cancel);

    assert_eq!(outcome, TaskOutcome::interrupted());
    assert_eq!(channel.started_count(), 0);
    assert!(fs.exists("/pg/a"));
}

#[test]
fn test_cancel_during_query_drains_it_first() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 1);
    let channel = idle_daemon(&fs);
    channel.set_polls_before_done(2);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);
    let cancel = CancellationToken::new();

    assert_eq!(task.poll(&cancel), TaskState::Running);
    cancel.cancel();
    let outcome = poll_to_completion(&mut task, &cancel);

    assert_eq!(outcome, TaskOutcome::interrupted());
    assert_eq!(channel.count_of(Opcode::PlaygroundActivity), 1);
    assert_eq!(channel.count_of(Opcode::PlaygroundFiles), 0);
    assert_eq!(channel.outstanding(), 0);
    assert!(fs.unlink_calls().is_empty());
}

#[test]
fn test_polling_a_done_task_is_a_no_op() {
    init_tracing();
    let fs = FakeFs::new();
    fs.add_file("/pg/a", 1, 1);
    let channel = idle_daemon(&fs);
    let mut task = PlaygroundReclaimTask::new(channel.clone(), fs.clone(), PG);
    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    fs.add_file("/pg/late", 1, 2);
    for _ in 0..3 {
        assert_eq!(poll_once(&mut task), TaskState::Done(outcome));
    }

    assert_eq!(channel.started_count(), 2);
    assert!(fs.exists("/pg/late"));

    task.reset();
    assert_eq!(task.state(), TaskState::New);
    assert_eq!(task.passes(), 0);
    assert!(poll_to_completion(&mut task, &CancellationToken::new()).is_success());
    assert!(!fs.exists("/pg/late"));
}

/// Lists everything under `root` the way the daemon reports a playground.
fn host_inventory(root: &Path) -> Vec<InventoryEntry> {
    let mut entries = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            let meta = std::fs::symlink_metadata(&path).unwrap();
            if meta.is_dir() {
                dirs.push(path.clone());
            }
            entries.push(InventoryEntry {
                id: FileId::new(meta.dev(), meta.ino()),
                path,
            });
        }
    }
    entries
}

#[test]
fn test_reclaims_a_real_directory_tree() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let base = root.path().to_path_buf();
    std::fs::write(base.join("a.txt"), b"a").unwrap();
    std::fs::write(base.join("b.txt"), b"b").unwrap();
    std::fs::create_dir(base.join("sub")).unwrap();
    std::fs::write(base.join("sub").join("c.txt"), b"c").unwrap();

    let listed = base.clone();
    let channel = FakeChannel::with_responder(Box::new(move |opcode, _, _| match opcode {
        Opcode::PlaygroundActivity => (TransactionStatus::Completed, encode_activity_reply(0)),
        _ => (
            TransactionStatus::Completed,
            encode_inventory_reply(&host_inventory(&listed)).unwrap(),
        ),
    }));
    let mut task = PlaygroundReclaimTask::new(channel, HostFileSystem, PG);

    let outcome = poll_to_completion(&mut task, &CancellationToken::new());

    assert!(outcome.is_success(), "outcome was {outcome}");
    assert!(task.passes() <= 2);
    assert_eq!(task.reclaimed(), 4);
    assert_eq!(std::fs::read_dir(&base).unwrap().count(), 0);
}
