// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use aleph_fs::{atomic_write, ExclusiveLock, FsError, SharedLock};

use crate::task::{TaskFile, TaskStatus};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("no task with id {0}")]
    NotFound(String),

    #[error("task {task} is already claimed by {holder}")]
    AlreadyClaimed { task: String, holder: String },

    #[error("task {task}: cannot go {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task} is assigned to {holder}, not {caller}")]
    NotAssignee {
        task: String,
        holder: String,
        caller: String,
    },

    #[error("board file {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle on one project's task board file.
///
/// Mutations are exclusive-locked read-modify-writes; an operation that
/// fails validation leaves the file byte-identical.
#[derive(Debug, Clone)]
pub struct Board {
    path: PathBuf,
}

impl Board {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only snapshot.  Writers atomic-rename, so a plain read can
    /// never see a torn file; the shared lock is belt-and-braces against
    /// non-aleph writers.
    pub fn list(&self) -> Result<TaskFile, BoardError> {
        let _guard = SharedLock::acquire(&self.lock_path(), LOCK_TIMEOUT)?;
        self.load()
    }

    /// Claim an open task for `agent_id`.
    ///
    /// Exactly one of any set of racing claims succeeds; the rest see
    /// [`BoardError::AlreadyClaimed`] naming the winner.
    pub fn claim(&self, task_id: &str, agent_id: &str) -> Result<(), BoardError> {
        self.mutate(|file| {
            let task = file
                .find_mut(task_id)
                .ok_or_else(|| BoardError::NotFound(task_id.to_string()))?;
            match task.status {
                TaskStatus::Open => {}
                TaskStatus::Claimed | TaskStatus::InProgress => {
                    return Err(BoardError::AlreadyClaimed {
                        task: task_id.to_string(),
                        holder: task.assignee.clone().unwrap_or_default(),
                    });
                }
                from => {
                    return Err(BoardError::InvalidTransition {
                        task: task_id.to_string(),
                        from,
                        to: TaskStatus::Claimed,
                    });
                }
            }
            task.status = TaskStatus::Claimed;
            task.assignee = Some(agent_id.to_string());
            debug!(task_id, agent_id, "claimed task");
            Ok(())
        })
    }

    /// Move a task along the allowed transition graph.  Reaching `done`
    /// stamps `completed_at`.
    pub fn set_status(&self, task_id: &str, new_status: TaskStatus) -> Result<(), BoardError> {
        self.mutate(|file| {
            let task = file
                .find_mut(task_id)
                .ok_or_else(|| BoardError::NotFound(task_id.to_string()))?;
            if !task.status.can_transition_to(new_status) {
                return Err(BoardError::InvalidTransition {
                    task: task_id.to_string(),
                    from: task.status,
                    to: new_status,
                });
            }
            task.status = new_status;
            match new_status {
                TaskStatus::Done => task.completed_at = Some(Utc::now()),
                TaskStatus::Open => task.assignee = None,
                _ => {}
            }
            debug!(task_id, status = %new_status, "task status changed");
            Ok(())
        })
    }

    /// Give a claimed task back.  Only the current assignee may release.
    pub fn release(&self, task_id: &str, agent_id: &str) -> Result<(), BoardError> {
        self.mutate(|file| {
            let task = file
                .find_mut(task_id)
                .ok_or_else(|| BoardError::NotFound(task_id.to_string()))?;
            match task.assignee.as_deref() {
                Some(holder) if holder == agent_id => {}
                Some(holder) => {
                    return Err(BoardError::NotAssignee {
                        task: task_id.to_string(),
                        holder: holder.to_string(),
                        caller: agent_id.to_string(),
                    });
                }
                None => {
                    return Err(BoardError::InvalidTransition {
                        task: task_id.to_string(),
                        from: task.status,
                        to: TaskStatus::Open,
                    });
                }
            }
            if !task.status.can_transition_to(TaskStatus::Open) {
                return Err(BoardError::InvalidTransition {
                    task: task_id.to_string(),
                    from: task.status,
                    to: TaskStatus::Open,
                });
            }
            task.status = TaskStatus::Open;
            task.assignee = None;
            debug!(task_id, agent_id, "released task");
            Ok(())
        })
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Locked read-modify-write.  `op` errors abort before the write, so
    /// the on-disk state only changes on success.
    fn mutate(
        &self,
        op: impl FnOnce(&mut TaskFile) -> Result<(), BoardError>,
    ) -> Result<(), BoardError> {
        let _guard = ExclusiveLock::acquire(&self.lock_path(), LOCK_TIMEOUT)?;
        let mut file = self.load()?;
        op(&mut file)?;
        let text = serde_yaml::to_string(&file).map_err(|e| BoardError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        atomic_write(&self.path, text.as_bytes())?;
        Ok(())
    }

    fn load(&self) -> Result<TaskFile, BoardError> {
        if !self.path.is_file() {
            return Ok(TaskFile::default());
        }
        let text = std::fs::read_to_string(&self.path)?;
        serde_yaml::from_str(&text).map_err(|e| BoardError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "board".to_string());
        name.push_str(".lock");
        self.path.with_file_name(name)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::task::Task;

    use super::*;

    fn seeded_board() -> (tempfile::TempDir, Board) {
        let dir = tempfile::tempdir().unwrap();
        let board = Board::new(dir.path().join("TODO.yml"));
        let mut parent = Task::new("2", "parent work");
        parent.subtasks.push(Task::new("2.1", "subtask"));
        let file = TaskFile {
            tasks: vec![Task::new("1", "standalone"), parent],
        };
        atomic_write(
            board.path(),
            serde_yaml::to_string(&file).unwrap().as_bytes(),
        )
        .unwrap();
        (dir, board)
    }

    // ── Claim ─────────────────────────────────────────────────────────────────

    #[test]
    fn claim_sets_status_and_assignee() {
        let (_dir, board) = seeded_board();
        board.claim("2.1", "p").unwrap();
        let task = board.list().unwrap().find("2.1").cloned().unwrap();
        assert_eq!(task.status, TaskStatus::Claimed);
        assert_eq!(task.assignee.as_deref(), Some("p"));
    }

    #[test]
    fn second_claim_names_the_winner() {
        let (_dir, board) = seeded_board();
        board.claim("1", "p").unwrap();
        let err = board.claim("1", "q").unwrap_err();
        match err {
            BoardError::AlreadyClaimed { holder, .. } => assert_eq!(holder, "p"),
            other => panic!("expected AlreadyClaimed, got {other}"),
        }
    }

    #[test]
    fn claim_unknown_task_is_not_found() {
        let (_dir, board) = seeded_board();
        assert!(matches!(
            board.claim("9.9", "p"),
            Err(BoardError::NotFound(_))
        ));
    }

    #[test]
    fn racing_claims_have_exactly_one_winner() {
        let (_dir, board) = seeded_board();
        let contenders: Vec<_> = (0..6)
            .map(|i| {
                let board = board.clone();
                std::thread::spawn(move || board.claim("2.1", &format!("agent-{i}")).is_ok())
            })
            .collect();
        let wins = contenders
            .into_iter()
            .filter(|h| *h.join().as_ref().unwrap())
            .count();
        assert_eq!(wins, 1, "exactly one concurrent claim may succeed");
        let task = board.list().unwrap().find("2.1").cloned().unwrap();
        assert!(task.assignee.is_some());
    }

    // ── Status transitions ────────────────────────────────────────────────────

    #[test]
    fn full_lifecycle_walks_the_graph() {
        let (_dir, board) = seeded_board();
        board.claim("1", "p").unwrap();
        board.set_status("1", TaskStatus::InProgress).unwrap();
        board.set_status("1", TaskStatus::Blocked).unwrap();
        board.set_status("1", TaskStatus::InProgress).unwrap();
        board.set_status("1", TaskStatus::Done).unwrap();
        let task = board.list().unwrap().find("1").cloned().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn claimed_to_done_shortcut_is_rejected_and_state_unchanged() {
        let (_dir, board) = seeded_board();
        board.claim("1", "p").unwrap();
        let before = std::fs::read_to_string(board.path()).unwrap();
        assert!(matches!(
            board.set_status("1", TaskStatus::Done),
            Err(BoardError::InvalidTransition { .. })
        ));
        let after = std::fs::read_to_string(board.path()).unwrap();
        assert_eq!(before, after, "a failed transition must not touch the file");
    }

    #[test]
    fn open_to_in_progress_without_claim_is_rejected() {
        let (_dir, board) = seeded_board();
        assert!(matches!(
            board.set_status("1", TaskStatus::InProgress),
            Err(BoardError::InvalidTransition { .. })
        ));
    }

    // ── Release ───────────────────────────────────────────────────────────────

    #[test]
    fn release_resets_to_open_unassigned() {
        let (_dir, board) = seeded_board();
        board.claim("1", "p").unwrap();
        board.release("1", "p").unwrap();
        let task = board.list().unwrap().find("1").cloned().unwrap();
        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.assignee.is_none());
    }

    #[test]
    fn only_the_assignee_may_release() {
        let (_dir, board) = seeded_board();
        board.claim("1", "p").unwrap();
        assert!(matches!(
            board.release("1", "q"),
            Err(BoardError::NotAssignee { .. })
        ));
    }

    #[test]
    fn release_after_in_progress_is_rejected() {
        let (_dir, board) = seeded_board();
        board.claim("1", "p").unwrap();
        board.set_status("1", TaskStatus::InProgress).unwrap();
        assert!(matches!(
            board.release("1", "p"),
            Err(BoardError::InvalidTransition { .. })
        ));
    }

    // ── Misc ──────────────────────────────────────────────────────────────────

    #[test]
    fn missing_file_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let board = Board::new(dir.path().join("TODO.yml"));
        assert!(board.list().unwrap().tasks.is_empty());
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TODO.yml");
        std::fs::write(&path, "tasks: [ { id: 1, ").unwrap();
        let board = Board::new(path);
        assert!(matches!(board.list(), Err(BoardError::Malformed { .. })));
    }
}
