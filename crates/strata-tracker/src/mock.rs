//! In-memory tracker for tests
//!
//! Numbers issues sequentially from 1, stores files with synthetic `sha`
//! tokens, records every call, and can be told to fail or stall specific
//! operations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use strata_core::{BoardItem, BoardPlacement, IssueRequest, RemoteIdentity, WorkItemKind};

use crate::client::{
    BoardFields, BoardItemRef, CommentRef, FileWrite, FileWriteResult, LinkedBranch, RemoteFile,
    StatusMutation, TrackerClient,
};
use crate::error::{TrackerError, TrackerResult};

/// A call received by [`MockTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    CreateIssue {
        title: String,
        kind: WorkItemKind,
        parent_number: Option<u64>,
    },
    LinkSubIssue {
        parent_number: u64,
        child_id: u64,
    },
    CreateLinkedBranch {
        issue_number: u64,
        branch_name: String,
    },
    AddToBoard {
        board_id: String,
        number: u64,
        kind: WorkItemKind,
        parent_number: Option<u64>,
    },
    BoardFields {
        board_number: u64,
    },
    BoardItemsForIssue {
        issue_number: u64,
    },
    UpdateBoardStatus(StatusMutation),
    AddComment {
        issue_number: u64,
        body: String,
    },
    GetFile {
        path: String,
    },
    PutFile {
        path: String,
        sha: Option<String>,
    },
}

impl TrackerCall {
    /// Operation name used by failure and delay rules
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateIssue { .. } => "create_issue",
            Self::LinkSubIssue { .. } => "link_sub_issue",
            Self::CreateLinkedBranch { .. } => "create_linked_branch",
            Self::AddToBoard { .. } => "add_to_board",
            Self::BoardFields { .. } => "board_fields",
            Self::BoardItemsForIssue { .. } => "board_items_for_issue",
            Self::UpdateBoardStatus(_) => "update_board_status",
            Self::AddComment { .. } => "add_comment",
            Self::GetFile { .. } => "get_file",
            Self::PutFile { .. } => "put_file",
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: String,
    /// Issue title substring (create_issue), issue number, or path
    target: Option<String>,
    error: TrackerError,
}

#[derive(Debug, Clone)]
struct DelayRule {
    operation: String,
    target: Option<String>,
    delay: Duration,
}

fn rule_matches(operation: &str, rule_target: Option<&str>, target: &str) -> bool {
    match rule_target {
        None => true,
        Some(t) if operation == "create_issue" => target.contains(t),
        Some(t) => t == target,
    }
}

#[derive(Debug, Default)]
struct MockState {
    next_number: u64,
    issues: Vec<(IssueRequest, RemoteIdentity)>,
    files: HashMap<String, RemoteFile>,
    file_version: u64,
    boards: HashMap<u64, BoardFields>,
    board_items: HashMap<u64, Vec<BoardItemRef>>,
    next_board_item: u64,
    calls: Vec<TrackerCall>,
    failures: Vec<FailureRule>,
    delays: Vec<DelayRule>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Leaves the in-flight count when dropped, including when a caller's
/// timeout cancels the sleep
struct InFlight<'a>(&'a MockTracker);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state().in_flight -= 1;
    }
}

/// Mock tracker for testing
#[derive(Debug, Default)]
pub struct MockTracker {
    state: Mutex<MockState>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a board reachable by number
    pub fn with_board(self, board_number: u64, fields: BoardFields) -> Self {
        self.state().boards.insert(board_number, fields);
        self
    }

    /// Pre-place an issue on a board
    pub fn with_board_item(self, issue_number: u64, item: BoardItemRef) -> Self {
        self.state()
            .board_items
            .entry(issue_number)
            .or_default()
            .push(item);
        self
    }

    /// Seed a repository file
    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut state = self.state();
            state.file_version += 1;
            let sha = format!("sha-{}", state.file_version);
            state.files.insert(
                path.to_string(),
                RemoteFile {
                    path: path.to_string(),
                    content: content.to_string(),
                    sha,
                    url: format!("https://github.com/mock/repo/blob/main/{}", path),
                },
            );
        }
        self
    }

    /// Fail every call of `operation`
    pub fn fail(self, operation: &str, error: TrackerError) -> Self {
        self.push_failure(operation, None, error)
    }

    /// Fail calls of `operation` whose target matches
    ///
    /// The target is matched as a title substring for `create_issue`, and
    /// exactly against the issue number or file path otherwise.
    pub fn fail_on(self, operation: &str, target: impl Into<String>, error: TrackerError) -> Self {
        self.push_failure(operation, Some(target.into()), error)
    }

    fn push_failure(self, operation: &str, target: Option<String>, error: TrackerError) -> Self {
        self.state().failures.push(FailureRule {
            operation: operation.to_string(),
            target,
            error,
        });
        self
    }

    /// Stall every call of `operation` before answering
    pub fn with_delay(self, operation: &str, delay: Duration) -> Self {
        self.push_delay(operation, None, delay)
    }

    /// Stall calls of `operation` whose target matches, as in [`Self::fail_on`]
    ///
    /// The first matching delay rule applies.
    pub fn with_delay_on(self, operation: &str, target: impl Into<String>, delay: Duration) -> Self {
        self.push_delay(operation, Some(target.into()), delay)
    }

    fn push_delay(self, operation: &str, target: Option<String>, delay: Duration) -> Self {
        self.state().delays.push(DelayRule {
            operation: operation.to_string(),
            target,
            delay,
        });
        self
    }

    /// Most calls that were ever inside the mock at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }

    /// All calls received so far, in arrival order
    pub fn calls(&self) -> Vec<TrackerCall> {
        self.state().calls.clone()
    }

    /// Calls of one operation
    pub fn calls_for(&self, operation: &str) -> Vec<TrackerCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .cloned()
            .collect()
    }

    /// Titles of issues created so far
    pub fn created_titles(&self) -> Vec<String> {
        self.state()
            .issues
            .iter()
            .map(|(req, _)| req.title.clone())
            .collect()
    }

    /// Current stored version of a file
    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.state().files.get(path).cloned()
    }

    /// Record the call, apply any delay, then any matching failure rule
    async fn enter(&self, call: TrackerCall, target: &str) -> TrackerResult<()> {
        let operation = call.operation();
        let (delay, failure) = {
            let mut state = self.state();
            state.calls.push(call);
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            let delay = state
                .delays
                .iter()
                .find(|rule| {
                    rule.operation == operation
                        && rule_matches(operation, rule.target.as_deref(), target)
                })
                .map(|rule| rule.delay);
            let failure = state
                .failures
                .iter()
                .find(|rule| {
                    rule.operation == operation
                        && rule_matches(operation, rule.target.as_deref(), target)
                })
                .map(|rule| rule.error.clone());
            (delay, failure)
        };

        if let Some(delay) = delay {
            let _leave = InFlight(self);
            tokio::time::sleep(delay).await;
        } else {
            self.state().in_flight -= 1;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TrackerClient for MockTracker {
    async fn create_issue(&self, request: &IssueRequest) -> TrackerResult<RemoteIdentity> {
        self.enter(
            TrackerCall::CreateIssue {
                title: request.title.clone(),
                kind: request.kind,
                parent_number: request.parent_number,
            },
            &request.title,
        )
        .await?;

        let mut state = self.state();
        state.next_number += 1;
        let number = state.next_number;
        let identity = RemoteIdentity {
            id: 9000 + number,
            node_id: format!("I_mock{}", number),
            number,
            url: format!("https://github.com/mock/repo/issues/{}", number),
        };
        state.issues.push((request.clone(), identity.clone()));
        Ok(identity)
    }

    async fn link_sub_issue(&self, parent_number: u64, child_id: u64) -> TrackerResult<()> {
        self.enter(
            TrackerCall::LinkSubIssue {
                parent_number,
                child_id,
            },
            &parent_number.to_string(),
        )
        .await
    }

    async fn create_linked_branch(
        &self,
        issue: &RemoteIdentity,
        branch_name: &str,
        _base_branch: &str,
    ) -> TrackerResult<LinkedBranch> {
        self.enter(
            TrackerCall::CreateLinkedBranch {
                issue_number: issue.number,
                branch_name: branch_name.to_string(),
            },
            &issue.number.to_string(),
        )
        .await?;

        Ok(LinkedBranch {
            name: branch_name.to_string(),
            issue_number: issue.number,
        })
    }

    async fn add_to_board(&self, placement: &BoardPlacement) -> TrackerResult<BoardItem> {
        self.enter(
            TrackerCall::AddToBoard {
                board_id: placement.board_id.clone(),
                number: placement.number,
                kind: placement.kind,
                parent_number: placement.parent_number,
            },
            &placement.number.to_string(),
        )
        .await?;

        let mut state = self.state();
        state.next_board_item += 1;
        let item_id = format!("PVTI_mock{}", state.next_board_item);
        state
            .board_items
            .entry(placement.number)
            .or_default()
            .push(BoardItemRef {
                item_id: item_id.clone(),
                board_id: placement.board_id.clone(),
            });
        Ok(BoardItem::new(placement.board_id.clone(), item_id))
    }

    async fn board_fields(&self, board_number: u64) -> TrackerResult<BoardFields> {
        self.enter(
            TrackerCall::BoardFields { board_number },
            &board_number.to_string(),
        )
        .await?;

        self.state()
            .boards
            .get(&board_number)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("board {}", board_number)))
    }

    async fn board_items_for_issue(&self, issue_number: u64) -> TrackerResult<Vec<BoardItemRef>> {
        self.enter(
            TrackerCall::BoardItemsForIssue { issue_number },
            &issue_number.to_string(),
        )
        .await?;

        Ok(self
            .state()
            .board_items
            .get(&issue_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_board_status(&self, mutation: &StatusMutation) -> TrackerResult<()> {
        self.enter(
            TrackerCall::UpdateBoardStatus(mutation.clone()),
            &mutation.item_id,
        )
        .await
    }

    async fn add_comment(&self, issue_number: u64, body: &str) -> TrackerResult<CommentRef> {
        self.enter(
            TrackerCall::AddComment {
                issue_number,
                body: body.to_string(),
            },
            &issue_number.to_string(),
        )
        .await?;

        let id = self.state().calls.len() as u64;
        Ok(CommentRef {
            id,
            url: format!(
                "https://github.com/mock/repo/issues/{}#issuecomment-{}",
                issue_number, id
            ),
        })
    }

    async fn get_file(&self, path: &str) -> TrackerResult<RemoteFile> {
        self.enter(
            TrackerCall::GetFile {
                path: path.to_string(),
            },
            path,
        )
        .await?;

        self.state()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("read {}: Not Found", path)))
    }

    async fn put_file(&self, write: &FileWrite) -> TrackerResult<FileWriteResult> {
        self.enter(
            TrackerCall::PutFile {
                path: write.path.clone(),
                sha: write.sha.clone(),
            },
            &write.path,
        )
        .await?;

        let mut state = self.state();
        let current_sha = state.files.get(&write.path).map(|f| f.sha.clone());
        match (&write.sha, current_sha) {
            (Some(given), Some(current)) if *given != current => {
                return Err(TrackerError::Conflict(format!(
                    "write {}: {} does not match {}",
                    write.path, write.path, given
                )));
            }
            (Some(_), None) => {
                return Err(TrackerError::NotFound(format!("write {}: Not Found", write.path)));
            }
            (None, Some(_)) => {
                return Err(TrackerError::Conflict(format!(
                    "write {}: \"sha\" wasn't supplied",
                    write.path
                )));
            }
            _ => {}
        }

        state.file_version += 1;
        let sha = format!("sha-{}", state.file_version);
        let url = format!("https://github.com/mock/repo/blob/main/{}", write.path);
        state.files.insert(
            write.path.clone(),
            RemoteFile {
                path: write.path.clone(),
                content: write.content.clone(),
                sha: sha.clone(),
                url: url.clone(),
            },
        );

        Ok(FileWriteResult { url, sha })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::WorkItem;

    #[tokio::test]
    async fn test_mock_numbers_issues_sequentially() {
        let tracker = MockTracker::new();
        let epic = tracker
            .create_issue(&WorkItem::epic("Login", "").resolve().unwrap())
            .await
            .unwrap();
        let feature = tracker
            .create_issue(&WorkItem::feature(1, "OAuth", "").resolve().unwrap())
            .await
            .unwrap();

        assert_eq!(epic.number, 1);
        assert_eq!(feature.number, 2);
        assert_eq!(tracker.created_titles(), vec!["[EPIC] Login", "[FEATURE] OAuth"]);
    }

    #[tokio::test]
    async fn test_mock_failure_rule_matches_title() {
        let tracker = MockTracker::new().fail_on(
            "create_issue",
            "Broken",
            TrackerError::Remote {
                status: 422,
                message: "validation error".into(),
            },
        );

        let ok = tracker
            .create_issue(&WorkItem::epic("Fine", "").resolve().unwrap())
            .await;
        let bad = tracker
            .create_issue(&WorkItem::epic("Broken", "").resolve().unwrap())
            .await;

        assert!(ok.is_ok());
        assert!(bad.is_err());
        assert_eq!(tracker.calls_for("create_issue").len(), 2);
    }

    #[tokio::test]
    async fn test_mock_file_versions() {
        let tracker = MockTracker::new().with_file("docs/a.md", "v1");
        let current = tracker.get_file("docs/a.md").await.unwrap();

        let stale = FileWrite {
            path: "docs/a.md".into(),
            content: "v2".into(),
            message: "update".into(),
            sha: Some("sha-0".into()),
        };
        assert!(tracker.put_file(&stale).await.unwrap_err().is_conflict());

        let fresh = FileWrite {
            sha: Some(current.sha),
            ..stale
        };
        tracker.put_file(&fresh).await.unwrap();
        assert_eq!(tracker.file("docs/a.md").unwrap().content, "v2");

        assert!(tracker.get_file("docs/missing.md").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_delay_on_target_and_peak() {
        let tracker = Arc::new(MockTracker::new().with_delay_on(
            "create_issue",
            "Slow",
            Duration::from_millis(50),
        ));

        let slow = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .create_issue(&WorkItem::epic("Slow", "").resolve().unwrap())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let started = std::time::Instant::now();
        tracker
            .create_issue(&WorkItem::epic("Fast", "").resolve().unwrap())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(40));

        slow.await.unwrap().unwrap();
        assert_eq!(tracker.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_mock_cancelled_call_leaves_in_flight() {
        let tracker = MockTracker::new().with_delay("create_issue", Duration::from_secs(5));
        let request = WorkItem::epic("Stuck", "").resolve().unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), tracker.create_issue(&request)).await;
        assert!(cancelled.is_err());
        assert_eq!(tracker.state().in_flight, 0);
        assert_eq!(tracker.peak_in_flight(), 1);
    }
}
