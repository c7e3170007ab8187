//! Tracker client abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::{BoardItem, BoardPlacement, IssueRequest, RemoteIdentity};

use crate::error::TrackerResult;

/// Branch created and linked to an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedBranch {
    pub name: String,
    pub issue_number: u64,
}

/// Single-select option on a board field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: String,
    pub name: String,
}

/// A board field; non-select fields have no options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardField {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub options: Vec<FieldOption>,
}

/// Raw field listing for a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardFields {
    pub board_id: String,
    pub fields: Vec<BoardField>,
}

/// A board row an issue appears on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardItemRef {
    pub item_id: String,
    pub board_id: String,
}

/// Set a single-select field on a board item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMutation {
    pub board_id: String,
    pub item_id: String,
    pub field_id: String,
    pub option_id: String,
}

/// A posted issue comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRef {
    pub id: u64,
    pub url: String,
}

/// Repository file as currently stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    /// Precondition token required to update this exact version
    pub sha: String,
    pub url: String,
}

/// Create (no `sha`) or update (with `sha`) a repository file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub message: String,
    pub sha: Option<String>,
}

/// Outcome of a successful file write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteResult {
    pub url: String,
    pub sha: String,
}

/// Trait for talking to the project-tracking service (allows mocking in tests)
///
/// Every method is a single remote call. Implementations do not retry and
/// must report a missing resource as [`TrackerError::NotFound`] only when
/// the service positively says so.
///
/// [`TrackerError::NotFound`]: crate::TrackerError::NotFound
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Create an issue from a resolved request
    async fn create_issue(&self, request: &IssueRequest) -> TrackerResult<RemoteIdentity>;

    /// Attach `child_id` as a sub-issue of issue `parent_number`
    async fn link_sub_issue(&self, parent_number: u64, child_id: u64) -> TrackerResult<()>;

    /// Create a branch off `base_branch` linked to `issue`
    async fn create_linked_branch(
        &self,
        issue: &RemoteIdentity,
        branch_name: &str,
        base_branch: &str,
    ) -> TrackerResult<LinkedBranch>;

    /// Insert an issue into a board and tag it with its kind and parent
    ///
    /// A board missing the tag fields is an error; the item may already be
    /// on the board when it is returned.
    async fn add_to_board(&self, placement: &BoardPlacement) -> TrackerResult<BoardItem>;

    /// List a board's id and fields
    async fn board_fields(&self, board_number: u64) -> TrackerResult<BoardFields>;

    /// Board rows the issue appears on, across all boards
    async fn board_items_for_issue(&self, issue_number: u64) -> TrackerResult<Vec<BoardItemRef>>;

    /// Set a single-select field value on a board item
    async fn update_board_status(&self, mutation: &StatusMutation) -> TrackerResult<()>;

    /// Post a comment on an issue
    async fn add_comment(&self, issue_number: u64, body: &str) -> TrackerResult<CommentRef>;

    /// Fetch a repository file with its precondition token
    async fn get_file(&self, path: &str) -> TrackerResult<RemoteFile>;

    /// Create or update a repository file
    async fn put_file(&self, write: &FileWrite) -> TrackerResult<FileWriteResult>;
}
