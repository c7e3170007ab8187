//! Idempotent create-or-update of repository files
//!
//! `save` always looks the path up first. A found file is updated with the
//! exact `sha` just read; only a positive not-found answer leads to a create.
//! Any other lookup failure is reported without writing anything.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use strata_core::{slugify, WorkItem};
use strata_tracker::{FileWrite, RemoteFile, TrackerClient};
use tracing::{debug, info};

use crate::execution::Executor;

/// Result of [`RemoteFileSync::save`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub url: Option<String>,
    pub error: Option<String>,
    /// True when the save created the file rather than updating it
    pub created: bool,
}

impl SaveOutcome {
    fn written(url: String, created: bool) -> Self {
        Self {
            success: true,
            url: Some(url),
            error: None,
            created,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            error: Some(error.into()),
            created: false,
        }
    }
}

/// Result of [`RemoteFileSync::read`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutcome {
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<String>,
    /// True when the failure was a positive not-found answer
    pub not_found: bool,
}

/// Create-or-update sync for repository files
#[derive(Clone)]
pub struct RemoteFileSync {
    client: Arc<dyn TrackerClient>,
    executor: Executor,
    docs_dir: String,
}

impl RemoteFileSync {
    pub fn new(client: Arc<dyn TrackerClient>, executor: Executor) -> Self {
        Self {
            client,
            executor,
            docs_dir: "docs".to_string(),
        }
    }

    /// Directory work-item documents are stored under
    pub fn with_docs_dir(mut self, docs_dir: impl Into<String>) -> Self {
        self.docs_dir = docs_dir.into().trim_matches('/').to_string();
        self
    }

    /// Repository path for a created work item's document
    pub fn document_path(&self, item: &WorkItem) -> Option<String> {
        let number = item.number()?;
        Some(format!(
            "{}/{}/{}-{}.md",
            self.docs_dir,
            item.kind,
            number,
            slugify(&item.title)
        ))
    }

    /// Look up the current version: `Some` if present, `None` only on not-found
    async fn lookup(&self, path: &str) -> Result<Option<RemoteFile>, String> {
        let client = self.client.clone();
        let owned = path.to_string();
        self.executor
            .execute("file.read", json!({ "path": path }), move || async move {
                match client.get_file(&owned).await {
                    Ok(file) => Ok(Some(file)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .into_result()
    }

    /// Read a file's content
    pub async fn read(&self, path: &str) -> ReadOutcome {
        match self.lookup(path).await {
            Ok(Some(file)) => ReadOutcome {
                success: true,
                content: Some(file.content),
                error: None,
                not_found: false,
            },
            Ok(None) => ReadOutcome {
                success: false,
                content: None,
                error: Some(format!("{} not found", path)),
                not_found: true,
            },
            Err(error) => ReadOutcome {
                success: false,
                content: None,
                error: Some(error),
                not_found: false,
            },
        }
    }

    /// Create or update `path` with `content` using a default commit message
    pub async fn save(&self, path: &str, content: &str) -> SaveOutcome {
        self.save_with_message(path, content, None).await
    }

    /// Create or update `path`, carrying the precondition token on update
    pub async fn save_with_message(
        &self,
        path: &str,
        content: &str,
        message: Option<&str>,
    ) -> SaveOutcome {
        let sha = match self.lookup(path).await {
            Ok(Some(existing)) => Some(existing.sha),
            Ok(None) => None,
            Err(error) => return SaveOutcome::failed(error),
        };

        let created = sha.is_none();
        let message = match message {
            Some(m) => m.to_string(),
            None if created => format!("Create {}", path),
            None => format!("Update {}", path),
        };
        debug!(
            "{} {} ({})",
            if created { "Creating" } else { "Updating" },
            path,
            sha.as_deref().unwrap_or("no token")
        );

        let write = FileWrite {
            path: path.to_string(),
            content: content.to_string(),
            message,
            sha,
        };
        let client = self.client.clone();
        let args = json!({ "path": path, "sha": write.sha, "create": created });

        let result = self
            .executor
            .execute("file.write", args, move || async move {
                client.put_file(&write).await
            })
            .await;

        match result.into_result() {
            Ok(written) => {
                info!(
                    "{} {}",
                    if created { "Created" } else { "Updated" },
                    path
                );
                SaveOutcome::written(written.url, created)
            }
            Err(error) => SaveOutcome::failed(error),
        }
    }

    /// Store a created work item's document under the docs directory
    pub async fn save_document(&self, item: &WorkItem, content: &str) -> SaveOutcome {
        let Some(path) = self.document_path(item) else {
            return SaveOutcome::failed(format!(
                "{} has no remote identity; create it before saving its document",
                item.kind
            ));
        };
        let message = format!(
            "docs: update {} #{}",
            item.kind,
            item.number().unwrap_or_default()
        );
        self.save_with_message(&path, content, Some(&message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strata_core::RemoteIdentity;
    use strata_tracker::{MockTracker, TrackerCall, TrackerError};

    fn sync_with(tracker: Arc<MockTracker>) -> RemoteFileSync {
        RemoteFileSync::new(tracker, Executor::new(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_save_creates_when_not_found() {
        let tracker = Arc::new(MockTracker::new());
        let outcome = sync_with(tracker.clone()).save("docs/plan.md", "# Plan").await;

        assert!(outcome.success);
        assert!(outcome.created);
        assert_eq!(
            tracker.calls_for("put_file"),
            vec![TrackerCall::PutFile {
                path: "docs/plan.md".into(),
                sha: None
            }]
        );
    }

    #[tokio::test]
    async fn test_save_updates_with_exact_token() {
        let tracker = Arc::new(MockTracker::new().with_file("docs/plan.md", "old"));
        let token = tracker.file("docs/plan.md").unwrap().sha;

        let outcome = sync_with(tracker.clone()).save("docs/plan.md", "new").await;

        assert!(outcome.success);
        assert!(!outcome.created);
        assert_eq!(
            tracker.calls_for("put_file"),
            vec![TrackerCall::PutFile {
                path: "docs/plan.md".into(),
                sha: Some(token)
            }]
        );
        assert_eq!(tracker.file("docs/plan.md").unwrap().content, "new");
    }

    #[tokio::test]
    async fn test_transient_lookup_failure_never_creates() {
        let tracker = Arc::new(MockTracker::new().fail(
            "get_file",
            TrackerError::Transport("connection reset by peer".into()),
        ));

        let outcome = sync_with(tracker.clone()).save("docs/plan.md", "x").await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("transport error: connection reset by peer")
        );
        assert!(tracker.calls_for("put_file").is_empty());
    }

    #[tokio::test]
    async fn test_auth_lookup_failure_never_creates() {
        let tracker = Arc::new(
            MockTracker::new().fail("get_file", TrackerError::Unauthorized("token expired".into())),
        );

        let outcome = sync_with(tracker.clone()).save("docs/plan.md", "x").await;

        assert!(!outcome.success);
        assert!(tracker.calls_for("put_file").is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_verbatim_without_retry() {
        let tracker = Arc::new(MockTracker::new().with_file("docs/plan.md", "old").fail(
            "put_file",
            TrackerError::Conflict("docs/plan.md does not match sha-1".into()),
        ));

        let outcome = sync_with(tracker.clone()).save("docs/plan.md", "new").await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("conflict: docs/plan.md does not match sha-1")
        );
        assert_eq!(tracker.calls_for("put_file").len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_timeout_is_reported() {
        let tracker =
            Arc::new(MockTracker::new().with_delay("get_file", Duration::from_millis(500)));
        let sync = RemoteFileSync::new(tracker.clone(), Executor::new(Duration::from_millis(20)));

        let outcome = sync.save("docs/plan.md", "x").await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("execution timeout after 20ms"));
        assert!(tracker.calls_for("put_file").is_empty());
    }

    #[tokio::test]
    async fn test_read_distinguishes_not_found() {
        let tracker = Arc::new(MockTracker::new().with_file("docs/a.md", "hello"));
        let sync = sync_with(tracker);

        let found = sync.read("docs/a.md").await;
        assert!(found.success);
        assert_eq!(found.content.as_deref(), Some("hello"));

        let missing = sync.read("docs/b.md").await;
        assert!(!missing.success);
        assert!(missing.not_found);
    }

    #[tokio::test]
    async fn test_save_document_path() {
        let tracker = Arc::new(MockTracker::new());
        let sync = sync_with(tracker.clone()).with_docs_dir("/design/");

        let mut item = WorkItem::feature(1, "OAuth Login", "");
        assert!(!sync.save_document(&item, "x").await.success);

        item.assign_remote(RemoteIdentity {
            id: 42,
            node_id: "I_42".into(),
            number: 2,
            url: "https://github.com/acme/app/issues/2".into(),
        })
        .unwrap();

        let outcome = sync.save_document(&item, "# OAuth").await;
        assert!(outcome.success);
        assert!(tracker.file("design/feature/2-oauth-login.md").is_some());
    }
}
