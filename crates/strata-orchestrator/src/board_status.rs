//! Board status synchronization and the review workflow

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::{Result, StrataConfig, StrataError};
use strata_tracker::{BoardFields, StatusMutation, TrackerClient};
use tracing::{info, instrument, warn};

use crate::execution::Executor;

/// Status field of a board and its options by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSchema {
    pub board_id: String,
    pub status_field_id: String,
    pub status_options: BTreeMap<String, String>,
}

impl BoardSchema {
    /// Pick out the field named `status` (any case)
    pub fn from_fields(fields: &BoardFields) -> Result<Self> {
        let status = fields
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("status"))
            .ok_or_else(|| StrataError::Board("status field not found".to_string()))?;

        Ok(Self {
            board_id: fields.board_id.clone(),
            status_field_id: status.id.clone(),
            status_options: status
                .options
                .iter()
                .map(|o| (o.name.clone(), o.id.clone()))
                .collect(),
        })
    }
}

/// Chosen status option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub name: String,
    pub option_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub success: bool,
    pub error: Option<String>,
}

/// Result of [`BoardStatusSync::complete_review_workflow`]
///
/// The comment is the only required step; status problems land in `warning`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub success: bool,
    pub comment_url: Option<String>,
    pub status_updated: bool,
    pub warning: Option<String>,
    pub error: Option<String>,
}

pub struct BoardStatusSync {
    client: Arc<dyn TrackerClient>,
    executor: Executor,
    status_options: Vec<String>,
}

impl BoardStatusSync {
    pub fn new(client: Arc<dyn TrackerClient>, executor: Executor) -> Self {
        Self::with_status_options(client, executor, StrataConfig::default().review.status_options)
    }

    /// Use a custom ordered list of acceptable review status names
    pub fn with_status_options(
        client: Arc<dyn TrackerClient>,
        executor: Executor,
        status_options: Vec<String>,
    ) -> Self {
        Self {
            client,
            executor,
            status_options,
        }
    }

    pub fn status_options(&self) -> &[String] {
        &self.status_options
    }

    pub async fn get_board_schema(&self, board_number: u64) -> Result<BoardSchema> {
        let client = self.client.clone();
        let fields = self
            .executor
            .execute(
                "board_fields",
                json!({ "board_number": board_number }),
                move || async move { client.board_fields(board_number).await },
            )
            .await
            .into_result()
            .map_err(StrataError::Board)?;

        BoardSchema::from_fields(&fields)
    }

    /// Board item id of an issue on a specific board
    pub async fn locate_board_item(&self, board_id: &str, issue_number: u64) -> Result<String> {
        let client = self.client.clone();
        let items = self
            .executor
            .execute(
                "board_items_for_issue",
                json!({ "issue_number": issue_number }),
                move || async move { client.board_items_for_issue(issue_number).await },
            )
            .await
            .into_result()
            .map_err(StrataError::Board)?;

        if items.is_empty() {
            return Err(StrataError::Board("item not in board".to_string()));
        }

        items
            .into_iter()
            .find(|item| item.board_id == board_id)
            .map(|item| item.item_id)
            .ok_or_else(|| StrataError::Board("item not in specified board".to_string()))
    }

    pub async fn set_status(
        &self,
        board_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> StatusUpdate {
        let mutation = StatusMutation {
            board_id: board_id.to_string(),
            item_id: item_id.to_string(),
            field_id: field_id.to_string(),
            option_id: option_id.to_string(),
        };
        let client = self.client.clone();
        let args = json!({ "board_id": board_id, "item_id": item_id, "option_id": option_id });

        let result = self
            .executor
            .execute("update_board_status", args, move || async move {
                client.update_board_status(&mutation).await
            })
            .await;

        StatusUpdate {
            success: result.success,
            error: result.error,
        }
    }

    /// First configured status name the board offers
    pub fn resolve_status_option(&self, schema: &BoardSchema) -> Result<StatusOption> {
        self.status_options
            .iter()
            .find_map(|name| {
                schema.status_options.get(name).map(|id| StatusOption {
                    name: name.clone(),
                    option_id: id.clone(),
                })
            })
            .ok_or_else(|| {
                StrataError::Board(format!(
                    "no review status option (tried: {})",
                    self.status_options.join(", ")
                ))
            })
    }

    /// Comment on the issue, then move it to a review status
    #[instrument(skip(self, document_url, title))]
    pub async fn complete_review_workflow(
        &self,
        issue_number: u64,
        board_number: u64,
        document_url: &str,
        title: &str,
    ) -> ReviewOutcome {
        let body = review_comment(title, document_url);
        let client = self.client.clone();
        let comment = self
            .executor
            .execute(
                "add_comment",
                json!({ "issue_number": issue_number }),
                move || async move { client.add_comment(issue_number, &body).await },
            )
            .await;

        let comment = match comment.into_result() {
            Ok(comment) => comment,
            Err(error) => {
                return ReviewOutcome {
                    error: Some(error),
                    ..Default::default()
                }
            }
        };
        info!("Posted review comment on #{}", issue_number);

        let mut outcome = ReviewOutcome {
            success: true,
            comment_url: Some(comment.url),
            ..Default::default()
        };

        match self.move_to_review(issue_number, board_number).await {
            Ok(status) => {
                info!("Moved #{} to {:?}", issue_number, status);
                outcome.status_updated = true;
            }
            Err(e) => {
                warn!("Review status for #{} not updated: {}", issue_number, e);
                outcome.warning = Some(format!("status update failed: {}", e));
            }
        }
        outcome
    }

    async fn move_to_review(&self, issue_number: u64, board_number: u64) -> Result<String> {
        let schema = self.get_board_schema(board_number).await?;
        let option = self.resolve_status_option(&schema)?;
        let item_id = self.locate_board_item(&schema.board_id, issue_number).await?;

        let update = self
            .set_status(
                &schema.board_id,
                &item_id,
                &schema.status_field_id,
                &option.option_id,
            )
            .await;
        match update.error {
            None if update.success => Ok(option.name),
            error => Err(StrataError::Board(error.unwrap_or_default())),
        }
    }
}

fn review_comment(title: &str, document_url: &str) -> String {
    format!(
        "## Ready for review\n\n**{}**\n\nDocument: {}\n",
        title, document_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strata_tracker::{BoardField, BoardItemRef, FieldOption, MockTracker, TrackerCall};

    fn board(status_name: &str, options: &[(&str, &str)]) -> BoardFields {
        BoardFields {
            board_id: "PVT_1".into(),
            fields: vec![
                BoardField {
                    id: "F_title".into(),
                    name: "Title".into(),
                    options: vec![],
                },
                BoardField {
                    id: "F_status".into(),
                    name: status_name.into(),
                    options: options
                        .iter()
                        .map(|(name, id)| FieldOption {
                            id: (*id).into(),
                            name: (*name).into(),
                        })
                        .collect(),
                },
            ],
        }
    }

    fn sync_with(tracker: Arc<MockTracker>) -> BoardStatusSync {
        BoardStatusSync::new(tracker, Executor::new(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_schema_status_field_is_case_insensitive() {
        let tracker = Arc::new(MockTracker::new().with_board(
            3,
            board("STATUS", &[("Todo", "o1"), ("In Review", "o2")]),
        ));
        let schema = sync_with(tracker).get_board_schema(3).await.unwrap();

        assert_eq!(schema.board_id, "PVT_1");
        assert_eq!(schema.status_field_id, "F_status");
        assert_eq!(schema.status_options.get("In Review").map(String::as_str), Some("o2"));
    }

    #[tokio::test]
    async fn test_schema_without_status_field() {
        let tracker = Arc::new(MockTracker::new().with_board(3, board("Stage", &[])));
        let err = sync_with(tracker).get_board_schema(3).await.unwrap_err();
        assert_eq!(err.to_string(), "status field not found");
    }

    #[tokio::test]
    async fn test_locate_board_item() {
        let tracker = Arc::new(
            MockTracker::new()
                .with_board_item(
                    10,
                    BoardItemRef {
                        item_id: "PVTI_other".into(),
                        board_id: "PVT_other".into(),
                    },
                )
                .with_board_item(
                    10,
                    BoardItemRef {
                        item_id: "PVTI_a".into(),
                        board_id: "PVT_1".into(),
                    },
                )
                .with_board_item(
                    11,
                    BoardItemRef {
                        item_id: "PVTI_b".into(),
                        board_id: "PVT_other".into(),
                    },
                ),
        );
        let sync = sync_with(tracker);

        assert_eq!(sync.locate_board_item("PVT_1", 10).await.unwrap(), "PVTI_a");
        assert_eq!(
            sync.locate_board_item("PVT_1", 11).await.unwrap_err().to_string(),
            "item not in specified board"
        );
        assert_eq!(
            sync.locate_board_item("PVT_1", 12).await.unwrap_err().to_string(),
            "item not in board"
        );
    }

    #[test]
    fn test_resolve_status_option_order() {
        let schema = BoardSchema::from_fields(&board(
            "Status",
            &[("In Review", "o3"), ("Review Required", "o2")],
        ))
        .unwrap();

        let sync = sync_with(Arc::new(MockTracker::new()));
        let option = sync.resolve_status_option(&schema).unwrap();
        assert_eq!(option.name, "Review Required");
        assert_eq!(option.option_id, "o2");

        let custom = BoardStatusSync::with_status_options(
            Arc::new(MockTracker::new()),
            Executor::default(),
            vec!["QA".into()],
        );
        assert!(custom.resolve_status_option(&schema).is_err());
    }

    #[tokio::test]
    async fn test_review_workflow_moves_status() {
        let tracker = Arc::new(
            MockTracker::new()
                .with_board(2, board("Status", &[("Human Review Required", "o1")]))
                .with_board_item(
                    5,
                    BoardItemRef {
                        item_id: "PVTI_5".into(),
                        board_id: "PVT_1".into(),
                    },
                ),
        );
        let outcome = sync_with(tracker.clone())
            .complete_review_workflow(5, 2, "https://github.com/acme/app/blob/main/docs/x.md", "Login")
            .await;

        assert!(outcome.success);
        assert!(outcome.status_updated);
        assert!(outcome.warning.is_none());
        assert_eq!(
            tracker.calls_for("update_board_status"),
            vec![TrackerCall::UpdateBoardStatus(StatusMutation {
                board_id: "PVT_1".into(),
                item_id: "PVTI_5".into(),
                field_id: "F_status".into(),
                option_id: "o1".into(),
            })]
        );
    }

    #[tokio::test]
    async fn test_review_comment_failure_is_fatal() {
        let tracker = Arc::new(MockTracker::new().fail(
            "add_comment",
            strata_tracker::TrackerError::Unauthorized("bad credentials".into()),
        ));
        let outcome = sync_with(tracker.clone())
            .complete_review_workflow(5, 2, "url", "Login")
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("unauthorized: bad credentials"));
        assert!(tracker.calls_for("board_fields").is_empty());
    }
}
