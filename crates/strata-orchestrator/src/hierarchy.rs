//! Epic → Feature → Task creation
//!
//! A child is only ever sent to the tracker once its parent has a remote
//! identity. Each item goes through the same steps:
//!
//! 1. Create the issue (failure is recorded, children are skipped)
//! 2. Request a linked branch (warning on failure)
//! 3. Link it as a sub-issue of its parent (warning on failure)
//! 4. Place it on the board (warning on failure)
//!
//! Sibling Features, and sibling Tasks within a Feature, run concurrently,
//! but no more than `max_concurrency` items are talking to the tracker at
//! once across the whole run. Every step returns an [`ItemOutcome`] that is folded into the
//! final [`HierarchyReport`].

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use strata_core::{
    normalize_title, slugify, BoardPlacement, RemoteIdentity, Result, StrataConfig, StrataError,
    WorkItem, WorkItemKind,
};
use strata_tracker::TrackerClient;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, instrument, warn};

use crate::execution::Executor;

/// Reason recorded for children of a failed parent
pub const SKIPPED_PARENT_FAILED: &str = "skipped: parent failed";

/// Caller-supplied content for one work item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPlan {
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Empty means the kind's default label
    #[serde(default)]
    pub labels: Vec<String>,
}

impl ItemPlan {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    fn to_work_item(&self, kind: WorkItemKind, parent: Option<i64>) -> WorkItem {
        let mut item =
            WorkItem::new(kind, self.title.clone(), self.body.clone()).with_labels(self.labels.clone());
        if let Some(parent) = parent {
            item = item.with_parent(parent);
        }
        item
    }
}

/// A Feature and the Tasks beneath it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePlan {
    #[serde(flatten)]
    pub item: ItemPlan,
    #[serde(default)]
    pub tasks: Vec<ItemPlan>,
}

/// A whole Epic tree to create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyPlan {
    pub epic: ItemPlan,
    #[serde(default)]
    pub features: Vec<FeaturePlan>,
}

impl HierarchyPlan {
    /// Load a plan from a `.json` or `.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| StrataError::InvalidInput(format!("Failed to parse plan: {}", e))),
            _ => Ok(serde_json::from_str(&content)?),
        }
    }

    /// Reject plans that would fail on the first remote call
    pub fn validate(&self) -> Result<()> {
        let empty = |title: &str| title.trim().is_empty();

        if empty(&self.epic.title) {
            return Err(StrataError::InvalidInput("epic title must not be empty".into()));
        }
        for (i, feature) in self.features.iter().enumerate() {
            if empty(&feature.item.title) {
                return Err(StrataError::InvalidInput(format!(
                    "feature {} title must not be empty",
                    i + 1
                )));
            }
            if let Some(j) = feature.tasks.iter().position(|t| empty(&t.title)) {
                return Err(StrataError::InvalidInput(format!(
                    "task {} of feature {:?} title must not be empty",
                    j + 1,
                    feature.item.title
                )));
            }
        }
        Ok(())
    }

    /// Total number of items in the tree
    pub fn item_count(&self) -> usize {
        1 + self
            .features
            .iter()
            .map(|f| 1 + f.tasks.len())
            .sum::<usize>()
    }
}

/// Knobs for a hierarchy run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyOptions {
    /// Board to place items on; `None` skips placement
    pub board_number: Option<u64>,
    pub branches: bool,
    pub base_branch: String,
    /// Sibling items processed concurrently (at least 1)
    pub max_concurrency: usize,
}

impl HierarchyOptions {
    pub fn from_config(config: &StrataConfig) -> Self {
        Self {
            board_number: (config.board.number > 0).then_some(config.board.number),
            branches: config.branches.enabled,
            base_branch: config.branches.base_branch.clone(),
            max_concurrency: config.execution.max_concurrency.max(1),
        }
    }
}

impl Default for HierarchyOptions {
    fn default() -> Self {
        Self::from_config(&StrataConfig::default())
    }
}

/// A work item the tracker accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedItem {
    pub kind: WorkItemKind,
    pub title: String,
    pub number: u64,
    pub url: String,
    pub parent_number: Option<u64>,
    pub branch: Option<String>,
    pub board_item_id: Option<String>,
}

/// A work item the tracker did not create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: WorkItemKind,
    pub title: String,
    pub error: String,
}

impl ItemFailure {
    fn new(item: &WorkItem, error: impl Into<String>) -> Self {
        Self {
            kind: item.kind,
            title: normalize_title(item.kind, &item.title),
            error: error.into(),
        }
    }
}

/// Follow-up step that failed for a created item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningStep {
    Branch,
    SubIssueLink,
    Board,
}

impl fmt::Display for WarningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::SubIssueLink => write!(f, "sub-issue link"),
            Self::Board => write!(f, "board"),
        }
    }
}

/// Non-fatal failure attached to a created item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemWarning {
    pub kind: WorkItemKind,
    pub number: u64,
    pub step: WarningStep,
    pub message: String,
}

/// An item never sent to the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub kind: WorkItemKind,
    pub title: String,
    pub reason: String,
}

impl SkippedItem {
    fn parent_failed(kind: WorkItemKind, title: &str) -> Self {
        Self {
            kind,
            title: normalize_title(kind, title),
            reason: SKIPPED_PARENT_FAILED.to_string(),
        }
    }
}

/// Result of processing a single item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Created {
        item: CreatedItem,
        warnings: Vec<ItemWarning>,
    },
    Failed(ItemFailure),
}

impl ItemOutcome {
    pub fn number(&self) -> Option<u64> {
        match self {
            Self::Created { item, .. } => Some(item.number),
            Self::Failed(_) => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

/// Overall classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyOutcome {
    NothingCreated,
    Partial,
    Complete,
}

/// Aggregate of every item outcome in a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyReport {
    /// True iff the root item was created
    pub success: bool,
    pub created: Vec<CreatedItem>,
    pub failures: Vec<ItemFailure>,
    pub warnings: Vec<ItemWarning>,
    pub skipped: Vec<SkippedItem>,
}

impl HierarchyReport {
    /// Report for a single standalone item
    pub fn from_item(outcome: ItemOutcome) -> Self {
        let mut report = Self {
            success: outcome.is_created(),
            ..Default::default()
        };
        report.record(outcome);
        report
    }

    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Created { item, warnings } => {
                self.created.push(item);
                self.warnings.extend(warnings);
            }
            ItemOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    /// Warnings are allowed in a complete run; failures and skips are not
    pub fn outcome(&self) -> HierarchyOutcome {
        if self.created.is_empty() {
            HierarchyOutcome::NothingCreated
        } else if self.failures.is_empty() && self.skipped.is_empty() {
            HierarchyOutcome::Complete
        } else {
            HierarchyOutcome::Partial
        }
    }

    pub fn created_of(&self, kind: WorkItemKind) -> impl Iterator<Item = &CreatedItem> {
        self.created.iter().filter(move |c| c.kind == kind)
    }

    pub fn epic(&self) -> Option<&CreatedItem> {
        self.created_of(WorkItemKind::Epic).next()
    }
}

impl fmt::Display for HierarchyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} created, {} failed, {} warning(s), {} skipped",
            self.created.len(),
            self.failures.len(),
            self.warnings.len(),
            self.skipped.len()
        )?;
        for item in &self.created {
            write!(f, "  + #{} {}", item.number, item.title)?;
            if let Some(branch) = &item.branch {
                write!(f, " ({})", branch)?;
            }
            writeln!(f)?;
        }
        for failure in &self.failures {
            writeln!(f, "  x {}: {}", failure.title, failure.error)?;
        }
        for warning in &self.warnings {
            writeln!(
                f,
                "  ! {} #{} {}: {}",
                warning.kind, warning.number, warning.step, warning.message
            )?;
        }
        for skipped in &self.skipped {
            writeln!(f, "  - {} ({})", skipped.title, skipped.reason)?;
        }
        Ok(())
    }
}

/// Branch name linked to a created item: `<kind>/<number>-<slug>`
pub fn branch_name(kind: WorkItemKind, number: u64, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}/{}", kind, number)
    } else {
        format!("{}/{}-{}", kind, number, slug)
    }
}

/// Tasks created (or skipped) beneath one Feature
struct FeatureSubtree {
    feature: ItemOutcome,
    tasks: Vec<ItemOutcome>,
    skipped: Vec<SkippedItem>,
}

/// Creates work items and their hierarchy on the tracker
pub struct HierarchyOrchestrator {
    client: Arc<dyn TrackerClient>,
    executor: Executor,
    options: HierarchyOptions,
    /// One permit per item whose remote steps are running
    permits: Semaphore,
}

impl HierarchyOrchestrator {
    pub fn new(client: Arc<dyn TrackerClient>, executor: Executor, options: HierarchyOptions) -> Self {
        let permits = Semaphore::new(options.max_concurrency.max(1));
        Self {
            client,
            executor,
            options,
            permits,
        }
    }

    pub fn options(&self) -> &HierarchyOptions {
        &self.options
    }

    /// Create a whole Epic tree
    ///
    /// Returns `Err` only for plans rejected before any remote call. An Epic
    /// that the tracker refuses produces a report with `success == false` and
    /// nothing else attempted.
    #[instrument(skip(self, plan), fields(epic = %plan.epic.title, items = plan.item_count()))]
    pub async fn create_hierarchy(&self, plan: &HierarchyPlan) -> Result<HierarchyReport> {
        plan.validate()?;
        let mut report = HierarchyReport::default();

        let epic_slot = self.slot().await;
        let epic = plan.epic.to_work_item(WorkItemKind::Epic, None);
        let (epic, identity) = match self.create_remote(epic).await {
            Ok(created) => created,
            Err(failure) => {
                warn!("Epic not created, aborting: {}", failure.error);
                report.failures.push(failure);
                for feature in &plan.features {
                    report
                        .skipped
                        .push(SkippedItem::parent_failed(WorkItemKind::Feature, &feature.item.title));
                    report.skipped.extend(
                        feature
                            .tasks
                            .iter()
                            .map(|t| SkippedItem::parent_failed(WorkItemKind::Task, &t.title)),
                    );
                }
                return Ok(report);
            }
        };
        report.success = true;

        let mut epic_warnings = Vec::new();
        let board_id = match self.resolve_board().await {
            Ok(board_id) => board_id,
            Err(message) => {
                epic_warnings.push(ItemWarning {
                    kind: WorkItemKind::Epic,
                    number: identity.number,
                    step: WarningStep::Board,
                    message,
                });
                None
            }
        };

        let (created, warnings) = self.attach(epic, identity.clone(), board_id.as_deref()).await;
        epic_warnings.extend(warnings);
        report.record(ItemOutcome::Created {
            item: created,
            warnings: epic_warnings,
        });
        drop(epic_slot);

        let epic_number = identity.number as i64;
        let board_id = board_id.as_deref();
        let mut subtrees: Vec<(usize, FeatureSubtree)> = stream::iter(plan.features.iter().enumerate())
            .map(|(index, feature)| async move {
                (index, self.create_feature_subtree(epic_number, feature, board_id).await)
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;
        subtrees.sort_by_key(|(index, _)| *index);

        for (_, subtree) in subtrees {
            report.record(subtree.feature);
            for task in subtree.tasks {
                report.record(task);
            }
            report.skipped.extend(subtree.skipped);
        }

        info!(
            "Hierarchy under #{}: {} created, {} failed, {} skipped",
            identity.number,
            report.created.len(),
            report.failures.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Create a standalone Epic
    pub async fn create_epic(&self, plan: &ItemPlan) -> Result<ItemOutcome> {
        self.create_single(plan.to_work_item(WorkItemKind::Epic, None))
            .await
    }

    /// Create a Feature under an existing Epic
    pub async fn create_feature(&self, parent_epic: i64, plan: &ItemPlan) -> Result<ItemOutcome> {
        self.create_single(plan.to_work_item(WorkItemKind::Feature, Some(parent_epic)))
            .await
    }

    /// Create a Task under an existing Feature
    pub async fn create_task(&self, parent_feature: i64, plan: &ItemPlan) -> Result<ItemOutcome> {
        self.create_single(plan.to_work_item(WorkItemKind::Task, Some(parent_feature)))
            .await
    }

    /// Run the full step sequence for one item, resolving the board itself
    ///
    /// Invalid titles and parents are rejected before any remote call.
    #[instrument(skip(self, item), fields(kind = %item.kind, title = %item.title))]
    pub async fn create_item(&self, item: WorkItem) -> Result<ItemOutcome> {
        self.create_single(item).await
    }

    async fn create_single(&self, item: WorkItem) -> Result<ItemOutcome> {
        item.resolve()?;
        let _slot = self.slot().await;

        let (item, identity) = match self.create_remote(item).await {
            Ok(created) => created,
            Err(failure) => return Ok(ItemOutcome::Failed(failure)),
        };

        let mut warnings = Vec::new();
        let board_id = self.resolve_board().await.unwrap_or_else(|message| {
            warnings.push(ItemWarning {
                kind: item.kind,
                number: identity.number,
                step: WarningStep::Board,
                message,
            });
            None
        });

        let (created, more) = self.attach(item, identity, board_id.as_deref()).await;
        warnings.extend(more);
        Ok(ItemOutcome::Created {
            item: created,
            warnings,
        })
    }

    async fn create_feature_subtree(
        &self,
        epic_number: i64,
        plan: &FeaturePlan,
        board_id: Option<&str>,
    ) -> FeatureSubtree {
        let feature = plan.item.to_work_item(WorkItemKind::Feature, Some(epic_number));
        let feature = self.create_with_board(feature, board_id).await;

        let Some(number) = feature.number() else {
            debug!(
                "Skipping {} task(s) of failed feature {:?}",
                plan.tasks.len(),
                plan.item.title
            );
            return FeatureSubtree {
                feature,
                tasks: Vec::new(),
                skipped: plan
                    .tasks
                    .iter()
                    .map(|t| SkippedItem::parent_failed(WorkItemKind::Task, &t.title))
                    .collect(),
            };
        };

        let feature_number = number as i64;
        let mut tasks: Vec<(usize, ItemOutcome)> = stream::iter(plan.tasks.iter().enumerate())
            .map(|(index, task)| async move {
                let task = task.to_work_item(WorkItemKind::Task, Some(feature_number));
                (index, self.create_with_board(task, board_id).await)
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;
        tasks.sort_by_key(|(index, _)| *index);

        FeatureSubtree {
            feature,
            tasks: tasks.into_iter().map(|(_, outcome)| outcome).collect(),
            skipped: Vec::new(),
        }
    }

    async fn create_with_board(&self, item: WorkItem, board_id: Option<&str>) -> ItemOutcome {
        let _slot = self.slot().await;
        match self.create_remote(item).await {
            Ok((item, identity)) => {
                let (created, warnings) = self.attach(item, identity, board_id).await;
                ItemOutcome::Created {
                    item: created,
                    warnings,
                }
            }
            Err(failure) => ItemOutcome::Failed(failure),
        }
    }

    /// Wait until fewer than `max_concurrency` items are talking to the tracker
    ///
    /// Held for one item's create and attach steps only, never across a
    /// Feature's Tasks, so nested streams cannot starve each other.
    async fn slot(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    /// Resolve and create the issue, recording its identity on the item
    async fn create_remote(
        &self,
        mut item: WorkItem,
    ) -> std::result::Result<(WorkItem, RemoteIdentity), ItemFailure> {
        let request = item
            .resolve()
            .map_err(|e| ItemFailure::new(&item, e.to_string()))?;

        let args = json!({
            "kind": request.kind,
            "title": request.title,
            "parent_number": request.parent_number,
        });
        let client = self.client.clone();
        let result = self
            .executor
            .execute("create_issue", args, move || async move {
                client.create_issue(&request).await
            })
            .await;

        let identity = result
            .into_result()
            .map_err(|error| ItemFailure::new(&item, error))?;
        item.assign_remote(identity.clone())
            .map_err(|e| ItemFailure::new(&item, e.to_string()))?;

        info!(
            "Created {} #{}: {}",
            item.kind,
            identity.number,
            normalize_title(item.kind, &item.title)
        );
        Ok((item, identity))
    }

    /// Branch, sub-issue link and board placement for a created item
    async fn attach(
        &self,
        mut item: WorkItem,
        identity: RemoteIdentity,
        board_id: Option<&str>,
    ) -> (CreatedItem, Vec<ItemWarning>) {
        let mut warnings = Vec::new();
        let warn_step = |step: WarningStep, message: String| {
            warn!("{} #{} {} failed: {}", item.kind, identity.number, step, message);
            ItemWarning {
                kind: item.kind,
                number: identity.number,
                step,
                message,
            }
        };

        if self.options.branches {
            let name = branch_name(item.kind, identity.number, &item.title);
            let client = self.client.clone();
            let issue = identity.clone();
            let base = self.options.base_branch.clone();
            let branch = name.clone();
            let result = self
                .executor
                .execute(
                    "create_linked_branch",
                    json!({ "issue_number": identity.number, "branch": name }),
                    move || async move { client.create_linked_branch(&issue, &branch, &base).await },
                )
                .await;
            match result.into_result() {
                Ok(linked) => item.linked_branch = Some(linked.name),
                Err(error) => warnings.push(warn_step(WarningStep::Branch, error)),
            }
        }

        let parent_number = item.parent_number.filter(|n| *n > 0).map(|n| n as u64);
        if let Some(parent) = parent_number {
            let client = self.client.clone();
            let child_id = identity.id;
            let result = self
                .executor
                .execute(
                    "link_sub_issue",
                    json!({ "parent_number": parent, "child_id": child_id }),
                    move || async move { client.link_sub_issue(parent, child_id).await },
                )
                .await;
            if let Err(error) = result.into_result() {
                warnings.push(warn_step(WarningStep::SubIssueLink, error));
            }
        }

        let mut board_item_id = None;
        if let Some(board_id) = board_id {
            match BoardPlacement::for_item(&item, board_id) {
                Ok(placement) => {
                    let client = self.client.clone();
                    let args = json!({
                        "board_id": placement.board_id,
                        "number": placement.number,
                        "kind": placement.kind,
                        "parent_number": placement.parent_number,
                    });
                    let result = self
                        .executor
                        .execute("add_to_board", args, move || async move {
                            client.add_to_board(&placement).await
                        })
                        .await;
                    match result.into_result() {
                        Ok(board_item) => board_item_id = Some(board_item.item_id),
                        Err(error) => warnings.push(warn_step(WarningStep::Board, error)),
                    }
                }
                Err(e) => warnings.push(warn_step(WarningStep::Board, e.to_string())),
            }
        }

        let created = CreatedItem {
            kind: item.kind,
            title: normalize_title(item.kind, &item.title),
            number: identity.number,
            url: identity.url.clone(),
            parent_number,
            branch: item.linked_branch.clone(),
            board_item_id,
        };
        (created, warnings)
    }

    /// Board node id for the configured board number
    async fn resolve_board(&self) -> std::result::Result<Option<String>, String> {
        let Some(number) = self.options.board_number else {
            return Ok(None);
        };

        let client = self.client.clone();
        self.executor
            .execute(
                "board_fields",
                json!({ "board_number": number }),
                move || async move { client.board_fields(number).await },
            )
            .await
            .into_result()
            .map(|fields| Some(fields.board_id))
            .map_err(|e| format!("board #{} unavailable: {}", number, e))
    }
}
