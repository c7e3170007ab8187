//! Core type definitions for Strata orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StrataError};

/// Level of a work item in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    Epic,
    Feature,
    Task,
}

impl WorkItemKind {
    /// Bracketed tag prefixed to titles (e.g. `[EPIC]`)
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Epic => "[EPIC]",
            Self::Feature => "[FEATURE]",
            Self::Task => "[TASK]",
        }
    }

    /// Label applied when the caller supplies none
    pub fn default_label(&self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Feature => "feature",
            Self::Task => "task",
        }
    }

    /// Kind of the containing item, if any
    pub fn parent_kind(&self) -> Option<Self> {
        match self {
            Self::Epic => None,
            Self::Feature => Some(Self::Epic),
            Self::Task => Some(Self::Feature),
        }
    }
}

impl std::fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Feature => write!(f, "feature"),
            Self::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for WorkItemKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epic" => Ok(Self::Epic),
            "feature" => Ok(Self::Feature),
            "task" => Ok(Self::Task),
            _ => Err(format!("Invalid work item kind: {}", s)),
        }
    }
}

/// Prefix `title` with the kind's bracket tag unless it already starts with it.
///
/// The match is case-sensitive, so `[epic] Login` becomes `[EPIC] [epic] Login`.
pub fn normalize_title(kind: WorkItemKind, title: &str) -> String {
    let title = title.trim();
    if title.starts_with(kind.tag()) {
        title.to_string()
    } else {
        format!("{} {}", kind.tag(), title)
    }
}

/// Lowercase, dash-separated form of a title with its bracket tag removed
pub fn slugify(title: &str) -> String {
    let stripped = [WorkItemKind::Epic, WorkItemKind::Feature, WorkItemKind::Task]
        .iter()
        .find_map(|k| title.trim().strip_prefix(k.tag()))
        .unwrap_or(title);

    let mut slug = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }

    slug.trim_end_matches('-').to_string()
}

/// Check a caller-supplied parent reference against the item's kind.
///
/// Epics must not have a parent; Features and Tasks need a positive one.
pub fn validate_parent(kind: WorkItemKind, parent: Option<i64>) -> Result<Option<u64>> {
    match (kind.parent_kind(), parent) {
        (None, None) => Ok(None),
        (None, Some(n)) => Err(StrataError::InvalidParent(format!(
            "{} cannot have a parent (got #{})",
            kind, n
        ))),
        (Some(parent_kind), None) => Err(StrataError::InvalidParent(format!(
            "{} requires a parent {} number",
            kind, parent_kind
        ))),
        (Some(parent_kind), Some(n)) if n <= 0 => Err(StrataError::InvalidParent(format!(
            "parent {} number must be a positive integer, got {}",
            parent_kind, n
        ))),
        (Some(_), Some(n)) => Ok(Some(n as u64)),
    }
}

/// Identity assigned by the tracker once an item is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    /// Numeric database id (used for sub-issue links)
    pub id: u64,
    /// Global node id (used for GraphQL mutations)
    pub node_id: String,
    /// Repository-scoped issue number
    pub number: u64,
    /// Browser URL
    pub url: String,
}

/// One node in the Epic → Feature → Task hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: WorkItemKind,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Caller-supplied labels; kind defaults apply when empty
    #[serde(default)]
    pub labels: Vec<String>,
    /// Number of the containing item (required for Feature and Task)
    #[serde(default)]
    pub parent_number: Option<i64>,
    #[serde(default)]
    remote: Option<RemoteIdentity>,
    #[serde(default)]
    pub linked_branch: Option<String>,
}

impl WorkItem {
    pub fn new(kind: WorkItemKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            labels: Vec::new(),
            parent_number: None,
            remote: None,
            linked_branch: None,
        }
    }

    pub fn epic(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(WorkItemKind::Epic, title, body)
    }

    pub fn feature(parent_epic: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(WorkItemKind::Feature, title, body).with_parent(parent_epic)
    }

    pub fn task(parent_feature: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(WorkItemKind::Task, title, body).with_parent(parent_feature)
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent_number: i64) -> Self {
        self.parent_number = Some(parent_number);
        self
    }

    /// Labels sent to the tracker: supplied ones verbatim, else the kind default
    pub fn effective_labels(&self) -> Vec<String> {
        if self.labels.is_empty() {
            vec![self.kind.default_label().to_string()]
        } else {
            self.labels.clone()
        }
    }

    /// Resolve defaults and validate into a fully populated request.
    ///
    /// This is the only place defaults are applied; nothing remote happens here.
    pub fn resolve(&self) -> Result<IssueRequest> {
        if self.title.trim().is_empty() {
            return Err(StrataError::InvalidInput(format!(
                "{} title must not be empty",
                self.kind
            )));
        }

        let parent_number = validate_parent(self.kind, self.parent_number)?;

        let mut body = self.body.clone();
        if let Some(parent) = parent_number {
            let reference = format!("Parent: #{}", parent);
            if !body.lines().any(|l| l.trim() == reference) {
                if !body.is_empty() {
                    body.push_str("\n\n");
                }
                body.push_str(&reference);
            }
        }

        Ok(IssueRequest {
            kind: self.kind,
            title: normalize_title(self.kind, &self.title),
            body,
            labels: self.effective_labels(),
            parent_number,
        })
    }

    /// Record the tracker identity. Fails if one was already assigned.
    pub fn assign_remote(&mut self, identity: RemoteIdentity) -> Result<()> {
        if let Some(existing) = &self.remote {
            return Err(StrataError::AlreadyAssigned(format!(
                "{} #{}",
                self.kind, existing.number
            )));
        }
        self.remote = Some(identity);
        Ok(())
    }

    pub fn remote(&self) -> Option<&RemoteIdentity> {
        self.remote.as_ref()
    }

    pub fn number(&self) -> Option<u64> {
        self.remote.as_ref().map(|r| r.number)
    }

    pub fn url(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.url.as_str())
    }

    pub fn is_created(&self) -> bool {
        self.remote.is_some()
    }
}

/// A fully resolved create-issue request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub kind: WorkItemKind,
    /// Title with bracket tag applied
    pub title: String,
    /// Body with parent reference line applied
    pub body: String,
    pub labels: Vec<String>,
    pub parent_number: Option<u64>,
}

/// Request to place a created work item on a project board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPlacement {
    pub board_id: String,
    /// Node id of the issue being placed
    pub content_id: String,
    pub number: u64,
    pub kind: WorkItemKind,
    pub parent_number: Option<u64>,
}

impl BoardPlacement {
    /// Build a placement for an item that already has a remote identity
    pub fn for_item(item: &WorkItem, board_id: impl Into<String>) -> Result<Self> {
        let remote = item
            .remote()
            .ok_or_else(|| StrataError::NotCreated(normalize_title(item.kind, &item.title)))?;

        Ok(Self {
            board_id: board_id.into(),
            content_id: remote.node_id.clone(),
            number: remote.number,
            kind: item.kind,
            parent_number: item.parent_number.filter(|n| *n > 0).map(|n| n as u64),
        })
    }
}

/// A work item's row on a project board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardItem {
    pub board_id: String,
    /// Board-scoped id, distinct from the issue's own id
    pub item_id: String,
    pub status_field_id: Option<String>,
    pub status_option_id: Option<String>,
}

impl BoardItem {
    pub fn new(board_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            item_id: item_id.into(),
            status_field_id: None,
            status_option_id: None,
        }
    }

    pub fn with_status(mut self, field_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        self.status_field_id = Some(field_id.into());
        self.status_option_id = Some(option_id.into());
        self
    }
}

/// Envelope returned by every unit-of-work execution
///
/// Exactly one of `data` / `error` is populated, matching `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl<T> ExecutionResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms: None,
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    /// Whether the failure came from the timeout race
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.contains("timeout after"))
    }

    /// Error text, or empty for successes
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }

    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.data, self.error) {
            (Some(data), _) if self.success => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err("execution produced no data".to_string()),
        }
    }

    pub fn as_ref(&self) -> ExecutionResult<&T> {
        ExecutionResult {
            success: self.success,
            data: self.data.as_ref(),
            error: self.error.clone(),
            execution_time_ms: self.execution_time_ms,
        }
    }
}

impl<T: Serialize> ExecutionResult<T> {
    /// Type-erased copy for event payloads
    pub fn to_json(&self) -> ExecutionResult<serde_json::Value> {
        ExecutionResult {
            success: self.success,
            data: self
                .data
                .as_ref()
                .map(|d| serde_json::to_value(d).unwrap_or(serde_json::Value::Null)),
            error: self.error.clone(),
            execution_time_ms: self.execution_time_ms,
        }
    }
}

/// Emitted after each unit-of-work execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub id: Uuid,
    pub operation_name: String,
    pub args: serde_json::Value,
    pub result: ExecutionResult<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ToolEvent {
    pub fn new(
        operation_name: impl Into<String>,
        args: serde_json::Value,
        result: ExecutionResult<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_name: operation_name.into(),
            args,
            result,
            timestamp: Utc::now(),
        }
    }

    /// Derived name matched by pattern subscriptions
    pub fn event_name(&self) -> String {
        format!("tool.{}.executed", self.operation_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(number: u64) -> RemoteIdentity {
        RemoteIdentity {
            id: 1000 + number,
            node_id: format!("I_node{}", number),
            number,
            url: format!("https://github.com/acme/app/issues/{}", number),
        }
    }

    #[test]
    fn test_normalize_title_adds_prefix() {
        assert_eq!(normalize_title(WorkItemKind::Epic, "Login"), "[EPIC] Login");
        assert_eq!(
            normalize_title(WorkItemKind::Task, "Add callback route"),
            "[TASK] Add callback route"
        );
    }

    #[test]
    fn test_normalize_title_is_idempotent() {
        for kind in [WorkItemKind::Epic, WorkItemKind::Feature, WorkItemKind::Task] {
            let once = normalize_title(kind, "OAuth");
            let twice = normalize_title(kind, &once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_normalize_title_is_case_sensitive() {
        assert_eq!(
            normalize_title(WorkItemKind::Epic, "[epic] Login"),
            "[EPIC] [epic] Login"
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("[FEATURE] OAuth & SSO  login!"), "oauth-sso-login");
        assert_eq!(slugify("Add callback route"), "add-callback-route");
    }

    #[test]
    fn test_default_labels_only_when_none_supplied() {
        let item = WorkItem::epic("Login", "");
        assert_eq!(item.effective_labels(), vec!["epic"]);

        let item = WorkItem::epic("Login", "").with_labels(["security"]);
        assert_eq!(item.effective_labels(), vec!["security"]);
    }

    #[test]
    fn test_validate_parent() {
        assert!(validate_parent(WorkItemKind::Epic, None).unwrap().is_none());
        assert!(validate_parent(WorkItemKind::Epic, Some(3)).is_err());
        assert!(validate_parent(WorkItemKind::Feature, None).is_err());
        assert!(validate_parent(WorkItemKind::Feature, Some(0)).is_err());
        assert!(validate_parent(WorkItemKind::Task, Some(-4)).is_err());
        assert_eq!(validate_parent(WorkItemKind::Task, Some(2)).unwrap(), Some(2));
    }

    #[test]
    fn test_resolve_appends_parent_reference_once() {
        let item = WorkItem::feature(1, "OAuth", "Support OAuth providers");
        let req = item.resolve().unwrap();
        assert_eq!(req.title, "[FEATURE] OAuth");
        assert_eq!(req.parent_number, Some(1));
        assert!(req.body.ends_with("Parent: #1"));

        let again = WorkItem::feature(1, req.title.clone(), req.body.clone())
            .resolve()
            .unwrap();
        assert_eq!(again.body.matches("Parent: #1").count(), 1);
    }

    #[test]
    fn test_resolve_rejects_empty_title() {
        let item = WorkItem::epic("   ", "");
        assert!(matches!(item.resolve(), Err(StrataError::InvalidInput(_))));
    }

    #[test]
    fn test_remote_identity_is_write_once() {
        let mut item = WorkItem::epic("Login", "");
        item.assign_remote(identity(1)).unwrap();
        assert_eq!(item.number(), Some(1));

        let err = item.assign_remote(identity(9)).unwrap_err();
        assert!(matches!(err, StrataError::AlreadyAssigned(_)));
        assert_eq!(item.number(), Some(1));
    }

    #[test]
    fn test_board_placement_requires_remote_identity() {
        let item = WorkItem::feature(1, "OAuth", "");
        assert!(matches!(
            BoardPlacement::for_item(&item, "PVT_1"),
            Err(StrataError::NotCreated(_))
        ));

        let mut item = item;
        item.assign_remote(identity(2)).unwrap();
        let placement = BoardPlacement::for_item(&item, "PVT_1").unwrap();
        assert_eq!(placement.number, 2);
        assert_eq!(placement.parent_number, Some(1));
        assert_eq!(placement.kind, WorkItemKind::Feature);
    }

    #[test]
    fn test_execution_result_invariant() {
        let ok = ExecutionResult::success(5);
        assert!(ok.success && ok.data.is_some() && ok.error.is_none());

        let err: ExecutionResult<i32> = ExecutionResult::failure("rate limited");
        assert!(!err.success && err.data.is_none());
        assert_eq!(err.into_result(), Err("rate limited".to_string()));
    }

    #[test]
    fn test_tool_event_name() {
        let event = ToolEvent::new(
            "create_issue",
            serde_json::json!({"title": "x"}),
            ExecutionResult::success(serde_json::Value::Null),
        );
        assert_eq!(event.event_name(), "tool.create_issue.executed");
    }
}
