//! GitHub implementation of [`TrackerClient`]
//!
//! Issues, sub-issues, comments and repository contents go through the REST
//! API; Projects v2 boards and linked branches go through GraphQL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use strata_core::{BoardItem, BoardPlacement, IssueRequest, RemoteIdentity, StrataConfig};
use tracing::{debug, instrument};

use crate::client::{
    BoardField, BoardFields, BoardItemRef, CommentRef, FieldOption, FileWrite, FileWriteResult,
    LinkedBranch, RemoteFile, StatusMutation, TrackerClient,
};
use crate::error::{TrackerError, TrackerResult};

const API_VERSION: &str = "2022-11-28";
const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub REST + GraphQL client for one repository and (optionally) one board owner
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    owner: String,
    repo: String,
    board_owner: String,
    board_owner_is_org: bool,
}

impl GitHubClient {
    /// Create a client for `owner/repo`
    pub fn new(token: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            http: reqwest::Client::new(),
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            board_owner: owner.clone(),
            owner,
            repo: repo.into(),
            board_owner_is_org: true,
        }
    }

    /// Create a client from resolved configuration and an already-fetched token
    pub fn from_config(config: &StrataConfig, token: impl Into<String>) -> Self {
        Self::new(token, &config.github.owner, &config.github.repo)
            .with_api_url(&config.github.api_url)
            .with_board_owner(config.board_owner(), config.board.owner_is_org)
    }

    /// Point at a different API root (GitHub Enterprise)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the login owning project boards
    pub fn with_board_owner(mut self, login: impl Into<String>, is_org: bool) -> Self {
        self.board_owner = login.into();
        self.board_owner_is_org = is_org;
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, path)
    }

    fn graphql_url(&self) -> String {
        match self.api_url.strip_suffix("/api/v3") {
            Some(host) => format!("{}/api/graphql", host),
            None => format!("{}/graphql", self.api_url),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(USER_AGENT, "strata")
    }

    /// Send a REST request, classifying non-2xx responses
    async fn send(&self, builder: RequestBuilder, context: &str) -> TrackerResult<Value> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| TrackerError::InvalidResponse(format!("{}: {}", context, e)));
        }

        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        debug!("GitHub {} failed with {}: {}", context, status, body);
        Err(classify_status(status.as_u16(), remaining.as_deref(), &body, context))
    }

    /// Run a GraphQL operation and return its `data` object
    async fn graphql(&self, query: &str, variables: Value, context: &str) -> TrackerResult<Value> {
        let url = self.graphql_url();
        let builder = self
            .request(Method::POST, &url)
            .json(&json!({ "query": query, "variables": variables }));
        let response = self.send(builder, context).await?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(classify_graphql_errors(errors, context));
            }
        }

        response
            .get("data")
            .cloned()
            .ok_or_else(|| TrackerError::InvalidResponse(format!("{}: missing data", context)))
    }

    async fn repository_ref(&self, base_branch: &str) -> TrackerResult<(String, String)> {
        let query = r#"
            query($owner: String!, $repo: String!, $ref: String!) {
              repository(owner: $owner, name: $repo) {
                id
                ref(qualifiedName: $ref) { target { oid } }
              }
            }"#;
        let data = self
            .graphql(
                query,
                json!({
                    "owner": self.owner,
                    "repo": self.repo,
                    "ref": format!("refs/heads/{}", base_branch),
                }),
                "repository ref",
            )
            .await?;

        let repo_id = str_at(&data, "/repository/id", "repository ref")?;
        let oid = data
            .pointer("/repository/ref/target/oid")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::NotFound(format!("base branch {}", base_branch)))?;

        Ok((repo_id, oid.to_string()))
    }

    /// Fields of a board addressed by its node id
    async fn fields_by_board_id(&self, board_id: &str) -> TrackerResult<Vec<BoardField>> {
        let query = r#"
            query($projectId: ID!) {
              node(id: $projectId) {
                ... on ProjectV2 {
                  fields(first: 50) {
                    nodes {
                      ... on ProjectV2FieldCommon { id name }
                      ... on ProjectV2SingleSelectField { options { id name } }
                    }
                  }
                }
              }
            }"#;
        let data = self
            .graphql(query, json!({ "projectId": board_id }), "board fields")
            .await?;

        let nodes = data
            .pointer("/node/fields/nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| TrackerError::NotFound(format!("board {}", board_id)))?;
        Ok(nodes.iter().filter_map(parse_field).collect())
    }
}

#[async_trait]
impl TrackerClient for GitHubClient {
    #[instrument(skip(self, request), fields(title = %request.title))]
    async fn create_issue(&self, request: &IssueRequest) -> TrackerResult<RemoteIdentity> {
        let url = self.repo_url("issues");
        let builder = self.request(Method::POST, &url).json(&json!({
            "title": request.title,
            "body": request.body,
            "labels": request.labels,
        }));
        let issue = self.send(builder, "create issue").await?;

        Ok(RemoteIdentity {
            id: u64_at(&issue, "/id", "create issue")?,
            node_id: str_at(&issue, "/node_id", "create issue")?,
            number: u64_at(&issue, "/number", "create issue")?,
            url: str_at(&issue, "/html_url", "create issue")?,
        })
    }

    async fn link_sub_issue(&self, parent_number: u64, child_id: u64) -> TrackerResult<()> {
        let url = self.repo_url(&format!("issues/{}/sub_issues", parent_number));
        let builder = self
            .request(Method::POST, &url)
            .json(&json!({ "sub_issue_id": child_id }));
        self.send(builder, "link sub-issue").await?;
        Ok(())
    }

    #[instrument(skip(self, issue), fields(issue = issue.number))]
    async fn create_linked_branch(
        &self,
        issue: &RemoteIdentity,
        branch_name: &str,
        base_branch: &str,
    ) -> TrackerResult<LinkedBranch> {
        let (repo_id, oid) = self.repository_ref(base_branch).await?;

        let mutation = r#"
            mutation($issueId: ID!, $oid: GitObjectID!, $name: String!, $repositoryId: ID!) {
              createLinkedBranch(input: {issueId: $issueId, oid: $oid, name: $name, repositoryId: $repositoryId}) {
                linkedBranch { ref { name } }
              }
            }"#;
        let data = self
            .graphql(
                mutation,
                json!({
                    "issueId": issue.node_id,
                    "oid": oid,
                    "name": branch_name,
                    "repositoryId": repo_id,
                }),
                "create linked branch",
            )
            .await?;

        let name = data
            .pointer("/createLinkedBranch/linkedBranch/ref/name")
            .and_then(Value::as_str)
            .unwrap_or(branch_name)
            .to_string();

        Ok(LinkedBranch {
            name,
            issue_number: issue.number,
        })
    }

    async fn add_to_board(&self, placement: &BoardPlacement) -> TrackerResult<BoardItem> {
        let mutation = r#"
            mutation($projectId: ID!, $contentId: ID!) {
              addProjectV2ItemById(input: {projectId: $projectId, contentId: $contentId}) {
                item { id }
              }
            }"#;
        let data = self
            .graphql(
                mutation,
                json!({
                    "projectId": placement.board_id,
                    "contentId": placement.content_id,
                }),
                "add to board",
            )
            .await?;

        let item_id = str_at(&data, "/addProjectV2ItemById/item/id", "add to board")?;

        let fields = self.fields_by_board_id(&placement.board_id).await?;
        for update in placement_tags(placement, &fields)? {
            let (query, variables) = field_update_request(&placement.board_id, &item_id, &update);
            self.graphql(query, variables, "tag board item").await?;
        }
        debug!("Tagged board item {} as {}", item_id, placement.kind);

        Ok(BoardItem::new(placement.board_id.clone(), item_id))
    }

    async fn board_fields(&self, board_number: u64) -> TrackerResult<BoardFields> {
        let owner_kind = if self.board_owner_is_org {
            "organization"
        } else {
            "user"
        };
        let query = format!(
            r#"
            query($login: String!, $number: Int!) {{
              {}(login: $login) {{
                projectV2(number: $number) {{
                  id
                  fields(first: 50) {{
                    nodes {{
                      ... on ProjectV2FieldCommon {{ id name }}
                      ... on ProjectV2SingleSelectField {{ options {{ id name }} }}
                    }}
                  }}
                }}
              }}
            }}"#,
            owner_kind
        );
        let data = self
            .graphql(
                &query,
                json!({ "login": self.board_owner, "number": board_number }),
                "board fields",
            )
            .await?;

        let project = data
            .pointer(&format!("/{}/projectV2", owner_kind))
            .filter(|p| !p.is_null())
            .ok_or_else(|| TrackerError::NotFound(format!("board {}", board_number)))?;

        let board_id = str_at(project, "/id", "board fields")?;
        let fields = project
            .pointer("/fields/nodes")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().filter_map(parse_field).collect())
            .unwrap_or_default();

        Ok(BoardFields { board_id, fields })
    }

    async fn board_items_for_issue(&self, issue_number: u64) -> TrackerResult<Vec<BoardItemRef>> {
        let query = r#"
            query($owner: String!, $repo: String!, $number: Int!) {
              repository(owner: $owner, name: $repo) {
                issue(number: $number) {
                  projectItems(first: 50) { nodes { id project { id } } }
                }
              }
            }"#;
        let data = self
            .graphql(
                query,
                json!({ "owner": self.owner, "repo": self.repo, "number": issue_number }),
                "board items",
            )
            .await?;

        let issue = data
            .pointer("/repository/issue")
            .filter(|i| !i.is_null())
            .ok_or_else(|| TrackerError::NotFound(format!("issue #{}", issue_number)))?;

        let items = issue
            .pointer("/projectItems/nodes")
            .and_then(Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| {
                        Some(BoardItemRef {
                            item_id: n.get("id")?.as_str()?.to_string(),
                            board_id: n.pointer("/project/id")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(items)
    }

    async fn update_board_status(&self, mutation: &StatusMutation) -> TrackerResult<()> {
        self.graphql(
            SET_OPTION_MUTATION,
            json!({
                "projectId": mutation.board_id,
                "itemId": mutation.item_id,
                "fieldId": mutation.field_id,
                "optionId": mutation.option_id,
            }),
            "update board status",
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, issue_number: u64, body: &str) -> TrackerResult<CommentRef> {
        let url = self.repo_url(&format!("issues/{}/comments", issue_number));
        let builder = self.request(Method::POST, &url).json(&json!({ "body": body }));
        let comment = self.send(builder, "add comment").await?;

        Ok(CommentRef {
            id: u64_at(&comment, "/id", "add comment")?,
            url: str_at(&comment, "/html_url", "add comment")?,
        })
    }

    async fn get_file(&self, path: &str) -> TrackerResult<RemoteFile> {
        let url = self.repo_url(&format!("contents/{}", encode_path(path)));
        let file = self
            .send(self.request(Method::GET, &url), &format!("read {}", path))
            .await?;

        if file.is_array() {
            return Err(TrackerError::InvalidResponse(format!(
                "{} is a directory",
                path
            )));
        }

        let encoded: String = str_at(&file, "/content", "read file")?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| TrackerError::InvalidResponse(format!("{}: {}", path, e)))?;
        let content = String::from_utf8(bytes)
            .map_err(|e| TrackerError::InvalidResponse(format!("{}: {}", path, e)))?;

        Ok(RemoteFile {
            path: path.to_string(),
            content,
            sha: str_at(&file, "/sha", "read file")?,
            url: str_at(&file, "/html_url", "read file")?,
        })
    }

    async fn put_file(&self, write: &FileWrite) -> TrackerResult<FileWriteResult> {
        let url = self.repo_url(&format!("contents/{}", encode_path(&write.path)));
        let mut body = json!({
            "message": write.message,
            "content": BASE64.encode(write.content.as_bytes()),
        });
        if let Some(sha) = &write.sha {
            body["sha"] = json!(sha);
        }

        let result = self
            .send(
                self.request(Method::PUT, &url).json(&body),
                &format!("write {}", write.path),
            )
            .await?;

        Ok(FileWriteResult {
            url: str_at(&result, "/content/html_url", "write file")?,
            sha: str_at(&result, "/content/sha", "write file")?,
        })
    }
}

/// Map a non-2xx REST status to a [`TrackerError`]
pub(crate) fn classify_status(
    status: u16,
    rate_limit_remaining: Option<&str>,
    body: &str,
    context: &str,
) -> TrackerError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let detail = format!("{}: {}", context, message);

    match status {
        404 => TrackerError::NotFound(detail),
        409 => TrackerError::Conflict(detail),
        422 if message.contains("sha") => TrackerError::Conflict(detail),
        429 => TrackerError::RateLimited(detail),
        403 if rate_limit_remaining == Some("0")
            || message.to_lowercase().contains("rate limit") =>
        {
            TrackerError::RateLimited(detail)
        }
        401 | 403 => TrackerError::Unauthorized(detail),
        _ => TrackerError::Remote {
            status,
            message: detail,
        },
    }
}

/// Map GraphQL `errors` entries to a [`TrackerError`]
pub(crate) fn classify_graphql_errors(errors: &[Value], context: &str) -> TrackerError {
    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();
    let detail = format!("{}: {}", context, messages.join("; "));

    let kind = errors
        .iter()
        .find_map(|e| e.get("type").and_then(Value::as_str))
        .unwrap_or_default();

    match kind {
        "NOT_FOUND" => TrackerError::NotFound(detail),
        "RATE_LIMITED" => TrackerError::RateLimited(detail),
        "FORBIDDEN" | "INSUFFICIENT_SCOPES" => TrackerError::Unauthorized(detail),
        _ => TrackerError::Remote {
            status: 200,
            message: detail,
        },
    }
}

fn parse_field(node: &Value) -> Option<BoardField> {
    let id = node.get("id")?.as_str()?.to_string();
    let name = node.get("name")?.as_str()?.to_string();
    let options = node
        .get("options")
        .and_then(Value::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(|o| {
                    Some(FieldOption {
                        id: o.get("id")?.as_str()?.to_string(),
                        name: o.get("name")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(BoardField { id, name, options })
}

fn str_at(value: &Value, pointer: &str, context: &str) -> TrackerResult<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TrackerError::InvalidResponse(format!("{}: missing {}", context, pointer)))
}

fn u64_at(value: &Value, pointer: &str, context: &str) -> TrackerResult<u64> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .ok_or_else(|| TrackerError::InvalidResponse(format!("{}: missing {}", context, pointer)))
}

const SET_OPTION_MUTATION: &str = r#"
    mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
      updateProjectV2ItemFieldValue(input: {
        projectId: $projectId, itemId: $itemId, fieldId: $fieldId,
        value: { singleSelectOptionId: $optionId }
      }) {
        projectV2Item { id }
      }
    }"#;

const SET_TEXT_MUTATION: &str = r#"
    mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $text: String!) {
      updateProjectV2ItemFieldValue(input: {
        projectId: $projectId, itemId: $itemId, fieldId: $fieldId,
        value: { text: $text }
      }) {
        projectV2Item { id }
      }
    }"#;

/// Board field holding the item's hierarchy level
const KIND_FIELD: &str = "Kind";
/// Board field holding the parent issue reference
const PARENT_FIELD: &str = "Parent";

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    /// Single-select option id
    Option(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldUpdate {
    field_id: String,
    value: FieldValue,
}

/// Field writes that record kind and parent on a newly added board item
///
/// Kind goes to a single-select option named after the kind, or to a text
/// field when the board's `Kind` field has no options. Parent is written as
/// `#<number>` and only required when the item has a parent.
fn placement_tags(placement: &BoardPlacement, fields: &[BoardField]) -> TrackerResult<Vec<FieldUpdate>> {
    let field = |name: &str| {
        fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                TrackerError::NotFound(format!(
                    "board {} has no {} field",
                    placement.board_id, name
                ))
            })
    };

    let kind_field = field(KIND_FIELD)?;
    let kind = placement.kind.to_string();
    let kind_value = if kind_field.options.is_empty() {
        FieldValue::Text(kind)
    } else {
        let option = kind_field
            .options
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(&kind))
            .ok_or_else(|| {
                TrackerError::NotFound(format!("{} field has no {} option", kind_field.name, kind))
            })?;
        FieldValue::Option(option.id.clone())
    };

    let mut updates = vec![FieldUpdate {
        field_id: kind_field.id.clone(),
        value: kind_value,
    }];
    if let Some(parent) = placement.parent_number {
        updates.push(FieldUpdate {
            field_id: field(PARENT_FIELD)?.id.clone(),
            value: FieldValue::Text(format!("#{}", parent)),
        });
    }
    Ok(updates)
}

fn field_update_request(board_id: &str, item_id: &str, update: &FieldUpdate) -> (&'static str, Value) {
    let mut variables = json!({
        "projectId": board_id,
        "itemId": item_id,
        "fieldId": update.field_id,
    });
    let query = match &update.value {
        FieldValue::Option(option_id) => {
            variables["optionId"] = json!(option_id);
            SET_OPTION_MUTATION
        }
        FieldValue::Text(text) => {
            variables["text"] = json!(text);
            SET_TEXT_MUTATION
        }
    };
    (query, variables)
}

/// Characters escaped inside a single path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode each path segment, keeping `/` separators
fn encode_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}
