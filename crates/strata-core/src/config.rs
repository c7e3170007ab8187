//! Configuration management for Strata
//!
//! Repository-level settings: which repository and board to target, per-call
//! timeouts, fan-out limits, branch linking, document location, and the
//! review status names the board understands.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Result, StrataError};

/// Repository-level Strata configuration
///
/// Loaded from `.strata/config.toml` in the repo root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub board: BoardConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub branches: BranchConfig,

    #[serde(default)]
    pub docs: DocsConfig,

    #[serde(default)]
    pub review: ReviewConfig,
}

/// Target repository and API endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

/// Project board the hierarchy is placed on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Login owning the project (defaults to the repository owner)
    #[serde(default)]
    pub owner: String,

    /// Project number; 0 disables board placement
    #[serde(default)]
    pub number: u64,

    #[serde(default = "default_true")]
    pub owner_is_org: bool,
}

/// Per-call execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sibling items created concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Linked branch creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

/// Where work-item documents are stored in the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsConfig {
    #[serde(default = "default_docs_dir")]
    pub dir: String,
}

/// Review workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Acceptable status option names, tried in order
    #[serde(default = "default_status_options")]
    pub status_options: Vec<String>,
}

// Default value providers
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    3
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_docs_dir() -> String {
    "docs".to_string()
}

fn default_status_options() -> Vec<String> {
    vec![
        "Human Review Required".to_string(),
        "Review Required".to_string(),
        "In Review".to_string(),
    ]
}

impl StrataConfig {
    /// Load configuration from `.strata/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".strata/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StrataError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `.strata/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<()> {
        let config_dir = repo_root.join(".strata");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| StrataError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Override the target repository (CLI flags win over the file)
    pub fn with_repository(mut self, owner: Option<String>, repo: Option<String>) -> Self {
        if let Some(owner) = owner {
            self.github.owner = owner;
        }
        if let Some(repo) = repo {
            self.github.repo = repo;
        }
        self
    }

    /// Login owning the board, falling back to the repository owner
    pub fn board_owner(&self) -> &str {
        if self.board.owner.is_empty() {
            &self.github.owner
        } else {
            &self.board.owner
        }
    }

    /// Reject configurations that would fail only after remote calls began
    pub fn validate(&self) -> Result<()> {
        if self.github.owner.trim().is_empty() {
            return Err(StrataError::Config("github.owner is not set".to_string()));
        }
        if self.github.repo.trim().is_empty() {
            return Err(StrataError::Config("github.repo is not set".to_string()));
        }
        if self.execution.timeout_ms == 0 {
            return Err(StrataError::Config(
                "execution.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.review.status_options.is_empty() {
            return Err(StrataError::Config(
                "review.status_options must list at least one status".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            api_url: default_api_url(),
            token_env: default_token_env(),
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            number: 0,
            owner_is_org: true,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_branch: default_base_branch(),
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: default_docs_dir(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            status_options: default_status_options(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StrataConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.execution.timeout_ms, 30_000);
        assert_eq!(config.execution.max_concurrency, 3);
        assert_eq!(config.review.status_options[0], "Human Review Required");
    }

    #[test]
    fn test_write_then_load_default() {
        let dir = tempfile::tempdir().unwrap();
        StrataConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".strata/config.toml").exists());

        let config = StrataConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.branches.base_branch, "main");
        assert_eq!(config.docs.dir, "docs");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".strata")).unwrap();
        std::fs::write(
            dir.path().join(".strata/config.toml"),
            "[github]\nowner = \"acme\"\nrepo = \"app\"\n\n[review]\nstatus_options = [\"Needs Eyes\"]\n",
        )
        .unwrap();

        let config = StrataConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.github.owner, "acme");
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.review.status_options, vec!["Needs Eyes"]);
        assert_eq!(config.board_owner(), "acme");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_repository() {
        let config = StrataConfig::default();
        assert!(matches!(config.validate(), Err(StrataError::Config(_))));

        let config = StrataConfig::default().with_repository(Some("acme".into()), Some("app".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config =
            StrataConfig::default().with_repository(Some("acme".into()), Some("app".into()));
        config.execution.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
