//! Authentication token lookup for the tracking service
//!
//! The token is read once, before any remote call, from:
//! 1. The configured variable (`github.token_env`, default `GITHUB_TOKEN`)
//! 2. `GITHUB_TOKEN`
//! 3. `GH_TOKEN` (GitHub CLI convention)

use std::env;
use strata_core::{Result, StrataError};

const FALLBACK_VARS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];

/// Get authentication token for the tracking service
pub fn get_auth_token(token_env: &str) -> Result<String> {
    let candidates = std::iter::once(token_env).chain(FALLBACK_VARS);

    for var in candidates {
        if let Ok(token) = env::var(var) {
            if !token.trim().is_empty() {
                tracing::debug!("Using token from {}", var);
                return Ok(token.trim().to_string());
            }
        }
    }

    Err(StrataError::Auth(format!(
        "No authentication found. Set {} (or GITHUB_TOKEN / GH_TOKEN) to a token \
         with issues, contents, and projects scopes",
        token_env
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_configured_variable_wins() {
        with_env_vars(
            &[
                ("STRATA_TEST_TOKEN", Some("configured")),
                ("GITHUB_TOKEN", Some("github")),
                ("GH_TOKEN", Some("gh")),
            ],
            || {
                assert_eq!(get_auth_token("STRATA_TEST_TOKEN").unwrap(), "configured");
            },
        );
    }

    #[test]
    fn test_gh_token_fallback() {
        with_env_vars(
            &[
                ("STRATA_TEST_TOKEN", None),
                ("GITHUB_TOKEN", None),
                ("GH_TOKEN", Some("gh")),
            ],
            || {
                assert_eq!(get_auth_token("STRATA_TEST_TOKEN").unwrap(), "gh");
            },
        );
    }

    #[test]
    fn test_blank_token_is_ignored() {
        with_env_vars(
            &[
                ("STRATA_TEST_TOKEN", Some("   ")),
                ("GITHUB_TOKEN", None),
                ("GH_TOKEN", None),
            ],
            || {
                assert!(matches!(
                    get_auth_token("STRATA_TEST_TOKEN"),
                    Err(StrataError::Auth(_))
                ));
            },
        );
    }
}
