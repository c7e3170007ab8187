//! # strata-tracker
//!
//! Project-tracking service layer for Strata orchestration.
//!
//! This crate provides:
//! - The [`TrackerClient`] trait every remote call goes through
//! - A GitHub implementation (REST for issues and contents, GraphQL for boards)
//! - An in-memory [`MockTracker`] for tests
//! - Token lookup from the environment

mod auth;
mod client;
mod error;
mod github;
mod mock;

pub use auth::get_auth_token;
pub use client::{
    BoardField, BoardFields, BoardItemRef, CommentRef, FieldOption, FileWrite, FileWriteResult,
    LinkedBranch, RemoteFile, StatusMutation, TrackerClient,
};
pub use error::{TrackerError, TrackerResult};
pub use github::GitHubClient;
pub use mock::{MockTracker, TrackerCall};
