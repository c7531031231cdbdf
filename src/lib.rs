//! Reconciles Azure DevOps work-item links (pull requests, branches,
//! attachments) against live repository state to report changed files and
//! merge completion.

pub mod client;
pub mod config;
pub mod reconcile;
pub mod report;
pub mod repo;
pub mod sheet;
pub mod workitem;
