pub mod types;

pub use types::{short_branch, PrStatus, PullRequest};

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::client::{AdoClient, ClientError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository API request failed: {0}")]
    Api(#[from] ClientError),
}

/// Wire shape of one pull request in list/fetch responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    pull_request_id: u64,
    status: PrStatus,
    source_ref_name: String,
    target_ref_name: String,
    repository: Option<RepositoryRef>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestList {
    value: Vec<PullResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRef {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
struct CommitList {
    value: Vec<CommitRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeEntry {
    item: ChangeItem,
    change_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeItem {
    path: String,
    git_object_type: String,
}

#[derive(Debug, Deserialize)]
struct ChangeList {
    changes: Vec<ChangeEntry>,
}

/// Result cap for the branch-diff endpoint, large enough that real diffs
/// are never truncated.
const DIFF_TOP: &str = "100000";

/// Query layer over the repository service's pull-request and diff
/// endpoints. Holds no state beyond the shared client.
#[derive(Debug, Clone)]
pub struct GitRepoApi {
    client: AdoClient,
}

impl GitRepoApi {
    pub fn new(client: AdoClient) -> GitRepoApi {
        GitRepoApi { client }
    }

    /// Look up a repository's display name by id.
    #[instrument(skip(self))]
    pub async fn repo_name(&self, repo_id: &str) -> Result<String, RepoError> {
        let url = self.client.git_url(repo_id);
        let repo: RepositoryRef = self.client.get_json(&url, &[]).await?;
        Ok(repo.name)
    }

    /// Look up a repository's id by name.
    #[instrument(skip(self))]
    pub async fn repo_id(&self, repo_name: &str) -> Result<String, RepoError> {
        let url = self.client.git_url(repo_name);
        let repo: RepositoryRef = self.client.get_json(&url, &[]).await?;
        Ok(repo.id)
    }

    /// Fetch one pull request, validating its target branch.
    ///
    /// Returns None when the PR's live target branch differs from
    /// `target_branch` — "not applicable", not "not found".
    #[instrument(skip(self))]
    pub async fn pull_request(
        &self,
        repo_id: &str,
        pr_id: u64,
        target_branch: &str,
    ) -> Result<Option<PullRequest>, RepoError> {
        let url = self.client.git_url(&format!("{repo_id}/pullrequests/{pr_id}"));
        let data: PullResponse = self.client.get_json(&url, &[]).await?;

        if short_branch(&data.target_ref_name) != target_branch {
            debug!(
                actual = short_branch(&data.target_ref_name),
                "target branch mismatch, excluding PR"
            );
            return Ok(None);
        }

        let (repo_id, repo_name) = match data.repository {
            Some(repo) => (repo.id, Some(repo.name)),
            None => (repo_id.to_string(), None),
        };
        Ok(Some(PullRequest::new(
            repo_id,
            repo_name,
            data.pull_request_id,
            data.status,
            &data.source_ref_name,
            &data.target_ref_name,
        )))
    }

    /// List pull requests targeting `branch_name` with the given status,
    /// keyed by pr id. Repository name is left unset on this path.
    #[instrument(skip(self))]
    pub async fn pull_requests(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<BTreeMap<u64, PullRequest>, RepoError> {
        let list = self.list_pull_requests(repo_id, branch_name, status).await?;
        let mut prs = BTreeMap::new();
        for data in list.value {
            let pr = PullRequest::new(
                repo_id,
                None,
                data.pull_request_id,
                data.status,
                &data.source_ref_name,
                &data.target_ref_name,
            );
            prs.insert(pr.id, pr);
        }
        Ok(prs)
    }

    /// List pull-request ids targeting `branch_name` with the given status,
    /// in service-returned order.
    #[instrument(skip(self))]
    pub async fn pull_request_ids(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<Vec<u64>, RepoError> {
        let list = self.list_pull_requests(repo_id, branch_name, status).await?;
        Ok(list.value.into_iter().map(|pr| pr.pull_request_id).collect())
    }

    /// Changed file paths of one pull request, keyed by path with the
    /// change kind as value. Enumerates the PR's commits and fetches each
    /// commit's changes; a path touched by several commits keeps the kind
    /// from the commit processed last. Only blob entries are kept.
    ///
    /// The service does not document a stable commit order, so the winning
    /// kind for a multiply-touched path follows whatever order it returns.
    #[instrument(skip(self))]
    pub async fn changed_paths_by_pr(
        &self,
        repo_id: &str,
        pr_id: u64,
    ) -> Result<BTreeMap<String, String>, RepoError> {
        let url = self
            .client
            .git_url(&format!("{repo_id}/pullrequests/{pr_id}/commits"));
        let commits: CommitList = self.client.get_json(&url, &[]).await?;
        debug!(commits = commits.value.len(), "enumerated PR commits");

        let mut paths = BTreeMap::new();
        for commit in commits.value {
            let url = self
                .client
                .git_url(&format!("{repo_id}/commits/{}/changes", commit.commit_id));
            let changes: ChangeList = self.client.get_json(&url, &[]).await?;
            collect_blob_paths(changes.changes, &mut paths);
        }
        Ok(paths)
    }

    /// Changed file paths between two branches, from a single diff call.
    /// Same blob-only filter as the per-PR variant.
    #[instrument(skip(self))]
    pub async fn changed_paths_by_diff(
        &self,
        repo_id: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<BTreeMap<String, String>, RepoError> {
        let url = self.client.git_url(&format!("{repo_id}/diffs/commits"));
        let params = [
            ("$top", DIFF_TOP),
            ("baseVersion", target_branch),
            ("targetVersion", source_branch),
        ];
        let changes: ChangeList = self.client.get_json(&url, &params).await?;

        let mut paths = BTreeMap::new();
        collect_blob_paths(changes.changes, &mut paths);
        Ok(paths)
    }

    async fn list_pull_requests(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<PullRequestList, RepoError> {
        let url = self.client.git_url(&format!("{repo_id}/pullrequests"));
        let target_ref = format!("refs/heads/{branch_name}");
        let params = [
            ("searchCriteria.status", status.as_query()),
            ("searchCriteria.targetRefName", target_ref.as_str()),
        ];
        Ok(self.client.get_json(&url, &params).await?)
    }
}

/// Keep only file-content (blob) entries; trees and other object kinds are
/// directory noise. Revisited paths are overwritten.
fn collect_blob_paths(changes: Vec<ChangeEntry>, paths: &mut BTreeMap<String, String>) {
    for change in changes {
        if change.item.git_object_type == "blob" {
            paths.insert(change.item.path, change.change_type);
        }
    }
}
