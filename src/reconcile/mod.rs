use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::repo::{GitRepoApi, PrStatus, PullRequest, RepoError};
use crate::workitem::{WorkItemApi, WorkItemError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    WorkItem(#[from] WorkItemError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Work-item collaborator as the engine needs it: linked pull requests and
/// linked branches.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    /// pr id -> repository id, from the work item's Pull Request links.
    async fn pr_links(&self, work_item_id: u64) -> Result<BTreeMap<u64, String>, WorkItemError>;

    /// Repository ids from the work item's Branch links, duplicates kept.
    async fn branch_repo_ids(&self, work_item_id: u64) -> Result<Vec<String>, WorkItemError>;
}

/// Repository collaborator as the engine needs it: listings, id lists,
/// per-PR changed paths, and display names.
#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn repo_name(&self, repo_id: &str) -> Result<String, RepoError>;

    async fn pull_requests(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<BTreeMap<u64, PullRequest>, RepoError>;

    async fn pull_request_ids(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<Vec<u64>, RepoError>;

    async fn changed_paths_by_pr(
        &self,
        repo_id: &str,
        pr_id: u64,
    ) -> Result<BTreeMap<String, String>, RepoError>;
}

#[async_trait]
impl WorkItemSource for WorkItemApi {
    async fn pr_links(&self, work_item_id: u64) -> Result<BTreeMap<u64, String>, WorkItemError> {
        WorkItemApi::pr_links(self, work_item_id).await
    }

    async fn branch_repo_ids(&self, work_item_id: u64) -> Result<Vec<String>, WorkItemError> {
        WorkItemApi::branch_repo_ids(self, work_item_id).await
    }
}

#[async_trait]
impl RepoSource for GitRepoApi {
    async fn repo_name(&self, repo_id: &str) -> Result<String, RepoError> {
        GitRepoApi::repo_name(self, repo_id).await
    }

    async fn pull_requests(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<BTreeMap<u64, PullRequest>, RepoError> {
        GitRepoApi::pull_requests(self, repo_id, branch_name, status).await
    }

    async fn pull_request_ids(
        &self,
        repo_id: &str,
        branch_name: &str,
        status: PrStatus,
    ) -> Result<Vec<u64>, RepoError> {
        GitRepoApi::pull_request_ids(self, repo_id, branch_name, status).await
    }

    async fn changed_paths_by_pr(
        &self,
        repo_id: &str,
        pr_id: u64,
    ) -> Result<BTreeMap<String, String>, RepoError> {
        GitRepoApi::changed_paths_by_pr(self, repo_id, pr_id).await
    }
}

/// Merged changed-path report for one repository. Paths are deduplicated
/// and, being a BTreeMap, iterate in lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoChangedPaths {
    pub repo_id: String,
    pub repo_name: String,
    /// path -> change kind, newest pull request winning per path
    pub paths: BTreeMap<String, String>,
}

/// Per-repository merge reconciliation: which work-item PRs are completed
/// against the target branch and which are still outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMergeState {
    pub repo_id: String,
    pub repo_name: String,
    pub merged: Vec<u64>,
    pub not_merged: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub repos: Vec<RepoMergeState>,
}

impl MergeReport {
    /// True iff no repository has outstanding pull requests. A work item
    /// with zero linked PRs is vacuously merged.
    pub fn is_all_merged(&self) -> bool {
        self.repos.iter().all(|repo| repo.not_merged.is_empty())
    }
}

/// Joins work-item links against live repository state. All state is
/// per-call; nothing is cached between entry points.
pub struct Reconciler<W, R> {
    work_items: W,
    repos: R,
}

impl<W: WorkItemSource, R: RepoSource> Reconciler<W, R> {
    pub fn new(work_items: W, repos: R) -> Reconciler<W, R> {
        Reconciler { work_items, repos }
    }

    /// Pull requests that are both linked from the work item and currently
    /// targeting `branch_name` in their repository, keyed by pr id.
    ///
    /// The live listings are joined on (repository id, pr id) so that equal
    /// pr ids in different repositories cannot shadow each other. A linked
    /// PR absent from its repository's listing is silently excluded.
    #[instrument(skip(self))]
    pub async fn linked_pull_requests(
        &self,
        work_item_id: u64,
        branch_name: &str,
    ) -> Result<BTreeMap<u64, PullRequest>, ReconcileError> {
        let links = self.work_items.pr_links(work_item_id).await?;

        let repo_ids: BTreeSet<&str> = links.values().map(String::as_str).collect();
        let mut live: BTreeMap<(String, u64), PullRequest> = BTreeMap::new();
        for repo_id in repo_ids {
            let listed = self
                .repos
                .pull_requests(repo_id, branch_name, PrStatus::All)
                .await?;
            for (pr_id, pr) in listed {
                live.insert((repo_id.to_string(), pr_id), pr);
            }
        }

        let mut reconciled = BTreeMap::new();
        for (pr_id, repo_id) in &links {
            let Some(pr) = live.get(&(repo_id.clone(), *pr_id)) else {
                debug!(pr_id, repo_id = %repo_id, "linked PR not in live listing, excluded");
                continue;
            };
            if pr.target_branch == branch_name {
                reconciled.insert(*pr_id, pr.clone());
            }
        }
        debug!(
            linked = links.len(),
            reconciled = reconciled.len(),
            "reconciled work-item pull requests"
        );
        Ok(reconciled)
    }

    /// Changed-path report driven by the work item's pull-request links.
    #[instrument(skip(self))]
    pub async fn changed_paths_by_pr(
        &self,
        work_item_id: u64,
        branch_name: &str,
    ) -> Result<Vec<RepoChangedPaths>, ReconcileError> {
        let prs = self.linked_pull_requests(work_item_id, branch_name).await?;
        let groups = group_by_repo(&prs);
        self.merged_paths(groups).await
    }

    /// Changed-path report driven by the work item's branch links: every
    /// completed pull request targeting `branch_name` in each linked
    /// repository. Repositories yielding no pull requests are omitted.
    #[instrument(skip(self))]
    pub async fn changed_paths_by_repo(
        &self,
        work_item_id: u64,
        branch_name: &str,
    ) -> Result<Vec<RepoChangedPaths>, ReconcileError> {
        let mut repo_ids = self.work_items.branch_repo_ids(work_item_id).await?;
        dedup_in_order(&mut repo_ids);

        let mut groups = BTreeMap::new();
        for repo_id in repo_ids {
            let ids = self
                .repos
                .pull_request_ids(&repo_id, branch_name, PrStatus::Completed)
                .await?;
            if !ids.is_empty() {
                groups.insert(repo_id, ids);
            }
        }
        self.merged_paths(groups).await
    }

    /// Merge each repository's per-PR changed paths into one map.
    ///
    /// Pull-request ids are sorted ascending first; fetching and merging in
    /// that order makes the newest (highest-id) pull request's change kind
    /// win whenever several PRs touch the same path.
    #[instrument(skip_all)]
    pub async fn merged_paths(
        &self,
        groups: BTreeMap<String, Vec<u64>>,
    ) -> Result<Vec<RepoChangedPaths>, ReconcileError> {
        let mut report = Vec::new();
        for (repo_id, pr_ids) in groups {
            let repo_name = self.repos.repo_name(&repo_id).await?;
            let pr_ids = sorted_ascending(pr_ids);

            let mut layers = Vec::with_capacity(pr_ids.len());
            for pr_id in pr_ids {
                layers.push(self.repos.changed_paths_by_pr(&repo_id, pr_id).await?);
            }

            report.push(RepoChangedPaths {
                repo_id,
                repo_name,
                paths: merge_newest_wins(layers),
            });
        }
        Ok(report)
    }

    /// Reconcile the work item's intended pull-request set against each
    /// repository's completed set.
    #[instrument(skip(self))]
    pub async fn check_merged(
        &self,
        work_item_id: u64,
        branch_name: &str,
    ) -> Result<MergeReport, ReconcileError> {
        let prs = self.linked_pull_requests(work_item_id, branch_name).await?;
        let groups = group_by_repo(&prs);

        let mut repos = Vec::new();
        for (repo_id, pr_ids) in groups {
            let completed: BTreeSet<u64> = self
                .repos
                .pull_request_ids(&repo_id, branch_name, PrStatus::Completed)
                .await?
                .into_iter()
                .collect();
            let wanted: BTreeSet<u64> = pr_ids.into_iter().collect();

            let repo_name = self.repos.repo_name(&repo_id).await?;
            repos.push(RepoMergeState {
                repo_id,
                repo_name,
                merged: wanted.intersection(&completed).copied().collect(),
                not_merged: wanted.difference(&completed).copied().collect(),
            });
        }
        Ok(MergeReport { repos })
    }
}

/// Group a reconciled pull-request set by repository id.
pub fn group_by_repo(prs: &BTreeMap<u64, PullRequest>) -> BTreeMap<String, Vec<u64>> {
    let mut groups: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for (pr_id, pr) in prs {
        groups.entry(pr.repo_id.clone()).or_default().push(*pr_id);
    }
    groups
}

/// Explicit sort precondition of the newest-wins merge: oldest pull request
/// first. Idempotent.
fn sorted_ascending(mut ids: Vec<u64>) -> Vec<u64> {
    ids.sort_unstable();
    ids
}

/// Fold path layers in the order given, later layers overwriting earlier
/// entries for the same path. Callers must pass layers oldest-first.
fn merge_newest_wins(layers: Vec<BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        merged.extend(layer);
    }
    merged
}

/// Drop repeated ids, keeping the first occurrence's position.
fn dedup_in_order(ids: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}
