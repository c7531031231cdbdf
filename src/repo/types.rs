use serde::Deserialize;
use std::fmt;

/// Pull-request lifecycle status, as the service defines it.
///
/// `All` is only meaningful as a search filter; responses carry one of the
/// concrete states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrStatus {
    Active,
    Completed,
    Abandoned,
    NotSet,
    All,
}

impl PrStatus {
    /// Value for the searchCriteria.status query parameter.
    pub fn as_query(self) -> &'static str {
        match self {
            PrStatus::Active => "active",
            PrStatus::Completed => "completed",
            PrStatus::Abandoned => "abandoned",
            PrStatus::NotSet => "notSet",
            PrStatus::All => "all",
        }
    }
}

impl fmt::Display for PrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query())
    }
}

/// One pull request, as fetched from the repository service.
///
/// Branch fields always hold the short name ("main"), never the full ref
/// path ("refs/heads/main") — the constructor strips the namespace.
/// Constructed fresh from each service response and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Repository the PR belongs to
    pub repo_id: String,
    /// Repository name; only known on single-PR fetches, None on listings
    pub repo_name: Option<String>,
    /// PR id, unique within one repository
    pub id: u64,
    /// Lifecycle status
    pub status: PrStatus,
    /// Short source branch name
    pub source_branch: String,
    /// Short target branch name
    pub target_branch: String,
}

impl PullRequest {
    pub fn new(
        repo_id: impl Into<String>,
        repo_name: Option<String>,
        id: u64,
        status: PrStatus,
        source_ref: &str,
        target_ref: &str,
    ) -> PullRequest {
        PullRequest {
            repo_id: repo_id.into(),
            repo_name,
            id,
            status,
            source_branch: short_branch(source_ref).to_string(),
            target_branch: short_branch(target_ref).to_string(),
        }
    }
}

/// Strip the refs/heads/ namespace from a ref name.
///
/// "refs/heads/feature/login" -> "feature/login"; names that already lack
/// the prefix pass through unchanged.
pub fn short_branch(ref_name: &str) -> &str {
    ref_name.strip_prefix("refs/heads/").unwrap_or(ref_name)
}
