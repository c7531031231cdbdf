use chrono::{DateTime, Local, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::client::{AdoClient, ClientError};

/// Work-item field holding the code-review accepted date.
const ACCEPTED_DATE_FIELD: &str = "Microsoft.VSTS.CodeReview.AcceptedDate";

const PR_ARTIFACT_PREFIX: &str = "vstfs:///Git/PullRequestId/";
const BRANCH_ARTIFACT_PREFIX: &str = "vstfs:///Git/Ref/";

/// Percent-encoding set for artifact-link paths: everything but unreserved
/// characters and the slash separators.
const ARTIFACT_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum WorkItemError {
    #[error("work-item API request failed: {0}")]
    Api(#[from] ClientError),

    #[error("malformed artifact link URL: {0}")]
    MalformedArtifactUrl(String),

    #[error("work item has no field {0}")]
    MissingField(&'static str),

    #[error("unparseable date in work item: {0}")]
    BadDate(#[from] chrono::ParseError),

    #[error("failed to save attachment: {0}")]
    AttachmentWrite(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct WorkItemResponse {
    #[serde(default)]
    relations: Vec<Relation>,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Relation {
    rel: String,
    url: String,
    #[serde(default)]
    attributes: RelationAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationAttributes {
    name: Option<String>,
    resource_created_date: Option<String>,
}

/// Resolver for a work item's typed relations: pull-request links, branch
/// links, attachments, and the review-date field.
#[derive(Debug, Clone)]
pub struct WorkItemApi {
    client: AdoClient,
}

impl WorkItemApi {
    pub fn new(client: AdoClient) -> WorkItemApi {
        WorkItemApi { client }
    }

    /// Pull-request links of a work item: pr id -> repository id.
    ///
    /// Scans ArtifactLink relations named "Pull Request" and decodes their
    /// vstfs URLs. A matching relation with an undecodable URL is an error,
    /// not a skip.
    #[instrument(skip(self))]
    pub async fn pr_links(&self, work_item_id: u64) -> Result<BTreeMap<u64, String>, WorkItemError> {
        let item = self.fetch(work_item_id).await?;
        let links = extract_pr_links(&item.relations)?;
        debug!(links = links.len(), "resolved pull-request links");
        Ok(links)
    }

    /// Repository ids from a work item's "Branch" artifact links, in
    /// relation order. Duplicates are preserved; callers dedupe.
    #[instrument(skip(self))]
    pub async fn branch_repo_ids(&self, work_item_id: u64) -> Result<Vec<String>, WorkItemError> {
        let item = self.fetch(work_item_id).await?;
        let repos = extract_branch_repo_ids(&item.relations)?;
        debug!(repos = repos.len(), "resolved branch links");
        Ok(repos)
    }

    /// Read the code-review accepted date field.
    #[instrument(skip(self))]
    pub async fn accepted_date(&self, work_item_id: u64) -> Result<DateTime<Utc>, WorkItemError> {
        let item = self.fetch(work_item_id).await?;
        let raw = item
            .fields
            .get(ACCEPTED_DATE_FIELD)
            .and_then(|v| v.as_str())
            .ok_or(WorkItemError::MissingField(ACCEPTED_DATE_FIELD))?;
        Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
    }

    /// Set the code-review accepted date field to the current time.
    #[instrument(skip(self))]
    pub async fn touch_accepted_date(&self, work_item_id: u64) -> Result<(), WorkItemError> {
        let patch = json!([{
            "op": "replace",
            "path": format!("/fields/{ACCEPTED_DATE_FIELD}"),
            "value": Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        }]);
        let url = self.client.wit_url(&format!("workitems/{work_item_id}"));
        self.client
            .patch_json(&url, &[("$expand", "all")], &patch)
            .await?;
        Ok(())
    }

    /// Add a "Branch" artifact link pointing at `branch` of the repository.
    #[instrument(skip(self))]
    pub async fn add_branch_link(
        &self,
        work_item_id: u64,
        repo_id: &str,
        repo_name: &str,
        branch_name: &str,
    ) -> Result<(), WorkItemError> {
        let path = format!("{}/{repo_id}/GB{branch_name}", self.client.project());
        let artifact = format!(
            "{BRANCH_ARTIFACT_PREFIX}{}",
            utf8_percent_encode(&path, ARTIFACT_PATH)
        );
        let patch = json!([{
            "op": "add",
            "path": "/relations/-",
            "value": {
                "rel": "ArtifactLink",
                "url": artifact,
                "attributes": { "comment": repo_name, "name": "Branch" }
            }
        }]);
        let url = self.client.wit_url(&format!("workitems/{work_item_id}"));
        self.client
            .patch_json(&url, &[("$expand", "all")], &patch)
            .await?;
        Ok(())
    }

    /// Find the newest attachment with the given file name, if any, and
    /// download it. Same-named attachments are disambiguated by
    /// resourceCreatedDate, newest wins.
    #[instrument(skip(self))]
    pub async fn download_named_attachment(
        &self,
        work_item_id: u64,
        file_name: &str,
    ) -> Result<Option<PathBuf>, WorkItemError> {
        let item = self.fetch(work_item_id).await?;
        let Some(attachment_id) = newest_attachment_id(&item.relations, file_name)? else {
            debug!("no matching attachment");
            return Ok(None);
        };
        Ok(Some(self.download_attachment(&attachment_id).await?))
    }

    /// Download one attachment by id to ./<id>.xlsx.
    #[instrument(skip(self))]
    pub async fn download_attachment(&self, attachment_id: &str) -> Result<PathBuf, WorkItemError> {
        let url = self.client.wit_url(&format!("attachments/{attachment_id}"));
        let bytes = self.client.get_bytes(&url, &[("download", "true")]).await?;
        let path = PathBuf::from(format!("{attachment_id}.xlsx"));
        std::fs::write(&path, bytes)?;
        debug!(path = %path.display(), "saved attachment");
        Ok(path)
    }

    async fn fetch(&self, work_item_id: u64) -> Result<WorkItemResponse, WorkItemError> {
        let url = self.client.wit_url(&format!("workitems/{work_item_id}"));
        Ok(self.client.get_json(&url, &[("$expand", "all")]).await?)
    }
}

/// Decode a pull-request artifact URL into (repository id, pr id).
///
/// The decoded artifact path carries project, repository, and pull-request
/// segments; the repository and pr ids are always the final two.
fn parse_pr_artifact(url: &str) -> Result<(String, u64), WorkItemError> {
    let segments = artifact_segments(url, PR_ARTIFACT_PREFIX)?;
    let malformed = || WorkItemError::MalformedArtifactUrl(url.to_string());
    let [.., repo_id, pr_id] = segments.as_slice() else {
        return Err(malformed());
    };
    let pr_id: u64 = pr_id.parse().map_err(|_| malformed())?;
    Ok((repo_id.clone(), pr_id))
}

/// Decode a branch artifact URL, keeping only the repository id.
///
/// The decoded path is `<project>/<repo_id>/GB<branch>`. Branch names may
/// themselves contain slashes, so the repo id cannot be counted from the
/// end; it is the segment just before the first GB-prefixed ref segment.
fn parse_branch_artifact(url: &str) -> Result<String, WorkItemError> {
    let segments = artifact_segments(url, BRANCH_ARTIFACT_PREFIX)?;
    let malformed = || WorkItemError::MalformedArtifactUrl(url.to_string());
    let ref_index = segments
        .iter()
        .position(|segment| segment.starts_with("GB"))
        .ok_or_else(malformed)?;
    let repo_id = ref_index.checked_sub(1).map(|i| &segments[i]).ok_or_else(malformed)?;
    Ok(repo_id.clone())
}

fn artifact_segments(url: &str, prefix: &str) -> Result<Vec<String>, WorkItemError> {
    let malformed = || WorkItemError::MalformedArtifactUrl(url.to_string());
    let path = url.strip_prefix(prefix).ok_or_else(malformed)?;
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| malformed())?;
    Ok(decoded.split('/').map(str::to_string).collect())
}

fn extract_pr_links(relations: &[Relation]) -> Result<BTreeMap<u64, String>, WorkItemError> {
    let mut links = BTreeMap::new();
    for relation in artifact_links(relations, "Pull Request") {
        let (repo_id, pr_id) = parse_pr_artifact(&relation.url)?;
        links.insert(pr_id, repo_id);
    }
    Ok(links)
}

fn extract_branch_repo_ids(relations: &[Relation]) -> Result<Vec<String>, WorkItemError> {
    artifact_links(relations, "Branch")
        .map(|relation| parse_branch_artifact(&relation.url))
        .collect()
}

fn artifact_links<'a>(
    relations: &'a [Relation],
    name: &'a str,
) -> impl Iterator<Item = &'a Relation> {
    relations
        .iter()
        .filter(move |r| r.rel == "ArtifactLink" && r.attributes.name.as_deref() == Some(name))
}

/// Pick the attachment id of the newest AttachedFile relation matching
/// `file_name`, comparing resourceCreatedDate. None when nothing matches.
fn newest_attachment_id(
    relations: &[Relation],
    file_name: &str,
) -> Result<Option<String>, WorkItemError> {
    let mut newest: Option<(DateTime<Utc>, String)> = None;
    for relation in relations.iter().filter(|r| r.rel == "AttachedFile") {
        if relation.attributes.name.as_deref() != Some(file_name) {
            continue;
        }
        let Some(created) = relation.attributes.resource_created_date.as_deref() else {
            continue;
        };
        let created = DateTime::parse_from_rfc3339(created)?.with_timezone(&Utc);
        let id = relation
            .url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if newest.as_ref().map_or(true, |(best, _)| *best < created) {
            newest = Some((created, id));
        }
    }
    Ok(newest.map(|(_, id)| id))
}
