//! HTTP-level tests of the work-item and repository API layers against a
//! mock Azure DevOps service.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pr_tracker::client::{AdoClient, ClientError};
use pr_tracker::config::{AdoConfig, Config};
use pr_tracker::reconcile::Reconciler;
use pr_tracker::repo::{GitRepoApi, PrStatus, RepoError};
use pr_tracker::workitem::WorkItemApi;

fn config_for(server: &MockServer) -> Config {
    Config {
        ado: AdoConfig {
            user: Some("tester".to_string()),
            pat: Some("token".to_string()),
            organization: "org".to_string(),
            project: "proj".to_string(),
            base_url: format!("{}/", server.uri()),
            api_version: "7.0".to_string(),
        },
    }
}

fn repo_api(server: &MockServer) -> GitRepoApi {
    GitRepoApi::new(AdoClient::new(&config_for(server)))
}

fn work_item_api(server: &MockServer) -> WorkItemApi {
    WorkItemApi::new(AdoClient::new(&config_for(server)))
}

fn pr_json(id: u64, status: &str, source: &str, target: &str) -> serde_json::Value {
    json!({
        "pullRequestId": id,
        "status": status,
        "sourceRefName": format!("refs/heads/{source}"),
        "targetRefName": format!("refs/heads/{target}"),
    })
}

#[tokio::test]
async fn test_pull_request_listing_sends_filters_and_strips_refs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/repo-1/pullrequests"))
        .and(query_param("searchCriteria.status", "all"))
        .and(query_param("searchCriteria.targetRefName", "refs/heads/main"))
        .and(query_param("api-version", "7.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                pr_json(3, "active", "feature/login", "main"),
                pr_json(8, "completed", "fix/crash", "main"),
            ]
        })))
        .mount(&server)
        .await;

    let prs = repo_api(&server)
        .pull_requests("repo-1", "main", PrStatus::All)
        .await
        .unwrap();

    assert_eq!(prs.len(), 2);
    let pr = prs.get(&3).unwrap();
    assert_eq!(pr.source_branch, "feature/login");
    assert_eq!(pr.target_branch, "main");
    assert_eq!(pr.status, PrStatus::Active);
    assert!(pr.repo_name.is_none());
    assert_eq!(prs.get(&8).unwrap().status, PrStatus::Completed);
}

#[tokio::test]
async fn test_single_pr_with_wrong_target_branch_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/repo-1/pullrequests/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pullRequestId": 42,
            "status": "active",
            "sourceRefName": "refs/heads/topic",
            "targetRefName": "refs/heads/dev",
            "repository": { "id": "repo-1", "name": "widgets" }
        })))
        .mount(&server)
        .await;

    let api = repo_api(&server);
    assert!(api.pull_request("repo-1", 42, "main").await.unwrap().is_none());

    let pr = api.pull_request("repo-1", 42, "dev").await.unwrap().unwrap();
    assert_eq!(pr.repo_name.as_deref(), Some("widgets"));
    assert_eq!(pr.target_branch, "dev");
}

#[tokio::test]
async fn test_changed_paths_by_pr_filters_blobs_and_overwrites() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/org/proj/_apis/git/repositories/repo-1/pullrequests/5/commits",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [ { "commitId": "c1" }, { "commitId": "c2" } ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/repo-1/commits/c1/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "changes": [
                { "item": { "path": "/src", "gitObjectType": "tree" }, "changeType": "add" },
                { "item": { "path": "/src/a.rs", "gitObjectType": "blob" }, "changeType": "add" },
                { "item": { "path": "/b.txt", "gitObjectType": "blob" }, "changeType": "add" },
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/repo-1/commits/c2/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "changes": [
                { "item": { "path": "/src/a.rs", "gitObjectType": "blob" }, "changeType": "edit" },
            ]
        })))
        .mount(&server)
        .await;

    let paths = repo_api(&server)
        .changed_paths_by_pr("repo-1", 5)
        .await
        .unwrap();

    // Tree entry dropped; the later commit's kind wins for the revisited path.
    assert_eq!(paths.len(), 2);
    assert_eq!(paths.get("/src/a.rs").map(String::as_str), Some("edit"));
    assert_eq!(paths.get("/b.txt").map(String::as_str), Some("add"));
}

#[tokio::test]
async fn test_diff_branch_params_and_blob_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/repo-1/diffs/commits"))
        .and(query_param("baseVersion", "main"))
        .and(query_param("targetVersion", "feature"))
        .and(query_param("$top", "100000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "changes": [
                { "item": { "path": "/docs", "gitObjectType": "tree" }, "changeType": "edit" },
                { "item": { "path": "/docs/guide.md", "gitObjectType": "blob" }, "changeType": "edit" },
            ]
        })))
        .mount(&server)
        .await;

    let paths = repo_api(&server)
        .changed_paths_by_diff("repo-1", "feature", "main")
        .await
        .unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths.get("/docs/guide.md").map(String::as_str), Some("edit"));
}

#[tokio::test]
async fn test_error_response_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_string("{\"message\":\"repo not found\"}"),
        )
        .mount(&server)
        .await;

    let err = repo_api(&server).repo_name("missing").await.unwrap_err();
    match err {
        RepoError::Api(ClientError::Status { status, body }) => {
            assert_eq!(status.as_u16(), 404);
            assert!(body.contains("repo not found"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_work_item_links_decode_artifact_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/wit/workitems/3"))
        .and(query_param("$expand", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3,
            "fields": {},
            "relations": [
                {
                    "rel": "ArtifactLink",
                    "url": "vstfs:///Git/PullRequestId/proj-guid%2Frepo-a%2F45",
                    "attributes": { "name": "Pull Request" }
                },
                {
                    "rel": "ArtifactLink",
                    "url": "vstfs:///Git/Ref/proj-guid%2Frepo-a%2FGBmain",
                    "attributes": { "name": "Branch" }
                },
                {
                    "rel": "System.LinkTypes.Hierarchy-Reverse",
                    "url": "https://example.com/workItems/1",
                    "attributes": { "name": "Parent" }
                }
            ]
        })))
        .mount(&server)
        .await;

    let api = work_item_api(&server);
    let links = api.pr_links(3).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links.get(&45).map(String::as_str), Some("repo-a"));

    let repos = api.branch_repo_ids(3).await.unwrap();
    assert_eq!(repos, vec!["repo-a"]);
}

#[tokio::test]
async fn test_accepted_date_reads_review_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/wit/workitems/3"))
        .and(query_param("$expand", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3,
            "fields": {
                "Microsoft.VSTS.CodeReview.AcceptedDate": "2024-05-01T12:30:00.45Z"
            },
            "relations": []
        })))
        .mount(&server)
        .await;

    let date = work_item_api(&server).accepted_date(3).await.unwrap();
    assert_eq!(date.to_rfc3339(), "2024-05-01T12:30:00.450+00:00");
}

#[tokio::test]
async fn test_accepted_date_missing_field_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/wit/workitems/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 4,
            "fields": {},
            "relations": []
        })))
        .mount(&server)
        .await;

    assert!(work_item_api(&server).accepted_date(4).await.is_err());
}

#[tokio::test]
async fn test_touch_accepted_date_sends_json_patch() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/org/proj/_apis/wit/workitems/3"))
        .and(body_partial_json(json!([{
            "op": "replace",
            "path": "/fields/Microsoft.VSTS.CodeReview.AcceptedDate"
        }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    work_item_api(&server).touch_accepted_date(3).await.unwrap();
}

#[tokio::test]
async fn test_reconciler_end_to_end_over_http() {
    let server = MockServer::start().await;
    // Work item links PR 7 in repo-a and PR 9 in repo-a; only 7 is live on main.
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/wit/workitems/11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 11,
            "fields": {},
            "relations": [
                {
                    "rel": "ArtifactLink",
                    "url": "vstfs:///Git/PullRequestId/p%2Frepo-a%2F7",
                    "attributes": { "name": "Pull Request" }
                },
                {
                    "rel": "ArtifactLink",
                    "url": "vstfs:///Git/PullRequestId/p%2Frepo-a%2F9",
                    "attributes": { "name": "Pull Request" }
                }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/proj/_apis/git/repositories/repo-a/pullrequests"))
        .and(query_param("searchCriteria.status", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [ pr_json(7, "completed", "topic", "main") ]
        })))
        .mount(&server)
        .await;

    let engine = Reconciler::new(work_item_api(&server), repo_api(&server));
    let reconciled = engine.linked_pull_requests(11, "main").await.unwrap();
    assert_eq!(reconciled.keys().copied().collect::<Vec<_>>(), vec![7]);
}
