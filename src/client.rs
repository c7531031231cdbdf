use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-success response from the service. Carries the status and the
    /// response body so callers can log the service's error message.
    #[error("request failed: status={status}, body={body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Thin wrapper around reqwest for the Azure DevOps REST API.
///
/// Every request carries basic-auth credentials and the api-version query
/// parameter. Failures are never retried; a non-2xx response surfaces as
/// ClientError::Status with the body preserved.
#[derive(Debug, Clone)]
pub struct AdoClient {
    http: reqwest::Client,
    user: String,
    pat: Option<String>,
    api_version: String,
    wit_base: String,
    git_base: String,
    project: String,
}

impl AdoClient {
    pub fn new(config: &Config) -> AdoClient {
        let ado = &config.ado;
        let project_base = format!("{}{}/{}", ado.base_url, ado.organization, ado.project);
        AdoClient {
            http: reqwest::Client::new(),
            user: ado.user.clone().unwrap_or_default(),
            pat: ado.pat.clone(),
            api_version: ado.api_version.clone(),
            wit_base: format!("{project_base}/_apis/wit/"),
            git_base: format!("{project_base}/_apis/git/repositories/"),
            project: ado.project.clone(),
        }
    }

    /// Work-item-tracking API URL: `.../_apis/wit/<path>`.
    pub fn wit_url(&self, path: &str) -> String {
        format!("{}{}", self.wit_base, path)
    }

    /// Git repositories API URL: `.../_apis/git/repositories/<path>`.
    pub fn git_url(&self, path: &str) -> String {
        format!("{}{}", self.git_base, path)
    }

    /// Project name, needed when composing artifact-link URLs.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// GET a JSON resource, decoding into T.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let response = self.get(url, params).await?;
        Ok(response.json::<T>().await?)
    }

    /// GET a binary resource (attachment downloads).
    pub async fn get_bytes(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<u8>, ClientError> {
        let response = self.get(url, params).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// PATCH with a json-patch document (work-item field and relation updates).
    pub async fn patch_json(
        &self,
        url: &str,
        params: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<(), ClientError> {
        debug!(url, "PATCH");
        let response = self
            .http
            .patch(url)
            .header("Content-Type", "application/json-patch+json")
            .query(&self.with_api_version(params))
            .basic_auth(&self.user, self.pat.as_deref())
            .json(body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response, ClientError> {
        debug!(url, "GET");
        let response = self
            .http
            .get(url)
            .query(&self.with_api_version(params))
            .basic_auth(&self.user, self.pat.as_deref())
            .send()
            .await?;
        Self::check_status(response).await
    }

    fn with_api_version<'a>(&'a self, params: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("api-version", &self.api_version));
        query
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // Read the body before failing so the service's message is loggable.
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status { status, body })
    }
}
