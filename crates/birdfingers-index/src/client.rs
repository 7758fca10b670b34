use std::collections::BTreeMap;
use std::time::Duration;

use birdfingers_core::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::sort_versions_newest_first;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org";
const INDEX_SERVICE: &str = "package index";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// What the index knows about one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub summary: Option<String>,
    pub requires_python: Option<String>,
    /// Every published release, newest first.
    pub versions: Vec<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    #[serde(default)]
    info: ProjectDocumentInfo,
    #[serde(default)]
    releases: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectDocumentInfo {
    name: Option<String>,
    summary: Option<String>,
    requires_python: Option<String>,
}

/// Decodes a `/pypi/<name>/json` document. `requested` names the project
/// when the document omits it.
pub fn parse_project_json(requested: &str, body: &str) -> Result<ProjectInfo> {
    let document: ProjectDocument = serde_json::from_str(body).map_err(|err| {
        Error::upstream(
            INDEX_SERVICE,
            format!("unreadable project document for '{requested}': {err}"),
        )
    })?;

    let mut versions = document.releases.into_keys().collect::<Vec<_>>();
    sort_versions_newest_first(&mut versions);
    let latest = versions.first().cloned();

    Ok(ProjectInfo {
        name: document
            .info
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| requested.to_string()),
        summary: document.info.summary.filter(|summary| !summary.is_empty()),
        requires_python: document
            .info
            .requires_python
            .filter(|requires| !requires.is_empty()),
        versions,
        latest,
    })
}

#[derive(Debug, Clone)]
pub struct IndexClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl IndexClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("birdfingers/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::upstream(INDEX_SERVICE, err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn project_url(&self, name: &str) -> String {
        format!("{}/pypi/{}/json", self.base_url, name.trim())
    }

    /// Looks `name` up on the index. An unknown project is `NotFound`; any
    /// other failure is `UpstreamUnavailable`, never an empty result.
    pub fn project(&self, name: &str) -> Result<ProjectInfo> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidInput(format!("invalid project name: '{name}'")));
        }

        let url = self.project_url(name);
        tracing::debug!(%url, "querying package index");
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| Error::upstream(INDEX_SERVICE, format!("request to {url} failed: {err}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found("project", name));
        }
        if !status.is_success() {
            return Err(Error::upstream(
                INDEX_SERVICE,
                format!("{url} answered {status}"),
            ));
        }

        let body = response.text().map_err(|err| {
            Error::upstream(INDEX_SERVICE, format!("reading {url} failed: {err}"))
        })?;
        parse_project_json(name, &body)
    }
}
