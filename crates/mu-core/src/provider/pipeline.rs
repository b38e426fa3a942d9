//! Pipeline stage state and the git revision a pipeline last pulled.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::kernel::error::{Error, Result};
use crate::provider::error::ApiResult;

const CODECOMMIT_URL_PATTERN: &str = r"^http(s?)://.+\.console\.aws\.amazon\.com/codecommit/home#/repository/([^/]+)/.+$";
const GITHUB_URL_PATTERN: &str = r"^http(s?)://github\.com/([^/]+)/([^/]+)/.+$";
const SOURCE_ACTION: &str = "Source";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub name: String,
    pub status: Option<String>,
    pub error_details: Option<String>,
    pub revision_id: Option<String>,
    pub entity_url: Option<String>,
    pub last_status_change: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub name: String,
    pub actions: Vec<ActionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GitProvider {
    CodeCommit,
    GitHub,
    S3,
}

impl GitProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitProvider::CodeCommit => "CodeCommit",
            GitProvider::GitHub => "GitHub",
            GitProvider::S3 => "S3",
        }
    }
}

impl fmt::Display for GitProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [GitProvider::CodeCommit, GitProvider::GitHub, GitProvider::S3]
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::parse("source provider", s, "expected CodeCommit, GitHub or S3"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub provider: GitProvider,
    pub repo_name: String,
    pub slug: String,
    pub revision: String,
}

/// Strip the separators a revision id may carry so it can be used as an image tag.
pub fn sanitize_revision(revision: &str) -> String {
    revision.chars().filter(|c| !matches!(c, '.' | '_' | '-')).collect()
}

/// Derive git information from the `Source` action of a pipeline.
pub fn parse_git_info(pipeline_name: &str, stages: &[StageState]) -> Result<GitInfo> {
    let codecommit = Regex::new(CODECOMMIT_URL_PATTERN).map_err(|e| Error::parse("regex", CODECOMMIT_URL_PATTERN, e))?;
    let github = Regex::new(GITHUB_URL_PATTERN).map_err(|e| Error::parse("regex", GITHUB_URL_PATTERN, e))?;

    let source = stages
        .iter()
        .flat_map(|stage| stage.actions.iter())
        .find(|action| action.name == SOURCE_ACTION);
    let Some(source) = source else {
        return Err(Error::Other(format!(
            "Can not obtain git information from CodePipeline: {pipeline_name}"
        )));
    };

    let entity_url = source.entity_url.as_deref().unwrap_or_default();
    let (provider, repo_name, slug) = if let Some(caps) = codecommit.captures(entity_url) {
        let repo = caps[2].to_string();
        (GitProvider::CodeCommit, repo.clone(), repo)
    } else if let Some(caps) = github.captures(entity_url) {
        (GitProvider::GitHub, caps[3].to_string(), format!("{}/{}", &caps[2], &caps[3]))
    } else {
        return Err(Error::Other(format!("Unable to parse entity url: {entity_url}")));
    };

    Ok(GitInfo {
        provider,
        repo_name,
        slug,
        revision: sanitize_revision(source.revision_id.as_deref().unwrap_or_default()),
    })
}

#[async_trait]
pub trait PipelineStateApi: Send + Sync {
    async fn get_pipeline_state(&self, pipeline_name: &str) -> ApiResult<Vec<StageState>>;
}

#[async_trait]
pub trait PipelineManager: Send + Sync {
    async fn list_state(&self, pipeline_name: &str) -> Result<Vec<StageState>>;

    async fn get_git_info(&self, pipeline_name: &str) -> Result<GitInfo>;
}

pub struct CodePipelineManager {
    api: Arc<dyn PipelineStateApi>,
}

impl CodePipelineManager {
    pub fn new(api: Arc<dyn PipelineStateApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PipelineManager for CodePipelineManager {
    async fn list_state(&self, pipeline_name: &str) -> Result<Vec<StageState>> {
        debug!("Searching for pipeline state for pipeline named '{pipeline_name}'");
        self.api
            .get_pipeline_state(pipeline_name)
            .await
            .map_err(|e| Error::provider("GetPipelineState", pipeline_name, e))
    }

    async fn get_git_info(&self, pipeline_name: &str) -> Result<GitInfo> {
        let stages = self.list_state(pipeline_name).await?;
        parse_git_info(pipeline_name, &stages)
    }
}
