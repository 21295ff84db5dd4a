//! Source adapters: each yields a finite, restartable stream of ingest items.
//!
//! A [`SourceSpec`] is the wire-level description of a source (tagged by
//! `type`); unknown tags fail deserialization, so a bad spec is rejected at
//! enqueue time and never reaches a worker. [`build_sources`] turns a spec
//! list into a [`CompositeSource`] that concatenates the adapters' streams.
//!
//! Adapter contract: stable `doc_id`s, SHA-256 checksums over the emitted
//! text (enforced by the `IngestItem` constructor), `source_url` metadata
//! where a URL exists. Adapters may skip individual items they cannot fetch
//! but raise on authentication and structural failures.

pub mod chunking;
pub mod filesystem;
pub mod git_local;
pub mod github;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{IngestItem, Manifest};

pub use chunking::ChunkingSource;
pub use filesystem::FilesystemSource;
pub use git_local::GitCloneSource;
pub use github::{GithubIssuesSource, GithubOrgSource, GithubRepoSource};
pub use web::{SitemapSource, UrlSource, WebsiteSource};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Lazy finite sequence of items; consumed once per job.
pub type ItemStream = BoxStream<'static, Result<IngestItem>>;

#[async_trait]
pub trait IngestSource: Send + Sync {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// Start an independent traversal of the source.
    async fn stream(&self) -> Result<ItemStream>;
}

/// Runtime knobs shared by the adapters.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub default_exts: Vec<String>,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub github_api_base: String,
    pub github_token: Option<String>,
    pub github_commit_metadata: bool,
    pub staging_dir: PathBuf,
}

impl SourceContext {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            default_exts: cfg.ingest.default_exts.clone(),
            user_agent: cfg.ingest.user_agent.clone(),
            request_timeout: Duration::from_secs(cfg.ingest.request_timeout_secs),
            github_api_base: cfg.ingest.github_api_base.clone(),
            github_token: cfg.ingest.github_token.clone(),
            github_commit_metadata: cfg.ingest.github_commit_metadata,
            staging_dir: cfg.ingest.staging_dir.clone(),
        }
    }

    fn exts_or_default(&self, exts: &Option<Vec<String>>) -> Vec<String> {
        exts.clone().unwrap_or_else(|| self.default_exts.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoVisibility {
    All,
    Public,
    Private,
}

impl RepoVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoVisibility::All => "all",
            RepoVisibility::Public => "public",
            RepoVisibility::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    All,
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::All => "all",
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

/// Wire-level source description, dispatched exhaustively by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    GithubRepo {
        repo: String,
        branch: Option<String>,
        exts: Option<Vec<String>>,
    },
    GithubRepoLocal {
        repo: String,
        branch: Option<String>,
        exts: Option<Vec<String>>,
        shallow: Option<bool>,
        fetch_depth: Option<u32>,
    },
    GithubOrg {
        org: String,
        visibility: Option<RepoVisibility>,
        include_archived: Option<bool>,
        topics: Option<Vec<String>>,
        branch: Option<String>,
        exts: Option<Vec<String>>,
    },
    GithubIssues {
        repo: String,
        state: Option<IssueState>,
        labels: Option<Vec<String>>,
        include_comments: Option<bool>,
    },
    LocalDir {
        path: PathBuf,
        repo_url: String,
        exts: Option<Vec<String>>,
    },
    WebUrl {
        urls: Vec<String>,
    },
    Website {
        start_urls: Vec<String>,
        allowed_prefixes: Option<Vec<String>>,
        max_pages: Option<usize>,
    },
    Sitemap {
        sitemap_url: String,
        limit: Option<usize>,
    },
}

/// Build a single adapter from a spec.
pub fn build_source(spec: &SourceSpec, ctx: &SourceContext) -> Result<Arc<dyn IngestSource>> {
    let source: Arc<dyn IngestSource> = match spec {
        SourceSpec::GithubRepo { repo, branch, exts } => Arc::new(GithubRepoSource::new(
            repo.clone(),
            branch.clone(),
            ctx.exts_or_default(exts),
            ctx,
        )?),
        SourceSpec::GithubRepoLocal {
            repo,
            branch,
            exts,
            shallow,
            fetch_depth,
        } => Arc::new(GitCloneSource::new(
            repo.clone(),
            branch.clone(),
            ctx.exts_or_default(exts),
            shallow.unwrap_or(true),
            fetch_depth.unwrap_or(50),
            ctx.staging_dir.join("repos"),
        )),
        SourceSpec::GithubOrg {
            org,
            visibility,
            include_archived,
            topics,
            branch,
            exts,
        } => Arc::new(GithubOrgSource::new(
            org.clone(),
            visibility.unwrap_or(RepoVisibility::All),
            include_archived.unwrap_or(false),
            topics.clone().unwrap_or_default(),
            branch.clone(),
            ctx.exts_or_default(exts),
            ctx,
        )?),
        SourceSpec::GithubIssues {
            repo,
            state,
            labels,
            include_comments,
        } => Arc::new(GithubIssuesSource::new(
            repo.clone(),
            state.unwrap_or(IssueState::All),
            labels.clone().unwrap_or_default(),
            include_comments.unwrap_or(true),
            ctx,
        )?),
        SourceSpec::LocalDir {
            path,
            repo_url,
            exts,
        } => Arc::new(FilesystemSource::new(
            path.clone(),
            repo_url.clone(),
            ctx.exts_or_default(exts),
        )),
        SourceSpec::WebUrl { urls } => Arc::new(UrlSource::new(urls.clone(), ctx)?),
        SourceSpec::Website {
            start_urls,
            allowed_prefixes,
            max_pages,
        } => Arc::new(WebsiteSource::new(
            start_urls.clone(),
            allowed_prefixes.clone().unwrap_or_default(),
            max_pages.unwrap_or(100),
            ctx,
        )?),
        SourceSpec::Sitemap { sitemap_url, limit } => {
            Arc::new(SitemapSource::new(sitemap_url.clone(), *limit, ctx)?)
        }
    };
    Ok(source)
}

/// Build a composite over a spec list.
pub fn build_sources(specs: &[SourceSpec], ctx: &SourceContext) -> Result<CompositeSource> {
    let sources = specs
        .iter()
        .map(|spec| build_source(spec, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(CompositeSource::new(sources))
}

/// Concatenates the streams of several sources, in order.
pub struct CompositeSource {
    sources: Vec<Arc<dyn IngestSource>>,
}

impl CompositeSource {
    pub fn new(sources: Vec<Arc<dyn IngestSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl IngestSource for CompositeSource {
    fn describe(&self) -> String {
        let parts: Vec<String> = self.sources.iter().map(|s| s.describe()).collect();
        format!("composite[{}]", parts.join(", "))
    }

    async fn stream(&self) -> Result<ItemStream> {
        let sources = self.sources.clone();
        let stream = futures::stream::iter(sources)
            .then(|source| async move { source.stream().await })
            .try_flatten();
        Ok(stream.boxed())
    }
}

/// Drain a source into an immutable manifest.
pub async fn materialize(source: &dyn IngestSource) -> Result<Manifest> {
    let items: Vec<IngestItem> = source.stream().await?.try_collect().await?;
    Ok(Manifest::from_items(items))
}

/// True when `path` ends with one of `exts` (entries carry the leading dot).
/// An empty list allows everything.
pub(crate) fn ext_allowed(path: &str, exts: &[String]) -> bool {
    exts.is_empty() || exts.iter().any(|ext| path.ends_with(ext.as_str()))
}
