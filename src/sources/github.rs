//! GitHub REST adapters: repository files, organization sweeps, issues.
//!
//! All three share a small [`GithubClient`] over the REST v3 API. Auth
//! (401/403) and missing-target (404) responses are structural failures that
//! abort the stream; individual file or comment fetches that fail are
//! skipped with a warning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{
    IngestSource, IssueState, ItemStream, RepoVisibility, Result, SourceContext, SourceError,
    ext_allowed,
};
use crate::model::{IngestItem, Metadata};

const JSON_ACCEPT: &str = "application/vnd.github+json";
const RAW_ACCEPT: &str = "application/vnd.github.raw+json";
const PAGE_SIZE: u32 = 100;

/// Minimal GitHub REST client.
pub(crate) struct GithubClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(ctx: &SourceContext) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(ctx.request_timeout)
            .user_agent(ctx.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;
        Ok(Arc::new(Self {
            client,
            api_base: ctx.github_api_base.trim_end_matches('/').to_string(),
            token: ctx.github_token.clone(),
        }))
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn absolute(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}/{}", self.api_base, path_or_url.trim_start_matches('/'))
        }
    }

    async fn send(&self, url: &str, accept: &str, what: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).header(header::ACCEPT, accept);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(what.to_string())
            } else {
                SourceError::Request(format!("{what}: {e}"))
            }
        })?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Auth(format!(
                "{what}: HTTP {}",
                response.status()
            ))),
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(what.to_string())),
            status => Err(SourceError::Request(format!("{what}: HTTP {status}"))),
        }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path_or_url: &str,
        what: &str,
    ) -> Result<T> {
        let url = self.absolute(path_or_url);
        let response = self.send(&url, JSON_ACCEPT, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(format!("{what}: {e}")))
    }

    pub async fn get_raw(&self, url: &Url, what: &str) -> Result<String> {
        let response = self.send(url.as_str(), RAW_ACCEPT, what).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Request(format!("{what}: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Parse `owner` and `repo` from an HTTPS repository URL.
pub(crate) fn parse_owner_repo(repo_url: &str) -> Result<(String, String)> {
    let trimmed = repo_url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut parts = trimmed.rsplit('/');
    let name = parts.next().filter(|s| !s.is_empty());
    let owner = parts.next().filter(|s| !s.is_empty());
    match (owner, name) {
        (Some(owner), Some(name)) => Ok((owner.to_string(), name.to_string())),
        _ => Err(SourceError::Malformed(format!(
            "cannot parse owner/repo from '{repo_url}'"
        ))),
    }
}

fn contents_url(api_base: &str, owner: &str, name: &str, path: &str, git_ref: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{api_base}/repos/{owner}/{name}/contents"))
        .map_err(|e| SourceError::Malformed(format!("bad api base: {e}")))?;
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.extend(path.split('/'));
        }
        Err(()) => {
            return Err(SourceError::Malformed(format!(
                "api base cannot carry paths: {api_base}"
            )));
        }
    }
    url.query_pairs_mut().append_pair("ref", git_ref);
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct OrgRepo {
    html_url: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    state: String,
    html_url: String,
    comments_url: String,
    #[serde(default)]
    comments: u64,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Comment {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
    commit: CommitMeta,
    #[serde(default)]
    author: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct CommitMeta {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    date: Option<String>,
}

/// Streams the files of one repository through the REST API.
pub struct GithubRepoSource {
    repo_url: String,
    branch: Option<String>,
    exts: Vec<String>,
    commit_metadata: bool,
    client: Arc<GithubClient>,
}

impl GithubRepoSource {
    pub fn new(
        repo_url: String,
        branch: Option<String>,
        exts: Vec<String>,
        ctx: &SourceContext,
    ) -> Result<Self> {
        Ok(Self::from_client(
            repo_url,
            branch,
            exts,
            ctx.github_commit_metadata,
            GithubClient::new(ctx)?,
        ))
    }

    fn from_client(
        repo_url: String,
        branch: Option<String>,
        exts: Vec<String>,
        commit_metadata: bool,
        client: Arc<GithubClient>,
    ) -> Self {
        Self {
            repo_url,
            branch,
            exts,
            commit_metadata,
            client,
        }
    }
}

#[async_trait]
impl IngestSource for GithubRepoSource {
    fn describe(&self) -> String {
        format!("github_repo({})", self.repo_url)
    }

    async fn stream(&self) -> Result<ItemStream> {
        let (owner, name) = parse_owner_repo(&self.repo_url)?;
        let what = format!("repository {owner}/{name}");
        let info: RepoInfo = self
            .client
            .get_json(&format!("repos/{owner}/{name}"), &what)
            .await?;
        let git_ref = self
            .branch
            .clone()
            .unwrap_or_else(|| info.default_branch.clone());

        let tree: TreeResponse = self
            .client
            .get_json(
                &format!("repos/{owner}/{name}/git/trees/{git_ref}?recursive=1"),
                &format!("tree of {owner}/{name}@{git_ref}"),
            )
            .await?;
        let exts = self.exts.clone();
        let entries: Vec<TreeEntry> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob" && ext_allowed(&entry.path, &exts))
            .collect();
        info!(repo = %info.html_url, git_ref = %git_ref, files = entries.len(), "Listed repository tree");

        let client = self.client.clone();
        let html_url = info.html_url;
        let with_commits = self.commit_metadata;
        let stream = futures::stream::iter(entries)
            .then(move |entry| {
                let client = client.clone();
                let owner = owner.clone();
                let name = name.clone();
                let git_ref = git_ref.clone();
                let html_url = html_url.clone();
                async move {
                    fetch_file_item(
                        &client,
                        &owner,
                        &name,
                        &git_ref,
                        &html_url,
                        &entry.path,
                        with_commits,
                    )
                    .await
                }
            })
            .filter_map(|result| async move {
                match result {
                    Ok(Some(item)) => Some(Ok(item)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            });
        Ok(stream.boxed())
    }
}

/// Fetch one file and build its item. `Ok(None)` means "skipped".
async fn fetch_file_item(
    client: &GithubClient,
    owner: &str,
    name: &str,
    git_ref: &str,
    html_url: &str,
    path: &str,
    with_commits: bool,
) -> Result<Option<IngestItem>> {
    let what = format!("{owner}/{name}:{path}");
    let url = contents_url(client.api_base(), owner, name, path, git_ref)?;
    let text = match client.get_raw(&url, &what).await {
        Ok(text) => text,
        Err(SourceError::Auth(e)) => return Err(SourceError::Auth(e)),
        Err(e) => {
            warn!(file = %what, error = %e, "Skipping file");
            return Ok(None);
        }
    };

    let mut metadata = Metadata::new();
    metadata.insert("repo".into(), Value::from(html_url));
    metadata.insert("file_path".into(), Value::from(path));
    metadata.insert(
        "source_url".into(),
        Value::from(format!("{html_url}/blob/{git_ref}/{path}")),
    );
    metadata.insert("branch".into(), Value::from(git_ref));

    if with_commits {
        if let Some(commit) = last_commit(client, owner, name, git_ref, path).await {
            metadata.insert("commit_sha".into(), Value::from(commit.sha));
            metadata.insert("commit_message".into(), Value::from(commit.commit.message));
            if let Some(date) = commit.commit.author.and_then(|a| a.date) {
                metadata.insert("commit_date".into(), Value::from(date));
            }
            if let Some(author) = commit.author {
                metadata.insert("commit_author".into(), Value::from(author.login));
            }
        }
    }

    Ok(Some(IngestItem::new(
        format!("{html_url}@{path}"),
        text,
        metadata,
    )))
}

/// Last commit touching `path` on `git_ref`, best effort.
async fn last_commit(
    client: &GithubClient,
    owner: &str,
    name: &str,
    git_ref: &str,
    path: &str,
) -> Option<CommitEntry> {
    let mut url = Url::parse(&format!(
        "{}/repos/{owner}/{name}/commits",
        client.api_base()
    ))
    .ok()?;
    url.query_pairs_mut()
        .append_pair("path", path)
        .append_pair("sha", git_ref)
        .append_pair("per_page", "1");
    match client
        .get_json::<Vec<CommitEntry>>(url.as_str(), &format!("commits for {path}"))
        .await
    {
        Ok(commits) => commits.into_iter().next(),
        Err(e) => {
            warn!(path, error = %e, "Commit metadata unavailable");
            None
        }
    }
}

/// Streams every matching repository of an organization.
pub struct GithubOrgSource {
    org: String,
    visibility: RepoVisibility,
    include_archived: bool,
    topics: Vec<String>,
    branch: Option<String>,
    exts: Vec<String>,
    commit_metadata: bool,
    client: Arc<GithubClient>,
}

impl GithubOrgSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        org: String,
        visibility: RepoVisibility,
        include_archived: bool,
        topics: Vec<String>,
        branch: Option<String>,
        exts: Vec<String>,
        ctx: &SourceContext,
    ) -> Result<Self> {
        Ok(Self {
            org,
            visibility,
            include_archived,
            topics,
            branch,
            exts,
            commit_metadata: ctx.github_commit_metadata,
            client: GithubClient::new(ctx)?,
        })
    }

    /// Paginated repository listing with archived/topic filters applied.
    async fn list_repo_urls(&self) -> Result<Vec<String>> {
        let what = format!("organization {}", self.org);
        let mut urls = Vec::new();
        let mut page = 1u32;
        loop {
            let path = format!(
                "orgs/{}/repos?type={}&per_page={PAGE_SIZE}&page={page}",
                self.org,
                self.visibility.as_str()
            );
            let repos: Vec<OrgRepo> = self.client.get_json(&path, &what).await?;
            if repos.is_empty() {
                break;
            }
            for repo in repos {
                if !self.include_archived && repo.archived {
                    continue;
                }
                if !self.topics.is_empty()
                    && !self.topics.iter().all(|t| repo.topics.contains(t))
                {
                    continue;
                }
                urls.push(repo.html_url);
            }
            page += 1;
        }
        info!(org = %self.org, repos = urls.len(), "Discovered organization repositories");
        Ok(urls)
    }
}

#[async_trait]
impl IngestSource for GithubOrgSource {
    fn describe(&self) -> String {
        format!("github_org({})", self.org)
    }

    async fn stream(&self) -> Result<ItemStream> {
        let repos = self.list_repo_urls().await?;
        let sources: Vec<GithubRepoSource> = repos
            .into_iter()
            .map(|html_url| {
                GithubRepoSource::from_client(
                    html_url,
                    self.branch.clone(),
                    self.exts.clone(),
                    self.commit_metadata,
                    self.client.clone(),
                )
            })
            .collect();
        let stream = futures::stream::iter(sources)
            .then(|source| async move { source.stream().await })
            .try_flatten();
        Ok(stream.boxed())
    }
}

/// Streams the issues of one repository, optionally with comments.
pub struct GithubIssuesSource {
    repo_url: String,
    state: IssueState,
    labels: Vec<String>,
    include_comments: bool,
    client: Arc<GithubClient>,
}

impl GithubIssuesSource {
    pub fn new(
        repo_url: String,
        state: IssueState,
        labels: Vec<String>,
        include_comments: bool,
        ctx: &SourceContext,
    ) -> Result<Self> {
        Ok(Self {
            repo_url,
            state,
            labels,
            include_comments,
            client: GithubClient::new(ctx)?,
        })
    }
}

#[async_trait]
impl IngestSource for GithubIssuesSource {
    fn describe(&self) -> String {
        format!("github_issues({})", self.repo_url)
    }

    async fn stream(&self) -> Result<ItemStream> {
        let (owner, name) = parse_owner_repo(&self.repo_url)?;
        let what = format!("issues of {owner}/{name}");
        let info: RepoInfo = self
            .client
            .get_json(
                &format!("repos/{owner}/{name}"),
                &format!("repository {owner}/{name}"),
            )
            .await?;

        let client = self.client.clone();
        let state = self.state;
        let labels = self.labels.join(",");
        let pages = futures::stream::try_unfold(1u32, move |page| {
            let client = client.clone();
            let owner = owner.clone();
            let name = name.clone();
            let labels = labels.clone();
            let what = what.clone();
            async move {
                let mut path = format!(
                    "repos/{owner}/{name}/issues?state={}&per_page={PAGE_SIZE}&page={page}",
                    state.as_str()
                );
                if !labels.is_empty() {
                    path.push_str("&labels=");
                    path.push_str(&labels);
                }
                let issues: Vec<Issue> = client.get_json(&path, &what).await?;
                Ok::<_, SourceError>(if issues.is_empty() {
                    None
                } else {
                    Some((issues, page + 1))
                })
            }
        });

        let client = self.client.clone();
        let repo_html = info.html_url;
        let include_comments = self.include_comments;
        let stream = pages
            .map_ok(|page| futures::stream::iter(page.into_iter().map(Ok::<_, SourceError>)))
            .try_flatten()
            .try_filter(|issue| futures::future::ready(issue.pull_request.is_none()))
            .and_then(move |issue| {
                let client = client.clone();
                let repo_html = repo_html.clone();
                async move { Ok(issue_item(&client, &repo_html, issue, include_comments).await) }
            });
        Ok(stream.boxed())
    }
}

async fn issue_item(
    client: &GithubClient,
    repo_html: &str,
    issue: Issue,
    include_comments: bool,
) -> IngestItem {
    let title = issue.title.unwrap_or_default();
    let body = issue.body.unwrap_or_default();
    let mut text = format!("{title}\n\n{body}");

    if include_comments && issue.comments > 0 {
        match fetch_comments(client, &issue.comments_url).await {
            Ok(comments) if !comments.is_empty() => {
                text.push_str("\n\n--- Comments ---\n");
                text.push_str(&comments.join("\n\n"));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(issue = issue.number, error = %e, "Skipping comments");
            }
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert("repo".into(), Value::from(repo_html));
    metadata.insert("issue_number".into(), Value::from(issue.number));
    metadata.insert("title".into(), Value::from(title));
    metadata.insert("state".into(), Value::from(issue.state));
    metadata.insert(
        "labels".into(),
        Value::from(
            issue
                .labels
                .into_iter()
                .map(|l| Value::from(l.name))
                .collect::<Vec<_>>(),
        ),
    );
    metadata.insert("source_url".into(), Value::from(issue.html_url.clone()));

    IngestItem::new(issue.html_url, text, metadata)
}

async fn fetch_comments(client: &GithubClient, comments_url: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut page = 1u32;
    loop {
        let url = format!("{comments_url}?per_page={PAGE_SIZE}&page={page}");
        let comments: Vec<Comment> = client.get_json(&url, "issue comments").await?;
        if comments.is_empty() {
            break;
        }
        for comment in comments {
            let author = comment.user.map(|u| u.login).unwrap_or_default();
            let body = comment.body.unwrap_or_default();
            out.push(format!("[ {author} ]\n{body}"));
        }
        page += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_repo_parsing() {
        assert_eq!(
            parse_owner_repo("https://github.com/acme/widgets").unwrap(),
            ("acme".to_string(), "widgets".to_string())
        );
        assert_eq!(
            parse_owner_repo("https://github.com/acme/widgets.git/").unwrap(),
            ("acme".to_string(), "widgets".to_string())
        );
        assert!(parse_owner_repo("widgets").is_err());
    }

    #[test]
    fn contents_url_encodes_path_segments() {
        let url = contents_url(
            "https://api.github.com",
            "acme",
            "widgets",
            "docs/release notes.md",
            "main",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/widgets/contents/docs/release%20notes.md?ref=main"
        );
    }

    #[test]
    fn issue_json_shape_parses() {
        let issue: Issue = serde_json::from_str(
            r#"{
                "number": 7,
                "title": "Crash on start",
                "body": null,
                "state": "open",
                "html_url": "https://github.com/acme/widgets/issues/7",
                "comments_url": "https://api.github.com/repos/acme/widgets/issues/7/comments",
                "comments": 2,
                "labels": [{"name": "bug"}]
            }"#,
        )
        .unwrap();
        assert_eq!(issue.number, 7);
        assert!(issue.pull_request.is_none());
        assert_eq!(issue.labels[0].name, "bug");
    }
}
