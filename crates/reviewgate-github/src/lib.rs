//! Blocking GitHub REST collaborator. Everything the pipeline needs from
//! GitHub goes through [`GithubClient`]: implicated-PR lookup, review and
//! generic comment fetching, approval submission, review dismissal and
//! labelling. GET responses go through a scoped read-through cache;
//! mutations invalidate the scopes they stale.

mod cache;

pub use cache::ResponseCache;

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::json;

use reviewgate_core::{
    ApprovalSink, ExistingComment, PrMeta, PrNumber, ReviewCommentProvider,
};

const API_ROOT: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
const USER_AGENT_VALUE: &str = concat!("reviewgate/", env!("CARGO_PKG_VERSION"));

/// Bounded retry with exponential backoff for transport errors, 429 and 5xx
/// responses. Other error statuses fail immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (attempt 1 is the first retry).
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub sha: String,
}

/// An open pull request as returned by the pulls endpoint, reduced to the
/// fields the pipeline consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: PrNumber,
    pub title: Option<String>,
    #[serde(default)]
    pub draft: bool,
    pub base: BranchRef,
    pub head: BranchRef,
    pub user: Account,
}

impl PullRequest {
    pub fn meta(&self) -> PrMeta {
        PrMeta {
            title: self.title.clone(),
            base_branch: self.base.name.clone(),
            head_branch: self.head.name.clone(),
            creator: self.user.login.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenericComment {
    pub id: u64,
    pub body: Option<String>,
    pub user: Account,
}

#[derive(Debug, Clone, Deserialize)]
struct ReviewWire {
    id: u64,
    state: String,
    user: Account,
}

#[derive(Debug, Clone, Deserialize)]
struct ReviewCommentWire {
    path: String,
    line: Option<u32>,
    original_line: Option<u32>,
    body: String,
    user: Account,
    pull_request_review_id: Option<u64>,
}

/// One inline comment of a review about to be submitted.
#[derive(Debug, Clone)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

pub struct GithubClient {
    client: Client,
    api_root: String,
    owner: String,
    repo: String,
    retry: RetryPolicy,
    cache: ResponseCache,
    bot_login: Mutex<Option<String>>,
}

impl GithubClient {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("GitHub token contains invalid header characters")?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("build GitHub client")?;

        Ok(Self {
            client,
            api_root: API_ROOT.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            retry: RetryPolicy::default(),
            cache: ResponseCache::default(),
            bot_login: Mutex::new(None),
        })
    }

    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = root.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{tail}", self.api_root, self.owner, self.repo)
    }

    /// Login of the account the token authenticates as. Fetched once and
    /// held for the lifetime of the client.
    pub fn authenticated_user(&self) -> Result<String> {
        if let Ok(guard) = self.bot_login.lock() {
            if let Some(login) = guard.as_ref() {
                return Ok(login.clone());
            }
        }
        let body = self.send_with_retry(|| self.client.get(format!("{}/user", self.api_root)))?;
        let account: Account =
            serde_json::from_str(&body).context("decode authenticated user")?;
        if let Ok(mut guard) = self.bot_login.lock() {
            *guard = Some(account.login.clone());
        }
        Ok(account.login)
    }

    /// Open PRs whose head is the scanned commit, minus ignored base
    /// branches and, optionally, drafts.
    pub fn fetch_implicated_prs(
        &self,
        commit: &str,
        branches_ignore: &[String],
        skip_drafts: bool,
    ) -> Result<Vec<PullRequest>> {
        let pages = self.fetch_paginated("pulls", "pulls?state=open")?;
        let mut prs = Vec::new();
        for page in pages {
            let mut parsed: Vec<PullRequest> =
                serde_json::from_str(&page).context("decode pull request list")?;
            prs.append(&mut parsed);
        }
        Ok(implicated_pull_requests(
            prs,
            commit,
            branches_ignore,
            skip_drafts,
        ))
    }

    /// Non-review (issue) comments on a PR.
    pub fn generic_comments(&self, pr: PrNumber) -> Result<Vec<GenericComment>> {
        let pages = self.fetch_paginated(
            &format!("generic-comments/{pr}"),
            &format!("issues/{pr}/comments"),
        )?;
        let mut comments = Vec::new();
        for page in pages {
            let mut parsed: Vec<GenericComment> =
                serde_json::from_str(&page).context("decode issue comments")?;
            comments.append(&mut parsed);
        }
        Ok(comments)
    }

    /// Submits the remaining issues for a PR as one review with inline
    /// comments. Posting stales the comment and review caches for the PR.
    pub fn post_review(
        &self,
        pr: PrNumber,
        commit: &str,
        body: &str,
        comments: &[InlineComment],
    ) -> Result<()> {
        let inline: Vec<serde_json::Value> = comments
            .iter()
            .map(|c| json!({ "path": c.path, "line": c.line, "body": c.body }))
            .collect();
        let payload = json!({
            "commit_id": commit,
            "body": body,
            "event": "COMMENT",
            "comments": inline,
        });
        let url = self.repo_url(&format!("pulls/{pr}/reviews"));
        self.send_with_retry(|| self.client.post(&url).json(&payload))?;
        self.invalidate_pr(pr);
        Ok(())
    }

    /// Dismisses a review, leaving its comments in the dismissed state.
    pub fn dismiss_review(&self, pr: PrNumber, review_id: u64, message: &str) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{pr}/reviews/{review_id}/dismissals"));
        let payload = json!({ "message": message });
        self.send_with_retry(|| self.client.put(&url).json(&payload))?;
        self.invalidate_pr(pr);
        Ok(())
    }

    pub fn remove_label(&self, pr: PrNumber, label: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/{pr}/labels/{label}"));
        self.send_with_retry(|| self.client.delete(&url))?;
        self.cache.invalidate(&format!("labels/{pr}"));
        Ok(())
    }

    fn reviews(&self, pr: PrNumber) -> Result<Vec<ReviewWire>> {
        let pages =
            self.fetch_paginated(&format!("reviews/{pr}"), &format!("pulls/{pr}/reviews"))?;
        let mut reviews = Vec::new();
        for page in pages {
            let mut parsed: Vec<ReviewWire> =
                serde_json::from_str(&page).context("decode review list")?;
            reviews.append(&mut parsed);
        }
        Ok(reviews)
    }

    fn review_comments(&self, pr: PrNumber, skip_cache: bool) -> Result<Vec<ReviewCommentWire>> {
        let scope = format!("review-comments/{pr}");
        if skip_cache {
            self.cache.invalidate(&scope);
        }
        let pages = self.fetch_paginated(&scope, &format!("pulls/{pr}/comments"))?;
        let mut comments = Vec::new();
        for page in pages {
            let mut parsed: Vec<ReviewCommentWire> =
                serde_json::from_str(&page).context("decode review comments")?;
            comments.append(&mut parsed);
        }
        Ok(comments)
    }

    fn invalidate_pr(&self, pr: PrNumber) {
        self.cache.invalidate(&format!("review-comments/{pr}"));
        self.cache.invalidate(&format!("reviews/{pr}"));
        self.cache.invalidate(&format!("generic-comments/{pr}"));
    }

    /// Fetches every page of a list endpoint, 100 items per page, stopping
    /// on the first short page.
    fn fetch_paginated(&self, scope: &str, tail: &str) -> Result<Vec<String>> {
        let separator = if tail.contains('?') { '&' } else { '?' };
        let mut pages = Vec::new();
        for page in 1.. {
            let url = self.repo_url(&format!("{tail}{separator}per_page={PER_PAGE}&page={page}"));
            let body = self.get_cached(scope, &url)?;
            let items: Vec<serde_json::Value> =
                serde_json::from_str(&body).with_context(|| format!("decode list page {page}"))?;
            let len = items.len();
            pages.push(body);
            if len < PER_PAGE {
                break;
            }
        }
        Ok(pages)
    }

    fn get_cached(&self, scope: &str, url: &str) -> Result<String> {
        if let Some(body) = self.cache.get(scope, url) {
            return Ok(body);
        }
        let body = self.send_with_retry(|| self.client.get(url))?;
        self.cache.put(scope, url, body.clone());
        Ok(body)
    }

    fn send_with_retry(&self, build: impl Fn() -> RequestBuilder) -> Result<String> {
        let mut last_failure: Option<anyhow::Error> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                thread::sleep(self.retry.delay_for(attempt));
            }

            let response = match build().send() {
                Ok(response) => response,
                Err(err) => {
                    last_failure =
                        Some(anyhow::Error::new(err).context("GitHub request transport failure"));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.text().context("read GitHub response body");
            }

            let body = response.text().unwrap_or_default();
            let failure = anyhow!("GitHub returned status {status}: {}", body.trim());
            if status.as_u16() == 429 || status.is_server_error() {
                last_failure = Some(failure);
                continue;
            }
            return Err(failure);
        }

        Err(last_failure.unwrap_or_else(|| anyhow!("GitHub request was never sent")))
            .with_context(|| format!("request failed after {} attempt(s)", self.retry.max_attempts))
    }
}

impl ReviewCommentProvider for GithubClient {
    fn bot_review_comments(
        &self,
        pr: PrNumber,
        skip_cache: bool,
    ) -> Result<Vec<ExistingComment>> {
        let bot = self.authenticated_user()?;
        let reviews = self.reviews(pr)?;
        let comments = self.review_comments(pr, skip_cache)?;
        Ok(existing_comments(comments, &reviews, &bot))
    }
}

impl ApprovalSink for GithubClient {
    fn has_bot_approval(&self, pr: PrNumber) -> Result<bool> {
        let bot = self.authenticated_user()?;
        let reviews = self.reviews(pr)?;
        Ok(reviews
            .iter()
            .any(|review| review.state == "APPROVED" && review.user.login == bot))
    }

    fn submit_approval(&self, pr: PrNumber, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{pr}/reviews"));
        let payload = json!({ "body": body, "event": "APPROVE" });
        self.send_with_retry(|| self.client.post(&url).json(&payload))?;
        self.invalidate_pr(pr);
        Ok(())
    }

    fn add_label(&self, pr: PrNumber, label: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/{pr}/labels"));
        let payload = json!({ "labels": [label] });
        self.send_with_retry(|| self.client.post(&url).json(&payload))?;
        self.cache.invalidate(&format!("labels/{pr}"));
        Ok(())
    }
}

/// Filters an open-PR list down to the PRs implicated by a commit.
fn implicated_pull_requests(
    prs: Vec<PullRequest>,
    commit: &str,
    branches_ignore: &[String],
    skip_drafts: bool,
) -> Vec<PullRequest> {
    prs.into_iter()
        .filter(|pr| pr.head.sha == commit)
        .filter(|pr| !branches_ignore.contains(&pr.base.name))
        .filter(|pr| !(skip_drafts && pr.draft))
        .collect()
}

/// Maps raw review comments to the pipeline's view: only the bot's own
/// comments, each tagged with whether its parent review was dismissed and
/// by which author it was reviewed.
fn existing_comments(
    comments: Vec<ReviewCommentWire>,
    reviews: &[ReviewWire],
    bot_login: &str,
) -> Vec<ExistingComment> {
    comments
        .into_iter()
        .filter(|comment| comment.user.login == bot_login)
        .map(|comment| {
            let parent = comment
                .pull_request_review_id
                .and_then(|id| reviews.iter().find(|review| review.id == id));
            ExistingComment {
                file_name: comment.path,
                line: comment.line.or(comment.original_line).unwrap_or(0),
                body: comment.body,
                from_dismissed_review: parent.is_some_and(|review| review.state == "DISMISSED"),
                review_author: parent
                    .map(|review| review.user.login.clone())
                    .unwrap_or_else(|| bot_login.to_string()),
            }
        })
        .collect()
}
