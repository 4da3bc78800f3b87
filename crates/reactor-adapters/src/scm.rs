//! Source-hosting client (§6): list pull requests, get PR by number, list PR
//! files, create PR, add PR comment, merge PR, list recent commits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub head_branch: String,
    pub base_branch: String,
    pub is_merged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    #[error("source-hosting request failed: {0}")]
    Request(String),
    #[error("pull request not found: {0}")]
    NotFound(u64),
}

pub type ScmResult<T> = Result<T, ScmError>;

#[async_trait]
pub trait SourceHostingClient: Send + Sync {
    async fn list_pull_requests(&self, repo: &str, state: &str) -> ScmResult<Vec<PullRequest>>;
    async fn get_pull_request(&self, repo: &str, number: u64) -> ScmResult<PullRequest>;
    async fn list_pr_files(&self, repo: &str, number: u64) -> ScmResult<Vec<String>>;
    async fn create_pull_request(
        &self,
        repo: &str,
        head_branch: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> ScmResult<PullRequest>;
    async fn add_pr_comment(&self, repo: &str, number: u64, body: &str) -> ScmResult<()>;
    async fn merge_pull_request(&self, repo: &str, number: u64) -> ScmResult<()>;
    async fn list_recent_commits(&self, repo: &str, branch: &str, limit: u32) -> ScmResult<Vec<Commit>>;

    /// The `merge` node (§7) must be idempotent: it is executed at most once
    /// and guarded by a prior check for an open PR. This helper finds that
    /// open PR, if any, so the workflow driver never double-merges.
    async fn find_open_pr_for_branch(&self, repo: &str, head_branch: &str) -> ScmResult<Option<PullRequest>> {
        let open = self.list_pull_requests(repo, "open").await?;
        Ok(open.into_iter().find(|pr| pr.head_branch == head_branch))
    }
}

pub struct RestScmClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl RestScmClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.token)
    }
}

#[async_trait]
impl SourceHostingClient for RestScmClient {
    async fn list_pull_requests(&self, repo: &str, state: &str) -> ScmResult<Vec<PullRequest>> {
        let url = format!("{}/repos/{repo}/pulls?state={state}", self.api_base);
        let response = self
            .auth(self.http.get(url))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ScmError::Request(e.to_string()))
    }

    async fn get_pull_request(&self, repo: &str, number: u64) -> ScmResult<PullRequest> {
        let url = format!("{}/repos/{repo}/pulls/{number}", self.api_base);
        let response = self
            .auth(self.http.get(url))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScmError::NotFound(number));
        }
        response.json().await.map_err(|e| ScmError::Request(e.to_string()))
    }

    async fn list_pr_files(&self, repo: &str, number: u64) -> ScmResult<Vec<String>> {
        let url = format!("{}/repos/{repo}/pulls/{number}/files", self.api_base);
        let response = self
            .auth(self.http.get(url))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        let files: Vec<serde_json::Value> = response.json().await.map_err(|e| ScmError::Request(e.to_string()))?;
        Ok(files
            .into_iter()
            .filter_map(|f| f["filename"].as_str().map(str::to_string))
            .collect())
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        head_branch: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> ScmResult<PullRequest> {
        let url = format!("{}/repos/{repo}/pulls", self.api_base);
        let response = self
            .auth(self.http.post(url))
            .json(&serde_json::json!({
                "title": title,
                "body": body,
                "head": head_branch,
                "base": base_branch,
            }))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        response.json().await.map_err(|e| ScmError::Request(e.to_string()))
    }

    async fn add_pr_comment(&self, repo: &str, number: u64, body: &str) -> ScmResult<()> {
        let url = format!("{}/repos/{repo}/issues/{number}/comments", self.api_base);
        self.auth(self.http.post(url))
            .json(&serde_json::json!({"body": body}))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        Ok(())
    }

    async fn merge_pull_request(&self, repo: &str, number: u64) -> ScmResult<()> {
        let url = format!("{}/repos/{repo}/pulls/{number}/merge", self.api_base);
        let response = self
            .auth(self.http.put(url))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScmError::Request(format!("merge failed with status {}", response.status())));
        }
        Ok(())
    }

    async fn list_recent_commits(&self, repo: &str, branch: &str, limit: u32) -> ScmResult<Vec<Commit>> {
        let url = format!("{}/repos/{repo}/commits?sha={branch}&per_page={limit}", self.api_base);
        let response = self
            .auth(self.http.get(url))
            .send()
            .await
            .map_err(|e| ScmError::Request(e.to_string()))?;
        let raw: Vec<serde_json::Value> = response.json().await.map_err(|e| ScmError::Request(e.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|c| Commit {
                sha: c["sha"].as_str().unwrap_or_default().to_string(),
                message: c["commit"]["message"].as_str().unwrap_or_default().to_string(),
                author: c["commit"]["author"]["name"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeScm {
        open_prs: Vec<PullRequest>,
    }

    #[async_trait]
    impl SourceHostingClient for FakeScm {
        async fn list_pull_requests(&self, _repo: &str, _state: &str) -> ScmResult<Vec<PullRequest>> {
            Ok(self.open_prs.clone())
        }
        async fn get_pull_request(&self, _repo: &str, number: u64) -> ScmResult<PullRequest> {
            self.open_prs
                .iter()
                .find(|pr| pr.number == number)
                .cloned()
                .ok_or(ScmError::NotFound(number))
        }
        async fn list_pr_files(&self, _repo: &str, _number: u64) -> ScmResult<Vec<String>> {
            Ok(vec![])
        }
        async fn create_pull_request(
            &self,
            _repo: &str,
            _head: &str,
            _base: &str,
            _title: &str,
            _body: &str,
        ) -> ScmResult<PullRequest> {
            unimplemented!()
        }
        async fn add_pr_comment(&self, _repo: &str, _number: u64, _body: &str) -> ScmResult<()> {
            Ok(())
        }
        async fn merge_pull_request(&self, _repo: &str, _number: u64) -> ScmResult<()> {
            Ok(())
        }
        async fn list_recent_commits(&self, _repo: &str, _branch: &str, _limit: u32) -> ScmResult<Vec<Commit>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn find_open_pr_matches_branch() {
        let client = FakeScm {
            open_prs: vec![PullRequest {
                number: 7,
                title: "t".into(),
                state: "open".into(),
                head_branch: "reactor/task-1-run-2".into(),
                base_branch: "main".into(),
                is_merged: false,
            }],
        };
        let found = client
            .find_open_pr_for_branch("org/repo", "reactor/task-1-run-2")
            .await
            .unwrap();
        assert!(found.is_some());
        let missing = client
            .find_open_pr_for_branch("org/repo", "reactor/task-1-run-9")
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
