//! MediaWiki Action API client: revision diffs (`action=compare`) and the alert pages
//! (`action=query` / `action=edit`).

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::alerts::{AlertDocument, DocumentError, PageSnapshot};
use crate::diff::{parse_html_diff, DiffError, DiffProvider};
use crate::model::DiffContext;

/// HTTP client with the User-Agent Wikimedia requires.
pub fn build_http_client(user_agent: &str) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .context("building http client")
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    error: Option<ApiError>,
    compare: Option<Compare>,
}

#[derive(Debug, Deserialize)]
struct Compare {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    error: Option<ApiError>,
    query: Option<Query>,
}

#[derive(Debug, Deserialize)]
struct Query {
    #[serde(default)]
    pages: Vec<Page>,
    tokens: Option<Tokens>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<PageRevision>,
}

#[derive(Debug, Deserialize)]
struct PageRevision {
    timestamp: String,
    slots: Slots,
}

#[derive(Debug, Deserialize)]
struct Slots {
    main: Slot,
}

#[derive(Debug, Deserialize)]
struct Slot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    csrftoken: String,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    error: Option<ApiError>,
    edit: Option<EditResult>,
}

#[derive(Debug, Deserialize)]
struct EditResult {
    result: String,
}

/// Map an API error code onto the document error taxonomy.
fn api_error(err: ApiError) -> DocumentError {
    match err.code.as_str() {
        "editconflict" | "articleexists" => DocumentError::Conflict(err.info),
        "permissiondenied" | "badtoken" | "notloggedin" | "assertuserfailed"
        | "assertbotfailed" | "blocked" | "autoblocked" | "protectedpage"
        | "cascadeprotected" | "readonly" | "mwoauth-invalid-authorization" => {
            DocumentError::Permission(format!("{}: {}", err.code, err.info))
        }
        _ => DocumentError::Transport(anyhow!("api error {}: {}", err.code, err.info)),
    }
}

fn check(err: Option<ApiError>) -> Result<(), DocumentError> {
    match err {
        Some(e) => Err(api_error(e)),
        None => Ok(()),
    }
}

impl From<DocumentError> for DiffError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Malformed(m) => DiffError::Malformed(m),
            DocumentError::Transport(e) => DiffError::Transport(e),
            other => DiffError::Transport(anyhow!(other.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct WikiClient {
    http: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
    timeout: Duration,
}

impl WikiClient {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            access_token: None,
            timeout,
        }
    }

    /// OAuth 2 owner-only access token, sent as a bearer token.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let rb = rb
            .query(&[("format", "json"), ("formatversion", "2")])
            .timeout(self.timeout);
        match &self.access_token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        rb: reqwest::RequestBuilder,
    ) -> Result<T, DocumentError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .context("mediawiki api request")?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DocumentError::Permission(format!("http {status}")));
        }
        if !status.is_success() {
            return Err(DocumentError::Transport(anyhow!("mediawiki api http {status}")));
        }
        let body = resp.text().await.context("mediawiki api body")?;
        serde_json::from_str(&body).map_err(|e| DocumentError::Malformed(e.to_string()))
    }

    async fn csrf_token(&self) -> Result<String, DocumentError> {
        let rb = self.http.get(&self.api_url).query(&[
            ("action", "query"),
            ("meta", "tokens"),
            ("type", "csrf"),
        ]);
        let resp: QueryResponse = self.send_json(rb).await?;
        check(resp.error)?;
        resp.query
            .and_then(|q| q.tokens)
            .map(|t| t.csrftoken)
            .ok_or_else(|| DocumentError::Malformed("no csrf token in response".into()))
    }
}

#[async_trait]
impl DiffProvider for WikiClient {
    async fn fetch_diff(&self, old: u64, new: u64) -> Result<DiffContext, DiffError> {
        let (old, new) = (old.to_string(), new.to_string());
        let rb = self.http.get(&self.api_url).query(&[
            ("action", "compare"),
            ("fromrev", old.as_str()),
            ("torev", new.as_str()),
            ("prop", "diff"),
        ]);
        let resp: CompareResponse = self.send_json(rb).await?;
        if let Some(err) = resp.error {
            // unknown/deleted revisions will never diff
            return Err(match err.code.as_str() {
                "nosuchrevid" | "missingcontent" | "permissiondenied" => {
                    DiffError::Malformed(format!("{}: {}", err.code, err.info))
                }
                _ => api_error(err).into(),
            });
        }
        let body = resp
            .compare
            .and_then(|c| c.body)
            .ok_or_else(|| DiffError::Malformed("compare response without body".into()))?;
        Ok(parse_html_diff(&body))
    }

    fn name(&self) -> &'static str {
        "mediawiki-compare"
    }
}

#[async_trait]
impl AlertDocument for WikiClient {
    async fn read(&self, page: &str) -> Result<Option<PageSnapshot>, DocumentError> {
        let rb = self.http.get(&self.api_url).query(&[
            ("action", "query"),
            ("prop", "revisions"),
            ("titles", page),
            ("rvprop", "content|timestamp"),
            ("rvslots", "main"),
        ]);
        let resp: QueryResponse = self.send_json(rb).await?;
        check(resp.error)?;
        let page = resp
            .query
            .and_then(|q| q.pages.into_iter().next())
            .ok_or_else(|| DocumentError::Malformed("query response without pages".into()))?;
        if page.missing {
            return Ok(None);
        }
        let rev = page
            .revisions
            .into_iter()
            .next()
            .ok_or_else(|| DocumentError::Malformed("page without revisions".into()))?;
        Ok(Some(PageSnapshot {
            text: rev.slots.main.content,
            base: rev.timestamp,
        }))
    }

    async fn write(
        &self,
        page: &str,
        text: &str,
        base: Option<&PageSnapshot>,
        summary: &str,
    ) -> Result<(), DocumentError> {
        let token = self.csrf_token().await?;
        let mut form = vec![
            ("action", "edit"),
            ("title", page),
            ("text", text),
            ("summary", summary),
            ("bot", "1"),
            ("token", token.as_str()),
        ];
        match base {
            Some(b) => form.push(("basetimestamp", b.base.as_str())),
            None => form.push(("createonly", "1")),
        }
        let rb = self.http.post(&self.api_url).form(&form);
        let resp: EditResponse = self.send_json(rb).await?;
        check(resp.error)?;
        match resp.edit {
            Some(e) if e.result == "Success" => Ok(()),
            Some(e) => Err(DocumentError::Transport(anyhow!("edit result {}", e.result))),
            None => Err(DocumentError::Malformed("edit response without result".into())),
        }
    }
}
