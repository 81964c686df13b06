// src/articles/petscan.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::TitleSource;

/// PetScan query for articles in "New Zealand articles by quality" (depth 0, ns 1 → talk
/// pages mapped back to articles). `after=` is appended per request.
pub const WPNZ_PETSCAN_QUERY: &str = "https://petscan.wmflabs.org/?language=en&project=wikipedia\
&categories=New%20Zealand%20articles%20by%20quality%7C1&depth=0&ns%5B1%5D=1\
&combination=subset&namespace%5Fconversion=keep&show%5Fredirects=no\
&show%5Fsoft%5Fredirects=no&show%5Fdisambiguation%5Fpages=no&sortby=none\
&sortorder=ascending&output%5Fcompatability=catscan&format=json&doit=Do%20it%21";

// Response shape: {"*": [{"a": {"*": [{"title": "..."}]}}]}
#[derive(Debug, Deserialize)]
struct PetscanResponse {
    #[serde(rename = "*", default)]
    groups: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct Group {
    a: Articles,
}

#[derive(Debug, Deserialize)]
struct Articles {
    #[serde(rename = "*", default)]
    items: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: String,
}

/// Extract raw titles from a PetScan JSON body, `_` replaced by spaces.
pub fn parse_titles(body: &str) -> Result<Vec<String>> {
    let resp: PetscanResponse =
        serde_json::from_str(body).context("parsing petscan json response")?;
    Ok(resp
        .groups
        .into_iter()
        .flat_map(|g| g.a.items)
        .map(|a| a.title.replace('_', " "))
        .collect())
}

pub struct PetscanSource {
    query_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl PetscanSource {
    pub fn new(query_url: impl Into<String>, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            query_url: query_url.into(),
            client,
            timeout,
        }
    }

    /// Query URL with the cursor appended.
    pub fn url_for(&self, after: Option<&str>) -> String {
        let sep = if self.query_url.contains('?') { '&' } else { '?' };
        format!("{}{}after={}", self.query_url, sep, after.unwrap_or_default())
    }
}

#[async_trait]
impl TitleSource for PetscanSource {
    async fn fetch_titles(&self, after: Option<&str>) -> Result<Vec<String>> {
        let url = self.url_for(after);
        let body = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .context("petscan get()")?
            .error_for_status()
            .context("petscan non-2xx")?
            .text()
            .await
            .context("petscan .text()")?;
        parse_titles(&body)
    }

    fn name(&self) -> &'static str {
        "petscan"
    }
}
