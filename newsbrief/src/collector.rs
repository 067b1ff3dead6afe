use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use scraper::Html;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::model::RawArticle;

pub const DEFAULT_API_URL: &str = "https://openapi.naver.com/v1/search/news.json";
const MAX_DISPLAY: u32 = 100;

/// Source of raw articles for one search keyword.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    async fn search(&self, keyword: &str, display: u32) -> Result<Vec<RawArticle>>;
}

/// Known outlets by host. Matched on the host or any of its parent domains,
/// most specific first.
const OUTLETS: &[(&str, &str)] = &[
    ("biz.chosun.com", "조선비즈"),
    ("chosun.com", "조선일보"),
    ("donga.com", "동아일보"),
    ("joongang.co.kr", "중앙일보"),
    ("hani.co.kr", "한겨레"),
    ("khan.co.kr", "경향신문"),
    ("mk.co.kr", "매일경제"),
    ("hankyung.com", "한국경제"),
    ("sedaily.com", "서울경제"),
    ("etnews.com", "전자신문"),
    ("newsis.com", "뉴시스"),
    ("yna.co.kr", "연합뉴스"),
    ("yonhapnews.co.kr", "연합뉴스"),
    ("news1.kr", "뉴스1"),
    ("mt.co.kr", "머니투데이"),
    ("edaily.co.kr", "이데일리"),
    ("zdnet.co.kr", "지디넷코리아"),
    ("biospectator.com", "바이오스펙테이터"),
    ("bosa.co.kr", "약사공론"),
    ("dailypharm.com", "데일리팜"),
    ("yakup.com", "약업신문"),
    ("medipana.com", "메디파나뉴스"),
    ("medifonews.com", "메디포뉴스"),
];

/// Outlet name for an article URL, else its bare domain, else empty.
pub fn source_label(link: &str) -> String {
    let host = match url::Url::parse(link).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(h) => h.to_lowercase(),
        None => return String::new(),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    OUTLETS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, name)| name.to_string())
        .unwrap_or(host)
}

/// Strip tags and decode entities from search-result snippets
/// (`<b>FDA</b> &quot;approval&quot;` -> `FDA "approval"`).
pub fn clean_html(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    let plain: String = fragment.root_element().text().collect();
    plain.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// RFC 2822 publish date; anything unparsable is treated as unknown.
pub fn parse_pub_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "pubDate")]
    pub_date: String,
}

impl SearchItem {
    fn into_raw(self, keyword: &str) -> Option<RawArticle> {
        let link = if self.link.trim().is_empty() {
            self.originallink.trim().to_string()
        } else {
            self.link.trim().to_string()
        };
        if link.is_empty() {
            return None;
        }
        let original_link = if self.originallink.trim().is_empty() {
            link.clone()
        } else {
            self.originallink.trim().to_string()
        };
        let title = clean_html(&self.title);
        if title.is_empty() {
            return None;
        }

        Some(RawArticle {
            title,
            description: clean_html(&self.description),
            source: source_label(&original_link),
            published_at: parse_pub_date(&self.pub_date),
            link,
            original_link,
            keyword: keyword.to_string(),
        })
    }
}

/// Naver news search API client.
pub struct NaverNewsCollector {
    api_url: String,
    client_id: String,
    client_secret: String,
    client: Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl NaverNewsCollector {
    pub fn new(
        api_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("NewsBrief/0.1.0")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            api_url: api_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            client,
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        })
    }

    /// Credentials come from the environment variables named in the config.
    pub fn from_config(config: &common::CollectorConfig) -> Result<Self, PipelineError> {
        let id_var = config.client_id_env.as_deref().unwrap_or("NAVER_CLIENT_ID");
        let secret_var = config.client_secret_env.as_deref().unwrap_or("NAVER_CLIENT_SECRET");

        let client_id = common::secret_from_env(Some(id_var))
            .ok_or_else(|| PipelineError::MissingCredentials(format!("{} is not set", id_var)))?;
        let client_secret = common::secret_from_env(Some(secret_var))
            .ok_or_else(|| PipelineError::MissingCredentials(format!("{} is not set", secret_var)))?;

        let api_url = config.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Self::new(api_url, client_id, client_secret, config.timeout_seconds.unwrap_or(10))
            .map_err(|e| PipelineError::stage(crate::error::Stage::Collecting, e))
    }

    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_backoff = base_backoff;
        self
    }
}

#[async_trait::async_trait]
impl Collector for NaverNewsCollector {
    async fn search(&self, keyword: &str, display: u32) -> Result<Vec<RawArticle>> {
        let display = display.clamp(1, MAX_DISPLAY).to_string();
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                let backoff = self.base_backoff * 2u32.pow(attempt - 2);
                info!(keyword, attempt, ?backoff, "retrying news search");
                tokio::time::sleep(backoff).await;
            }

            let request = self
                .client
                .get(&self.api_url)
                .header("X-Naver-Client-Id", &self.client_id)
                .header("X-Naver-Client-Secret", &self.client_secret)
                .query(&[
                    ("query", keyword),
                    ("display", display.as_str()),
                    ("start", "1"),
                    ("sort", "date"),
                ]);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: SearchResponse = response
                            .json()
                            .await
                            .context("failed to parse news search response")?;
                        let articles: Vec<RawArticle> = body
                            .items
                            .into_iter()
                            .filter_map(|item| item.into_raw(keyword))
                            .collect();
                        info!(keyword, count = articles.len(), "news search done");
                        return Ok(articles);
                    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(anyhow::anyhow!("news search returned {}", status));
                    } else {
                        anyhow::bail!("news search failed with status: {}", status);
                    }
                }
                Err(e) => {
                    warn!(keyword, %e, "news search request failed");
                    last_error = Some(anyhow::Error::new(e).context("network error during news search"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("news search failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_stripped_and_entities_decoded() {
        assert_eq!(clean_html("<b>FDA</b> &quot;approval&quot;  news"), "FDA \"approval\" news");
        assert_eq!(clean_html("plain &amp; simple"), "plain & simple");
        assert_eq!(clean_html(""), "");
    }

    #[test]
    fn outlets_are_mapped_by_host() {
        assert_eq!(source_label("https://www.chosun.com/economy/1"), "조선일보");
        assert_eq!(source_label("https://biz.chosun.com/it/2"), "조선비즈");
        assert_eq!(source_label("https://news.mt.co.kr/mtview.php"), "머니투데이");
        assert_eq!(source_label("https://example.org/a"), "example.org");
        assert_eq!(source_label("not a url"), "");
    }

    #[test]
    fn pub_date_parsing() {
        let parsed = parse_pub_date("Fri, 16 Oct 2026 09:30:00 +0900").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-10-16T00:30:00+00:00");
        assert!(parse_pub_date("yesterday").is_none());
    }

    #[test]
    fn items_without_link_or_title_are_dropped() {
        let item = SearchItem {
            title: "<b>t</b>".into(),
            originallink: String::new(),
            link: String::new(),
            description: String::new(),
            pub_date: String::new(),
        };
        assert!(item.into_raw("k").is_none());

        let item = SearchItem {
            title: "Title".into(),
            originallink: "https://www.yna.co.kr/view/1".into(),
            link: String::new(),
            description: "d".into(),
            pub_date: String::new(),
        };
        let raw = item.into_raw("k").unwrap();
        assert_eq!(raw.link, "https://www.yna.co.kr/view/1");
        assert_eq!(raw.source, "연합뉴스");
        assert!(raw.published_at.is_none());
    }
}
