use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;
use urlencoding::encode;

use crate::types::{MetaInfo, MetaScope, ScoreBody, TagsBody};

const UA: &str = concat!("manhua/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_BASE: &str = "http://127.0.0.1:3000";

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(UA));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, image/*;q=0.9, */*;q=0.5"));
    headers
}

fn http_client() -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .default_headers(default_headers())
        .redirect(reqwest::redirect::Policy::limited(10));
    if let Ok(proxy) = std::env::var("MANHUA_HTTP_PROXY") {
        if let Ok(px) = reqwest::Proxy::all(proxy) {
            builder = builder.proxy(px);
        }
    }
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

/// Client for the comic server's JSON API.
#[derive(Clone)]
pub struct ComicClient {
    http: reqwest::Client,
    base: String,
}

impl ComicClient {
    pub fn new(base: &str) -> Self {
        ComicClient { http: http_client(), base: base.trim_end_matches('/').to_string() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URLs pass through, server paths are prefixed with the base.
    pub fn resolve(&self, url: &str) -> String {
        resolve_url(&self.base, url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        self.http
            .get(url)
            .send()
            .await
            .with_context(|| format!("请求失败: {}", url))?
            .error_for_status()
            .with_context(|| format!("服务器返回错误: {}", url))?
            .json::<T>()
            .await
            .with_context(|| format!("解析响应失败: {}", url))
    }

    pub async fn comics(&self) -> Result<Vec<String>> {
        self.get_json(&format!("{}/api/comics", self.base)).await
    }

    pub async fn episodes(&self, title: &str) -> Result<Vec<String>> {
        self.get_json(&format!("{}/api/comics/{}", self.base, encode(title))).await
    }

    pub async fn images(&self, title: &str, episode: &str) -> Result<Vec<String>> {
        self.get_json(&format!("{}/api/comics/{}/{}", self.base, encode(title), encode(episode)))
            .await
    }

    pub async fn meta_info(&self) -> Result<MetaInfo> {
        self.get_json(&format!("{}/api/metaInfo", self.base)).await
    }

    fn scoped_url(&self, action: &str, scope: &MetaScope) -> String {
        match scope.episode() {
            Some(ep) => format!("{}/api/{}/{}/{}", self.base, action, encode(scope.title()), encode(ep)),
            None => format!("{}/api/{}/{}", self.base, action, encode(scope.title())),
        }
    }

    pub async fn update_tags(&self, scope: &MetaScope, tags: &[String]) -> Result<()> {
        let url = self.scoped_url("updateTags", scope);
        debug!("POST {}", url);
        self.http
            .post(&url)
            .json(&TagsBody { tags: tags.to_vec() })
            .send()
            .await
            .with_context(|| format!("请求失败: {}", url))?
            .error_for_status()
            .with_context(|| format!("保存标签失败: {}", url))?;
        Ok(())
    }

    pub async fn update_score(&self, scope: &MetaScope, score: f32) -> Result<()> {
        let url = self.scoped_url("updateScores", scope);
        debug!("POST {}", url);
        self.http
            .post(&url)
            .json(&ScoreBody { score })
            .send()
            .await
            .with_context(|| format!("请求失败: {}", url))?
            .error_for_status()
            .with_context(|| format!("保存评分失败: {}", url))?;
        Ok(())
    }

}

pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{}{}", base.trim_end_matches('/'), url)
    }
}

pub async fn fetch_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let bytes = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("下载失败: {}", url))?
        .error_for_status()
        .with_context(|| format!("下载失败: {}", url))?
        .bytes()
        .await
        .with_context(|| format!("读取图片失败: {}", url))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_and_absolute_urls() {
        assert_eq!(resolve_url("http://h:3000/", "/static/a.jpg"), "http://h:3000/static/a.jpg");
        assert_eq!(resolve_url("http://h:3000", "https://cdn/x.png"), "https://cdn/x.png");
        assert_eq!(resolve_url("", "/static/a.jpg"), "/static/a.jpg");
    }

    #[test]
    fn scoped_urls_encode_segments() {
        let client = ComicClient::new("http://h/");
        assert_eq!(
            client.scoped_url("updateTags", &MetaScope::new("海 贼", None)),
            "http://h/api/updateTags/%E6%B5%B7%20%E8%B4%BC"
        );
        assert_eq!(
            client.scoped_url("updateScores", &MetaScope::new("a", Some("b/c"))),
            "http://h/api/updateScores/a/b%2Fc"
        );
    }
}
