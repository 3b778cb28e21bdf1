//! inferwatch netclient: HTTP access to the chain REST API and the forge
//! competition site.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use inferwatch_core::{
    CompetitionFeed, CompetitionListing, FetchError, LeaderboardPage, NetworkClient, RawSnapshot,
};
use regex::Regex;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

mod wire;

pub const DEFAULT_CHAIN_API: &str = "https://allora-api.testnet.allora.network";
pub const DEFAULT_EMISSIONS_VERSION: &str = "v9";
pub const DEFAULT_FORGE_BASE: &str = "https://forge.allora.network";

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub chain_api: String,
    pub emissions_version: String,
    pub forge_base: String,
    pub timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            chain_api: DEFAULT_CHAIN_API.to_string(),
            emissions_version: DEFAULT_EMISSIONS_VERSION.to_string(),
            forge_base: DEFAULT_FORGE_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpNetClient {
    http: Client,
    cfg: NetConfig,
    build_id: Regex,
}

impl HttpNetClient {
    pub fn new(cfg: NetConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .user_agent(concat!("inferwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        let build_id = Regex::new(r#""buildId":"([^"]+)""#).context("compiling buildId pattern")?;
        Ok(Self { http, cfg, build_id })
    }

    pub fn config(&self) -> &NetConfig {
        &self.cfg
    }

    fn chain(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.chain_api.trim_end_matches('/'), path)
    }

    fn forge(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.forge_base.trim_end_matches('/'), path)
    }

    pub fn latest_inferences_url(&self, topic: &str) -> String {
        self.chain(&format!("emissions/{}/latest_network_inferences/{}", self.cfg.emissions_version, topic))
    }

    pub fn block_url(&self, height: &str) -> String {
        self.chain(&format!("cosmos/base/tendermint/v1beta1/blocks/{}", height))
    }

    pub fn leaderboard_url(&self, competition_id: &str, token: Option<&str>) -> Result<Url, FetchError> {
        let base = self.forge(&format!(
            "api/upshot-api-proxy/allora/forge/competition/{}/leaderboard",
            competition_id
        ));
        let parsed = match token {
            Some(t) => Url::parse_with_params(&base, &[("continuation_token", t)]),
            None => Url::parse(&base),
        };
        parsed.map_err(|e| FetchError::Transport { url: base.clone(), reason: e.to_string() })
    }

    async fn get_body(&self, url: &str, endpoint: &'static str) -> Result<String, FetchError> {
        let started = Instant::now();
        let res = self.send(url).await;
        metrics::histogram!("netclient_request_ms", started.elapsed().as_secs_f64() * 1000.0, "endpoint" => endpoint);
        match &res {
            Ok(_) => debug!(%url, endpoint, took_ms = %started.elapsed().as_millis(), "netclient: ok"),
            Err(e) => warn!(%url, endpoint, error = %e, "netclient: request failed"),
        }
        res
    }

    async fn send(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport { url: url.to_string(), reason: e.to_string() })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Transport { url: url.to_string(), reason: e.to_string() })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, endpoint: &'static str) -> Result<T, FetchError> {
        let body = self.get_body(url, endpoint).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode { url: url.to_string(), reason: e.to_string() })
    }

    pub fn extract_build_id<'h>(&self, html: &'h str) -> Option<&'h str> {
        self.build_id.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str())
    }

    async fn current_build_id(&self) -> Result<String, FetchError> {
        let url = self.forge("competitions");
        let html = self.get_body(&url, "forge_page").await?;
        self.extract_build_id(&html)
            .map(str::to_string)
            .ok_or_else(|| FetchError::Missing(format!("no buildId in {}", url)))
    }
}

#[async_trait::async_trait]
impl NetworkClient for HttpNetClient {
    async fn fetch_raw_snapshot(&self, topic: &str) -> Result<RawSnapshot, FetchError> {
        let url = self.latest_inferences_url(topic);
        let wire: wire::LatestInferences = self.get_json(&url, "latest_inferences").await?;
        Ok(wire.into_snapshot(topic))
    }

    async fn fetch_block_time(&self, height: &str) -> Result<String, FetchError> {
        let url = self.block_url(height);
        let wire: wire::BlockResponse = self.get_json(&url, "block").await?;
        let time = wire.block.header.time;
        if time.is_empty() {
            return Err(FetchError::Missing(format!("block {} has no header time", height)));
        }
        Ok(time)
    }

    async fn fetch_leaderboard_page(
        &self,
        competition_id: &str,
        page_token: Option<&str>,
    ) -> Result<LeaderboardPage, FetchError> {
        let url = self.leaderboard_url(competition_id, page_token)?;
        let wire: wire::LeaderboardResponse = self.get_json(url.as_str(), "leaderboard").await?;
        Ok(wire.into_page())
    }
}

#[async_trait::async_trait]
impl CompetitionFeed for HttpNetClient {
    async fn fetch_competitions(&self) -> Result<CompetitionListing, FetchError> {
        let build_id = self.current_build_id().await?;
        debug!(%build_id, "netclient: resolved forge build id");
        let url = self.forge(&format!("_next/data/{}/competitions.json", build_id));
        let wire: wire::CompetitionsData = self.get_json(&url, "competitions").await?;
        Ok(wire.into_listing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(chain: &str, forge: &str) -> HttpNetClient {
        HttpNetClient::new(NetConfig {
            chain_api: chain.into(),
            forge_base: forge.into(),
            ..NetConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let c = client("https://chain.example/", "https://forge.example");
        assert_eq!(
            c.latest_inferences_url("13"),
            "https://chain.example/emissions/v9/latest_network_inferences/13"
        );
        assert_eq!(c.block_url("77"), "https://chain.example/cosmos/base/tendermint/v1beta1/blocks/77");
    }

    #[test]
    fn leaderboard_token_is_query_encoded() {
        let c = client("https://chain.example", "https://forge.example");
        let first = c.leaderboard_url("5", None).unwrap();
        assert_eq!(first.as_str(), "https://forge.example/api/upshot-api-proxy/allora/forge/competition/5/leaderboard");
        let next = c.leaderboard_url("5", Some("a b+c")).unwrap();
        assert_eq!(next.query(), Some("continuation_token=a+b%2Bc"));
    }

    #[test]
    fn build_id_is_scraped_from_next_data() {
        let c = client("https://chain.example", "https://forge.example");
        let html = r#"<script id="__NEXT_DATA__">{"props":{},"page":"/competitions","buildId":"kX9_2abc","isFallback":false}</script>"#;
        assert_eq!(c.extract_build_id(html), Some("kX9_2abc"));
        assert_eq!(c.extract_build_id("<html></html>"), None);
    }
}
