use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::market::coinbase::types::{CandlesBody, ProductStats};
use crate::market::errors::{UpstreamError, classify_status};
use crate::market::provider::CandleProvider;
use crate::market::types::{RawCandle, Symbol};
use crate::planner::types::Granularity;
use crate::time::format_upstream;

const USER_AGENT: &str = concat!("candles-collector/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct CoinbaseClient {
    http: Client,
    base_url: String,
}

impl CoinbaseClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn candles_url(&self, product_id: &str) -> String {
        format!("{}/products/{}/candles", self.base_url, product_id)
    }

    fn stats_url(&self, product_id: &str) -> String {
        format!("{}/products/{}/stats", self.base_url, product_id)
    }
}

#[async_trait]
impl CandleProvider for CoinbaseClient {
    #[instrument(
        skip(self, symbol, granularity),
        fields(symbol = %symbol, granularity = %granularity),
        level = "debug"
    )]
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<RawCandle>, UpstreamError> {
        let product_id = symbol.upstream_id();

        let resp = self
            .http
            .get(self.candles_url(&product_id))
            .query(&[
                ("start", format_upstream(&start)),
                ("end", format_upstream(&end)),
                ("granularity", granularity.seconds().to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, &product_id));
        }

        let body = resp.text().await?;
        let candles = parse_candles(&body)?;

        debug!(count = candles.len(), "coinbase candles fetched");

        Ok(candles)
    }

    #[instrument(skip(self, symbol), fields(symbol = %symbol), level = "debug")]
    async fn is_supported(&self, symbol: &Symbol) -> Result<bool, UpstreamError> {
        let product_id = symbol.upstream_id();

        let resp = self.http.get(self.stats_url(&product_id)).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => {
                let stats: ProductStats = resp.json().await?;
                debug!(last = ?stats.last, "product stats fetched");
                Ok(true)
            }
            s => Err(classify_status(s, &product_id)),
        }
    }
}

/// Decodes a candles body. An error envelope or undecodable payload is
/// treated as transient.
pub fn parse_candles(body: &str) -> Result<Vec<RawCandle>, UpstreamError> {
    match serde_json::from_str::<CandlesBody>(body) {
        Ok(CandlesBody::Candles(c)) => Ok(c),
        Ok(CandlesBody::Message(m)) => Err(UpstreamError::Transient(format!(
            "upstream message: {}",
            m.message
        ))),
        Err(e) => Err(UpstreamError::Transient(format!("undecodable body: {e}"))),
    }
}
