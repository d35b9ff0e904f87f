//! Binance spot kline fetcher.
//!
//! One `GET /api/v3/klines` call per fetch, no internal retries: the acquisition
//! pipeline owns the retry schedule. HTTP status codes are mapped onto the
//! transient/permanent split of [`FetchError`]. Only ban responses trip the
//! shared circuit breaker; 429 and 5xx are left to the retry schedule.

use super::circuit_breaker::CircuitBreaker;
use super::fetcher::{FetchError, KlineFetcher};
use crate::config::ApiConfig;
use crate::domain::{Bar, Granularity};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Error body returned by the exchange, e.g. `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

pub struct BinanceFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
    page_limit: usize,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceFetcher {
    pub fn new(config: &ApiConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("klinevault/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_limit: config.page_limit,
            circuit_breaker,
        })
    }

    fn klines_url(&self) -> String {
        format!("{}/api/v3/klines", self.base_url)
    }

    /// Raw exchange-info document (the instrument listing).
    pub fn fetch_exchange_info(&self) -> Result<String, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitOpen);
        }
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let resp = self.client.get(&url).send().map_err(transport_error)?;
        let resp = self.check_status(resp)?;
        resp.text()
            .map_err(|e| FetchError::MalformedResponse(format!("exchange info body: {e}")))
    }

    /// Map non-success statuses onto fetch errors, feeding the circuit breaker.
    fn check_status(
        &self,
        resp: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        // 418 is the exchange's IP-ban status; 403 is a WAF block.
        if status == StatusCode::IM_A_TEAPOT || status == StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(FetchError::CircuitOpen);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(FetchError::RateLimited { retry_after_secs });
        }

        if status.is_server_error() {
            return Err(FetchError::Network(format!("HTTP {status}")));
        }

        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| format!("{} (code {})", e.msg, e.code))
            .unwrap_or(body);
        Err(FetchError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    FetchError::Network(e.to_string())
}

/// Decode a kline response body: an array of 12-field rows.
pub fn parse_klines(body: &str) -> Result<Vec<Bar>, FetchError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(format!("kline body: {e}")))?;
    rows.iter()
        .map(|row| Bar::from_row(row).map_err(FetchError::from))
        .collect()
}

impl KlineFetcher for BinanceFetcher {
    fn name(&self) -> &str {
        "binance_spot"
    }

    fn page_limit(&self) -> usize {
        self.page_limit
    }

    fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitOpen);
        }

        let limit = self.page_limit.to_string();
        let start = start_ms.to_string();
        let end = end_ms.to_string();
        let resp = self
            .client
            .get(self.klines_url())
            .query(&[
                ("symbol", symbol),
                ("interval", granularity.code()),
                ("startTime", start.as_str()),
                ("endTime", end.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .map_err(transport_error)?;

        let resp = self.check_status(resp)?;
        let body = resp
            .text()
            .map_err(|e| FetchError::MalformedResponse(format!("kline body: {e}")))?;
        let bars = parse_klines(&body)?;

        if bars.len() > self.page_limit {
            return Err(FetchError::MalformedResponse(format!(
                "{} rows exceed the page limit of {}",
                bars.len(),
                self.page_limit
            )));
        }

        Ok(bars)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
