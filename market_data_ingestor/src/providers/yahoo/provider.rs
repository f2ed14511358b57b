use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::{bar_series::BarSeries, request_params::BarsRequestParams},
    providers::{
        DataProvider, ProviderError, ProviderInitError, ReqwestSnafu, check_status, http_client,
        yahoo::{
            params::{construct_params, validate_range},
            response::ChartResponse,
        },
    },
};

const BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Daily bars from the Yahoo Finance chart endpoint.
pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    /// Creates a provider whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProviderInitError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Points the provider at another host (mirrors, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl DataProvider for YahooProvider {
    async fn fetch_bars(&self, params: BarsRequestParams) -> Result<BarSeries, ProviderError> {
        validate_range(&params)?;

        let url = format!("{}/{}", self.base_url, params.symbol);
        let query = construct_params(params.start, params.end);
        debug!(symbol = %params.symbol, start = %params.start, end = %params.end, "requesting chart");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context(ReqwestSnafu)?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(symbol = %params.symbol, "chart endpoint has no such symbol");
            return Ok(BarSeries::new(params.symbol, vec![]));
        }
        let response = check_status(response).await?;
        let chart = response
            .json::<ChartResponse>()
            .await
            .context(ReqwestSnafu)?;

        let bars = chart
            .into_bars()?
            .into_iter()
            .filter(|b| b.date >= params.start && b.date <= params.end)
            .collect();

        Ok(BarSeries::new(params.symbol, bars))
    }
}
