//! Provider abstraction for market data sources.
//!
//! This module defines the capability traits the sync pipeline consumes:
//!
//! - [`DataProvider`]: historical daily bars for one symbol and date range.
//! - [`QuoteProvider`]: the latest traded value for one symbol.
//! - [`RateProvider`]: published daily rates for a numbered series.
//!
//! Each concrete vendor implements the traits it supports. All traits are
//! async and object safe, so the pipeline holds them as `Arc<dyn ...>` and
//! tests swap in in-memory fakes.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use market_data_ingestor::models::{
//!     bar_series::BarSeries,
//!     request_params::BarsRequestParams,
//! };
//! use market_data_ingestor::providers::{DataProvider, ProviderError};
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl DataProvider for MyProvider {
//!     async fn fetch_bars(
//!         &self,
//!         params: BarsRequestParams,
//!     ) -> Result<BarSeries, ProviderError> {
//!         Ok(BarSeries::new(params.symbol, vec![]))
//!     }
//! }
//! ```

pub mod bcb;
pub mod rtd;
pub mod yahoo;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use shared_utils::config::ConfigError;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::models::{
    bar_series::BarSeries, quote::Quote, rate::RatePoint, request_params::BarsRequestParams,
};

/// Request timeout applied to every outbound HTTP call.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("market-sync/", env!("CARGO_PKG_VERSION"));

/// Trait for fetching daily bar data from a market data provider.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetches daily bars for the given request parameters.
    ///
    /// # Returns
    ///
    /// * `Ok(BarSeries)` - bars ordered by date; may be empty.
    /// * `Err(ProviderError)` - if the request fails.
    async fn fetch_bars(&self, params: BarsRequestParams) -> Result<BarSeries, ProviderError>;
}

/// Trait for fetching the most recent traded value of a symbol.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetches the latest quote. `symbol` is already in the source's own
    /// naming (callers apply any ticker equivalence first).
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError>;
}

/// Trait for fetching a published daily rate series.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetches the rates of `series` between `start` and `end` (inclusive),
    /// ordered by date. An empty vector means nothing was published.
    async fn fetch_rates(
        &self,
        series: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RatePoint>, ProviderError>;
}

/// Builds the HTTP client shared by the concrete providers.
pub fn http_client(timeout: Duration) -> Result<Client, ProviderInitError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context(ClientBuildSnafu)
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// Invalid configuration read from the environment.
    #[snafu(display("Invalid provider configuration: {source}"))]
    Config {
        source: ConfigError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a provider implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The provider's API returned an error status or an error payload.
    #[snafu(display("API error: {message}"))]
    Api {
        message: String,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this specific provider.
    #[snafu(display("Invalid parameters for provider: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// The payload could not be interpreted (format changed, bad numbers).
    #[snafu(display("Internal provider error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },

    /// An error during provider configuration or initialization.
    #[snafu(display("Provider initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: ProviderInitError,
    },
}

/// Turns a non-success response into [`ProviderError::Api`], keeping the
/// status and as much of the body as the server sent.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown API error".to_string());
    ApiSnafu {
        message: format!("{status}: {}", body.trim()),
    }
    .fail()
}
