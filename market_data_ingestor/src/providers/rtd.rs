//! Live last-trade quotes from an RTD market-data HTTP bridge.
//!
//! The bridge answers `GET {base}/{symbol}/{field}` with `{"value": ...}`,
//! where the value is text formatted with the exchange locale. Requests are
//! spaced by a [`governor`] limiter so a loop over many symbols does not
//! hammer the bridge.

use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::Deserialize;
use shared_utils::env::parse_env_var;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::quote::Quote,
    providers::{
        ConfigSnafu, InternalSnafu, ProviderError, ProviderInitError, QuoteProvider,
        ReqwestSnafu, check_status, http_client,
    },
};

/// Default bridge location.
pub const DEFAULT_BASE_URL: &str = "http://rtd.blackboxinovacao.com.br/api/MarketData";
/// Field holding the last traded price.
pub const LAST_TRADE_FIELD: &str = "ULT";
/// Environment variable overriding [`DEFAULT_BASE_URL`].
pub const BASE_URL_ENV: &str = "RTD_API_URL";

#[derive(Deserialize, Debug)]
struct RtdResponse {
    value: serde_json::Value,
}

/// Settings for [`RtdProvider`].
#[derive(Debug, Clone)]
pub struct RtdSettings {
    /// Bridge base URL without trailing slash.
    pub base_url: String,
    /// Field requested for every symbol.
    pub field: String,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Minimum spacing between two requests.
    pub min_interval: Duration,
}

impl Default for RtdSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            field: LAST_TRADE_FIELD.to_string(),
            timeout: super::DEFAULT_HTTP_TIMEOUT,
            min_interval: Duration::from_millis(200),
        }
    }
}

/// Quote provider backed by the RTD bridge.
pub struct RtdProvider {
    client: Client,
    settings: RtdSettings,
    limiter: DefaultDirectRateLimiter,
}

impl RtdProvider {
    /// Creates a provider from explicit settings.
    pub fn new(settings: RtdSettings) -> Result<Self, ProviderInitError> {
        let quota = Quota::with_period(settings.min_interval)
            .unwrap_or_else(|| Quota::per_second(nonzero!(50u32)));
        Ok(Self {
            client: http_client(settings.timeout)?,
            limiter: RateLimiter::direct(quota),
            settings: RtdSettings {
                base_url: settings.base_url.trim_end_matches('/').to_string(),
                ..settings
            },
        })
    }

    /// Creates a provider, letting `RTD_API_URL` override the base URL.
    pub fn from_env(mut settings: RtdSettings) -> Result<Self, ProviderInitError> {
        if let Some(url) = parse_env_var::<String>(BASE_URL_ENV).context(ConfigSnafu)? {
            settings.base_url = url;
        }
        Self::new(settings)
    }

    /// URL queried for `symbol`.
    pub fn quote_url(&self, symbol: &str) -> String {
        format!("{}/{}/{}", self.settings.base_url, symbol, self.settings.field)
    }
}

#[async_trait]
impl QuoteProvider for RtdProvider {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        self.limiter.until_ready().await;

        let url = self.quote_url(symbol);
        debug!(%symbol, %url, "requesting quote");
        let response = self.client.get(&url).send().await.context(ReqwestSnafu)?;
        let response = check_status(response).await?;
        let body = response.json::<RtdResponse>().await.context(ReqwestSnafu)?;

        let value = value_text(body.value).ok_or_else(|| {
            InternalSnafu {
                message: format!("quote for {symbol} has no value"),
            }
            .build()
        })?;

        Ok(Quote {
            symbol: symbol.to_string(),
            value,
        })
    }
}

fn value_text(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
