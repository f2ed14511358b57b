//! Central Bank of Brazil time-series system (SGS).
//!
//! Series are addressed by number (12 is the daily CDI rate). The service
//! formats dates as `dd/mm/yyyy` and numbers as text.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::{quote::parse_locale_decimal, rate::RatePoint},
    providers::{
        InternalSnafu, ProviderError, ProviderInitError, RateProvider, ReqwestSnafu,
        ValidationSnafu, check_status, http_client,
    },
};

const BASE_URL: &str = "https://api.bcb.gov.br/dados/serie";
const DATE_FMT: &str = "%d/%m/%Y";

/// SGS number of the daily CDI rate.
pub const CDI_SERIES: u32 = 12;

#[derive(Deserialize, Debug)]
struct SgsEntry {
    data: String,
    valor: String,
}

/// Daily rates from the SGS JSON endpoint.
pub struct BcbProvider {
    client: Client,
    base_url: String,
}

impl BcbProvider {
    /// Creates a provider whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProviderInitError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Points the provider at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl RateProvider for BcbProvider {
    async fn fetch_rates(
        &self,
        series: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RatePoint>, ProviderError> {
        if start > end {
            return ValidationSnafu {
                message: format!("start {start} is after end {end}"),
            }
            .fail();
        }
        let url = format!("{}/bcdata.sgs.{series}/dados", self.base_url);
        let query = [
            ("formato", "json".to_string()),
            ("dataInicial", start.format(DATE_FMT).to_string()),
            ("dataFinal", end.format(DATE_FMT).to_string()),
        ];
        debug!(series, %start, %end, "requesting sgs series");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context(ReqwestSnafu)?;
        // SGS answers 404 when nothing was published in the window.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        let response = check_status(response).await?;
        let entries = response
            .json::<Vec<SgsEntry>>()
            .await
            .context(ReqwestSnafu)?;

        parse_entries(entries)
    }
}

fn parse_entries(entries: Vec<SgsEntry>) -> Result<Vec<RatePoint>, ProviderError> {
    let mut points = entries
        .into_iter()
        .map(|e| {
            let date = NaiveDate::parse_from_str(e.data.trim(), DATE_FMT).map_err(|_| {
                InternalSnafu {
                    message: format!("bad sgs date {:?}", e.data),
                }
                .build()
            })?;
            let rate_pct = parse_locale_decimal(&e.valor).ok_or_else(|| {
                InternalSnafu {
                    message: format!("bad sgs value {:?} on {}", e.valor, e.data),
                }
                .build()
            })?;
            Ok(RatePoint { date, rate_pct })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;
    points.sort_by_key(|p| p.date);
    Ok(points)
}
