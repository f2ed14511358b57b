use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Deserialize;

use crate::{
    models::bar::Bar,
    providers::{ApiSnafu, InternalSnafu, ProviderError},
};

#[derive(Deserialize, Debug)]
pub struct ChartResponse {
    pub chart: ChartEnvelope,
}

#[derive(Deserialize, Debug)]
pub struct ChartEnvelope {
    pub result: Option<Vec<ChartData>>,
    pub error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
pub struct ChartError {
    pub code: String,
    pub description: String,
}

#[derive(Deserialize, Debug)]
pub struct ChartData {
    #[serde(default)]
    pub meta: ChartMeta,
    pub timestamp: Option<Vec<i64>>,
    pub indicators: Indicators,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    /// Exchange offset from UTC in seconds; used to derive the trading date.
    #[serde(default)]
    pub gmtoffset: i32,
}

#[derive(Deserialize, Debug)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteArrays>,
}

#[derive(Deserialize, Debug, Default)]
pub struct QuoteArrays {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

impl ChartResponse {
    /// Converts the column-oriented payload into bars.
    ///
    /// Rows where every field is null (holidays) are skipped. A "Not Found"
    /// error payload and an empty result both produce an empty vector.
    pub fn into_bars(self) -> Result<Vec<Bar>, ProviderError> {
        if let Some(err) = self.chart.error {
            if err.code == "Not Found" {
                return Ok(vec![]);
            }
            return ApiSnafu {
                message: format!("{}: {}", err.code, err.description),
            }
            .fail();
        }

        let Some(data) = self.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(vec![]);
        };
        let Some(timestamps) = data.timestamp else {
            return Ok(vec![]);
        };
        let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

        let offset = FixedOffset::east_opt(data.meta.gmtoffset).ok_or_else(|| {
            InternalSnafu {
                message: format!("bad gmtoffset {}", data.meta.gmtoffset),
            }
            .build()
        })?;

        let cell = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = trading_date(ts, offset)?;
            let bar = Bar {
                date,
                open: cell(&quote.open, i),
                high: cell(&quote.high, i),
                low: cell(&quote.low, i),
                close: cell(&quote.close, i),
                volume: cell(&quote.volume, i),
            };
            if bar.open.is_none()
                && bar.high.is_none()
                && bar.low.is_none()
                && bar.close.is_none()
                && bar.volume.is_none()
            {
                continue;
            }
            bars.push(bar);
        }
        Ok(bars)
    }
}

fn trading_date(ts: i64, offset: FixedOffset) -> Result<NaiveDate, ProviderError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&offset).date_naive())
        .ok_or_else(|| {
            InternalSnafu {
                message: format!("invalid timestamp: {ts}"),
            }
            .build()
        })
}
