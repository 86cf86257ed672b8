//! Client for the historical-price CSV API (Quandl HKEX datasets).
//!
//! The endpoint answers CSV keyed by zero-padded stock code, with volume and
//! turnover reported in thousands; rows are scaled to absolute units here.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{CollectError, Result};
use crate::models::HistoricalPrice;
use crate::scraper::cleaner::{pad_code, parse_float};
use crate::scraper::PageFetcher;

/// Full-history fetches page through everything the feed has.
const FULL_HISTORY_LIMIT: u32 = 10_000;
/// Single-date fetches only need a handful of trailing rows.
const SINGLE_DATE_LIMIT: u32 = 10;

/// One CSV row as the feed prints it. Numeric fields stay raw strings so the
/// best-effort parser decides what "N/A" means.
#[derive(Debug, Deserialize)]
struct RawPriceRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Ask", default)]
    ask: String,
    #[serde(rename = "Bid", default)]
    bid: String,
    #[serde(rename = "Previous Close", default)]
    prev_close: String,
    #[serde(rename = "High", default)]
    high: String,
    #[serde(rename = "Low", default)]
    low: String,
    #[serde(rename = "Nominal Price", default)]
    nominal_price: String,
    #[serde(rename = "Share Volume (000)", default)]
    volume_k: String,
    #[serde(rename = "Turnover (000)", default)]
    turnover_k: String,
}

pub struct QuandlClient {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for QuandlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuandlClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl QuandlClient {
    /// Build a client. A missing API token is a misconfiguration, caught here
    /// rather than as a 401 mid-sweep.
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &ApiConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(CollectError::Config(
                "missing API token — set HKEX__API__TOKEN".into(),
            ));
        }
        Ok(Self {
            fetcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, code: u32, limit: u32, end: NaiveDate) -> String {
        format!(
            "{}/{}/data.csv?limit={}&end_date={}&order=desc&api_key={}",
            self.base_url,
            pad_code(code),
            limit,
            end,
            self.token
        )
    }

    /// Everything the feed has for one code, newest first.
    pub async fn stock_by_code(&self, code: u32) -> Result<Vec<HistoricalPrice>> {
        let today = Local::now().date_naive();
        let body = self
            .fetcher
            .fetch_bytes(&self.endpoint(code, FULL_HISTORY_LIMIT, today))
            .await?;
        let prices = parse_price_csv(&body, code)?;
        if prices.is_empty() {
            return Err(CollectError::EmptyResult("no price history for code"));
        }
        Ok(prices)
    }

    /// The single row for one code on one date; absence upstream (a holiday,
    /// an unpublished date, a delisted code) is an `EmptyResult`.
    pub async fn stock_on_date(&self, code: u32, date: NaiveDate) -> Result<HistoricalPrice> {
        let body = self
            .fetcher
            .fetch_bytes(&self.endpoint(code, SINGLE_DATE_LIMIT, date))
            .await?;
        let prices = parse_price_csv(&body, code)?;

        debug!("{}: {} trailing rows", pad_code(code), prices.len());
        prices
            .into_iter()
            .find(|p| p.date == date)
            .ok_or(CollectError::EmptyResult("no price row for date"))
    }
}

/// Decode the CSV body into typed records. Rows with unparseable dates are
/// dropped with a warning; numeric cells go through the best-effort parser.
fn parse_price_csv(body: &[u8], code: u32) -> Result<Vec<HistoricalPrice>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body);

    let code_f = pad_code(code);
    let mut prices = Vec::new();

    for (i, result) in reader.deserialize::<RawPriceRow>().enumerate() {
        let raw = match result {
            Ok(r) => r,
            Err(e) => {
                return Err(CollectError::Parse(format!(
                    "price CSV row {} for {}: {}",
                    i + 1,
                    code_f,
                    e
                )));
            }
        };

        let Ok(date) = raw.date.trim().parse::<NaiveDate>() else {
            warn!("{}: skipping row with bad date {:?}", code_f, raw.date);
            continue;
        };

        prices.push(HistoricalPrice {
            code,
            code_f: code_f.clone(),
            date,
            ask: parse_float(&raw.ask),
            bid: parse_float(&raw.bid),
            // The feed has no open column; previous close stands in.
            open: parse_float(&raw.prev_close),
            high: parse_float(&raw.high),
            low: parse_float(&raw.low),
            close: parse_float(&raw.nominal_price),
            // Reported in thousands; stored absolute.
            volume: (parse_float(&raw.volume_k) * 1000.0) as i64,
            turnover: (parse_float(&raw.turnover_k) * 1000.0) as i64,
        });
    }

    Ok(prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::StaticPages;

    const CSV: &str = "\
Date,Ask,Bid,Previous Close,High,Low,Nominal Price,Share Volume (000),Turnover (000)
2021-02-26,46.2,46.1,45.9,46.5,45.8,46.0,12345,567890
2021-02-25,45.9,45.8,46.1,46.2,45.5,45.9,9876,456789
";

    fn client_with(url: &str, body: &str) -> QuandlClient {
        let config = ApiConfig {
            base_url: "http://quandl.test/api/v3/datasets/HKEX".into(),
            token: "tok".into(),
        };
        let fetcher = StaticPages::new().with_page(url, body);
        QuandlClient::new(Arc::new(fetcher), &config).unwrap()
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let config = ApiConfig {
            base_url: "http://quandl.test".into(),
            token: "".into(),
        };
        let err = QuandlClient::new(Arc::new(StaticPages::new()), &config).unwrap_err();
        assert!(matches!(err, CollectError::Config(_)));
    }

    #[test]
    fn csv_rows_scale_volume_and_turnover() {
        let prices = parse_price_csv(CSV.as_bytes(), 5).unwrap();
        assert_eq!(prices.len(), 2);
        let p = &prices[0];
        assert_eq!(p.code_f, "00005");
        assert_eq!(p.date, "2021-02-26".parse().unwrap());
        assert_eq!(p.open, 45.9); // previous close stands in for open
        assert_eq!(p.close, 46.0);
        assert_eq!(p.volume, 12_345_000);
        assert_eq!(p.turnover, 567_890_000);
    }

    #[tokio::test]
    async fn stock_on_date_filters_to_the_exact_date() {
        let date: NaiveDate = "2021-02-25".parse().unwrap();
        let url = format!(
            "http://quandl.test/api/v3/datasets/HKEX/00005/data.csv?limit=10&end_date={}&order=desc&api_key=tok",
            date
        );
        let client = client_with(&url, CSV);

        let price = client.stock_on_date(5, date).await.unwrap();
        assert_eq!(price.date, date);
        assert_eq!(price.close, 45.9);
    }

    #[tokio::test]
    async fn stock_on_date_absent_is_empty_result() {
        let date: NaiveDate = "2021-03-01".parse().unwrap();
        let url = format!(
            "http://quandl.test/api/v3/datasets/HKEX/00005/data.csv?limit=10&end_date={}&order=desc&api_key=tok",
            date
        );
        let client = client_with(&url, CSV);

        let err = client.stock_on_date(5, date).await.unwrap_err();
        assert!(matches!(err, CollectError::EmptyResult(_)));
    }
}
