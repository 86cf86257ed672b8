pub mod cleaner;
pub mod http_client;
pub mod parsers;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::error::{CollectError, Result};
use crate::models::{CompanyListing, IndustryOverview, IndustryPerformance, SectorOverview};

use self::cleaner::pad_code;
use self::http_client::HttpClient;

// ── Fetcher seam ──────────────────────────────────────────────────────────────

/// Narrow fetch abstraction so the brittle upstream markup contract can be
/// swapped for canned pages in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.fetch_text(url).await?.into_bytes())
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.get_text(url).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url).await
    }
}

// ── AASTOCKS ──────────────────────────────────────────────────────────────────

/// Tabs on the sector-industry detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTab {
    Overview = 1,
    Performance = 3,
}

pub struct AastocksScraper {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl AastocksScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &ScraperConfig) -> Self {
        Self {
            fetcher,
            base_url: config.aastocks_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn index_url(&self) -> String {
        format!(
            "{}/en/stocks/market/industry/sector-industry-details.aspx",
            self.base_url
        )
    }

    fn detail_url(&self, industry_id: &str, tab: DetailTab) -> String {
        format!(
            "{}/en/stocks/market/industry/sector-industry-details.aspx?industrysymbol={}&t={}&s=&o=&p=",
            self.base_url, industry_id, tab as u8
        )
    }

    fn reference_url(&self) -> String {
        format!(
            "{}/en/stocks/market/industry/industry-performance.aspx",
            self.base_url
        )
    }

    /// Whether the upstream source has published data for `date` yet,
    /// judged by the reference page's "Last Update" stamp.
    pub async fn is_date_ready(&self, date: NaiveDate) -> Result<bool> {
        let html = self.fetcher.fetch_text(&self.reference_url()).await?;
        let published = parsers::parse_last_update(&html)?;
        debug!("Upstream last update: {} (requested {})", published, date);
        Ok(published == date)
    }

    /// Discover the per-industry detail links for one tab. Checks readiness
    /// first; a stale upstream is `NotReady`, not a crash.
    pub async fn discover_links(&self, date: NaiveDate, tab: DetailTab) -> Result<Vec<String>> {
        if !self.is_date_ready(date).await? {
            return Err(CollectError::NotReady { date });
        }

        let html = self.fetcher.fetch_text(&self.index_url()).await?;
        let ids = parsers::discover_industry_ids(&html);
        info!("Discovered {} industry pages", ids.len());

        Ok(ids.iter().map(|id| self.detail_url(id, tab)).collect())
    }

    /// Fetch and extract one industry overview page.
    pub async fn overview_page(&self, link: &str, date: NaiveDate) -> Result<Vec<IndustryOverview>> {
        let html = self.fetcher.fetch_text(link).await?;
        Ok(parsers::parse_industry_overview_page(&html, date))
    }

    /// Fetch and extract one industry performance page.
    pub async fn performance_page(
        &self,
        link: &str,
        date: NaiveDate,
    ) -> Result<Vec<IndustryPerformance>> {
        let html = self.fetcher.fetch_text(link).await?;
        Ok(parsers::parse_performance_page(&html, date))
    }

    /// Fetch the sector roll-up table (single page, readiness-gated).
    pub async fn sector_overview(&self, date: NaiveDate) -> Result<Vec<SectorOverview>> {
        if !self.is_date_ready(date).await? {
            return Err(CollectError::NotReady { date });
        }

        let html = self.fetcher.fetch_text(&self.reference_url()).await?;
        Ok(parsers::parse_sector_page(&html, date))
    }
}

// ── HKEX ──────────────────────────────────────────────────────────────────────

pub struct HkexScraper {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl HkexScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &ScraperConfig) -> Self {
        Self {
            fetcher,
            base_url: config.hkex_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The shareholding listing page is keyed by the current date.
    fn listing_url(&self) -> String {
        let today = Local::now().date_naive().format("%Y%m%d");
        format!(
            "{}/sdw/search/stocklist_c.aspx?sortby=stockcode&shareholdingdate={}",
            self.base_url, today
        )
    }

    /// All listed equity codes, excluding the 8001–8999 band (reserved for
    /// non-equity instruments) and anything ≥ 10000.
    pub async fn company_codes(&self) -> Result<Vec<u32>> {
        let html = self.fetcher.fetch_text(&self.listing_url()).await?;

        let codes: Vec<u32> = parsers::parse_company_rows(&html)
            .iter()
            .filter_map(|row| row.code.parse::<u32>().ok())
            .filter(|&code| code < 10_000 && (code <= 8_000 || code >= 9_000))
            .collect();

        if codes.is_empty() {
            // Zero codes means the page format most likely changed underneath us.
            return Err(CollectError::EmptyResult("hkex company list"));
        }
        Ok(codes)
    }

    /// Look up one company's display name by code. Absence is `Ok(None)`.
    pub async fn company_name(&self, code: u32) -> Result<Option<CompanyListing>> {
        let target = pad_code(code);
        let html = self.fetcher.fetch_text(&self.listing_url()).await?;

        Ok(parsers::parse_company_rows(&html)
            .into_iter()
            .find(|row| row.code == target))
    }
}

// ── Test support ──────────────────────────────────────────────────────────────
