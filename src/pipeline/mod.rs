//! Pipeline orchestrators: tie the scrapers, the price API and storage
//! together, one collection pass per destination table.
//!
//! Every pass runs the same gauntlet:
//!   1. Idempotency gate — if the destination already has rows for the date,
//!      the pass is a skip (re-runs must be harmless), observed strictly
//!      before any fetch starts.
//!   2. Date readiness — the upstream "Last Update" stamp must match the
//!      requested date, otherwise `NotReady`.
//!   3. Discover / fetch / extract — detail pages under a bounded fetch pool;
//!      a failed page is logged and counted, never fatal for the pass.
//!   4. One bulk load per (table, date), after all pages are in.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::CollectError;
use crate::models::HistoricalPrice;
use crate::quandl::QuandlClient;
use crate::scraper::http_client::HttpClient;
use crate::scraper::{AastocksScraper, DetailTab, HkexScraper, PageFetcher};
use crate::storage::{Repository, Table};

#[derive(Debug)]
pub struct CollectStats {
    pub target: &'static str,
    pub pages: usize,
    pub records: usize,
    pub errors: usize,
    pub skipped: bool,
}

impl CollectStats {
    fn skipped(target: &'static str) -> Self {
        Self {
            target,
            pages: 0,
            records: 0,
            errors: 0,
            skipped: true,
        }
    }
}

pub struct Pipeline {
    config: AppConfig,
    fetcher: Arc<dyn PageFetcher>,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpClient::new(&config.scraper)?);
        Ok(Self { config, fetcher })
    }

    /// Swap the HTTP layer out — canned pages in tests.
    pub fn with_fetcher(config: AppConfig, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { config, fetcher }
    }

    fn aastocks(&self) -> Arc<AastocksScraper> {
        Arc::new(AastocksScraper::new(
            Arc::clone(&self.fetcher),
            &self.config.scraper,
        ))
    }

    // ── Industry overview ─────────────────────────────────────────────────────

    pub async fn collect_industry_overview(
        &self,
        repo: &Repository,
        date: NaiveDate,
    ) -> Result<CollectStats> {
        let target = Table::Industry;
        if repo.records_exist(target, date) {
            info!("{}: records exist for {} — skipping", target.as_str(), date);
            return Ok(CollectStats::skipped(target.as_str()));
        }

        let scraper = self.aastocks();
        let links = scraper
            .discover_links(date, DetailTab::Overview)
            .await
            .context("industry link discovery failed")?;

        let run_id = repo.begin_collect_run(target.as_str()).unwrap_or(0);
        let sem = Arc::new(Semaphore::new(self.config.pipeline.concurrency));

        let mut handles = Vec::with_capacity(links.len());
        for link in &links {
            let scraper = Arc::clone(&scraper);
            let sem = Arc::clone(&sem);
            let link = link.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                let recs = scraper.overview_page(&link, date).await?;
                Ok::<_, anyhow::Error>(recs)
            }));
        }

        // Join in spawn order so the aggregate keeps discovery order.
        let mut records = Vec::new();
        let mut errors = 0usize;
        for (link, handle) in links.iter().zip(handles) {
            match handle.await {
                Ok(Ok(recs)) => records.extend(recs),
                Ok(Err(e)) => {
                    warn!("{}: {:#}", link, e);
                    errors += 1;
                }
                Err(e) => {
                    warn!("task panic for {}: {}", link, e);
                    errors += 1;
                }
            }
        }

        let stats = match repo.load_industry(&records) {
            Ok(n) => {
                repo.finish_collect_run(run_id, n, None).ok();
                CollectStats {
                    target: target.as_str(),
                    pages: links.len(),
                    records: n,
                    errors,
                    skipped: false,
                }
            }
            Err(e) => {
                repo.finish_collect_run(run_id, 0, Some(&e.to_string())).ok();
                return Err(e.into());
            }
        };

        info!(
            "industry overview {}: {} pages, {} records, {} errors",
            date, stats.pages, stats.records, stats.errors
        );
        Ok(stats)
    }

    // ── Industry performance ──────────────────────────────────────────────────

    pub async fn collect_industry_performance(
        &self,
        repo: &Repository,
        date: NaiveDate,
    ) -> Result<CollectStats> {
        let target = Table::IndustryPerformance;
        if repo.records_exist(target, date) {
            info!("{}: records exist for {} — skipping", target.as_str(), date);
            return Ok(CollectStats::skipped(target.as_str()));
        }

        let scraper = self.aastocks();
        let links = scraper
            .discover_links(date, DetailTab::Performance)
            .await
            .context("performance link discovery failed")?;

        let run_id = repo.begin_collect_run(target.as_str()).unwrap_or(0);
        let sem = Arc::new(Semaphore::new(self.config.pipeline.concurrency));

        let mut handles = Vec::with_capacity(links.len());
        for link in &links {
            let scraper = Arc::clone(&scraper);
            let sem = Arc::clone(&sem);
            let link = link.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                let recs = scraper.performance_page(&link, date).await?;
                Ok::<_, anyhow::Error>(recs)
            }));
        }

        let mut records = Vec::new();
        let mut errors = 0usize;
        for (link, handle) in links.iter().zip(handles) {
            match handle.await {
                Ok(Ok(recs)) => records.extend(recs),
                Ok(Err(e)) => {
                    warn!("{}: {:#}", link, e);
                    errors += 1;
                }
                Err(e) => {
                    warn!("task panic for {}: {}", link, e);
                    errors += 1;
                }
            }
        }

        let stats = match repo.load_performance(&records) {
            Ok(n) => {
                repo.finish_collect_run(run_id, n, None).ok();
                CollectStats {
                    target: target.as_str(),
                    pages: links.len(),
                    records: n,
                    errors,
                    skipped: false,
                }
            }
            Err(e) => {
                repo.finish_collect_run(run_id, 0, Some(&e.to_string())).ok();
                return Err(e.into());
            }
        };

        info!(
            "industry performance {}: {} pages, {} records, {} errors",
            date, stats.pages, stats.records, stats.errors
        );
        Ok(stats)
    }

    // ── Sector overview ───────────────────────────────────────────────────────

    pub async fn collect_sector_overview(
        &self,
        repo: &Repository,
        date: NaiveDate,
    ) -> Result<CollectStats> {
        let target = Table::Sector;
        if repo.records_exist(target, date) {
            info!("{}: records exist for {} — skipping", target.as_str(), date);
            return Ok(CollectStats::skipped(target.as_str()));
        }

        let run_id = repo.begin_collect_run(target.as_str()).unwrap_or(0);
        let records = match self.aastocks().sector_overview(date).await {
            Ok(recs) => recs,
            Err(e) => {
                repo.finish_collect_run(run_id, 0, Some(&e.to_string())).ok();
                return Err(e).context("sector overview scrape failed");
            }
        };

        let stats = match repo.load_sectors(&records) {
            Ok(n) => {
                repo.finish_collect_run(run_id, n, None).ok();
                CollectStats {
                    target: target.as_str(),
                    pages: 1,
                    records: n,
                    errors: 0,
                    skipped: false,
                }
            }
            Err(e) => {
                repo.finish_collect_run(run_id, 0, Some(&e.to_string())).ok();
                return Err(e.into());
            }
        };

        info!("sector overview {}: {} records", date, stats.records);
        Ok(stats)
    }

    // ── Historical price backfill (one code, full history) ────────────────────

    pub async fn backfill_code(&self, repo: &Repository, code: u32) -> Result<CollectStats> {
        let quandl = QuandlClient::new(Arc::clone(&self.fetcher), &self.config.api)?;
        let records = quandl
            .stock_by_code(code)
            .await
            .context("price history fetch failed")?;

        let run_id = repo.begin_collect_run(Table::Stock.as_str()).unwrap_or(0);
        let stats = match repo.load_prices(&records) {
            Ok(n) => {
                repo.finish_collect_run(run_id, n, None).ok();
                CollectStats {
                    target: Table::Stock.as_str(),
                    pages: 1,
                    records: n,
                    errors: 0,
                    skipped: false,
                }
            }
            Err(e) => {
                repo.finish_collect_run(run_id, 0, Some(&e.to_string())).ok();
                return Err(e.into());
            }
        };

        info!("backfill {}: {} records", code, stats.records);
        Ok(stats)
    }

    // ── Historical prices ─────────────────────────────────────────────────────

    /// Sweep every listed code for one date. Sequential on purpose: the
    /// consecutive-failure counter is ordered, and tripping it means the
    /// upstream has nothing for this date yet — abort with `NotReady` rather
    /// than loading partial data.
    pub async fn collect_prices(&self, repo: &Repository, date: NaiveDate) -> Result<CollectStats> {
        let target = Table::Stock;
        if repo.records_exist(target, date) {
            info!("{}: records exist for {} — skipping", target.as_str(), date);
            return Ok(CollectStats::skipped(target.as_str()));
        }

        let hkex = HkexScraper::new(Arc::clone(&self.fetcher), &self.config.scraper);
        let quandl = QuandlClient::new(Arc::clone(&self.fetcher), &self.config.api)?;

        let codes = hkex.company_codes().await.context("company list failed")?;
        info!("prices {}: sweeping {} codes", date, codes.len());

        let run_id = repo.begin_collect_run(target.as_str()).unwrap_or(0);
        let limit = self.config.pipeline.consecutive_failure_limit;

        let mut records: Vec<HistoricalPrice> = Vec::new();
        let mut consecutive_failures = 0u32;
        let mut errors = 0usize;

        for code in &codes {
            if consecutive_failures >= limit {
                let err = CollectError::NotReady { date };
                repo.finish_collect_run(run_id, 0, Some(&err.to_string())).ok();
                warn!(
                    "prices {}: {} consecutive failures — aborting sweep",
                    date, consecutive_failures
                );
                return Err(err.into());
            }

            match quandl.stock_on_date(*code, date).await {
                Ok(price) => {
                    consecutive_failures = 0;
                    records.push(price);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    errors += 1;
                    warn!("prices {}: code {} failed: {}", date, code, e);
                }
            }
        }

        let stats = match repo.load_prices(&records) {
            Ok(n) => {
                repo.finish_collect_run(run_id, n, None).ok();
                CollectStats {
                    target: target.as_str(),
                    pages: codes.len(),
                    records: n,
                    errors,
                    skipped: false,
                }
            }
            Err(e) => {
                repo.finish_collect_run(run_id, 0, Some(&e.to_string())).ok();
                return Err(e.into());
            }
        };

        info!(
            "prices {}: {} codes, {} records, {} errors",
            date, stats.pages, stats.records, stats.errors
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::StaticPages;
    use chrono::Local;

    const AASTOCKS: &str = "http://aastocks.test";
    const QUANDL: &str = "http://quandl.test";

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.scraper.aastocks_base_url = AASTOCKS.into();
        config.scraper.hkex_base_url = "http://hkex.test".into();
        config.api.base_url = QUANDL.into();
        config.api.token = "tok".into();
        config
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn reference_url() -> String {
        format!("{AASTOCKS}/en/stocks/market/industry/industry-performance.aspx")
    }

    fn index_url() -> String {
        format!("{AASTOCKS}/en/stocks/market/industry/sector-industry-details.aspx")
    }

    fn detail_url(id: &str, tab: u8) -> String {
        format!("{}?industrysymbol={}&t={}&s=&o=&p=", index_url(), id, tab)
    }

    fn overview_detail_page(heading: &str, code: &str) -> String {
        let cells: String = [
            "", "2.50", "0.05", "2.04%", "1.5K", "3.75K", "10.5", "1.2", "3.4%", "1.2B",
        ]
        .iter()
        .map(|c| format!(r#"<td class="cls txt_r pad3">{c}</td>"#))
        .collect();
        format!(
            r#"<html><h1>{heading}</h1><table><tbody>
               <tr><td><span class="float_l">{code}.HK</span></td>{cells}</tr>
               </tbody></table></html>"#
        )
    }

    fn listing_url() -> String {
        format!(
            "http://hkex.test/sdw/search/stocklist_c.aspx?sortby=stockcode&shareholdingdate={}",
            Local::now().date_naive().format("%Y%m%d")
        )
    }

    fn quandl_url(code: &str, date: &str) -> String {
        format!("{QUANDL}/{code}/data.csv?limit=10&end_date={date}&order=desc&api_key=tok")
    }

    fn quandl_csv(date: &str) -> String {
        format!(
            "Date,Ask,Bid,Previous Close,High,Low,Nominal Price,Share Volume (000),Turnover (000)\n\
             {date},46.2,46.1,45.9,46.5,45.8,46.0,12345,567890\n"
        )
    }

    #[tokio::test]
    async fn overview_end_to_end_two_pages_two_records_then_gate() {
        let date = d("2021-02-26");
        let fetcher = StaticPages::new()
            .with_page(reference_url(), "Last Update: 2021/02/26")
            .with_page(index_url(), "gotoindustry('1015'); gotoindustry('2021');")
            .with_page(
                detail_url("1015", 1),
                overview_detail_page("Industry Details - Materials - Chemical Products", "00301"),
            )
            .with_page(
                detail_url("2021", 1),
                overview_detail_page("Industry Details - Financials - Banks", "00005"),
            );

        let pipeline = Pipeline::with_fetcher(config(), Arc::new(fetcher));
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let stats = pipeline
            .collect_industry_overview(&repo, date)
            .await
            .unwrap();
        assert!(!stats.skipped);
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(repo.row_count(Table::Industry).unwrap(), 2);

        // Second pass hits the idempotency gate and does nothing.
        let again = pipeline
            .collect_industry_overview(&repo, date)
            .await
            .unwrap();
        assert!(again.skipped);
        assert_eq!(repo.row_count(Table::Industry).unwrap(), 2);
    }

    #[tokio::test]
    async fn overview_not_ready_when_stamp_is_stale() {
        let fetcher = StaticPages::new().with_page(reference_url(), "Last Update: 2021/02/25");
        let pipeline = Pipeline::with_fetcher(config(), Arc::new(fetcher));
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let err = pipeline
            .collect_industry_overview(&repo, d("2021-02-26"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CollectError>(),
            Some(CollectError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn failed_detail_page_is_counted_not_fatal() {
        let date = d("2021-02-26");
        // Page 2021 is missing — the mock answers 404 for it.
        let fetcher = StaticPages::new()
            .with_page(reference_url(), "Last Update: 2021/02/26")
            .with_page(index_url(), "gotoindustry('1015'); gotoindustry('2021');")
            .with_page(
                detail_url("1015", 1),
                overview_detail_page("Industry Details - Materials - Chemical Products", "00301"),
            );

        let pipeline = Pipeline::with_fetcher(config(), Arc::new(fetcher));
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let stats = pipeline
            .collect_industry_overview(&repo, date)
            .await
            .unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn price_sweep_aborts_not_ready_after_consecutive_failures() {
        let date = d("2021-02-26");
        let listing = r#"<table class="table"><tbody>
            <tr><td>00001</td><td>CKH Holdings</td></tr>
            <tr><td>00002</td><td>CLP Holdings</td></tr>
            <tr><td>00003</td><td>HK and China Gas</td></tr>
        </tbody></table>"#;

        // No price CSV pages at all: every code fails.
        let fetcher = StaticPages::new().with_page(listing_url(), listing);

        let mut config = config();
        config.pipeline.consecutive_failure_limit = 2;
        let pipeline = Pipeline::with_fetcher(config, Arc::new(fetcher));
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let err = pipeline.collect_prices(&repo, date).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CollectError>(),
            Some(CollectError::NotReady { .. })
        ));
        assert_eq!(repo.row_count(Table::Stock).unwrap(), 0);
    }

    #[tokio::test]
    async fn price_sweep_success_resets_the_failure_counter() {
        let date = d("2021-02-26");
        let listing = r#"<table class="table"><tbody>
            <tr><td>00001</td><td>CKH Holdings</td></tr>
            <tr><td>00002</td><td>CLP Holdings</td></tr>
            <tr><td>00003</td><td>HK and China Gas</td></tr>
        </tbody></table>"#;

        // Code 2 has no data; 1 and 3 succeed around it.
        let fetcher = StaticPages::new()
            .with_page(listing_url(), listing)
            .with_page(quandl_url("00001", "2021-02-26"), quandl_csv("2021-02-26"))
            .with_page(quandl_url("00003", "2021-02-26"), quandl_csv("2021-02-26"));

        let mut config = config();
        config.pipeline.consecutive_failure_limit = 2;
        let pipeline = Pipeline::with_fetcher(config, Arc::new(fetcher));
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let stats = pipeline.collect_prices(&repo, date).await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(repo.row_count(Table::Stock).unwrap(), 2);
    }
}
