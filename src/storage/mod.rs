use std::path::Path;

use chrono::{NaiveDate, Utc};
use duckdb::{params, Connection};
use tracing::{info, warn};

use crate::error::{CollectError, Result};
use crate::models::{
    HistoricalPrice, IndustryOverview, IndustryPerformance, SectorOverview, StockQuote,
};
use crate::scraper::cleaner::pad_code;
use crate::utils::{percent_change, percent_format};

// ── Schema ────────────────────────────────────────────────────────────────────

// `date` columns are VARCHAR on purpose: the date is a string-typed partition
// key shared by the idempotency gate and every loader.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS stock (
    date        VARCHAR NOT NULL,
    ask         DOUBLE,
    bid         DOUBLE,
    open        DOUBLE,
    high        DOUBLE,
    low         DOUBLE,
    close       DOUBLE,
    volume      BIGINT,
    turnover    BIGINT,
    code        VARCHAR NOT NULL,
    PRIMARY KEY (code, date)
);

CREATE TABLE IF NOT EXISTS industry (
    date        VARCHAR NOT NULL,
    sector      VARCHAR NOT NULL DEFAULT '',
    industry    VARCHAR NOT NULL DEFAULT '',
    code        VARCHAR NOT NULL,
    close       DOUBLE,
    "change"    DOUBLE,
    changepct   DOUBLE,
    volume      BIGINT,
    turnover    BIGINT,
    pe          DOUBLE,
    pb          DOUBLE,
    yieldpct    DOUBLE,
    marketcap   BIGINT,
    PRIMARY KEY (code, date)
);

CREATE TABLE IF NOT EXISTS industry_performance (
    date        VARCHAR NOT NULL,
    sector      VARCHAR NOT NULL DEFAULT '',
    industry    VARCHAR NOT NULL DEFAULT '',
    code        VARCHAR NOT NULL,
    close       DOUBLE,
    threey      DOUBLE,
    oney        DOUBLE,
    sixm        DOUBLE,
    threem      DOUBLE,
    onem        DOUBLE,
    onew        DOUBLE,
    ytd         DOUBLE,
    PRIMARY KEY (code, date)
);

CREATE TABLE IF NOT EXISTS sector (
    date        VARCHAR NOT NULL,
    sector      VARCHAR NOT NULL,
    changepct   DOUBLE,
    pchangepct  DOUBLE,
    turnover    BIGINT,
    avgturnover BIGINT,
    avgpe       DOUBLE,
    zonea       BIGINT,
    zoneb       BIGINT,
    zonec       BIGINT,
    zoned       BIGINT,
    zonee       BIGINT,
    zonen       BIGINT,
    PRIMARY KEY (sector, date)
);

CREATE SEQUENCE IF NOT EXISTS collect_runs_id;

CREATE TABLE IF NOT EXISTS collect_runs (
    id                INTEGER PRIMARY KEY DEFAULT nextval('collect_runs_id'),
    target            VARCHAR NOT NULL,
    started_at        TIMESTAMP NOT NULL,
    finished_at       TIMESTAMP,
    status            VARCHAR NOT NULL DEFAULT 'running',
    records_inserted  INTEGER DEFAULT 0,
    error_msg         VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_stock_date    ON stock (date);
CREATE INDEX IF NOT EXISTS idx_industry_date ON industry (date);
CREATE INDEX IF NOT EXISTS idx_perf_date     ON industry_performance (date);
CREATE INDEX IF NOT EXISTS idx_sector_date   ON sector (date);
"#;

// ── Destination tables ────────────────────────────────────────────────────────

/// The fixed set of destination tables. The idempotency gate interpolates
/// these names into SQL, so they must never come from caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Stock,
    Industry,
    IndustryPerformance,
    Sector,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Stock => "stock",
            Table::Industry => "industry",
            Table::IndustryPerformance => "industry_performance",
            Table::Sector => "sector",
        }
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        // parent() is Some("") for a bare filename; nothing to create then.
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CollectError::Config(format!("could not create {:?}: {}", parent, e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL)?;
        self.conn.execute_batch(INDEXES)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    // ── Idempotency gate ──────────────────────────────────────────────────────

    /// Whether `table` already holds rows for `date`. Any query failure
    /// reports `true`: when in doubt, skipping a collection pass beats
    /// risking duplicate rows. Deliberate, load-bearing contract.
    pub fn records_exist(&self, table: Table, date: NaiveDate) -> bool {
        let sql = format!("SELECT count(1) FROM {} WHERE date = ?", table.as_str());
        match self
            .conn
            .query_row(&sql, params![date.to_string()], |r| r.get::<_, i64>(0))
        {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Existence check on {} failed ({}); treating as present", table.as_str(), e);
                true
            }
        }
    }

    // ── Bulk loaders ──────────────────────────────────────────────────────────
    //
    // One transaction per batch, prepared insert executed row by row, commit
    // strictly after the last row succeeded. An early return drops the
    // transaction and rolls everything back — no partial batches, ever.

    pub fn load_prices(&self, records: &[HistoricalPrice]) -> Result<usize> {
        let table = Table::Stock.as_str();
        if records.is_empty() {
            return Err(CollectError::EmptyBatch { table });
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO stock (date, ask, bid, open, high, low, close, volume, turnover, code)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.date.to_string(),
                    r.ask,
                    r.bid,
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    r.volume,
                    r.turnover,
                    r.code_f,
                ])
                .map_err(|source| CollectError::Insert { table, source })?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn load_industry(&self, records: &[IndustryOverview]) -> Result<usize> {
        let table = Table::Industry.as_str();
        if records.is_empty() {
            return Err(CollectError::EmptyBatch { table });
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO industry
                   (date, sector, industry, code, close, "change", changepct,
                    volume, turnover, pe, pb, yieldpct, marketcap)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for r in records {
                stmt.execute(params![
                    r.date.to_string(),
                    r.sector,
                    r.industry,
                    r.code,
                    r.close,
                    r.change,
                    r.change_pct,
                    r.volume,
                    r.turnover,
                    r.pe,
                    r.pb,
                    r.yield_pct,
                    r.market_cap,
                ])
                .map_err(|source| CollectError::Insert { table, source })?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn load_performance(&self, records: &[IndustryPerformance]) -> Result<usize> {
        let table = Table::IndustryPerformance.as_str();
        if records.is_empty() {
            return Err(CollectError::EmptyBatch { table });
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO industry_performance
                 (date, sector, industry, code, close, threey, oney, sixm, threem, onem, onew, ytd)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.date.to_string(),
                    r.sector,
                    r.industry,
                    r.code,
                    r.close,
                    r.three_year,
                    r.one_year,
                    r.six_month,
                    r.three_month,
                    r.one_month,
                    r.one_week,
                    r.ytd,
                ])
                .map_err(|source| CollectError::Insert { table, source })?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn load_sectors(&self, records: &[SectorOverview]) -> Result<usize> {
        let table = Table::Sector.as_str();
        if records.is_empty() {
            return Err(CollectError::EmptyBatch { table });
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sector
                 (date, sector, changepct, pchangepct, turnover, avgturnover, avgpe,
                  zonea, zoneb, zonec, zoned, zonee, zonen)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.date.to_string(),
                    r.sector,
                    r.change_pct,
                    r.prev_change_pct,
                    r.turnover,
                    r.avg_turnover,
                    r.avg_pe,
                    r.zone_a,
                    r.zone_b,
                    r.zone_c,
                    r.zone_d,
                    r.zone_e,
                    r.zone_total,
                ])
                .map_err(|source| CollectError::Insert { table, source })?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    // ── Read-back ─────────────────────────────────────────────────────────────

    /// Latest closes for one code, newest first, with day-over-day percent
    /// change derived against the next-older row.
    pub fn recent_closes(&self, code: u32, limit: usize) -> Result<Vec<StockQuote>> {
        let mut stmt = self.conn.prepare(
            "SELECT code, date, close FROM stock WHERE code = ? ORDER BY date DESC LIMIT ?",
        )?;

        let rows: Vec<(String, String, f64)> = stmt
            .query_map(params![pad_code(code), limit as i64], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut quotes = Vec::with_capacity(rows.len());
        for (i, (code, date, close)) in rows.iter().enumerate() {
            let change_pct = match rows.get(i + 1) {
                Some((_, _, prev_close)) => percent_change(*close, *prev_close),
                None => 0.0,
            };
            let date = date
                .parse::<NaiveDate>()
                .map_err(|e| CollectError::Parse(format!("stored date {date}: {e}")))?;
            quotes.push(StockQuote {
                code: code.clone(),
                date,
                close: *close,
                change_pct,
                change_fmt: percent_format(change_pct),
            });
        }
        Ok(quotes)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn row_count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    pub fn stock_date_range(&self) -> Result<(Option<String>, Option<String>)> {
        Ok(self
            .conn
            .query_row("SELECT MIN(date), MAX(date) FROM stock", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?)
    }

    // ── Collect run audit ─────────────────────────────────────────────────────

    pub fn begin_collect_run(&self, target: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO collect_runs (target, started_at, status) VALUES (?, ?, 'running')",
            params![target, Utc::now().naive_utc()],
        )?;
        let id: i64 = self
            .conn
            .query_row("SELECT MAX(id) FROM collect_runs", [], |r| r.get(0))?;
        Ok(id)
    }

    pub fn finish_collect_run(
        &self,
        run_id: i64,
        records: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE collect_runs SET
             finished_at = ?, status = ?, records_inserted = ?, error_msg = ?
             WHERE id = ?",
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                records as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn price(code: u32, date: &str) -> HistoricalPrice {
        HistoricalPrice {
            code,
            code_f: pad_code(code),
            date: d(date),
            ask: 46.2,
            bid: 46.1,
            open: 45.9,
            high: 46.5,
            low: 45.8,
            close: 46.0,
            volume: 12_345_000,
            turnover: 567_890_000,
        }
    }

    #[test]
    fn open_accepts_a_bare_filename() {
        // A db_path with no directory component must not trip the
        // parent-directory creation.
        let name = format!("open-bare-filename-{}.duckdb", std::process::id());
        let path = Path::new(&name);
        let opened = Repository::open(path);
        std::fs::remove_file(path).ok();
        std::fs::remove_file(format!("{name}.wal")).ok();
        opened.unwrap();
    }

    #[test]
    fn records_exist_iff_count_positive() {
        let repo = repo();
        let date = d("2021-02-26");
        assert!(!repo.records_exist(Table::Stock, date));

        repo.load_prices(&[price(5, "2021-02-26")]).unwrap();
        assert!(repo.records_exist(Table::Stock, date));
        assert!(!repo.records_exist(Table::Stock, d("2021-02-27")));
    }

    #[test]
    fn records_exist_is_true_when_the_query_errors() {
        // No migrations: the table is missing, the query fails, and the
        // fail-safe answer is "exists" so nothing gets inserted twice.
        let repo = Repository::open_in_memory().unwrap();
        assert!(repo.records_exist(Table::Industry, d("2021-02-26")));
    }

    #[test]
    fn empty_batch_is_rejected() {
        let repo = repo();
        let err = repo.load_prices(&[]).unwrap_err();
        assert!(matches!(err, CollectError::EmptyBatch { table: "stock" }));
    }

    #[test]
    fn failed_row_rolls_back_the_whole_batch() {
        let repo = repo();
        let batch = vec![
            price(1, "2021-02-26"),
            price(2, "2021-02-26"),
            // Duplicate primary key (code, date) — fails mid-batch.
            price(2, "2021-02-26"),
            price(3, "2021-02-26"),
            price(4, "2021-02-26"),
        ];

        let err = repo.load_prices(&batch).unwrap_err();
        assert!(matches!(err, CollectError::Insert { table: "stock", .. }));
        // No partial commit: zero rows visible.
        assert_eq!(repo.row_count(Table::Stock).unwrap(), 0);
    }

    #[test]
    fn successful_batch_is_fully_visible() {
        let repo = repo();
        let n = repo
            .load_prices(&[price(1, "2021-02-26"), price(2, "2021-02-26")])
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(repo.row_count(Table::Stock).unwrap(), 2);
    }

    #[test]
    fn recent_closes_derives_percent_change() {
        let repo = repo();
        let mut older = price(5, "2021-02-25");
        older.close = 40.0;
        let mut newer = price(5, "2021-02-26");
        newer.close = 46.0;
        repo.load_prices(&[older, newer]).unwrap();

        let quotes = repo.recent_closes(5, 10).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].date, d("2021-02-26"));
        assert!((quotes[0].change_pct - 15.0).abs() < 1e-9);
        assert_eq!(quotes[0].change_fmt, "+15.0%");
        // Oldest row has nothing to compare against.
        assert_eq!(quotes[1].change_pct, 0.0);
    }

    #[test]
    fn collect_run_audit_round_trip() {
        let repo = repo();
        let id = repo.begin_collect_run("industry").unwrap();
        repo.finish_collect_run(id, 42, None).unwrap();

        let status: String = repo
            .conn
            .query_row(
                "SELECT status FROM collect_runs WHERE id = ?",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "success");
    }

    #[test]
    fn sector_load_accepts_full_records() {
        let repo = repo();
        let rec = SectorOverview {
            date: d("2021-02-26"),
            sector: "Materials".into(),
            change_pct: 1.2,
            prev_change_pct: -0.4,
            turnover: 1_500_000,
            avg_turnover: 1_200_000,
            avg_pe: 14.3,
            zone_a: 0,
            zone_b: 2,
            zone_c: 2,
            zone_d: 9,
            zone_e: 5,
            zone_total: 18,
        };
        assert_eq!(repo.load_sectors(&[rec]).unwrap(), 1);
        assert!(repo.records_exist(Table::Sector, d("2021-02-26")));
    }
}
