use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Historical price (CSV API) ────────────────────────────────────────────────

/// One day of quotes for one stock, volume/turnover in absolute units
/// (the upstream CSV reports thousands; the client scales by 1000).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalPrice {
    pub code: u32,
    /// Code in 5-digit zero-padded wire format, e.g. "00005".
    pub code_f: String,
    pub date: NaiveDate,
    pub ask: f64,
    pub bid: f64,
    /// The feed carries no open; previous close stands in for it.
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub turnover: i64,
}

// ── Industry overview (AASTOCKS detail page, tab 1) ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndustryOverview {
    pub date: NaiveDate,
    pub sector: String,
    pub industry: String,
    pub code: String,
    pub close: f64,
    pub change: f64,
    pub change_pct: f64,
    pub volume: i64,
    pub turnover: i64,
    pub pe: f64,
    pub pb: f64,
    pub yield_pct: f64,
    pub market_cap: i64,
}

// ── Industry performance (AASTOCKS detail page, tab 3) ────────────────────────

/// Trailing returns for one stock within an industry, all in percent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndustryPerformance {
    pub date: NaiveDate,
    pub sector: String,
    pub industry: String,
    pub code: String,
    pub close: f64,
    pub one_week: f64,
    pub one_month: f64,
    pub three_month: f64,
    pub six_month: f64,
    pub one_year: f64,
    pub three_year: f64,
    pub ytd: f64,
}

// ── Sector overview (AASTOCKS industry-performance page) ──────────────────────

/// Sector-level roll-up. The five zone counts bucket the sector's stocks by
/// daily change: A > +2%, B 0..+2%, C = 0%, D -2%..0, E < -2%.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorOverview {
    pub date: NaiveDate,
    pub sector: String,
    pub change_pct: f64,
    pub prev_change_pct: f64,
    pub turnover: i64,
    pub avg_turnover: i64,
    pub avg_pe: f64,
    pub zone_a: i64,
    pub zone_b: i64,
    pub zone_c: i64,
    pub zone_d: i64,
    pub zone_e: i64,
    /// Sum of the five buckets — total stocks counted for the sector.
    pub zone_total: i64,
}

// ── Company listing (HKEX shareholding page) ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyListing {
    /// 5-digit zero-padded code as printed on the page.
    pub code: String,
    pub name: String,
}

// ── Stock quote (read-back for the `quote` subcommand) ────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StockQuote {
    pub code: String,
    pub date: NaiveDate,
    pub close: f64,
    /// Day-over-day change on close, percent.
    pub change_pct: f64,
    /// Display form with explicit sign, e.g. "+1.2%".
    pub change_fmt: String,
}

