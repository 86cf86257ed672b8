//! Pure HTML/regex extractors for the upstream pages.
//!
//! Every extractor takes the page text and returns typed records. Row-shape
//! contracts are strict on purpose: a row that does not yield the exact
//! expected cell count is dropped silently, never raised — that is the
//! defensive contract against upstream layout drift. Page-level structure we
//! cannot do without (the Last Update stamp) *does* error.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{CollectError, Result};
use crate::models::{CompanyListing, IndustryOverview, IndustryPerformance, SectorOverview};

use super::cleaner::{parse_float, parse_scaled_int, strip_hk_suffix};

// Selectors are fixed strings; parse failures here are programmer errors.
static H1_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static TR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static TD_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static CODE_SPAN_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("span.float_l").unwrap());
static OVERVIEW_CELL_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.cls.txt_r.pad3").unwrap());
static PERF_ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table#tbTS.tblM.s2 tr").unwrap());
static SECTOR_ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.indview_tbl tr.indview_tr").unwrap());
static DIST_BAR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("div.jsPerfDistBar").unwrap());
static COMPANY_ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.table > tbody > tr").unwrap());

static INDUSTRY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"gotoindustry\('(\d{4})'\)").unwrap());
static LAST_UPDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Last Update:\s*(\d{4}/\d{2}/\d{2})").unwrap());
static COMPANY_ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*(\d{5})\s*(.*)").unwrap());

fn cell_texts(row: ElementRef, sel: &Selector) -> Vec<String> {
    row.select(sel)
        .map(|td| td.text().collect::<String>().trim().to_string())
        .collect()
}

// ── Heading ───────────────────────────────────────────────────────────────────

/// Recover (sector, industry) from the page heading, e.g.
/// "Industry Details - Materials - Chemical Products". A heading that does not
/// split into exactly three parts leaves both labels empty — no error.
fn parse_heading(doc: &Html) -> (String, String) {
    for h1 in doc.select(&H1_SEL) {
        let text = h1.text().collect::<String>();
        let parts: Vec<&str> = text.split('-').collect();
        if parts.len() == 3 {
            return (parts[1].trim().to_string(), parts[2].trim().to_string());
        }
    }
    (String::new(), String::new())
}

// ── Industry overview (tab 1) ─────────────────────────────────────────────────

/// Extract overview records from one industry detail page. A row is accepted
/// only when its code span carries a ".HK" code and it yields exactly 10
/// numeric cells (the first of which is a filler).
pub fn parse_industry_overview_page(html: &str, date: NaiveDate) -> Vec<IndustryOverview> {
    let doc = Html::parse_document(html);
    let (sector, industry) = parse_heading(&doc);

    let mut records = Vec::new();
    for row in doc.select(&TR_SEL) {
        let Some(span) = row.select(&CODE_SPAN_SEL).next() else {
            continue;
        };
        let raw_code = span.text().collect::<String>();
        if !raw_code.contains(".HK") {
            continue;
        }
        let code = strip_hk_suffix(&raw_code);

        let values = cell_texts(row, &OVERVIEW_CELL_SEL);
        if values.len() != 10 {
            // Layout drift or a summary row — drop it and keep going.
            continue;
        }

        records.push(IndustryOverview {
            date,
            sector: sector.clone(),
            industry: industry.clone(),
            code,
            close: parse_float(&values[1]),
            change: parse_float(&values[2]),
            change_pct: parse_float(&values[3]),
            volume: parse_scaled_int(&values[4]),
            turnover: parse_scaled_int(&values[5]),
            pe: parse_float(&values[6]),
            pb: parse_float(&values[7]),
            yield_pct: parse_float(&values[8]),
            market_cap: parse_scaled_int(&values[9]),
        });
    }
    records
}

// ── Industry performance (tab 3) ──────────────────────────────────────────────

/// Extract trailing-return records from one performance page. A row is
/// accepted only when it yields exactly 12 cells.
pub fn parse_performance_page(html: &str, date: NaiveDate) -> Vec<IndustryPerformance> {
    let doc = Html::parse_document(html);
    let (sector, industry) = parse_heading(&doc);

    let mut records = Vec::new();
    for row in doc.select(&PERF_ROW_SEL) {
        let values = cell_texts(row, &TD_SEL);
        if values.len() != 12 {
            continue;
        }

        records.push(IndustryPerformance {
            date,
            sector: sector.clone(),
            industry: industry.clone(),
            code: strip_hk_suffix(&values[0]),
            close: parse_float(&values[2]),
            three_year: parse_float(&values[5]),
            one_year: parse_float(&values[6]),
            six_month: parse_float(&values[7]),
            three_month: parse_float(&values[8]),
            one_month: parse_float(&values[9]),
            one_week: parse_float(&values[10]),
            ytd: parse_float(&values[11]),
        });
    }
    records
}

// ── Sector overview ───────────────────────────────────────────────────────────

/// Extract sector roll-up rows. A row needs at least 6 text cells; the five
/// zone buckets come from the distribution bar's `def` attribute
/// ("0,2,2,9,5"), with the total derived as their sum.
pub fn parse_sector_page(html: &str, date: NaiveDate) -> Vec<SectorOverview> {
    let doc = Html::parse_document(html);

    let mut records = Vec::new();
    for row in doc.select(&SECTOR_ROW_SEL) {
        let values = cell_texts(row, &TD_SEL);
        if values.len() < 6 {
            continue;
        }

        let mut zones = [0i64; 5];
        if let Some(def) = row
            .select(&DIST_BAR_SEL)
            .next()
            .and_then(|div| div.value().attr("def"))
        {
            for (slot, part) in zones.iter_mut().zip(def.split(',')) {
                *slot = part.trim().parse().unwrap_or(0);
            }
        }

        records.push(SectorOverview {
            date,
            sector: values[0].clone(),
            change_pct: parse_float(&values[1]),
            prev_change_pct: parse_float(&values[2]),
            turnover: parse_scaled_int(&values[3]),
            avg_turnover: parse_scaled_int(&values[4]),
            avg_pe: parse_float(&values[5]),
            zone_a: zones[0],
            zone_b: zones[1],
            zone_c: zones[2],
            zone_d: zones[3],
            zone_e: zones[4],
            zone_total: zones.iter().sum(),
        });
    }
    records
}

// ── Index page link discovery ─────────────────────────────────────────────────

/// Pull the 4-digit industry identifiers out of the index page's embedded
/// `gotoindustry('NNNN')` calls, in document order.
pub fn discover_industry_ids(html: &str) -> Vec<String> {
    INDUSTRY_ID_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect()
}

// ── Last-update stamp ─────────────────────────────────────────────────────────

/// Extract the "Last Update: YYYY/MM/DD" stamp from the reference page.
/// A missing or malformed stamp is a parse error, not a silent default.
pub fn parse_last_update(html: &str) -> Result<NaiveDate> {
    let raw = LAST_UPDATE_RE
        .captures(html)
        .map(|c| c[1].to_string())
        .ok_or_else(|| CollectError::Parse("no Last Update stamp on reference page".into()))?;

    let normalized = raw.replace('/', "-");
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .map_err(|e| CollectError::Parse(format!("bad Last Update stamp {raw}: {e}")))
}

// ── Company listing rows ──────────────────────────────────────────────────────

/// Extract (code, name) pairs from the shareholding listing page. Each table
/// row's cell text is matched against the 5-digit-code pattern; rows without
/// a match contribute nothing.
pub fn parse_company_rows(html: &str) -> Vec<CompanyListing> {
    let doc = Html::parse_document(html);

    let mut listings = Vec::new();
    for row in doc.select(&COMPANY_ROW_SEL) {
        let content = row
            .select(&TD_SEL)
            .map(|td| td.text().collect::<String>())
            .collect::<String>();

        for caps in COMPANY_ROW_RE.captures_iter(&content) {
            listings.push(CompanyListing {
                code: caps[1].to_string(),
                name: caps[2].trim().to_string(),
            });
        }
    }
    listings
}
