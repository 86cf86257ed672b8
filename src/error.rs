use chrono::NaiveDate;
use thiserror::Error;

/// Error taxonomy for the collection pipeline.
///
/// Fetch and load failures always surface as values of this type; a failed
/// page or a failed date must never take the whole process down. Numeric
/// parsing and row-shape mismatches are deliberately *not* represented here —
/// those are best-effort policies handled inside the extractors (see
/// `scraper::cleaner` and `scraper::parsers`).
#[derive(Debug, Error)]
pub enum CollectError {
    /// Network-level failure (connect, timeout, body read).
    #[error("request failed for {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-2xx status.
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    /// A page did not contain the structure we rely on.
    #[error("unparseable page: {0}")]
    Parse(String),

    /// The upstream source has not published data for the requested date yet.
    #[error("data not ready upstream for {date}")]
    NotReady { date: NaiveDate },

    /// An operation that requires at least one result produced none.
    #[error("empty result: {0}")]
    EmptyResult(&'static str),

    /// Refusing to bulk-load zero records.
    #[error("no records to be inserted into {table}")]
    EmptyBatch { table: &'static str },

    /// A row failed during a bulk load; the transaction was rolled back.
    #[error("insert into {table} failed")]
    Insert {
        table: &'static str,
        #[source]
        source: duckdb::Error,
    },

    /// Any other database failure (open, DDL, read queries).
    #[error("storage error")]
    Storage(#[from] duckdb::Error),

    /// Required configuration was absent or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = CollectError> = std::result::Result<T, E>;
