//! # Ranges — Paginated Collection Enumeration
//!
//! The panel serves its range table through a DataTables endpoint: a JSON
//! envelope with a total-count field (`iTotalDisplayRecords`, sometimes a
//! numeric string) and `aaData`, an array of fixed-width rows. The range id
//! is not a column of its own; it sits in the `info` attribute of the
//! `a#request` anchor inside the HTML action cell.
//!
//! Rows that are too short, or whose action cell carries no id, are dropped
//! without error: the panel renders them for ranges that cannot be requested.

use crate::config::HarvestConfig;
use crate::error::PanelError;
use crate::session::PanelSession;
use scraper::{Html, Selector};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rows narrower than this are not range rows.
pub const MIN_COLUMNS: usize = 10;
const ACTION_COLUMN: usize = 9;

static REQUEST_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a#request").unwrap());

/// A requestable range as listed by the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub id: String,
    pub name: String,
    pub prefix: String,
}

/// One page of the collection.
#[derive(Debug, Clone)]
pub struct RangePage {
    /// Size of the whole collection, as reported with this page.
    pub total: u64,
    pub ranges: Vec<Range>,
}

#[derive(Deserialize)]
struct RangeEnvelope {
    #[serde(rename = "iTotalDisplayRecords", deserialize_with = "lenient_count")]
    total: u64,
    #[serde(rename = "aaData", default)]
    rows: Vec<Vec<Value>>,
}

/// Envelope of a count-only DataTables query.
#[derive(Deserialize)]
pub(crate) struct CountEnvelope {
    #[serde(rename = "iTotalDisplayRecords", deserialize_with = "lenient_count")]
    pub total: u64,
}

/// Accept a count as a JSON integer or a numeric string.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    use serde::de::Error;
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("count is not a non-negative integer: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("count is not numeric: {:?}", s))),
        other => Err(D::Error::custom(format!("unexpected count value: {}", other))),
    }
}

/// Decode a range page from a DataTables JSON body.
pub fn parse_page(body: Value) -> Result<RangePage, PanelError> {
    let envelope: RangeEnvelope = serde_json::from_value(body)
        .map_err(|e| PanelError::Parse(format!("range page: {}", e)))?;
    let ranges = envelope.rows.iter().filter_map(|row| extract_range(row)).collect();
    Ok(RangePage {
        total: envelope.total,
        ranges,
    })
}

/// Build a `Range` from one table row, or `None` if the row is not requestable.
pub fn extract_range(row: &[Value]) -> Option<Range> {
    if row.len() < MIN_COLUMNS {
        return None;
    }
    let action = cell_text(&row[ACTION_COLUMN]);
    if !action.contains("info=") {
        return None;
    }
    let id = action_range_id(&action)?;

    let first = cell_text(&row[0]);
    let prefix = cell_text(&row[1]);
    let name = if first.trim().is_empty() {
        prefix.clone()
    } else {
        first
    };
    Some(Range { id, name, prefix })
}

/// Pull the `info` attribute off the `a#request` anchor in an action cell.
pub fn action_range_id(fragment: &str) -> Option<String> {
    let html = Html::parse_fragment(fragment);
    let anchor = html.select(&REQUEST_ANCHOR).next()?;
    anchor
        .value()
        .attr("info")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct RangeEnumerator {
    config: Arc<HarvestConfig>,
}

impl RangeEnumerator {
    pub fn new(config: Arc<HarvestConfig>) -> Self {
        RangeEnumerator { config }
    }

    /// Fetch `length` rows starting at `start`, sorted by the first column.
    pub async fn fetch_page(
        &self,
        session: &PanelSession,
        start: u64,
        length: u32,
    ) -> Result<RangePage, PanelError> {
        let query = [
            ("sEcho", "1".to_string()),
            ("iColumns", MIN_COLUMNS.to_string()),
            ("iDisplayStart", start.to_string()),
            ("iDisplayLength", length.to_string()),
            ("mDataProp_0", "0".to_string()),
            ("bSortable_0", "true".to_string()),
            ("iSortCol_0", "0".to_string()),
            ("sSortDir_0", "asc".to_string()),
            ("iSortingCols", "1".to_string()),
        ];
        let endpoints = &self.config.endpoints;
        let body = session
            .ajax_json(
                &endpoints.ranges,
                &endpoints.ranges_page,
                &query,
                self.config.page_timeout,
            )
            .await?;
        let page = parse_page(body)?;
        debug!(start, length, found = page.ranges.len(), total = page.total, "fetched range page");
        Ok(page)
    }

    /// Size of the collection, read from a one-row probe page.
    pub async fn total_count(&self, session: &PanelSession) -> Result<u64, PanelError> {
        Ok(self.fetch_page(session, 0, 1).await?.total)
    }

    /// `fetch_page` with exponential backoff between attempts.
    ///
    /// Returns `None` once the attempt budget is spent, or early if `cancel`
    /// fires during a backoff wait.
    pub async fn fetch_page_with_retry(
        &self,
        session: &PanelSession,
        start: u64,
        length: u32,
        cancel: &CancellationToken,
    ) -> Option<RangePage> {
        let attempts = self.config.page_fetch_attempts;
        for attempt in 0..attempts {
            match self.fetch_page(session, start, length).await {
                Ok(page) => return Some(page),
                Err(e) => {
                    warn!(
                        start,
                        end = start + u64::from(length),
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "failed to load range page"
                    );
                    if !crate::pause(self.config.page_backoff(attempt), cancel).await {
                        return None;
                    }
                }
            }
        }
        None
    }
}
