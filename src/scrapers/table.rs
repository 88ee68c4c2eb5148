//! Table extraction and row interpretation for the primary source.
//!
//! The source page publishes its items as an HTML table (`table#<id>`). Columns
//! carry no fixed schema, so each row is interpreted by looking at header
//! names and cell contents in order (see [`RowFields::from_row`]).

use crate::models::AggregatedEntry;
use crate::utils::parse_pub_date;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt;
use tracing::{debug, info, instrument};
use url::Url;

static HEAD_CELLS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("thead th, thead td").expect("valid thead selector"));
static BODY_ROWS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody tr").expect("valid tbody selector"));
static ROWS: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid row selector"));
static CELLS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th, td").expect("valid cell selector"));
static LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));

/// One table cell: its visible text and every link inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub header: String,
    pub text: String,
    pub links: Vec<String>,
}

/// One table row, cells in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The id does not form a valid CSS selector.
    InvalidId(String),
    /// No `table#<id>` in the page.
    NotFound(String),
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::InvalidId(id) => write!(f, "invalid table id '{id}'"),
            TableError::NotFound(id) => write!(f, "table with id '{id}' not found"),
        }
    }
}

impl Error for TableError {}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text().flat_map(str::split_whitespace).join(" ")
}

fn cell_links(cell: &ElementRef<'_>) -> Vec<String> {
    cell.select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Extract every non-empty row of `table#<table_id>` from a rendered page.
///
/// Header names come from the `thead` cells, else from the first row, which
/// is then not returned as data. Rows come from `tbody`, else from every row
/// of the table. Columns without a header are named `Column_<n>` (1-based).
#[instrument(level = "info", skip_all, fields(%table_id))]
pub fn extract_table(html: &str, table_id: &str) -> Result<Vec<TableRow>, TableError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(&format!("table#{table_id}"))
        .map_err(|_| TableError::InvalidId(table_id.to_string()))?;
    let table = document
        .select(&selector)
        .next()
        .ok_or_else(|| TableError::NotFound(table_id.to_string()))?;

    let mut headers: Vec<String> = table.select(&HEAD_CELLS).map(|c| cell_text(&c)).collect();
    // without a thead the first row holds the headers, wherever the parser put it
    let header_row = if headers.is_empty() {
        table.select(&ROWS).next()
    } else {
        None
    };
    if let Some(first) = header_row {
        headers = first.select(&CELLS).map(|c| cell_text(&c)).collect();
    }

    let body_rows: Vec<ElementRef<'_>> = table.select(&BODY_ROWS).collect();
    let rows: Vec<ElementRef<'_>> = if body_rows.is_empty() {
        // skip the thead row when there is one
        table
            .select(&ROWS)
            .skip(usize::from(header_row.is_none()))
            .collect()
    } else {
        body_rows
    };
    let rows = rows
        .into_iter()
        .filter(|row| header_row.is_none_or(|h| h.id() != row.id()))
        .collect_vec();

    let extracted: Vec<TableRow> = rows
        .iter()
        .map(|row| TableRow {
            cells: row
                .select(&CELLS)
                .enumerate()
                .map(|(i, cell)| TableCell {
                    header: headers
                        .get(i)
                        .filter(|h| !h.is_empty())
                        .cloned()
                        .unwrap_or_else(|| format!("Column_{}", i + 1)),
                    text: cell_text(&cell),
                    links: cell_links(&cell),
                })
                .collect(),
        })
        .filter(|row| row.cells.iter().any(|c| !c.text.is_empty() || !c.links.is_empty()))
        .collect();

    info!(rows = extracted.len(), "Extracted table rows");
    Ok(extracted)
}

/// The fields of a row, identified by header name or content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFields {
    pub date: String,
    pub rating: String,
    pub title: String,
    pub title_url: String,
    pub description: String,
}

const RATINGS: [&str; 3] = ["essential", "important", "optional"];

impl RowFields {
    /// Scan the cells in order. The first cell that looks like a date is the
    /// date, the first that looks like a rating is the rating, the first with
    /// links or more than 10 characters is the title, and the longest of the
    /// rest is the description.
    pub fn from_row(row: &TableRow) -> Self {
        let mut fields = RowFields::default();

        for cell in &row.cells {
            let header = cell.header.to_lowercase();
            let text = cell.text.trim();
            let lower = text.to_lowercase();
            let rating_column = header == "rating" || header == "score";

            if fields.date.is_empty()
                && (matches!(header.as_str(), "date" | "published" | "time")
                    || text.chars().take(10).any(|c| c.is_ascii_digit()))
            {
                fields.date = text.to_string();
            } else if fields.rating.is_empty() && (rating_column || RATINGS.contains(&lower.as_str())) {
                fields.rating = text.to_string();
            } else if fields.title.is_empty()
                && (!cell.links.is_empty() || (text.chars().count() > 10 && !rating_column))
            {
                fields.title = text.to_string();
                if let Some(link) = cell.links.first() {
                    fields.title_url = link.clone();
                }
            } else if text.chars().count() > fields.description.chars().count() {
                fields.description = text.to_string();
            }
        }

        if fields.title.is_empty() {
            if let Some(first) = row.cells.iter().map(|c| c.text.trim()).find(|t| !t.is_empty()) {
                fields.title = first.to_string();
            }
        }
        fields
    }

    /// ` [ ! ]`, ` [ * ]` or ` [ ~ ]` for a known rating, empty otherwise.
    pub fn rating_tag(&self) -> &'static str {
        match self.rating.to_lowercase().as_str() {
            "essential" => " [ ! ]",
            "important" => " [ * ]",
            "optional" => " [ ~ ]",
            _ => "",
        }
    }

    /// SHA-256 (hex) of `date|rating|title|description`.
    pub fn guid(&self) -> String {
        let key = format!(
            "{}|{}|{}|{}",
            self.date, self.rating, self.title, self.description
        );
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }
}

/// Turn extracted rows into feed entries.
///
/// # Arguments
///
/// * `rows` - Rows from [`extract_table`], in page order
/// * `page_url` - Base for resolving relative title links
/// * `feed_link` - Link used for rows without a title link
/// * `now` - Publication time for rows without a parsable date
pub fn to_entries(
    rows: &[TableRow],
    page_url: &str,
    feed_link: &str,
    now: DateTime<Utc>,
) -> Vec<AggregatedEntry> {
    let base = Url::parse(page_url).ok();

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let fields = RowFields::from_row(row);
            let title = if fields.title.is_empty() {
                format!("Entry {}", i + 1)
            } else {
                fields.title.clone()
            };
            let link = if fields.title_url.is_empty() {
                feed_link.to_string()
            } else {
                base.as_ref()
                    .and_then(|b| b.join(&fields.title_url).ok())
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| fields.title_url.clone())
            };
            let description = if fields.description.is_empty() {
                title.clone()
            } else {
                fields.description.clone()
            };
            let published = parse_pub_date(&fields.date).unwrap_or(now);
            debug!(%title, date = %fields.date, rating = %fields.rating, "Table row");

            AggregatedEntry {
                guid: fields.guid(),
                title: format!("{title}{}", fields.rating_tag()),
                link,
                description,
                published,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    const PAGE: &str = r#"<html><body>
<table id="other"><tr><td>ignore me</td></tr></table>
<table id="newsTable">
  <thead><tr><th>Date</th><th>Rating</th><th>Title</th><th>Summary</th><th></th></tr></thead>
  <tbody>
    <tr>
      <td>2025-05-16</td>
      <td>Essential</td>
      <td><a href="/articles/1">New model   released</a></td>
      <td>A short summary of the release.</td>
      <td>x</td>
    </tr>
    <tr><td></td><td></td><td></td><td></td><td></td></tr>
    <tr>
      <td>05/14/2025</td>
      <td>optional</td>
      <td><a href="https://other.example.com/b">Benchmarks</a></td>
      <td>Numbers</td>
    </tr>
  </tbody>
</table>
</body></html>"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_extract_table_reads_headers_and_skips_empty_rows() {
        let rows = extract_table(PAGE, "newsTable").unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.cells[0].header, "Date");
        assert_eq!(first.cells[2].text, "New model released");
        assert_eq!(first.cells[2].links, vec!["/articles/1"]);
        assert_eq!(first.cells[4].header, "Column_5");
    }

    #[test]
    fn test_extract_table_without_thead_uses_first_row() {
        let html = r#"<table id="t">
<tr><th>Date</th><th>Title</th></tr>
<tr><td>2025-05-16</td><td>Something happened today</td></tr>
</table>"#;
        let rows = extract_table(html, "t").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[1].header, "Title");
        assert_eq!(rows[0].cells[1].text, "Something happened today");
    }

    #[test]
    fn test_header_row_in_tbody_is_not_an_entry() {
        let html = r#"<table id="t"><tbody>
<tr><td>Date</td><td>Title</td></tr>
<tr><td>2025-05-16</td><td>Something happened today</td></tr>
<tr><td>2025-05-15</td><td>Something happened yesterday</td></tr>
</tbody></table>"#;
        let rows = extract_table(html, "t").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.cells[0].text != "Date"));

        let entries = to_entries(&rows, "https://gaiinsights.com/ratings", "", now());
        assert!(entries.iter().all(|e| e.published != now()));
    }

    #[test]
    fn test_missing_table_is_an_error() {
        assert_eq!(
            extract_table(PAGE, "missing").unwrap_err(),
            TableError::NotFound("missing".into())
        );
    }

    #[test]
    fn test_row_fields_by_header_and_content() {
        let rows = extract_table(PAGE, "newsTable").unwrap();
        let fields = RowFields::from_row(&rows[0]);
        assert_eq!(fields.date, "2025-05-16");
        assert_eq!(fields.rating, "Essential");
        assert_eq!(fields.title, "New model released");
        assert_eq!(fields.title_url, "/articles/1");
        assert_eq!(fields.description, "A short summary of the release.");
        assert_eq!(fields.rating_tag(), " [ ! ]");
    }

    #[test]
    fn test_row_fields_fallback_title() {
        let row = TableRow {
            cells: vec![TableCell {
                header: "Column_1".into(),
                text: "Short".into(),
                links: vec![],
            }],
        };
        let fields = RowFields::from_row(&row);
        assert_eq!(fields.title, "Short");
    }

    #[test]
    fn test_to_entries_tags_resolves_and_dates() {
        let rows = extract_table(PAGE, "newsTable").unwrap();
        let entries = to_entries(
            &rows,
            "https://gaiinsights.com/ratings",
            "https://rss.example.org/",
            now(),
        );
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].title, "New model released [ ! ]");
        assert_eq!(entries[0].link, "https://gaiinsights.com/articles/1");
        assert_eq!(entries[0].published.day(), 16);
        assert_eq!(entries[1].title, "Benchmarks [ ~ ]");
        assert_eq!(entries[1].published.day(), 14);
        assert_eq!(entries[1].description, "Numbers");

        // same row, same guid
        let again = to_entries(&rows, "https://gaiinsights.com/ratings", "", now());
        assert_eq!(entries[0].guid, again[0].guid);
        assert_ne!(entries[0].guid, entries[1].guid);
    }

    #[test]
    fn test_undated_row_uses_now_and_feed_link() {
        let row = TableRow {
            cells: vec![TableCell {
                header: "Headline".into(),
                text: "Undated headline text".into(),
                links: vec![],
            }],
        };
        let entries = to_entries(&[row], "https://gaiinsights.com/ratings", "https://rss.example.org/", now());
        assert_eq!(entries[0].published, now());
        assert_eq!(entries[0].link, "https://rss.example.org/");
        assert_eq!(entries[0].description, "Undated headline text");
    }
}
