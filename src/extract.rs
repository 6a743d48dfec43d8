//! Schema-driven extraction of loosely structured HTML tables.
//!
//! A [`TableSchema`] names the table to look for, the minimum number of data
//! cells a row must carry and how cells map to column names. Extraction never
//! fails: a page without a matching table is a normal "no data" outcome and
//! yields an empty sequence, short rows are silently skipped.

use std::collections::BTreeMap;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Ordered column-name to string-value mapping for one table row. This is the
/// extraction-boundary representation; entity modules project it into typed
/// records before anything is persisted.
pub type RawRecord = Vec<(String, String)>;

/// How to find the target table among possibly many tables on the page.
#[derive(Debug, Clone)]
pub enum TableLocator {
    /// The n-th `<table>` on the page, in document order.
    Index(usize),
    /// The first table whose header row has at least the schema's minimum
    /// column count and a header cell containing this text.
    HeaderContains(&'static str),
    /// The first table inside the first element matching this CSS selector.
    Within(&'static str),
}

#[derive(Debug, Clone)]
pub enum ColumnMap {
    /// Column names discovered at runtime from the table's header row.
    FromHeader,
    /// Fixed cell-position to column-name mapping.
    Positional(Vec<(usize, &'static str)>),
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub locator: TableLocator,
    pub min_columns: usize,
    pub columns: ColumnMap,
}

/// Extracts all rows of the table matched by `schema`. Empty when the locator
/// matches nothing; duplicate candidates resolve to the first in document
/// order.
pub fn extract(html: &str, schema: &TableSchema) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    extract_doc(&doc, schema)
}

/// Like [`extract`] but augments every row with the out-of-band tolerance
/// column carried in id-tagged cells elsewhere on the page (see
/// [`ToleranceChannel`]). Rows without an aligned value get an empty string.
pub fn extract_with_tolerance(html: &str, schema: &TableSchema) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    let mut records = extract_doc(&doc, schema);
    let channel = ToleranceChannel::from_doc(&doc);
    let row_count = records.len();
    for (i, record) in records.iter_mut().enumerate() {
        let value = channel.align(i, row_count).unwrap_or("").to_string();
        record.push((channel.column_name.clone(), value));
    }
    records
}

pub(crate) fn extract_doc(doc: &Html, schema: &TableSchema) -> Vec<RawRecord> {
    let Some(table) = locate_table(doc, schema) else {
        return Vec::new();
    };
    let (Some(tr_sel), Some(td_sel), Some(th_sel)) = (sel("tr"), sel("td"), sel("th")) else {
        return Vec::new();
    };

    let headers = match schema.columns {
        ColumnMap::FromHeader => header_cells(table),
        ColumnMap::Positional(_) => Vec::new(),
    };

    let mut records = Vec::new();
    for (i, row) in table.select(&tr_sel).enumerate() {
        // The first row is the header whenever it carries <th> cells or the
        // schema discovers its column names from it.
        let is_header = i == 0
            && (matches!(schema.columns, ColumnMap::FromHeader)
                || row.select(&th_sel).next().is_some());
        if is_header {
            continue;
        }
        let cells: Vec<String> = row.select(&td_sel).map(|c| cell_text(&c)).collect();
        if cells.len() < schema.min_columns {
            continue;
        }
        let record: RawRecord = match &schema.columns {
            ColumnMap::FromHeader => cells
                .iter()
                .enumerate()
                .map(|(idx, value)| {
                    let name = headers
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| format!("col{idx}"));
                    (name, value.clone())
                })
                .collect(),
            ColumnMap::Positional(map) => map
                .iter()
                .map(|(idx, name)| {
                    ((*name).to_string(), cells.get(*idx).cloned().unwrap_or_default())
                })
                .collect(),
        };
        records.push(record);
    }
    records
}

fn locate_table<'a>(doc: &'a Html, schema: &TableSchema) -> Option<ElementRef<'a>> {
    let table_sel = sel("table")?;
    match &schema.locator {
        TableLocator::Index(n) => doc.select(&table_sel).nth(*n),
        TableLocator::HeaderContains(pattern) => doc.select(&table_sel).find(|table| {
            let headers = header_cells(*table);
            headers.len() >= schema.min_columns && headers.iter().any(|h| h.contains(pattern))
        }),
        TableLocator::Within(css) => {
            let container_sel = sel(css)?;
            doc.select(&container_sel).next()?.select(&table_sel).next()
        }
    }
}

/// Texts of the cells in the table's first row.
fn header_cells(table: ElementRef) -> Vec<String> {
    let (Some(tr_sel), Some(cell_sel)) = (sel("tr"), sel("th, td")) else {
        return Vec::new();
    };
    let Some(first_row) = table.select(&tr_sel).next() else {
        return Vec::new();
    };
    first_row.select(&cell_sel).map(|c| cell_text(&c)).collect()
}

/// Trims every text fragment of the cell and joins them with an explicit
/// newline, so line breaks inside remarks survive CSV quoting.
pub(crate) fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn sel(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Default header used when the page does not carry one for the hidden column.
const TOLERANCE_COLUMN_DEFAULT: &str = "殘留容許量(ppm)";

/// Fixed base offsets between the tolerance cell ids and the table's row
/// index. The true base is not documented and shifts with page layout, so the
/// candidates are tried in order; this join is best-effort by design.
const TOLERANCE_OFFSET_CANDIDATES: [isize; 2] = [38, 39];

/// Residue-tolerance values the page carries out-of-band, in `<td>` elements
/// whose id embeds a numeric row index (`Tolerance_td39`).
pub struct ToleranceChannel {
    pub column_name: String,
    values: BTreeMap<usize, String>,
}

impl ToleranceChannel {
    pub(crate) fn from_doc(doc: &Html) -> Self {
        let mut column_name = TOLERANCE_COLUMN_DEFAULT.to_string();
        if let Some(th_sel) = sel("th[id]") {
            if let Some(header) = doc
                .select(&th_sel)
                .find(|th| {
                    th.value()
                        .attr("id")
                        .is_some_and(|id| id.to_lowercase().contains("tolerance"))
                })
            {
                let text = cell_text(&header);
                if !text.is_empty() {
                    column_name = text;
                }
            }
        }

        let mut values = BTreeMap::new();
        if let (Some(td_sel), Ok(id_re)) = (sel("td[id]"), Regex::new(r"(?i)tolerance_td(\d+)")) {
            for td in doc.select(&td_sel) {
                let Some(id) = td.value().attr("id") else { continue };
                let Some(caps) = id_re.captures(id) else { continue };
                if let Ok(row_num) = caps[1].parse::<usize>() {
                    values.insert(row_num, cell_text(&td));
                }
            }
        }
        Self { column_name, values }
    }

    /// Best-effort alignment of a base-table row index to a tolerance value.
    /// Offset candidates are tried in order, first match wins, `None` on miss.
    pub fn align(&self, row: usize, table_rows: usize) -> Option<&str> {
        let row = row as isize;
        let dynamic_offset = self.values.len() as isize - table_rows as isize;
        for (&id, value) in &self.values {
            let id = id as isize;
            for base in TOLERANCE_OFFSET_CANDIDATES.iter().copied().chain([dynamic_offset]) {
                if id - base == row {
                    return Some(value);
                }
            }
        }
        None
    }
}
