//! Column-addressed view of a raw cycler export.
//!
//! Every delimited or spreadsheet input is read into a [`RawTable`] of text
//! cells first; adapters then pull typed columns out by header name. Blank
//! cells, `-` and `nan` read as NaN.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Data rows skipped right after the header (unit rows).
    pub skip_rows: usize,
    /// Drop the first column (an exported row index).
    pub drop_index_column: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_rows: 0,
            drop_index_column: false,
        }
    }
}

impl CsvOptions {
    pub fn tab_separated() -> Self {
        Self {
            delimiter: b'\t',
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn from_csv_reader<R: Read>(reader: R, options: &CsvOptions) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .context("reading header row")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("reading row {}", i + 2))?;
            if i < options.skip_rows {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        let mut table = Self { headers, rows };
        if options.drop_index_column {
            table.drop_first_column();
        }
        Ok(table)
    }

    pub fn from_csv_path(path: &Path, options: &CsvOptions) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
        Self::from_csv_reader(file, options)
            .with_context(|| format!("parsing '{}'", path.display()))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("missing column '{name}'"))
    }

    /// Text cells of a column; short rows yield empty cells.
    pub fn texts(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(idx).map(String::as_str).unwrap_or(""))
            .collect())
    }

    pub fn floats(&self, name: &str) -> Result<Vec<f64>> {
        self.texts(name)?
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                parse_float(raw).ok_or_else(|| {
                    anyhow!("column '{name}' row {}: cannot read '{raw}' as a number", i + 1)
                })
            })
            .collect()
    }

    /// Rename headers found in `mapping` (raw name to new name).
    pub fn rename_columns(&mut self, mapping: &BTreeMap<String, String>) {
        for header in &mut self.headers {
            if let Some(new) = mapping.get(header.as_str()) {
                *header = new.clone();
            }
        }
    }

    /// Append the rows of `other`, aligning columns by name. Columns only one
    /// side has are kept and padded with empty cells.
    pub fn append(&mut self, other: RawTable) {
        if self.headers.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }
        let before = self.headers.len();
        for header in &other.headers {
            if !self.has_column(header) {
                self.headers.push(header.clone());
            }
        }
        if self.headers.len() > before {
            let width = self.headers.len();
            for row in &mut self.rows {
                row.resize(width, String::new());
            }
        }
        let positions: Vec<usize> = other
            .headers
            .iter()
            .map(|h| self.headers.iter().position(|own| own == h).unwrap_or(0))
            .collect();
        for row in other.rows {
            let mut aligned = vec![String::new(); self.headers.len()];
            for (cell, pos) in row.into_iter().zip(&positions) {
                aligned[*pos] = cell;
            }
            self.rows.push(aligned);
        }
    }

    /// Keep rows whose flag is set.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.rows.retain(|_| flags.next().copied().unwrap_or(false));
    }

    /// Reorder rows by `order`, a permutation of row indices.
    pub fn reorder_rows(&mut self, order: &[usize]) {
        let mut taken: Vec<Option<Vec<String>>> =
            std::mem::take(&mut self.rows).into_iter().map(Some).collect();
        self.rows = order.iter().filter_map(|i| taken.get_mut(*i)?.take()).collect();
    }

    fn drop_first_column(&mut self) {
        if self.headers.is_empty() {
            return;
        }
        self.headers.remove(0);
        for row in &mut self.rows {
            if !row.is_empty() {
                row.remove(0);
            }
        }
    }
}

/// Parse a numeric cell. Blank, `-` and `nan` cells are NaN; anything else
/// that is not a number is `None`.
pub fn parse_float(raw: &str) -> Option<f64> {
    let value = raw.trim().trim_matches('"').trim();
    if value.is_empty() || value == "-" || value.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    value.parse::<f64>().ok()
}

/// Every worksheet of a workbook as `(sheet name, table)`, first row as header.
#[cfg(feature = "excel")]
pub fn workbook_sheets(bytes: Vec<u8>, drop_index_column: bool) -> Result<Vec<(String, RawTable)>> {
    use calamine::{open_workbook_auto_from_rs, Reader};
    use std::io::Cursor;

    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).context("opening workbook")?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("reading sheet '{name}'"))?;
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
        let headers: Vec<String> = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut table = RawTable::new(headers, rows.collect());
        if drop_index_column {
            table.drop_first_column();
        }
        sheets.push((name, table));
    }
    Ok(sheets)
}

#[cfg(not(feature = "excel"))]
pub fn workbook_sheets(_bytes: Vec<u8>, _drop_index_column: bool) -> Result<Vec<(String, RawTable)>> {
    Err(anyhow!("spreadsheet input requires the 'excel' feature"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_columns_by_name() {
        let text = "Time,mA,mV\n0,100,3700\n1,,3701\n";
        let table = RawTable::from_csv_reader(text.as_bytes(), &CsvOptions::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.floats("mV").unwrap(), vec![3700.0, 3701.0]);
        assert!(table.floats("mA").unwrap()[1].is_nan());
        assert!(table.floats("Strom").is_err());
    }

    #[test]
    fn unit_row_and_index_column_are_skipped() {
        let text = "idx,Zeit,Strom\n,-,A\n0,00:00:01,1.5\n1,00:00:02,-2.0\n";
        let options = CsvOptions {
            skip_rows: 1,
            drop_index_column: true,
            ..CsvOptions::default()
        };
        let table = RawTable::from_csv_reader(text.as_bytes(), &options).unwrap();
        assert_eq!(table.headers(), ["Zeit", "Strom"]);
        assert_eq!(table.floats("Strom").unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn append_aligns_by_header() {
        let mut a = RawTable::new(
            vec!["x".into(), "y".into()],
            vec![vec!["1".into(), "2".into()]],
        );
        let b = RawTable::new(
            vec!["y".into(), "z".into()],
            vec![vec!["3".into(), "4".into()]],
        );
        a.append(b);
        assert_eq!(a.headers(), ["x", "y", "z"]);
        assert_eq!(a.floats("y").unwrap(), vec![2.0, 3.0]);
        assert!(a.floats("x").unwrap()[1].is_nan());
        assert!(a.floats("z").unwrap()[0].is_nan());
    }

    #[test]
    fn reorder_and_retain() {
        let mut table = RawTable::new(
            vec!["v".into()],
            vec![vec!["a".into()], vec!["b".into()], vec!["c".into()]],
        );
        table.reorder_rows(&[2, 0, 1]);
        assert_eq!(table.texts("v").unwrap(), vec!["c", "a", "b"]);
        table.retain_rows(&[true, false, true]);
        assert_eq!(table.texts("v").unwrap(), vec!["c", "b"]);
    }

    #[test]
    fn parse_float_rules() {
        assert_eq!(parse_float(" \"1.5\" "), Some(1.5));
        assert!(parse_float("-").unwrap().is_nan());
        assert!(parse_float("NaN").unwrap().is_nan());
        assert_eq!(parse_float("abc"), None);
    }
}
